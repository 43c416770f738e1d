use crate::bag::Bag;
use crate::digest::file_md5_hex;
use crate::manifest::{Checksum, ManifestReader};
use crate::progress::Progress;
use anyhow::{Context, Result};
use std::collections::HashSet;
use std::path::Path;
use tracing::{error, info, warn};
use walkdir::WalkDir;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ValidationErrorKind {
    MissingFile,
    ChecksumMismatch,
    /// Manifest path would resolve outside the bag.
    UnsafePath,
    /// Present but could not be read for checksumming.
    Unreadable,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ValidationError {
    /// 1-based manifest line.
    pub line: usize,
    pub path: String,
    pub kind: ValidationErrorKind,
    pub expected: String,
    pub actual: Option<String>,
}

#[derive(Clone, Debug, Default)]
pub struct ValidationReport {
    pub checked: usize,
    /// Entries accepted as folders (a directory on disk or a placeholder).
    pub folders: usize,
    pub errors: Vec<ValidationError>,
    /// Files under `data/` that no manifest line names. Reported, never counted as errors.
    pub untracked: Vec<String>,
}

impl ValidationReport {
    pub fn error_count(&self) -> usize {
        self.errors.len()
    }

    pub fn is_verified(&self) -> bool {
        self.errors.is_empty()
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub struct ValidateOptions {
    /// Existence only; skips checksum recomputation and therefore misses corruption.
    pub quick: bool,
    pub progress: bool,
    pub scan_untracked: bool,
}

/// Check every manifest entry, in manifest order, against the bag's data directory.
pub fn validate(bag: &Bag, opts: &ValidateOptions) -> Result<ValidationReport> {
    let entries = ManifestReader::open(&bag.manifest_path())?
        .collect::<Result<Vec<_>>>()
        .context("read manifest for validation")?;

    let prog = Progress::new(opts.progress);
    let stage = if opts.quick {
        "Quick validating"
    } else {
        "Validating"
    };
    prog.set_stage(stage);
    prog.set_total(entries.len());
    prog.start();

    let mut report = ValidationReport::default();
    let mut errors = Vec::new();
    for (line, entry) in &entries {
        prog.inc();
        report.checked += 1;
        let path = entry.path.to_string();
        let fail = |kind, actual: Option<String>| ValidationError {
            line: *line,
            path: path.clone(),
            kind,
            expected: entry.checksum.to_string(),
            actual,
        };

        let local = match bag.resolve(&entry.path) {
            Ok(p) => p,
            Err(e) => {
                error!("unsafe manifest path {:?}: {:#}", path, e);
                errors.push(fail(ValidationErrorKind::UnsafePath, None));
                continue;
            }
        };
        if local.is_dir() {
            report.folders += 1;
            continue;
        }
        if !local.is_file() {
            error!("file in manifest not found in data directory: {:?}", path);
            errors.push(fail(ValidationErrorKind::MissingFile, None));
            continue;
        }
        let Checksum::Md5(expected) = &entry.checksum else {
            report.folders += 1;
            continue;
        };
        if opts.quick {
            continue;
        }
        match file_md5_hex(&local) {
            Ok(actual) if actual == *expected => {}
            Ok(actual) => {
                error!("calculated md5 != stored md5");
                error!("    {}\t{}\t manifest", expected, path);
                error!("    {}\t{}\t calculated", actual, path);
                errors.push(fail(ValidationErrorKind::ChecksumMismatch, Some(actual)));
            }
            Err(e) => {
                error!("cannot checksum {:?}: {:#}", path, e);
                errors.push(fail(ValidationErrorKind::Unreadable, None));
            }
        }
    }
    prog.stop();
    report.errors = errors;

    if opts.scan_untracked {
        let listed: HashSet<String> = entries.iter().map(|(_, e)| e.path.to_string()).collect();
        report.untracked = untracked_files(bag, &listed)?;
        for p in &report.untracked {
            warn!("file in data directory not listed in manifest: {:?}", p);
        }
    }

    let count = report.error_count();
    info!("Completed validating content: {} errors", count);
    Ok(report)
}

fn untracked_files(bag: &Bag, listed: &HashSet<String>) -> Result<Vec<String>> {
    let data = bag.data_dir();
    if !data.is_dir() {
        return Ok(Vec::new());
    }
    let mut out = Vec::new();
    for ent in WalkDir::new(&data).min_depth(1).sort_by_file_name() {
        let ent = ent.with_context(|| format!("walk {:?}", data))?;
        if !ent.file_type().is_file() {
            continue;
        }
        let rel = slash_path(ent.path().strip_prefix(bag.root()).unwrap_or(ent.path()));
        if !listed.contains(&rel) {
            out.push(rel);
        }
    }
    Ok(out)
}

fn slash_path(p: &Path) -> String {
    p.components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}
