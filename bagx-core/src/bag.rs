use crate::manifest::{ManifestPath, DATA_DIR};
use crate::path_safety::resolve_under;
use anyhow::{Context, Result};
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

pub const FILENAME_BAGIT: &str = "bagit.txt";
pub const FILENAME_MANIFEST: &str = "manifest-md5.txt";
pub const FILENAME_ACTIVITY: &str = "activity-log.csv";
pub const FILENAME_AUDIT: &str = "audit-log.json";
pub const FILENAME_UPLOAD: &str = "upload.log";

const BAGIT_LINES: &str = "BagIt-Version: 0.97\nTag-File-Character-Encoding: UTF-8\n";

/// A bag rooted at a directory: `data/`, the md5 manifest and the tag files.
#[derive(Clone, Debug)]
pub struct Bag {
    root: PathBuf,
}

impl Bag {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn data_dir(&self) -> PathBuf {
        self.root.join(DATA_DIR)
    }

    pub fn container_dir(&self, container: &str) -> PathBuf {
        self.data_dir().join(container)
    }

    pub fn manifest_path(&self) -> PathBuf {
        self.root.join(FILENAME_MANIFEST)
    }

    pub fn bagit_path(&self) -> PathBuf {
        self.root.join(FILENAME_BAGIT)
    }

    pub fn activity_log_path(&self) -> PathBuf {
        self.root.join(FILENAME_ACTIVITY)
    }

    pub fn audit_log_path(&self) -> PathBuf {
        self.root.join(FILENAME_AUDIT)
    }

    pub fn upload_log_path(&self) -> PathBuf {
        self.root.join(FILENAME_UPLOAD)
    }

    /// Local location of a manifest path, refusing anything that would escape the bag.
    pub fn resolve(&self, path: &ManifestPath) -> Result<PathBuf> {
        resolve_under(&self.root, &path.to_string())
    }

    /// Start a manifest build: removes a previous manifest unless `reuse` is set.
    /// Returns whether an existing manifest was kept.
    pub fn prepare_manifest(&self, reuse: bool) -> Result<bool> {
        let p = self.manifest_path();
        if !p.is_file() {
            return Ok(false);
        }
        if reuse {
            return Ok(true);
        }
        std::fs::remove_file(&p).with_context(|| format!("remove stale manifest {:?}", p))?;
        Ok(false)
    }

    /// Append the identification lines. Repeated calls repeat the lines.
    pub fn write_bagit_txt(&self) -> Result<()> {
        let p = self.bagit_path();
        let mut f = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&p)
            .with_context(|| format!("open {:?}", p))?;
        f.write_all(BAGIT_LINES.as_bytes())
            .with_context(|| format!("write {:?}", p))?;
        Ok(())
    }
}
