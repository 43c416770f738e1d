use crate::bag::Bag;
use crate::manifest::{ManifestEntry, ManifestReader};
use crate::store::{BulkDownload, ObjectStore, TransferResult};
use anyhow::{Context, Result};
use std::collections::HashSet;
use std::fs;
use std::path::Path;
use tracing::{debug, error, info, warn};

/// Resolved per-object result of a bulk download.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DownloadOutcome {
    Ok,
    /// Already present locally with identical content.
    Unmodified,
    Failed { status: u16, reason: String },
    Error { message: String },
}

impl DownloadOutcome {
    /// The only place a raw [`TransferResult`] is inspected.
    pub fn classify(r: &TransferResult) -> Self {
        if r.success {
            return DownloadOutcome::Ok;
        }
        let status_line = r.response.as_ref().and_then(|resp| {
            let reason = resp.reason.as_deref()?;
            Some((resp.status, reason))
        });
        match status_line {
            None => DownloadOutcome::Error {
                message: r
                    .error
                    .clone()
                    .unwrap_or_else(|| "unknown transfer error".to_string()),
            },
            Some((_, "Not Modified" | "OK")) => DownloadOutcome::Unmodified,
            Some((status, reason)) => DownloadOutcome::Failed {
                status,
                reason: reason.to_string(),
            },
        }
    }

    pub fn is_problem(&self) -> bool {
        matches!(
            self,
            DownloadOutcome::Failed { .. } | DownloadOutcome::Error { .. }
        )
    }
}

#[derive(Clone, Copy, Debug)]
pub struct DownloadConfig {
    pub batch_size: usize,
    pub skip_identical: bool,
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            batch_size: 1000,
            skip_identical: true,
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct DownloadReport {
    pub container: String,
    pub batches: usize,
    /// Placeholder entries created locally without asking the store.
    pub placeholders: usize,
    /// Every attempted object, in manifest order.
    pub outcomes: Vec<(String, DownloadOutcome)>,
}

impl DownloadReport {
    fn count(&self, pred: impl Fn(&DownloadOutcome) -> bool) -> usize {
        self.outcomes.iter().filter(|(_, o)| pred(o)).count()
    }

    pub fn ok(&self) -> usize {
        self.count(|o| *o == DownloadOutcome::Ok)
    }

    pub fn unmodified(&self) -> usize {
        self.count(|o| *o == DownloadOutcome::Unmodified)
    }

    pub fn problems(&self) -> usize {
        self.count(DownloadOutcome::is_problem)
    }

    fn record(&mut self, object: String, outcome: DownloadOutcome) {
        log_outcome(&object, &outcome);
        self.outcomes.push((object, outcome));
    }
}

/// Downloads the objects of one container that the manifest lists.
pub struct Downloader<'a> {
    store: &'a dyn ObjectStore,
    bag: &'a Bag,
    cfg: DownloadConfig,
}

impl<'a> Downloader<'a> {
    pub fn new(store: &'a dyn ObjectStore, bag: &'a Bag, cfg: DownloadConfig) -> Self {
        Self { store, bag, cfg }
    }

    /// Per-object failures are recorded in the report; only local setup
    /// problems and a malformed manifest are returned as errors.
    pub fn download(&self, container: &str) -> Result<DownloadReport> {
        let dest = self.bag.container_dir(container);
        fs::create_dir_all(&dest).with_context(|| format!("create dir {:?}", dest))?;

        let mut report = DownloadReport {
            container: container.to_string(),
            ..Default::default()
        };
        let mut batch: Vec<String> = Vec::with_capacity(self.cfg.batch_size);
        let mut placeholders: Vec<ManifestEntry> = Vec::new();
        let mut seen = 0usize;
        for item in ManifestReader::open(&self.bag.manifest_path())? {
            let (_, entry) = item?;
            if entry.path.container != container {
                continue;
            }
            if entry.checksum.is_folder() {
                placeholders.push(entry);
                continue;
            }
            if let Err(e) = self.bag.resolve(&entry.path) {
                let message = format!("{e:#}");
                report.record(entry.path.relative_name, DownloadOutcome::Error { message });
                continue;
            }
            seen += 1;
            batch.push(entry.path.relative_name);
            if batch.len() >= self.cfg.batch_size.max(1) {
                self.flush(container, &mut batch, seen, &mut report);
            }
        }
        if !batch.is_empty() {
            self.flush(container, &mut batch, seen, &mut report);
        }
        // After the real objects, so a placeholder never shadows a directory
        // that one of them needs.
        for entry in placeholders {
            match self.materialize(&entry) {
                Ok(()) => report.placeholders += 1,
                Err(e) => {
                    let message = format!("{e:#}");
                    report.record(entry.path.relative_name, DownloadOutcome::Error { message });
                }
            }
        }
        Ok(report)
    }

    /// Names ending in `/` become directories; any other zero-length
    /// placeholder becomes an empty file unless something already exists there.
    fn materialize(&self, entry: &ManifestEntry) -> Result<()> {
        let target = self.bag.resolve(&entry.path)?;
        if entry.path.relative_name.ends_with('/') {
            fs::create_dir_all(&target).with_context(|| format!("create dir {:?}", target))?;
        } else if !target.exists() {
            create_empty(&target).with_context(|| format!("create {:?}", target))?;
        }
        debug!("Folder:     {}", entry.path.relative_name);
        Ok(())
    }

    fn flush(
        &self,
        container: &str,
        batch: &mut Vec<String>,
        seen: usize,
        report: &mut DownloadReport,
    ) {
        let objects = std::mem::take(batch);
        let first = seen - objects.len();
        info!("Downloading {} - {} from {}", first, seen, container);
        let req = BulkDownload {
            container: container.to_string(),
            objects,
            out_dir: self.bag.container_dir(container),
            skip_identical: self.cfg.skip_identical,
        };
        report.batches += 1;
        let results = match self.store.bulk_download(&req) {
            Ok(r) => r,
            Err(e) => {
                error!(container, error = %e, "bulk download failed for the whole batch");
                let message = e.to_string();
                req.objects
                    .iter()
                    .map(|n| TransferResult::errored(n, message.clone()))
                    .collect()
            }
        };
        let mut answered: HashSet<&str> = HashSet::with_capacity(results.len());
        for r in &results {
            answered.insert(r.object.as_str());
            report.record(r.object.clone(), DownloadOutcome::classify(r));
        }
        for name in &req.objects {
            if answered.contains(name.as_str()) {
                continue;
            }
            let message = "no result reported for object".to_string();
            report.record(name.clone(), DownloadOutcome::Error { message });
        }
    }
}

fn create_empty(target: &Path) -> std::io::Result<()> {
    if let Some(parent) = target.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(false)
        .open(target)
        .map(drop)
}

fn log_outcome(object: &str, outcome: &DownloadOutcome) {
    match outcome {
        DownloadOutcome::Ok => info!("OK:         {}", object),
        DownloadOutcome::Unmodified => info!("Unmodified: {}", object),
        DownloadOutcome::Failed { status, reason } => {
            warn!("Failed:     {}", object);
            warn!("            {}: {}", status, reason);
        }
        DownloadOutcome::Error { message } => error!("Error: {} ({})", message, object),
    }
}
