use crate::classify::{is_representable, SegmentFilter, ZeroLengthPolicy};
use crate::manifest::{ManifestEntry, ManifestWriter};
use crate::store::{ObjectDescriptor, ObjectStore};
use anyhow::{Context, Result};
use std::path::Path;
use tracing::{debug, info, warn};

#[derive(Clone, Debug, Default)]
pub struct BuilderConfig {
    pub zero_length: ZeroLengthPolicy,
    pub segments: SegmentFilter,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct BuildReport {
    pub container: String,
    /// Manifest lines written, folder placeholders included.
    pub items: usize,
    pub folders: usize,
    pub segments_skipped: usize,
    /// Names that cannot be stored in a tab-separated line, or with an unusable checksum.
    pub unrepresentable: usize,
}

/// Turn a container listing into manifest entries, in listing order.
pub fn plan_entries(
    container: &str,
    objects: &[ObjectDescriptor],
    cfg: &BuilderConfig,
) -> (Vec<ManifestEntry>, BuildReport) {
    let mut report = BuildReport {
        container: container.to_string(),
        ..Default::default()
    };
    let mut entries = Vec::with_capacity(objects.len());
    for obj in objects {
        if cfg.segments.is_segment(&obj.name) {
            debug!(container, name = %obj.name, "skipping large-object segment");
            report.segments_skipped += 1;
            continue;
        }
        if !is_representable(&obj.name) {
            warn!(container, name = ?obj.name, "name cannot be written to the manifest, skipped");
            report.unrepresentable += 1;
            continue;
        }
        let Some(checksum) = cfg.zero_length.checksum_for(obj.size_bytes, &obj.checksum) else {
            warn!(container, name = %obj.name, hash = %obj.checksum, "unusable checksum, skipped");
            report.unrepresentable += 1;
            continue;
        };
        if checksum.is_folder() {
            report.folders += 1;
        }
        entries.push(ManifestEntry::new(container, &obj.name, checksum));
    }
    report.items = entries.len();
    (entries, report)
}

pub struct ManifestBuilder<'a> {
    store: &'a dyn ObjectStore,
    cfg: BuilderConfig,
}

impl<'a> ManifestBuilder<'a> {
    pub fn new(store: &'a dyn ObjectStore, cfg: BuilderConfig) -> Self {
        Self { store, cfg }
    }

    /// List `container` in full and append its entries to `manifest`.
    /// A listing failure is fatal for the container and writes nothing.
    pub fn build(&self, container: &str, manifest: &Path) -> Result<BuildReport> {
        let objects = self
            .store
            .list_objects(container, None)
            .with_context(|| format!("list container {:?}", container))?;
        let (entries, report) = plan_entries(container, &objects, &self.cfg);
        let mut w = ManifestWriter::append_to(manifest)?;
        for e in &entries {
            w.append(e)?;
        }
        w.finish()?;
        info!(
            container,
            items = report.items,
            folders = report.folders,
            segments = report.segments_skipped,
            "{}: {} items",
            container,
            report.items
        );
        Ok(report)
    }
}
