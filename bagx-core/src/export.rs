//! The export pipeline: manifest, downloads and validation over one bag.

use crate::bag::Bag;
use crate::builder::{BuildReport, BuilderConfig, ManifestBuilder};
use crate::download::{DownloadConfig, DownloadReport, Downloader};
use crate::store::ObjectStore;
use crate::verify::{validate, ValidateOptions, ValidationReport};
use anyhow::{Context, Result};
use tracing::info;

#[derive(Clone, Debug)]
pub struct ExportOptions {
    /// Build a fresh manifest; otherwise the existing one is reused.
    pub build_manifest: bool,
    pub download: bool,
    pub validate: bool,
    pub quick: bool,
    pub progress: bool,
    /// Containers to export; every container of the account when `None`.
    pub containers: Option<Vec<String>>,
    pub builder: BuilderConfig,
    pub download_cfg: DownloadConfig,
}

impl Default for ExportOptions {
    fn default() -> Self {
        Self {
            build_manifest: true,
            download: true,
            validate: true,
            quick: false,
            progress: false,
            containers: None,
            builder: BuilderConfig::default(),
            download_cfg: DownloadConfig::default(),
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct ExportReport {
    pub containers: Vec<String>,
    pub manifest_reused: bool,
    pub builds: Vec<BuildReport>,
    pub downloads: Vec<DownloadReport>,
    pub validation: Option<ValidationReport>,
}

impl ExportReport {
    pub fn download_problems(&self) -> usize {
        self.downloads.iter().map(DownloadReport::problems).sum()
    }
}

/// Keep the account's containers named in `allow`, in account order.
pub fn select_containers(all: &[String], allow: Option<&[String]>) -> Vec<String> {
    match allow {
        Some(list) => all.iter().filter(|c| list.contains(c)).cloned().collect(),
        None => all.to_vec(),
    }
}

pub fn run_export(
    store: &dyn ObjectStore,
    bag: &Bag,
    opts: &ExportOptions,
) -> Result<ExportReport> {
    std::fs::create_dir_all(bag.root())
        .with_context(|| format!("create bag root {:?}", bag.root()))?;

    let acct = store.account_info().context("read account summary")?;
    let all = store.list_containers().context("list containers")?;
    let containers = select_containers(&all, opts.containers.as_deref());
    info!("{} containers", acct.container_count);
    for c in &all {
        let tag = if containers.contains(c) { '*' } else { ' ' };
        info!("{} {}", tag, c);
    }
    info!("{} objects, {} bytes", acct.object_count, acct.bytes_used);

    let mut report = ExportReport {
        containers: containers.clone(),
        ..Default::default()
    };
    report.manifest_reused = bag.prepare_manifest(!opts.build_manifest)?;

    if opts.build_manifest {
        let builder = ManifestBuilder::new(store, opts.builder.clone());
        let manifest = bag.manifest_path();
        for c in &containers {
            info!("Adding {} to manifest", c);
            report.builds.push(builder.build(c, &manifest)?);
        }
    } else {
        info!("NOT generating manifest");
    }

    if opts.download {
        let dl = Downloader::new(store, bag, opts.download_cfg);
        for c in &containers {
            info!("Container: {}", c);
            let r = dl.download(c).with_context(|| format!("download {:?}", c))?;
            report.downloads.push(r);
        }
    } else {
        info!("NOT downloading account content");
    }

    if opts.validate {
        let vopts = ValidateOptions {
            quick: opts.quick,
            progress: opts.progress,
            scan_untracked: true,
        };
        report.validation = Some(validate(bag, &vopts)?);
    } else {
        info!("NOT validating downloaded content against manifest");
    }
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allow_list_keeps_account_order() {
        let all: Vec<String> = ["a", "b", "c"].iter().map(|s| s.to_string()).collect();
        let allow = vec!["c".to_string(), "a".to_string(), "zz".to_string()];
        assert_eq!(select_containers(&all, Some(&allow)), ["a", "c"]);
        assert_eq!(select_containers(&all, None), all);
    }
}
