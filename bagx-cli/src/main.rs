use anyhow::{anyhow, Context, Result};
use clap::{Args, Parser, Subcommand};
use globset::{Glob, GlobSet, GlobSetBuilder};
use std::io::IsTerminal;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Duration;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use bagx_core::bag::Bag;
use bagx_core::builder::BuilderConfig;
use bagx_core::config::ExportConfig;
use bagx_core::download::DownloadConfig;
use bagx_core::error::ConfigError;
use bagx_core::export::{run_export, select_containers, ExportOptions};
use bagx_core::logs::{merge_activity_log, merge_audit_log};
use bagx_core::ship::UploadPlan;
use bagx_core::store::ObjectStore;
use bagx_core::swift::{SwiftOptions, SwiftStore};
use bagx_core::verify::{validate, ValidateOptions, ValidationReport};

const EXIT_FATAL: u8 = 1;
const EXIT_CONFIG: u8 = 2;
const EXIT_UNVERIFIED: u8 = 3;

#[derive(Parser)]
#[command(
    name = "bagx",
    version,
    about = "Export an object-storage account into a verified BagIt bag"
)]
struct Cli {
    /// Debug-level logging (RUST_LOG still wins)
    #[arg(short, long, global = true)]
    verbose: bool,
    #[command(subcommand)]
    cmd: Cmd,
}

#[derive(Subcommand)]
enum Cmd {
    /// Manifest, download, validate, collect logs and ship
    Export(ExportArgs),
    /// Validate an existing bag against its manifest
    Validate {
        bag: PathBuf,
        /// Existence only, no checksums
        #[arg(short, long)]
        quick: bool,
        #[arg(long)]
        progress: bool,
    },
    /// Print name, size and hash of every object in a container
    List {
        #[arg(short, long)]
        config: PathBuf,
        container: String,
    },
    /// Collect the activity and audit logs only
    Logs {
        #[arg(short, long)]
        config: PathBuf,
        #[arg(long, default_value = ".")]
        bag: PathBuf,
    },
}

#[derive(Args)]
struct ExportArgs {
    #[arg(short, long)]
    config: PathBuf,
    /// Archive root
    #[arg(long, default_value = ".")]
    bag: PathBuf,
    /// Test access permissions only: authenticate and list, but write nothing
    /// into the bag, not even bagit.txt
    #[arg(short = 'n', long)]
    noaction: bool,
    /// Skip MD5 recomputation during validation
    #[arg(short, long)]
    quick: bool,
    /// Skip the validation stage completely
    #[arg(short = 'V', long)]
    novalidate: bool,
    /// Reuse the existing manifest instead of listing the containers
    #[arg(short = 'm', long)]
    nomanifest: bool,
    /// Skip activity and audit log collection
    #[arg(short = 'l', long)]
    nologs: bool,
    /// Skip downloading content
    #[arg(short = 'f', long)]
    nofiles: bool,
    /// Skip shipping to the archive bucket
    #[arg(short = 'g', long)]
    noupload: bool,
    /// Only export containers matching these globs
    #[arg(long = "container")]
    containers: Vec<String>,
    #[arg(long)]
    progress: bool,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);
    let res = match cli.cmd {
        Cmd::Export(args) => export(args),
        Cmd::Validate {
            bag,
            quick,
            progress,
        } => validate_bag(&bag, quick, progress),
        Cmd::List { config, container } => list(&config, &container),
        Cmd::Logs { config, bag } => logs_only(&config, &bag),
    };
    match res {
        Ok(code) => code,
        Err(e) if e.downcast_ref::<ConfigError>().is_some() => {
            error!("configuration error: {:#}", e);
            ExitCode::from(EXIT_CONFIG)
        }
        Err(e) => {
            error!("{:#}", e);
            ExitCode::from(EXIT_FATAL)
        }
    }
}

fn init_logging(verbose: bool) {
    let level = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("bagx={}", level)));
    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_ansi(std::io::stderr().is_terminal())
        .with_target(false)
        .compact();
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt_layer)
        .init();
}

fn load_config(path: &Path, logs_enabled: bool) -> Result<ExportConfig> {
    let cfg = ExportConfig::load(path)?;
    cfg.validate(logs_enabled)?;
    Ok(cfg)
}

fn swift_options(cfg: &ExportConfig) -> SwiftOptions {
    SwiftOptions {
        download_threads: cfg.export.download_threads,
        timeout: cfg.export.timeout(),
    }
}

fn connect_customer(cfg: &ExportConfig) -> Result<SwiftStore> {
    let c = &cfg.customer.credentials;
    SwiftStore::connect(&cfg.customer.auth_url, c, swift_options(cfg))
        .with_context(|| format!("authenticate {} ({})", c.username, c.tenant))
}

fn connect_admin(cfg: &ExportConfig) -> Result<SwiftStore> {
    let a = cfg.admin.as_ref().ok_or(ConfigError::Missing("admin"))?;
    SwiftStore::connect(&cfg.customer.auth_url, a, swift_options(cfg))
        .with_context(|| format!("admin login {} ({})", a.username, a.tenant))
}

fn build_globset(patterns: &[String]) -> Result<Option<GlobSet>> {
    if patterns.is_empty() {
        return Ok(None);
    }
    let mut b = GlobSetBuilder::new();
    for p in patterns {
        let glob = Glob::new(p).with_context(|| format!("bad container glob {p:?}"))?;
        b.add(glob);
    }
    Ok(Some(b.build()?))
}

fn export(args: ExportArgs) -> Result<ExitCode> {
    let n = args.noaction;
    let build_manifest = !(n || args.nomanifest);
    let download = !(n || args.nofiles);
    let run_validation = !(n || args.novalidate);
    let collect_logs = !(n || args.nologs);
    let upload = !(n || args.noupload);

    let cfg = load_config(&args.config, collect_logs)?;
    let segments = cfg.segment_filter()?;
    let store = connect_customer(&cfg)?;
    let admin = if collect_logs {
        Some(connect_admin(&cfg)?)
    } else {
        None
    };

    let allow = cfg.customer.downloads.as_deref();
    let containers: Option<Vec<String>> = match build_globset(&args.containers)? {
        Some(globs) => {
            let all = store.list_containers().context("list containers")?;
            let mut selected = select_containers(&all, allow);
            selected.retain(|c| globs.is_match(c));
            Some(selected)
        }
        None => allow.map(<[String]>::to_vec),
    };

    let bag = Bag::new(&args.bag);
    let opts = ExportOptions {
        build_manifest,
        download,
        validate: run_validation,
        quick: args.quick,
        progress: args.progress,
        containers,
        builder: BuilderConfig {
            zero_length: cfg.export.zero_length_policy,
            segments,
        },
        download_cfg: DownloadConfig {
            batch_size: cfg.export.batch_size,
            skip_identical: true,
        },
    };
    let report = run_export(&store, &bag, &opts)?;
    let problems = report.download_problems();
    if problems > 0 {
        warn!("{problems} objects could not be downloaded");
    }

    if let Some(admin) = &admin {
        let settle = cfg.export.log_settle_secs;
        info!("Pausing {settle} seconds for activity records to settle");
        std::thread::sleep(Duration::from_secs(settle));
        collect(&store, admin, &bag)?;
    } else {
        info!("NOT downloading activity and audit logs");
    }

    if n {
        return Ok(ExitCode::SUCCESS);
    }
    bag.write_bagit_txt()?;

    if upload {
        let c = &cfg.customer;
        let targets: Vec<(String, String)> = match (&c.downloads, &c.uploads) {
            (Some(d), Some(u)) => d
                .iter()
                .zip(u)
                .filter(|(c, _)| report.containers.contains(*c))
                .map(|(c, b)| (c.clone(), b.clone()))
                .collect(),
            _ => Vec::new(),
        };
        let mut metadata = Vec::new();
        if collect_logs {
            metadata.extend([
                bag.activity_log_path(),
                bag.audit_log_path(),
                bag.upload_log_path(),
                bag.bagit_path(),
            ]);
            if build_manifest {
                metadata.push(bag.manifest_path());
            }
        }
        match UploadPlan::build(&cfg.upload, &bag, &targets, &metadata) {
            Some(plan) => {
                let shipped = plan.run();
                if !shipped.failures.is_empty() {
                    let failed = shipped.failures.len();
                    warn!("{failed} of {} upload commands failed", shipped.ran);
                }
            }
            None => info!("NOT uploading: no boto file or project configured"),
        }
    } else {
        info!("NOT uploading to archive storage");
    }

    match &report.validation {
        Some(v) => Ok(summarize(v)),
        None => Ok(ExitCode::SUCCESS),
    }
}

fn collect(store: &SwiftStore, admin: &SwiftStore, bag: &Bag) -> Result<()> {
    let session = store.session();
    let account = session
        .account_id()
        .ok_or_else(|| anyhow!("no account id in {}", session.storage_url))?;
    for (kind, r) in [
        ("activity", merge_activity_log(admin, account, &bag.activity_log_path())?),
        ("audit", merge_audit_log(admin, account, &bag.audit_log_path())?),
    ] {
        for (name, why) in &r.skipped {
            warn!("{} log object {} skipped: {}", kind, name, why);
        }
    }
    Ok(())
}

fn summarize(v: &ValidationReport) -> ExitCode {
    println!("Completed validating content: {} errors", v.error_count());
    if v.is_verified() {
        println!("OK");
        ExitCode::SUCCESS
    } else {
        println!("BAD");
        ExitCode::from(EXIT_UNVERIFIED)
    }
}

fn validate_bag(root: &Path, quick: bool, progress: bool) -> Result<ExitCode> {
    let bag = Bag::new(root);
    let opts = ValidateOptions {
        quick,
        progress,
        scan_untracked: true,
    };
    let report = validate(&bag, &opts)?;
    Ok(summarize(&report))
}

fn list(config: &Path, container: &str) -> Result<ExitCode> {
    let cfg = load_config(config, false)?;
    let store = connect_customer(&cfg)?;
    let objects = store
        .list_objects(container, None)
        .with_context(|| format!("list {container:?}"))?;
    for o in objects {
        println!("{}\t{}\t{}", o.name, o.size_bytes, o.checksum);
    }
    Ok(ExitCode::SUCCESS)
}

fn logs_only(config: &Path, root: &Path) -> Result<ExitCode> {
    let cfg = load_config(config, true)?;
    let store = connect_customer(&cfg)?;
    let admin = connect_admin(&cfg)?;
    let bag = Bag::new(root);
    std::fs::create_dir_all(bag.root()).with_context(|| format!("create {:?}", bag.root()))?;
    collect(&store, &admin, &bag)?;
    Ok(ExitCode::SUCCESS)
}
