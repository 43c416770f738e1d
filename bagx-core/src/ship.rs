//! Hand-off of the finished bag to the external upload tool.
//!
//! Every command runs out of process with `BOTO_CONFIG` pointing at the
//! configured credentials file. A non-zero exit status is logged and
//! recorded, but does not stop the remaining uploads.

use crate::bag::Bag;
use crate::config::UploadConfig;
use std::fmt;
use std::path::{Path, PathBuf};
use std::process::Command;
use tracing::{debug, error, info};

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ShipCommand {
    pub program: String,
    pub args: Vec<String>,
    pub env: Vec<(String, String)>,
}

impl fmt::Display for ShipCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (k, v) in &self.env {
            write!(f, "{}={} ", k, v)?;
        }
        write!(f, "{}", self.program)?;
        for a in &self.args {
            write!(f, " {:?}", a)?;
        }
        Ok(())
    }
}

#[derive(Clone, Debug, Default)]
pub struct ShipReport {
    pub ran: usize,
    /// `(command line, what went wrong)`
    pub failures: Vec<(String, String)>,
}

#[derive(Clone, Debug)]
pub struct UploadPlan {
    workdir: PathBuf,
    commands: Vec<ShipCommand>,
}

impl UploadPlan {
    /// `None` when no credentials file or project is configured.
    ///
    /// `targets` pairs each exported container with its destination bucket;
    /// `metadata` files go to a shared per-project metadata bucket.
    pub fn build(
        upload: &UploadConfig,
        bag: &Bag,
        targets: &[(String, String)],
        metadata: &[PathBuf],
    ) -> Option<Self> {
        let boto = upload.boto_file.as_ref()?;
        let project = upload.project_id.as_deref()?;
        let env = vec![("BOTO_CONFIG".to_string(), boto.display().to_string())];
        let cmd = |args: Vec<String>| ShipCommand {
            program: upload.tool.clone(),
            args,
            env: env.clone(),
        };
        let make_bucket = |bucket: &str| {
            cmd(vec![
                "mb".into(),
                "-p".into(),
                project.to_string(),
                "-c".into(),
                upload.storage_class.clone(),
                format!("gs://{}", bucket),
            ])
        };

        let mut commands = Vec::new();
        let upload_log = bag.upload_log_path().display().to_string();
        for (container, bucket) in targets {
            commands.push(make_bucket(bucket));
            commands.push(cmd(vec![
                "-m".into(),
                "cp".into(),
                "-L".into(),
                upload_log.clone(),
                "-r".into(),
                bag.container_dir(container).join("*").display().to_string(),
                format!("gs://{}", bucket),
            ]));
        }
        if !metadata.is_empty() {
            let meta_bucket = format!("metadata-{}", project);
            commands.push(make_bucket(&meta_bucket));
            for file in metadata {
                commands.push(cmd(vec![
                    "-m".into(),
                    "cp".into(),
                    file.display().to_string(),
                    format!("gs://{}", meta_bucket),
                ]));
            }
        }
        Some(Self {
            workdir: bag.root().to_path_buf(),
            commands,
        })
    }

    pub fn commands(&self) -> &[ShipCommand] {
        &self.commands
    }

    pub fn run(&self) -> ShipReport {
        let mut report = ShipReport::default();
        for c in &self.commands {
            debug!(">>> % {}", c);
            report.ran += 1;
            if let Err(why) = run_one(c, &self.workdir) {
                error!("upload command failed ({}): {}", why, c);
                report.failures.push((c.to_string(), why));
            }
        }
        info!(ran = report.ran, failed = report.failures.len(), "upload finished");
        report
    }
}

fn run_one(c: &ShipCommand, workdir: &Path) -> Result<(), String> {
    let status = Command::new(&c.program)
        .args(&c.args)
        .envs(c.env.iter().map(|(k, v)| (k, v)))
        .current_dir(workdir)
        .status()
        .map_err(|e| format!("spawn {}: {}", c.program, e))?;
    if status.success() {
        Ok(())
    } else {
        Err(match status.code() {
            Some(code) => format!("exit status {}", code),
            None => "terminated by signal".to_string(),
        })
    }
}
