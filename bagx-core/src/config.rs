use crate::classify::{SegmentFilter, ZeroLengthPolicy, DEFAULT_SEGMENT_PATTERN};
use crate::error::ConfigError;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Account login for the identity service.
#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub struct Credentials {
    pub tenant: String,
    pub username: String,
    pub password: String,
}

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub struct CustomerConfig {
    #[serde(flatten)]
    pub credentials: Credentials,
    pub auth_url: String,
    /// Containers to export; all containers when absent.
    pub downloads: Option<Vec<String>>,
    /// Destination bucket per entry of `downloads`.
    pub uploads: Option<Vec<String>>,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct UploadConfig {
    pub boto_file: Option<PathBuf>,
    pub project_id: Option<String>,
    pub storage_class: String,
    pub tool: String,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            boto_file: None,
            project_id: None,
            storage_class: "DRA".to_string(),
            tool: "gsutil".to_string(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ExportSettings {
    pub batch_size: usize,
    pub download_threads: usize,
    pub zero_length_policy: ZeroLengthPolicy,
    pub segment_pattern: String,
    pub log_settle_secs: u64,
    pub timeout_secs: u64,
}

impl Default for ExportSettings {
    fn default() -> Self {
        Self {
            batch_size: 1000,
            download_threads: 10,
            zero_length_policy: ZeroLengthPolicy::Folder,
            segment_pattern: DEFAULT_SEGMENT_PATTERN.to_string(),
            log_settle_secs: 30,
            timeout_secs: 300,
        }
    }
}

impl ExportSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub struct ExportConfig {
    pub customer: CustomerConfig,
    /// Administrative account holding the activity and audit logs.
    pub admin: Option<Credentials>,
    pub upload: UploadConfig,
    pub export: ExportSettings,
}

impl ExportConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml(&content).map_err(|e| match e {
            ConfigError::Parse { message, .. } => ConfigError::Parse {
                path: path.display().to_string(),
                message,
            },
            other => other,
        })
    }

    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        toml::from_str(content).map_err(|e| ConfigError::Parse {
            path: "<inline>".to_string(),
            message: e.to_string(),
        })
    }

    /// Check everything that must hold before touching the network.
    pub fn validate(&self, logs_enabled: bool) -> Result<(), ConfigError> {
        let c = &self.customer;
        require(&c.credentials.tenant, "customer.tenant")?;
        require(&c.credentials.username, "customer.username")?;
        require(&c.credentials.password, "customer.password")?;
        require(&c.auth_url, "customer.auth_url")?;
        if logs_enabled {
            let admin = self.admin.as_ref().ok_or(ConfigError::Missing("admin"))?;
            require(&admin.tenant, "admin.tenant")?;
            require(&admin.username, "admin.username")?;
            require(&admin.password, "admin.password")?;
        }
        let downloads = c.downloads.as_ref().map_or(0, Vec::len);
        let uploads = c.uploads.as_ref().map_or(0, Vec::len);
        if downloads != uploads || c.downloads.is_some() != c.uploads.is_some() {
            return Err(ConfigError::ListLengthMismatch { downloads, uploads });
        }
        if self.export.batch_size == 0 {
            return Err(ConfigError::Invalid {
                key: "export.batch_size",
                message: "must be at least 1".into(),
            });
        }
        SegmentFilter::new(&self.export.segment_pattern).map_err(|e| ConfigError::Invalid {
            key: "export.segment_pattern",
            message: format!("{e:#}"),
        })?;
        Ok(())
    }

    pub fn segment_filter(&self) -> anyhow::Result<SegmentFilter> {
        SegmentFilter::new(&self.export.segment_pattern)
    }
}

fn require(value: &str, key: &'static str) -> Result<(), ConfigError> {
    if value.trim().is_empty() {
        Err(ConfigError::Missing(key))
    } else {
        Ok(())
    }
}
