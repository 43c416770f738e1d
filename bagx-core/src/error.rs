//! Typed errors at the boundaries of the pipeline.

use thiserror::Error;

/// Failures reported by an [`ObjectStore`](crate::store::ObjectStore).
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("object not found: {container}/{name}")]
    NotFound { container: String, name: String },

    #[error("storage request failed: {status} {reason}")]
    Http { status: u16, reason: String },

    #[error("storage transport error: {0}")]
    Transport(String),

    /// Identity service refused or returned an unusable response.
    #[error("authentication failed: {0}")]
    Auth(String),

    #[error("unexpected storage response: {0}")]
    Decode(String),
}

impl From<reqwest::Error> for StoreError {
    fn from(err: reqwest::Error) -> Self {
        match err.status() {
            Some(status) => StoreError::Http {
                status: status.as_u16(),
                reason: status.canonical_reason().unwrap_or("").to_string(),
            },
            None => StoreError::Transport(err.to_string()),
        }
    }
}

/// A manifest line that does not follow `checksum<TAB>data/<container>/<name>`.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ManifestError {
    #[error("manifest line {line}: missing tab separator")]
    MissingTab { line: usize },

    #[error("manifest line {line}: invalid checksum {value:?}")]
    BadChecksum { line: usize, value: String },

    #[error("manifest line {line}: path {path:?} is not of the form data/<container>/<name>")]
    BadPath { line: usize, path: String },
}

/// Problems found before any network activity starts.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("cannot read config file {path}: {source}")]
    Read { path: String, source: std::io::Error },

    #[error("cannot parse config file {path}: {message}")]
    Parse { path: String, message: String },

    #[error("missing required setting {0}")]
    Missing(&'static str),

    #[error("downloads ({downloads}) and uploads ({uploads}) differ in length")]
    ListLengthMismatch { downloads: usize, uploads: usize },

    #[error("invalid setting {key}: {message}")]
    Invalid { key: &'static str, message: String },
}
