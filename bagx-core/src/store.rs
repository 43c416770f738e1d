use crate::error::StoreError;
use std::path::PathBuf;

/// One row of a container listing.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ObjectDescriptor {
    pub name: String,
    pub size_bytes: u64,
    /// Checksum exactly as reported by the store (usually hex MD5).
    pub checksum: String,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct AccountInfo {
    pub container_count: u64,
    pub object_count: u64,
    pub bytes_used: u64,
}

/// Input of a bulk download: a batch of object names from one container.
#[derive(Clone, Debug)]
pub struct BulkDownload {
    pub container: String,
    pub objects: Vec<String>,
    /// Objects land at `out_dir/<name>`.
    pub out_dir: PathBuf,
    /// Skip objects whose local copy already has identical content.
    pub skip_identical: bool,
}

/// Status line of the HTTP-like response behind a transfer.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ResponseInfo {
    pub status: u16,
    pub reason: Option<String>,
}

/// Per-object result of a bulk download, in the collaborator's own shape.
/// See [`DownloadOutcome`](crate::download::DownloadOutcome) for the resolved form.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TransferResult {
    pub object: String,
    pub success: bool,
    pub response: Option<ResponseInfo>,
    pub error: Option<String>,
}

impl TransferResult {
    pub fn ok(object: &str, status: u16) -> Self {
        Self {
            object: object.to_string(),
            success: true,
            response: Some(ResponseInfo {
                status,
                reason: Some("OK".to_string()),
            }),
            error: None,
        }
    }

    pub fn rejected(object: &str, status: u16, reason: &str) -> Self {
        Self {
            object: object.to_string(),
            success: false,
            response: Some(ResponseInfo {
                status,
                reason: Some(reason.to_string()),
            }),
            error: Some(format!("{} {}", status, reason)),
        }
    }

    /// Failure without any response from the store.
    pub fn errored(object: &str, message: impl Into<String>) -> Self {
        Self {
            object: object.to_string(),
            success: false,
            response: None,
            error: Some(message.into()),
        }
    }
}

/// The remote object store. Calls block until complete; implementations may
/// parallelise internally but must return every result of a batch at once.
pub trait ObjectStore: Send + Sync {
    fn account_info(&self) -> Result<AccountInfo, StoreError>;

    fn list_containers(&self) -> Result<Vec<String>, StoreError>;

    /// Full listing in store order, transparently paged.
    fn list_objects(
        &self,
        container: &str,
        prefix: Option<&str>,
    ) -> Result<Vec<ObjectDescriptor>, StoreError>;

    fn get_object(&self, container: &str, name: &str) -> Result<Vec<u8>, StoreError>;

    /// One result per requested object, in request order.
    fn bulk_download(&self, req: &BulkDownload) -> Result<Vec<TransferResult>, StoreError>;
}
