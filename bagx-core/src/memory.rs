//! In-process [`ObjectStore`] for tests and offline dry runs.

use crate::digest::{file_md5_hex, md5_hex};
use crate::error::StoreError;
use crate::path_safety::resolve_under;
use crate::store::{
    AccountInfo, BulkDownload, ObjectDescriptor, ObjectStore, ResponseInfo, TransferResult,
};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard};

#[derive(Clone, Debug)]
struct StoredObject {
    bytes: Vec<u8>,
    reported_hash: String,
}

#[derive(Clone, Debug)]
enum Injected {
    Response(ResponseInfo),
    Error(String),
}

/// Containers and objects kept in sorted maps, so listings come back in
/// name order like a real store.
#[derive(Default)]
pub struct MemoryStore {
    containers: Mutex<BTreeMap<String, BTreeMap<String, StoredObject>>>,
    injected: Mutex<HashMap<(String, String), Injected>>,
    bulk_calls: Mutex<Vec<usize>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn create_container(&self, container: &str) {
        let mut c = locked(&self.containers);
        c.entry(container.to_string()).or_default();
    }

    /// Store an object; the reported checksum is its real MD5.
    pub fn put(&self, container: &str, name: &str, bytes: &[u8]) {
        self.put_with_hash(container, name, bytes, &md5_hex(bytes));
    }

    /// Store an object that reports an arbitrary checksum in listings.
    pub fn put_with_hash(&self, container: &str, name: &str, bytes: &[u8], hash: &str) {
        let mut c = locked(&self.containers);
        let objects = c.entry(container.to_string()).or_default();
        let obj = StoredObject {
            bytes: bytes.to_vec(),
            reported_hash: hash.to_string(),
        };
        objects.insert(name.to_string(), obj);
    }

    /// Make every download of this object fail with the given status line.
    pub fn fail_object(&self, container: &str, name: &str, status: u16, reason: Option<&str>) {
        let resp = ResponseInfo {
            status,
            reason: reason.map(str::to_string),
        };
        self.inject(container, name, Injected::Response(resp));
    }

    /// Make every download of this object fail without a response.
    pub fn break_object(&self, container: &str, name: &str, message: &str) {
        let what = Injected::Error(message.to_string());
        self.inject(container, name, what);
    }

    fn inject(&self, container: &str, name: &str, what: Injected) {
        let mut inj = locked(&self.injected);
        inj.insert((container.to_string(), name.to_string()), what);
    }

    /// Batch sizes of every `bulk_download` call so far, in call order.
    pub fn bulk_calls(&self) -> Vec<usize> {
        locked(&self.bulk_calls).clone()
    }

    fn transfer_one(
        &self,
        req: &BulkDownload,
        name: &str,
        objects: Option<&BTreeMap<String, StoredObject>>,
    ) -> TransferResult {
        let injected = {
            let inj = locked(&self.injected);
            inj.get(&(req.container.clone(), name.to_string())).cloned()
        };
        match injected {
            Some(Injected::Response(resp)) => {
                return TransferResult {
                    object: name.to_string(),
                    success: false,
                    response: Some(resp),
                    error: Some("injected failure".to_string()),
                }
            }
            Some(Injected::Error(msg)) => return TransferResult::errored(name, msg),
            None => {}
        }
        let Some(obj) = objects.and_then(|m| m.get(name)) else {
            return TransferResult::rejected(name, 404, "Not Found");
        };
        let dest = match resolve_under(&req.out_dir, name) {
            Ok(p) => p,
            Err(e) => return TransferResult::errored(name, format!("{e:#}")),
        };
        if dest.is_dir() {
            return TransferResult::errored(name, format!("{:?} is a directory", dest));
        }
        if req.skip_identical && dest.is_file() {
            if let Ok(local) = file_md5_hex(&dest) {
                if local == md5_hex(&obj.bytes) {
                    return TransferResult::rejected(name, 304, "Not Modified");
                }
            }
        }
        if let Some(parent) = dest.parent() {
            if let Err(e) = std::fs::create_dir_all(parent) {
                return TransferResult::errored(name, e.to_string());
            }
        }
        match std::fs::write(&dest, &obj.bytes) {
            Ok(()) => TransferResult::ok(name, 200),
            Err(e) => TransferResult::errored(name, e.to_string()),
        }
    }
}

impl ObjectStore for MemoryStore {
    fn account_info(&self) -> Result<AccountInfo, StoreError> {
        let c = locked(&self.containers);
        let mut info = AccountInfo {
            container_count: c.len() as u64,
            ..Default::default()
        };
        for objs in c.values() {
            info.object_count += objs.len() as u64;
            for o in objs.values() {
                info.bytes_used += o.bytes.len() as u64;
            }
        }
        Ok(info)
    }

    fn list_containers(&self) -> Result<Vec<String>, StoreError> {
        let c = locked(&self.containers);
        Ok(c.keys().cloned().collect())
    }

    fn list_objects(
        &self,
        container: &str,
        prefix: Option<&str>,
    ) -> Result<Vec<ObjectDescriptor>, StoreError> {
        let c = locked(&self.containers);
        let objs = c.get(container).ok_or_else(|| StoreError::Http {
            status: 404,
            reason: "Not Found".to_string(),
        })?;
        Ok(objs
            .iter()
            .filter(|(name, _)| prefix.map_or(true, |p| name.starts_with(p)))
            .map(|(name, o)| ObjectDescriptor {
                name: name.clone(),
                size_bytes: o.bytes.len() as u64,
                checksum: o.reported_hash.clone(),
            })
            .collect())
    }

    fn get_object(&self, container: &str, name: &str) -> Result<Vec<u8>, StoreError> {
        let c = locked(&self.containers);
        c.get(container)
            .and_then(|objs| objs.get(name))
            .map(|o| o.bytes.clone())
            .ok_or_else(|| StoreError::NotFound {
                container: container.to_string(),
                name: name.to_string(),
            })
    }

    fn bulk_download(&self, req: &BulkDownload) -> Result<Vec<TransferResult>, StoreError> {
        locked(&self.bulk_calls).push(req.objects.len());
        let snapshot = {
            let c = locked(&self.containers);
            c.get(&req.container).cloned()
        };
        let objects = snapshot.as_ref();
        Ok(req
            .objects
            .iter()
            .map(|name| self.transfer_one(req, name, objects))
            .collect())
    }
}

fn locked<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|e| e.into_inner())
}
