//! [`ObjectStore`] backed by an OpenStack Swift endpoint.

use crate::config::Credentials;
use crate::digest::{file_md5_hex, Md5Writer};
use crate::error::StoreError;
use crate::keystone::{self, Session};
use crate::path_safety::resolve_under;
use crate::store::{AccountInfo, BulkDownload, ObjectDescriptor, ObjectStore, TransferResult};
use rayon::prelude::*;
use reqwest::blocking::{Client, RequestBuilder, Response};
use reqwest::header::HeaderMap;
use serde::Deserialize;
use std::fs::File;
use std::io::BufWriter;
use std::time::Duration;
use tracing::debug;

#[derive(Clone, Copy, Debug)]
pub struct SwiftOptions {
    pub download_threads: usize,
    pub timeout: Duration,
}

impl Default for SwiftOptions {
    fn default() -> Self {
        Self {
            download_threads: 10,
            timeout: Duration::from_secs(300),
        }
    }
}

pub struct SwiftStore {
    client: Client,
    session: Session,
    pool: rayon::ThreadPool,
}

#[derive(Deserialize)]
struct ListedObject {
    name: String,
    #[serde(default)]
    bytes: u64,
    #[serde(default)]
    hash: String,
}

#[derive(Deserialize)]
struct ListedContainer {
    name: String,
}

impl SwiftStore {
    /// Authenticate and bind to the account's object-store endpoint.
    pub fn connect(
        auth_url: &str,
        creds: &Credentials,
        opts: SwiftOptions,
    ) -> Result<Self, StoreError> {
        let client = Client::builder()
            .timeout(opts.timeout)
            .build()
            .map_err(|e| StoreError::Transport(e.to_string()))?;
        let session = keystone::authenticate(&client, auth_url, creds)?;
        debug!(storage_url = %session.storage_url, tenant = %session.tenant_name, "authenticated");
        Self::with_session(client, session, opts)
    }

    pub fn with_session(
        client: Client,
        session: Session,
        opts: SwiftOptions,
    ) -> Result<Self, StoreError> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(opts.download_threads.max(1))
            .build()
            .map_err(|e| StoreError::Transport(e.to_string()))?;
        Ok(Self {
            client,
            session,
            pool,
        })
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    fn get(&self, url: &str) -> RequestBuilder {
        self.client
            .get(url)
            .header("X-Auth-Token", &self.session.token)
    }

    /// Page through a JSON listing until an empty page comes back.
    fn list_paged<T, F>(
        &self,
        url: &str,
        prefix: Option<&str>,
        name_of: F,
    ) -> Result<Vec<T>, StoreError>
    where
        T: for<'de> Deserialize<'de>,
        F: Fn(&T) -> &str,
    {
        let mut out: Vec<T> = Vec::new();
        let mut marker = String::new();
        loop {
            let resp = {
                let mut query = vec![("format", "json"), ("marker", marker.as_str())];
                if let Some(p) = prefix {
                    query.push(("prefix", p));
                }
                checked(self.get(url).query(&query).send()?)?
            };
            if resp.status().as_u16() == 204 {
                break;
            }
            let page: Vec<T> = resp.json().map_err(|e| StoreError::Decode(e.to_string()))?;
            let Some(last) = page.last() else { break };
            marker = name_of(last).to_string();
            out.extend(page);
        }
        Ok(out)
    }

    fn download_one(&self, req: &BulkDownload, name: &str) -> TransferResult {
        let dest = match resolve_under(&req.out_dir, name) {
            Ok(p) => p,
            Err(e) => return TransferResult::errored(name, format!("{e:#}")),
        };
        if dest.is_dir() {
            return TransferResult::errored(name, format!("{:?} is a directory", dest));
        }
        let url = object_url(&self.session.storage_url, &req.container, name);
        let mut rb = self.get(&url);
        if req.skip_identical && dest.is_file() {
            if let Ok(local) = file_md5_hex(&dest) {
                rb = rb.header("If-None-Match", local);
            }
        }
        let mut resp = match rb.send() {
            Ok(r) => r,
            Err(e) => return TransferResult::errored(name, e.to_string()),
        };
        let status = resp.status();
        if status.as_u16() == 304 {
            return TransferResult::rejected(name, 304, "Not Modified");
        }
        if !status.is_success() {
            let reason = status.canonical_reason().unwrap_or("");
            return TransferResult::rejected(name, status.as_u16(), reason);
        }
        if let Some(parent) = dest.parent() {
            if let Err(e) = std::fs::create_dir_all(parent) {
                return TransferResult::errored(name, format!("create {:?}: {e}", parent));
            }
        }
        let file = match File::create(&dest) {
            Ok(f) => f,
            Err(e) => return TransferResult::errored(name, format!("create {:?}: {e}", dest)),
        };
        let mut w = Md5Writer::new(BufWriter::new(file));
        if let Err(e) = resp.copy_to(&mut w) {
            return TransferResult::errored(name, format!("read body: {e}"));
        }
        let got = match w.finish() {
            Ok((_, md5)) => md5,
            Err(e) => return TransferResult::errored(name, format!("write {:?}: {e}", dest)),
        };
        if let Some(etag) = plain_etag(resp.headers()) {
            if etag != got {
                return TransferResult::errored(name, format!("md5sum != etag, {got} != {etag}"));
            }
        }
        TransferResult::ok(name, status.as_u16())
    }
}

impl ObjectStore for SwiftStore {
    fn account_info(&self) -> Result<AccountInfo, StoreError> {
        let resp = checked(
            self.client
                .head(&self.session.storage_url)
                .header("X-Auth-Token", &self.session.token)
                .send()?,
        )?;
        let h = resp.headers();
        Ok(AccountInfo {
            container_count: header_u64(h, "x-account-container-count"),
            object_count: header_u64(h, "x-account-object-count"),
            bytes_used: header_u64(h, "x-account-bytes-used"),
        })
    }

    fn list_containers(&self) -> Result<Vec<String>, StoreError> {
        let url = &self.session.storage_url;
        let listed: Vec<ListedContainer> =
            self.list_paged(url, None, |c: &ListedContainer| &c.name)?;
        Ok(listed.into_iter().map(|c| c.name).collect())
    }

    fn list_objects(
        &self,
        container: &str,
        prefix: Option<&str>,
    ) -> Result<Vec<ObjectDescriptor>, StoreError> {
        let url = container_url(&self.session.storage_url, container);
        let listed: Vec<ListedObject> =
            self.list_paged(&url, prefix, |o: &ListedObject| &o.name)?;
        Ok(listed
            .into_iter()
            .map(|o| ObjectDescriptor {
                name: o.name,
                size_bytes: o.bytes,
                checksum: o.hash,
            })
            .collect())
    }

    fn get_object(&self, container: &str, name: &str) -> Result<Vec<u8>, StoreError> {
        let url = object_url(&self.session.storage_url, container, name);
        let resp = self.get(&url).send()?;
        if resp.status().as_u16() == 404 {
            return Err(StoreError::NotFound {
                container: container.to_string(),
                name: name.to_string(),
            });
        }
        let bytes = checked(resp)?.bytes()?;
        Ok(bytes.to_vec())
    }

    fn bulk_download(&self, req: &BulkDownload) -> Result<Vec<TransferResult>, StoreError> {
        let results: Vec<TransferResult> = self.pool.install(|| {
            req.objects
                .par_iter()
                .map(|n| self.download_one(req, n))
                .collect()
        });
        Ok(results)
    }
}

fn checked(resp: Response) -> Result<Response, StoreError> {
    let status = resp.status();
    if status.is_success() {
        Ok(resp)
    } else {
        Err(StoreError::Http {
            status: status.as_u16(),
            reason: status.canonical_reason().unwrap_or("").to_string(),
        })
    }
}

fn header_u64(h: &HeaderMap, key: &str) -> u64 {
    h.get(key)
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.parse().ok())
        .unwrap_or(0)
}

/// ETag of a plain object. Large-object manifests report an ETag that is not
/// the MD5 of the assembled body, so they yield `None`.
fn plain_etag(h: &HeaderMap) -> Option<String> {
    if h.contains_key("x-object-manifest") || h.contains_key("x-static-large-object") {
        return None;
    }
    let etag = h
        .get("etag")?
        .to_str()
        .ok()?
        .trim_matches('"')
        .to_ascii_lowercase();
    (!etag.is_empty()).then_some(etag)
}

fn encode_path(name: &str) -> String {
    name.split('/')
        .map(|s| urlencoding::encode(s).into_owned())
        .collect::<Vec<_>>()
        .join("/")
}

pub fn container_url(storage_url: &str, container: &str) -> String {
    let base = storage_url.trim_end_matches('/');
    format!("{}/{}", base, urlencoding::encode(container))
}

pub fn object_url(storage_url: &str, container: &str, name: &str) -> String {
    let base = container_url(storage_url, container);
    format!("{}/{}", base, encode_path(name))
}
