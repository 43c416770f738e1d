//! Identity v2 password authentication, reduced to what the object store needs.

use crate::config::Credentials;
use crate::error::StoreError;
use reqwest::blocking::Client;
use serde::Deserialize;
use serde_json::json;
use tracing::debug;

/// A scoped token plus the object-store endpoint it is valid for.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Session {
    pub token: String,
    pub storage_url: String,
    pub tenant_name: String,
}

impl Session {
    /// Account identifier: the storage URL path component after `/v1/`.
    pub fn account_id(&self) -> Option<&str> {
        let idx = self.storage_url.find("/v1/")?;
        let id = self.storage_url[idx + 4..].trim_end_matches('/');
        (!id.is_empty()).then_some(id)
    }
}

#[derive(Deserialize)]
struct AuthResponse {
    access: Access,
}

#[derive(Deserialize)]
struct Access {
    token: Token,
    #[serde(rename = "serviceCatalog", default)]
    service_catalog: Vec<Service>,
}

#[derive(Deserialize)]
struct Token {
    id: String,
    tenant: Option<Tenant>,
}

#[derive(Deserialize)]
struct Tenant {
    name: String,
}

#[derive(Deserialize)]
struct Service {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    endpoints: Vec<Endpoint>,
}

#[derive(Deserialize)]
struct Endpoint {
    #[serde(rename = "publicURL")]
    public_url: Option<String>,
}

pub fn authenticate(
    client: &Client,
    auth_url: &str,
    creds: &Credentials,
) -> Result<Session, StoreError> {
    let url = format!("{}/tokens", auth_url.trim_end_matches('/'));
    debug!(%url, username = %creds.username, tenant = %creds.tenant, "requesting token");
    let body = json!({
        "auth": {
            "passwordCredentials": { "username": creds.username, "password": creds.password },
            "tenantName": creds.tenant,
        }
    });
    let resp = client
        .post(&url)
        .json(&body)
        .send()
        .map_err(|e| StoreError::Auth(format!("POST {url}: {e}")))?;
    let status = resp.status();
    if !status.is_success() {
        return Err(StoreError::Auth(format!("POST {url}: {status}")));
    }
    let text = resp.text().map_err(|e| StoreError::Auth(e.to_string()))?;
    parse_access(&text, &creds.tenant)
}

/// Pull the token and public object-store endpoint out of an identity response.
pub fn parse_access(body: &str, requested_tenant: &str) -> Result<Session, StoreError> {
    let resp: AuthResponse = match serde_json::from_str(body) {
        Ok(r) => r,
        Err(e) => return Err(StoreError::Auth(format!("bad identity response: {e}"))),
    };
    let storage_url = resp
        .access
        .service_catalog
        .iter()
        .filter(|s| s.kind == "object-store")
        .flat_map(|s| s.endpoints.iter())
        .find_map(|e| e.public_url.clone())
        .ok_or_else(|| StoreError::Auth("no object-store endpoint".to_string()))?;
    let tenant_name = resp
        .access
        .token
        .tenant
        .map(|t| t.name)
        .unwrap_or_else(|| requested_tenant.to_string());
    Ok(Session {
        token: resp.access.token.id,
        storage_url,
        tenant_name,
    })
}
