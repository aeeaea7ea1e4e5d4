use std::fmt;
use std::sync::RwLock;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use reqwest::Method;
use reqwest::Response;
use reqwest::StatusCode;
use reqwest::Url;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::json;
use serde_json::Value;
use tracing::debug;
use zeroize::Zeroizing;

use super::VaultAdmin;
use super::VaultError;
use crate::state::vault::encryption::VaultCredentials;

/// Vault HTTP API client
pub struct HttpVaultAdmin {
    base_url: String,
    base: Url,
    client: Client,
    token: RwLock<Option<Zeroizing<String>>>,
}

impl fmt::Debug for HttpVaultAdmin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpVaultAdmin")
            .field("base_url", &self.base_url)
            .field("authenticated", &self.current_token().is_some())
            .finish()
    }
}

impl HttpVaultAdmin {
    /// `base_url` is the server root, e.g. `http://127.0.0.1:8200`
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, VaultError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| VaultError::InvalidRequest(format!("failed to build HTTP client: {e}")))?;

        let base_url = base_url.into().trim_end_matches('/').to_string();
        let base = Url::parse(&base_url)
            .map_err(|e| VaultError::InvalidRequest(format!("invalid backend url {base_url}: {e}")))?;
        if base.cannot_be_a_base() {
            return Err(VaultError::InvalidRequest(format!(
                "backend url {base_url} cannot carry a path"
            )));
        }

        Ok(Self {
            base_url,
            base,
            client,
            token: RwLock::new(None),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn current_token(&self) -> Option<Zeroizing<String>> {
        self.token
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    fn set_token(&self, token: Option<Zeroizing<String>>) {
        *self
            .token
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = token;
    }

    /// API url for `path`. Every segment is percent-encoded on its own, so
    /// no part of `path` can climb out of the segment it sits in.
    fn url(&self, path: &str) -> Url {
        let mut url = self.base.clone();
        if let Ok(mut segments) = url.path_segments_mut() {
            segments
                .pop_if_empty()
                .push("v1")
                .extend(path.split('/').filter(|segment| !segment.is_empty()));
        }
        url
    }

    /// unauthenticated request to a `sys/` endpoint
    async fn sys_request(
        &self,
        method: Method,
        path: &str,
        body: Option<Value>,
    ) -> Result<Response, VaultError> {
        self.send(method, path, body, None).await
    }

    /// request carrying the current token; fails fast without one
    async fn request(
        &self,
        method: Method,
        path: &str,
        body: Option<Value>,
    ) -> Result<Response, VaultError> {
        let token = self.current_token().ok_or(VaultError::Unauthenticated)?;
        self.send(method, path, body, Some(token)).await
    }

    async fn send(
        &self,
        method: Method,
        path: &str,
        body: Option<Value>,
        token: Option<Zeroizing<String>>,
    ) -> Result<Response, VaultError> {
        debug!("vault request: {} {}", method, path);

        let mut builder = self.client.request(method, self.url(path));
        if let Some(token) = token {
            builder = builder.header("X-Vault-Token", token.as_str());
        }
        if let Some(payload) = body {
            builder = builder.json(&payload);
        }

        let response = builder
            .send()
            .await
            .map_err(|e| VaultError::Unreachable(format!("vault request failed: {e}")))?;

        check_status(response).await
    }

    async fn list_mount_paths(&self, path: &str) -> Result<Vec<String>, VaultError> {
        let listing: Value = decode(self.request(Method::GET, path, None).await?).await?;

        // newer servers nest the table under "data", older ones only inline it
        let table = listing
            .get("data")
            .and_then(Value::as_object)
            .or_else(|| listing.as_object());

        Ok(table
            .map(|t| t.keys().cloned().collect())
            .unwrap_or_default())
    }
}

/// maps a non-success status onto [VaultError]
async fn check_status(response: Response) -> Result<Response, VaultError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    let detail = serde_json::from_str::<ErrorResponse>(&body)
        .map(|e| e.errors.join("; "))
        .unwrap_or(body);

    Err(match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => VaultError::Unauthenticated,
        StatusCode::NOT_FOUND => VaultError::PathNotFound,
        s if s.is_server_error() => VaultError::Unreachable(format!("{s}: {detail}")),
        s if detail.contains("already initialized") => {
            debug!("{s}: {detail}");
            VaultError::AlreadyInitialized
        }
        s => VaultError::InvalidRequest(format!("{s}: {detail}")),
    })
}

async fn decode<T: DeserializeOwned>(response: Response) -> Result<T, VaultError> {
    response
        .json::<T>()
        .await
        .map_err(|e| VaultError::InvalidRequest(format!("undecodable response: {e}")))
}

/// "path is already in use" means a previous run already did the work
fn tolerate_existing(result: Result<Response, VaultError>) -> Result<(), VaultError> {
    match result {
        Ok(_) => Ok(()),
        Err(VaultError::InvalidRequest(detail)) if detail.contains("already in use") => Ok(()),
        Err(e) => Err(e),
    }
}

#[derive(Deserialize)]
struct ErrorResponse {
    errors: Vec<String>,
}

#[derive(Deserialize)]
struct InitStatusResponse {
    initialized: bool,
}

#[derive(Deserialize)]
struct SealStatusResponse {
    sealed: bool,
    #[serde(default)]
    t: u32,
    #[serde(default)]
    progress: u32,
}

#[derive(Deserialize)]
struct InitResponse {
    keys: Vec<String>,
    root_token: String,
}

#[derive(Deserialize)]
struct KvReadResponse {
    data: KvReadData,
}

#[derive(Deserialize)]
struct KvReadData {
    data: Option<serde_json::Map<String, Value>>,
}

#[async_trait]
impl VaultAdmin for HttpVaultAdmin {
    async fn is_initialized(&self) -> Result<bool, VaultError> {
        let status: InitStatusResponse =
            decode(self.sys_request(Method::GET, "sys/init", None).await?).await?;
        Ok(status.initialized)
    }

    async fn is_sealed(&self) -> Result<bool, VaultError> {
        let status: SealStatusResponse =
            decode(self.sys_request(Method::GET, "sys/seal-status", None).await?).await?;
        Ok(status.sealed)
    }

    async fn initialize(&self, shares: u8, threshold: u8) -> Result<VaultCredentials, VaultError> {
        if self.is_initialized().await? {
            return Err(VaultError::AlreadyInitialized);
        }

        let body = json!({
            "secret_shares": shares,
            "secret_threshold": threshold,
        });
        let init: InitResponse =
            decode(self.sys_request(Method::PUT, "sys/init", Some(body)).await?).await?;

        Ok(VaultCredentials::new(init.root_token, init.keys))
    }

    async fn submit_unseal_key(&self, key: &str) -> Result<u32, VaultError> {
        let body = json!({ "key": key });
        let status: SealStatusResponse =
            decode(self.sys_request(Method::PUT, "sys/unseal", Some(body)).await?).await?;

        if !status.sealed {
            return Ok(0);
        }
        Ok(status.t.saturating_sub(status.progress))
    }

    fn authenticate_with_token(&self, token: &str) {
        self.set_token(Some(Zeroizing::new(token.to_string())));
    }

    fn clear_token(&self) {
        self.set_token(None);
    }

    async fn lookup_self(&self) -> Result<(), VaultError> {
        self.request(Method::GET, "auth/token/lookup-self", None)
            .await
            .map(|_| ())
    }

    async fn ensure_kv_engine_mounted(&self, mount: &str) -> Result<(), VaultError> {
        let mount = mount.trim_matches('/');
        let mounted = self.list_mount_paths("sys/mounts").await?;
        if mounted.iter().any(|m| m.trim_end_matches('/') == mount) {
            debug!("kv engine already mounted at {mount}/");
            return Ok(());
        }

        let body = json!({ "type": "kv", "options": { "version": "2" } });
        tolerate_existing(
            self.request(Method::POST, &format!("sys/mounts/{mount}"), Some(body))
                .await,
        )
    }

    async fn enable_auth_method(&self, method: &str) -> Result<(), VaultError> {
        let enabled = self.list_mount_paths("sys/auth").await?;
        if enabled.iter().any(|m| m.trim_end_matches('/') == method) {
            return Ok(());
        }

        let body = json!({ "type": method });
        tolerate_existing(
            self.request(Method::POST, &format!("sys/auth/{method}"), Some(body))
                .await,
        )
    }

    async fn create_or_update_policy(&self, name: &str, rules: &str) -> Result<(), VaultError> {
        let body = json!({ "policy": rules });
        self.request(Method::PUT, &format!("sys/policies/acl/{name}"), Some(body))
            .await
            .map(|_| ())
    }

    async fn create_or_update_userpass_user(
        &self,
        username: &str,
        password: &str,
        policy: &str,
    ) -> Result<(), VaultError> {
        let body = json!({ "password": password, "token_policies": policy });
        self.request(
            Method::POST,
            &format!("auth/userpass/users/{username}"),
            Some(body),
        )
        .await
        .map(|_| ())
    }

    async fn read_secret(&self, mount: &str, path: &str, key: &str) -> Result<String, VaultError> {
        let response = self
            .request(Method::GET, &format!("{mount}/data/{path}"), None)
            .await?;
        let secret: KvReadResponse = decode(response).await?;

        // deleted versions come back with "data": null
        let value = secret
            .data
            .data
            .and_then(|mut fields| fields.remove(key))
            .ok_or(VaultError::PathNotFound)?;

        Ok(match value {
            Value::String(s) => s,
            other => other.to_string(),
        })
    }

    async fn write_secret(
        &self,
        mount: &str,
        path: &str,
        key: &str,
        value: &str,
    ) -> Result<(), VaultError> {
        let body = json!({ "data": { key: value } });
        self.request(Method::POST, &format!("{mount}/data/{path}"), Some(body))
            .await
            .map(|_| ())
    }
}
