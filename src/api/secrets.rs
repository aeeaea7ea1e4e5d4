//! Namespaced get/set access to the KV engine.
//!
//! Keys are relative paths such as `plugins/git/token`. They are normalized
//! and confined below the namespace, so `secret/plugins/x` and
//! `lyndrix/plugins/x` both address `<mount>/lyndrix/plugins/x`.

use std::sync::Arc;

use tracing::debug;
use tracing::warn;

use crate::application::loops::vault_loop::VaultCoordinator;
use crate::application::vault_client::VaultAdmin;
use crate::application::vault_client::VaultError;

/// field read and written when the caller names none
pub const DEFAULT_SECRET_FIELD: &str = "value";

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[non_exhaustive]
pub enum GatewayError {
    #[error("secret store is not connected")]
    NotConnected,

    #[error("invalid secret key {0:?}")]
    InvalidKey(String),

    #[error(transparent)]
    Backend(#[from] VaultError),
}

/// Characters a key segment may contain. Anything a URL could reinterpret
/// such as `%`, `?`, `#` or a backslash is refused.
fn is_key_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | '@' | '+' | '=' | ':' | ',' | '~')
}

/// Confine `key` below `namespace` on `mount`.
///
/// Returns the path relative to the mount, e.g. `lyndrix/plugins/git`.
pub fn normalize_secret_path(
    mount: &str,
    namespace: &str,
    key: &str,
) -> Result<String, GatewayError> {
    let invalid = || GatewayError::InvalidKey(key.to_string());

    let mut segments: Vec<&str> = key
        .trim()
        .split('/')
        .map(str::trim)
        .filter(|segment| !segment.is_empty())
        .collect();

    if segments
        .iter()
        .any(|s| *s == "." || *s == ".." || !s.chars().all(is_key_char))
    {
        return Err(invalid());
    }

    let mount = mount.trim_matches('/');
    if segments.len() > 1 && segments[0] == mount {
        segments.remove(0);
    }
    if segments.first() != Some(&namespace) {
        segments.insert(0, namespace);
    }

    // the namespace alone is not a secret
    if segments.len() < 2 {
        return Err(invalid());
    }

    Ok(segments.join("/"))
}

/// The narrow facade through which the rest of the system reads and writes
/// secrets.
#[derive(Debug, Clone)]
pub struct SecretGateway {
    coordinator: VaultCoordinator,
    namespace: String,
}

impl SecretGateway {
    pub fn new(coordinator: &VaultCoordinator, namespace: impl Into<String>) -> Self {
        Self {
            coordinator: coordinator.clone(),
            namespace: namespace.into(),
        }
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn namespaced_path(&self, key: &str) -> Result<String, GatewayError> {
        normalize_secret_path(self.coordinator.kv_mount(), &self.namespace, key)
    }

    /// `None` if the store is not connected, the secret does not exist or the
    /// read failed.
    pub async fn get(&self, key: &str) -> Option<String> {
        self.get_field(key, DEFAULT_SECRET_FIELD).await
    }

    pub async fn get_field(&self, key: &str, field: &str) -> Option<String> {
        let admin = self.connected_admin().await.ok()?;
        let path = match self.namespaced_path(key) {
            Ok(path) => path,
            Err(e) => {
                warn!("{e}");
                return None;
            }
        };

        match admin
            .read_secret(self.coordinator.kv_mount(), &path, field)
            .await
        {
            Ok(value) => Some(value),
            Err(VaultError::PathNotFound) => {
                debug!("no secret at {path}");
                None
            }
            Err(e) => {
                warn!("could not read secret {path}: {e}");
                None
            }
        }
    }

    pub async fn set(&self, key: &str, value: &str) -> Result<(), GatewayError> {
        self.set_field(key, DEFAULT_SECRET_FIELD, value).await
    }

    /// Write `value`, trimmed, to `field` of the secret at `key`.
    pub async fn set_field(&self, key: &str, field: &str, value: &str) -> Result<(), GatewayError> {
        let admin = self.connected_admin().await?;
        let path = self.namespaced_path(key)?;

        admin
            .write_secret(self.coordinator.kv_mount(), &path, field, value.trim())
            .await
            .inspect_err(|e| warn!("could not write secret {path}: {e}"))?;

        debug!("secret {path} written");
        Ok(())
    }

    async fn connected_admin(&self) -> Result<Arc<dyn VaultAdmin>, GatewayError> {
        if !self.coordinator.is_connected().await {
            debug!("secret store not connected, refusing access");
            return Err(GatewayError::NotConnected);
        }
        Ok(self.coordinator.admin())
    }
}
