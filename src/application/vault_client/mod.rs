//! Admin client for a Vault-compatible secret backend.
//!
//! [VaultAdmin] is the seam between the lifecycle coordinator and the
//! network. [HttpVaultAdmin] speaks the Vault HTTP API; tests substitute an
//! in-memory backend.

mod error;
mod http;

use async_trait::async_trait;
pub use error::VaultError;
pub use http::HttpVaultAdmin;

use crate::state::vault::encryption::VaultCredentials;

/// operations the coordinator and gateway need from the backend
///
/// The client holds at most one token at a time. Every operation except the
/// `sys/init`, `sys/seal-status` and `sys/unseal` family requires one.
#[async_trait]
pub trait VaultAdmin: Send + Sync + 'static {
    /// `Ok(false)` for a reachable but never initialized backend
    async fn is_initialized(&self) -> Result<bool, VaultError>;

    async fn is_sealed(&self) -> Result<bool, VaultError>;

    /// initialize with Shamir `shares`/`threshold`
    ///
    /// Fails with [VaultError::AlreadyInitialized] if some other party won
    /// the race.
    async fn initialize(&self, shares: u8, threshold: u8) -> Result<VaultCredentials, VaultError>;

    /// returns the number of shares still needed, 0 once unsealed
    async fn submit_unseal_key(&self, key: &str) -> Result<u32, VaultError>;

    /// use `token` for all following authenticated requests
    fn authenticate_with_token(&self, token: &str);

    fn clear_token(&self);

    /// `Ok(false)` if there is no token or the backend rejects it
    async fn is_authenticated(&self) -> Result<bool, VaultError> {
        match self.lookup_self().await {
            Ok(()) => Ok(true),
            Err(VaultError::Unauthenticated) => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// token self-lookup; the watchdog's authenticated liveness check
    async fn lookup_self(&self) -> Result<(), VaultError>;

    /// mount a KV version 2 engine at `mount` unless something is mounted there
    async fn ensure_kv_engine_mounted(&self, mount: &str) -> Result<(), VaultError>;

    /// enable an auth method at its default path unless already enabled
    async fn enable_auth_method(&self, method: &str) -> Result<(), VaultError>;

    async fn create_or_update_policy(&self, name: &str, rules: &str) -> Result<(), VaultError>;

    async fn create_or_update_userpass_user(
        &self,
        username: &str,
        password: &str,
        policy: &str,
    ) -> Result<(), VaultError>;

    /// read one field of a KV v2 secret; a missing field is `PathNotFound`
    async fn read_secret(&self, mount: &str, path: &str, key: &str) -> Result<String, VaultError>;

    /// write one field of a KV v2 secret, creating a new version
    async fn write_secret(
        &self,
        mount: &str,
        path: &str,
        key: &str,
        value: &str,
    ) -> Result<(), VaultError>;
}
