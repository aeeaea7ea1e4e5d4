//! An in-memory stand-in for a Vault server.
//!
//! [MockVaultBackend] is the "server": shared state plus the rules Vault
//! applies (sealed servers refuse everything but `sys/*`, tokens must match
//! the root token). [MockVault] is a client bound to one backend, holding its
//! own token just like [crate::application::vault_client::HttpVaultAdmin].
//! The same backend can also be served over HTTP, see
//! [super::fake_vault_server].

use std::collections::BTreeMap;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::MutexGuard;

use async_trait::async_trait;

use crate::application::vault_client::VaultAdmin;
use crate::application::vault_client::VaultError;
use crate::state::vault::encryption::VaultCredentials;

#[derive(Debug, Default)]
struct MockVaultState {
    online: bool,
    initialized: bool,
    sealed: bool,
    root_token: Option<String>,
    unseal_key: Option<String>,
    kv_mounts: BTreeSet<String>,
    auth_methods: BTreeSet<String>,
    policies: BTreeMap<String, String>,
    users: BTreeMap<String, String>,
    secrets: BTreeMap<(String, String), BTreeMap<String, String>>,
    init_calls: usize,
    unseal_calls: usize,
    lookup_calls: usize,
    generation: usize,
}

#[derive(Debug, Clone, Default)]
pub struct MockVaultBackend {
    state: Arc<Mutex<MockVaultState>>,
}

/// seal status as reported by `sys/seal-status` and `sys/unseal`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MockSealStatus {
    pub sealed: bool,
    pub threshold: u32,
    pub progress: u32,
}

impl MockVaultBackend {
    /// reachable, never initialized, sealed
    pub fn new() -> Self {
        let backend = Self::default();
        {
            let mut state = backend.lock();
            state.online = true;
            state.sealed = true;
        }
        backend
    }

    /// reachable, initialized and unsealed, accepting `root_token`
    pub fn unsealed_with_root_token(root_token: &str) -> Self {
        let backend = Self::new();
        {
            let mut state = backend.lock();
            state.initialized = true;
            state.sealed = false;
            state.root_token = Some(root_token.to_string());
            state.unseal_key = Some("mock-unseal-key".to_string());
        }
        backend
    }

    fn lock(&self) -> MutexGuard<'_, MockVaultState> {
        self.state.lock().unwrap()
    }

    /// a client holding no token
    pub fn client(&self) -> MockVault {
        MockVault {
            backend: self.clone(),
            token: Mutex::new(None),
        }
    }

    pub fn set_online(&self, online: bool) {
        self.lock().online = online;
    }

    /// seal the server, as an operator or a restart would
    pub fn seal(&self) {
        self.lock().sealed = true;
    }

    /// invalidate the current root token
    pub fn revoke_root_token(&self) {
        let mut state = self.lock();
        state.generation += 1;
        let generation = state.generation;
        state.root_token = Some(format!("revoked-{generation}"));
    }

    pub fn init_calls(&self) -> usize {
        self.lock().init_calls
    }

    pub fn unseal_calls(&self) -> usize {
        self.lock().unseal_calls
    }

    pub fn lookup_calls(&self) -> usize {
        self.lock().lookup_calls
    }

    pub fn is_sealed(&self) -> bool {
        self.lock().sealed
    }

    pub fn kv_mounts(&self) -> Vec<String> {
        self.lock().kv_mounts.iter().cloned().collect()
    }

    pub fn auth_methods(&self) -> Vec<String> {
        self.lock().auth_methods.iter().cloned().collect()
    }

    pub fn policy(&self, name: &str) -> Option<String> {
        self.lock().policies.get(name).cloned()
    }

    pub fn user_policy(&self, username: &str) -> Option<String> {
        self.lock().users.get(username).cloned()
    }

    /// peek at a stored field, bypassing authentication
    pub fn stored_secret(&self, mount: &str, path: &str, key: &str) -> Option<String> {
        self.lock()
            .secrets
            .get(&(mount.to_string(), path.to_string()))
            .and_then(|fields| fields.get(key).cloned())
    }

    fn reachable(state: &MockVaultState) -> Result<(), VaultError> {
        if !state.online {
            return Err(VaultError::Unreachable("connection refused".to_string()));
        }
        Ok(())
    }

    fn authorize(state: &MockVaultState, token: Option<&str>) -> Result<(), VaultError> {
        Self::reachable(state)?;
        if state.sealed {
            return Err(VaultError::Unreachable("Vault is sealed".to_string()));
        }
        match (token, state.root_token.as_deref()) {
            (Some(token), Some(root)) if token == root => Ok(()),
            _ => Err(VaultError::Unauthenticated),
        }
    }

    pub fn sys_init_status(&self) -> Result<bool, VaultError> {
        let state = self.lock();
        Self::reachable(&state)?;
        Ok(state.initialized)
    }

    pub fn sys_seal_status(&self) -> Result<MockSealStatus, VaultError> {
        let state = self.lock();
        Self::reachable(&state)?;
        Ok(MockSealStatus {
            sealed: state.sealed,
            threshold: 1,
            progress: 0,
        })
    }

    pub fn sys_init(&self) -> Result<VaultCredentials, VaultError> {
        let mut state = self.lock();
        Self::reachable(&state)?;
        if state.initialized {
            return Err(VaultError::AlreadyInitialized);
        }

        state.init_calls += 1;
        state.generation += 1;
        let root_token = format!("hvs.mock-root-{}", state.generation);
        let unseal_key = format!("mock-unseal-{}", state.generation);

        state.initialized = true;
        state.sealed = true;
        state.root_token = Some(root_token.clone());
        state.unseal_key = Some(unseal_key.clone());

        Ok(VaultCredentials::new(root_token, vec![unseal_key]))
    }

    pub fn sys_unseal(&self, key: &str) -> Result<MockSealStatus, VaultError> {
        let mut state = self.lock();
        Self::reachable(&state)?;
        state.unseal_calls += 1;

        if !state.initialized {
            return Err(VaultError::InvalidRequest(
                "Vault is not initialized".to_string(),
            ));
        }
        if state.unseal_key.as_deref() != Some(key) {
            return Err(VaultError::InvalidRequest(
                "invalid key: unable to unseal".to_string(),
            ));
        }

        state.sealed = false;
        Ok(MockSealStatus {
            sealed: false,
            threshold: 1,
            progress: 0,
        })
    }

    pub fn lookup_self(&self, token: Option<&str>) -> Result<(), VaultError> {
        let mut state = self.lock();
        state.lookup_calls += 1;
        Self::authorize(&state, token)
    }

    pub fn mounts(&self, token: Option<&str>) -> Result<Vec<String>, VaultError> {
        let state = self.lock();
        Self::authorize(&state, token)?;
        Ok(state.kv_mounts.iter().map(|m| format!("{m}/")).collect())
    }

    pub fn mount_kv(&self, token: Option<&str>, mount: &str) -> Result<(), VaultError> {
        let mut state = self.lock();
        Self::authorize(&state, token)?;
        if !state.kv_mounts.insert(mount.to_string()) {
            return Err(VaultError::InvalidRequest(format!(
                "path is already in use at {mount}/"
            )));
        }
        Ok(())
    }

    pub fn enabled_auth_methods(&self, token: Option<&str>) -> Result<Vec<String>, VaultError> {
        let state = self.lock();
        Self::authorize(&state, token)?;
        Ok(state.auth_methods.iter().map(|m| format!("{m}/")).collect())
    }

    pub fn enable_auth(&self, token: Option<&str>, method: &str) -> Result<(), VaultError> {
        let mut state = self.lock();
        Self::authorize(&state, token)?;
        if !state.auth_methods.insert(method.to_string()) {
            return Err(VaultError::InvalidRequest(format!(
                "path is already in use at {method}/"
            )));
        }
        Ok(())
    }

    pub fn put_policy(&self, token: Option<&str>, name: &str, rules: &str) -> Result<(), VaultError> {
        let mut state = self.lock();
        Self::authorize(&state, token)?;
        state.policies.insert(name.to_string(), rules.to_string());
        Ok(())
    }

    pub fn put_user(&self, token: Option<&str>, username: &str, policy: &str) -> Result<(), VaultError> {
        let mut state = self.lock();
        Self::authorize(&state, token)?;
        if !state.auth_methods.contains("userpass") {
            return Err(VaultError::PathNotFound);
        }
        state.users.insert(username.to_string(), policy.to_string());
        Ok(())
    }

    pub fn read(
        &self,
        token: Option<&str>,
        mount: &str,
        path: &str,
    ) -> Result<BTreeMap<String, String>, VaultError> {
        let state = self.lock();
        Self::authorize(&state, token)?;
        if !state.kv_mounts.contains(mount) {
            return Err(VaultError::PathNotFound);
        }
        state
            .secrets
            .get(&(mount.to_string(), path.to_string()))
            .cloned()
            .ok_or(VaultError::PathNotFound)
    }

    pub fn write(
        &self,
        token: Option<&str>,
        mount: &str,
        path: &str,
        fields: BTreeMap<String, String>,
    ) -> Result<(), VaultError> {
        let mut state = self.lock();
        Self::authorize(&state, token)?;
        if !state.kv_mounts.contains(mount) {
            return Err(VaultError::PathNotFound);
        }
        state
            .secrets
            .insert((mount.to_string(), path.to_string()), fields);
        Ok(())
    }
}

/// a [VaultAdmin] bound to a [MockVaultBackend]
#[derive(Debug)]
pub struct MockVault {
    backend: MockVaultBackend,
    token: Mutex<Option<String>>,
}

impl MockVault {
    pub fn backend(&self) -> &MockVaultBackend {
        &self.backend
    }

    fn token(&self) -> Option<String> {
        self.token.lock().unwrap().clone()
    }
}

#[async_trait]
impl VaultAdmin for MockVault {
    async fn is_initialized(&self) -> Result<bool, VaultError> {
        self.backend.sys_init_status()
    }

    async fn is_sealed(&self) -> Result<bool, VaultError> {
        Ok(self.backend.sys_seal_status()?.sealed)
    }

    async fn initialize(&self, _shares: u8, _threshold: u8) -> Result<VaultCredentials, VaultError> {
        self.backend.sys_init()
    }

    async fn submit_unseal_key(&self, key: &str) -> Result<u32, VaultError> {
        let status = self.backend.sys_unseal(key)?;
        Ok(if status.sealed {
            status.threshold - status.progress
        } else {
            0
        })
    }

    fn authenticate_with_token(&self, token: &str) {
        *self.token.lock().unwrap() = Some(token.to_string());
    }

    fn clear_token(&self) {
        *self.token.lock().unwrap() = None;
    }

    async fn lookup_self(&self) -> Result<(), VaultError> {
        self.backend.lookup_self(self.token().as_deref())
    }

    async fn ensure_kv_engine_mounted(&self, mount: &str) -> Result<(), VaultError> {
        let token = self.token();
        let mount = mount.trim_matches('/');
        if self
            .backend
            .mounts(token.as_deref())?
            .iter()
            .any(|m| m.trim_end_matches('/') == mount)
        {
            return Ok(());
        }
        self.backend.mount_kv(token.as_deref(), mount)
    }

    async fn enable_auth_method(&self, method: &str) -> Result<(), VaultError> {
        let token = self.token();
        if self
            .backend
            .enabled_auth_methods(token.as_deref())?
            .iter()
            .any(|m| m.trim_end_matches('/') == method)
        {
            return Ok(());
        }
        self.backend.enable_auth(token.as_deref(), method)
    }

    async fn create_or_update_policy(&self, name: &str, rules: &str) -> Result<(), VaultError> {
        self.backend.put_policy(self.token().as_deref(), name, rules)
    }

    async fn create_or_update_userpass_user(
        &self,
        username: &str,
        _password: &str,
        policy: &str,
    ) -> Result<(), VaultError> {
        self.backend
            .put_user(self.token().as_deref(), username, policy)
    }

    async fn read_secret(&self, mount: &str, path: &str, key: &str) -> Result<String, VaultError> {
        self.backend
            .read(self.token().as_deref(), mount, path)?
            .remove(key)
            .ok_or(VaultError::PathNotFound)
    }

    async fn write_secret(
        &self,
        mount: &str,
        path: &str,
        key: &str,
        value: &str,
    ) -> Result<(), VaultError> {
        let fields = BTreeMap::from([(key.to_string(), value.to_string())]);
        self.backend
            .write(self.token().as_deref(), mount, path, fields)
    }
}
