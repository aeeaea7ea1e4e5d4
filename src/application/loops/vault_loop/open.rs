//! The init and unseal sequences. Callers hold the backend guard, on a task
//! of its own (see `run_sequence`).

use std::sync::Arc;

use tracing::debug;
use tracing::error;
use tracing::info;
use tracing::warn;

use super::errors::InitError;
use super::errors::UnsealError;
use super::Inner;
use super::VaultCoordinator;
use super::OFFLINE_MESSAGE;
use super::OFFLINE_TITLE;
use crate::application::bus::SystemEvent;
use crate::application::vault_client::VaultError;
use crate::state::vault::encryption::decrypt_envelope;
use crate::state::vault::encryption::encrypt_envelope;
use crate::state::vault::encryption::Passphrase;
use crate::state::vault::lifecycle::ConnectionState;
use crate::state::vault::lifecycle::PassphraseSource;

/// one share, threshold one: the envelope is the only custodian
const KEY_SHARES: u8 = 1;
const KEY_THRESHOLD: u8 = 1;

/// The claimed initialization slot. Dropped without [Self::release], e.g.
/// when the owning task is cancelled, it frees the slot on a new task.
pub(super) struct InitializationSlot {
    inner: Option<Arc<Inner>>,
}

impl InitializationSlot {
    pub(super) async fn claim(inner: &Arc<Inner>) -> Option<Self> {
        inner
            .state
            .lock_mut(|s| s.try_begin_initialization())
            .await
            .then(|| Self {
                inner: Some(inner.clone()),
            })
    }

    async fn release(mut self) {
        if let Some(inner) = self.inner.take() {
            inner.state.lock_mut(|s| s.end_initialization()).await;
        }
    }
}

impl Drop for InitializationSlot {
    fn drop(&mut self) {
        let Some(inner) = self.inner.take() else {
            return;
        };
        warn!("initialization interrupted, releasing its slot");
        if let Ok(runtime) = tokio::runtime::Handle::try_current() {
            runtime.spawn(async move {
                inner.state.lock_mut(|s| s.end_initialization()).await;
            });
        }
    }
}

impl VaultCoordinator {
    /// Initialize the backend, seal its credentials into the envelope file
    /// and bring the store online.
    ///
    /// On failure the state returns to `NeedsInit`. A backend that was
    /// already initialized is not rolled back.
    pub(super) async fn initialize_locked(
        &self,
        passphrase: Passphrase,
        source: PassphraseSource,
    ) -> Result<(), InitError> {
        let state = self.connection_state().await;
        if state != ConnectionState::NeedsInit {
            return Err(InitError::NotAwaitingInit(state));
        }
        if passphrase.is_empty() {
            return Err(InitError::EmptyPassphrase);
        }
        let Some(slot) = InitializationSlot::claim(&self.inner).await else {
            return Err(InitError::InFlight);
        };

        let strength = passphrase.strength();
        if !strength.is_recommended() {
            warn!("initializing the secret store with a {strength} passphrase");
        }

        let result = match self.transition(ConnectionState::Unsealing).await {
            Ok(_) => self.run_initialization(&passphrase).await,
            Err(e) => Err(e.into()),
        };
        slot.release().await;

        match result {
            Ok(()) => {
                self.inner
                    .state
                    .lock_mut(|s| s.accept_passphrase(passphrase, source))
                    .await;
                self.transition(ConnectionState::Connected).await?;
                info!("secret store initialized and opened");
                Ok(())
            }
            Err(e) => {
                self.inner.admin.clear_token();
                let _ = self.transition(ConnectionState::NeedsInit).await;
                Err(e)
            }
        }
    }

    async fn run_initialization(&self, passphrase: &Passphrase) -> Result<(), InitError> {
        let admin = &self.inner.admin;

        let credentials = admin.initialize(KEY_SHARES, KEY_THRESHOLD).await?;
        info!("secret backend initialized");

        let blob = {
            let passphrase = passphrase.clone();
            let credentials = credentials.clone();
            let params = self.inner.config.kdf_params;
            tokio::task::spawn_blocking(move || {
                encrypt_envelope(passphrase.expose(), &credentials, &params)
            })
            .await
            .map_err(|e| InitError::Join(e.to_string()))??
        };
        self.inner.envelope.write_atomic(&blob).await?;
        info!(
            "credential envelope written to {}",
            self.inner.envelope.path().display()
        );

        let unseal_key = credentials
            .first_unseal_key()
            .ok_or(InitError::MissingUnsealKey)?;
        admin.submit_unseal_key(unseal_key).await?;
        admin.authenticate_with_token(&credentials.root_token);

        self.confirm_open().await?;
        self.provision().await;

        Ok(())
    }

    /// Open the envelope with `passphrase` and bring the store online.
    ///
    /// A passphrase that fails the integrity check touches neither the
    /// backend nor the file.
    pub(super) async fn unseal_locked(
        &self,
        passphrase: Passphrase,
        source: PassphraseSource,
    ) -> Result<(), UnsealError> {
        let state = self.connection_state().await;
        if state != ConnectionState::NeedsUnseal {
            return Err(UnsealError::NotAwaitingUnseal(state));
        }
        if !self.inner.envelope.exists().await {
            return Err(UnsealError::EnvelopeMissing);
        }

        self.transition(ConnectionState::Unsealing).await?;

        match self.run_unseal(&passphrase).await {
            Ok(()) => {
                self.inner
                    .state
                    .lock_mut(|s| s.accept_passphrase(passphrase, source))
                    .await;
                self.transition(ConnectionState::Connected).await?;
                info!("secret store opened with {source} passphrase");
                Ok(())
            }
            Err(e) => {
                self.recover_from_unseal_failure(&e, source).await;
                Err(e)
            }
        }
    }

    async fn run_unseal(&self, passphrase: &Passphrase) -> Result<(), UnsealError> {
        let blob = self.inner.envelope.read().await?;

        let credentials = {
            let passphrase = passphrase.clone();
            let params = self.inner.config.kdf_params;
            tokio::task::spawn_blocking(move || {
                decrypt_envelope(passphrase.expose(), &blob, &params)
            })
            .await
            .map_err(|e| UnsealError::Join(e.to_string()))??
        };

        let admin = &self.inner.admin;
        admin.authenticate_with_token(&credentials.root_token);

        if admin.is_sealed().await? {
            let unseal_key = credentials
                .first_unseal_key()
                .ok_or(UnsealError::MissingUnsealKey)?;
            let remaining = admin.submit_unseal_key(unseal_key).await?;
            if remaining > 0 {
                warn!("backend still needs {remaining} unseal key shares");
            }
        } else {
            debug!("backend already unsealed, checking the root token only");
        }

        self.confirm_open().await?;
        self.provision().await;

        Ok(())
    }

    async fn recover_from_unseal_failure(&self, error: &UnsealError, source: PassphraseSource) {
        match error {
            UnsealError::InvalidKey => {
                warn!("{source} passphrase could not open the credential envelope");
                self.inner
                    .state
                    .lock_mut(|s| s.reject_passphrase(source))
                    .await;
                let _ = self.transition(ConnectionState::NeedsUnseal).await;
                self.inner.bus.publish(SystemEvent::VaultInvalidKey);
            }
            UnsealError::Backend(VaultError::Unreachable(detail)) => {
                warn!("secret backend became unreachable during unseal: {detail}");
                self.inner.admin.clear_token();
                let _ = self.transition(ConnectionState::Disconnected).await;
                self.raise_maintenance(OFFLINE_TITLE, OFFLINE_MESSAGE);
            }
            UnsealError::Backend(e) if e.is_auth_related() => {
                warn!("backend rejected the root token from the envelope");
                self.inner
                    .state
                    .lock_mut(|s| s.clear_accepted_passphrase())
                    .await;
                self.inner.admin.clear_token();
                let _ = self.transition(ConnectionState::NeedsUnseal).await;
            }
            other => {
                error!("unseal failed: {}", super::error_chain(other));
                self.inner.admin.clear_token();
                let _ = self.transition(ConnectionState::NeedsUnseal).await;
            }
        }
    }

    /// Confirm the backend is unsealed and accepts our token, then make sure
    /// the KV engine is mounted.
    async fn confirm_open(&self) -> Result<(), VaultError> {
        let admin = &self.inner.admin;

        if admin.is_sealed().await? {
            return Err(VaultError::InvalidRequest(
                "backend is still sealed after unseal".to_string(),
            ));
        }
        if !admin.is_authenticated().await? {
            return Err(VaultError::Unauthenticated);
        }

        admin
            .ensure_kv_engine_mounted(&self.inner.config.kv_mount)
            .await
    }

    /// Write the namespace policy and the optional userpass login.
    ///
    /// Failures are logged; an open store stays open.
    async fn provision(&self) {
        let admin = &self.inner.admin;
        let provisioning = &self.inner.config.provisioning;
        let policy = &provisioning.policy_name;

        let rules = provisioning.policy_rules(&self.inner.config.kv_mount);
        if let Err(e) = admin.create_or_update_policy(policy, &rules).await {
            warn!("could not write policy {policy}: {e}");
            return;
        }
        debug!("policy {policy} written");

        let Some(account) = &provisioning.userpass else {
            return;
        };

        let result = async {
            admin.enable_auth_method("userpass").await?;
            admin
                .create_or_update_userpass_user(
                    &account.username,
                    account.password.expose(),
                    policy,
                )
                .await
        }
        .await;

        match result {
            Ok(()) => info!("userpass login {} provisioned", account.username),
            Err(e) => warn!("could not provision userpass login {}: {e}", account.username),
        }
    }
}
