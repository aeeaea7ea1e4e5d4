//! The supervisor task: probe until open, watch until lost, repeat.

use tokio::time::MissedTickBehavior;
use tracing::debug;
use tracing::info;
use tracing::warn;

use super::errors::WatchdogFailure;
use super::VaultCoordinator;
use super::CONNECTION_LOST_MESSAGE;
use super::CONNECTION_LOST_TITLE;
use super::OFFLINE_MESSAGE;
use super::OFFLINE_TITLE;
use crate::application::bus::SystemEvent;
use crate::state::vault::lifecycle::ConnectionState;
use crate::state::vault::lifecycle::PassphraseSource;

/// what one probe found
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ProbeOutcome {
    Connected,
    Unreachable,

    /// reachable, waiting for an operator passphrase
    AwaitingPassphrase,
}

impl VaultCoordinator {
    pub(super) async fn run(self) {
        info!("secret store supervisor started");
        loop {
            self.probe_until_connected().await;
            self.watch_until_lost().await;
        }
    }

    async fn probe_until_connected(&self) {
        self.recover_interrupted_sequence().await;

        let backoff = self.inner.config.probe_backoff;
        loop {
            let outcome = self
                .run_sequence(|coordinator| async move { coordinator.probe_once().await })
                .await
                .unwrap_or_else(|e| {
                    warn!("secret backend probe did not complete: {e}");
                    ProbeOutcome::Unreachable
                });

            match outcome {
                ProbeOutcome::Connected => return,
                ProbeOutcome::Unreachable => tokio::time::sleep(backoff).await,
                ProbeOutcome::AwaitingPassphrase => {
                    tokio::select! {
                        _ = self.inner.wakeup.notified() => {
                            debug!("supervisor woken by a passphrase request");
                        }
                        _ = tokio::time::sleep(backoff) => {}
                    }
                }
            }
        }
    }

    /// A sequence that panicked can leave the state mid-way. Nothing else
    /// runs a sequence while we hold the guard, so reset it.
    async fn recover_interrupted_sequence(&self) {
        let _guard = self.inner.backend_guard.lock().await;

        if self.connection_state().await == ConnectionState::Unsealing {
            self.inner.admin.clear_token();
            let _ = self.transition(ConnectionState::Disconnected).await;
        }
    }

    async fn probe_once(&self) -> ProbeOutcome {
        let state = self.connection_state().await;
        if state.is_connected() {
            return ProbeOutcome::Connected;
        }
        if state == ConnectionState::Disconnected {
            let _ = self.transition(ConnectionState::Probing).await;
        }

        let initialized = match self.inner.admin.is_initialized().await {
            Ok(initialized) => initialized,
            Err(e) => {
                warn!(
                    "secret backend unreachable, retrying in {}: {e}",
                    humantime::format_duration(self.inner.config.probe_backoff)
                );
                let _ = self.transition(ConnectionState::Disconnected).await;
                self.raise_maintenance(OFFLINE_TITLE, OFFLINE_MESSAGE);
                return ProbeOutcome::Unreachable;
            }
        };

        self.clear_maintenance();

        let next = if initialized {
            ConnectionState::NeedsUnseal
        } else {
            ConnectionState::NeedsInit
        };
        let _ = self.transition(next).await;

        if self.try_automatic_open(next).await {
            return ProbeOutcome::Connected;
        }

        match self.connection_state().await {
            ConnectionState::Connected => ProbeOutcome::Connected,
            ConnectionState::Disconnected => ProbeOutcome::Unreachable,
            _ => ProbeOutcome::AwaitingPassphrase,
        }
    }

    /// Auto-init with the environment credential, or auto-unseal with the
    /// best candidate passphrase. Returns true once connected.
    async fn try_automatic_open(&self, state: ConnectionState) -> bool {
        match state {
            ConnectionState::NeedsInit => {
                let Some(passphrase) = self.inner.env_passphrase.clone() else {
                    return false;
                };
                if self.inner.envelope.exists().await {
                    warn!(
                        "backend is uninitialized but {} exists; not initializing automatically",
                        self.inner.envelope.path().display()
                    );
                    return false;
                }
                if !self.inner.state.lock_mut(|s| s.try_claim_auto_init()).await {
                    return false;
                }

                info!("initializing secret store with the auto-unseal passphrase");
                let result = self
                    .initialize_locked(passphrase, PassphraseSource::Environment)
                    .await;
                self.report_init_outcome(&result);
                result.is_ok()
            }
            ConnectionState::NeedsUnseal => {
                if !self.inner.envelope.exists().await {
                    return false;
                }
                let env_passphrase = self.inner.env_passphrase.as_ref();
                let Some((passphrase, source)) = self
                    .inner
                    .state
                    .lock(|s| s.unseal_candidate(env_passphrase))
                    .await
                else {
                    return false;
                };

                debug!("attempting automatic unseal with {source} passphrase");
                match self.unseal_locked(passphrase, source).await {
                    Ok(()) => true,
                    Err(e) => {
                        debug!("automatic unseal failed: {e}");
                        false
                    }
                }
            }
            _ => false,
        }
    }

    /// Check the open store every interval. Returns after the connection
    /// was lost and the state moved back to `Disconnected`.
    async fn watch_until_lost(&self) {
        let mut ticker = tokio::time::interval(self.inner.config.watchdog_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        // the first tick completes immediately
        ticker.tick().await;

        loop {
            ticker.tick().await;

            let _guard = self.inner.backend_guard.lock().await;
            if !self.connection_state().await.is_connected() {
                return;
            }

            let Err(failure) = self.liveness_check().await else {
                continue;
            };

            warn!("secret store watchdog: {failure}");
            if failure.is_auth_related() {
                self.inner
                    .state
                    .lock_mut(|s| s.clear_accepted_passphrase())
                    .await;
            }
            self.inner.admin.clear_token();
            let _ = self.transition(ConnectionState::Disconnected).await;
            self.inner.bus.publish(SystemEvent::VaultConnectionLost);
            self.raise_maintenance(CONNECTION_LOST_TITLE, CONNECTION_LOST_MESSAGE);
            return;
        }
    }

    async fn liveness_check(&self) -> Result<(), WatchdogFailure> {
        if self.inner.admin.is_sealed().await? {
            return Err(WatchdogFailure::Resealed);
        }
        self.inner.admin.lookup_self().await?;
        Ok(())
    }
}
