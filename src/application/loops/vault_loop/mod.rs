//! Lifecycle coordinator for the secret backend.
//!
//! A single supervisor task probes the backend until it can be opened, then
//! watches it until the connection is lost, and starts over. Interactive
//! init/unseal requests run on the caller's task. Every backend sequence
//! (probe, init, unseal, watchdog check) holds the backend guard, so they
//! never interleave.

mod errors;
mod open;
mod supervisor;


use std::future::Future;
use std::path::PathBuf;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::sync::PoisonError;
use std::time::Duration;

pub use errors::InitError;
pub use errors::UnsealError;
use tokio::sync::watch;
use tokio::sync::Mutex;
use tokio::sync::Notify;
use tokio::task::JoinError;
use tokio::task::JoinHandle;
use tracing::error;
use tracing::info;
use tracing::Instrument;

use crate::application::bus::EventBus;
use crate::application::bus::MaintenanceNotice;
use crate::application::bus::SystemEvent;
use crate::application::locks::tokio::AtomicRw;
use crate::application::vault_client::VaultAdmin;
use crate::state::vault::encryption::KdfParams;
use crate::state::vault::encryption::Passphrase;
use crate::state::vault::envelope_file::EnvelopeFile;
use crate::state::vault::lifecycle::ConnectionState;
use crate::state::vault::lifecycle::LifecycleSnapshot;
use crate::state::vault::lifecycle::LifecycleState;
use crate::state::vault::lifecycle::PassphraseSource;
use crate::state::vault::lifecycle::TransitionError;

/// service name on maintenance notices raised by the coordinator
pub const MAINTENANCE_SERVICE: &str = "vault";

const OFFLINE_TITLE: &str = "Security system offline";
const OFFLINE_MESSAGE: &str = "Establishing connection to the Vault server...";
const CONNECTION_LOST_TITLE: &str = "Security warning";
const CONNECTION_LOST_MESSAGE: &str =
    "The connection to the secret store was interrupted. Reconnecting...";

/// login to create for the portal once the store is open
#[derive(Debug, Clone)]
pub struct UserpassAccount {
    pub username: String,
    pub password: Passphrase,
}

/// Access control written to the backend after every successful open.
#[derive(Debug, Clone)]
pub struct Provisioning {
    pub namespace: String,
    pub policy_name: String,
    pub userpass: Option<UserpassAccount>,
}

impl Provisioning {
    pub fn for_namespace(namespace: &str, userpass: Option<UserpassAccount>) -> Self {
        Self {
            namespace: namespace.to_string(),
            policy_name: format!("{namespace}-policy"),
            userpass,
        }
    }

    /// ACL granting full access below the namespace and nothing else
    pub fn policy_rules(&self, kv_mount: &str) -> String {
        let namespace = &self.namespace;
        format!(
            r#"path "{kv_mount}/data/{namespace}/*" {{
  capabilities = ["create", "read", "update", "delete", "list"]
}}

path "{kv_mount}/metadata/{namespace}/*" {{
  capabilities = ["list", "read", "delete"]
}}
"#
        )
    }
}

#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    pub envelope_path: PathBuf,
    pub kv_mount: String,
    pub probe_backoff: Duration,
    pub watchdog_interval: Duration,
    pub kdf_params: KdfParams,
    pub provisioning: Provisioning,
}

struct Inner {
    admin: Arc<dyn VaultAdmin>,
    config: CoordinatorConfig,
    envelope: EnvelopeFile,
    bus: EventBus,
    state: AtomicRw<LifecycleState>,
    state_tx: watch::Sender<ConnectionState>,
    env_passphrase: Option<Passphrase>,

    /// held for the duration of every backend sequence
    backend_guard: Mutex<()>,

    /// wakes a supervisor waiting for a passphrase
    wakeup: Notify,

    /// whether our maintenance lock is currently raised
    maintenance_raised: AtomicBool,

    supervisor: std::sync::Mutex<Option<JoinHandle<()>>>,
}

/// Cloneable handle to the process's one lifecycle coordinator.
#[derive(Clone)]
pub struct VaultCoordinator {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for VaultCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VaultCoordinator")
            .field("state", &*self.inner.state_tx.borrow())
            .field("envelope", &self.inner.envelope.path())
            .finish()
    }
}

impl VaultCoordinator {
    /// `env_passphrase` is the auto-unseal credential, if the operator set one
    pub fn new(
        admin: Arc<dyn VaultAdmin>,
        config: CoordinatorConfig,
        bus: EventBus,
        env_passphrase: Option<Passphrase>,
    ) -> Self {
        let (state_tx, _) = watch::channel(ConnectionState::Disconnected);
        let envelope = EnvelopeFile::new(config.envelope_path.clone());

        Self {
            inner: Arc::new(Inner {
                admin,
                config,
                envelope,
                bus,
                state: AtomicRw::from((LifecycleState::default(), Some("vault-lifecycle"))),
                state_tx,
                env_passphrase,
                backend_guard: Mutex::new(()),
                wakeup: Notify::new(),
                maintenance_raised: AtomicBool::new(false),
                supervisor: std::sync::Mutex::new(None),
            }),
        }
    }

    /// Route `SystemStarted` and passphrase request events to this coordinator.
    pub fn attach(&self, bus: &EventBus) -> JoinHandle<()> {
        let coordinator = self.clone();
        bus.subscribe("vault-coordinator", move |event| {
            let coordinator = coordinator.clone();
            async move {
                match event {
                    SystemEvent::SystemStarted => coordinator.start(),
                    SystemEvent::VaultInitRequested { passphrase } => {
                        coordinator.request_init(passphrase).await?
                    }
                    SystemEvent::VaultUnsealRequested { passphrase } => {
                        coordinator.request_unseal(passphrase).await?
                    }
                    _ => {}
                }
                Ok(())
            }
        })
    }

    /// Spawn the supervisor, aborting any previous one.
    pub fn start(&self) {
        let mut slot = self
            .inner
            .supervisor
            .lock()
            .unwrap_or_else(PoisonError::into_inner);

        if let Some(previous) = slot.take() {
            previous.abort();
            info!("superseding running secret store supervisor");
        }

        let supervisor = self.clone();
        *slot = Some(tokio::spawn(
            async move {
                supervisor.run().await;
            }
            .in_current_span(),
        ));
    }

    /// Stop the supervisor. The backend is left as it is.
    pub fn shutdown(&self) {
        let handle = self
            .inner
            .supervisor
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();

        if let Some(handle) = handle {
            handle.abort();
        }
    }

    /// Initialize a fresh backend with an operator passphrase.
    ///
    /// Publishes `VaultInitFailed` for any error, in addition to returning
    /// it. The sequence runs on its own task: dropping the returned future
    /// does not interrupt it.
    pub async fn request_init(&self, passphrase: Passphrase) -> Result<(), InitError> {
        let refused = if passphrase.is_empty() {
            Some(InitError::EmptyPassphrase)
        } else if self.inner.state.lock(|s| s.initialization_in_flight()).await {
            Some(InitError::InFlight)
        } else {
            None
        };
        if let Some(e) = refused {
            let result = Err(e);
            self.report_init_outcome(&result);
            return result;
        }

        self.run_sequence(move |coordinator| async move {
            let result = coordinator
                .initialize_locked(passphrase, PassphraseSource::Interactive)
                .await;
            coordinator.report_init_outcome(&result);
            if result.is_ok() {
                coordinator.inner.wakeup.notify_one();
            }
            result
        })
        .await
        .unwrap_or_else(|e| Err(InitError::Join(e.to_string())))
    }

    /// Open the envelope with an operator passphrase and unseal.
    ///
    /// A wrong passphrase yields [UnsealError::InvalidKey] and publishes
    /// `VaultInvalidKey`. Like [Self::request_init], the sequence survives
    /// a dropped caller.
    pub async fn request_unseal(&self, passphrase: Passphrase) -> Result<(), UnsealError> {
        self.run_sequence(move |coordinator| async move {
            let result = coordinator
                .unseal_locked(passphrase, PassphraseSource::Interactive)
                .await;
            if result.is_ok() {
                coordinator.inner.wakeup.notify_one();
            }
            result
        })
        .await
        .unwrap_or_else(|e| Err(UnsealError::Join(e.to_string())))
    }

    /// Run a backend sequence on a task of its own, holding the backend
    /// guard for its whole duration.
    async fn run_sequence<F, Fut, T>(&self, sequence: F) -> Result<T, JoinError>
    where
        F: FnOnce(VaultCoordinator) -> Fut + Send + 'static,
        Fut: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        let coordinator = self.clone();
        tokio::spawn(
            async move {
                let _guard = coordinator.inner.backend_guard.lock().await;
                sequence(coordinator.clone()).await
            }
            .in_current_span(),
        )
        .await
    }

    pub async fn connection_state(&self) -> ConnectionState {
        self.inner.state.lock(|s| s.connection_state()).await
    }

    pub async fn snapshot(&self) -> LifecycleSnapshot {
        self.inner.state.lock(|s| s.snapshot()).await
    }

    pub async fn is_connected(&self) -> bool {
        self.connection_state().await.is_connected()
    }

    /// pushes every state change
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.inner.state_tx.subscribe()
    }

    /// the client the coordinator authenticated; shared with the gateway
    pub fn admin(&self) -> Arc<dyn VaultAdmin> {
        self.inner.admin.clone()
    }

    pub fn kv_mount(&self) -> &str {
        &self.inner.config.kv_mount
    }

    pub fn envelope_file(&self) -> &EnvelopeFile {
        &self.inner.envelope
    }

    /// Apply a state change, then notify watchers and the bus.
    ///
    /// Illegal transitions are logged and leave the state untouched. Falling
    /// back from `Unsealing` to the state it started from is not announced
    /// again; the failure has its own event.
    async fn transition(&self, next: ConnectionState) -> Result<bool, TransitionError> {
        let result = self
            .inner
            .state
            .lock_mut(|s| {
                let from = s.connection_state();
                s.transition(next).map(|changed| (from, changed))
            })
            .await;

        match result {
            Ok((from, true)) => {
                info!("secret store state: {next}");
                self.inner.state_tx.send_replace(next);
                let event = match next {
                    _ if from == ConnectionState::Unsealing && next.awaits_passphrase() => None,
                    ConnectionState::NeedsInit => Some(SystemEvent::VaultNeedsInit),
                    ConnectionState::NeedsUnseal => Some(SystemEvent::VaultNeedsUnseal),
                    ConnectionState::Connected => Some(SystemEvent::VaultOpened),
                    _ => None,
                };
                if let Some(event) = event {
                    self.inner.bus.publish(event);
                }
                Ok(true)
            }
            Ok((_, false)) => Ok(false),
            Err(e) => {
                error!("{e}");
                Err(e)
            }
        }
    }

    fn raise_maintenance(&self, title: &str, message: &str) {
        if !self.inner.maintenance_raised.swap(true, Ordering::SeqCst) {
            self.inner
                .bus
                .publish(SystemEvent::MaintenanceMode(MaintenanceNotice::lock(
                    MAINTENANCE_SERVICE,
                    title,
                    message,
                )));
        }
    }

    fn clear_maintenance(&self) {
        if self.inner.maintenance_raised.swap(false, Ordering::SeqCst) {
            self.inner
                .bus
                .publish(SystemEvent::MaintenanceMode(MaintenanceNotice::clear(
                    MAINTENANCE_SERVICE,
                )));
        }
    }

    fn report_init_outcome(&self, result: &Result<(), InitError>) {
        if let Err(e) = result {
            let message = error_chain(e);
            error!("secret store initialization failed: {message}");
            self.inner
                .bus
                .publish(SystemEvent::VaultInitFailed { message });
        }
    }
}

/// `outer: inner: innermost`
fn error_chain(error: &dyn std::error::Error) -> String {
    let mut message = error.to_string();
    let mut source = error.source();
    while let Some(cause) = source {
        message.push_str(": ");
        message.push_str(&cause.to_string());
        source = cause.source();
    }
    message
}
