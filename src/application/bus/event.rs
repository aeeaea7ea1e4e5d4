use serde::Deserialize;
use serde::Serialize;

use crate::state::vault::encryption::Passphrase;

/// Everything published on the [super::EventBus].
///
/// Passphrases travel inside request events but are redacted by their
/// `Debug` impl, so logging an event never leaks them.
#[derive(Clone, Debug, strum::Display)]
pub enum SystemEvent {
    /// The process finished composing its components.
    SystemStarted,

    /// Reachable backend that was never initialized.
    VaultNeedsInit,

    /// Initialized backend waiting for a passphrase to open the envelope.
    VaultNeedsUnseal,

    /// Backend unsealed, authenticated and ready for the gateway.
    VaultOpened,

    /// Operator asks for first-time initialization.
    VaultInitRequested { passphrase: Passphrase },

    /// Operator supplies the passphrase for an unseal.
    VaultUnsealRequested { passphrase: Passphrase },

    /// An initialization attempt failed; the backend was not rolled back.
    VaultInitFailed { message: String },

    /// The supplied passphrase could not open the envelope.
    VaultInvalidKey,

    /// The watchdog lost the backend while connected.
    VaultConnectionLost,

    /// A service sets or clears its maintenance lock.
    MaintenanceMode(MaintenanceNotice),
}

impl SystemEvent {
    /// wire-style topic name, e.g. `vault:needs-unseal`
    pub fn topic(&self) -> &'static str {
        match self {
            SystemEvent::SystemStarted => "system:started",
            SystemEvent::VaultNeedsInit => "vault:needs-init",
            SystemEvent::VaultNeedsUnseal => "vault:needs-unseal",
            SystemEvent::VaultOpened => "vault:opened",
            SystemEvent::VaultInitRequested { .. } => "vault:init-requested",
            SystemEvent::VaultUnsealRequested { .. } => "vault:unseal-requested",
            SystemEvent::VaultInitFailed { .. } => "vault:init-failed",
            SystemEvent::VaultInvalidKey => "vault:invalid-key",
            SystemEvent::VaultConnectionLost => "vault:connection-lost",
            SystemEvent::MaintenanceMode(_) => "system:maintenance-mode",
        }
    }
}

/// Payload of [SystemEvent::MaintenanceMode].
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MaintenanceNotice {
    /// owner of the lock; only this service's notices can clear it
    pub service: String,
    pub active: bool,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub message: String,
}

impl MaintenanceNotice {
    pub fn lock(
        service: impl Into<String>,
        title: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            service: service.into(),
            active: true,
            title: title.into(),
            message: message.into(),
        }
    }

    pub fn clear(service: impl Into<String>) -> Self {
        Self {
            service: service.into(),
            active: false,
            title: String::new(),
            message: String::new(),
        }
    }
}
