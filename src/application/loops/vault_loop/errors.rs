use crate::application::vault_client::VaultError;
use crate::state::vault::encryption::EnvelopeError;
use crate::state::vault::envelope_file::error::EnvelopeFileError;
use crate::state::vault::lifecycle::ConnectionState;
use crate::state::vault::lifecycle::TransitionError;

/// enumerates initialization failures
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum InitError {
    #[error("secret store is not awaiting initialization (state: {0})")]
    NotAwaitingInit(ConnectionState),

    #[error("an initialization is already in progress")]
    InFlight,

    #[error("secret store is already initialized")]
    AlreadyInitialized,

    #[error("the passphrase must not be empty")]
    EmptyPassphrase,

    #[error("secret backend error during initialization")]
    Backend(#[source] VaultError),

    #[error("could not seal the new credentials")]
    Envelope(#[from] EnvelopeError),

    #[error("could not persist the credential envelope")]
    EnvelopeFile(#[from] EnvelopeFileError),

    #[error("initialization produced no unseal key")]
    MissingUnsealKey,

    #[error(transparent)]
    Transition(#[from] TransitionError),

    #[error("key derivation task failed: {0}")]
    Join(String),
}

impl From<VaultError> for InitError {
    fn from(e: VaultError) -> Self {
        match e {
            VaultError::AlreadyInitialized => Self::AlreadyInitialized,
            other => Self::Backend(other),
        }
    }
}

/// enumerates unseal failures
///
/// A wrong passphrase and a damaged envelope are both [UnsealError::InvalidKey].
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum UnsealError {
    #[error("secret store is not awaiting unseal (state: {0})")]
    NotAwaitingUnseal(ConnectionState),

    #[error("no credential envelope on disk")]
    EnvelopeMissing,

    #[error("invalid key")]
    InvalidKey,

    #[error("could not read the credential envelope")]
    EnvelopeFile(#[from] EnvelopeFileError),

    #[error("key derivation failed")]
    Envelope(#[source] EnvelopeError),

    #[error("envelope holds no unseal key")]
    MissingUnsealKey,

    #[error("secret backend error during unseal")]
    Backend(#[from] VaultError),

    #[error(transparent)]
    Transition(#[from] TransitionError),

    #[error("key derivation task failed: {0}")]
    Join(String),
}

impl From<EnvelopeError> for UnsealError {
    fn from(e: EnvelopeError) -> Self {
        match e {
            EnvelopeError::Integrity => Self::InvalidKey,
            other => Self::Envelope(other),
        }
    }
}

/// what the watchdog found wrong with a connected backend
#[derive(Debug, thiserror::Error)]
pub(super) enum WatchdogFailure {
    #[error("secret backend was sealed")]
    Resealed,

    #[error(transparent)]
    Backend(#[from] VaultError),
}

impl WatchdogFailure {
    pub(super) fn is_auth_related(&self) -> bool {
        matches!(self, Self::Backend(e) if e.is_auth_related())
    }
}
