/// The closed set of backend failures.
///
/// Probes must keep [VaultError::Unreachable] apart from a negative answer:
/// "not initialized" is `Ok(false)`, not an error.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[non_exhaustive]
pub enum VaultError {
    /// transport failure, timeout or a 5xx answer (a sealed backend answers 503)
    #[error("secret backend unreachable: {0}")]
    Unreachable(String),

    /// missing, revoked or insufficient token
    #[error("secret backend rejected the token")]
    Unauthenticated,

    #[error("secret path not found")]
    PathNotFound,

    /// any other 4xx, or a response body we could not decode
    #[error("secret backend rejected the request: {0}")]
    InvalidRequest(String),

    /// only returned by `initialize`
    #[error("secret backend is already initialized")]
    AlreadyInitialized,
}

impl VaultError {
    /// true for failures that invalidate the credentials in use
    pub fn is_auth_related(&self) -> bool {
        matches!(self, Self::Unauthenticated)
    }
}
