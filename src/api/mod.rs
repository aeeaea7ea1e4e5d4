//! public api for components that need secrets
//!
//! Plugins and the portal never talk to the secret backend directly. They get
//! a [secrets::SecretGateway] bound to their namespace, which only works while
//! the lifecycle coordinator reports the store as connected.
pub mod secrets;
