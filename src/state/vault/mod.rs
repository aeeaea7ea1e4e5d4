//! Everything the process knows about the secret backend: the encrypted
//! credential envelope and the connection lifecycle.

pub mod encryption;
pub mod envelope_file;
pub mod lifecycle;
