//! End-user login credentials

pub mod password_hash;
