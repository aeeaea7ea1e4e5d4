pub mod bus;
pub mod config;
pub mod locks;
pub mod loops;
pub mod maintenance;
pub mod portal;
pub mod rest_server;
pub mod vault_client;
