// If code coverage tool `cargo-llvm-cov` is running with the nightly toolchain,
// enable the unstable “coverage” attribute. This allows using the annotation
// `#[coverage(off)]` to explicitly exclude certain parts of the code from
// being considered as “code under test.” Most prominently, the annotation
// should be added to every `#[cfg(test)]` module. Since the “coverage”
// feature is enable only conditionally, the annotation to use is:
// `#[cfg_attr(coverage_nightly, coverage(off))]`.
#![cfg_attr(coverage_nightly, feature(coverage_attribute))]

pub mod api;
pub mod application;
pub mod state;


use std::sync::Arc;

use anyhow::Context;
use anyhow::Result;
use application::config::cli_args;
use axum::http::HeaderValue;
use application::config::data_directory::DataDirectory;
use tokio::net::TcpListener;
use tracing::error;
use tracing::info;

use crate::api::secrets::SecretGateway;
use crate::application::bus::EventBus;
use crate::application::bus::SystemEvent;
use crate::application::loops::vault_loop::VaultCoordinator;
use crate::application::maintenance::MaintenanceLocks;
use crate::application::portal::Portal;
use crate::application::rest_server::run_rest_server;
use crate::application::rest_server::RestState;
use crate::application::vault_client::HttpVaultAdmin;
use crate::state::vault::encryption::Passphrase;
use crate::state::vault::encryption::AUTO_UNSEAL_ENV_VAR;

/// Compose the process: bus, maintenance locks, backend client, lifecycle
/// coordinator, gateway and control surface. Publishes `SystemStarted` last,
/// which starts the coordinator's supervisor.
pub async fn initialize(cli_args: cli_args::Args) -> Result<Portal> {
    info!("Starting lyndrix-core {}", env!("CARGO_PKG_VERSION"));

    // Get data directory (envelope file), create one if none exists
    let data_directory = DataDirectory::get(cli_args.data_dir.clone())?;
    DataDirectory::create_dir_if_not_exists(&data_directory.root_dir_path()).await?;
    DataDirectory::create_dir_if_not_exists(&data_directory.security_dir_path()).await?;
    info!("Data directory is {}", data_directory);

    let bus = EventBus::new();
    let maintenance = MaintenanceLocks::default();
    let mut task_join_handles = vec![maintenance.attach(&bus)];

    let admin = HttpVaultAdmin::new(cli_args.vault_url.clone(), cli_args.vault_request_timeout)
        .with_context(|| format!("Failed to create backend client for {}", cli_args.vault_url))?;
    info!("Secret backend is {}", admin.base_url());

    let env_passphrase = Passphrase::from_env_var(AUTO_UNSEAL_ENV_VAR);
    if env_passphrase.is_some() {
        info!("Auto-unseal passphrase found in {AUTO_UNSEAL_ENV_VAR}");
    }

    let coordinator_config = cli_args.coordinator_config(&data_directory);
    info!(
        "Credential envelope is {}",
        coordinator_config.envelope_path.display()
    );
    let coordinator =
        VaultCoordinator::new(Arc::new(admin), coordinator_config, bus.clone(), env_passphrase);
    task_join_handles.push(coordinator.attach(&bus));

    let gateway = SecretGateway::new(&coordinator, cli_args.secret_namespace.clone());

    // Bind the control surface before announcing the start, so the setup
    // pages can reach it as soon as the coordinator publishes a state.
    let rest_listener = TcpListener::bind((cli_args.rest_listen_addr, cli_args.rest_port))
        .await
        .with_context(|| {
            format!(
                "Failed to bind to local TCP port {}:{}. Is an instance of this program already running?",
                cli_args.rest_listen_addr, cli_args.rest_port
            )
        })?;
    let passphrase_origins = cli_args
        .cors_origins
        .iter()
        .map(|origin| {
            HeaderValue::from_str(origin).with_context(|| format!("Invalid --cors-origin {origin}"))
        })
        .collect::<Result<Vec<_>>>()?;
    let rest_state = RestState {
        coordinator: coordinator.clone(),
        maintenance: maintenance.clone(),
    };
    task_join_handles.push(tokio::spawn(async move {
        if let Err(e) = run_rest_server(rest_listener, rest_state, passphrase_origins).await {
            error!("Control surface stopped: {e:#}");
        }
    }));

    bus.publish(SystemEvent::SystemStarted);

    Ok(Portal::new(
        bus,
        coordinator,
        gateway,
        maintenance,
        task_join_handles,
    ))
}
