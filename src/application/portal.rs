//! The composed process, as returned by [crate::initialize].

use tokio::task::JoinHandle;
use tracing::info;

use crate::api::secrets::SecretGateway;
use crate::application::bus::EventBus;
use crate::application::loops::vault_loop::VaultCoordinator;
use crate::application::maintenance::MaintenanceLocks;

/// Handles to every long-lived component, so an embedding portal can wire
/// its own collaborators before handing control to [Portal::run].
#[derive(Debug)]
pub struct Portal {
    bus: EventBus,
    coordinator: VaultCoordinator,
    gateway: SecretGateway,
    maintenance: MaintenanceLocks,
    task_join_handles: Vec<JoinHandle<()>>,
}

impl Portal {
    pub(crate) fn new(
        bus: EventBus,
        coordinator: VaultCoordinator,
        gateway: SecretGateway,
        maintenance: MaintenanceLocks,
        task_join_handles: Vec<JoinHandle<()>>,
    ) -> Self {
        Self {
            bus,
            coordinator,
            gateway,
            maintenance,
            task_join_handles,
        }
    }

    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    pub fn coordinator(&self) -> &VaultCoordinator {
        &self.coordinator
    }

    pub fn gateway(&self) -> &SecretGateway {
        &self.gateway
    }

    pub fn maintenance(&self) -> &MaintenanceLocks {
        &self.maintenance
    }

    /// Run until ctrl-c. Returns the process exit code.
    pub async fn run(self) -> anyhow::Result<i32> {
        tokio::signal::ctrl_c().await?;
        info!("Received ctrl-c, shutting down");

        self.graceful_shutdown();
        Ok(0)
    }

    /// Stop the supervisor and every spawned task. The backend and the
    /// envelope file are left as they are.
    pub fn graceful_shutdown(self) {
        self.coordinator.shutdown();
        for handle in self.task_join_handles {
            handle.abort();
        }
        info!("Shutdown completed");
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use clap::Parser;
    use macro_rules_attr::apply;

    use super::*;
    use crate::application::config::cli_args::Args;
    use crate::state::vault::encryption::Passphrase;
    use crate::state::vault::lifecycle::ConnectionState;
    use crate::tests::shared::coordinator::wait_for_state;
    use crate::tests::shared::coordinator::TEST_PASSPHRASE;
    use crate::tests::shared::fake_vault_server::spawn_fake_vault;
    use crate::tests::shared::files::unit_test_data_directory;
    use crate::tests::shared::mock_vault::MockVaultBackend;
    use crate::tests::shared_tokio_runtime;

    /// The whole process against a fake backend served over HTTP.
    #[apply(shared_tokio_runtime)]
    async fn composed_portal_initializes_and_serves_secrets() -> anyhow::Result<()> {
        let backend = MockVaultBackend::new();
        let vault_url = spawn_fake_vault(backend.clone()).await?;
        let data_dir = unit_test_data_directory()?;
        let data_dir_arg = data_dir.root_dir_path().display().to_string();

        let args = Args::parse_from([
            "lyndrix-core",
            "--data-dir",
            data_dir_arg.as_str(),
            "--vault-url",
            vault_url.as_str(),
            "--rest-port",
            "0",
            "--probe-backoff-secs",
            "1",
            "--kdf-time-cost",
            "1",
            "--kdf-memory-kib",
            "64",
            "--kdf-parallelism",
            "1",
        ]);
        let portal = crate::initialize(args).await?;

        wait_for_state(portal.coordinator(), ConnectionState::NeedsInit).await?;
        portal
            .coordinator()
            .request_init(Passphrase::new(TEST_PASSPHRASE))
            .await?;

        assert!(data_dir.envelope_file_path().exists());
        assert!(!portal.maintenance().is_locked().await);

        portal.gateway().set("plugins/git/token", "ghp_abc").await?;
        assert_eq!(
            Some("ghp_abc".to_string()),
            portal.gateway().get("plugins/git/token").await
        );
        assert_eq!(
            Some("ghp_abc".to_string()),
            backend.stored_secret("secret", "lyndrix/plugins/git/token", "value")
        );

        portal.graceful_shutdown();
        Ok(())
    }
}
