//! Lifecycle coordinators wired to a [MockVaultBackend] with test-speed
//! timings, plus helpers for waiting on their asynchronous behavior.

use std::future::Future;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use tokio::sync::broadcast::error::TryRecvError;

use super::mock_vault::MockVaultBackend;
use crate::application::bus::EventBus;
use crate::application::bus::SystemEvent;
use crate::application::loops::vault_loop::CoordinatorConfig;
use crate::application::loops::vault_loop::Provisioning;
use crate::application::loops::vault_loop::VaultCoordinator;
use crate::state::vault::encryption::KdfParams;
use crate::state::vault::encryption::Passphrase;
use crate::state::vault::lifecycle::ConnectionState;

/// upper bound for anything a test waits on
pub(crate) const WAIT: Duration = Duration::from_secs(10);

pub(crate) const TEST_PASSPHRASE: &str = "correct horse battery staple";

pub(crate) fn test_coordinator_config(envelope_path: &Path) -> CoordinatorConfig {
    CoordinatorConfig {
        envelope_path: envelope_path.to_path_buf(),
        kv_mount: "secret".to_string(),
        probe_backoff: Duration::from_millis(25),
        watchdog_interval: Duration::from_millis(25),
        kdf_params: KdfParams::insecure_fast(),
        provisioning: Provisioning::for_namespace("lyndrix", None),
    }
}

/// a coordinator on its own bus; not started
pub(crate) fn mock_coordinator(
    backend: &MockVaultBackend,
    config: CoordinatorConfig,
    env_passphrase: Option<&str>,
) -> (VaultCoordinator, EventBus) {
    let bus = EventBus::new();
    let coordinator = VaultCoordinator::new(
        Arc::new(backend.client()),
        config,
        bus.clone(),
        env_passphrase.map(Passphrase::new),
    );
    (coordinator, bus)
}

/// Fresh backend, initialized interactively with [TEST_PASSPHRASE].
pub(crate) async fn connected_coordinator(
    envelope_path: &Path,
) -> anyhow::Result<(MockVaultBackend, VaultCoordinator, EventBus)> {
    let backend = MockVaultBackend::new();
    let (coordinator, bus) =
        mock_coordinator(&backend, test_coordinator_config(envelope_path), None);

    coordinator.start();
    wait_for_state(&coordinator, ConnectionState::NeedsInit).await?;
    coordinator
        .request_init(Passphrase::new(TEST_PASSPHRASE))
        .await?;

    Ok((backend, coordinator, bus))
}

pub(crate) async fn wait_for_state(
    coordinator: &VaultCoordinator,
    target: ConnectionState,
) -> anyhow::Result<()> {
    let mut states = coordinator.watch_state();
    tokio::time::timeout(WAIT, states.wait_for(|state| *state == target)).await??;
    Ok(())
}

/// skip events until one with `topic` arrives
pub(crate) async fn expect_event(
    events: &mut broadcast::Receiver<SystemEvent>,
    topic: &str,
) -> anyhow::Result<SystemEvent> {
    tokio::time::timeout(WAIT, async {
        loop {
            let event = events.recv().await?;
            if event.topic() == topic {
                return anyhow::Ok(event);
            }
        }
    })
    .await?
}

/// drain the receiver, counting events with `topic`
pub(crate) fn count_pending(events: &mut broadcast::Receiver<SystemEvent>, topic: &str) -> usize {
    let mut count = 0;
    loop {
        match events.try_recv() {
            Ok(event) if event.topic() == topic => count += 1,
            Ok(_) | Err(TryRecvError::Lagged(_)) => {}
            Err(TryRecvError::Empty | TryRecvError::Closed) => return count,
        }
    }
}

/// poll `condition` until it holds
pub(crate) async fn eventually<F, Fut>(mut condition: F) -> anyhow::Result<()>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    tokio::time::timeout(WAIT, async {
        while !condition().await {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await?;
    Ok(())
}
