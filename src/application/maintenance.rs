//! Maintenance locks: blocking notices raised by services that lost a
//! dependency.
//!
//! Any lock blocks navigation in the presentation layer. Each service owns at
//! most one lock and only its own notices can clear it.

use std::collections::BTreeMap;

use serde::Serialize;
use tokio::task::JoinHandle;
use tracing::info;

use crate::application::bus::EventBus;
use crate::application::bus::MaintenanceNotice;
use crate::application::bus::SystemEvent;
use crate::application::locks::tokio::AtomicRw;

const DEFAULT_TITLE: &str = "System maintenance";
const DEFAULT_MESSAGE: &str = "A service is currently unavailable.";

/// one active lock
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MaintenanceLock {
    pub service: String,
    pub title: String,
    pub message: String,
}

/// The set of active locks, keyed and ordered by service name.
#[derive(Debug, Clone)]
pub struct MaintenanceLocks {
    locks: AtomicRw<BTreeMap<String, MaintenanceLock>>,
}

impl Default for MaintenanceLocks {
    fn default() -> Self {
        Self {
            locks: AtomicRw::from((BTreeMap::new(), Some("maintenance-locks"))),
        }
    }
}

impl MaintenanceLocks {
    /// set or clear the lock of `notice.service`
    pub async fn apply(&self, notice: &MaintenanceNotice) {
        let service = notice.service.clone();

        if notice.active {
            let lock = MaintenanceLock {
                service: service.clone(),
                title: non_empty_or(&notice.title, DEFAULT_TITLE),
                message: non_empty_or(&notice.message, DEFAULT_MESSAGE),
            };
            let previous = self
                .locks
                .lock_mut(|locks| locks.insert(service.clone(), lock))
                .await;
            if previous.is_none() {
                info!("maintenance lock raised by {service}");
            }
        } else if self.locks.lock_mut(|locks| locks.remove(&service)).await.is_some() {
            info!("maintenance lock cleared by {service}");
        }
    }

    pub async fn is_locked(&self) -> bool {
        self.locks.lock(|locks| !locks.is_empty()).await
    }

    /// the lock to show, if any
    pub async fn current(&self) -> Option<MaintenanceLock> {
        self.locks.lock(|locks| locks.values().next().cloned()).await
    }

    pub async fn snapshot(&self) -> Vec<MaintenanceLock> {
        self.locks.lock(|locks| locks.values().cloned().collect()).await
    }

    /// apply every [SystemEvent::MaintenanceMode] published on `bus`
    pub fn attach(&self, bus: &EventBus) -> JoinHandle<()> {
        let locks = self.clone();
        bus.subscribe("maintenance-locks", move |event| {
            let locks = locks.clone();
            async move {
                if let SystemEvent::MaintenanceMode(notice) = event {
                    locks.apply(&notice).await;
                }
                Ok(())
            }
        })
    }
}

fn non_empty_or(value: &str, fallback: &str) -> String {
    if value.trim().is_empty() {
        fallback.to_string()
    } else {
        value.to_string()
    }
}
