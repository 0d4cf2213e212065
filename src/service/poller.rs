// Periodic status check
use parking_lot::Mutex;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tracing::{debug, info};

use crate::timer::{Spawner, TimerSlot};

use super::client::{ServiceClient, ServiceStatus};

/// Polls `/status` on a single-instance timer and forces a catalog refresh
/// when the server comes up or its media count moves.
pub struct StatusPoller {
    client: Arc<ServiceClient>,
    last: Mutex<Option<ServiceStatus>>,
    slot: TimerSlot,
    spawner: Spawner,
}

impl StatusPoller {
    pub fn new(client: Arc<ServiceClient>) -> Arc<Self> {
        Arc::new(Self {
            client,
            last: Mutex::new(None),
            slot: TimerSlot::new("status-poll"),
            spawner: Spawner::current(),
        })
    }

    /// (Re)start polling. A zero period stops it.
    pub fn start(self: &Arc<Self>, period: Duration) {
        if period.is_zero() {
            self.stop();
            return;
        }

        let weak: Weak<Self> = Arc::downgrade(self);
        let job = async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(poller) = weak.upgrade() else { break };
                poller.poll_once().await;
            }
        };
        let Some(handle) = self.spawner.spawn("status polling", job) else {
            return;
        };
        self.slot.replace(handle);
        debug!("status polling every {:?}", period);
    }

    pub fn stop(&self) {
        self.slot.cancel();
    }

    pub fn is_running(&self) -> bool {
        self.slot.is_active()
    }

    /// One status check. Returns the status and whether a refresh was forced.
    pub async fn poll_once(&self) -> (ServiceStatus, bool) {
        let status = self.client.check_status().await;
        let previous = self.last.lock().replace(status.clone());

        let needs_refresh = status.active
            && match &previous {
                None => false,
                Some(prev) => !prev.active || prev.total_count != status.total_count,
            };

        if needs_refresh {
            info!(
                "media server changed (active, {} items), refreshing catalog",
                status.total_count
            );
            self.client.refresh(true).await;
        }
        (status, needs_refresh)
    }

    pub fn last_status(&self) -> Option<ServiceStatus> {
        self.last.lock().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::EventBus;
    use crate::notify::RecordingNotifier;
    use crate::settings::{MemoryBackend, SettingsStore};

    fn poller() -> Arc<StatusPoller> {
        let bus = EventBus::new();
        let notifier = Arc::new(RecordingNotifier::new());
        let settings =
            SettingsStore::with_backend(Box::new(MemoryBackend::new()), bus.clone(), notifier.clone());
        StatusPoller::new(Arc::new(ServiceClient::new(settings, bus, notifier)))
    }

    #[test]
    fn test_start_without_runtime_does_nothing() {
        let poller = poller();
        poller.start(Duration::from_secs(1));
        assert!(!poller.is_running());
    }

    #[tokio::test]
    async fn test_start_from_foreign_thread() {
        let poller = poller();
        let starter = Arc::clone(&poller);
        std::thread::spawn(move || starter.start(Duration::from_secs(60)))
            .join()
            .unwrap();
        assert!(poller.is_running());

        poller.stop();
        assert!(!poller.is_running());
    }
}
