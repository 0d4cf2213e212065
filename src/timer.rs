// Single-instance background timers
// Every periodic or delayed job (switch timer, heartbeat, reconnect, polling)
// owns exactly one slot. Starting a job in a slot aborts whatever ran there.

use parking_lot::Mutex;
use std::future::Future;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tracing::{trace, warn};

/// Runtime handle captured when a component is built. Work spawned through
/// it may be started from threads the runtime does not own, such as host
/// callbacks.
#[derive(Clone, Debug)]
pub struct Spawner {
    runtime: Option<Handle>,
}

impl Spawner {
    /// Capture the runtime the caller is running on, if any
    pub fn current() -> Self {
        Self {
            runtime: Handle::try_current().ok(),
        }
    }

    /// The captured runtime, else whatever runtime the calling thread is on
    pub fn handle(&self) -> Option<Handle> {
        self.runtime.clone().or_else(|| Handle::try_current().ok())
    }

    /// Spawn `work`, or log and drop it when no runtime is reachable
    pub fn spawn<F>(&self, what: &str, work: F) -> Option<JoinHandle<F::Output>>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        match self.handle() {
            Some(runtime) => Some(runtime.spawn(work)),
            None => {
                warn!("no async runtime, {} not started", what);
                None
            }
        }
    }
}

pub struct TimerSlot {
    name: &'static str,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl TimerSlot {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            handle: Mutex::new(None),
        }
    }

    /// Install a freshly spawned task, aborting the previous occupant.
    pub fn replace(&self, handle: JoinHandle<()>) {
        let previous = self.handle.lock().replace(handle);
        if let Some(previous) = previous {
            if !previous.is_finished() {
                trace!("replacing running {} timer", self.name);
            }
            previous.abort();
        }
    }

    /// Abort the running task, if any. Returns true when something was cancelled.
    pub fn cancel(&self) -> bool {
        match self.handle.lock().take() {
            Some(handle) => {
                let was_running = !handle.is_finished();
                handle.abort();
                if was_running {
                    trace!("cancelled {} timer", self.name);
                }
                was_running
            }
            None => false,
        }
    }

    pub fn is_active(&self) -> bool {
        self.handle
            .lock()
            .as_ref()
            .map(|h| !h.is_finished())
            .unwrap_or(false)
    }
}

impl Drop for TimerSlot {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.get_mut().take() {
            handle.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    fn ticking(counter: Arc<AtomicUsize>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(1));
            loop {
                interval.tick().await;
                counter.fetch_add(1, Ordering::SeqCst);
            }
        })
    }

    #[tokio::test(start_paused = true)]
    async fn test_replace_keeps_single_timer() {
        let slot = TimerSlot::new("test");
        let first = Arc::new(AtomicUsize::new(0));
        let second = Arc::new(AtomicUsize::new(0));

        slot.replace(ticking(first.clone()));
        tokio::time::sleep(Duration::from_millis(1500)).await;
        slot.replace(ticking(second.clone()));
        let frozen = first.load(Ordering::SeqCst);

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(first.load(Ordering::SeqCst), frozen);
        assert!(second.load(Ordering::SeqCst) >= 5);
    }

    #[test]
    fn test_spawner_without_runtime_drops_work() {
        let spawner = Spawner::current();
        assert!(spawner.handle().is_none());
        assert!(spawner.spawn("test job", async {}).is_none());
    }

    #[tokio::test]
    async fn test_spawner_reaches_runtime_from_foreign_thread() {
        let spawner = Spawner::current();
        let counter = Arc::new(AtomicUsize::new(0));
        let seen = counter.clone();

        let spawned = std::thread::spawn(move || {
            spawner
                .spawn("test job", async move {
                    seen.fetch_add(1, Ordering::SeqCst);
                })
                .is_some()
        })
        .join()
        .unwrap();

        assert!(spawned);
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_reports_running_state() {
        let slot = TimerSlot::new("test");
        assert!(!slot.cancel());

        slot.replace(ticking(Arc::new(AtomicUsize::new(0))));
        assert!(slot.is_active());
        assert!(slot.cancel());
        assert!(!slot.is_active());
    }
}
