//! Periodic background tasks with explicit shutdown
//!
//! Both the domain-list reload loop and every per-host health probe loop run
//! as a [`PeriodicTask`]. The loop waits one full period before its first
//! invocation, then calls the tick closure once per period until stopped.
//! `stop()` signals the loop, aborts it if a tick is still in flight and
//! waits for the task to finish, so no tick can start after it returns.

use std::future::Future;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, trace};

/// Shortest accepted period; `tokio::time::interval` rejects zero
const MIN_PERIOD: Duration = Duration::from_millis(1);

/// A named loop running on the tokio runtime
#[derive(Debug)]
pub struct PeriodicTask {
    name: String,
    shutdown: watch::Sender<bool>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl PeriodicTask {
    /// Spawn a loop calling `tick` every `period`
    ///
    /// Must be called from within a tokio runtime.
    pub fn spawn<F, Fut>(name: impl Into<String>, period: Duration, mut tick: F) -> Self
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let name = name.into();
        let (shutdown, mut shutdown_rx) = watch::channel(false);
        let period = period.max(MIN_PERIOD);
        let task_name = name.clone();

        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick completes immediately
            interval.tick().await;

            loop {
                tokio::select! {
                    biased;
                    _ = shutdown_rx.changed() => {
                        debug!(task = %task_name, "Periodic task shutting down");
                        break;
                    }
                    _ = interval.tick() => {
                        trace!(task = %task_name, "Periodic task tick");
                        tick().await;
                    }
                }
            }
        });

        Self {
            name,
            shutdown,
            handle: Mutex::new(Some(handle)),
        }
    }

    /// Task name, used in logs
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns true until `stop()` has completed
    pub fn is_running(&self) -> bool {
        self.handle
            .lock()
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    /// Stop the loop and wait for it to exit
    ///
    /// Safe to call more than once.
    pub async fn stop(&self) {
        let _ = self.shutdown.send(true);
        let handle = self.handle.lock().take();
        if let Some(handle) = handle {
            handle.abort();
            // Cancelled is the expected outcome here
            let _ = handle.await;
            debug!(task = %self.name, "Periodic task stopped");
        }
    }
}

impl Drop for PeriodicTask {
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

    #[tokio::test(start_paused = true)]
    async fn test_ticks_after_each_period() {
        let count = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&count);
        let task = PeriodicTask::spawn("count", Duration::from_secs(1), move || {
            let counter = Arc::clone(&counter);
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
            }
        });

        tokio::time::sleep(Duration::from_millis(3500)).await;
        assert_eq!(count.load(Ordering::SeqCst), 3);
        task.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_ticks_after_stop() {
        let count = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&count);
        let task = PeriodicTask::spawn("count", Duration::from_millis(100), move || {
            let counter = Arc::clone(&counter);
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
            }
        });

        tokio::time::sleep(Duration::from_millis(250)).await;
        task.stop().await;
        assert!(!task.is_running());
        let stopped_at = count.load(Ordering::SeqCst);

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(count.load(Ordering::SeqCst), stopped_at);
    }

    #[tokio::test]
    async fn test_double_stop() {
        let task = PeriodicTask::spawn("noop", Duration::from_secs(60), || async {});
        assert!(task.is_running());
        task.stop().await;
        task.stop().await;
        assert!(!task.is_running());
        assert_eq!(task.name(), "noop");
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_interrupts_hanging_tick() {
        let task = PeriodicTask::spawn("hang", Duration::from_millis(10), || async {
            std::future::pending::<()>().await;
        });
        tokio::time::sleep(Duration::from_millis(50)).await;
        task.stop().await;
        assert!(!task.is_running());
    }
}
