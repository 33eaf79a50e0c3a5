//! # Loop Supervisor
//!
//! Owns every background loop the engine runs (job dispatch, webhook sweep,
//! sync scan, provider probes) and the shutdown channel that stops them.
//! Each loop is a spawned task driven by a [`tokio::time::interval`]; a
//! `watch` broadcast flips once at shutdown and every loop observes it on
//! its next select. [`Supervisor::shutdown`] then awaits the join handles so
//! in-flight cycles finish before the process exits.

use std::future::Future;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info};

/// Owner of the engine's background tasks
pub struct Supervisor {
    shutdown_tx: watch::Sender<bool>,
    tasks: Vec<(&'static str, JoinHandle<()>)>,
}

impl Supervisor {
    pub fn new() -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            shutdown_tx,
            tasks: Vec::new(),
        }
    }

    /// A receiver that resolves when shutdown begins, for callers that need
    /// to coordinate with the loops (e.g. an HTTP server task).
    pub fn shutdown_signal(&self) -> watch::Receiver<bool> {
        self.shutdown_tx.subscribe()
    }

    /// Spawn a periodic loop. `tick` runs once per period; a slow tick skips
    /// missed periods instead of bursting to catch up. The loop exits when
    /// shutdown is signalled, finishing any tick already in flight.
    pub fn spawn_loop<F, Fut>(&mut self, name: &'static str, period: Duration, mut tick: F)
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let mut shutdown_rx = self.shutdown_tx.subscribe();
        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
            info!(loop_name = name, period_ms = period.as_millis() as u64, "loop started");

            loop {
                tokio::select! {
                    _ = interval.tick() => tick().await,
                    _ = shutdown_rx.changed() => break,
                }
            }
            debug!(loop_name = name, "loop stopped");
        });
        self.tasks.push((name, handle));
    }

    /// Signal shutdown and wait for every loop to finish its current cycle.
    pub async fn shutdown(self) {
        info!(loops = self.tasks.len(), "supervisor shutting down");
        let _ = self.shutdown_tx.send(true);
        for (name, handle) in self.tasks {
            if handle.await.is_err() {
                tracing::error!(loop_name = name, "loop task panicked");
            }
        }
        info!("supervisor stopped");
    }
}

impl Default for Supervisor {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn test_loop_ticks_until_shutdown() {
        let ticks = Arc::new(AtomicU32::new(0));
        let counter = ticks.clone();

        let mut supervisor = Supervisor::new();
        supervisor.spawn_loop("counter", Duration::from_millis(5), move || {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
            }
        });

        tokio::time::sleep(Duration::from_millis(40)).await;
        supervisor.shutdown().await;
        let observed = ticks.load(Ordering::SeqCst);
        assert!(observed >= 2, "expected multiple ticks, saw {observed}");

        // No further ticks after shutdown completes.
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(ticks.load(Ordering::SeqCst), observed);
    }

    #[tokio::test]
    async fn test_shutdown_with_no_loops_is_immediate() {
        Supervisor::new().shutdown().await;
    }

    #[tokio::test]
    async fn test_shutdown_signal_observed_by_subscriber() {
        let supervisor = Supervisor::new();
        let mut rx = supervisor.shutdown_signal();
        assert!(!*rx.borrow());

        supervisor.shutdown().await;
        rx.changed().await.expect("signal should fire");
        assert!(*rx.borrow());
    }
}
