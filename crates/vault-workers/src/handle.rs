use std::future::Future;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;

/// Wraps one lifecycle worker as a cancellable, tick-driven `tokio` task.
/// A worker never panics the process on a failed tick — it logs and waits
/// for the next interval, per the background-worker propagation policy.
pub struct WorkerHandle {
    name: &'static str,
    shutdown_tx: watch::Sender<bool>,
    join: JoinHandle<()>,
}

impl WorkerHandle {
    pub fn spawn<F, Fut>(name: &'static str, interval: Duration, mut tick: F) -> Self
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = Result<usize, vault_core::VaultError>> + Send,
    {
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
        let join = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        match tick().await {
                            Ok(count) if count > 0 => tracing::info!(worker = name, count, "tick processed items"),
                            Ok(_) => {}
                            Err(e) => tracing::warn!(worker = name, error = %e, "worker tick failed"),
                        }
                    }
                    _ = shutdown_rx.changed() => {
                        if *shutdown_rx.borrow() {
                            break;
                        }
                    }
                }
            }
            tracing::info!(worker = name, "worker stopped");
        });
        Self { name, shutdown_tx, join }
    }

    /// Signals the worker to stop and waits for its current tick to finish.
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(true);
        if let Err(e) = self.join.await {
            tracing::warn!(worker = self.name, error = %e, "worker task panicked");
        }
    }
}
