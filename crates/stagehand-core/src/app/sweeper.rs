use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::runtime::TaskRuntime;

/// Expiration sweeper handle.
/// - `interval` ごとに `TaskRuntime::purge_expired` を呼ぶ
/// - `shutdown_and_join()` で停止を待てる
pub struct ExpirationSweeper {
    shutdown_tx: watch::Sender<bool>,
    join: JoinHandle<()>,
}

impl ExpirationSweeper {
    pub fn spawn(runtime: TaskRuntime, interval: Duration) -> Self {
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
        let join = tokio::spawn(async move {
            sweep_loop(runtime, interval, &mut shutdown_rx).await;
        });
        Self { shutdown_tx, join }
    }

    /// Request shutdown. An in-flight sweep finishes first.
    pub fn request_shutdown(&self) {
        // receiver may already be gone
        let _ = self.shutdown_tx.send(true);
    }

    pub async fn shutdown_and_join(self) {
        self.request_shutdown();
        let _ = self.join.await;
    }
}

async fn sweep_loop(
    runtime: TaskRuntime,
    interval: Duration,
    shutdown_rx: &mut watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        if *shutdown_rx.borrow() {
            break;
        }

        tokio::select! {
            _ = shutdown_rx.changed() => continue,
            _ = ticker.tick() => {}
        }

        match runtime.purge_expired().await {
            Ok(purged) if !purged.is_empty() => {
                debug!(count = purged.len(), "Purged expired tasks");
            }
            Ok(_) => {}
            Err(e) => warn!(error = %e, "Expiration sweep failed"),
        }
    }
}
