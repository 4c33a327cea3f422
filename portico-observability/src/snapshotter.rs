use chrono::Utc;
use portico_store::{KvAdapter, MetricsSnapshot};
use portico_traffic::RateLimiter;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// Default sampling cadence.
pub const SNAPSHOT_INTERVAL_MS: u64 = 1_000;

/// Periodic sampler: reads the limiter aggregates on a ticker and appends
/// a snapshot to the KV-backed history list. Persistence failures are
/// logged and never terminate the ticker.
pub struct Snapshotter {
    stop: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

impl Snapshotter {
    pub fn start(limiter: Arc<RateLimiter>, kv: KvAdapter, interval: Duration) -> Self {
        let (stop, mut rx) = watch::channel(false);
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            // The first tick fires immediately; skip it so samples are
            // spaced a full interval apart.
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let metrics = limiter.metrics();
                        let snapshot = MetricsSnapshot {
                            timestamp: Utc::now(),
                            total_requests: metrics.total_requests,
                            allowed_requests: metrics.allowed_requests,
                            blocked_requests: metrics.blocked_requests,
                            active_buckets: metrics.active_buckets,
                        };
                        if let Err(e) = kv.append_snapshot(snapshot).await {
                            warn!(error = %e, "Failed to persist metrics snapshot");
                        }
                    }
                    changed = rx.changed() => {
                        if changed.is_err() || *rx.borrow() {
                            break;
                        }
                    }
                }
            }
            info!("Metrics snapshotter stopped");
        });
        Self { stop, handle }
    }

    /// Disarm the ticker and wait for the task to exit.
    pub async fn stop(self) {
        let _ = self.stop.send(true);
        let _ = self.handle.await;
    }
}
