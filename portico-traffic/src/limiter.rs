use chrono::{DateTime, Utc};
use dashmap::DashMap;
use portico_core::config::{parse_window, KeyBy, RateLimitConfig};
use regex::Regex;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tracing::{debug, warn};

/// Outcome of a single admission check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Decision {
    pub allowed: bool,
    /// Whole tokens left after this decision
    pub remaining: u64,
    /// Seconds until a token is available; 0 when allowed
    pub retry_after: u64,
}

/// Aggregate counters, monotone across the process lifetime.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct LimiterMetrics {
    pub total_requests: u64,
    pub allowed_requests: u64,
    pub blocked_requests: u64,
    pub active_buckets: usize,
}

/// Read-only view of one bucket, for the control plane.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BucketSnapshot {
    pub key: String,
    pub tokens: f64,
    pub capacity: f64,
    pub last_activity: DateTime<Utc>,
}

struct Bucket {
    tokens: f64,
    last_refill: Instant,
    /// Monotonic clock for ordering and eviction
    last_activity: Instant,
    /// Wall clock for display
    last_activity_at: DateTime<Utc>,
}

impl Bucket {
    fn new(capacity: f64, now: Instant) -> Self {
        Self {
            tokens: capacity,
            last_refill: now,
            last_activity: now,
            last_activity_at: Utc::now(),
        }
    }
}

/// Token-bucket rate limiter over a sharded per-key bucket map.
///
/// The refill + decrement for a key runs under its `DashMap` shard entry, so
/// concurrent admissions for one key serialise; aggregate counters are
/// atomics updated per decision. Read paths take snapshots and never block
/// admissions on other keys.
pub struct RateLimiter {
    capacity: f64,
    refill_rate: f64,
    window_secs: u64,
    exclude_patterns: Vec<Regex>,
    buckets: DashMap<String, Bucket>,
    total_requests: AtomicU64,
    allowed_requests: AtomicU64,
    blocked_requests: AtomicU64,
    cleanup_stop: Mutex<Option<watch::Sender<bool>>>,
}

impl RateLimiter {
    pub fn new(config: &RateLimitConfig) -> anyhow::Result<Self> {
        let window_secs = parse_window(&config.window)?;
        let capacity = config.requests as f64;
        let mut exclude_patterns = Vec::with_capacity(config.exclude_paths.len());
        for pattern in &config.exclude_paths {
            exclude_patterns.push(
                Regex::new(pattern)
                    .map_err(|e| anyhow::anyhow!("invalid exclude pattern {pattern:?}: {e}"))?,
            );
        }
        Ok(Self {
            capacity,
            refill_rate: capacity / window_secs as f64,
            window_secs,
            exclude_patterns,
            buckets: DashMap::new(),
            total_requests: AtomicU64::new(0),
            allowed_requests: AtomicU64::new(0),
            blocked_requests: AtomicU64::new(0),
            cleanup_stop: Mutex::new(None),
        })
    }

    pub fn capacity(&self) -> u64 {
        self.capacity as u64
    }

    pub fn window_secs(&self) -> u64 {
        self.window_secs
    }

    /// Whether `path` bypasses the limiter entirely (no counter movement).
    pub fn is_excluded(&self, path: &str) -> bool {
        self.exclude_patterns.iter().any(|re| re.is_match(path))
    }

    /// Admission check for `key`: lazily refill its bucket, then try to
    /// consume one token.
    pub fn is_allowed(&self, key: &str) -> Decision {
        let now = Instant::now();
        let decision = {
            let mut entry = self
                .buckets
                .entry(key.to_string())
                .or_insert_with(|| Bucket::new(self.capacity, now));
            let bucket = entry.value_mut();

            let elapsed = now.saturating_duration_since(bucket.last_refill).as_secs_f64();
            bucket.tokens = (bucket.tokens + elapsed * self.refill_rate).min(self.capacity);
            bucket.last_refill = now;
            bucket.last_activity = now;
            bucket.last_activity_at = Utc::now();

            if bucket.tokens >= 1.0 {
                bucket.tokens -= 1.0;
                Decision {
                    allowed: true,
                    remaining: bucket.tokens.floor() as u64,
                    retry_after: 0,
                }
            } else {
                Decision {
                    allowed: false,
                    remaining: bucket.tokens.floor() as u64,
                    retry_after: ((1.0 - bucket.tokens) / self.refill_rate).ceil() as u64,
                }
            }
        };

        self.total_requests.fetch_add(1, Ordering::Relaxed);
        if decision.allowed {
            self.allowed_requests.fetch_add(1, Ordering::Relaxed);
        } else {
            self.blocked_requests.fetch_add(1, Ordering::Relaxed);
        }
        decision
    }

    pub fn metrics(&self) -> LimiterMetrics {
        LimiterMetrics {
            total_requests: self.total_requests.load(Ordering::Relaxed),
            allowed_requests: self.allowed_requests.load(Ordering::Relaxed),
            blocked_requests: self.blocked_requests.load(Ordering::Relaxed),
            active_buckets: self.buckets.len(),
        }
    }

    /// Snapshot of all buckets, most recently active first.
    pub fn active_buckets(&self) -> Vec<BucketSnapshot> {
        let mut snapshots: Vec<(Instant, BucketSnapshot)> = self
            .buckets
            .iter()
            .map(|entry| {
                let b = entry.value();
                (
                    b.last_activity,
                    BucketSnapshot {
                        key: entry.key().clone(),
                        tokens: b.tokens,
                        capacity: self.capacity,
                        last_activity: b.last_activity_at,
                    },
                )
            })
            .collect();
        snapshots.sort_by(|a, b| b.0.cmp(&a.0));
        snapshots.into_iter().map(|(_, s)| s).collect()
    }

    pub fn clear_bucket(&self, key: &str) -> bool {
        self.buckets.remove(key).is_some()
    }

    /// Removes every bucket; returns how many were dropped.
    pub fn clear_all_buckets(&self) -> usize {
        let count = self.buckets.len();
        self.buckets.clear();
        count
    }

    /// Drop buckets that have refilled back to capacity: no pressure and
    /// at least the deficit's worth of the window has elapsed unused.
    pub fn sweep_idle(&self) -> usize {
        let now = Instant::now();
        let before = self.buckets.len();
        self.buckets.retain(|_, bucket| {
            let elapsed = now.saturating_duration_since(bucket.last_refill).as_secs_f64();
            let projected = (bucket.tokens + elapsed * self.refill_rate).min(self.capacity);
            projected < self.capacity
        });
        let removed = before - self.buckets.len();
        if removed > 0 {
            debug!(removed, "Evicted idle rate-limit buckets");
        }
        removed
    }

    /// Start the periodic idle-bucket sweep. Call [`stop_cleanup`] to
    /// disarm it; starting again replaces any previous sweeper.
    ///
    /// [`stop_cleanup`]: Self::stop_cleanup
    pub fn start_cleanup(self: &std::sync::Arc<Self>, interval: Duration) {
        let (tx, mut rx) = watch::channel(false);
        if let Some(previous) = self.cleanup_stop.lock().unwrap().replace(tx) {
            let _ = previous.send(true);
        }
        let limiter = std::sync::Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        limiter.sweep_idle();
                    }
                    changed = rx.changed() => {
                        if changed.is_err() || *rx.borrow() {
                            break;
                        }
                    }
                }
            }
        });
    }

    pub fn stop_cleanup(&self) {
        if let Some(tx) = self.cleanup_stop.lock().unwrap().take()
            && tx.send(true).is_err()
        {
            warn!("Bucket cleanup task already gone");
        }
    }

    /// Reset aggregate counters. Test hook only; production counters are
    /// monotone for the process lifetime.
    pub fn reset_metrics(&self) {
        self.total_requests.store(0, Ordering::Relaxed);
        self.allowed_requests.store(0, Ordering::Relaxed);
        self.blocked_requests.store(0, Ordering::Relaxed);
    }
}

/// Client IP per the forwarding headers: first `X-Forwarded-For` entry,
/// then `X-Real-IP`, then `"unknown"`.
pub fn client_ip(forwarded_for: Option<&str>, real_ip: Option<&str>) -> String {
    if let Some(xff) = forwarded_for
        && let Some(first) = xff.split(',').next()
    {
        let first = first.trim();
        if !first.is_empty() {
            return first.to_string();
        }
    }
    if let Some(ip) = real_ip {
        let ip = ip.trim();
        if !ip.is_empty() {
            return ip.to_string();
        }
    }
    "unknown".to_string()
}

/// Derive the bucket key for a request from its headers. `user` mode
/// parses `X-Identity` as JSON and keys on `user:<sub>`, falling back to
/// the client IP. `function` mode is resolved by the caller holding the
/// installed key function; reaching here in that mode means none is
/// installed, and the client IP is used.
pub fn derive_key(
    key_by: KeyBy,
    forwarded_for: Option<&str>,
    real_ip: Option<&str>,
    identity: Option<&str>,
) -> String {
    match key_by {
        KeyBy::Ip | KeyBy::Function => client_ip(forwarded_for, real_ip),
        KeyBy::User => identity
            .and_then(|raw| serde_json::from_str::<serde_json::Value>(raw).ok())
            .and_then(|v| v.get("sub").and_then(|s| s.as_str()).map(String::from))
            .map(|sub| format!("user:{sub}"))
            .unwrap_or_else(|| client_ip(forwarded_for, real_ip)),
    }
}
