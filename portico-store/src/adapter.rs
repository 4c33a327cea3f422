use crate::kv::KvStore;
use chrono::{DateTime, Utc};
use portico_core::rule::Rule;
use portico_core::GatewayError;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::warn;

/// Maximum number of metrics snapshots retained in the KV history list.
pub const MAX_HISTORY: usize = 3600;

const RULES: [&str; 2] = ["proxy", "rules"];
const METRICS_HISTORY: [&str; 3] = ["gateway", "metrics", "history"];
const SHELL_EXCLUDES: [&str; 3] = ["gateway", "shell", "excludes"];

/// A point-in-time sample of the limiter aggregates.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MetricsSnapshot {
    pub timestamp: DateTime<Utc>,
    pub total_requests: u64,
    pub allowed_requests: u64,
    pub blocked_requests: u64,
    pub active_buckets: usize,
}

/// A shell-exclude basename tagged with where it came from.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ShellExcludeEntry {
    pub basename: String,
    /// `"env"` or `"keyval"`
    pub source: String,
}

/// Typed access to gateway data in the external KV.
///
/// Constructed without a store, every operation degrades to a no-op (reads
/// return empty, rule writes fail with `Unavailable`); persistence is off
/// but the in-memory gateway keeps working.
#[derive(Clone, Default)]
pub struct KvAdapter {
    store: Option<Arc<dyn KvStore>>,
}

impl KvAdapter {
    pub fn new(store: Arc<dyn KvStore>) -> Self {
        Self { store: Some(store) }
    }

    pub fn disabled() -> Self {
        Self { store: None }
    }

    pub fn enabled(&self) -> bool {
        self.store.is_some()
    }

    fn require(&self) -> Result<&Arc<dyn KvStore>, GatewayError> {
        self.store
            .as_ref()
            .ok_or_else(|| GatewayError::Unavailable("KV store is not enabled".into()))
    }

    // ── Dynamic rules ────────────────────────────────────────────

    /// Load every persisted rule, skipping undecodable entries.
    pub async fn load_rules(&self) -> Vec<Rule> {
        let Some(store) = &self.store else {
            return Vec::new();
        };
        let entries = match store.list(&RULES).await {
            Ok(entries) => entries,
            Err(e) => {
                warn!(error = %e, "Failed to list persisted rules");
                return Vec::new();
            }
        };
        let mut rules = Vec::with_capacity(entries.len());
        for (key, value) in entries {
            match serde_json::from_slice::<Rule>(&value) {
                Ok(rule) => rules.push(rule),
                Err(e) => warn!(key = %key, error = %e, "Skipping undecodable rule"),
            }
        }
        rules
    }

    pub async fn put_rule(&self, rule: &Rule) -> Result<(), GatewayError> {
        let store = self.require()?;
        let value = serde_json::to_vec(rule)?;
        store.set(&[RULES[0], RULES[1], &rule.id], value).await
    }

    pub async fn delete_rule(&self, id: &str) -> Result<(), GatewayError> {
        let store = self.require()?;
        store.delete(&[RULES[0], RULES[1], id]).await?;
        Ok(())
    }

    // ── Metrics history ──────────────────────────────────────────

    /// The most recent `limit` snapshots, newest first.
    pub async fn metrics_history(&self, limit: usize) -> Vec<MetricsSnapshot> {
        let mut history = self.read_history().await;
        history.reverse();
        history.truncate(limit);
        history
    }

    /// Append a snapshot, trimming the list front to [`MAX_HISTORY`].
    pub async fn append_snapshot(&self, snapshot: MetricsSnapshot) -> Result<(), GatewayError> {
        let Some(store) = &self.store else {
            return Ok(());
        };
        let mut history = self.read_history().await;
        history.push(snapshot);
        if history.len() > MAX_HISTORY {
            let excess = history.len() - MAX_HISTORY;
            history.drain(..excess);
        }
        let value = serde_json::to_vec(&history)?;
        store.set(&METRICS_HISTORY, value).await
    }

    pub async fn clear_metrics_history(&self) -> Result<(), GatewayError> {
        let Some(store) = &self.store else {
            return Ok(());
        };
        store.delete(&METRICS_HISTORY).await?;
        Ok(())
    }

    async fn read_history(&self) -> Vec<MetricsSnapshot> {
        let Some(store) = &self.store else {
            return Vec::new();
        };
        match store.get(&METRICS_HISTORY).await {
            Ok(Some(bytes)) => serde_json::from_slice(&bytes).unwrap_or_else(|e| {
                warn!(error = %e, "Metrics history is undecodable, resetting");
                Vec::new()
            }),
            Ok(None) => Vec::new(),
            Err(e) => {
                warn!(error = %e, "Failed to read metrics history");
                Vec::new()
            }
        }
    }

    // ── Shell excludes ───────────────────────────────────────────

    /// Persisted (keyval-source) exclude basenames.
    pub async fn shell_excludes(&self) -> Vec<String> {
        let Some(store) = &self.store else {
            return Vec::new();
        };
        match store.get(&SHELL_EXCLUDES).await {
            Ok(Some(bytes)) => serde_json::from_slice(&bytes).unwrap_or_default(),
            Ok(None) => Vec::new(),
            Err(e) => {
                warn!(error = %e, "Failed to read shell excludes");
                Vec::new()
            }
        }
    }

    /// Idempotent append; true iff the persisted set changed.
    pub async fn add_shell_exclude(&self, name: &str) -> Result<bool, GatewayError> {
        let Some(store) = &self.store else {
            return Ok(false);
        };
        let mut excludes = self.shell_excludes().await;
        if excludes.iter().any(|e| e == name) {
            return Ok(false);
        }
        excludes.push(name.to_string());
        let value = serde_json::to_vec(&excludes)?;
        store.set(&SHELL_EXCLUDES, value).await?;
        Ok(true)
    }

    /// Returns true iff the persisted set changed.
    pub async fn remove_shell_exclude(&self, name: &str) -> Result<bool, GatewayError> {
        let Some(store) = &self.store else {
            return Ok(false);
        };
        let mut excludes = self.shell_excludes().await;
        let before = excludes.len();
        excludes.retain(|e| e != name);
        if excludes.len() == before {
            return Ok(false);
        }
        let value = serde_json::to_vec(&excludes)?;
        store.set(&SHELL_EXCLUDES, value).await?;
        Ok(true)
    }

    /// Merged env + keyval entries: env first, keyval duplicates suppressed.
    pub async fn all_shell_excludes(&self, env: &[String]) -> Vec<ShellExcludeEntry> {
        merge_excludes(env, self.shell_excludes().await)
    }
}

/// Env entries first, then keyval entries not shadowed by env.
pub fn merge_excludes(env: &[String], keyval: Vec<String>) -> Vec<ShellExcludeEntry> {
    let mut merged: Vec<ShellExcludeEntry> = env
        .iter()
        .map(|basename| ShellExcludeEntry {
            basename: basename.clone(),
            source: "env".to_string(),
        })
        .collect();
    for basename in keyval {
        if !env.contains(&basename) {
            merged.push(ShellExcludeEntry {
                basename,
                source: "keyval".to_string(),
            });
        }
    }
    merged
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kv::MemoryStore;

    fn adapter() -> KvAdapter {
        KvAdapter::new(Arc::new(MemoryStore::new()))
    }

    fn snapshot(total: u64) -> MetricsSnapshot {
        MetricsSnapshot {
            timestamp: Utc::now(),
            total_requests: total,
            allowed_requests: total,
            blocked_requests: 0,
            active_buckets: 1,
        }
    }

    fn rule(id: &str) -> Rule {
        serde_json::from_value(serde_json::json!({
            "id": id,
            "pattern": "^/api/(.*)$",
            "target": "http://backend:8080",
        }))
        .unwrap()
    }

    // ── Rules ────────────────────────────────────────────────────

    #[tokio::test]
    async fn rule_round_trip() {
        let kv = adapter();
        kv.put_rule(&rule("r1")).await.unwrap();
        kv.put_rule(&rule("r2")).await.unwrap();

        let loaded = kv.load_rules().await;
        assert_eq!(loaded.len(), 2);
        assert!(loaded.iter().any(|r| r.id == "r1"));

        kv.delete_rule("r1").await.unwrap();
        assert_eq!(kv.load_rules().await.len(), 1);
    }

    #[tokio::test]
    async fn load_rules_skips_undecodable_entries() {
        let store = Arc::new(MemoryStore::new());
        store
            .set(&["proxy", "rules", "bad"], b"not-json".to_vec())
            .await
            .unwrap();
        let kv = KvAdapter::new(store);
        kv.put_rule(&rule("good")).await.unwrap();

        let loaded = kv.load_rules().await;
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].id, "good");
    }

    #[tokio::test]
    async fn rule_writes_require_a_store() {
        let kv = KvAdapter::disabled();
        assert!(matches!(
            kv.put_rule(&rule("r1")).await,
            Err(GatewayError::Unavailable(_))
        ));
        assert!(kv.delete_rule("r1").await.is_err());
        assert!(kv.load_rules().await.is_empty());
    }

    // ── Metrics history ──────────────────────────────────────────

    #[tokio::test]
    async fn history_is_newest_first_and_limited() {
        let kv = adapter();
        for i in 0..5 {
            kv.append_snapshot(snapshot(i)).await.unwrap();
        }
        let history = kv.metrics_history(3).await;
        assert_eq!(history.len(), 3);
        assert_eq!(history[0].total_requests, 4, "newest first");
        assert_eq!(history[2].total_requests, 2);
    }

    #[tokio::test]
    async fn history_is_trimmed_to_max() {
        let kv = adapter();
        // Seed a full history directly, then push one more.
        let full: Vec<MetricsSnapshot> = (0..MAX_HISTORY as u64).map(snapshot).collect();
        let store = kv.store.as_ref().unwrap();
        store
            .set(&METRICS_HISTORY, serde_json::to_vec(&full).unwrap())
            .await
            .unwrap();

        kv.append_snapshot(snapshot(9999)).await.unwrap();
        let history = kv.metrics_history(MAX_HISTORY + 10).await;
        assert_eq!(history.len(), MAX_HISTORY);
        assert_eq!(history[0].total_requests, 9999);
        // The oldest entry (0) fell off the front.
        assert_eq!(history.last().unwrap().total_requests, 1);
    }

    #[tokio::test]
    async fn clear_history_empties_the_list() {
        let kv = adapter();
        kv.append_snapshot(snapshot(1)).await.unwrap();
        kv.clear_metrics_history().await.unwrap();
        assert!(kv.metrics_history(10).await.is_empty());
    }

    #[tokio::test]
    async fn history_without_store_is_empty_and_append_is_noop() {
        let kv = KvAdapter::disabled();
        kv.append_snapshot(snapshot(1)).await.unwrap();
        assert!(kv.metrics_history(10).await.is_empty());
    }

    // ── Shell excludes ───────────────────────────────────────────

    #[tokio::test]
    async fn add_is_idempotent() {
        let kv = adapter();
        assert!(kv.add_shell_exclude("cpanel").await.unwrap());
        assert!(!kv.add_shell_exclude("cpanel").await.unwrap());
        assert_eq!(kv.shell_excludes().await, vec!["cpanel"]);
    }

    #[tokio::test]
    async fn remove_reports_change() {
        let kv = adapter();
        kv.add_shell_exclude("cpanel").await.unwrap();
        assert!(kv.remove_shell_exclude("cpanel").await.unwrap());
        assert!(!kv.remove_shell_exclude("cpanel").await.unwrap());
        assert!(kv.shell_excludes().await.is_empty());
    }

    #[tokio::test]
    async fn merged_excludes_put_env_first_and_suppress_duplicates() {
        let kv = adapter();
        kv.add_shell_exclude("cpanel").await.unwrap();
        kv.add_shell_exclude("metrics").await.unwrap();

        let env = vec!["metrics".to_string(), "admin".to_string()];
        let merged = kv.all_shell_excludes(&env).await;
        let labels: Vec<_> = merged
            .iter()
            .map(|e| format!("{}:{}", e.basename, e.source))
            .collect();
        assert_eq!(labels, vec!["metrics:env", "admin:env", "cpanel:keyval"]);
    }

    #[tokio::test]
    async fn excludes_without_store_noop() {
        let kv = KvAdapter::disabled();
        assert!(!kv.add_shell_exclude("x").await.unwrap());
        assert!(!kv.remove_shell_exclude("x").await.unwrap());
        assert!(kv.shell_excludes().await.is_empty());
    }
}
