use crate::rule::{CompiledRule, Rule};
use arc_swap::ArcSwap;
use std::sync::{Arc, Mutex};
use tracing::warn;

/// Ordered rule table: static rules (from configuration, read-only) followed
/// by dynamic rules (KV-backed, mutable through the control plane).
///
/// The hot path reads an `ArcSwap` snapshot; matching never takes a lock.
/// Mutations rebuild the snapshot under a mutex.
pub struct RuleStore {
    snapshot: ArcSwap<Vec<Arc<CompiledRule>>>,
    inner: Mutex<Inner>,
}

struct Inner {
    statics: Vec<Arc<CompiledRule>>,
    dynamics: Vec<Arc<CompiledRule>>,
}

/// Result of a path match: the winning rule and its capture groups 1..n.
#[derive(Debug, Clone)]
pub struct RuleMatch {
    pub rule: Arc<CompiledRule>,
    pub groups: Vec<String>,
}

impl RuleStore {
    /// Build the store from configured static rules. Rules whose pattern
    /// fails to compile are dropped with a warning, never propagated.
    pub fn from_config(rules: Vec<Rule>) -> Self {
        let mut statics = Vec::with_capacity(rules.len());
        for (index, mut rule) in rules.into_iter().enumerate() {
            rule.id = format!("static-{index}");
            rule.readonly = true;
            let pattern = rule.pattern.clone();
            match CompiledRule::compile(rule) {
                Ok(compiled) => statics.push(Arc::new(compiled)),
                Err(e) => {
                    warn!(index, pattern = %pattern, error = %e, "Dropping static rule");
                }
            }
        }
        let store = Self {
            snapshot: ArcSwap::new(Arc::new(Vec::new())),
            inner: Mutex::new(Inner {
                statics,
                dynamics: Vec::new(),
            }),
        };
        store.rebuild();
        store
    }

    /// Append dynamic rules loaded from the KV store, in load order.
    /// Invalid patterns and duplicate ids are dropped with a warning.
    pub fn load_dynamic(&self, rules: Vec<Rule>) {
        {
            let mut inner = self.inner.lock().unwrap();
            for mut rule in rules {
                if rule.id.is_empty() {
                    warn!(pattern = %rule.pattern, "Dropping dynamic rule without id");
                    continue;
                }
                if contains_id(&inner, &rule.id) {
                    warn!(id = %rule.id, "Dropping dynamic rule with duplicate id");
                    continue;
                }
                rule.readonly = false;
                let id = rule.id.clone();
                match CompiledRule::compile(rule) {
                    Ok(compiled) => inner.dynamics.push(Arc::new(compiled)),
                    Err(e) => {
                        warn!(id = %id, error = %e, "Dropping dynamic rule");
                    }
                }
            }
        }
        self.rebuild();
    }

    /// Snapshot of all rules, static first, in matching order.
    pub fn all(&self) -> Arc<Vec<Arc<CompiledRule>>> {
        self.snapshot.load_full()
    }

    /// First-match scan over the snapshot.
    pub fn match_path(&self, path: &str) -> Option<RuleMatch> {
        let rules = self.snapshot.load();
        for rule in rules.iter() {
            if let Some(groups) = rule.matches(path) {
                return Some(RuleMatch {
                    rule: Arc::clone(rule),
                    groups,
                });
            }
        }
        None
    }

    pub fn get(&self, id: &str) -> Option<Arc<CompiledRule>> {
        self.snapshot
            .load()
            .iter()
            .find(|r| r.id() == id)
            .map(Arc::clone)
    }

    /// Whether `id` names a static (read-only) rule.
    pub fn is_static(&self, id: &str) -> bool {
        self.get(id).map(|r| r.rule.readonly).unwrap_or(false)
    }

    /// Append a dynamic rule. The caller has already persisted it.
    pub fn insert(&self, compiled: CompiledRule) {
        self.inner
            .lock()
            .unwrap()
            .dynamics
            .push(Arc::new(compiled));
        self.rebuild();
    }

    /// Replace a dynamic rule in place, keeping its position in matching
    /// order. Returns false if the id is unknown or static.
    pub fn replace(&self, id: &str, compiled: CompiledRule) -> bool {
        let replaced = {
            let mut inner = self.inner.lock().unwrap();
            match inner.dynamics.iter().position(|r| r.id() == id) {
                Some(index) => {
                    inner.dynamics[index] = Arc::new(compiled);
                    true
                }
                None => false,
            }
        };
        if replaced {
            self.rebuild();
        }
        replaced
    }

    /// Remove a dynamic rule. Returns false if the id is unknown or static.
    pub fn remove(&self, id: &str) -> bool {
        let removed = {
            let mut inner = self.inner.lock().unwrap();
            let before = inner.dynamics.len();
            inner.dynamics.retain(|r| r.id() != id);
            inner.dynamics.len() != before
        };
        if removed {
            self.rebuild();
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.snapshot.load().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn rebuild(&self) {
        let inner = self.inner.lock().unwrap();
        let mut all = Vec::with_capacity(inner.statics.len() + inner.dynamics.len());
        all.extend(inner.statics.iter().cloned());
        all.extend(inner.dynamics.iter().cloned());
        self.snapshot.store(Arc::new(all));
    }
}

fn contains_id(inner: &Inner, id: &str) -> bool {
    inner.statics.iter().any(|r| r.id() == id) || inner.dynamics.iter().any(|r| r.id() == id)
}

impl Default for RuleStore {
    fn default() -> Self {
        Self::from_config(Vec::new())
    }
}
