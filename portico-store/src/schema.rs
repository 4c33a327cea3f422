/// Key layout for gateway data in the external KV store.
///
/// Keys are structured tuples joined under a root prefix:
/// `("proxy","rules",<id>)` for dynamic rules,
/// `("gateway","metrics","history")` for the snapshot history,
/// `("gateway","shell","excludes")` for the persisted exclude list.
pub struct Schema {
    prefix: String,
}

impl Schema {
    pub fn new(prefix: &str) -> Self {
        Self {
            prefix: prefix.trim_end_matches('/').to_string(),
        }
    }

    /// Join key segments under the root prefix.
    pub fn key(&self, segments: &[&str]) -> String {
        let mut key = self.prefix.clone();
        for seg in segments {
            key.push('/');
            key.push_str(seg);
        }
        key
    }

    /// Prefix form of a key, for range listings.
    pub fn prefix(&self, segments: &[&str]) -> String {
        let mut key = self.key(segments);
        key.push('/');
        key
    }

    pub fn rules_prefix(&self) -> String {
        self.prefix(&["proxy", "rules"])
    }

    pub fn rule_key(&self, id: &str) -> String {
        self.key(&["proxy", "rules", id])
    }

    pub fn metrics_history_key(&self) -> String {
        self.key(&["gateway", "metrics", "history"])
    }

    pub fn shell_excludes_key(&self) -> String {
        self.key(&["gateway", "shell", "excludes"])
    }
}

impl Default for Schema {
    fn default() -> Self {
        Self::new("/portico")
    }
}
