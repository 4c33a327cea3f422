use portico_core::config::ShellConfig;
use portico_core::GatewayError;
use std::path::Path;
use std::sync::RwLock;

/// Cookie carrying per-request exclude basenames. The name is matched
/// case-insensitively (the lowercase spelling is accepted too).
pub const SHELL_EXCLUDES_COOKIE: &str = "GATEWAY_SHELL_EXCLUDES";

/// Decides whether a navigation is served by the shell worker application
/// or passes through to the proxy pipeline.
///
/// Bypass basenames come from three sources: configuration/environment
/// (immutable), the persisted keyval set (mutated through the control
/// plane, mirrored here), and a per-request cookie (additive, request
/// scoped, never stored).
pub struct ShellRouter {
    config: ShellConfig,
    api_base: String,
    keyval: RwLock<Vec<String>>,
}

impl ShellRouter {
    pub fn new(config: ShellConfig, api_base: String) -> Self {
        Self {
            config,
            api_base,
            keyval: RwLock::new(Vec::new()),
        }
    }

    pub fn enabled(&self) -> bool {
        self.config.enabled()
    }

    pub fn dir(&self) -> Option<&Path> {
        self.config.dir.as_deref()
    }

    pub fn config(&self) -> &ShellConfig {
        &self.config
    }

    /// Env-source exclude basenames, in configuration order.
    pub fn env_excludes(&self) -> &[String] {
        &self.config.excludes
    }

    pub fn is_env_exclude(&self, name: &str) -> bool {
        self.config.excludes.iter().any(|e| e == name)
    }

    /// Replace the in-memory keyval set (startup load from the KV).
    pub fn load_keyval(&self, excludes: Vec<String>) {
        *self.keyval.write().unwrap() = excludes;
    }

    pub fn keyval_excludes(&self) -> Vec<String> {
        self.keyval.read().unwrap().clone()
    }

    /// Memory-side insert; the caller persists first. True iff changed.
    pub fn insert_keyval(&self, name: &str) -> bool {
        let mut keyval = self.keyval.write().unwrap();
        if keyval.iter().any(|e| e == name) {
            return false;
        }
        keyval.push(name.to_string());
        true
    }

    /// Memory-side removal; the caller persists first. True iff changed.
    pub fn remove_keyval(&self, name: &str) -> bool {
        let mut keyval = self.keyval.write().unwrap();
        let before = keyval.len();
        keyval.retain(|e| e != name);
        keyval.len() != before
    }

    /// Validate a basename for exclude-set mutations.
    pub fn check_basename(&self, name: &str) -> Result<(), GatewayError> {
        if !is_valid_basename(name) {
            return Err(GatewayError::InvalidInput(format!(
                "invalid basename: {name:?}"
            )));
        }
        Ok(())
    }

    /// Whether the shell serves this request.
    ///
    /// True iff a shell is configured, the path is not a control-plane
    /// path, the first path segment is not excluded (env, keyval, or the
    /// request's cookie), and the request is a document navigation or a
    /// root-level asset that is not an embed.
    pub fn owns(&self, path: &str, sec_fetch_dest: Option<&str>, cookie: Option<&str>) -> bool {
        if !self.enabled() {
            return false;
        }
        if path.starts_with(self.api_base.as_str()) {
            return false;
        }

        let mut segments = path.split('/').filter(|s| !s.is_empty());
        if let Some(basename) = segments.next() {
            if self.is_env_exclude(basename) {
                return false;
            }
            if self.keyval.read().unwrap().iter().any(|e| e == basename) {
                return false;
            }
            if cookie_excludes(cookie).iter().any(|e| e == basename) {
                return false;
            }
        }

        if sec_fetch_dest == Some("document") {
            return true;
        }
        let has_second_segment = segments.next().is_some();
        !has_second_segment && !matches!(sec_fetch_dest, Some("iframe" | "embed" | "object"))
    }
}

/// `^[A-Za-z0-9_-]+$`
pub fn is_valid_basename(name: &str) -> bool {
    !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

/// Parse the request's `GATEWAY_SHELL_EXCLUDES` cookie into basenames.
/// Malformed names are filtered out; the cookie never mutates state.
pub fn cookie_excludes(cookie_header: Option<&str>) -> Vec<String> {
    let Some(header) = cookie_header else {
        return Vec::new();
    };
    let mut names = Vec::new();
    for pair in header.split(';') {
        let Some((name, value)) = pair.split_once('=') else {
            continue;
        };
        if !name.trim().eq_ignore_ascii_case(SHELL_EXCLUDES_COOKIE) {
            continue;
        }
        for entry in value.split(',') {
            let entry = entry.trim();
            if is_valid_basename(entry) {
                names.push(entry.to_string());
            }
        }
    }
    names
}
