use crate::rule::Rule;
use figment::Figment;
use figment::providers::{Env, Format, Yaml};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::PathBuf;

/// Top-level configuration for the Portico gateway.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    /// Listener address (data plane + control plane share it)
    #[serde(default = "default_listen_addr")]
    pub listen_addr: SocketAddr,

    /// Base path the control-plane API is mounted under
    #[serde(default = "default_api_base")]
    pub api_base: String,

    /// Rate limiting (absent = limiter disabled)
    #[serde(default)]
    pub rate_limit: Option<RateLimitConfig>,

    /// CORS handling (absent = no CORS headers emitted)
    #[serde(default)]
    pub cors: Option<CorsConfig>,

    /// Response cache flag. The cache code path is disabled; the flag is
    /// only reported through the control plane.
    #[serde(default)]
    pub cache: CacheConfig,

    /// Shell application routing
    #[serde(default)]
    pub shell: ShellConfig,

    /// etcd-backed persistence (absent endpoints = in-memory only)
    #[serde(default)]
    pub etcd: EtcdConfig,

    /// Request log configuration
    #[serde(default)]
    pub log: LogConfig,

    /// Static proxy rules, matched before any dynamic rule
    #[serde(default)]
    pub rules: Vec<Rule>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    /// Requests admitted per window
    #[serde(default = "default_requests")]
    pub requests: u64,

    /// Window length, `"<N><unit>"` with unit one of s|m|h|d
    #[serde(default = "default_window")]
    pub window: String,

    /// Bucket key derivation
    #[serde(default)]
    pub key_by: KeyBy,

    /// Paths matching any of these regexes bypass the limiter entirely
    #[serde(default)]
    pub exclude_paths: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum KeyBy {
    #[default]
    Ip,
    User,
    /// Operator-provided key function. Config selects the mode; the
    /// function itself is installed programmatically on the gateway.
    /// Without one installed, admission keys fall back to the client IP.
    Function,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CorsConfig {
    /// `"*"`, a single origin, or a list of origins
    #[serde(default = "default_origin")]
    pub origin: CorsOrigin,

    #[serde(default)]
    pub credentials: bool,

    #[serde(default = "default_methods")]
    pub methods: Vec<String>,

    #[serde(default)]
    pub allowed_headers: Vec<String>,

    #[serde(default)]
    pub exposed_headers: Vec<String>,

    /// Preflight cache lifetime in seconds
    #[serde(default = "default_max_age")]
    pub max_age: u32,
}

/// Allowed origins: a single string (possibly `"*"`) or a list.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CorsOrigin {
    One(String),
    Many(Vec<String>),
}

impl CorsOrigin {
    pub fn is_wildcard(&self) -> bool {
        matches!(self, CorsOrigin::One(s) if s == "*")
    }

    /// Resolve the `Access-Control-Allow-Origin` value for a request origin.
    /// Wildcard configs emit `*`; list configs echo the origin when allowed.
    pub fn resolve(&self, request_origin: &str) -> Option<String> {
        match self {
            CorsOrigin::One(s) if s == "*" => Some("*".to_string()),
            CorsOrigin::One(s) if s == request_origin => Some(request_origin.to_string()),
            CorsOrigin::Many(list) if list.iter().any(|o| o == request_origin) => {
                Some(request_origin.to_string())
            }
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct CacheConfig {
    #[serde(default)]
    pub enabled: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ShellConfig {
    /// Directory of the shell worker application
    #[serde(default)]
    pub dir: Option<PathBuf>,

    /// Basenames that bypass the shell (config/env source)
    #[serde(default)]
    pub excludes: Vec<String>,
}

impl ShellConfig {
    pub fn enabled(&self) -> bool {
        self.dir.is_some()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EtcdConfig {
    /// etcd endpoint addresses; empty disables persistence
    #[serde(default)]
    pub endpoints: Vec<String>,

    /// Key prefix for gateway data
    #[serde(default = "default_etcd_prefix")]
    pub prefix: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    /// Ring buffer capacity for request observations
    #[serde(default = "default_log_buffer")]
    pub buffer_size: usize,
}

impl GatewayConfig {
    /// Load configuration from a YAML file + environment variables.
    ///
    /// `PORTICO_`-prefixed vars override file values (`PORTICO_LISTEN_ADDR`,
    /// `PORTICO_RATE_LIMIT__REQUESTS`, ...). The shell-specific
    /// `GATEWAY_SHELL_DIR` / `GATEWAY_SHELL_EXCLUDES` vars are applied last.
    pub fn load(config_path: Option<&str>) -> anyhow::Result<Self> {
        let mut figment = Figment::new();

        if let Some(path) = config_path {
            figment = figment.merge(Yaml::file(path));
        } else {
            for default_path in &["portico.yaml", "/etc/portico/portico.yaml"] {
                if std::path::Path::new(default_path).exists() {
                    figment = figment.merge(Yaml::file(default_path));
                    break;
                }
            }
        }

        figment = figment.merge(Env::prefixed("PORTICO_").split("__"));

        let mut config: Self = figment.extract()?;
        config.apply_shell_env();
        Ok(config)
    }

    /// Apply `GATEWAY_SHELL_DIR` / `GATEWAY_SHELL_EXCLUDES` overrides.
    pub fn apply_shell_env(&mut self) {
        if let Ok(dir) = std::env::var("GATEWAY_SHELL_DIR")
            && !dir.is_empty()
        {
            self.shell.dir = Some(PathBuf::from(dir));
        }
        if let Ok(list) = std::env::var("GATEWAY_SHELL_EXCLUDES") {
            self.shell.excludes = list
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect();
        }
    }

    /// Whether etcd persistence is configured.
    pub fn etcd_enabled(&self) -> bool {
        !self.etcd.endpoints.is_empty()
    }
}

/// Parse a window string like `"30s"`, `"1m"`, `"2h"`, `"1d"` into seconds.
pub fn parse_window(window: &str) -> anyhow::Result<u64> {
    let window = window.trim();
    let Some(unit) = window.chars().last() else {
        anyhow::bail!("empty window");
    };
    let value: u64 = window[..window.len() - unit.len_utf8()]
        .parse()
        .map_err(|_| anyhow::anyhow!("invalid window: {window:?}"))?;
    let secs = match unit {
        's' => value,
        'm' => value * 60,
        'h' => value * 3600,
        'd' => value * 86400,
        _ => anyhow::bail!("invalid window unit: {window:?}"),
    };
    if secs == 0 {
        anyhow::bail!("window must be non-zero: {window:?}");
    }
    Ok(secs)
}

// Defaults

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
            api_base: default_api_base(),
            rate_limit: None,
            cors: None,
            cache: CacheConfig::default(),
            shell: ShellConfig::default(),
            etcd: EtcdConfig::default(),
            log: LogConfig::default(),
            rules: vec![],
        }
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            requests: default_requests(),
            window: default_window(),
            key_by: KeyBy::Ip,
            exclude_paths: vec![],
        }
    }
}

impl Default for CorsConfig {
    fn default() -> Self {
        Self {
            origin: default_origin(),
            credentials: false,
            methods: default_methods(),
            allowed_headers: vec![],
            exposed_headers: vec![],
            max_age: default_max_age(),
        }
    }
}

impl Default for EtcdConfig {
    fn default() -> Self {
        Self {
            endpoints: vec![],
            prefix: default_etcd_prefix(),
        }
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            buffer_size: default_log_buffer(),
        }
    }
}

fn default_listen_addr() -> SocketAddr {
    "0.0.0.0:8080".parse().unwrap()
}

fn default_api_base() -> String {
    "/_gateway".to_string()
}

fn default_requests() -> u64 {
    100
}

fn default_window() -> String {
    "1m".to_string()
}

fn default_origin() -> CorsOrigin {
    CorsOrigin::One("*".to_string())
}

fn default_methods() -> Vec<String> {
    ["GET", "POST", "PUT", "DELETE", "PATCH", "OPTIONS"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

fn default_max_age() -> u32 {
    600
}

fn default_etcd_prefix() -> String {
    "/portico".to_string()
}

fn default_log_buffer() -> usize {
    100
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let cfg = GatewayConfig::default();
        assert_eq!(cfg.listen_addr.port(), 8080);
        assert_eq!(cfg.api_base, "/_gateway");
        assert!(cfg.rate_limit.is_none());
        assert!(cfg.cors.is_none());
        assert!(!cfg.cache.enabled);
        assert!(!cfg.shell.enabled());
        assert!(!cfg.etcd_enabled());
        assert_eq!(cfg.log.buffer_size, 100);
    }

    #[test]
    fn test_rate_limit_defaults() {
        let cfg: RateLimitConfig = serde_yaml::from_str("{}").unwrap();
        assert_eq!(cfg.requests, 100);
        assert_eq!(cfg.window, "1m");
        assert_eq!(cfg.key_by, KeyBy::Ip);
        assert!(cfg.exclude_paths.is_empty());
    }

    #[test]
    fn test_key_by_accepts_all_three_modes() {
        for (yaml, expected) in [
            ("key_by: ip", KeyBy::Ip),
            ("key_by: user", KeyBy::User),
            ("key_by: function", KeyBy::Function),
        ] {
            let cfg: RateLimitConfig = serde_yaml::from_str(yaml).unwrap();
            assert_eq!(cfg.key_by, expected, "{yaml}");
        }
    }

    #[test]
    fn test_parse_window() {
        assert_eq!(parse_window("30s").unwrap(), 30);
        assert_eq!(parse_window("1m").unwrap(), 60);
        assert_eq!(parse_window("2h").unwrap(), 7200);
        assert_eq!(parse_window("1d").unwrap(), 86400);
    }

    #[test]
    fn test_parse_window_rejects_garbage() {
        assert!(parse_window("").is_err());
        assert!(parse_window("10").is_err());
        assert!(parse_window("m").is_err());
        assert!(parse_window("0m").is_err());
        assert!(parse_window("10w").is_err());
    }

    #[test]
    fn test_cors_origin_wildcard() {
        let origin = CorsOrigin::One("*".into());
        assert!(origin.is_wildcard());
        assert_eq!(origin.resolve("https://a.example"), Some("*".into()));
    }

    #[test]
    fn test_cors_origin_list_echoes() {
        let origin = CorsOrigin::Many(vec![
            "https://a.example".into(),
            "https://b.example".into(),
        ]);
        assert_eq!(
            origin.resolve("https://b.example"),
            Some("https://b.example".into())
        );
        assert_eq!(origin.resolve("https://evil.example"), None);
    }

    #[test]
    fn test_cors_origin_single_literal() {
        let origin = CorsOrigin::One("https://a.example".into());
        assert!(!origin.is_wildcard());
        assert_eq!(
            origin.resolve("https://a.example"),
            Some("https://a.example".into())
        );
        assert_eq!(origin.resolve("https://b.example"), None);
    }

    #[test]
    fn test_yaml_round_trip() {
        let yaml = r#"
listen_addr: "127.0.0.1:9000"
rate_limit:
  requests: 5
  window: "30s"
  key_by: user
cors:
  origin: ["https://a.example"]
  credentials: true
shell:
  dir: /srv/shell
  excludes: ["admin", "metrics"]
rules:
  - pattern: "^/api/(.*)$"
    target: "http://backend:8080"
    rewrite: "/v1/$1"
"#;
        let cfg: GatewayConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(cfg.listen_addr.port(), 9000);
        let rl = cfg.rate_limit.unwrap();
        assert_eq!(rl.requests, 5);
        assert_eq!(rl.key_by, KeyBy::User);
        assert!(cfg.cors.unwrap().credentials);
        assert!(cfg.shell.enabled());
        assert_eq!(cfg.shell.excludes, vec!["admin", "metrics"]);
        assert_eq!(cfg.rules.len(), 1);
        assert_eq!(cfg.rules[0].rewrite.as_deref(), Some("/v1/$1"));
    }

    #[test]
    fn test_shell_env_overrides() {
        // Env mutation is process-wide; keep both assertions in one test.
        unsafe {
            std::env::set_var("GATEWAY_SHELL_DIR", "/srv/shell-env");
            std::env::set_var("GATEWAY_SHELL_EXCLUDES", "cpanel, api ,, tasks");
        }
        let mut cfg = GatewayConfig::default();
        cfg.apply_shell_env();
        assert_eq!(cfg.shell.dir.as_deref(), Some(std::path::Path::new("/srv/shell-env")));
        assert_eq!(cfg.shell.excludes, vec!["cpanel", "api", "tasks"]);
        unsafe {
            std::env::remove_var("GATEWAY_SHELL_DIR");
            std::env::remove_var("GATEWAY_SHELL_EXCLUDES");
        }
    }
}
