use crate::error::GatewayError;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// A proxy rule: regex match on the request path, forward to an upstream
/// origin with an optional path rewrite.
///
/// Serialized form (camelCase) is what the KV store and control plane see;
/// `readonly` is a runtime flag and never persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Rule {
    /// Stable identifier: `static-<index>` for configured rules, a UUID for
    /// rules created through the API.
    #[serde(default)]
    pub id: String,

    /// Display label, not used for matching
    #[serde(default)]
    pub name: String,

    /// Regex matched against the request path
    pub pattern: String,

    /// Upstream origin URL (scheme + host [+ port]); `${VAR}` references
    /// are resolved against the environment at compile time
    pub target: String,

    /// Forwarded-path template; `$1`..`$n` reference capture groups of
    /// `pattern`. Absent = forward the original path.
    #[serde(default)]
    pub rewrite: Option<String>,

    /// Replace `Host`/`Origin` on the forwarded request with the target's
    #[serde(default)]
    pub change_origin: bool,

    /// Certificate-validation hint, carried as metadata
    #[serde(default = "default_true")]
    pub secure: bool,

    /// Whether WebSocket upgrades matching this rule are intercepted
    #[serde(default = "default_true")]
    pub ws: bool,

    /// Headers set on the forwarded request after hop-by-hop scrubbing
    #[serde(default)]
    pub headers: HashMap<String, String>,

    /// If set and the upstream returns HTML, a `<base href>` element is
    /// injected at the start of `<head>`
    #[serde(default)]
    pub base: Option<String>,

    /// Rewrite absolute paths in HTML bodies to relative form
    #[serde(default)]
    pub relative_paths: bool,

    /// Micro-frontend embedding metadata, opaque to the relay
    #[serde(default)]
    pub fragment: Option<FragmentConfig>,

    /// True for rules from static configuration; such rules are never
    /// mutated through the API. Not persisted.
    #[serde(default, skip_serializing)]
    pub readonly: bool,
}

/// Micro-frontend embedding metadata, exposed through `/api/fragments`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FragmentConfig {
    /// Embedding strategy; defaults to "patch" when projected
    #[serde(default)]
    pub sandbox: Option<String>,

    /// Whether the fragment may join the host message bus; defaults true
    #[serde(default)]
    pub allow_message_bus: Option<bool>,

    /// Stylesheets the host should preload before mounting
    #[serde(default)]
    pub preload_styles: Vec<String>,
}

fn default_true() -> bool {
    true
}

/// A rule plus its pre-compiled matcher and environment-resolved target.
#[derive(Debug)]
pub struct CompiledRule {
    pub rule: Rule,
    regex: Regex,
    /// `target` after `${VAR}` substitution, trailing slash trimmed
    pub target: String,
}

impl CompiledRule {
    /// Compile a rule. Fails if `pattern` is not a valid regex or required
    /// fields are empty.
    pub fn compile(rule: Rule) -> Result<Self, GatewayError> {
        if rule.pattern.is_empty() {
            return Err(GatewayError::InvalidInput("pattern is required".into()));
        }
        if rule.target.is_empty() {
            return Err(GatewayError::InvalidInput("target is required".into()));
        }
        let regex = Regex::new(&rule.pattern)
            .map_err(|e| GatewayError::InvalidInput(format!("invalid pattern: {e}")))?;
        let target = resolve_env_refs(&rule.target)
            .trim_end_matches('/')
            .to_string();
        Ok(Self {
            rule,
            regex,
            target,
        })
    }

    pub fn id(&self) -> &str {
        &self.rule.id
    }

    /// Test the request path; returns capture groups 1..n on match.
    pub fn matches(&self, path: &str) -> Option<Vec<String>> {
        self.regex.captures(path).map(|caps| {
            (1..caps.len())
                .map(|i| caps.get(i).map(|m| m.as_str().to_string()).unwrap_or_default())
                .collect()
        })
    }

    /// Compute the forwarded path for a matched request. Returns the
    /// original path when the rule has no rewrite template; the result
    /// always begins with `/`.
    pub fn rewrite_path(&self, path: &str) -> String {
        let rewritten = match &self.rule.rewrite {
            Some(template) => match self.regex.captures(path) {
                Some(caps) => substitute_groups(template, &caps),
                None => path.to_string(),
            },
            None => path.to_string(),
        };
        if rewritten.starts_with('/') {
            rewritten
        } else {
            format!("/{rewritten}")
        }
    }
}

/// Substitute `$1`..`$n` backreferences against the captures of a match.
///
/// The regex crate's replace API treats `$1` as part of a replacement
/// template with its own escaping rules; an explicit scan keeps the
/// source semantics (`$0` and out-of-range groups substitute empty).
fn substitute_groups(template: &str, caps: &regex::Captures<'_>) -> String {
    let mut out = String::with_capacity(template.len());
    let mut chars = template.chars().peekable();
    while let Some(c) = chars.next() {
        if c != '$' {
            out.push(c);
            continue;
        }
        let mut num = String::new();
        while let Some(d) = chars.peek() {
            if d.is_ascii_digit() {
                num.push(*d);
                chars.next();
            } else {
                break;
            }
        }
        if num.is_empty() {
            out.push('$');
            continue;
        }
        let idx: usize = num.parse().unwrap_or(0);
        if idx > 0
            && let Some(m) = caps.get(idx)
        {
            out.push_str(m.as_str());
        }
    }
    out
}

/// Resolve `${VAR}` references against the process environment.
/// Unresolved names keep the literal `${VAR}` text.
pub fn resolve_env_refs(target: &str) -> String {
    let re = Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}").unwrap();
    re.replace_all(target, |caps: &regex::Captures<'_>| {
        std::env::var(&caps[1]).unwrap_or_else(|_| caps[0].to_string())
    })
    .into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rule(pattern: &str, target: &str, rewrite: Option<&str>) -> Rule {
        serde_json::from_value(serde_json::json!({
            "id": "r1",
            "pattern": pattern,
            "target": target,
            "rewrite": rewrite,
        }))
        .unwrap()
    }

    // ── Compilation ──────────────────────────────────────────────

    #[test]
    fn compile_valid_rule() {
        let compiled = CompiledRule::compile(rule("^/api/(.*)$", "http://backend:8080", None));
        assert!(compiled.is_ok());
    }

    #[test]
    fn compile_rejects_invalid_regex() {
        let err = CompiledRule::compile(rule("^/api/(", "http://backend:8080", None));
        assert!(matches!(err, Err(GatewayError::InvalidInput(_))));
    }

    #[test]
    fn compile_rejects_empty_pattern_or_target() {
        assert!(CompiledRule::compile(rule("", "http://x", None)).is_err());
        assert!(CompiledRule::compile(rule("^/x$", "", None)).is_err());
    }

    #[test]
    fn compile_trims_trailing_target_slash() {
        let c = CompiledRule::compile(rule("^/a$", "http://backend:8080/", None)).unwrap();
        assert_eq!(c.target, "http://backend:8080");
    }

    // ── Serde shape ──────────────────────────────────────────────

    #[test]
    fn serde_uses_camel_case_and_defaults() {
        let r: Rule = serde_json::from_value(serde_json::json!({
            "pattern": "^/x$",
            "target": "http://t",
            "changeOrigin": true,
            "relativePaths": true,
        }))
        .unwrap();
        assert!(r.change_origin);
        assert!(r.relative_paths);
        assert!(r.ws, "ws defaults to true");
        assert!(r.secure, "secure defaults to true");
        assert!(!r.readonly);
    }

    #[test]
    fn readonly_is_never_serialized() {
        let mut r = rule("^/x$", "http://t", None);
        r.readonly = true;
        let json = serde_json::to_value(&r).unwrap();
        assert!(json.get("readonly").is_none());
    }

    #[test]
    fn fragment_round_trip() {
        let r: Rule = serde_json::from_value(serde_json::json!({
            "pattern": "^/widget/(.*)$",
            "target": "http://widgets:3000",
            "fragment": {
                "sandbox": "iframe",
                "allowMessageBus": false,
                "preloadStyles": ["/widget/app.css"]
            }
        }))
        .unwrap();
        let f = r.fragment.unwrap();
        assert_eq!(f.sandbox.as_deref(), Some("iframe"));
        assert_eq!(f.allow_message_bus, Some(false));
        assert_eq!(f.preload_styles, vec!["/widget/app.css"]);
    }

    // ── Matching ─────────────────────────────────────────────────

    #[test]
    fn matches_returns_capture_groups() {
        let c = CompiledRule::compile(rule("^/api/([^/]+)/(.*)$", "http://t", None)).unwrap();
        let groups = c.matches("/api/users/42/avatar").unwrap();
        assert_eq!(groups, vec!["users", "42/avatar"]);
    }

    #[test]
    fn matches_none_on_miss() {
        let c = CompiledRule::compile(rule("^/api/(.*)$", "http://t", None)).unwrap();
        assert!(c.matches("/other").is_none());
    }

    // ── Rewrite ──────────────────────────────────────────────────

    #[test]
    fn rewrite_substitutes_groups() {
        let c =
            CompiledRule::compile(rule("^/api/(.*)$", "http://t", Some("/v1/$1"))).unwrap();
        assert_eq!(c.rewrite_path("/api/users"), "/v1/users");
    }

    #[test]
    fn rewrite_without_template_keeps_path() {
        let c = CompiledRule::compile(rule("^/api/(.*)$", "http://t", None)).unwrap();
        assert_eq!(c.rewrite_path("/api/users"), "/api/users");
    }

    #[test]
    fn rewrite_is_normalised_to_leading_slash() {
        let c = CompiledRule::compile(rule("^/api/(.*)$", "http://t", Some("$1"))).unwrap();
        assert_eq!(c.rewrite_path("/api/users"), "/users");
    }

    #[test]
    fn rewrite_multiple_groups() {
        let c = CompiledRule::compile(rule(
            "^/svc/([^/]+)/v([0-9]+)/(.*)$",
            "http://t",
            Some("/$2/$1/$3"),
        ))
        .unwrap();
        assert_eq!(c.rewrite_path("/svc/users/v2/list"), "/2/users/list");
    }

    #[test]
    fn rewrite_out_of_range_group_is_empty() {
        let c = CompiledRule::compile(rule("^/a/(.*)$", "http://t", Some("/x/$9"))).unwrap();
        assert_eq!(c.rewrite_path("/a/b"), "/x/");
    }

    #[test]
    fn rewrite_dollar_without_digits_is_literal() {
        let c = CompiledRule::compile(rule("^/a/(.*)$", "http://t", Some("/p$/$1"))).unwrap();
        assert_eq!(c.rewrite_path("/a/b"), "/p$/b");
    }

    #[test]
    fn rewrite_is_deterministic() {
        let c = CompiledRule::compile(rule("^/api/(.*)$", "http://t", Some("/v1/$1"))).unwrap();
        let a = c.rewrite_path("/api/users?ignored");
        let b = c.rewrite_path("/api/users?ignored");
        assert_eq!(a, b);
    }

    // ── Env substitution ─────────────────────────────────────────

    #[test]
    fn env_refs_resolved_and_unresolved() {
        unsafe {
            std::env::set_var("PORTICO_TEST_BACKEND", "http://resolved:9000");
        }
        assert_eq!(
            resolve_env_refs("${PORTICO_TEST_BACKEND}"),
            "http://resolved:9000"
        );
        assert_eq!(
            resolve_env_refs("http://${PORTICO_TEST_MISSING_VAR}:80"),
            "http://${PORTICO_TEST_MISSING_VAR}:80"
        );
        unsafe {
            std::env::remove_var("PORTICO_TEST_BACKEND");
        }
    }
}
