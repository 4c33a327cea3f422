use regex::Regex;
use std::sync::LazyLock;

// Deliberately regex-based, no DOM parsing: mirrors the conservative
// substitution behaviour of classic dev-proxy HTML munging. `[^/]` keeps
// protocol-relative (`//`) URLs untouched.
static ATTR_ABSOLUTE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"(src|href)="/([^/])"#).unwrap());
static QUOTED_ABSOLUTE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"'/([^/'])").unwrap());

/// Rewrite absolute paths (`src="/x"`, `href="/x"`, `'/x'` in inline
/// scripts) to relative form (`./x`). Protocol-relative URLs survive.
pub fn rewrite_relative_paths(html: &str) -> String {
    let html = ATTR_ABSOLUTE.replace_all(html, r#"$1="./$2"#);
    QUOTED_ABSOLUTE.replace_all(&html, "'./$1").into_owned()
}

/// Inject `<base href="{base}/" />` immediately after the first `<head>`
/// occurrence (case-sensitive). A trailing slash on `base` is idempotent.
pub fn inject_base(html: &str, base: &str) -> String {
    let href = if base.ends_with('/') {
        base.to_string()
    } else {
        format!("{base}/")
    };
    match html.find("<head>") {
        Some(pos) => {
            let insert_at = pos + "<head>".len();
            format!(
                r#"{}<base href="{href}" />{}"#,
                &html[..insert_at],
                &html[insert_at..]
            )
        }
        None => html.to_string(),
    }
}

/// Apply the per-rule HTML transforms: relative-path rewriting first, then
/// base injection.
pub fn post_process(html: &str, relative_paths: bool, base: Option<&str>) -> String {
    let mut body = if relative_paths {
        rewrite_relative_paths(html)
    } else {
        html.to_string()
    };
    if let Some(base) = base {
        body = inject_base(&body, base);
    }
    body
}
