use once_cell::sync::Lazy;
use regex::Regex;

const MASK: &str = "***";

static SENSITIVE_ASSIGNMENT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r#"(?i)(["']?[a-z0-9_\-]*(?:token|secret|password|passwd|api[_\-]?key|authorization|cookie|session[_\-]?id)[a-z0-9_\-]*["']?\s*[:=]\s*)("[^"]*"|'[^']*'|[^\s,;}&]+)"#,
    )
    .expect("valid sensitive assignment regex")
});

static BEARER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\bbearer\s+[a-z0-9._~+/\-]+=*").expect("valid bearer regex")
});

/// Masks values that follow sensitive-looking keys and bearer credentials.
pub fn sanitize_text(input: &str) -> String {
    let masked = SENSITIVE_ASSIGNMENT.replace_all(input, |caps: &regex::Captures<'_>| {
        format!("{}{}", &caps[1], MASK)
    });
    BEARER
        .replace_all(&masked, format!("Bearer {MASK}").as_str())
        .into_owned()
}
