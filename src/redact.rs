//! Log-safe rendering of secrets.

/// First six characters of a token, safe to log.
#[must_use]
pub fn redact_token(token: &str) -> String {
    if token.is_empty() {
        return "<empty>".to_string();
    }
    let prefix: String = token.chars().take(6).collect();
    format!("{prefix}…")
}
