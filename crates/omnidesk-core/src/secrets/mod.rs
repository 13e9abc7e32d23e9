//! Secret handling.
//!
//! Provider tokens live in stored connection records; while in flight they
//! are wrapped in [`ApiKey`] so Debug/Display can never leak them, and
//! provider error text is passed through [`scrub_secrets`] before logging.

use secrecy::{ExposeSecret, SecretBox};

/// API key wrapper that prevents accidental logging.
#[derive(Clone)]
pub struct ApiKey(SecretBox<str>);

impl ApiKey {
    /// Wrap a credential.
    #[must_use]
    pub fn new(key: String) -> Self {
        Self(SecretBox::new(key.into_boxed_str()))
    }

    /// Expose the secret for an actual provider call.
    #[must_use]
    pub fn expose(&self) -> &str {
        self.0.expose_secret()
    }
}

impl std::fmt::Debug for ApiKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ApiKey([REDACTED])")
    }
}

impl std::fmt::Display for ApiKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[REDACTED]")
    }
}

/// Patterns that commonly precede a secret in provider error bodies.
pub const COMMON_SECRET_PATTERNS: &[&str] = &[
    "access_token=",
    "api_key=",
    "token=",
    "AuthToken=",
    "Authorization: Bearer ",
    "Authorization: Basic ",
];

/// Replace values following known secret patterns with `[REDACTED]`.
#[must_use]
pub fn scrub_secrets(text: &str, patterns: &[&str]) -> String {
    let mut result = text.to_string();

    for pattern in patterns {
        let mut search_start = 0;
        while let Some(start) = result[search_start..].find(pattern) {
            let abs_start = search_start + start + pattern.len();

            let end = result[abs_start..]
                .find(|c: char| c.is_whitespace() || c == '"' || c == '\'' || c == '&' || c == ',')
                .map_or(result.len(), |e| abs_start + e);

            result.replace_range(abs_start..end, "[REDACTED]");

            search_start = abs_start + "[REDACTED]".len();
        }
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_api_key_redaction() {
        let key = ApiKey::new("EAAG-secret-token".to_string());
        assert_eq!(format!("{key:?}"), "ApiKey([REDACTED])");
        assert_eq!(format!("{key}"), "[REDACTED]");
        assert_eq!(key.expose(), "EAAG-secret-token");
    }

    #[test]
    fn test_scrub_secrets() {
        let text = "request failed: access_token=EAAG123 status=401";
        let scrubbed = scrub_secrets(text, COMMON_SECRET_PATTERNS);
        assert_eq!(
            scrubbed,
            "request failed: access_token=[REDACTED] status=401"
        );
    }

    #[test]
    fn test_scrub_multiple_occurrences() {
        let text = "token=abc then token=def";
        let scrubbed = scrub_secrets(text, &["token="]);
        assert!(!scrubbed.contains("abc"));
        assert!(!scrubbed.contains("def"));
    }
}
