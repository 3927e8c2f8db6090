//! API key handling with secure memory.
//!
//! Keys are held in a `secrecy::SecretBox` so they never show up in logs,
//! `Debug` output, or error messages.

use secrecy::{ExposeSecret, SecretBox};
use std::fmt;

/// A model-provider API key.
pub struct ApiKey(SecretBox<str>);

impl ApiKey {
    pub fn new(value: impl Into<String>) -> Self {
        Self(SecretBox::new(value.into().into_boxed_str()))
    }

    /// Expose the key. Only call this when building the outgoing request.
    pub fn expose(&self) -> &str {
        self.0.expose_secret()
    }

    /// Whether the key looks masked (e.g. `sk-****`), as UIs show previews.
    pub fn looks_masked(&self) -> bool {
        self.expose().chars().any(|c| matches!(c, '*' | '•' | '●' | '·'))
    }
}

impl Clone for ApiKey {
    fn clone(&self) -> Self {
        Self::new(self.expose())
    }
}

impl fmt::Debug for ApiKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("[REDACTED]")
    }
}

impl From<String> for ApiKey {
    fn from(s: String) -> Self {
        Self::new(s)
    }
}

impl From<&str> for ApiKey {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_debug_is_redacted() {
        let key = ApiKey::new("sk-live-123");
        assert_eq!(format!("{:?}", key), "[REDACTED]");
        assert_eq!(key.expose(), "sk-live-123");
    }

    #[test]
    fn test_masked_detection() {
        assert!(ApiKey::new("sk-****abcd").looks_masked());
        assert!(!ApiKey::new("sk-abcd").looks_masked());
    }
}
