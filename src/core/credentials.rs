use tracing::{info, warn};

pub const OPENAI_API_KEY: &str = "OPENAI_API_KEY";
pub const ANTHROPIC_API_KEY: &str = "ANTHROPIC_API_KEY";
pub const GOOGLE_API_KEY: &str = "GOOGLE_API_KEY";

/// API keys for the hosted vendors. Ollama needs none.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Credentials {
    pub openai: Option<String>,
    pub anthropic: Option<String>,
    pub google: Option<String>,
}

impl Credentials {
    /// Reads keys from the process environment after loading `.env`, if any.
    pub fn from_env() -> Self {
        let _ = dotenvy::dotenv();
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let read = |name: &str| lookup(name).filter(|value| !value.trim().is_empty());
        Self {
            openai: read(OPENAI_API_KEY),
            anthropic: read(ANTHROPIC_API_KEY),
            google: read(GOOGLE_API_KEY),
        }
    }

    /// Logs which keys are present. Missing keys are only a warning; the
    /// vendor rejects the request later if it needs one.
    pub fn report(&self) {
        report_key("OpenAI", self.openai.as_deref(), 8);
        report_key("Anthropic", self.anthropic.as_deref(), 7);
        report_key("Google", self.google.as_deref(), 8);
    }
}

fn report_key(vendor: &str, key: Option<&str>, shown: usize) {
    match key {
        Some(key) => info!(
            "{} API Key exists and begins {}",
            vendor,
            key_prefix(key, shown)
        ),
        None => warn!("{} API Key not set", vendor),
    }
}

/// First `chars` characters of `key`, never splitting a code point.
pub fn key_prefix(key: &str, chars: usize) -> &str {
    match key.char_indices().nth(chars) {
        Some((idx, _)) => &key[..idx],
        None => key,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn reads_each_vendor_key() {
        let creds = Credentials::from_lookup(lookup(&[
            (OPENAI_API_KEY, "sk-proj-123"),
            (ANTHROPIC_API_KEY, "sk-ant-456"),
            (GOOGLE_API_KEY, "AIza789"),
        ]));

        assert_eq!(creds.openai.as_deref(), Some("sk-proj-123"));
        assert_eq!(creds.anthropic.as_deref(), Some("sk-ant-456"));
        assert_eq!(creds.google.as_deref(), Some("AIza789"));
    }

    #[test]
    fn blank_values_count_as_missing() {
        let creds = Credentials::from_lookup(lookup(&[(OPENAI_API_KEY, "  "), (GOOGLE_API_KEY, "")]));
        assert_eq!(creds, Credentials::default());
    }

    #[test]
    fn prefix_is_truncated() {
        assert_eq!(key_prefix("sk-proj-abcdef", 8), "sk-proj-");
        assert_eq!(key_prefix("sk-ant-api03", 7), "sk-ant-");
        assert_eq!(key_prefix("short", 8), "short");
    }

    #[test]
    fn prefix_respects_char_boundaries() {
        assert_eq!(key_prefix("ключ-секрет", 4), "ключ");
    }
}
