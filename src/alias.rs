//! Model alias resolution.
//!
//! Each public dialect advertises its own set of model names; the alias
//! table maps those onto downstream provider model IDs. Tables are built
//! once at startup and never mutated. Unknown names pass through unchanged
//! so direct provider model IDs work without pre-registration.

use std::collections::HashMap;

/// Downstream model used for the `default` alias and unspecified requests.
pub const DEFAULT_MODEL: &str = "claude-sonnet-4.5";

/// Read-only mapping from externally advertised model names to downstream
/// provider model identifiers.
#[derive(Debug, Clone, Default)]
pub struct AliasTable {
    entries: HashMap<String, String>,
}

impl AliasTable {
    pub fn new(entries: HashMap<String, String>) -> Self {
        Self { entries }
    }

    /// Built-in aliases for the Anthropic dialect (Anthropic model names to
    /// GitHub Copilot model IDs), optionally extended from config.
    pub fn anthropic(overrides: &HashMap<String, String>) -> Self {
        let mut entries: HashMap<String, String> = [
            ("claude-3-haiku-20240307", "claude-haiku-4.5"),
            ("claude-3-sonnet-20240229", "claude-sonnet-4"),
            ("claude-3-opus-20240229", "claude-opus-4.5"),
            ("claude-3-5-sonnet-20241022", "claude-sonnet-4.5"),
            ("claude-3-haiku", "claude-haiku-4.5"),
            ("claude-3-sonnet", "claude-sonnet-4"),
            ("claude-3-opus", "claude-opus-4.5"),
            ("claude-3.5-sonnet", "claude-sonnet-4.5"),
            ("claude", DEFAULT_MODEL),
            ("default", DEFAULT_MODEL),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();

        entries.extend(overrides.clone());
        Self { entries }
    }

    /// Built-in aliases for the OpenAI dialect, optionally extended from
    /// config.
    pub fn openai(overrides: &HashMap<String, String>) -> Self {
        let mut entries: HashMap<String, String> = [
            ("gpt-4", "gpt-4.1"),
            ("gpt-4-turbo", "gpt-4o"),
            ("gpt-3.5-turbo", "gpt-4.1"),
            ("claude-3-haiku", "claude-haiku-4.5"),
            ("claude-3-sonnet", "claude-sonnet-4"),
            ("claude-3-opus", "claude-opus-4.5"),
            ("claude-3.5-sonnet", "claude-sonnet-4.5"),
            ("default", DEFAULT_MODEL),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();

        entries.extend(overrides.clone());
        Self { entries }
    }

    /// Resolve an advertised name to a provider model ID, with identity
    /// fallback.
    pub fn resolve<'a>(&'a self, requested: &'a str) -> &'a str {
        self.entries
            .get(requested)
            .map_or(requested, String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_alias_resolves() {
        let table = AliasTable::anthropic(&HashMap::new());
        assert_eq!(
            table.resolve("claude-3-5-sonnet-20241022"),
            "claude-sonnet-4.5"
        );
        assert_eq!(table.resolve("default"), DEFAULT_MODEL);
    }

    #[test]
    fn unknown_name_passes_through() {
        let table = AliasTable::openai(&HashMap::new());
        assert_eq!(table.resolve("gemini-2.0-flash"), "gemini-2.0-flash");
    }

    #[test]
    fn config_overrides_win() {
        let mut overrides = HashMap::new();
        overrides.insert("gpt-4".to_string(), "gpt-5".to_string());
        let table = AliasTable::openai(&overrides);
        assert_eq!(table.resolve("gpt-4"), "gpt-5");
        assert_eq!(table.resolve("gpt-4-turbo"), "gpt-4o");
    }
}
