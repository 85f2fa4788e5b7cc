//! Which models a run should cover.

use regex::RegexBuilder;
use tracing::debug;

/// Curated list used when the caller names neither models nor a pattern.
pub const DEFAULT_MODELS: [&str; 6] = [
    "phi4-mini:3.8b",
    "gemma3:4b",
    "deepseek-r1:8b",
    "qwen3:8b",
    "gpt-oss:latest",
    "qwen3-coder:30b",
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModelSelector {
    All,
    Pattern(String),
    Explicit(Vec<String>),
    Default,
}

impl ModelSelector {
    /// A pattern takes precedence over an explicit list; `all` and `*` select
    /// everything.
    pub fn from_args(pattern: Option<&str>, models: &[String]) -> Self {
        match pattern.map(str::trim).filter(|p| !p.is_empty()) {
            Some(p) if p.eq_ignore_ascii_case("all") || p == "*" => ModelSelector::All,
            Some(p) => ModelSelector::Pattern(p.to_string()),
            None if !models.is_empty() => ModelSelector::Explicit(models.to_vec()),
            None => ModelSelector::Default,
        }
    }

    /// Filter `available` by this selector. Order is not significant here;
    /// the catalog sorts afterwards.
    pub fn resolve(&self, available: &[String]) -> Vec<String> {
        match self {
            ModelSelector::All => available.to_vec(),
            ModelSelector::Pattern(pattern) => match RegexBuilder::new(pattern).case_insensitive(true).build() {
                Ok(regex) => available.iter().filter(|name| regex.is_match(name)).cloned().collect(),
                Err(err) => {
                    debug!(%pattern, error = %err, "invalid pattern, matching as substring");
                    let needle = pattern.to_lowercase();
                    available
                        .iter()
                        .filter(|name| name.to_lowercase().contains(&needle))
                        .cloned()
                        .collect()
                }
            },
            ModelSelector::Explicit(requested) => requested
                .iter()
                .filter(|name| available.contains(name))
                .cloned()
                .collect(),
            ModelSelector::Default => DEFAULT_MODELS
                .iter()
                .filter(|name| available.iter().any(|a| a == *name))
                .map(|name| name.to_string())
                .collect(),
        }
    }
}
