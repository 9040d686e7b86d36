//! Token preprocessor settings.

use serde::Deserialize;

/// Where truncation removes messages from when the budget is exceeded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DropFrom {
    /// Remove the oldest non-system messages first.
    #[default]
    Head,
    /// Remove the newest messages outside the protected window.
    Tail,
    /// Remove messages from the middle of the conversation.
    Middle,
}

/// Token preprocessor configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TokenConfig {
    /// Fraction of the model limit the preprocessor aims to stay under.
    pub ratio: f64,

    /// Estimated token count at or above which the request is rerouted to
    /// the long-context category instead of being truncated.
    pub reroute_threshold: u32,

    /// Number of trailing messages always preserved by truncation.
    pub keep_recent: usize,

    /// Which end of the conversation truncation removes from.
    pub drop_from: DropFrom,

    /// Replace tool definitions with clipped stubs while truncating.
    pub stub_tools: bool,

    /// External compressor command. When unset the compress strategy is a
    /// no-op.
    pub compressor: Option<String>,
}

impl Default for TokenConfig {
    fn default() -> Self {
        Self {
            ratio: 0.95,
            reroute_threshold: 60_000,
            keep_recent: 2,
            drop_from: DropFrom::Head,
            stub_tools: false,
            compressor: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = TokenConfig::default();

        assert!((config.ratio - 0.95).abs() < f64::EPSILON);
        assert_eq!(config.keep_recent, 2);
        assert_eq!(config.drop_from, DropFrom::Head);
        assert!(!config.stub_tools);
    }
}
