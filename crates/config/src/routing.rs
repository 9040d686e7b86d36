//! Category-to-provider routing table.

use std::collections::BTreeMap;

use serde::Deserialize;

/// Routing category assigned to an inbound request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RouteCategory {
    /// The fallback category for ordinary requests.
    Default,
    /// Requests whose estimated size exceeds the long-context threshold.
    Longcontext,
    /// Background work the caller marked as latency-insensitive.
    Background,
    /// Requests carrying a thinking signal.
    Thinking,
}

impl RouteCategory {
    /// Parse an explicit category name from request metadata.
    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "default" => Some(RouteCategory::Default),
            "longcontext" => Some(RouteCategory::Longcontext),
            "background" => Some(RouteCategory::Background),
            "thinking" => Some(RouteCategory::Thinking),
            _ => None,
        }
    }

    /// The canonical name used in configuration and logs.
    pub fn as_str(&self) -> &'static str {
        match self {
            RouteCategory::Default => "default",
            RouteCategory::Longcontext => "longcontext",
            RouteCategory::Background => "background",
            RouteCategory::Thinking => "thinking",
        }
    }
}

impl std::fmt::Display for RouteCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The provider and model a category resolves to.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RouteTarget {
    /// Provider id; must name an entry in `[providers]`.
    pub provider: String,
    /// Upstream model name sent to that provider.
    pub model: String,
    /// Maximum input budget for the selected model, in tokens.
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
}

fn default_max_tokens() -> u32 {
    65_536
}

/// Routing table configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RoutingConfig {
    /// Character count at or above which a request is classified as
    /// long-context.
    #[serde(default = "default_longcontext_threshold")]
    pub longcontext_threshold: usize,

    /// Category-to-target mapping. A missing category is a routing failure
    /// at request time, not a configuration error.
    pub categories: BTreeMap<RouteCategory, RouteTarget>,
}

impl RoutingConfig {
    /// Look up the target for a category.
    pub fn target(&self, category: RouteCategory) -> Option<&RouteTarget> {
        self.categories.get(&category)
    }
}

impl Default for RoutingConfig {
    fn default() -> Self {
        Self {
            longcontext_threshold: default_longcontext_threshold(),
            categories: BTreeMap::new(),
        }
    }
}

fn default_longcontext_threshold() -> usize {
    50_000
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_known_categories() {
        assert_eq!(RouteCategory::parse("thinking"), Some(RouteCategory::Thinking));
        assert_eq!(RouteCategory::parse("longcontext"), Some(RouteCategory::Longcontext));
        assert_eq!(RouteCategory::parse("urgent"), None);
    }

    #[test]
    fn threshold_defaults_to_fifty_thousand() {
        let config: RoutingConfig = toml::from_str("").unwrap();
        assert_eq!(config.longcontext_threshold, 50_000);
    }
}
