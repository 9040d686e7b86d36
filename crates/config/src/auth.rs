//! Credential storage configuration.

use std::path::PathBuf;

use serde::Deserialize;

/// Credential storage configuration.
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default, deny_unknown_fields)]
pub struct AuthConfig {
    /// Directory holding per-provider credential files. Defaults to
    /// `~/.route-claudecode/auth`.
    pub directory: Option<PathBuf>,
}

impl AuthConfig {
    /// Resolve the auth directory, falling back to the home-relative
    /// default when unset.
    pub fn directory(&self) -> PathBuf {
        match &self.directory {
            Some(dir) => dir.clone(),
            None => dirs::home_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join(".route-claudecode")
                .join("auth"),
        }
    }
}
