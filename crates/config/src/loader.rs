use std::path::Path;

use anyhow::bail;
use indoc::indoc;

use crate::Config;

pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Config> {
    let content = std::fs::read_to_string(path.as_ref())?;
    let config: Config = toml::from_str(&content)?;

    validate(&config)?;

    Ok(config)
}

pub(crate) fn validate(config: &Config) -> anyhow::Result<()> {
    if config.providers.is_empty() {
        bail!(indoc! {r#"
            No upstream providers configured. The broker requires at least one provider to route to.

            Example configuration:

              [providers.openai]
              type = "openai"
              api_key = "sk-..."

              [routing.categories.default]
              provider = "openai"
              model = "gpt-4o-mini"
        "#});
    }

    for (category, target) in &config.routing.categories {
        if !config.providers.contains_key(&target.provider) {
            bail!(
                "routing category '{category}' references unknown provider '{}'",
                target.provider
            );
        }
    }

    if !(0.0..=1.0).contains(&config.tokens.ratio) || config.tokens.ratio == 0.0 {
        bail!("tokens.ratio must be within (0, 1], got {}", config.tokens.ratio);
    }

    Ok(())
}
