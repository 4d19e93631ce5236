//! Per-repository build configuration (`.kiln.yaml`).
//!
//! ```yaml
//! defaultTemplatePath: build.yaml.tpl
//! triggers:
//!   - on: push
//!     branches: ["main", "release/*"]
//!   - on: push
//!     branches: ["docs/*"]
//!     template: docs.yaml.tpl
//! ```

use kiln_core::TriggerKind;
use serde::{Deserialize, Serialize};

use crate::{ConfigError, ConfigResult};

/// Well-known location of the build configuration in the repository root.
pub const CONFIG_PATH: &str = ".kiln.yaml";

/// Build configuration found in a repository.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BuildConfig {
    /// Template used when no rule names one.
    #[serde(default, alias = "defaultJob")]
    pub default_template_path: String,
    /// Optional trigger rules. Without rules every push builds.
    #[serde(default)]
    pub triggers: Vec<TriggerRule>,
}

/// A rule selecting which events build and with which template.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TriggerRule {
    pub on: TriggerKind,
    /// Branch patterns, `*` is a wildcard. Empty matches every ref.
    #[serde(default)]
    pub branches: Vec<String>,
    /// Overrides the default template.
    #[serde(default)]
    pub template: Option<String>,
}

impl BuildConfig {
    /// Parse and validate configuration text.
    pub fn from_yaml(input: &[u8]) -> ConfigResult<Self> {
        let config: BuildConfig = serde_yaml::from_slice(input)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> ConfigResult<()> {
        for (idx, rule) in self.triggers.iter().enumerate() {
            match rule.template.as_deref() {
                Some(t) if t.trim().is_empty() => {
                    return Err(ConfigError::InvalidValue {
                        field: format!("triggers[{}].template", idx),
                        message: "must not be empty".to_string(),
                    });
                }
                Some(_) => {}
                None if self.default_template_path.trim().is_empty() => {
                    return Err(ConfigError::MissingField("defaultTemplatePath".to_string()));
                }
                None => {}
            }
        }

        if self.triggers.is_empty() && self.default_template_path.trim().is_empty() {
            return Err(ConfigError::MissingField("defaultTemplatePath".to_string()));
        }
        Ok(())
    }
}
