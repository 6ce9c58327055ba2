use serde::{Deserialize, Serialize};
use std::env;
use thiserror::Error;
use validator::Validate;

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid {field} `{value}`: {source}")]
    Parse {
        field: String,
        value: String,
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error("Invalid engine configuration: {0}")]
    Validation(#[from] validator::ValidationErrors),
}

/// Statement generation settings
#[derive(Clone, Debug, PartialEq, Validate, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Filter and paginate the root table in a common table expression, then join selections on it
    pub use_common_table_expression: bool,

    /// Upper bound for `first` on root and nested multi-row fetches
    #[validate(range(
        min = 1,
        max = 100000,
        message = "Max limit must be between 1 and 100000"
    ))]
    pub max_limit: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            use_common_table_expression: false,
            max_limit: 1000,
        }
    }
}

impl EngineConfig {
    /// `NODEGRAPH_USE_CTE` and `NODEGRAPH_MAX_LIMIT`, falling back to the defaults
    pub fn from_env() -> Result<Self, ConfigError> {
        let config = Self {
            use_common_table_expression: parse_env_var("NODEGRAPH_USE_CTE", "false")?,
            max_limit: parse_env_var("NODEGRAPH_MAX_LIMIT", "1000")?,
        };

        config.validate()?;
        Ok(config)
    }

    /// Missing keys take their default value
    pub fn from_yaml_file<P: AsRef<std::path::Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Parse {
            field: "config file".to_string(),
            value: path.display().to_string(),
            source: Box::new(e),
        })?;

        let config: Self = serde_yaml::from_str(&content).map_err(|e| ConfigError::Parse {
            field: "config YAML".to_string(),
            value: content,
            source: Box::new(e),
        })?;

        config.validate()?;
        Ok(config)
    }
}

fn parse_env_var<T: std::str::FromStr>(key: &str, default: &str) -> Result<T, ConfigError>
where
    T::Err: std::error::Error + Send + Sync + 'static,
{
    let value = env::var(key).unwrap_or_else(|_| default.to_string());
    value.parse().map_err(|e| ConfigError::Parse {
        field: key.to_string(),
        value,
        source: Box::new(e),
    })
}
