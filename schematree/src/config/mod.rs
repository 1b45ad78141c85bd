use crate::error::{Result, SchemaTreeError};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Default storage namespace (collection / table) that holds root documents
pub const DEFAULT_NAMESPACE: &str = "__schema";

/// Registry configuration, usually read from `schematree.yaml`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistryConfig {
    /// Storage namespace the gateway keeps root documents under
    #[serde(default = "default_namespace")]
    pub namespace: String,
    /// How `update_properties` combines new property maps with existing ones
    #[serde(default)]
    pub update_mode: UpdateMode,
    /// How gateways combine an upserted root with the stored one
    #[serde(default)]
    pub merge_mode: MergeMode,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        RegistryConfig {
            namespace: default_namespace(),
            update_mode: UpdateMode::default(),
            merge_mode: MergeMode::default(),
        }
    }
}

fn default_namespace() -> String {
    DEFAULT_NAMESPACE.to_string()
}

/// Property update policy
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UpdateMode {
    #[default]
    Merge,
    Replace,
}

/// Top-level write policy of a persistence gateway
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MergeMode {
    #[default]
    Merge,
    Replace,
}

/// Parse a registry config file
pub fn parse_config(path: &Path) -> Result<RegistryConfig> {
    let content = std::fs::read_to_string(path)?;
    parse_config_str(&content)
}

/// Parse a registry config YAML string
pub fn parse_config_str(content: &str) -> Result<RegistryConfig> {
    if content.trim().is_empty() {
        return Ok(RegistryConfig::default());
    }
    let config: RegistryConfig = serde_yaml::from_str(content)?;
    if config.namespace.trim().is_empty() || config.namespace.contains('/') {
        return Err(SchemaTreeError::Config(format!(
            "namespace must be a single non-empty segment, got '{}'",
            config.namespace
        )));
    }
    Ok(config)
}
