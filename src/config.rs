use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::extract::ExtractorSettings;
use crate::model::Node;

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    pub node: NodeConfig,
    #[serde(default)]
    pub routing: RoutingConfig,
    #[serde(default)]
    pub extraction: ExtractionConfig,
}

/// Identity of the node this relay runs on.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct NodeConfig {
    pub node_id: String,
    pub group_id: String,
    /// Defaults to `node_id`.
    #[serde(default)]
    pub external_id: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RoutingConfig {
    #[serde(default = "default_max_batch_size")]
    pub max_batch_size: usize,
    #[serde(default)]
    pub checkpoint_file: Option<PathBuf>,
    /// Never route a change back to the node it was captured from.
    #[serde(default = "default_exclude_source_node")]
    pub exclude_source_node: bool,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ExtractionConfig {
    #[serde(default = "default_binary_encoding")]
    pub binary_encoding: String,
    #[serde(default = "default_include_old_data")]
    pub include_old_data: bool,
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,
}

impl Default for RoutingConfig {
    fn default() -> Self {
        Self {
            max_batch_size: default_max_batch_size(),
            checkpoint_file: None,
            exclude_source_node: default_exclude_source_node(),
        }
    }
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            binary_encoding: default_binary_encoding(),
            include_old_data: default_include_old_data(),
            output_dir: default_output_dir(),
        }
    }
}

impl Config {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, config::ConfigError> {
        let settings = config::Config::builder()
            .add_source(config::File::from(path.as_ref()))
            .add_source(
                config::Environment::with_prefix("SYNC_RELAY")
                    .prefix_separator("_")
                    .separator("__"),
            )
            .build()?;

        settings.try_deserialize()
    }

    pub fn local_node(&self) -> Node {
        let node = Node::new(&self.node.node_id, &self.node.group_id);
        match &self.node.external_id {
            Some(external_id) => node.with_external_id(external_id),
            None => node,
        }
    }

    pub fn extractor_settings(&self) -> ExtractorSettings {
        ExtractorSettings {
            node_id: self.node.node_id.clone(),
            binary_encoding: self.extraction.binary_encoding.clone(),
            include_old_data: self.extraction.include_old_data,
        }
    }
}

fn default_max_batch_size() -> usize {
    1000
}

fn default_exclude_source_node() -> bool {
    true
}

fn default_binary_encoding() -> String {
    "BASE64".to_string()
}

fn default_include_old_data() -> bool {
    true
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("outgoing")
}
