//! Graph documents and settings files
//!
//! Both are plain serde structures; the file extension picks the format
//! (`.json`, `.yaml`/`.yml`).

use std::fs;
use std::path::Path;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::ConfigError;
use crate::model::{EdgeSnapshot, GraphSnapshot, NodeSnapshot};
use crate::settings::Settings;

/// A graph to lay out, optionally with its own settings
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GraphDocument {
    #[serde(default)]
    pub nodes: Vec<NodeSnapshot>,
    #[serde(default)]
    pub edges: Vec<EdgeSnapshot>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub settings: Option<Settings>,
}

impl GraphDocument {
    /// Split into the graph and its settings (defaults when absent)
    pub fn into_parts(self) -> (GraphSnapshot, Settings) {
        (
            GraphSnapshot {
                nodes: self.nodes,
                edges: self.edges,
            },
            self.settings.unwrap_or_default(),
        )
    }
}

/// Supported document formats
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
    Json,
    Yaml,
}

impl Format {
    /// Detect the format from a path's extension (case-insensitive)
    pub fn from_path(path: &Path) -> Result<Self, ConfigError> {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_ascii_lowercase);
        match ext.as_deref() {
            Some("json") => Ok(Format::Json),
            Some("yaml" | "yml") => Ok(Format::Yaml),
            _ => Err(ConfigError::UnknownExtension(path.to_path_buf())),
        }
    }

    pub fn parse<T: DeserializeOwned>(self, text: &str) -> Result<T, ConfigError> {
        Ok(match self {
            Format::Json => serde_json::from_str(text)?,
            Format::Yaml => serde_yaml::from_str(text)?,
        })
    }
}

fn read<T: DeserializeOwned>(path: &Path) -> Result<T, ConfigError> {
    let format = Format::from_path(path)?;
    let text = fs::read_to_string(path)?;
    debug!(path = %path.display(), ?format, "reading document");
    format.parse(&text)
}

/// Load a graph document from a JSON or YAML file
pub fn load_document(path: &Path) -> Result<GraphDocument, ConfigError> {
    read(path)
}

/// Load settings from a JSON or YAML file; missing fields take defaults
pub fn load_settings(path: &Path) -> Result<Settings, ConfigError> {
    let mut settings: Settings = read(path)?;
    settings.validate();
    Ok(settings)
}
