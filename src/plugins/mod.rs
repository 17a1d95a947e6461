mod manifest;

pub use manifest::ManifestPluginDirectory;

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PluginStatus {
    Enabled,
    Disabled,
}

fn default_entry_file() -> String {
    "index.html".to_string()
}

fn default_status() -> PluginStatus {
    PluginStatus::Enabled
}

/// One installed plugin front end: a named directory of assets plus the file
/// to serve when a request names the plugin itself.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PluginDescriptor {
    pub name: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub root_dir: PathBuf,
    #[serde(default = "default_entry_file")]
    pub entry_file: String,
    #[serde(default = "default_status")]
    pub status: PluginStatus,
    #[serde(default)]
    pub order_num: i32,
}

impl PluginDescriptor {
    pub fn is_enabled(&self) -> bool {
        self.status == PluginStatus::Enabled
    }
}

/// Lookup surface the asset handlers and the command bridge consume. A name
/// that is unknown or maps to a disabled plugin resolves to nothing; callers
/// never learn which of the two it was.
pub trait PluginDirectory: Send + Sync {
    fn find_enabled(&self, name: &str) -> Option<PluginDescriptor>;

    /// Enabled descriptors ordered for menu display (order_num, then name).
    fn enabled(&self) -> Vec<PluginDescriptor>;
}
