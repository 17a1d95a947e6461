use anyhow::{bail, Context, Result};
use std::collections::HashSet;
use std::path::Path;
use tracing::{info, warn};

use crate::config::expand_path;

use super::{PluginDescriptor, PluginDirectory};

const MAX_PLUGIN_NAME_LEN: usize = 63;

/// Plugin directory backed by a JSON manifest read once at startup.
///
/// The manifest is a JSON array of descriptors. Every entry is validated
/// while loading so a bad manifest fails the process at boot instead of
/// surfacing as 404s later.
pub struct ManifestPluginDirectory {
    plugins: Vec<PluginDescriptor>,
}

impl ManifestPluginDirectory {
    pub fn load(manifest_path: &Path) -> Result<Self> {
        if !manifest_path.exists() {
            warn!(
                manifest = %manifest_path.display(),
                "Plugin manifest not found, starting with no plugins"
            );
            return Ok(Self {
                plugins: Vec::new(),
            });
        }

        let raw = std::fs::read_to_string(manifest_path).with_context(|| {
            format!("Failed to read plugin manifest {}", manifest_path.display())
        })?;
        let mut plugins: Vec<PluginDescriptor> = serde_json::from_str(&raw).with_context(|| {
            format!(
                "Failed to parse plugin manifest {}",
                manifest_path.display()
            )
        })?;

        let mut seen = HashSet::new();
        for plugin in &mut plugins {
            validate_name(&plugin.name)?;
            if !seen.insert(plugin.name.clone()) {
                bail!("Duplicate plugin name '{}' in manifest", plugin.name);
            }

            let root_dir = expand_path(&plugin.root_dir.to_string_lossy())
                .with_context(|| format!("Invalid root_dir for plugin '{}'", plugin.name))?;
            if !root_dir.is_dir() {
                bail!(
                    "Plugin '{}': root_dir {} is not a directory",
                    plugin.name,
                    root_dir.display()
                );
            }
            let entry = root_dir.join(&plugin.entry_file);
            if !entry.is_file() {
                bail!(
                    "Plugin '{}': entry file {} does not exist",
                    plugin.name,
                    entry.display()
                );
            }
            plugin.root_dir = root_dir;
        }

        info!(count = plugins.len(), "Loaded plugin manifest");
        Ok(Self { plugins })
    }

    #[cfg(test)]
    pub fn from_descriptors(plugins: Vec<PluginDescriptor>) -> Self {
        Self { plugins }
    }
}

fn validate_name(name: &str) -> Result<()> {
    if name.is_empty() {
        bail!("Plugin name must not be empty");
    }
    if name.len() > MAX_PLUGIN_NAME_LEN {
        bail!(
            "Plugin name '{}' exceeds {} characters",
            name,
            MAX_PLUGIN_NAME_LEN
        );
    }
    if name.contains('/') {
        bail!("Plugin name '{}' must not contain '/'", name);
    }
    Ok(())
}

impl PluginDirectory for ManifestPluginDirectory {
    fn find_enabled(&self, name: &str) -> Option<PluginDescriptor> {
        self.plugins
            .iter()
            .find(|p| p.name == name && p.is_enabled())
            .cloned()
    }

    fn enabled(&self) -> Vec<PluginDescriptor> {
        let mut enabled: Vec<PluginDescriptor> = self
            .plugins
            .iter()
            .filter(|p| p.is_enabled())
            .cloned()
            .collect();
        enabled.sort_by(|a, b| {
            a.order_num
                .cmp(&b.order_num)
                .then_with(|| a.name.cmp(&b.name))
        });
        enabled
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plugins::PluginStatus;
    use std::fs;
    use tempfile::TempDir;

    fn write_plugin_dir(base: &TempDir, name: &str) -> std::path::PathBuf {
        let dir = base.path().join(name);
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join("index.html"), "<html></html>").unwrap();
        dir
    }

    fn write_manifest(base: &TempDir, body: &str) -> std::path::PathBuf {
        let path = base.path().join("plugins.json");
        fs::write(&path, body).unwrap();
        path
    }

    #[test]
    fn missing_manifest_yields_empty_directory() {
        let tmp = TempDir::new().unwrap();
        let dir = ManifestPluginDirectory::load(&tmp.path().join("absent.json")).unwrap();
        assert!(dir.enabled().is_empty());
        assert!(dir.find_enabled("anything").is_none());
    }

    #[test]
    fn loads_and_finds_enabled_plugin() {
        let tmp = TempDir::new().unwrap();
        let root = write_plugin_dir(&tmp, "filebrowser");
        let manifest = write_manifest(
            &tmp,
            &format!(
                r#"[{{"name":"filebrowser","title":"Files","root_dir":"{}"}}]"#,
                root.display()
            ),
        );

        let dir = ManifestPluginDirectory::load(&manifest).unwrap();
        let found = dir.find_enabled("filebrowser").unwrap();
        assert_eq!(found.entry_file, "index.html");
        assert_eq!(found.status, PluginStatus::Enabled);
        assert_eq!(found.root_dir, root);
    }

    #[test]
    fn disabled_plugin_is_not_found() {
        let tmp = TempDir::new().unwrap();
        let root = write_plugin_dir(&tmp, "monitor");
        let manifest = write_manifest(
            &tmp,
            &format!(
                r#"[{{"name":"monitor","root_dir":"{}","status":"disabled"}}]"#,
                root.display()
            ),
        );

        let dir = ManifestPluginDirectory::load(&manifest).unwrap();
        assert!(dir.find_enabled("monitor").is_none());
        assert!(dir.enabled().is_empty());
    }

    #[test]
    fn missing_root_dir_fails_load() {
        let tmp = TempDir::new().unwrap();
        let manifest = write_manifest(
            &tmp,
            &format!(
                r#"[{{"name":"ghost","root_dir":"{}"}}]"#,
                tmp.path().join("nowhere").display()
            ),
        );
        assert!(ManifestPluginDirectory::load(&manifest).is_err());
    }

    #[test]
    fn missing_entry_file_fails_load() {
        let tmp = TempDir::new().unwrap();
        let dir = tmp.path().join("noentry");
        fs::create_dir_all(&dir).unwrap();
        let manifest = write_manifest(
            &tmp,
            &format!(r#"[{{"name":"noentry","root_dir":"{}"}}]"#, dir.display()),
        );
        assert!(ManifestPluginDirectory::load(&manifest).is_err());
    }

    #[test]
    fn duplicate_names_fail_load() {
        let tmp = TempDir::new().unwrap();
        let root = write_plugin_dir(&tmp, "dup");
        let manifest = write_manifest(
            &tmp,
            &format!(
                r#"[{{"name":"dup","root_dir":"{root}"}},{{"name":"dup","root_dir":"{root}"}}]"#,
                root = root.display()
            ),
        );
        assert!(ManifestPluginDirectory::load(&manifest).is_err());
    }

    #[test]
    fn name_validation_rejects_slash_and_overlong() {
        assert!(validate_name("ok-name").is_ok());
        assert!(validate_name("").is_err());
        assert!(validate_name("bad/name").is_err());
        assert!(validate_name(&"x".repeat(64)).is_err());
        assert!(validate_name(&"x".repeat(63)).is_ok());
    }

    #[test]
    fn enabled_is_ordered_by_order_num_then_name() {
        let mk = |name: &str, order_num: i32, status: PluginStatus| PluginDescriptor {
            name: name.to_string(),
            title: String::new(),
            description: String::new(),
            root_dir: std::path::PathBuf::from("/tmp"),
            entry_file: "index.html".to_string(),
            status,
            order_num,
        };
        let dir = ManifestPluginDirectory::from_descriptors(vec![
            mk("zeta", 1, PluginStatus::Enabled),
            mk("alpha", 2, PluginStatus::Enabled),
            mk("beta", 1, PluginStatus::Enabled),
            mk("hidden", 0, PluginStatus::Disabled),
        ]);
        let names: Vec<String> = dir.enabled().into_iter().map(|p| p.name).collect();
        assert_eq!(names, vec!["beta", "zeta", "alpha"]);
    }
}
