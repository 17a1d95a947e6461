use anyhow::{Context, Result};
use std::path::PathBuf;

#[derive(Debug, Clone)]
pub struct Config {
    pub listen_address: String,
    pub listen_port: u16,
    /// URL prefix the whole gateway is mounted under ("" or "/something").
    pub web_base_dir: String,
    /// Root directory of the bundled web application.
    pub web_root: PathBuf,
    pub plugin_manifest: PathBuf,
    pub log_level: String,
    pub session_idle_timeout_secs: u64,
    pub session_sweep_interval_secs: u64,
    pub ssh_connect_timeout_secs: u64,
    pub channel_open_timeout_ms: u64,
    pub command_timeout_ms: u64,
    pub audit_log_file: PathBuf,
    pub audit_log_max_size_bytes: u64,
}

/// Tilde and environment-variable expansion for configured paths.
pub(crate) fn expand_path(path_str: &str) -> Result<PathBuf> {
    shellexpand::full(path_str)
        .map(|expanded| PathBuf::from(expanded.into_owned()))
        .map_err(|e| anyhow::anyhow!("Failed to expand path '{}': {}", path_str, e))
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

impl Config {
    pub fn load() -> Result<Self> {
        dotenvy::dotenv().ok(); // Load .env file if present

        let listen_address = env_or("SHELLGATE_ADDRESS", "0.0.0.0");
        let listen_port = env_or("SHELLGATE_PORT", "8899")
            .parse::<u16>()
            .context("Invalid SHELLGATE_PORT")?;

        let web_base_dir = env_or("WEB_BASE_DIR", "");
        if !web_base_dir.is_empty() && (!web_base_dir.starts_with('/') || web_base_dir.ends_with('/')) {
            anyhow::bail!(
                "WEB_BASE_DIR must be empty or start with '/' and not end with '/': {:?}",
                web_base_dir
            );
        }

        let web_root = expand_path(&env_or("WEB_ROOT", "./webroot"))?;

        let plugin_manifest = expand_path(&env_or("PLUGIN_MANIFEST", "./plugins.json"))?;

        let log_level = env_or("LOG_LEVEL", "info");

        let session_idle_timeout_secs = env_or("SESSION_IDLE_TIMEOUT_SECS", "1800")
            .parse::<u64>()
            .context("Invalid SESSION_IDLE_TIMEOUT_SECS")?;
        let session_sweep_interval_secs = env_or("SESSION_SWEEP_INTERVAL_SECS", "60")
            .parse::<u64>()
            .context("Invalid SESSION_SWEEP_INTERVAL_SECS")?;
        if session_sweep_interval_secs == 0 {
            anyhow::bail!("SESSION_SWEEP_INTERVAL_SECS must be at least 1");
        }

        let ssh_connect_timeout_secs = env_or("SSH_CONNECT_TIMEOUT_SECS", "30")
            .parse::<u64>()
            .context("Invalid SSH_CONNECT_TIMEOUT_SECS")?;
        let channel_open_timeout_ms = env_or("CHANNEL_OPEN_TIMEOUT_MS", "10000")
            .parse::<u64>()
            .context("Invalid CHANNEL_OPEN_TIMEOUT_MS")?;
        let command_timeout_ms = env_or("COMMAND_TIMEOUT_MS", "60000")
            .parse::<u64>()
            .context("Invalid COMMAND_TIMEOUT_MS")?;

        let log_dir_base = std::env::var("AUDIT_LOG_DIR")
            .ok()
            .and_then(|s| expand_path(&s).ok())
            .unwrap_or_else(|| PathBuf::from("./logs"));
        let audit_log_file = log_dir_base.join("gateway_audit.log");
        let audit_log_max_size_bytes = env_or("AUDIT_LOG_MAX_SIZE_MB", "10")
            .parse::<u64>()
            .context("Invalid AUDIT_LOG_MAX_SIZE_MB")?
            * 1024
            * 1024;

        Ok(Config {
            listen_address,
            listen_port,
            web_base_dir,
            web_root,
            plugin_manifest,
            log_level,
            session_idle_timeout_secs,
            session_sweep_interval_secs,
            ssh_connect_timeout_secs,
            channel_open_timeout_ms,
            command_timeout_ms,
            audit_log_file,
            audit_log_max_size_bytes,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // One test owns the env var: parallel tests sharing the process
    // environment would race otherwise.
    #[test]
    fn audit_log_size_must_be_numeric() {
        std::env::set_var("AUDIT_LOG_MAX_SIZE_MB", "lots");
        let err = Config::load().unwrap_err();
        assert!(err.to_string().contains("AUDIT_LOG_MAX_SIZE_MB"));

        std::env::set_var("AUDIT_LOG_MAX_SIZE_MB", "5");
        let config = Config::load().unwrap();
        assert_eq!(config.audit_log_max_size_bytes, 5 * 1024 * 1024);

        std::env::remove_var("AUDIT_LOG_MAX_SIZE_MB");
    }
}
