use crate::config::Config;
use anyhow::Result;
use chrono::Utc;
use serde_json::Value;
use std::path::PathBuf;
use tokio::fs::{self, OpenOptions};
use tokio::io::AsyncWriteExt;
use tracing::error;

const MAX_LOGGED_FIELD_LEN: usize = 1024;

/// Append-only audit trail: one timestamped line per gateway event (session
/// open/close, bridge execution, file transfer) with a compact JSON payload.
/// The file is renamed aside with a timestamp suffix once it exceeds the
/// configured size. Audit failures are logged, never fatal.
pub struct AuditLog {
    log_file_path: PathBuf,
    max_size_bytes: u64,
}

impl AuditLog {
    pub fn new(config: &Config) -> Self {
        if let Some(parent_dir) = config.audit_log_file.parent() {
            if !parent_dir.exists() {
                if let Err(e) = std::fs::create_dir_all(parent_dir) {
                    error!(path = %parent_dir.display(), error = %e, "Failed to create audit log directory");
                }
            }
        }
        Self {
            log_file_path: config.audit_log_file.clone(),
            max_size_bytes: config.audit_log_max_size_bytes,
        }
    }

    pub async fn log(&self, event: &str, payload: Value) {
        if let Err(e) = self.try_log(event, payload).await {
            error!(event = %event, error = %e, "Failed to write audit log");
        }
    }

    async fn try_log(&self, event: &str, mut payload: Value) -> Result<()> {
        self.rotate_if_needed().await?;

        truncate_large_fields(&mut payload);
        let timestamp = Utc::now().to_rfc3339();
        let line = format!(
            "{} | {:<16} | {}\n",
            timestamp,
            event,
            serde_json::to_string(&payload)?
        );

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.log_file_path)
            .await?;
        file.write_all(line.as_bytes()).await?;
        file.flush().await?;
        Ok(())
    }

    async fn rotate_if_needed(&self) -> Result<()> {
        if !self.log_file_path.exists() {
            return Ok(());
        }

        let metadata = fs::metadata(&self.log_file_path).await?;
        if metadata.len() >= self.max_size_bytes {
            let timestamp = Utc::now().format("%Y-%m-%d_%H-%M-%S").to_string();
            let file_stem = self
                .log_file_path
                .file_stem()
                .unwrap_or_default()
                .to_string_lossy();
            let extension = self
                .log_file_path
                .extension()
                .unwrap_or_default()
                .to_string_lossy();

            let backup_file_name = format!("{}_{}.{}", file_stem, timestamp, extension);
            let backup_path = self.log_file_path.with_file_name(backup_file_name);
            fs::rename(&self.log_file_path, backup_path).await?;
        }
        Ok(())
    }
}

/// Oversized string fields (command text, file content echoes) are replaced
/// so a single event cannot balloon the log.
fn truncate_large_fields(payload: &mut Value) {
    if let Some(obj) = payload.as_object_mut() {
        for value in obj.values_mut() {
            if let Some(s) = value.as_str() {
                if s.len() > MAX_LOGGED_FIELD_LEN {
                    *value = Value::String("<truncated for log>".to_string());
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    fn audit_at(dir: &TempDir, max_size: u64) -> AuditLog {
        AuditLog {
            log_file_path: dir.path().join("gateway_audit.log"),
            max_size_bytes: max_size,
        }
    }

    #[tokio::test]
    async fn events_append_one_line_each() {
        let dir = TempDir::new().unwrap();
        let audit = audit_at(&dir, 1024 * 1024);

        audit
            .log("session_open", json!({"session_id": "abc1234567", "host": "192.0.2.1"}))
            .await;
        audit
            .log("bridge_exec", json!({"plugin_id": "p1", "cmd": "uptime"}))
            .await;

        let content = std::fs::read_to_string(dir.path().join("gateway_audit.log")).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].contains("session_open"));
        assert!(lines[0].contains("abc1234567"));
        assert!(lines[1].contains("bridge_exec"));
    }

    #[tokio::test]
    async fn oversized_command_text_is_truncated() {
        let dir = TempDir::new().unwrap();
        let audit = audit_at(&dir, 1024 * 1024);

        let huge = "x".repeat(4096);
        audit.log("bridge_exec", json!({"cmd": huge})).await;

        let content = std::fs::read_to_string(dir.path().join("gateway_audit.log")).unwrap();
        assert!(content.contains("<truncated for log>"));
        assert!(!content.contains(&"x".repeat(2000)));
    }

    #[tokio::test]
    async fn oversized_log_rotates_by_rename() {
        let dir = TempDir::new().unwrap();
        let audit = audit_at(&dir, 64);

        audit
            .log("session_open", json!({"session_id": "abc1234567"}))
            .await;
        // The second write sees the file over the limit and renames it aside.
        audit
            .log("session_close", json!({"session_id": "abc1234567"}))
            .await;

        let entries: Vec<String> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(entries.len(), 2, "expected active log plus one rotated file: {entries:?}");
        assert!(entries.iter().any(|n| n == "gateway_audit.log"));
        assert!(entries
            .iter()
            .any(|n| n.starts_with("gateway_audit_") && n.ends_with(".log")));
    }
}
