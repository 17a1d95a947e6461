use super::{CommandOutput, RemoteConnection};
use crate::config::Config;
use crate::error::GatewayError;
use base64::Engine;
use chrono::{DateTime, TimeZone, Utc};
use serde::Serialize;
use std::time::Duration;
use tokio::time::timeout;
use tracing::instrument;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RemoteEntryKind {
    File,
    Dir,
    Symlink,
}

#[derive(Debug, Clone, Serialize)]
pub struct RemoteEntry {
    pub name: String,
    pub kind: RemoteEntryKind,
    pub size: u64,
    pub mtime: Option<DateTime<Utc>>,
    pub permissions: Option<String>,
}

/// Remote file operations layered over ephemeral exec channels: one channel
/// per operation, closed on every exit path, same as the command bridge. No
/// SFTP subsystem is required on the remote, only a POSIX shell with
/// `stat`/`base64`.
pub struct FileTransfer {
    channel_open_timeout: Duration,
    command_timeout: Duration,
}

impl FileTransfer {
    pub fn new(config: &Config) -> Self {
        Self {
            channel_open_timeout: Duration::from_millis(config.channel_open_timeout_ms),
            command_timeout: Duration::from_millis(config.command_timeout_ms),
        }
    }

    #[instrument(skip(self, conn))]
    pub async fn create_dir<C: RemoteConnection + ?Sized>(
        &self,
        conn: &C,
        path: &str,
    ) -> Result<(), GatewayError> {
        let out = self
            .run_script(conn, &format!("mkdir -p {}", shell_escape(path)))
            .await?;
        check_remote_result(&out, path)
    }

    #[instrument(skip(self, conn))]
    pub async fn list<C: RemoteConnection + ?Sized>(
        &self,
        conn: &C,
        path: &str,
    ) -> Result<Vec<RemoteEntry>, GatewayError> {
        // One batched stat pass per listing keeps it at a single round-trip.
        let escaped = shell_escape(path.trim_end_matches('/'));
        let script = format!(
            r#"for f in {escaped}/* {escaped}/.*; do
  case "$(basename "$f")" in .|..) continue;; esac
  [ -e "$f" ] || [ -L "$f" ] || continue
  stat --format='%n|%F|%s|%Y|%a' "$f" 2>/dev/null
done"#
        );
        let out = self.run_script(conn, &script).await?;
        if !out.exit_ok && out.output.is_empty() {
            return Err(classify_remote_failure(&out.output, path));
        }

        let text = String::from_utf8_lossy(&out.output);
        Ok(text.lines().filter_map(parse_stat_line).collect())
    }

    #[instrument(skip(self, conn))]
    pub async fn read_file<C: RemoteConnection + ?Sized>(
        &self,
        conn: &C,
        path: &str,
    ) -> Result<Vec<u8>, GatewayError> {
        // base64 framing keeps binary content intact across the exec channel.
        let out = self
            .run_script(conn, &format!("base64 < {}", shell_escape(path)))
            .await?;
        check_remote_result(&out, path)?;

        let encoded: String = String::from_utf8_lossy(&out.output)
            .chars()
            .filter(|c| !c.is_whitespace())
            .collect();
        base64::engine::general_purpose::STANDARD
            .decode(encoded)
            .map_err(|_| GatewayError::RemoteFile("unreadable remote file content".to_string()))
    }

    #[instrument(skip(self, conn, data), fields(bytes = data.len()))]
    pub async fn write_file<C: RemoteConnection + ?Sized>(
        &self,
        conn: &C,
        path: &str,
        data: &[u8],
    ) -> Result<(), GatewayError> {
        let encoded = base64::engine::general_purpose::STANDARD.encode(data);
        let escaped = shell_escape(path);
        let script =
            format!("base64 -d > {escaped} <<'__SHELLGATE_EOF__'\n{encoded}\n__SHELLGATE_EOF__");
        let out = self.run_script(conn, &script).await?;
        check_remote_result(&out, path)
    }

    #[instrument(skip(self, conn))]
    pub async fn delete<C: RemoteConnection + ?Sized>(
        &self,
        conn: &C,
        path: &str,
    ) -> Result<(), GatewayError> {
        let out = self
            .run_script(conn, &format!("rm -rf {}", shell_escape(path)))
            .await?;
        check_remote_result(&out, path)
    }

    /// Open a channel, run one script, close the channel. The close happens
    /// on every path out, including the timeout ones.
    async fn run_script<C: RemoteConnection + ?Sized>(
        &self,
        conn: &C,
        script: &str,
    ) -> Result<CommandOutput, GatewayError> {
        let mut channel = timeout(self.channel_open_timeout, conn.open_command_channel())
            .await
            .map_err(|_| GatewayError::ChannelCreation("channel open timed out".to_string()))??;

        let result = match timeout(self.command_timeout, channel.run_and_collect(script)).await {
            Ok(result) => result,
            Err(_) => Err(GatewayError::Transport(
                "remote operation timed out".to_string(),
            )),
        };
        channel.close().await;
        result
    }
}

/// Single-quote escaping for embedding a path in a shell script.
fn shell_escape(s: &str) -> String {
    format!("'{}'", s.replace('\'', "'\\''"))
}

/// `name|%F|size|mtime|octal-perms`, one line per entry.
fn parse_stat_line(line: &str) -> Option<RemoteEntry> {
    let mut parts = line.splitn(5, '|');
    let full_name = parts.next()?;
    let kind = parse_file_type(parts.next()?);
    let size = parts.next()?.parse::<u64>().ok()?;
    let mtime = parts
        .next()?
        .parse::<i64>()
        .ok()
        .and_then(|secs| Utc.timestamp_opt(secs, 0).single());
    let permissions = parts.next().map(str::to_string);

    let name = full_name
        .rsplit('/')
        .next()
        .unwrap_or(full_name)
        .to_string();
    Some(RemoteEntry {
        name,
        kind,
        size,
        mtime,
        permissions,
    })
}

fn parse_file_type(type_str: &str) -> RemoteEntryKind {
    let s = type_str.to_ascii_lowercase();
    if s.contains("directory") {
        RemoteEntryKind::Dir
    } else if s.contains("symbolic link") || s.contains("symlink") {
        RemoteEntryKind::Symlink
    } else {
        RemoteEntryKind::File
    }
}

fn check_remote_result(out: &CommandOutput, path: &str) -> Result<(), GatewayError> {
    if out.exit_ok {
        return Ok(());
    }
    Err(classify_remote_failure(&out.output, path))
}

/// Remote failures are classified from the captured output; raw transport
/// detail never reaches the caller.
fn classify_remote_failure(output: &[u8], path: &str) -> GatewayError {
    let text = String::from_utf8_lossy(output);
    let msg = text.trim();
    if msg.contains("No such file") || msg.contains("cannot access") || msg.contains("not found") {
        GatewayError::RemoteFile(format!("no such file or directory: {path}"))
    } else if msg.to_ascii_lowercase().contains("permission denied") {
        GatewayError::RemoteFile(format!("permission denied: {path}"))
    } else {
        GatewayError::RemoteFile(format!("remote operation failed on {path}"))
    }
}
