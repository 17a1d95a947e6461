use crate::error::GatewayError;
use crate::plugins::PluginDirectory;
use crate::session::SessionRegistry;
use crate::transport::RemoteConnection;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use tracing::{debug, instrument};

const MIN_SESSION_ID_LEN: usize = 10;
const MAX_PLUGIN_ID_LEN: usize = 63;

#[derive(Debug)]
pub struct BridgeRequest {
    pub plugin_id: String,
    pub session_id: String,
    pub cmd: String,
}

#[derive(Debug)]
pub struct BridgeOutput {
    pub output: Vec<u8>,
}

/// One-shot command execution on behalf of a plugin, multiplexed over a
/// session's persistent connection. Every call opens a fresh ephemeral
/// channel so bridge calls and interactive terminal I/O never block each
/// other; the remote sees each call as an independent command invocation,
/// so no shell state (such as `cd`) carries between calls.
///
/// Plugin enablement is checked once at entry. A plugin disabled while a
/// command is in flight does not abort it; the next call fails.
pub struct CommandBridge<C> {
    plugins: Arc<dyn PluginDirectory>,
    registry: Arc<SessionRegistry<C>>,
    channel_open_timeout: Duration,
    command_timeout: Duration,
}

impl<C: RemoteConnection> CommandBridge<C> {
    pub fn new(
        plugins: Arc<dyn PluginDirectory>,
        registry: Arc<SessionRegistry<C>>,
        channel_open_timeout: Duration,
        command_timeout: Duration,
    ) -> Self {
        Self {
            plugins,
            registry,
            channel_open_timeout,
            command_timeout,
        }
    }

    /// Bridge entry point: validation of all three inputs, plugin enablement,
    /// then one command on the named session. A malformed request fails
    /// validation before the plugin directory is consulted, and the
    /// enablement check runs before any registry access; a request naming an
    /// unknown or disabled plugin learns nothing about session existence.
    #[instrument(skip(self, req), fields(plugin_id = %req.plugin_id, session_id = %req.session_id))]
    pub async fn execute(&self, req: &BridgeRequest) -> Result<BridgeOutput, GatewayError> {
        if req.plugin_id.is_empty() || req.plugin_id.len() > MAX_PLUGIN_ID_LEN {
            return Err(GatewayError::Validation(
                "plugin_id must be 1-63 characters".to_string(),
            ));
        }
        validate_session_inputs(&req.session_id, &req.cmd)?;

        if self.plugins.find_enabled(&req.plugin_id).is_none() {
            debug!("Bridge call for unknown or disabled plugin");
            return Err(GatewayError::PluginNotFound);
        }

        self.run_on_session(&req.session_id, &req.cmd).await
    }

    /// Run one command on a live session's connection. Shared by the bridge
    /// and the plain exec endpoint (which carries no plugin identity).
    ///
    /// The ephemeral channel is closed on every path out of this function;
    /// if the caller's request is cancelled mid-await, the channel's own
    /// teardown on drop is the backstop.
    #[instrument(skip(self, cmd), fields(session_id = %session_id))]
    pub async fn run_on_session(
        &self,
        session_id: &str,
        cmd: &str,
    ) -> Result<BridgeOutput, GatewayError> {
        validate_session_inputs(session_id, cmd)?;

        let handle = self
            .registry
            .load(session_id)
            .ok_or(GatewayError::SessionNotFound)?;
        if handle.is_closed() {
            return Err(GatewayError::ConnectionInvalid);
        }
        handle.touch();

        let mut channel = match timeout(
            self.channel_open_timeout,
            handle.connection.open_command_channel(),
        )
        .await
        {
            Ok(Ok(channel)) => channel,
            Ok(Err(e)) => return Err(e),
            Err(_) => {
                return Err(GatewayError::ChannelCreation(
                    "channel open timed out".to_string(),
                ))
            }
        };

        let outcome = match timeout(self.command_timeout, channel.run_and_collect(cmd)).await {
            Ok(Ok(out)) if out.exit_ok => Ok(BridgeOutput { output: out.output }),
            Ok(Ok(out)) => Err(GatewayError::CommandFailed {
                msg: "non-zero exit status".to_string(),
                output: out.output,
            }),
            Ok(Err(e)) => Err(GatewayError::CommandFailed {
                msg: format!("transport failure: {}", e.public_message()),
                output: channel.partial_output(),
            }),
            Err(_) => Err(GatewayError::CommandFailed {
                msg: "command timed out".to_string(),
                output: channel.partial_output(),
            }),
        };

        channel.close().await;
        outcome
    }
}

fn validate_session_inputs(session_id: &str, cmd: &str) -> Result<(), GatewayError> {
    if session_id.len() < MIN_SESSION_ID_LEN {
        return Err(GatewayError::Validation(
            "session_id must be at least 10 characters".to_string(),
        ));
    }
    if cmd.is_empty() {
        return Err(GatewayError::Validation("cmd must not be empty".to_string()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plugins::{PluginDescriptor, PluginStatus};
    use crate::session::{Endpoint, SessionHandle};
    use crate::transport::testing::{FakeConnection, FakeRun};
    use std::path::PathBuf;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct StaticPlugins {
        descriptors: Vec<PluginDescriptor>,
        lookups: Arc<AtomicUsize>,
    }

    impl StaticPlugins {
        fn with(name: &str, status: PluginStatus) -> Self {
            Self {
                descriptors: vec![PluginDescriptor {
                    name: name.to_string(),
                    title: String::new(),
                    description: String::new(),
                    root_dir: PathBuf::from("/plugins").join(name),
                    entry_file: "index.html".to_string(),
                    status,
                    order_num: 0,
                }],
                lookups: Arc::new(AtomicUsize::new(0)),
            }
        }
    }

    impl PluginDirectory for StaticPlugins {
        fn find_enabled(&self, name: &str) -> Option<PluginDescriptor> {
            self.lookups.fetch_add(1, Ordering::Relaxed);
            self.descriptors
                .iter()
                .find(|p| p.name == name && p.is_enabled())
                .cloned()
        }

        fn enabled(&self) -> Vec<PluginDescriptor> {
            self.descriptors
                .iter()
                .filter(|p| p.is_enabled())
                .cloned()
                .collect()
        }
    }

    fn endpoint() -> Endpoint {
        Endpoint {
            host: "203.0.113.4".to_string(),
            port: 22,
            username: "app".to_string(),
        }
    }

    fn bridge_with(
        plugins: StaticPlugins,
        conn: FakeConnection,
        session_id: &str,
    ) -> (CommandBridge<FakeConnection>, Arc<SessionHandle<FakeConnection>>) {
        let registry = Arc::new(SessionRegistry::new());
        let handle = Arc::new(SessionHandle::new(
            session_id.to_string(),
            Arc::new(conn),
            endpoint(),
            None,
        ));
        registry.store(handle.clone());
        let bridge = CommandBridge::new(
            Arc::new(plugins),
            registry,
            Duration::from_millis(100),
            Duration::from_millis(100),
        );
        (bridge, handle)
    }

    fn request(plugin: &str, session: &str, cmd: &str) -> BridgeRequest {
        BridgeRequest {
            plugin_id: plugin.to_string(),
            session_id: session.to_string(),
            cmd: cmd.to_string(),
        }
    }

    #[tokio::test]
    async fn successful_command_returns_output_and_touches_session() {
        let conn = FakeConnection::scripted(vec![FakeRun::Complete {
            output: b"hi\n".to_vec(),
            exit_ok: true,
        }]);
        let (bridge, handle) =
            bridge_with(StaticPlugins::with("p1", PluginStatus::Enabled), conn, "session-ab12");
        handle.backdate(60_000);
        let before = handle.last_active();

        let out = bridge
            .execute(&request("p1", "session-ab12", "echo hi"))
            .await
            .unwrap();
        assert_eq!(out.output, b"hi\n");
        assert!(handle.last_active() > before);
        assert_eq!(handle.connection.open_count(), 1);
        assert_eq!(handle.connection.close_count(), 1);
    }

    // All three inputs are validated up front: a malformed request answers
    // ValidationError even when the plugin it names is unknown, and the
    // plugin directory is never consulted.
    #[tokio::test]
    async fn validation_failures_never_reach_the_plugin_directory() {
        let conn = FakeConnection::default();
        let plugins = StaticPlugins::with("p1", PluginStatus::Enabled);
        let lookups = plugins.lookups.clone();
        let (bridge, handle) = bridge_with(plugins, conn, "session-ab12");

        for req in [
            request("", "session-ab12", "ls"),
            request(&"p".repeat(64), "session-ab12", "ls"),
            request("p1", "short", "ls"),
            request("p1", "session-ab12", ""),
            request("ghost", "short", "ls"),
        ] {
            assert!(matches!(
                bridge.execute(&req).await,
                Err(GatewayError::Validation(_))
            ));
        }
        assert_eq!(lookups.load(Ordering::Relaxed), 0);
        assert_eq!(handle.connection.open_count(), 0);
    }

    // The enablement check runs before any registry access: even though the
    // session is live, a disabled plugin fails without a single registry
    // load or channel open.
    #[tokio::test]
    async fn disabled_plugin_fails_before_the_registry_is_consulted() {
        let conn = FakeConnection::default();
        let (bridge, handle) =
            bridge_with(StaticPlugins::with("p1", PluginStatus::Disabled), conn, "session-ab12");

        let err = bridge
            .execute(&request("p1", "session-ab12", "ls"))
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::PluginNotFound));
        assert_eq!(bridge.registry.load_count(), 0);
        assert_eq!(handle.connection.open_count(), 0);
    }

    #[tokio::test]
    async fn unknown_plugin_is_indistinguishable_from_disabled() {
        let conn = FakeConnection::default();
        let (bridge, _) =
            bridge_with(StaticPlugins::with("p1", PluginStatus::Enabled), conn, "session-ab12");

        assert!(matches!(
            bridge.execute(&request("ghost", "session-ab12", "ls")).await,
            Err(GatewayError::PluginNotFound)
        ));
    }

    #[tokio::test]
    async fn absent_session_yields_not_found_without_channel_creation() {
        let conn = FakeConnection::default();
        let (bridge, handle) =
            bridge_with(StaticPlugins::with("p1", PluginStatus::Enabled), conn, "session-ab12");

        let err = bridge
            .execute(&request("p1", "evicted-session-1", "ls"))
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::SessionNotFound));
        assert_eq!(handle.connection.open_count(), 0);
    }

    #[tokio::test]
    async fn closed_handle_is_an_invalid_connection() {
        let conn = FakeConnection::default();
        let (bridge, handle) =
            bridge_with(StaticPlugins::with("p1", PluginStatus::Enabled), conn, "session-ab12");
        handle.mark_closed();

        let err = bridge
            .execute(&request("p1", "session-ab12", "ls"))
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::ConnectionInvalid));
        assert_eq!(handle.connection.open_count(), 0);
    }

    #[tokio::test]
    async fn channel_open_failure_surfaces_without_a_close() {
        let (bridge, handle) = bridge_with(
            StaticPlugins::with("p1", PluginStatus::Enabled),
            FakeConnection::refusing_channels(),
            "session-ab12",
        );

        let err = bridge
            .execute(&request("p1", "session-ab12", "ls"))
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::ChannelCreation(_)));
        assert_eq!(handle.connection.open_count(), 1);
        assert_eq!(handle.connection.close_count(), 0);
    }

    #[tokio::test]
    async fn nonzero_exit_keeps_partial_output_and_closes_once() {
        let conn = FakeConnection::scripted(vec![FakeRun::Complete {
            output: b"partial output before failure".to_vec(),
            exit_ok: false,
        }]);
        let (bridge, handle) =
            bridge_with(StaticPlugins::with("p1", PluginStatus::Enabled), conn, "session-ab12");

        let err = bridge
            .execute(&request("p1", "session-ab12", "false"))
            .await
            .unwrap_err();
        match err {
            GatewayError::CommandFailed { output, .. } => {
                assert_eq!(output, b"partial output before failure");
            }
            other => panic!("expected CommandFailed, got {other:?}"),
        }
        assert_eq!(handle.connection.close_count(), 1);
    }

    #[tokio::test]
    async fn transport_failure_mid_run_keeps_captured_output_and_closes_once() {
        let conn = FakeConnection::scripted(vec![FakeRun::TransportError {
            partial: b"lines received before the drop".to_vec(),
        }]);
        let (bridge, handle) =
            bridge_with(StaticPlugins::with("p1", PluginStatus::Enabled), conn, "session-ab12");

        let err = bridge
            .execute(&request("p1", "session-ab12", "tail -f /var/log/syslog"))
            .await
            .unwrap_err();
        match err {
            GatewayError::CommandFailed { output, .. } => {
                assert_eq!(output, b"lines received before the drop");
            }
            other => panic!("expected CommandFailed, got {other:?}"),
        }
        assert_eq!(handle.connection.close_count(), 1);
    }

    #[tokio::test]
    async fn command_timeout_returns_partial_output_and_closes_once() {
        let conn = FakeConnection::scripted(vec![FakeRun::Hang]);
        let (bridge, handle) =
            bridge_with(StaticPlugins::with("p1", PluginStatus::Enabled), conn, "session-ab12");

        let err = bridge
            .execute(&request("p1", "session-ab12", "sleep 999"))
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::CommandFailed { .. }));
        assert_eq!(handle.connection.close_count(), 1);
    }
}
