use super::{CommandChannel, CommandOutput, RemoteConnection};
use crate::error::GatewayError;
use crate::session::{TerminalAttachment, TerminalInput};
use async_trait::async_trait;
use bytes::Bytes;
use russh::client::{self, Handle, Msg};
use russh::keys::key::PublicKey;
use russh::keys::load_secret_key;
use russh::{Channel, ChannelMsg, Disconnect};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, Mutex};
use tokio::time::timeout;
use tracing::{debug, instrument, warn};

/// Host keys are trusted on first use. The gateway connects to endpoints its
/// operators configured; pinning is left to the surrounding deployment.
struct AcceptingHostKeys;

#[async_trait]
impl client::Handler for AcceptingHostKeys {
    type Error = russh::Error;

    async fn check_server_key(
        &mut self,
        _server_public_key: &PublicKey,
    ) -> Result<bool, Self::Error> {
        Ok(true)
    }
}

#[derive(Debug, Clone)]
pub struct ConnectParams {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: Option<String>,
    pub private_key_path: Option<String>,
}

/// A live SSH connection. The russh handle sits behind a small mutex: channel
/// opens and the final disconnect serialize on it briefly, but the mutex is
/// never held while a command runs, so bridge calls, file transfers, and the
/// interactive terminal all multiplex freely over the one connection.
pub struct SshConnection {
    handle: Mutex<Handle<AcceptingHostKeys>>,
}

impl SshConnection {
    /// Establish the persistent connection: password auth first, private-key
    /// auth as the fallback.
    #[instrument(skip(params), fields(host = %params.host, port = params.port, username = %params.username))]
    pub async fn connect(
        params: &ConnectParams,
        connect_timeout: Duration,
    ) -> Result<Self, GatewayError> {
        let config = Arc::new(client::Config::default());
        let address = (params.host.as_str(), params.port);

        let mut handle = timeout(
            connect_timeout,
            client::connect(config, address, AcceptingHostKeys),
        )
        .await
        .map_err(|_| GatewayError::Transport("connection timed out".to_string()))?
        .map_err(|e| GatewayError::Transport(format!("connect failed: {e}")))?;

        let mut authenticated = false;
        if let Some(password) = &params.password {
            authenticated = handle
                .authenticate_password(params.username.as_str(), password.as_str())
                .await
                .map_err(|e| GatewayError::Transport(format!("password auth failed: {e}")))?;
            if !authenticated {
                debug!("Password authentication rejected, trying key auth");
            }
        }

        if !authenticated {
            let key_path = params
                .private_key_path
                .as_deref()
                .ok_or_else(|| GatewayError::Transport("authentication rejected".to_string()))?;
            let key = load_secret_key(key_path, None)
                .map_err(|e| GatewayError::Transport(format!("cannot load private key: {e}")))?;
            authenticated = handle
                .authenticate_publickey(params.username.as_str(), Arc::new(key))
                .await
                .map_err(|e| GatewayError::Transport(format!("key auth failed: {e}")))?;
        }

        if !authenticated {
            return Err(GatewayError::Transport(
                "authentication rejected".to_string(),
            ));
        }

        Ok(Self {
            handle: Mutex::new(handle),
        })
    }

    /// Open a pty+shell channel and hand it to a pump task. Keystrokes and
    /// resizes arrive through the returned attachment's input sender; shell
    /// output fans out through its broadcast sender. The task exits when the
    /// remote shell closes or the input side is dropped.
    pub async fn open_terminal(
        &self,
        cols: u32,
        rows: u32,
    ) -> Result<TerminalAttachment, GatewayError> {
        let channel = self.open_raw_channel().await?;
        channel
            .request_pty(false, "xterm-256color", cols, rows, 0, 0, &[])
            .await
            .map_err(|e| GatewayError::Transport(format!("pty request failed: {e}")))?;
        channel
            .request_shell(true)
            .await
            .map_err(|e| GatewayError::Transport(format!("shell request failed: {e}")))?;

        let (input_tx, input_rx) = mpsc::channel(64);
        let (output_tx, _) = broadcast::channel(256);
        tokio::spawn(shell_pump(channel, input_rx, output_tx.clone()));

        Ok(TerminalAttachment {
            input: input_tx,
            output: output_tx,
        })
    }

    async fn open_raw_channel(&self) -> Result<Channel<Msg>, GatewayError> {
        let handle = self.handle.lock().await;
        handle
            .channel_open_session()
            .await
            .map_err(|e| GatewayError::ChannelCreation(e.to_string()))
    }
}

#[async_trait]
impl RemoteConnection for SshConnection {
    async fn open_command_channel(&self) -> Result<Box<dyn CommandChannel>, GatewayError> {
        let channel = self.open_raw_channel().await?;
        Ok(Box::new(SshCommandChannel {
            channel: Some(channel),
            buffered: Vec::new(),
        }))
    }

    async fn disconnect(&self) {
        let handle = self.handle.lock().await;
        if let Err(e) = handle
            .disconnect(Disconnect::ByApplication, "session closed", "en")
            .await
        {
            warn!(error = %e, "Error during SSH disconnect");
        }
    }
}

/// One exec channel. Output accumulates in `buffered` as it arrives, so a run
/// future dropped by a timeout loses nothing already received.
struct SshCommandChannel {
    channel: Option<Channel<Msg>>,
    buffered: Vec<u8>,
}

#[async_trait]
impl CommandChannel for SshCommandChannel {
    async fn run_and_collect(&mut self, command: &str) -> Result<CommandOutput, GatewayError> {
        let channel = self
            .channel
            .as_mut()
            .ok_or_else(|| GatewayError::Transport("channel already closed".to_string()))?;

        channel
            .exec(true, command)
            .await
            .map_err(|e| GatewayError::Transport(format!("exec request failed: {e}")))?;

        let mut exit_status: Option<u32> = None;
        loop {
            let Some(msg) = channel.wait().await else {
                break;
            };
            match msg {
                ChannelMsg::Data { ref data } => self.buffered.extend_from_slice(data),
                ChannelMsg::ExtendedData { ref data, .. } => self.buffered.extend_from_slice(data),
                ChannelMsg::ExitStatus { exit_status: code } => exit_status = Some(code),
                ChannelMsg::Eof | ChannelMsg::Close => break,
                _ => {}
            }
        }

        Ok(CommandOutput {
            output: std::mem::take(&mut self.buffered),
            exit_ok: exit_status == Some(0),
        })
    }

    fn partial_output(&mut self) -> Vec<u8> {
        std::mem::take(&mut self.buffered)
    }

    async fn close(&mut self) {
        if let Some(channel) = self.channel.take() {
            if let Err(e) = channel.close().await {
                debug!(error = %e, "Error closing exec channel");
            }
        }
    }
}

async fn shell_pump(
    mut channel: Channel<Msg>,
    mut input_rx: mpsc::Receiver<TerminalInput>,
    output_tx: broadcast::Sender<Bytes>,
) {
    loop {
        tokio::select! {
            msg = channel.wait() => {
                match msg {
                    Some(ChannelMsg::Data { ref data }) => {
                        // No subscribers means the websocket already went
                        // away; keep draining so the channel can close.
                        let _ = output_tx.send(Bytes::copy_from_slice(data));
                    }
                    Some(ChannelMsg::ExtendedData { ref data, .. }) => {
                        let _ = output_tx.send(Bytes::copy_from_slice(data));
                    }
                    Some(ChannelMsg::Eof) | Some(ChannelMsg::Close) | None => break,
                    Some(ChannelMsg::ExitStatus { exit_status }) => {
                        debug!(exit_status, "Remote shell exited");
                    }
                    Some(_) => {}
                }
            }
            input = input_rx.recv() => {
                match input {
                    Some(TerminalInput::Data(bytes)) => {
                        if channel.data(&bytes[..]).await.is_err() {
                            break;
                        }
                    }
                    Some(TerminalInput::Resize { cols, rows }) => {
                        if let Err(e) = channel.window_change(cols, rows, 0, 0).await {
                            warn!(error = %e, "Window change failed");
                        }
                    }
                    None => {
                        let _ = channel.eof().await;
                        break;
                    }
                }
            }
        }
    }
    let _ = channel.close().await;
    debug!("Shell pump finished");
}
