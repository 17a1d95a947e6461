mod files;
mod ssh;

pub use files::{FileTransfer, RemoteEntry, RemoteEntryKind};
pub use ssh::{ConnectParams, SshConnection};

use crate::error::GatewayError;
use async_trait::async_trait;

/// Combined stdout+stderr of one remote command, plus whether the remote
/// exit status was zero.
#[derive(Debug)]
pub struct CommandOutput {
    pub output: Vec<u8>,
    pub exit_ok: bool,
}

/// One ephemeral command stream multiplexed over a persistent connection.
/// A channel serves exactly one command; the creator closes it on every
/// exit path, with Drop as the backstop when the surrounding request is
/// cancelled mid-run.
#[async_trait]
pub trait CommandChannel: Send {
    /// Run one command to completion, capturing combined stdout+stderr.
    async fn run_and_collect(&mut self, command: &str) -> Result<CommandOutput, GatewayError>;

    /// Output captured so far. Used when the run was abandoned mid-flight
    /// (timeout or transport failure) and the partial bytes still matter.
    fn partial_output(&mut self) -> Vec<u8>;

    /// Release the channel. Idempotent; errors during teardown are dropped.
    async fn close(&mut self);
}

/// A live persistent remote-shell connection. The session registry owns its
/// lifetime; bridge and file-transfer calls only ever open fresh channels on
/// it, so they coexist with interactive terminal I/O on the same connection
/// without blocking each other.
#[async_trait]
pub trait RemoteConnection: Send + Sync {
    async fn open_command_channel(&self) -> Result<Box<dyn CommandChannel>, GatewayError>;

    /// Graceful teardown. Never waits for in-flight channels.
    async fn disconnect(&self);
}

#[cfg(test)]
pub(crate) mod testing {
    //! In-memory transport fakes shared by the bridge and file-transfer
    //! tests. Channels count their closes so tests can assert the
    //! exactly-once release property.

    use super::*;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    /// Scripted outcome for one `run_and_collect` call.
    pub enum FakeRun {
        Complete { output: Vec<u8>, exit_ok: bool },
        TransportError { partial: Vec<u8> },
        /// Never completes; lets tests drive the command timeout.
        Hang,
    }

    pub struct FakeChannel {
        run: Option<FakeRun>,
        buffered: Vec<u8>,
        closes: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl CommandChannel for FakeChannel {
        async fn run_and_collect(&mut self, _command: &str) -> Result<CommandOutput, GatewayError> {
            match self.run.take().expect("channel reused for a second command") {
                FakeRun::Complete { output, exit_ok } => Ok(CommandOutput { output, exit_ok }),
                FakeRun::TransportError { partial } => {
                    self.buffered = partial;
                    Err(GatewayError::Transport("connection reset".to_string()))
                }
                FakeRun::Hang => {
                    std::future::pending::<()>().await;
                    unreachable!()
                }
            }
        }

        fn partial_output(&mut self) -> Vec<u8> {
            std::mem::take(&mut self.buffered)
        }

        async fn close(&mut self) {
            self.closes.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[derive(Default)]
    pub struct FakeConnection {
        runs: Mutex<VecDeque<FakeRun>>,
        fail_channel_open: Mutex<bool>,
        pub opens: AtomicUsize,
        pub closes: Arc<AtomicUsize>,
    }

    impl FakeConnection {
        pub fn scripted(runs: Vec<FakeRun>) -> Self {
            Self {
                runs: Mutex::new(runs.into()),
                ..Default::default()
            }
        }

        pub fn refusing_channels() -> Self {
            Self {
                fail_channel_open: Mutex::new(true),
                ..Default::default()
            }
        }

        pub fn open_count(&self) -> usize {
            self.opens.load(Ordering::SeqCst)
        }

        pub fn close_count(&self) -> usize {
            self.closes.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl RemoteConnection for FakeConnection {
        async fn open_command_channel(&self) -> Result<Box<dyn CommandChannel>, GatewayError> {
            self.opens.fetch_add(1, Ordering::SeqCst);
            if *self.fail_channel_open.lock().unwrap() {
                return Err(GatewayError::ChannelCreation(
                    "remote refused channel".to_string(),
                ));
            }
            let run = self.runs.lock().unwrap().pop_front();
            Ok(Box::new(FakeChannel {
                run,
                buffered: Vec::new(),
                closes: self.closes.clone(),
            }))
        }

        async fn disconnect(&self) {}
    }
}
