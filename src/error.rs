use thiserror::Error;

/// Gateway failure taxonomy. Every handler catches these at the boundary and
/// translates them into the JSON envelope; none of them terminate the process.
#[derive(Error, Debug)]
pub enum GatewayError {
    #[error("invalid request: {0}")]
    Validation(String),

    #[error("plugin not found or disabled")]
    PluginNotFound,

    #[error("session not found")]
    SessionNotFound,

    #[error("session connection is not usable")]
    ConnectionInvalid,

    #[error("invalid asset path")]
    PathRejected,

    #[error("file not found")]
    NotFound,

    #[error("failed to open command channel: {0}")]
    ChannelCreation(String),

    #[error("remote command failed: {msg}")]
    CommandFailed { msg: String, output: Vec<u8> },

    #[error("remote file operation failed: {0}")]
    RemoteFile(String),

    #[error("transport failure: {0}")]
    Transport(String),

    #[error("configuration error: {0}")]
    Config(#[from] anyhow::Error),
}

impl GatewayError {
    /// Numeric envelope code. 0 is reserved for success; asset failures reuse
    /// the HTTP-style 404 the front end already understands.
    pub fn code(&self) -> i32 {
        match self {
            GatewayError::Validation(_) => 2,
            GatewayError::PluginNotFound => 3,
            GatewayError::SessionNotFound => 4,
            GatewayError::ConnectionInvalid => 5,
            GatewayError::ChannelCreation(_) => 6,
            GatewayError::CommandFailed { .. } => 7,
            GatewayError::PathRejected | GatewayError::NotFound => 404,
            GatewayError::RemoteFile(_)
            | GatewayError::Transport(_)
            | GatewayError::Config(_) => 1,
        }
    }

    /// Message safe to put on the wire. Internal faults and transport errors
    /// collapse to a short phrase; the full detail stays in the logs.
    pub fn public_message(&self) -> String {
        match self {
            GatewayError::Validation(msg) => format!("invalid request: {msg}"),
            GatewayError::PluginNotFound => "plugin not found or disabled".to_string(),
            GatewayError::SessionNotFound => "session not found".to_string(),
            GatewayError::ConnectionInvalid => "session connection is not usable".to_string(),
            GatewayError::PathRejected => "invalid path".to_string(),
            GatewayError::NotFound => "file not found".to_string(),
            GatewayError::ChannelCreation(_) => "failed to open command channel".to_string(),
            GatewayError::CommandFailed { msg, .. } => format!("remote command failed: {msg}"),
            GatewayError::RemoteFile(msg) => msg.clone(),
            GatewayError::Transport(_) => "remote transport failure".to_string(),
            GatewayError::Config(_) => "internal error".to_string(),
        }
    }
}
