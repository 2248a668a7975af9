//! Error taxonomy for the exec bridge.
//!
//! Setup-time failures (config, transport, spawn) abort the whole action.
//! Per-call protocol errors answer a single RPC call and leave the
//! connection open. Authentication failures refuse a connection and leave
//! the server listening.

use std::path::PathBuf;

use crate::bridge::protocol::ErrorKind;

/// Bad module options.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("missing value for option `{0}`")]
    MissingValue(&'static str),

    #[error("malformed environment entry `{0}` (expected NAME=VALUE)")]
    MalformedEnv(String),

    #[error("no executable provided")]
    NoExecutable,
}

/// Failure to create or run the private RPC server.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("failed to create server directory: {0}")]
    CreateDir(#[source] std::io::Error),

    #[error("failed to bind server socket at {path}: {source}")]
    Bind {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("server is not running")]
    Stopped,
}

/// Failure to launch the helper process.
#[derive(Debug, thiserror::Error)]
pub enum SpawnError {
    #[error("`{0}` is not an executable file")]
    NotExecutable(PathBuf),

    #[error("failed to spawn helper: {0}")]
    Spawn(#[source] std::io::Error),
}

/// A connection attempt that must be refused.
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("another client is already using this connection")]
    DuplicateConnection,

    #[error("unable to read peer credentials: {0}")]
    Credentials(#[source] std::io::Error),

    #[error("peer uid {actual} does not match our uid {expected}")]
    UidMismatch { expected: u32, actual: u32 },

    #[error("peer pid {actual:?} does not match the spawned helper")]
    PidMismatch { actual: Option<i32> },
}

/// Per-call RPC failures. Returned to the one offending call, the
/// connection stays open.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("no method implementation for `{0}`")]
    UnknownMethod(String),

    #[error("extension `{0}` is not supported")]
    ExtensionNotSupported(String),

    #[error("no conversation reply")]
    NoConversationReply,

    #[error("invalid extension reply: {0}")]
    InvalidReply(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),
}

impl ProtocolError {
    /// The wire-level error class carried back to the caller.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::UnknownMethod(_) => ErrorKind::UnknownMethod,
            Self::ExtensionNotSupported(_) => ErrorKind::NotSupported,
            Self::NoConversationReply => ErrorKind::ConversationFailed,
            Self::InvalidReply(_) => ErrorKind::InvalidArgs,
            Self::InvalidArgument(_) => ErrorKind::InvalidArgs,
        }
    }
}

/// Umbrella error for action setup and the event loop.
#[derive(Debug, thiserror::Error)]
pub enum BridgeError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Spawn(#[from] SpawnError),

    #[error(transparent)]
    Auth(#[from] AuthError),

    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error("action `{0}` is already running on this handle")]
    ActionAlreadyActive(String),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}
