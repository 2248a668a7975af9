//! pam-exec-bridge: run an authentication step in an external helper.
//!
//! The bridge is loaded by a host authentication framework, spawns a
//! helper process for each action, and serves the helper's RPC calls over
//! a private unix socket. The helper's exit code becomes the framework's
//! return code.

mod action;
mod config;
mod dispatch;
mod logging;
mod runtime;
mod session;
mod supervisor;

pub mod bridge;
pub mod client;
pub mod error;
pub mod host;
pub mod testing;
pub mod transport;

pub use action::{run_action, run_action_with, Action};
pub use config::ExecOptions;
pub use error::BridgeError;
pub use host::{
    ConvRequest, ConvResponse, HostTransaction, Item, MessageStyle, ReturnCode, MAX_RETURN_VALUE,
};
pub use runtime::{BridgeRuntime, LogOverrideGuard};
pub use session::{HandleId, SessionState, SessionStore};
pub use supervisor::{map_exit_status, ExecSpawner, HelperCommand, HelperSpawner};
