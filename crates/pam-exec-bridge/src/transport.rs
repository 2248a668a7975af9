//! Private local RPC server.
//!
//! One server per session, bound inside a freshly created owner-only
//! temporary directory. The directory (and with it the socket) is removed
//! when the session is finalized. The server accepts exactly one peer at a
//! time and refuses everything that does not carry the credentials of the
//! helper we spawned.

use std::io;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use tempfile::TempDir;
use tokio::net::{UnixListener, UnixStream};
use uuid::Uuid;

use crate::error::{AuthError, TransportError};

/// Identity of the far end of a local connection, as reported by the OS.
#[derive(Debug, Clone, Copy)]
pub struct PeerInfo {
    pub uid: u32,
    pub pid: Option<i32>,
}

impl PeerInfo {
    pub fn from_stream(stream: &UnixStream) -> Result<Self, AuthError> {
        let cred = stream.peer_cred().map_err(AuthError::Credentials)?;
        Ok(Self {
            uid: cred.uid(),
            pid: cred.pid(),
        })
    }
}

/// Accept-or-refuse decision for one connection attempt.
///
/// Only a peer with our own uid and the spawned helper's pid is let in.
/// `test_mode` additionally admits our own pid, so harnesses that drive
/// the bridge and the client from one process can connect.
pub fn authorize_peer(
    peer: &PeerInfo,
    expected_pid: Option<u32>,
    test_mode: bool,
) -> Result<(), AuthError> {
    let own_uid = nix::unistd::getuid().as_raw();
    if peer.uid != own_uid {
        return Err(AuthError::UidMismatch {
            expected: own_uid,
            actual: peer.uid,
        });
    }

    let pid = match peer.pid {
        Some(pid) if pid > 0 => pid as u32,
        _ => return Err(AuthError::PidMismatch { actual: peer.pid }),
    };

    if Some(pid) == expected_pid {
        return Ok(());
    }
    if test_mode && pid == std::process::id() {
        return Ok(());
    }
    Err(AuthError::PidMismatch {
        actual: peer.pid,
    })
}

/// The per-session server. Creation is idempotent at the session level;
/// callers go through `SessionState::ensure_server`.
pub struct BridgeServer {
    // Order matters: the listener closes before the directory is removed.
    listener: UnixListener,
    socket_path: PathBuf,
    server_id: Uuid,
    dir: TempDir,
}

impl BridgeServer {
    /// Bind a fresh server. Needs a tokio runtime context. Once this
    /// returns, the address is accepting connections, so it is safe to
    /// hand to a child process.
    pub fn create() -> Result<Self, TransportError> {
        let dir = tempfile::Builder::new()
            .prefix("pam-exec-bridge-")
            .tempdir()
            .map_err(TransportError::CreateDir)?;
        std::fs::set_permissions(dir.path(), std::fs::Permissions::from_mode(0o700))
            .map_err(TransportError::CreateDir)?;

        let socket_path = dir.path().join("bridge.sock");
        let listener = UnixListener::bind(&socket_path).map_err(|source| TransportError::Bind {
            path: socket_path.clone(),
            source,
        })?;

        let server_id = Uuid::new_v4();
        tracing::debug!(address = %socket_path.display(), %server_id, "bridge server listening");

        Ok(Self {
            listener,
            socket_path,
            server_id,
            dir,
        })
    }

    /// Socket address handed to the helper via `-server-address`.
    pub fn address(&self) -> &Path {
        &self.socket_path
    }

    pub fn server_id(&self) -> Uuid {
        self.server_id
    }

    pub fn dir_path(&self) -> &Path {
        self.dir.path()
    }

    /// Wait for the next connection attempt. Policy checks are the event
    /// loop's job; a refused peer must not stop the listener.
    pub async fn accept(&self) -> io::Result<UnixStream> {
        let (stream, _) = self.listener.accept().await?;
        Ok(stream)
    }
}
