//! Per-handle session state and the exclusive action slot.
//!
//! The framework owns an opaque handle per login; the bridge hangs one
//! [`SessionState`] off it, created lazily on the first action and torn
//! down only by the framework-invoked finalizer. The RPC server persists
//! across actions on the same handle; the helper of a later action
//! reconnects to the same address.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use tokio::runtime::Runtime;
use tokio_util::sync::CancellationToken;

use crate::error::{BridgeError, TransportError};
use crate::transport::BridgeServer;

/// Key into the bridge's handle-keyed storage. The host shim derives it
/// from the framework handle it was called with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HandleId(pub u64);

/// Guarded exclusive slot for the one action allowed per handle.
#[derive(Debug, Default)]
struct ActionSlot {
    active: Mutex<Option<String>>,
}

impl ActionSlot {
    fn try_acquire(&self, name: &str) -> Result<(), BridgeError> {
        let mut active = self.active.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(running) = active.as_ref() {
            return Err(BridgeError::ActionAlreadyActive(running.clone()));
        }
        *active = Some(name.to_string());
        Ok(())
    }

    fn release(&self) {
        let mut active = self.active.lock().unwrap_or_else(|e| e.into_inner());
        *active = None;
    }
}

/// Releases the action slot when dropped, on every return path.
#[derive(Debug)]
pub struct ActionGuard<'a> {
    slot: &'a ActionSlot,
}

impl Drop for ActionGuard<'_> {
    fn drop(&mut self) {
        self.slot.release();
    }
}

pub struct SessionState {
    /// Single-threaded runtime driving the action event loop. The
    /// listener is bound to this runtime's reactor, so the runtime must
    /// outlive the server.
    runtime: Runtime,
    server: Mutex<Option<Arc<BridgeServer>>>,
    cancel: CancellationToken,
    slot: ActionSlot,
    finalized: AtomicBool,
}

impl SessionState {
    pub fn new() -> Result<Self, BridgeError> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()?;
        Ok(Self {
            runtime,
            server: Mutex::new(None),
            cancel: CancellationToken::new(),
            slot: ActionSlot::default(),
            finalized: AtomicBool::new(false),
        })
    }

    pub fn runtime(&self) -> &Runtime {
        &self.runtime
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// The RPC server for this handle, created on first use and reused by
    /// every later action.
    pub fn ensure_server(&self) -> Result<Arc<BridgeServer>, BridgeError> {
        if self.finalized.load(Ordering::SeqCst) {
            return Err(TransportError::Stopped.into());
        }
        let mut server = self.server.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(server) = server.as_ref() {
            return Ok(server.clone());
        }
        let _enter = self.runtime.enter();
        let created = Arc::new(BridgeServer::create()?);
        tracing::debug!(address = %created.address().display(), "created session transport");
        *server = Some(created.clone());
        Ok(created)
    }

    /// Claim the exclusive action slot. Fails, never overwrites, when
    /// another action is still registered on this handle.
    pub fn begin_action(&self, name: &str) -> Result<ActionGuard<'_>, BridgeError> {
        self.slot.try_acquire(name)?;
        Ok(ActionGuard { slot: &self.slot })
    }

    /// Tear the session down: cancel whatever is in flight and remove the
    /// transport with its directory. Safe to call more than once.
    pub fn finalize(&self) {
        if self.finalized.swap(true, Ordering::SeqCst) {
            return;
        }
        self.cancel.cancel();
        let server = {
            let mut server = self.server.lock().unwrap_or_else(|e| e.into_inner());
            server.take()
        };
        if let Some(server) = server {
            tracing::debug!(address = %server.address().display(), "removing session transport");
        }
    }
}

impl Drop for SessionState {
    fn drop(&mut self) {
        self.finalize();
    }
}

/// Handle-keyed storage for sessions. The host shim holds one store per
/// loaded library instance and routes framework callbacks through it.
#[derive(Default)]
pub struct SessionStore {
    sessions: Mutex<HashMap<HandleId, Arc<SessionState>>>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_or_create(&self, id: HandleId) -> Result<Arc<SessionState>, BridgeError> {
        let mut sessions = self.sessions.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(session) = sessions.get(&id) {
            return Ok(session.clone());
        }
        let session = Arc::new(SessionState::new()?);
        sessions.insert(id, session.clone());
        Ok(session)
    }

    /// The framework's teardown hook for one handle. Idempotent; unknown
    /// handles are a no-op.
    pub fn finalize(&self, id: HandleId) {
        let session = {
            let mut sessions = self.sessions.lock().unwrap_or_else(|e| e.into_inner());
            sessions.remove(&id)
        };
        if let Some(session) = session {
            session.finalize();
        }
    }
}
