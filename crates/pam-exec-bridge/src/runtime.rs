//! Process-wide bridge state.
//!
//! The host loads this library once per process and may drive many
//! handles from it. [`BridgeRuntime`] is the one object shared across all
//! of them: the action-serialization lock and the swappable log sink. It
//! is built lazily on first use and lives until process exit; nothing
//! ever tears it down.

use std::path::PathBuf;
use std::sync::{Mutex, MutexGuard, OnceLock};

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{reload, EnvFilter, Registry};

use crate::logging::LogSink;

const DEFAULT_FILTER: &str = "pam_exec_bridge=info";
const DEBUG_FILTER: &str = "pam_exec_bridge=debug";

static RUNTIME: OnceLock<BridgeRuntime> = OnceLock::new();

pub struct BridgeRuntime {
    /// Held for the duration of one action. The log override is global,
    /// so two actions must never run concurrently in one process.
    action_lock: Mutex<()>,
    sink: LogSink,
    filter: reload::Handle<EnvFilter, Registry>,
}

impl BridgeRuntime {
    pub fn global() -> &'static Self {
        RUNTIME.get_or_init(Self::init)
    }

    fn init() -> Self {
        let base = match std::env::var("RUST_LOG") {
            Ok(directives) => EnvFilter::new(directives),
            Err(_) => EnvFilter::new(DEFAULT_FILTER),
        };
        let (filter_layer, filter) = reload::Layer::new(base);
        let sink = LogSink::default();

        // The host may already have a subscriber installed; in that case
        // ours stays dormant and its logs go wherever the host sends them.
        let _ = tracing_subscriber::registry()
            .with(filter_layer)
            .with(
                tracing_subscriber::fmt::layer()
                    .with_ansi(false)
                    .with_writer(sink.clone()),
            )
            .try_init();

        Self {
            action_lock: Mutex::new(()),
            sink,
            filter,
        }
    }

    /// Serialize actions process-wide. Blocks until any other in-flight
    /// action finishes.
    pub fn lock_action(&self) -> MutexGuard<'_, ()> {
        self.action_lock.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Apply one action's log options. Reverted when the guard drops, on
    /// every return path.
    pub fn log_override(&self, file: Option<PathBuf>, debug: bool) -> LogOverrideGuard<'_> {
        self.sink.set_file(file);
        if debug {
            let _ = self.filter.reload(EnvFilter::new(DEBUG_FILTER));
        }
        LogOverrideGuard { runtime: self }
    }

    fn reset_log_override(&self) {
        self.sink.set_file(None);
        let base = match std::env::var("RUST_LOG") {
            Ok(directives) => EnvFilter::new(directives),
            Err(_) => EnvFilter::new(DEFAULT_FILTER),
        };
        let _ = self.filter.reload(base);
    }
}

/// Restores the default log sink and level when dropped.
pub struct LogOverrideGuard<'a> {
    runtime: &'a BridgeRuntime,
}

impl Drop for LogOverrideGuard<'_> {
    fn drop(&mut self) {
        self.runtime.reset_log_override();
    }
}
