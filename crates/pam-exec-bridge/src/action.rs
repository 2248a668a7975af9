//! Per-action entry point.
//!
//! One call to [`run_action`] ties together the whole bridge: parse the
//! module options, claim the exclusive slots, bring up (or reuse) the
//! session transport, spawn the helper, then serve its RPC calls from a
//! single-threaded event loop until it exits. The helper's exit status is
//! the action's verdict.

use std::io::{self, IsTerminal};

use futures::{SinkExt, StreamExt};
use tokio::net::UnixStream;
use tokio::process::Child;
use tokio_util::codec::Framed;
use tokio_util::sync::CancellationToken;

use crate::bridge::codec::FrameCodec;
use crate::bridge::extension::{extension_type, JSON_EXTENSION};
use crate::bridge::protocol::{BridgeRequest, BridgeResponse};
use crate::config::ExecOptions;
use crate::dispatch::dispatch;
use crate::error::{BridgeError, ConfigError, SpawnError};
use crate::host::{HostTransaction, ReturnCode};
use crate::runtime::BridgeRuntime;
use crate::session::SessionState;
use crate::supervisor::{map_exit_status, ExecSpawner, HelperCommand, HelperSpawner};
use crate::transport::{authorize_peer, BridgeServer, PeerInfo};

/// The framework steps the bridge can run. Names match the argv token
/// handed to the helper.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Authenticate,
    AcctMgmt,
    OpenSession,
    CloseSession,
    ChAuthTok,
    SetCred,
}

impl Action {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Authenticate => "authenticate",
            Self::AcctMgmt => "acct_mgmt",
            Self::OpenSession => "open_session",
            Self::CloseSession => "close_session",
            Self::ChAuthTok => "chauthtok",
            Self::SetCred => "setcred",
        }
    }
}

impl std::fmt::Display for Action {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Run one action with the production spawner. When our own stdin is a
/// terminal the helper gets the standard descriptors passed through, so a
/// console login can prompt directly; services get `/dev/null`.
pub fn run_action<S: AsRef<str>>(
    session: &SessionState,
    host: &mut dyn HostTransaction,
    action: Action,
    flags: i32,
    args: &[S],
) -> ReturnCode {
    let spawner = ExecSpawner {
        inherit_stdio: io::stdin().is_terminal(),
    };
    run_action_with(session, host, action, flags, args, &spawner, false)
}

/// [`run_action`] with an injected spawner and an explicit test-mode
/// switch. Test mode relaxes the peer pid check to this process's own
/// pid, so a harness can play the helper in-process.
pub fn run_action_with<S: AsRef<str>>(
    session: &SessionState,
    host: &mut dyn HostTransaction,
    action: Action,
    flags: i32,
    args: &[S],
    spawner: &dyn HelperSpawner,
    test_mode: bool,
) -> ReturnCode {
    let runtime = BridgeRuntime::global();
    let _serialized = runtime.lock_action();

    let opts = match ExecOptions::parse(args.iter().map(AsRef::as_ref)) {
        Ok(opts) => opts,
        Err(err) => return fail(host, action, &err.into()),
    };
    let _log = runtime.log_override(opts.log_file.clone(), opts.debug);

    tracing::info!(%action, exe = %opts.executable.display(), "starting action");
    match run(session, host, action, flags, &opts, spawner, test_mode) {
        Ok(code) => {
            tracing::info!(%action, %code, "action finished");
            code
        }
        Err(err) => fail(host, action, &err),
    }
}

fn fail(host: &mut dyn HostTransaction, action: Action, err: &BridgeError) -> ReturnCode {
    tracing::error!(%action, error = %err, "action failed");
    host.error_msg(&format!("authentication helper failure: {err}"));
    match err {
        BridgeError::Config(ConfigError::NoExecutable)
        | BridgeError::Spawn(SpawnError::NotExecutable(_)) => ReturnCode::ModuleUnknown,
        _ => ReturnCode::SystemErr,
    }
}

fn run(
    session: &SessionState,
    host: &mut dyn HostTransaction,
    action: Action,
    flags: i32,
    opts: &ExecOptions,
    spawner: &dyn HelperSpawner,
    test_mode: bool,
) -> Result<ReturnCode, BridgeError> {
    let _slot = session.begin_action(action.as_str())?;
    let server = session.ensure_server()?;

    // Negotiated before the helper exists; the helper learns about the
    // extension from its own argv, never by renegotiating.
    let json_extension = extension_type(JSON_EXTENSION);

    let interactive = io::stdin().is_terminal();

    // Configured variables are visible both ways: in the helper's own
    // process environment and through GetEnv on the handle.
    for (name, value) in &opts.env {
        let code = host.putenv(&format!("{name}={value}"));
        if !code.is_success() {
            tracing::warn!(%name, %code, "failed to seed handle environment");
        }
    }

    let mut cmd = HelperCommand::new(&opts.executable)
        .arg("-flags")
        .arg(flags.to_string())
        .arg("-server-address")
        .arg(server.address().display().to_string())
        .pass_term(interactive);
    if json_extension.is_some() {
        cmd = cmd.arg("-enable-gdm");
    }
    cmd = cmd.arg(action.as_str()).args(opts.helper_args.iter().cloned());
    for (name, value) in &opts.env {
        cmd = cmd.env(name, value);
    }

    let child = {
        let _enter = session.runtime().enter();
        spawner.spawn(&cmd)?
    };

    session.runtime().block_on(event_loop(
        &server,
        child,
        host,
        json_extension,
        test_mode,
        session.cancel_token(),
    ))
}

/// Serve the helper until it exits. One RPC peer at a time; refused
/// connections never stop the listener.
async fn event_loop(
    server: &BridgeServer,
    mut child: Child,
    host: &mut dyn HostTransaction,
    json_extension: Option<u32>,
    test_mode: bool,
    cancel: CancellationToken,
) -> Result<ReturnCode, BridgeError> {
    type ClientFramed = Framed<UnixStream, FrameCodec<BridgeRequest, BridgeResponse>>;

    let helper_pid = child.id();
    let mut client: Option<ClientFramed> = None;

    loop {
        let mut disconnect = false;

        if let Some(framed) = client.as_mut() {
            tokio::select! {
                biased;

                _ = cancel.cancelled() => {
                    tracing::warn!("session torn down mid-action, killing helper");
                    let _ = child.kill().await;
                    return Ok(ReturnCode::SystemErr);
                }

                status = child.wait() => {
                    let status = status?;
                    return Ok(map_exit_status(status));
                }

                frame = framed.next() => match frame {
                    Some(Ok(req)) => {
                        let resp = dispatch(host, json_extension, req);
                        if let Err(err) = framed.send(resp).await {
                            tracing::warn!(error = %err, "failed to send reply, dropping peer");
                            disconnect = true;
                        }
                    }
                    Some(Err(err)) => {
                        tracing::warn!(error = %err, "bad frame from peer, dropping it");
                        disconnect = true;
                    }
                    None => {
                        tracing::debug!("peer disconnected");
                        disconnect = true;
                    }
                },

                accepted = server.accept() => match accepted {
                    Ok(_) => tracing::warn!("refusing second concurrent connection"),
                    Err(err) => tracing::warn!(error = %err, "accept failed, still listening"),
                },
            }
        } else {
            tokio::select! {
                biased;

                _ = cancel.cancelled() => {
                    tracing::warn!("session torn down mid-action, killing helper");
                    let _ = child.kill().await;
                    return Ok(ReturnCode::SystemErr);
                }

                status = child.wait() => {
                    let status = status?;
                    return Ok(map_exit_status(status));
                }

                accepted = server.accept() => {
                    if let Some(stream) = admit(accepted, helper_pid, test_mode) {
                        tracing::debug!("helper connected");
                        client = Some(Framed::new(stream, FrameCodec::default()));
                    }
                }
            }
        }

        if disconnect {
            client = None;
        }
    }
}

/// Vet one accept outcome. Failed accepts and unauthorized peers are
/// logged and dropped; the listener stays open either way.
fn admit(
    accepted: io::Result<UnixStream>,
    helper_pid: Option<u32>,
    test_mode: bool,
) -> Option<UnixStream> {
    let stream = match accepted {
        Ok(stream) => stream,
        Err(err) => {
            tracing::warn!(error = %err, "accept failed, still listening");
            return None;
        }
    };
    let authorized = PeerInfo::from_stream(&stream)
        .and_then(|peer| authorize_peer(&peer, helper_pid, test_mode));
    match authorized {
        Ok(()) => Some(stream),
        Err(err) => {
            tracing::warn!(error = %err, "refusing connection");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::path::{Path, PathBuf};

    use crate::client::HelperClient;
    use crate::testing::DummyTransaction;

    #[test]
    fn action_names_match_the_helper_argv() {
        assert_eq!(Action::Authenticate.as_str(), "authenticate");
        assert_eq!(Action::AcctMgmt.as_str(), "acct_mgmt");
        assert_eq!(Action::OpenSession.as_str(), "open_session");
        assert_eq!(Action::CloseSession.as_str(), "close_session");
        assert_eq!(Action::ChAuthTok.as_str(), "chauthtok");
        assert_eq!(Action::SetCred.as_str(), "setcred");
    }

    fn write_script(dir: &Path, name: &str, body: &str) -> PathBuf {
        use std::os::unix::fs::PermissionsExt;

        let path = dir.join(name);
        std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    /// A helper that polls for a flag file so the test client controls
    /// when it exits. Times out into an error exit code.
    fn waiting_script(dir: &Path, flag: &Path) -> PathBuf {
        write_script(
            dir,
            "helper.sh",
            &format!(
                "i=0\n\
                 while [ $i -lt 100 ]; do\n\
                 \t[ -e \"{flag}\" ] && exit 0\n\
                 \ti=$((i+1))\n\
                 \tsleep 0.1\n\
                 done\n\
                 exit 4",
                flag = flag.display()
            ),
        )
    }

    fn run(
        session: &SessionState,
        host: &mut DummyTransaction,
        args: Vec<String>,
        test_mode: bool,
    ) -> ReturnCode {
        run_action_with(
            session,
            host,
            Action::Authenticate,
            0,
            &args,
            &ExecSpawner::default(),
            test_mode,
        )
    }

    #[test]
    fn authenticate_end_to_end_with_in_process_client() {
        let dir = tempfile::tempdir().unwrap();
        let flag = dir.path().join("done");
        let script = waiting_script(dir.path(), &flag);

        let session = SessionState::new().unwrap();
        let address = session.ensure_server().unwrap().address().to_path_buf();

        let client_thread = std::thread::spawn(move || {
            let rt = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .unwrap();
            rt.block_on(async move {
                let mut client = HelperClient::connect(&address).await.unwrap();
                let user = client.get_env("USER").await.unwrap();
                std::fs::write(&flag, b"ok").unwrap();
                user
            })
        });

        let mut host = DummyTransaction::new();
        let args = vec![
            "exec-env".to_string(),
            "USER=alice".to_string(),
            script.to_str().unwrap().to_string(),
        ];
        let code = run(&session, &mut host, args, true);
        assert_eq!(code, ReturnCode::Success);
        assert_eq!(client_thread.join().unwrap(), "alice");
    }

    #[test]
    fn second_connection_is_refused_while_the_first_is_served() {
        let dir = tempfile::tempdir().unwrap();
        let flag = dir.path().join("done");
        let script = waiting_script(dir.path(), &flag);

        let session = SessionState::new().unwrap();
        let address = session.ensure_server().unwrap().address().to_path_buf();

        let client_thread = std::thread::spawn(move || {
            let rt = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .unwrap();
            rt.block_on(async move {
                let mut first = HelperClient::connect(&address).await.unwrap();
                assert_eq!(first.get_env("USER").await.unwrap(), "alice");

                let mut second = HelperClient::connect(&address).await.unwrap();
                let refused = second.get_env("USER").await;
                assert!(refused.is_err(), "duplicate connection must be refused");

                // The first peer is unaffected by the refusal.
                assert_eq!(first.get_env("USER").await.unwrap(), "alice");
                std::fs::write(&flag, b"ok").unwrap();
            })
        });

        let mut host = DummyTransaction::new();
        let args = vec![
            "exec-env".to_string(),
            "USER=alice".to_string(),
            script.to_str().unwrap().to_string(),
        ];
        let code = run(&session, &mut host, args, true);
        assert_eq!(code, ReturnCode::Success);
        client_thread.join().unwrap();
    }

    #[test]
    fn foreign_peer_is_refused_without_test_mode() {
        let dir = tempfile::tempdir().unwrap();
        let flag = dir.path().join("done");
        let script = waiting_script(dir.path(), &flag);

        let session = SessionState::new().unwrap();
        let address = session.ensure_server().unwrap().address().to_path_buf();

        // This process is not the spawned helper, so without test mode its
        // pid cannot pass the peer check.
        let client_thread = std::thread::spawn(move || {
            let rt = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .unwrap();
            rt.block_on(async move {
                let mut client = HelperClient::connect(&address).await.unwrap();
                let refused = client.get_env("USER").await;
                std::fs::write(&flag, b"ok").unwrap();
                refused
            })
        });

        let mut host = DummyTransaction::new();
        let args = vec![script.to_str().unwrap().to_string()];
        let code = run(&session, &mut host, args, false);
        assert_eq!(code, ReturnCode::Success);
        assert!(client_thread.join().unwrap().is_err());
    }

    #[tokio::test]
    async fn admit_drops_failed_accepts_and_vets_peers() {
        let aborted: io::Result<UnixStream> = Err(io::ErrorKind::ConnectionAborted.into());
        assert!(admit(aborted, None, false).is_none());

        // Peer credentials on a socketpair are our own, so test mode
        // admits it and a mismatched expected pid does not.
        let (ours, _theirs) = UnixStream::pair().unwrap();
        assert!(admit(Ok(ours), None, true).is_some());

        let (ours, _theirs) = UnixStream::pair().unwrap();
        assert!(admit(Ok(ours), Some(1), false).is_none());
    }

    /// Entry point for the re-exec helper below. Does nothing unless the
    /// parent test put the transport address in the environment.
    #[test]
    #[ignore]
    fn helper_entry() {
        let address = match std::env::var("BRIDGE_HELPER_ADDRESS") {
            Ok(address) => address,
            Err(_) => return,
        };
        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        rt.block_on(async move {
            let mut client = HelperClient::connect(&address).await.unwrap();
            assert_eq!(client.get_env("USER").await.unwrap(), "alice");
        });
    }

    /// Re-executes this test binary as the helper, filtered down to
    /// [`helper_entry`]. The child is a real separate process, so its pid
    /// has to satisfy the production peer policy.
    struct SelfSpawner;

    impl HelperSpawner for SelfSpawner {
        fn spawn(&self, cmd: &HelperCommand) -> Result<Child, crate::error::SpawnError> {
            use crate::error::SpawnError;

            let address = cmd
                .args
                .iter()
                .position(|arg| arg == "-server-address")
                .and_then(|at| cmd.args.get(at + 1))
                .ok_or_else(|| SpawnError::Spawn(io::Error::other("no address in helper argv")))?;

            let exe = std::env::current_exe().map_err(SpawnError::Spawn)?;
            tokio::process::Command::new(exe)
                .args(["action::tests::helper_entry", "--exact", "--ignored"])
                .env("BRIDGE_HELPER_ADDRESS", address)
                .stdin(std::process::Stdio::null())
                .stdout(std::process::Stdio::null())
                .stderr(std::process::Stdio::null())
                .kill_on_drop(true)
                .spawn()
                .map_err(SpawnError::Spawn)
        }
    }

    #[test]
    fn refused_peer_does_not_block_the_real_helper() {
        let session = SessionState::new().unwrap();
        let address = session.ensure_server().unwrap().address().to_path_buf();

        // A foreign connection races the real helper. Whenever it gets
        // accepted its pid is ours, not the helper's, so it must be turned
        // away without disturbing the helper's own session.
        let foreign = std::thread::spawn(move || {
            let rt = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .unwrap();
            rt.block_on(async move {
                let mut client = HelperClient::connect(&address).await.unwrap();
                client.get_env("USER").await
            })
        });

        let mut host = DummyTransaction::new();
        let exe = std::env::current_exe().unwrap();
        let args = vec![
            "exec-env".to_string(),
            "USER=alice".to_string(),
            exe.to_str().unwrap().to_string(),
        ];
        let code = run_action_with(
            &session,
            &mut host,
            Action::Authenticate,
            0,
            &args,
            &SelfSpawner,
            false,
        );
        assert_eq!(code, ReturnCode::Success);
        assert!(foreign.join().unwrap().is_err());
    }

    #[test]
    fn helper_exit_codes_pass_through_and_transport_is_reused() {
        let dir = tempfile::tempdir().unwrap();
        let auth_err = write_script(dir.path(), "auth_err.sh", "exit 7");
        let out_of_range = write_script(dir.path(), "oor.sh", "exit 40");

        let session = SessionState::new().unwrap();
        let first_id = session.ensure_server().unwrap().server_id();

        let mut host = DummyTransaction::new();
        let code = run(
            &session,
            &mut host,
            vec![auth_err.to_str().unwrap().to_string()],
            false,
        );
        assert_eq!(code, ReturnCode::AuthErr);

        let code = run(
            &session,
            &mut host,
            vec![out_of_range.to_str().unwrap().to_string()],
            false,
        );
        assert_eq!(code, ReturnCode::SystemErr);

        assert_eq!(session.ensure_server().unwrap().server_id(), first_id);
    }

    #[test]
    fn missing_helper_is_module_unknown_and_reported() {
        let session = SessionState::new().unwrap();
        let mut host = DummyTransaction::new();

        let code = run(
            &session,
            &mut host,
            vec!["/nonexistent/helper".to_string()],
            false,
        );
        assert_eq!(code, ReturnCode::ModuleUnknown);
        assert!(!host.shown_errors.is_empty());
    }

    #[test]
    fn no_executable_is_module_unknown() {
        let session = SessionState::new().unwrap();
        let mut host = DummyTransaction::new();

        let code = run(&session, &mut host, vec!["exec-debug".to_string()], false);
        assert_eq!(code, ReturnCode::ModuleUnknown);
    }
}
