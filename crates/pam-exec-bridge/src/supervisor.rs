//! Helper process lifecycle: building the command line, spawning the
//! child, and folding its exit status back into a framework return code.

use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};

use tokio::process::{Child, Command};

use crate::error::SpawnError;
use crate::host::{ReturnCode, MAX_RETURN_VALUE};

/// Everything needed to launch one helper.
#[derive(Debug, Clone)]
pub struct HelperCommand {
    pub executable: PathBuf,
    pub args: Vec<String>,
    /// The helper's entire environment. Nothing from the host process
    /// leaks in unless listed here.
    pub env: Vec<(String, String)>,
    /// Propagate the caller's `TERM` so interactive helpers can drive the
    /// terminal.
    pub pass_term: bool,
}

impl HelperCommand {
    pub fn new(executable: impl Into<PathBuf>) -> Self {
        Self {
            executable: executable.into(),
            args: Vec::new(),
            env: Vec::new(),
            pass_term: false,
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn env(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((name.into(), value.into()));
        self
    }

    pub fn pass_term(mut self, pass_term: bool) -> Self {
        self.pass_term = pass_term;
        self
    }
}

/// Extension point for different helper launch strategies. Tests swap in
/// spawners that run plain shell scripts or fail on purpose.
pub trait HelperSpawner: Send + Sync {
    fn spawn(&self, cmd: &HelperCommand) -> Result<Child, SpawnError>;
}

/// Production spawner: executes the configured binary directly with a
/// scrubbed environment.
pub struct ExecSpawner {
    /// Hand the caller's stdin/stdout/stderr to the helper so it can talk
    /// to the terminal directly. Off by default since service helpers have
    /// no terminal to drive.
    pub inherit_stdio: bool,
}

impl Default for ExecSpawner {
    fn default() -> Self {
        Self {
            inherit_stdio: false,
        }
    }
}

impl HelperSpawner for ExecSpawner {
    fn spawn(&self, cmd: &HelperCommand) -> Result<Child, SpawnError> {
        check_executable(&cmd.executable)?;

        let mut command = Command::new(&cmd.executable);
        command
            .args(&cmd.args)
            .env_clear()
            .envs(cmd.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .kill_on_drop(true);

        if cmd.pass_term {
            if let Ok(term) = std::env::var("TERM") {
                command.env("TERM", term);
            }
        }

        if self.inherit_stdio {
            command
                .stdin(Stdio::inherit())
                .stdout(Stdio::inherit())
                .stderr(Stdio::inherit());
        } else {
            command
                .stdin(Stdio::null())
                .stdout(Stdio::null())
                .stderr(Stdio::null());
        }

        let child = command.spawn().map_err(SpawnError::Spawn)?;
        tracing::debug!(pid = ?child.id(), exe = %cmd.executable.display(), "spawned helper");
        Ok(child)
    }
}

/// The binary must exist and carry an execute bit before we try to run it,
/// so a misconfigured path reports cleanly instead of as a spawn failure.
fn check_executable(path: &Path) -> Result<(), SpawnError> {
    let metadata =
        std::fs::metadata(path).map_err(|_| SpawnError::NotExecutable(path.to_path_buf()))?;
    if !metadata.is_file() {
        return Err(SpawnError::NotExecutable(path.to_path_buf()));
    }
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        if metadata.permissions().mode() & 0o111 == 0 {
            return Err(SpawnError::NotExecutable(path.to_path_buf()));
        }
    }
    Ok(())
}

/// Reinterpret the helper's exit status as a framework return code.
///
/// Codes in `0..MAX_RETURN_VALUE` pass through untouched, so a helper can
/// express any framework verdict by exiting with it. Anything else,
/// including death by signal, collapses to `SystemErr`.
pub fn map_exit_status(status: ExitStatus) -> ReturnCode {
    match status.code() {
        Some(code) if (0..MAX_RETURN_VALUE).contains(&code) => {
            // from_raw cannot fail inside the range check above.
            ReturnCode::from_raw(code).unwrap_or(ReturnCode::SystemErr)
        }
        Some(code) => {
            tracing::warn!(code, "helper exit code is not a valid return value");
            ReturnCode::SystemErr
        }
        None => {
            #[cfg(unix)]
            {
                use std::os::unix::process::ExitStatusExt;
                tracing::warn!(signal = ?status.signal(), "helper was killed by a signal");
            }
            ReturnCode::SystemErr
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::process::ExitStatusExt;

    fn exit_status(code: i32) -> ExitStatus {
        // Raw wait status: exit code in the high byte.
        ExitStatus::from_raw(code << 8)
    }

    #[test]
    fn valid_exit_codes_pass_through() {
        assert_eq!(map_exit_status(exit_status(0)), ReturnCode::Success);
        assert_eq!(map_exit_status(exit_status(7)), ReturnCode::AuthErr);
        assert_eq!(map_exit_status(exit_status(25)), ReturnCode::Ignore);
        assert_eq!(map_exit_status(exit_status(31)), ReturnCode::Incomplete);
    }

    #[test]
    fn out_of_range_exit_codes_become_system_err() {
        assert_eq!(map_exit_status(exit_status(32)), ReturnCode::SystemErr);
        assert_eq!(map_exit_status(exit_status(40)), ReturnCode::SystemErr);
        assert_eq!(map_exit_status(exit_status(255)), ReturnCode::SystemErr);
    }

    #[test]
    fn signal_death_becomes_system_err() {
        // Raw wait status 9: killed by SIGKILL, no exit code.
        let status = ExitStatus::from_raw(9);
        assert_eq!(status.code(), None);
        assert_eq!(map_exit_status(status), ReturnCode::SystemErr);
    }

    #[test]
    fn missing_binary_is_not_executable() {
        let err = check_executable(Path::new("/nonexistent/helper")).unwrap_err();
        assert!(matches!(err, SpawnError::NotExecutable(_)));
    }

    #[test]
    fn file_without_exec_bit_is_not_executable() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("helper");
        std::fs::write(&path, "#!/bin/sh\n").unwrap();

        let err = check_executable(&path).unwrap_err();
        assert!(matches!(err, SpawnError::NotExecutable(_)));
    }

    #[tokio::test]
    async fn spawner_scrubs_the_environment() {
        let cmd = HelperCommand::new("/bin/sh")
            .arg("-c")
            .arg("test \"$MARKER\" = 1 -a -z \"$HOME\"")
            .env("MARKER", "1");

        let mut child = ExecSpawner::default().spawn(&cmd).unwrap();
        let status = child.wait().await.unwrap();
        assert_eq!(map_exit_status(status), ReturnCode::Success);
    }

    #[tokio::test]
    async fn inherited_stdin_reaches_the_helper() {
        use std::fs::File;
        use std::io::Write;
        use std::os::fd::{BorrowedFd, FromRawFd, OwnedFd};

        use nix::unistd::{dup, dup2, pipe};

        // Make our own stdin a pipe with one line in it, so the helper can
        // prove it received the real descriptor and not /dev/null.
        let (read_end, write_end) = pipe().unwrap();
        let saved_stdin = unsafe {
            let fd = BorrowedFd::borrow_raw(0);
            dup(fd)
        }
        .unwrap();
        let mut stdin_fd = unsafe { OwnedFd::from_raw_fd(0) };
        dup2(&read_end, &mut stdin_fd).unwrap();
        std::mem::forget(stdin_fd);
        drop(read_end);

        File::from(write_end).write_all(b"hello\n").unwrap();

        let cmd = HelperCommand::new("/bin/sh")
            .arg("-c")
            .arg("read line && [ \"$line\" = hello ] && exit 0; exit 7");
        let spawned = ExecSpawner {
            inherit_stdio: true,
        }
        .spawn(&cmd);

        // The child holds its own copy of the descriptor now; put ours back
        // before any assertion can bail out.
        let mut stdin_fd = unsafe { OwnedFd::from_raw_fd(0) };
        dup2(&saved_stdin, &mut stdin_fd).unwrap();
        std::mem::forget(stdin_fd);

        let mut child = spawned.unwrap();
        let status = child.wait().await.unwrap();
        assert_eq!(map_exit_status(status), ReturnCode::Success);
    }

    #[tokio::test]
    async fn spawner_reports_the_exit_code() {
        let cmd = HelperCommand::new("/bin/sh").arg("-c").arg("exit 7");
        let mut child = ExecSpawner::default().spawn(&cmd).unwrap();
        let status = child.wait().await.unwrap();
        assert_eq!(map_exit_status(status), ReturnCode::AuthErr);
    }
}
