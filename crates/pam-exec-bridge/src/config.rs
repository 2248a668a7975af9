//! Module option parsing.
//!
//! Options arrive as the plain token list the framework hands to the
//! module. Flags may be written bare (`exec-debug`) or GNU style
//! (`--exec-debug`, `--exec-log=/path`). A literal `--` ends flag
//! scanning; everything after it is positional. Unrecognized tokens are
//! not errors, they pass through to the helper untouched.

use std::path::PathBuf;

use crate::error::ConfigError;

/// Parsed module options: bridge flags plus the helper command line.
#[derive(Debug, Clone, PartialEq)]
pub struct ExecOptions {
    /// `NAME=VALUE` pairs handed to the helper as its environment.
    pub env: Vec<(String, String)>,
    /// Verbose logging for this action.
    pub debug: bool,
    /// Append logs to this file instead of stderr.
    pub log_file: Option<PathBuf>,
    /// The helper binary.
    pub executable: PathBuf,
    /// Arguments forwarded to the helper after the bridge's own.
    pub helper_args: Vec<String>,
}

impl ExecOptions {
    pub fn parse<I, S>(args: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut env = Vec::new();
        let mut debug = false;
        let mut log_file = None;
        let mut positional: Vec<String> = Vec::new();
        let mut flags_done = false;

        let mut args = args.into_iter();
        while let Some(token) = args.next() {
            let token = token.as_ref();

            if flags_done {
                positional.push(token.to_string());
                continue;
            }
            if token == "--" {
                flags_done = true;
                continue;
            }

            let flag = token.strip_prefix("--").unwrap_or(token);
            let (name, inline) = match flag.split_once('=') {
                Some((name, value)) => (name, Some(value.to_string())),
                None => (flag, None),
            };

            let mut take_value = |opt: &'static str| -> Result<String, ConfigError> {
                match inline.clone() {
                    Some(value) => Ok(value),
                    None => args
                        .next()
                        .map(|v| v.as_ref().to_string())
                        .ok_or(ConfigError::MissingValue(opt)),
                }
            };

            match name {
                "exec-debug" => debug = true,
                "exec-env" => {
                    let entry = take_value("exec-env")?;
                    let (name, value) = entry
                        .split_once('=')
                        .ok_or_else(|| ConfigError::MalformedEnv(entry.clone()))?;
                    if name.is_empty() {
                        return Err(ConfigError::MalformedEnv(entry));
                    }
                    env.push((name.to_string(), value.to_string()));
                }
                "exec-log" => log_file = Some(PathBuf::from(take_value("exec-log")?)),
                _ => positional.push(token.to_string()),
            }
        }

        let mut positional = positional.into_iter();
        let executable = positional.next().ok_or(ConfigError::NoExecutable)?;

        Ok(Self {
            env,
            debug,
            log_file,
            executable: PathBuf::from(executable),
            helper_args: positional.collect(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Result<ExecOptions, ConfigError> {
        ExecOptions::parse(args.iter().copied())
    }

    #[test]
    fn full_command_line() {
        let opts = parse(&[
            "exec-debug",
            "exec-env",
            "USER=alice",
            "exec-env",
            "LANG=C",
            "exec-log",
            "/tmp/bridge.log",
            "/usr/libexec/helper",
            "--verbose",
        ])
        .unwrap();

        assert!(opts.debug);
        assert_eq!(
            opts.env,
            vec![
                ("USER".to_string(), "alice".to_string()),
                ("LANG".to_string(), "C".to_string())
            ]
        );
        assert_eq!(opts.log_file, Some(PathBuf::from("/tmp/bridge.log")));
        assert_eq!(opts.executable, PathBuf::from("/usr/libexec/helper"));
        assert_eq!(opts.helper_args, vec!["--verbose".to_string()]);
    }

    #[test]
    fn gnu_style_flags_with_inline_values() {
        let opts = parse(&[
            "--exec-debug",
            "--exec-env=USER=alice",
            "--exec-log=/tmp/b.log",
            "/bin/helper",
        ])
        .unwrap();

        assert!(opts.debug);
        assert_eq!(opts.env, vec![("USER".to_string(), "alice".to_string())]);
        assert_eq!(opts.log_file, Some(PathBuf::from("/tmp/b.log")));
    }

    #[test]
    fn env_value_may_contain_equals() {
        let opts = parse(&["exec-env", "OPTS=a=b", "/bin/helper"]).unwrap();
        assert_eq!(opts.env, vec![("OPTS".to_string(), "a=b".to_string())]);
    }

    #[test]
    fn missing_value_is_an_error() {
        let err = parse(&["/bin/helper", "exec-log"]).unwrap_err();
        assert!(matches!(err, ConfigError::MissingValue("exec-log")));
    }

    #[test]
    fn malformed_env_is_an_error() {
        let err = parse(&["exec-env", "NOEQUALS", "/bin/helper"]).unwrap_err();
        assert!(matches!(err, ConfigError::MalformedEnv(e) if e == "NOEQUALS"));

        let err = parse(&["exec-env", "=value", "/bin/helper"]).unwrap_err();
        assert!(matches!(err, ConfigError::MalformedEnv(_)));
    }

    #[test]
    fn no_executable_is_an_error() {
        assert!(matches!(
            parse(&["exec-debug"]),
            Err(ConfigError::NoExecutable)
        ));
    }

    #[test]
    fn separator_stops_flag_scanning() {
        let opts = parse(&["/bin/helper", "--", "exec-debug", "--exec-env=X=1"]).unwrap();
        assert!(!opts.debug);
        assert!(opts.env.is_empty());
        assert_eq!(
            opts.helper_args,
            vec!["exec-debug".to_string(), "--exec-env=X=1".to_string()]
        );
    }

    #[test]
    fn unknown_tokens_pass_through() {
        let opts = parse(&["nullok", "/bin/helper", "try_first_pass"]).unwrap();
        assert_eq!(opts.executable, PathBuf::from("nullok"));
        assert_eq!(
            opts.helper_args,
            vec!["/bin/helper".to_string(), "try_first_pass".to_string()]
        );
    }
}
