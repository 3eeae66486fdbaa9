//! Process execution for ip6tables commands
//!
//! [`Executor`] is the only way the provisioning driver touches the kernel.
//! Production code uses [`Ip6tablesExecutor`]; tests substitute recording
//! mocks that assert on the emitted argument vectors.

use crate::core::error::{Error, Result};
use crate::core::rules::format_command;
use std::future::Future;
use std::path::PathBuf;
use std::process::Stdio;
use tracing::{debug, warn};

/// Outcome of one ip6tables invocation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecStatus {
    pub success: bool,
    /// `None` when the process could not be started or was killed by a signal
    pub exit_code: Option<i32>,
    pub stderr: String,
}

impl ExecStatus {
    pub fn ok() -> Self {
        Self {
            success: true,
            exit_code: Some(0),
            stderr: String::new(),
        }
    }

    pub fn failed(exit_code: Option<i32>, stderr: impl Into<String>) -> Self {
        Self {
            success: false,
            exit_code,
            stderr: stderr.into(),
        }
    }

    /// Applies the `ignore_failure` contract shared by every executor.
    ///
    /// A failed status becomes [`Error::Execution`] unless `ignore_failure`
    /// is set, in which case it is logged and handed back unchanged.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Execution`] for a failed status when failures are not ignored.
    pub fn settle(self, command: String, ignore_failure: bool) -> Result<Self> {
        if self.success {
            return Ok(self);
        }

        if ignore_failure {
            debug!(
                "Ignoring failure of `{command}` ({:?}): {}",
                self.exit_code,
                self.stderr.trim()
            );
            return Ok(self);
        }

        Err(Error::Execution {
            command,
            exit_code: self.exit_code,
            stderr: self.stderr,
        })
    }
}

/// Runs one firewall CLI invocation and waits for it to finish.
pub trait Executor {
    /// Name of the program the arguments are passed to, for logs
    fn program(&self) -> &str;

    /// Spawns the firewall tool with `args` and waits for completion.
    ///
    /// Spawn failure or a non-zero exit is an [`Error::Execution`] unless
    /// `ignore_failure` is set, in which case the failure is reported through
    /// an unsuccessful [`ExecStatus`].
    fn execute(
        &self,
        args: &[String],
        ignore_failure: bool,
    ) -> impl Future<Output = Result<ExecStatus>>;
}

/// Executes rules with the system `ip6tables`, elevating when needed.
#[derive(Debug, Clone)]
pub struct Ip6tablesExecutor {
    program: PathBuf,
}

impl Default for Ip6tablesExecutor {
    fn default() -> Self {
        Self::new()
    }
}

impl Ip6tablesExecutor {
    /// Uses `FAKEHTTP_IP6TABLES_COMMAND` if set, else the packaged default.
    pub fn new() -> Self {
        Self {
            program: crate::elevation::ip6tables_program(),
        }
    }

    /// Uses an explicit binary path
    pub fn with_program(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }
}

impl Executor for Ip6tablesExecutor {
    fn program(&self) -> &str {
        self.program.to_str().unwrap_or("ip6tables")
    }

    async fn execute(&self, args: &[String], ignore_failure: bool) -> Result<ExecStatus> {
        let command = format_command(self.program(), args);
        debug!("Executing: {command}");

        let argv: Vec<&str> = args.iter().map(String::as_str).collect();

        let status = match crate::elevation::create_elevated_ip6tables_command(&self.program, &argv)
        {
            Ok(mut cmd) => match cmd
                .stdin(Stdio::null())
                .stdout(Stdio::null())
                .stderr(Stdio::piped())
                .output()
                .await
            {
                Ok(output) if output.status.success() => ExecStatus::ok(),
                Ok(output) => ExecStatus::failed(
                    output.status.code(),
                    String::from_utf8_lossy(&output.stderr),
                ),
                Err(e) => {
                    if !ignore_failure {
                        warn!("Failed to spawn {}: {e}", self.program.display());
                    }
                    ExecStatus::failed(None, format!("failed to spawn: {e}"))
                }
            },
            Err(e) => ExecStatus::failed(None, format!("privilege escalation unavailable: {e}")),
        };

        status.settle(command, ignore_failure)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_settle_success_passes_through() {
        let status = ExecStatus::ok().settle("ip6tables -L".to_string(), false);
        assert_eq!(status.unwrap(), ExecStatus::ok());
    }

    #[test]
    fn test_settle_failure_is_error() {
        let err = ExecStatus::failed(Some(1), "ip6tables: Chain already exists.\n")
            .settle("ip6tables -w -t mangle -N FAKEHTTP".to_string(), false)
            .unwrap_err();

        match err {
            Error::Execution {
                command,
                exit_code,
                stderr,
            } => {
                assert_eq!(command, "ip6tables -w -t mangle -N FAKEHTTP");
                assert_eq!(exit_code, Some(1));
                assert!(stderr.contains("already exists"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_settle_ignored_failure_is_reported() {
        let status = ExecStatus::failed(Some(2), "Bad rule")
            .settle("ip6tables -w -t mangle -D INPUT -j FAKEHTTP".to_string(), true)
            .unwrap();
        assert!(!status.success);
        assert_eq!(status.exit_code, Some(2));
    }

    #[tokio::test]
    async fn test_missing_binary_is_spawn_failure() {
        let _guard = crate::core::test_helpers::ENV_VAR_MUTEX.lock().unwrap();
        crate::core::test_helpers::disable_elevation();

        let executor = Ip6tablesExecutor::with_program("/nonexistent/fakehttp/ip6tables");
        let args = vec!["-w".to_string(), "-L".to_string()];

        let err = executor.execute(&args, false).await.unwrap_err();
        assert!(matches!(err, Error::Execution { exit_code: None, .. }));

        let status = executor.execute(&args, true).await.unwrap();
        assert!(!status.success);
        assert!(status.stderr.contains("failed to spawn"));
    }

    #[tokio::test]
    async fn test_exit_status_is_propagated() {
        let _guard = crate::core::test_helpers::ENV_VAR_MUTEX.lock().unwrap();
        crate::core::test_helpers::disable_elevation();

        let ok = Ip6tablesExecutor::with_program("true");
        assert!(ok.execute(&[], false).await.unwrap().success);

        let failing = Ip6tablesExecutor::with_program("false");
        let err = failing.execute(&[], false).await.unwrap_err();
        assert!(matches!(err, Error::Execution { exit_code: Some(1), .. }));
    }
}
