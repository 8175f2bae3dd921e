//! Bounded, timeout-enforced subprocess execution for `git`/`gh` (spec.md
//! §5). Grounded in `src/proxy/k8s_proxy.rs`'s spawn/kill lifecycle and
//! `src/backends/git.rs`'s `Command::new("git")...output()` shape,
//! generalized from a long-running proxy child to a bounded one-shot
//! invocation.

use std::path::Path;
use std::time::Duration;

use tokio::process::Command;

/// Outcome of a bounded subprocess run.
#[derive(Debug)]
pub struct ExecOutput {
    /// Whether the process exited successfully.
    pub success: bool,
    /// Captured stdout.
    pub stdout: String,
    /// Captured stderr.
    pub stderr: String,
}

/// Error distinguishing a timeout/kill from a clean non-zero exit.
#[derive(Debug, thiserror::Error)]
pub enum ExecError {
    /// The process did not complete within `timeout`.
    #[error("subprocess timed out after {0:?}")]
    TimedOut(Duration),
    /// The process could not be spawned.
    #[error("failed to spawn subprocess: {0}")]
    SpawnFailed(#[source] std::io::Error),
}

/// Run `program` with `args` in `cwd`, bounded by `timeout`. `kill_on_drop`
/// ensures that if the returned future is dropped (client disconnect) or
/// the timeout elapses, the child process is killed rather than left
/// running; this covers the one-shot `git`/`gh` invocations the gateway
/// makes, which do not themselves fork further children.
pub async fn run_bounded(
    program: &str,
    args: &[&str],
    cwd: &Path,
    timeout: Duration,
) -> Result<ExecOutput, ExecError> {
    let mut command = Command::new(program);
    command.args(args).current_dir(cwd).kill_on_drop(true);

    match tokio::time::timeout(timeout, command.output()).await {
        Ok(Ok(output)) => Ok(ExecOutput {
            success: output.status.success(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        }),
        Ok(Err(err)) => Err(ExecError::SpawnFailed(err)),
        Err(_) => Err(ExecError::TimedOut(timeout)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn successful_command_captures_stdout() {
        let output = run_bounded("echo", &["hello"], Path::new("."), Duration::from_secs(5))
            .await
            .unwrap();
        assert!(output.success);
        assert_eq!(output.stdout.trim(), "hello");
    }

    #[tokio::test]
    async fn nonzero_exit_is_reported_not_errored() {
        let output = run_bounded("false", &[], Path::new("."), Duration::from_secs(5))
            .await
            .unwrap();
        assert!(!output.success);
    }

    #[tokio::test]
    async fn slow_command_times_out() {
        let err = run_bounded("sleep", &["5"], Path::new("."), Duration::from_millis(50))
            .await
            .unwrap_err();
        assert!(matches!(err, ExecError::TimedOut(_)));
    }
}
