//! Thin wrapper around `tokio::process` for running external binaries.
//!
//! Every other shell-out in this crate (kubectl, kustomize, minikube) goes
//! through here so that "executable not found" has exactly one shape.

use std::process::Stdio;
use thiserror::Error;
use tokio::process::{Child, Command};

#[derive(Error, Debug)]
pub enum ProcessError {
    #[error("executable '{0}' not found on PATH")]
    ExecutableMissing(String),
    #[error("io error running '{0}': {1}")]
    Io(String, #[source] std::io::Error),
}

/// Captured result of a command run to completion.
pub struct Output {
    pub status_success: bool,
    pub stdout: String,
    pub stderr: String,
}

/// Run `program args...` to completion, optionally feeding `stdin`.
pub async fn run(
    program: &str,
    args: &[&str],
    stdin: Option<&str>,
) -> Result<Output, ProcessError> {
    let mut cmd = Command::new(program);
    cmd.args(args);
    cmd.stdout(Stdio::piped());
    cmd.stderr(Stdio::piped());
    cmd.stdin(if stdin.is_some() {
        Stdio::piped()
    } else {
        Stdio::null()
    });

    let mut child = spawn(&mut cmd, program)?;

    if let Some(data) = stdin {
        use tokio::io::AsyncWriteExt;
        if let Some(mut pipe) = child.stdin.take() {
            let _ = pipe.write_all(data.as_bytes()).await;
            // drop closes stdin so the child can see EOF
        }
    }

    let output = child
        .wait_with_output()
        .await
        .map_err(|e| ProcessError::Io(program.to_string(), e))?;

    Ok(Output {
        status_success: output.status.success(),
        stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
        stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
    })
}

/// Spawn `program args...` in the background, discarding stdout/stderr, and
/// return the raw child for the caller to supervise.
pub fn spawn_background(program: &str, args: &[&str]) -> Result<Child, ProcessError> {
    let mut cmd = Command::new(program);
    cmd.args(args);
    cmd.stdin(Stdio::null());
    cmd.stdout(Stdio::null());
    cmd.stderr(Stdio::null());
    spawn(&mut cmd, program)
}

fn spawn(cmd: &mut Command, program: &str) -> Result<Child, ProcessError> {
    cmd.spawn().map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            ProcessError::ExecutableMissing(program.to_string())
        } else {
            ProcessError::Io(program.to_string(), e)
        }
    })
}

/// A supervised background child: a port-forward, or any long-running helper
/// process this tool launches and must be able to kill on demand.
pub struct ChildHandle {
    child: Option<Child>,
    pid: Option<u32>,
}

impl ChildHandle {
    pub fn new(child: Child) -> Self {
        let pid = child.id();
        ChildHandle {
            child: Some(child),
            pid,
        }
    }

    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// Best-effort liveness check; does not block.
    pub fn is_alive(&mut self) -> bool {
        match &mut self.child {
            Some(c) => matches!(c.try_wait(), Ok(None)),
            None => false,
        }
    }

    /// Send SIGTERM (unix) and fall back to a hard kill if it doesn't exit
    /// promptly. Idempotent: terminating an already-dead or already-taken
    /// child is a no-op.
    pub async fn terminate(&mut self) {
        let Some(mut child) = self.child.take() else {
            return;
        };

        #[cfg(unix)]
        {
            use nix::sys::signal::{Signal, kill};
            use nix::unistd::Pid;
            if let Some(pid) = self.pid {
                let _ = kill(Pid::from_raw(pid as i32), Signal::SIGTERM);
            }
        }

        match tokio::time::timeout(std::time::Duration::from_secs(3), child.wait()).await {
            Ok(_) => {}
            Err(_) => {
                let _ = child.kill().await;
                let _ = child.wait().await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn run_captures_stdout() {
        let out = run("echo", &["hello"], None).await.unwrap();
        assert!(out.status_success);
        assert_eq!(out.stdout.trim(), "hello");
    }

    #[tokio::test]
    async fn run_reports_failure() {
        let out = run("sh", &["-c", "exit 3"], None).await.unwrap();
        assert!(!out.status_success);
    }

    #[tokio::test]
    async fn run_feeds_stdin() {
        let out = run("cat", &[], Some("piped text")).await.unwrap();
        assert_eq!(out.stdout, "piped text");
    }

    #[tokio::test]
    async fn missing_executable_is_reported() {
        let err = run("devexy-definitely-not-a-real-binary", &[], None)
            .await
            .unwrap_err();
        assert!(matches!(err, ProcessError::ExecutableMissing(_)));
    }

    #[tokio::test]
    async fn child_handle_terminate_is_idempotent() {
        let child = spawn_background("sleep", &["5"]).unwrap();
        let mut handle = ChildHandle::new(child);
        assert!(handle.is_alive());
        handle.terminate().await;
        assert!(!handle.is_alive());
        // second terminate must not panic or hang
        handle.terminate().await;
    }
}
