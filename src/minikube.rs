//! Thin wrapper over the `minikube` binary. Cluster lifecycle only — no
//! reimplementation of minikube's own provisioning logic.

use thiserror::Error;

use crate::process::{self, ProcessError};

#[derive(Error, Debug)]
pub enum MinikubeError {
    #[error(transparent)]
    Process(#[from] ProcessError),
    #[error("minikube {0} failed: {1}")]
    ToolFailed(&'static str, String),
}

pub async fn is_installed() -> bool {
    process::run("minikube", &["version"], None).await.is_ok()
}

/// `minikube status` exits 0 when a cluster profile has been created,
/// regardless of whether it's currently running.
pub async fn is_initialized() -> Result<bool, MinikubeError> {
    let out = process::run("minikube", &["status"], None).await?;
    Ok(out.status_success || out.stdout.contains("Stopped"))
}

pub async fn start() -> Result<(), MinikubeError> {
    let out = process::run("minikube", &["start"], None).await?;
    if !out.status_success {
        return Err(MinikubeError::ToolFailed("start", out.stderr));
    }
    Ok(())
}

pub async fn stop() -> Result<(), MinikubeError> {
    let out = process::run("minikube", &["stop"], None).await?;
    if !out.status_success {
        return Err(MinikubeError::ToolFailed("stop", out.stderr));
    }
    Ok(())
}

pub async fn delete() -> Result<(), MinikubeError> {
    let out = process::run("minikube", &["delete"], None).await?;
    if !out.status_success {
        return Err(MinikubeError::ToolFailed("delete", out.stderr));
    }
    Ok(())
}

/// `mk start --force`: delete first, then start fresh.
pub async fn start_forced() -> Result<(), MinikubeError> {
    delete().await?;
    start().await
}
