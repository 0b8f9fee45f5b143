//! Thin wrapper over the `kustomize` binary: build an overlay into a YAML
//! stream. The Reconciler treats this as an opaque external collaborator.

use thiserror::Error;

use crate::process::{self, ProcessError};

#[derive(Error, Debug)]
pub enum KustomizeError {
    #[error(transparent)]
    Process(#[from] ProcessError),
    #[error("kustomize build failed: {0}")]
    BuildFailed(String),
}

pub async fn is_installed() -> bool {
    process::run("kustomize", &["version"], None).await.is_ok()
}

/// `kustomize build <path>`, returning the raw multi-document YAML stream.
pub async fn build(overlay_path: &str) -> Result<String, KustomizeError> {
    let out = process::run("kustomize", &["build", overlay_path], None).await?;
    if !out.status_success {
        return Err(KustomizeError::BuildFailed(out.stderr));
    }
    Ok(out.stdout)
}
