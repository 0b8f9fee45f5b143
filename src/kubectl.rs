//! Typed async wrapper over the `kubectl` binary. Every operation goes
//! through the Process Executor; nothing here spawns a `Command` directly.

use serde_json::Value as Json;
use thiserror::Error;
use tracing::debug;

use crate::manifest::Document;
use crate::process::{self, ChildHandle, ProcessError};

#[derive(Error, Debug)]
pub enum KubectlError {
    #[error(transparent)]
    Process(#[from] ProcessError),
    #[error("kubectl {argv} failed: {stderr}")]
    ToolFailed { argv: String, stderr: String },
    #[error("invalid JSON from kubectl: {0}")]
    Json(#[from] serde_json::Error),
    #[error("could not normalize kubectl JSON into YAML: {0}")]
    YamlConvert(#[source] serde_yaml::Error),
}

#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum ApplyOutcome {
    Changed,
    Unchanged,
}

/// Send a document stream to `kubectl apply -f -` over stdin.
pub async fn apply(yaml_bytes: &str) -> Result<ApplyOutcome, KubectlError> {
    let out = process::run("kubectl", &["apply", "-f", "-"], Some(yaml_bytes)).await?;
    if !out.status_success {
        return Err(KubectlError::ToolFailed {
            argv: "apply -f -".to_string(),
            stderr: out.stderr,
        });
    }
    if out.stdout.trim_end().ends_with("unchanged") {
        Ok(ApplyOutcome::Unchanged)
    } else {
        Ok(ApplyOutcome::Changed)
    }
}

/// Idempotent namespace creation. `true` on fresh creation, `false` when
/// the namespace already existed.
pub async fn create_namespace_if_not_exists(namespace: &str) -> Result<bool, KubectlError> {
    let out = process::run("kubectl", &["create", "namespace", namespace], None).await?;
    if out.status_success {
        return Ok(true);
    }
    if out.stderr.contains("AlreadyExists") {
        debug!(namespace, "namespace already exists");
        return Ok(false);
    }
    Err(KubectlError::ToolFailed {
        argv: format!("create namespace {namespace}"),
        stderr: out.stderr,
    })
}

/// Fetch the current state of a single resource, `None` if it doesn't exist.
pub async fn get(kind: &str, name: &str, namespace: &str) -> Result<Option<Document>, KubectlError> {
    let resource = format!("{kind}/{name}");
    let out = process::run(
        "kubectl",
        &["get", &resource, "-n", namespace, "-o", "json"],
        None,
    )
    .await?;

    if !out.status_success {
        if out.stderr.contains("NotFound") {
            return Ok(None);
        }
        return Err(KubectlError::ToolFailed {
            argv: format!("get {resource} -n {namespace} -o json"),
            stderr: out.stderr,
        });
    }

    Ok(Some(json_to_document(&out.stdout)?))
}

/// List every resource of `kind` in `namespace`, from `.items`.
pub async fn list(kind: &str, namespace: &str) -> Result<Vec<Document>, KubectlError> {
    let out = process::run(
        "kubectl",
        &["get", kind, "-n", namespace, "-o", "json"],
        None,
    )
    .await?;

    if !out.status_success {
        return Err(KubectlError::ToolFailed {
            argv: format!("get {kind} -n {namespace} -o json"),
            stderr: out.stderr,
        });
    }

    let root: Json = serde_json::from_str(&out.stdout)?;
    let items = root.get("items").and_then(Json::as_array).cloned().unwrap_or_default();
    items
        .into_iter()
        .map(|item| {
            serde_yaml::to_value(item)
                .map(Document::from_value)
                .map_err(KubectlError::YamlConvert)
        })
        .collect()
}

/// All namespace names on the cluster.
pub async fn list_namespaces() -> Result<Vec<String>, KubectlError> {
    let out = process::run("kubectl", &["get", "namespaces", "-o", "json"], None).await?;
    if !out.status_success {
        return Err(KubectlError::ToolFailed {
            argv: "get namespaces -o json".to_string(),
            stderr: out.stderr,
        });
    }
    let root: Json = serde_json::from_str(&out.stdout)?;
    let names = root
        .get("items")
        .and_then(Json::as_array)
        .into_iter()
        .flatten()
        .filter_map(|item| item.pointer("/metadata/name").and_then(Json::as_str))
        .map(str::to_string)
        .collect();
    Ok(names)
}

/// `kubectl port-forward <kind>/<name> <local>:<target> -n <namespace>`,
/// returned as a supervised background child.
pub fn port_forward(
    kind: &str,
    name: &str,
    namespace: &str,
    local_port: u16,
    target_port: u16,
) -> Result<ChildHandle, KubectlError> {
    let resource = format!("{kind}/{name}");
    let mapping = format!("{local_port}:{target_port}");
    let child = process::spawn_background(
        "kubectl",
        &["port-forward", &resource, &mapping, "-n", namespace],
    )?;
    Ok(ChildHandle::new(child))
}

fn json_to_document(stdout: &str) -> Result<Document, KubectlError> {
    let json: Json = serde_json::from_str(stdout)?;
    let value = serde_yaml::to_value(json).map_err(KubectlError::YamlConvert)?;
    Ok(Document::from_value(value))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn json_to_document_preserves_kind_and_name() {
        let doc = json_to_document(r#"{"kind":"Deployment","metadata":{"name":"web","namespace":"app"}}"#).unwrap();
        assert_eq!(doc.kind(), "Deployment");
        assert_eq!(doc.name(), "web");
        assert_eq!(doc.namespace(), "app");
    }
}
