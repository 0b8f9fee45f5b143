//! Drives one reconciliation pass: kustomize build → document stream →
//! namespace ensure → per-resource apply, preserving replica counts for
//! existing scalable workloads and defaulting new ones to zero.

use std::collections::BTreeSet;
use std::path::Path;
use std::sync::Arc;

use thiserror::Error;
use tracing::{info, warn};

use crate::cache::Cache;
use crate::kubectl;
use crate::kustomize::{self, KustomizeError};
use crate::manifest::{self, ParseError, SCALABLE_KINDS};
use crate::resource::{ApplyResult, Resource};

#[derive(Error, Debug)]
pub enum ReconcileError {
    #[error(transparent)]
    Kustomize(#[from] KustomizeError),
    #[error(transparent)]
    Parse(#[from] ParseError),
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ReconcileTally {
    pub unchanged: usize,
    pub changed: usize,
    pub skipped: usize,
}

pub struct ReconcileReport {
    pub tally: ReconcileTally,
    pub resources: Vec<Arc<Resource>>,
}

/// `apply_overlay`: the Reconciler's one entry point.
pub async fn apply_overlay(overlay_path: &Path, cache: Arc<Cache>) -> Result<ReconcileReport, ReconcileError> {
    let yaml = kustomize::build(&overlay_path.to_string_lossy()).await?;
    let docs = manifest::decode_stream(&yaml)?;

    let namespaces: BTreeSet<String> = docs
        .iter()
        .map(|d| d.namespace())
        .filter(|ns| !ns.is_empty())
        .collect();
    for ns in &namespaces {
        match kubectl::create_namespace_if_not_exists(ns).await {
            Ok(true) => info!(namespace = %ns, "namespace created"),
            Ok(false) => {}
            Err(e) => warn!(namespace = %ns, error = %e, "failed to ensure namespace"),
        }
    }

    let mut tally = ReconcileTally::default();
    let mut resources = Vec::with_capacity(docs.len());

    for doc in docs {
        let is_scalable = doc.is_scalable();
        let mut doc = doc;

        if is_scalable {
            match kubectl::get(&doc.kind(), &doc.name(), &doc.namespace()).await {
                Ok(Some(live)) => {
                    if let Some(replicas) = live.replicas() {
                        doc.set_replicas(replicas);
                    }
                }
                Ok(None) => doc.set_replicas(0),
                Err(e) => {
                    warn!(key = %doc.identity_key(), error = %e, "could not query existing replicas, defaulting to 0");
                    doc.set_replicas(0);
                }
            }
        }

        let resource = Arc::new(Resource::new(doc, Arc::clone(&cache)).await);
        match resource.apply().await {
            ApplyResult::Unchanged => tally.unchanged += 1,
            ApplyResult::Changed => tally.changed += 1,
            ApplyResult::Failed => tally.skipped += 1,
        }
        resources.push(resource);
    }

    info!(
        unchanged = tally.unchanged,
        changed = tally.changed,
        skipped = tally.skipped,
        "reconciliation complete"
    );

    Ok(ReconcileReport { tally, resources })
}

/// Returns whether `kind` participates in replica preservation, status
/// polling, and routing.
pub fn is_scalable_kind(kind: &str) -> bool {
    SCALABLE_KINDS.contains(&kind.to_lowercase().as_str())
}
