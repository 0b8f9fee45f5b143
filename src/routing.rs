//! Registers every port-forwarding resource with two cleanup paths: normal
//! process exit and interrupt/terminate signals. Both terminate every
//! registered child exactly once, best-effort.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::Mutex;
use tracing::info;

use crate::resource::Resource;

/// Process-wide registry of resources with a live (or potentially live)
/// port-forward. Shared between the normal-exit path and the signal path
/// so a given resource is only ever terminated once.
pub struct CleanupRegistry {
    resources: Mutex<Vec<Arc<Resource>>>,
    fired: AtomicBool,
}

impl CleanupRegistry {
    pub fn new() -> Arc<Self> {
        Arc::new(CleanupRegistry {
            resources: Mutex::new(Vec::new()),
            fired: AtomicBool::new(false),
        })
    }

    pub async fn register(&self, resource: Arc<Resource>) {
        self.resources.lock().await.push(resource);
    }

    /// Terminate every registered resource's port-forward. Idempotent: a
    /// second call is a no-op.
    pub async fn run_once(&self) {
        if self.fired.swap(true, Ordering::SeqCst) {
            return;
        }
        let resources = self.resources.lock().await;
        for resource in resources.iter() {
            resource.stop_port_forward().await;
        }
        info!(count = resources.len(), "cleanup registry terminated port-forwards");
    }

    /// Spawns a task that waits for SIGINT or SIGTERM, runs cleanup
    /// exactly once, then exits the process.
    pub fn install_signal_handler(self: &Arc<Self>) {
        let registry = Arc::clone(self);
        tokio::spawn(async move {
            let mut term = match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                Ok(s) => s,
                Err(_) => return,
            };
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {}
                _ = term.recv() => {}
            }
            registry.run_once().await;
            std::process::exit(130);
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::Cache;
    use crate::manifest::decode_stream;
    use std::path::Path;

    #[tokio::test]
    async fn run_once_is_idempotent() {
        let tmp = tempfile::tempdir().unwrap();
        let cache = Arc::new(Cache::new(tmp.path(), Path::new("/overlay")));
        let doc = decode_stream("kind: Deployment\nmetadata:\n  name: web\n")
            .unwrap()
            .into_iter()
            .next()
            .unwrap();
        let resource = Arc::new(Resource::new(doc, cache).await);

        let registry = CleanupRegistry::new();
        registry.register(resource).await;
        registry.run_once().await;
        registry.run_once().await; // must not panic
    }
}
