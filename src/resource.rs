//! The central entity: binds a manifest document to its cache record and
//! its two optional background activities (status poller, port-forward
//! child).

use std::sync::Arc;
use std::time::Duration;

use serde_yaml::{Mapping, Value};
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::cache::{Cache, CacheRecord};
use crate::kubectl::{self, ApplyOutcome};
use crate::manifest::{self, Document};
use crate::process::ChildHandle;

#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum ApplyResult {
    Unchanged,
    Changed,
    Failed,
}

/// A resource's observed state, as read from the cache by the controller.
#[derive(Debug, Clone, Default)]
pub struct ObservedState {
    pub status: Option<serde_json::Value>,
    pub observed_at: Option<String>,
    pub proxy_installed: bool,
}

/// The central entity. Exclusively owns its cache record, poller handle,
/// and port-forward child; shared across the controller and reconciler via
/// `Arc`.
pub struct Resource {
    original: Document,
    working: RwLock<Document>,
    cache: Arc<Cache>,
    last_applied_hash: RwLock<Option<String>>,
    poller: Mutex<Option<JoinHandle<()>>>,
    port_forward: Mutex<Option<ChildHandle>>,
}

impl Resource {
    /// Constructs from a manifest document, loading its cache record
    /// best-effort. Does not start any background activity.
    pub async fn new(doc: Document, cache: Arc<Cache>) -> Self {
        let record = cache.load(&doc.identity_key()).await;
        Resource {
            working: RwLock::new(doc.clone()),
            original: doc,
            cache,
            last_applied_hash: RwLock::new(record.last_applied_hash),
            poller: Mutex::new(None),
            port_forward: Mutex::new(None),
        }
    }

    pub fn identity_key(&self) -> String {
        self.original.identity_key()
    }

    pub async fn kind(&self) -> String {
        self.working.read().await.kind()
    }

    pub async fn name(&self) -> String {
        self.working.read().await.name()
    }

    pub async fn namespace(&self) -> String {
        self.working.read().await.namespace()
    }

    pub async fn working_doc(&self) -> Document {
        self.working.read().await.clone()
    }

    pub async fn replicas(&self) -> Option<i64> {
        self.working.read().await.replicas()
    }

    pub async fn observed(&self) -> ObservedState {
        let record = self.cache.load(&self.identity_key()).await;
        ObservedState {
            status: record.status,
            observed_at: record.observed_at,
            proxy_installed: record.proxy_installed,
        }
    }

    /// `h = hash_canonical(working)`; no-ops against kubectl when it
    /// matches the last applied hash.
    pub async fn apply(&self) -> ApplyResult {
        let working = self.working.read().await.clone();
        let h = manifest::hash_canonical(&working);

        if self.last_applied_hash.read().await.as_deref() == Some(h.as_str()) {
            return ApplyResult::Unchanged;
        }

        let yaml = manifest::encode(&working);
        match kubectl::apply(&yaml).await {
            Ok(outcome) => {
                *self.last_applied_hash.write().await = Some(h.clone());
                self.flush_cache(Some(h)).await;
                match outcome {
                    ApplyOutcome::Changed => ApplyResult::Changed,
                    ApplyOutcome::Unchanged => ApplyResult::Unchanged,
                }
            }
            Err(e) => {
                warn!(key = %self.identity_key(), error = %e, "apply failed");
                ApplyResult::Failed
            }
        }
    }

    async fn flush_cache(&self, last_applied_hash: Option<String>) {
        let mut record = self.cache.load(&self.identity_key()).await;
        record.last_applied_hash = last_applied_hash;
        record.key = Some(self.identity_key());
        if let Err(e) = self.cache.store(&self.identity_key(), &record).await {
            warn!(error = %e, "failed to flush cache record");
        }
    }

    /// Sets `spec.replicas = n` on the working doc, creating `spec` if
    /// missing, optionally applying immediately.
    pub async fn set_replicas(&self, n: i64, apply: bool) -> Option<ApplyResult> {
        self.working.write().await.set_replicas(n);
        if apply { Some(self.apply().await) } else { None }
    }

    /// Spawns the jittered status poller. Idempotent: a second call while
    /// one is already running is a no-op.
    pub async fn start_status_poller(self: &Arc<Self>) {
        let mut guard = self.poller.lock().await;
        if guard.is_some() {
            return;
        }
        let resource = Arc::clone(self);
        let handle = tokio::spawn(async move {
            loop {
                let wait = Duration::from_secs_f64(fastrand::f64() + 1.0);
                tokio::time::sleep(wait).await;

                let (kind, name, ns) = {
                    let doc = resource.working.read().await;
                    (doc.kind(), doc.name(), doc.namespace())
                };

                match kubectl::get(&kind, &name, &ns).await {
                    Ok(Some(live)) => {
                        let mut record = resource.cache.load(&resource.identity_key()).await;
                        record.status = live.spec_status_json();
                        record.proxy_installed = live.is_proxy_installed();
                        record.observed_at = Some(now_rfc3339());
                        record.key = Some(resource.identity_key());
                        if let Err(e) = resource.cache.store(&resource.identity_key(), &record).await {
                            warn!(error = %e, "status poller failed to flush cache");
                        }
                    }
                    Ok(None) => {}
                    Err(e) => warn!(key = %resource.identity_key(), error = %e, "status poll failed"),
                }
            }
        });
        *guard = Some(handle);
    }

    /// Resolves `local_port` and infers `target_port`, launches the
    /// port-forward child. Idempotent. Returns `false` when `local_port`
    /// is absent.
    pub async fn start_port_forward(&self) -> bool {
        let mut guard = self.port_forward.lock().await;
        if let Some(child) = guard.as_mut() {
            if child.is_alive() {
                return true;
            }
        }

        let doc = self.working.read().await;
        let Some(local_port) = doc.local_port() else {
            warn!(key = %self.identity_key(), "no devexy/local-port annotation, cannot port-forward");
            return false;
        };
        let Some(target_port) = doc.infer_target_port() else {
            warn!(key = %self.identity_key(), "could not infer target port, cannot port-forward");
            return false;
        };

        match kubectl::port_forward(&doc.kind(), &doc.name(), &doc.namespace(), local_port, target_port) {
            Ok(child) => {
                info!(key = %self.identity_key(), local_port, target_port, "port-forward started");
                *guard = Some(child);
                true
            }
            Err(e) => {
                warn!(key = %self.identity_key(), error = %e, "failed to start port-forward");
                false
            }
        }
    }

    pub async fn stop_port_forward(&self) {
        let mut guard = self.port_forward.lock().await;
        if let Some(mut child) = guard.take() {
            child.terminate().await;
        }
    }

    pub async fn is_forwarding(&self) -> bool {
        let mut guard = self.port_forward.lock().await;
        matches!(guard.as_mut(), Some(child) if child.is_alive())
    }

    /// Toggles between forward mode and reverse (proxy) mode.
    pub async fn toggle_routing_mode(&self) -> ApplyResult {
        let currently_proxying = self.working.read().await.is_proxy_installed();

        if currently_proxying {
            let replicas = self.working.read().await.replicas();
            let mut restored = self.original.clone();
            if let Some(n) = replicas {
                restored.set_replicas(n);
            }
            *self.working.write().await = restored;
            let result = self.apply().await;
            self.stop_port_forward().await;
            result
        } else {
            self.stop_port_forward().await;
            let (container_port, local_port) = {
                let doc = self.working.read().await;
                let container_port = doc
                    .first_container_port()
                    .unwrap_or(DEFAULT_CONTAINER_PORT);
                let local_port = doc.local_port().unwrap_or(container_port);
                (container_port, local_port)
            };
            self.working
                .write()
                .await
                .set_containers(vec![reverse_proxy_container(container_port, local_port)]);
            self.apply().await
        }
    }
}

pub const DEFAULT_CONTAINER_PORT: u16 = 80;

/// Builds the canned reverse-proxy container (bit-exact template).
pub fn reverse_proxy_container(container_port: u16, local_port: u16) -> Mapping {
    let nginx_conf = format!(
        "events {{}}\nhttp {{\n  server {{\n    listen {container_port};\n    location / {{\n      proxy_pass http://host.minikube.internal:{local_port};\n      proxy_set_header Host $host;\n      proxy_set_header X-Real-IP $remote_addr;\n      proxy_set_header X-Forwarded-For $proxy_add_x_forwarded_for;\n      proxy_set_header X-Forwarded-Proto $scheme;\n    }}\n  }}\n}}"
    );
    let startup = format!("echo '{nginx_conf}' > /etc/nginx/nginx.conf && nginx -g 'daemon off;'");

    let mut container = Mapping::new();
    container.insert(Value::String("name".into()), Value::String("devexy-reverse-proxy".into()));
    container.insert(Value::String("image".into()), Value::String("nginx:latest".into()));
    container.insert(
        Value::String("ports".into()),
        Value::Sequence(vec![Value::Mapping({
            let mut m = Mapping::new();
            m.insert(Value::String("containerPort".into()), Value::Number(container_port.into()));
            m
        })]),
    );
    container.insert(
        Value::String("command".into()),
        Value::Sequence(vec![Value::String("sh".into()), Value::String("-c".into())]),
    );
    container.insert(
        Value::String("args".into()),
        Value::Sequence(vec![Value::String(startup)]),
    );
    container
}

fn now_rfc3339() -> String {
    humantime::format_rfc3339_seconds(std::time::SystemTime::now()).to_string()
}

impl Document {
    fn spec_status_json(&self) -> Option<serde_json::Value> {
        self.status_mapping()
            .map(|m| serde_json::to_value(m).unwrap_or(serde_json::Value::Null))
    }

    fn status_mapping(&self) -> Option<Mapping> {
        self.0.as_mapping()?.get(Value::String("status".into()))?.as_mapping().cloned()
    }

    fn first_container_port(&self) -> Option<u16> {
        self.first_container()
            .and_then(|c| c.get(Value::String("ports".into())).cloned())
            .and_then(|ports| ports.as_sequence().and_then(|s| s.first().cloned()))
            .and_then(|p| p.as_mapping().and_then(|m| m.get(Value::String("containerPort".into()))).and_then(Value::as_i64))
            .map(|p| p as u16)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifest::decode_stream;
    use std::path::Path;

    async fn fresh_cache() -> Arc<Cache> {
        let tmp = tempfile::tempdir().unwrap();
        // persist the tempdir so the directory outlives the cache for the test
        let path = tmp.into_path();
        Arc::new(Cache::new(&path, Path::new("/overlay")))
    }

    fn doc(yaml: &str) -> Document {
        decode_stream(yaml).unwrap().into_iter().next().unwrap()
    }

    #[tokio::test]
    async fn apply_is_noop_when_hash_unchanged() {
        let cache = fresh_cache().await;
        let d = doc("kind: ConfigMap\nmetadata:\n  name: cfg\n");
        let resource = Resource::new(d.clone(), cache).await;
        let h = manifest::hash_canonical(&d);
        *resource.last_applied_hash.write().await = Some(h);
        assert_eq!(resource.apply().await, ApplyResult::Unchanged);
    }

    #[tokio::test]
    async fn set_replicas_updates_working_doc() {
        let cache = fresh_cache().await;
        let d = doc("kind: Deployment\nmetadata:\n  name: web\nspec:\n  replicas: 3\n");
        let resource = Resource::new(d, cache).await;
        resource.set_replicas(0, false).await;
        assert_eq!(resource.replicas().await, Some(0));
    }

    #[test]
    fn reverse_proxy_container_has_expected_shape() {
        let c = reverse_proxy_container(8080, 3000);
        assert_eq!(
            c.get(Value::String("name".into())).and_then(Value::as_str),
            Some("devexy-reverse-proxy")
        );
        assert_eq!(
            c.get(Value::String("image".into())).and_then(Value::as_str),
            Some("nginx:latest")
        );
    }
}
