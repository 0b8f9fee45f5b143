//! Manifest Codec: decodes a multi-document YAML stream into manifest
//! documents, canonicalizes them for stable hashing, and exposes the typed
//! accessors every other module needs (kind, name, namespace, replicas,
//! inferred container port, ...).

use serde::Deserialize as _;
use serde_yaml::{Mapping, Value};
use sha1::{Digest, Sha1};
use thiserror::Error;
use tracing::warn;

pub const SCALABLE_KINDS: &[&str] = &["deployment", "replicaset", "statefulset"];
pub const REVERSE_PROXY_CONTAINER_NAME: &str = "devexy-reverse-proxy";
pub const LOCAL_PORT_ANNOTATION: &str = "devexy/local-port";
pub const LAST_APPLIED_ANNOTATION: &str = "kubectl.kubernetes.io/last-applied-configuration";
pub const DEFAULT_NAMESPACE: &str = "default";

#[derive(Error, Debug)]
pub enum ParseError {
    #[error("invalid YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

/// A single manifest document: an unordered mapping of string keys to
/// arbitrary values.
#[derive(Debug, Clone, PartialEq)]
pub struct Document(pub Value);

impl Document {
    pub fn from_value(value: Value) -> Self {
        Document(value)
    }

    fn map(&self) -> Option<&Mapping> {
        self.0.as_mapping()
    }

    fn get(&self, key: &str) -> Option<&Value> {
        self.map().and_then(|m| m.get(Value::String(key.to_string())))
    }

    fn get_nested(&self, path: &[&str]) -> Option<&Value> {
        let mut current = &self.0;
        for segment in path {
            current = current.as_mapping()?.get(Value::String(segment.to_string()))?;
        }
        Some(current)
    }

    pub fn kind(&self) -> String {
        self.get("kind")
            .and_then(Value::as_str)
            .unwrap_or("Unknown")
            .to_string()
    }

    pub fn metadata(&self) -> Mapping {
        self.get("metadata")
            .and_then(Value::as_mapping)
            .cloned()
            .unwrap_or_default()
    }

    /// Resource name, defaulted to a stable hash of the canonical YAML when
    /// `metadata.name` is absent.
    pub fn name(&self) -> String {
        self.get_nested(&["metadata", "name"])
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| hash_canonical(self))
    }

    pub fn namespace(&self) -> String {
        self.get_nested(&["metadata", "namespace"])
            .and_then(Value::as_str)
            .unwrap_or(DEFAULT_NAMESPACE)
            .to_string()
    }

    pub fn annotations(&self) -> std::collections::BTreeMap<String, String> {
        let mut out = std::collections::BTreeMap::new();
        if let Some(Value::Mapping(m)) = self.get_nested(&["metadata", "annotations"]) {
            for (k, v) in m {
                if let (Some(k), Some(v)) = (k.as_str(), v.as_str()) {
                    out.insert(k.to_string(), v.to_string());
                }
            }
        }
        out
    }

    pub fn spec(&self) -> Option<&Mapping> {
        self.get("spec").and_then(Value::as_mapping)
    }

    pub fn is_scalable(&self) -> bool {
        SCALABLE_KINDS.contains(&self.kind().to_lowercase().as_str())
    }

    pub fn replicas(&self) -> Option<i64> {
        self.get_nested(&["spec", "replicas"]).and_then(Value::as_i64)
    }

    /// `spec.containers[0]` for pods, `spec.template.spec.containers[0]`
    /// for scalable workloads.
    pub fn first_container(&self) -> Option<Mapping> {
        let containers = if self.kind().eq_ignore_ascii_case("pod") {
            self.get_nested(&["spec", "containers"])
        } else {
            self.get_nested(&["spec", "template", "spec", "containers"])
        };
        containers
            .and_then(Value::as_sequence)
            .and_then(|seq| seq.first())
            .and_then(Value::as_mapping)
            .cloned()
    }

    pub fn first_container_name(&self) -> Option<String> {
        self.first_container()
            .and_then(|c| c.get(Value::String("name".into())).and_then(Value::as_str).map(str::to_string))
    }

    /// True exactly when the document's first container is the reverse
    /// proxy container.
    pub fn is_proxy_installed(&self) -> bool {
        self.first_container_name().as_deref() == Some(REVERSE_PROXY_CONTAINER_NAME)
    }

    /// Integer parse of the `devexy/local-port` annotation. A malformed
    /// value is treated as absent, with a warning.
    pub fn local_port(&self) -> Option<u16> {
        let raw = self.annotations().get(LOCAL_PORT_ANNOTATION)?.clone();
        match raw.parse::<u16>() {
            Ok(port) => Some(port),
            Err(_) => {
                warn!(value = %raw, "malformed devexy/local-port annotation, ignoring");
                None
            }
        }
    }

    /// Recover the user's applied intent from the standard
    /// `kubectl.kubernetes.io/last-applied-configuration` annotation.
    pub fn last_applied_configuration(&self) -> Option<Document> {
        let raw = self.annotations().get(LAST_APPLIED_ANNOTATION)?.clone();
        match serde_yaml::from_str::<Value>(&raw).or_else(|_| {
            serde_json::from_str::<serde_json::Value>(&raw).map(json_to_yaml_value)
        }) {
            Ok(value) if value.is_mapping() => Some(Document(value)),
            Ok(_) => None,
            Err(e) => {
                warn!(error = %e, "failed to parse last-applied-configuration annotation");
                None
            }
        }
    }

    /// Infer the workload's primary container port. Errors in traversal are
    /// swallowed to `None` with a warning, per spec.
    pub fn infer_target_port(&self) -> Option<u16> {
        let kind = self.kind().to_lowercase();
        let result = if kind == "pod" {
            first_container_port(self.get_nested(&["spec", "containers"]))
        } else if SCALABLE_KINDS.contains(&kind.as_str()) {
            first_container_port(self.get_nested(&["spec", "template", "spec", "containers"]))
        } else if kind == "service" {
            first_service_port(self.get_nested(&["spec", "ports"]))
        } else {
            None
        };

        if result.is_none() && (kind == "pod" || SCALABLE_KINDS.contains(&kind.as_str()) || kind == "service") {
            warn!(kind = %kind, name = %self.name(), "could not infer target port");
        }
        result
    }

    pub fn identity_key(&self) -> String {
        format!("{}/{}/{}", self.namespace(), self.kind(), self.name()).to_lowercase()
    }

    pub fn set_replicas(&mut self, n: i64) {
        let map = self.0.as_mapping_mut().get_or_insert_with(Mapping::new);
        let spec_key = Value::String("spec".into());
        let spec = map
            .entry(spec_key)
            .or_insert_with(|| Value::Mapping(Mapping::new()));
        if !spec.is_mapping() {
            *spec = Value::Mapping(Mapping::new());
        }
        spec.as_mapping_mut()
            .unwrap()
            .insert(Value::String("replicas".into()), Value::Number(n.into()));
    }

    /// Overwrite `spec.template.spec.containers` with the single given
    /// container (used for both injecting and removing the reverse proxy).
    pub fn set_containers(&mut self, containers: Vec<Mapping>) {
        let seq: Vec<Value> = containers.into_iter().map(Value::Mapping).collect();
        set_path(
            &mut self.0,
            &["spec", "template", "spec", "containers"],
            Value::Sequence(seq),
        );
    }
}

fn set_path(root: &mut Value, path: &[&str], value: Value) {
    let mut current = root;
    for segment in path {
        if !current.is_mapping() {
            *current = Value::Mapping(Mapping::new());
        }
        let map = current.as_mapping_mut().unwrap();
        current = map
            .entry(Value::String(segment.to_string()))
            .or_insert_with(|| Value::Mapping(Mapping::new()));
    }
    *current = value;
}

fn first_container_port(containers: Option<&Value>) -> Option<u16> {
    let seq = containers?.as_sequence()?;
    for container in seq {
        let ports = container.as_mapping()?.get(Value::String("ports".into()))?.as_sequence()?;
        for port in ports {
            if let Some(p) = port
                .as_mapping()
                .and_then(|m| m.get(Value::String("containerPort".into())))
                .and_then(Value::as_i64)
            {
                return Some(p as u16);
            }
        }
    }
    None
}

fn first_service_port(ports: Option<&Value>) -> Option<u16> {
    let seq = ports?.as_sequence()?;
    for port in seq {
        if let Some(p) = port
            .as_mapping()
            .and_then(|m| m.get(Value::String("port".into())))
            .and_then(Value::as_i64)
        {
            return Some(p as u16);
        }
    }
    None
}

fn json_to_yaml_value(v: serde_json::Value) -> Value {
    serde_yaml::to_value(v).unwrap_or(Value::Null)
}

/// Parse a multi-document YAML stream, yielding only mapping-typed
/// documents. Non-mapping, non-null entries are logged and skipped; null
/// entries (blank sub-documents) are silently skipped.
pub fn decode_stream(bytes: &str) -> Result<Vec<Document>, ParseError> {
    let mut out = Vec::new();
    for document in serde_yaml::Deserializer::from_str(bytes) {
        let value = Value::deserialize(document)?;
        match value {
            Value::Mapping(_) => out.push(Document(value)),
            Value::Null => {}
            other => warn!(kind = ?other, "skipping non-mapping document in YAML stream"),
        }
    }
    Ok(out)
}

/// Canonical form: keys sorted recursively, block style, UTF-8.
pub fn encode(doc: &Document) -> String {
    let canonical = canonicalize(&doc.0);
    serde_yaml::to_string(&canonical).expect("canonicalized value always serializes")
}

fn canonicalize(value: &Value) -> Value {
    match value {
        Value::Mapping(map) => {
            let mut keys: Vec<&Value> = map.keys().collect();
            keys.sort_by_key(|k| yaml_key_sort_string(k));
            let mut out = Mapping::new();
            for key in keys {
                if let Some(v) = map.get(key) {
                    out.insert(key.clone(), canonicalize(v));
                }
            }
            Value::Mapping(out)
        }
        Value::Sequence(seq) => Value::Sequence(seq.iter().map(canonicalize).collect()),
        other => other.clone(),
    }
}

fn yaml_key_sort_string(key: &Value) -> String {
    match key {
        Value::String(s) => s.clone(),
        other => serde_yaml::to_string(other).unwrap_or_default(),
    }
}

/// SHA-1 of the canonical YAML; the apply-identity.
pub fn hash_canonical(doc: &Document) -> String {
    let canonical = encode(doc);
    let mut hasher = Sha1::new();
    hasher.update(canonical.as_bytes());
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc(yaml: &str) -> Document {
        decode_stream(yaml).unwrap().into_iter().next().unwrap()
    }

    #[test]
    fn decode_skips_non_mapping_and_null_docs() {
        let stream = "---\nkind: Pod\nmetadata:\n  name: a\n---\n---\n- 1\n- 2\n";
        let docs = decode_stream(stream).unwrap();
        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0].kind(), "Pod");
    }

    #[test]
    fn canonical_hash_is_roundtrip_idempotent() {
        let d = doc("kind: Deployment\nmetadata:\n  name: web\n  namespace: app\nspec:\n  replicas: 3\n");
        let h1 = hash_canonical(&d);
        let reencoded = encode(&d);
        let redecoded = decode_stream(&reencoded).unwrap().into_iter().next().unwrap();
        let h2 = hash_canonical(&redecoded);
        assert_eq!(h1, h2);
    }

    #[test]
    fn encode_is_deterministic_regardless_of_key_order() {
        let a = doc("b: 2\na: 1\n");
        let b = doc("a: 1\nb: 2\n");
        assert_eq!(encode(&a), encode(&b));
    }

    #[test]
    fn missing_name_falls_back_to_stable_hash() {
        let d = doc("kind: ConfigMap\n");
        let n1 = d.name();
        let n2 = d.name();
        assert_eq!(n1, n2);
        assert!(!n1.is_empty());
    }

    #[test]
    fn default_namespace_is_default() {
        let d = doc("kind: Pod\nmetadata:\n  name: x\n");
        assert_eq!(d.namespace(), "default");
    }

    #[test]
    fn identity_key_is_lowercased() {
        let d = doc("kind: Deployment\nmetadata:\n  name: Web\n  namespace: App\n");
        assert_eq!(d.identity_key(), "app/deployment/web");
    }

    #[test]
    fn port_inference_table() {
        let pod = doc("kind: Pod\nspec:\n  containers:\n  - name: c\n    ports:\n    - containerPort: 8080\n");
        assert_eq!(pod.infer_target_port(), Some(8080));

        let deploy = doc(
            "kind: Deployment\nspec:\n  template:\n    spec:\n      containers:\n      - name: c\n        ports:\n        - containerPort: 80\n",
        );
        assert_eq!(deploy.infer_target_port(), Some(80));

        let svc = doc("kind: Service\nspec:\n  ports:\n  - port: 80\n    targetPort: 9376\n");
        assert_eq!(svc.infer_target_port(), Some(80));

        let cm = doc("kind: ConfigMap\n");
        assert_eq!(cm.infer_target_port(), None);
    }

    #[test]
    fn local_port_annotation_parses() {
        let d = doc("kind: Deployment\nmetadata:\n  annotations:\n    devexy/local-port: \"8080\"\n");
        assert_eq!(d.local_port(), Some(8080));
    }

    #[test]
    fn malformed_local_port_is_absent() {
        let d = doc("kind: Deployment\nmetadata:\n  annotations:\n    devexy/local-port: \"not-a-port\"\n");
        assert_eq!(d.local_port(), None);
    }

    #[test]
    fn is_proxy_installed_detects_reverse_proxy_container() {
        let d = doc(
            "kind: Deployment\nspec:\n  template:\n    spec:\n      containers:\n      - name: devexy-reverse-proxy\n",
        );
        assert!(d.is_proxy_installed());

        let other = doc(
            "kind: Deployment\nspec:\n  template:\n    spec:\n      containers:\n      - name: api\n",
        );
        assert!(!other.is_proxy_installed());
    }

    #[test]
    fn set_replicas_creates_spec_when_missing() {
        let mut d = doc("kind: Deployment\nmetadata:\n  name: web\n");
        d.set_replicas(2);
        assert_eq!(d.replicas(), Some(2));
    }
}
