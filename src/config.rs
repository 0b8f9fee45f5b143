//! Environment-driven configuration: `DEVEXY_NOISY`, `DEVEXY_KUSTOMIZE_ROOT`,
//! `DEVEXY_KUSTOMIZE_OVERLAY`, and app-dir resolution.

use std::env;
use std::path::PathBuf;

const DEFAULT_KUSTOMIZE_ROOT: &str = "./k8s/";
const DEFAULT_OVERLAY: &str = "local";

#[derive(Debug, Clone)]
pub struct Config {
    pub noisy: bool,
    pub kustomize_root: PathBuf,
    pub overlay: String,
}

impl Config {
    pub fn from_env() -> Self {
        Config {
            noisy: env_bool("DEVEXY_NOISY"),
            kustomize_root: env::var("DEVEXY_KUSTOMIZE_ROOT")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from(DEFAULT_KUSTOMIZE_ROOT)),
            overlay: env::var("DEVEXY_KUSTOMIZE_OVERLAY").unwrap_or_else(|_| DEFAULT_OVERLAY.to_string()),
        }
    }

    /// `<root>/overlays/<overlay>`.
    pub fn overlay_path(&self) -> PathBuf {
        self.kustomize_root.join("overlays").join(&self.overlay)
    }

    /// The overlay path made absolute, mirroring the original's
    /// `KUSTOMIZE_ROOT.resolve()`. Used to scope the cache directory so it
    /// stays stable regardless of the process's current working directory;
    /// falls back to the unresolved path if absolutization fails.
    pub fn absolute_overlay_path(&self) -> PathBuf {
        std::path::absolute(self.overlay_path()).unwrap_or_else(|_| self.overlay_path())
    }
}

fn env_bool(name: &str) -> bool {
    match env::var(name) {
        Ok(v) => matches!(v.to_lowercase().as_str(), "1" | "true" | "yes" | "on"),
        Err(_) => false,
    }
}

/// The per-user application directory that holds `app.log` and `k8s_cache/`.
pub fn app_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(env::temp_dir)
        .join("devexy")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn overlay_path_joins_root_overlays_and_name() {
        let config = Config {
            noisy: false,
            kustomize_root: PathBuf::from("./k8s/"),
            overlay: "local".to_string(),
        };
        assert_eq!(config.overlay_path(), PathBuf::from("./k8s/overlays/local"));
    }

    #[test]
    fn absolute_overlay_path_is_absolute() {
        let config = Config {
            noisy: false,
            kustomize_root: PathBuf::from("./k8s/"),
            overlay: "local".to_string(),
        };
        assert!(config.absolute_overlay_path().is_absolute());
    }

    #[test]
    fn env_bool_recognizes_truthy_values() {
        // SAFETY: test runs single-threaded with respect to this var in this process
        unsafe { env::set_var("DEVEXY_TEST_FLAG", "true") };
        assert!(env_bool("DEVEXY_TEST_FLAG"));
        unsafe { env::remove_var("DEVEXY_TEST_FLAG") };
    }

    #[test]
    fn env_bool_defaults_false_when_unset() {
        unsafe { env::remove_var("DEVEXY_TEST_FLAG_UNSET") };
        assert!(!env_bool("DEVEXY_TEST_FLAG_UNSET"));
    }
}
