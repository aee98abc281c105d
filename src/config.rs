//! Runtime configuration for the pipeline process and the bridge.
//!
//! Loaded from an optional JSON file; every field has a default so a missing
//! or partial file still yields a working config.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::PipelineError;

/// Configuration of the child pipeline process (coordinator + workers).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Which backend implementation the workers own. `"mock"` is the only
    /// in-tree implementation; the NPU backends live behind FFI out of tree.
    #[serde(default = "default_backend")]
    pub backend: String,

    #[serde(default = "default_vision_model")]
    pub vision_model_path: PathBuf,

    #[serde(default = "default_language_model")]
    pub language_model_path: PathBuf,

    /// Square edge the vision worker resizes every image to.
    #[serde(default = "default_img_size")]
    pub img_size: u32,

    /// How long the coordinator waits for both workers to finish loading.
    #[serde(default = "default_load_timeout")]
    pub load_timeout_secs: u64,

    /// Upper bound on one generation call; the worker seals an error
    /// response if the backend goes silent for this long.
    #[serde(default = "default_generation_timeout")]
    pub generation_timeout_secs: u64,

    /// Bounded wait for worker threads to exit on shutdown.
    #[serde(default = "default_shutdown_timeout")]
    pub shutdown_timeout_secs: u64,
}

fn default_backend() -> String {
    "mock".to_string()
}

fn default_vision_model() -> PathBuf {
    PathBuf::from("model/vision_transformer.rknn")
}

fn default_language_model() -> PathBuf {
    PathBuf::from("model/qwen.rkllm")
}

fn default_img_size() -> u32 {
    448
}

fn default_load_timeout() -> u64 {
    300
}

fn default_generation_timeout() -> u64 {
    300
}

fn default_shutdown_timeout() -> u64 {
    10
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            backend: default_backend(),
            vision_model_path: default_vision_model(),
            language_model_path: default_language_model(),
            img_size: default_img_size(),
            load_timeout_secs: default_load_timeout(),
            generation_timeout_secs: default_generation_timeout(),
            shutdown_timeout_secs: default_shutdown_timeout(),
        }
    }
}

impl PipelineConfig {
    /// Load from a JSON file. Missing fields fall back to defaults.
    pub fn from_file(path: &Path) -> Result<Self, PipelineError> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| PipelineError::Config(format!("cannot read {}: {e}", path.display())))?;
        serde_json::from_str(&raw)
            .map_err(|e| PipelineError::Config(format!("invalid config {}: {e}", path.display())))
    }
}

/// Configuration of the host-side subprocess bridge.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BridgeConfig {
    /// Path to the pipeline binary. When `None`, a `vlm_pipeline` binary
    /// next to the current executable is used.
    #[serde(default)]
    pub child_path: Option<PathBuf>,

    /// Extra arguments passed to the child (e.g. `--config path`).
    #[serde(default)]
    pub child_args: Vec<String>,

    /// Deadline for the readiness banner to appear after spawn. Model
    /// loading dominates this, so it is generous by default.
    #[serde(default = "default_startup_timeout")]
    pub startup_timeout_secs: u64,

    /// Deadline for one request to produce a sealed response.
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

fn default_startup_timeout() -> u64 {
    120
}

fn default_request_timeout() -> u64 {
    120
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            child_path: None,
            child_args: Vec::new(),
            startup_timeout_secs: default_startup_timeout(),
            request_timeout_secs: default_request_timeout(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pipeline_config_defaults() {
        let cfg = PipelineConfig::default();
        assert_eq!(cfg.backend, "mock");
        assert_eq!(cfg.img_size, 448);
        assert_eq!(cfg.load_timeout_secs, 300);
    }

    #[test]
    fn test_partial_json_falls_back_to_defaults() {
        let cfg: PipelineConfig = serde_json::from_str(r#"{"img_size": 224}"#).unwrap();
        assert_eq!(cfg.img_size, 224);
        assert_eq!(cfg.backend, "mock");
    }

    #[test]
    fn test_bridge_config_defaults() {
        let cfg: BridgeConfig = serde_json::from_str("{}").unwrap();
        assert!(cfg.child_path.is_none());
        assert_eq!(cfg.startup_timeout_secs, 120);
        assert_eq!(cfg.request_timeout_secs, 120);
    }
}
