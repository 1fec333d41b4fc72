use serde::{Deserialize, Serialize};
use std::{
    fs,
    path::{Path, PathBuf},
};

use crate::{
    core::{engine::EngineOptions, lane::LanePolicy},
    error::{Result, StemError},
    types::OutputEncoding,
};

pub const CONFIG_ENV: &str = "STEM_SERVICE_CONFIG";
pub const CONFIG_FILE: &str = "stem-service.json";

/// Where the pretrained model comes from.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelSource {
    /// Local model file with a `<file>.json` manifest beside it.
    pub path: Option<PathBuf>,
    /// Remote manifest; the artifact is downloaded into `cache_dir`.
    pub manifest_url: Option<String>,
    pub cache_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    pub listen_addr: String,
    pub work_dir: PathBuf,
    pub public_prefix: String,
    pub max_upload_bytes: usize,
    pub max_concurrent_jobs: usize,
    /// Request directories older than this are swept; `None` keeps them.
    pub retention_secs: Option<u64>,
    pub resample_input: bool,
    pub output_encoding: OutputEncoding,
    pub lanes: LanePolicy,
    pub engine: EngineOptions,
    pub model: ModelSource,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            listen_addr: "0.0.0.0:8000".into(),
            work_dir: PathBuf::from("temp"),
            public_prefix: "/files".into(),
            max_upload_bytes: 512 * 1024 * 1024,
            max_concurrent_jobs: 2,
            retention_secs: None,
            resample_input: true,
            output_encoding: OutputEncoding::Pcm16,
            lanes: LanePolicy::default(),
            engine: EngineOptions::default(),
            model: ModelSource::default(),
        }
    }
}

impl ServiceConfig {
    /// `explicit` path, then `$STEM_SERVICE_CONFIG`, then `./stem-service.json`,
    /// then built-in defaults.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        if let Some(p) = explicit {
            return Self::load_from_path(p);
        }
        if let Ok(p) = std::env::var(CONFIG_ENV) {
            return Self::load_from_path(Path::new(&p));
        }
        let local = PathBuf::from(CONFIG_FILE);
        if local.exists() {
            return Self::load_from_path(&local);
        }
        let cfg = Self::default();
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn load_from_path(cfg_path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(cfg_path).map_err(|e| {
            StemError::Config(format!("failed to read {}: {e}", cfg_path.display()))
        })?;
        let cfg: ServiceConfig = serde_json::from_str(&raw).map_err(|e| {
            StemError::Config(format!("invalid {}: {e}", cfg_path.display()))
        })?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<()> {
        if !(0.0..1.0).contains(&self.engine.overlap) {
            return Err(StemError::Config(format!(
                "engine.overlap must be in [0, 1), got {}",
                self.engine.overlap
            )));
        }
        if self.max_concurrent_jobs == 0 {
            return Err(StemError::Config("max_concurrent_jobs must be > 0".into()));
        }
        if self.max_upload_bytes == 0 {
            return Err(StemError::Config("max_upload_bytes must be > 0".into()));
        }
        if self.lanes.reduction_marker.is_empty() {
            return Err(StemError::Config(
                "lanes.reduction_marker must not be empty".into(),
            ));
        }
        let prefix = self.public_prefix.trim_end_matches('/');
        if prefix.is_empty() || !prefix.starts_with('/') {
            return Err(StemError::Config(format!(
                "public_prefix must be an absolute path like /files, got `{}`",
                self.public_prefix
            )));
        }
        Ok(())
    }
}
