use crate::{
    error::{Result, StemError},
    io::{
        crypto::verify_sha256,
        net::{download_with_progress, http_client},
        paths::models_cache_dir,
    },
    model::ModelManifest,
};

use std::{
    fs,
    path::{Path, PathBuf},
};
use tracing::{info, warn};

/// A model artifact on local disk together with the manifest describing it.
#[derive(Debug, Clone)]
pub struct ModelHandle {
    pub manifest: ModelManifest,
    pub local_path: PathBuf,
}

/// Fetches `manifest_url`, then makes sure the primary artifact is cached
/// and verified. A cached copy whose digest matches is reused as-is.
pub fn ensure_model(manifest_url: &str, cache_dir: Option<&Path>) -> Result<ModelHandle> {
    let client = http_client()?;
    let manifest: ModelManifest = client
        .get(manifest_url)
        .send()?
        .error_for_status()?
        .json()?;

    let a = manifest
        .resolve_primary_artifact()
        .map_err(StemError::Manifest)?;
    // 32 bytes of hex, so the short prefix below is always a char boundary
    if a.sha256.len() != 64 || !a.sha256.bytes().all(|b| b.is_ascii_hexdigit()) {
        return Err(StemError::Manifest(format!(
            "artifact `{}` has a malformed sha256",
            a.file
        )));
    }

    let cache_dir = match cache_dir {
        Some(dir) => dir.to_path_buf(),
        None => models_cache_dir()?,
    };
    fs::create_dir_all(&cache_dir)?;

    let ext = Path::new(&a.file)
        .extension()
        .and_then(|e| e.to_str())
        .map(|s| format!(".{s}"))
        .unwrap_or_default();
    let file_name = format!("{}-{}{}", manifest.name, &a.sha256[..8], ext);
    let local_path = cache_dir.join(file_name);

    let cached = local_path.exists() && matches!(verify_sha256(&local_path, &a.sha256), Ok(true));
    if cached {
        info!(path = %local_path.display(), "using cached model");
    } else {
        let size = download_with_progress(&client, &a.url, &local_path)?;
        if !verify_sha256(&local_path, &a.sha256)? {
            fs::remove_file(&local_path).ok();
            return Err(StemError::Checksum {
                path: local_path.display().to_string(),
            });
        }
        if a.size_bytes > 0 && size != a.size_bytes {
            warn!(
                path = %local_path.display(),
                expected = a.size_bytes,
                got = size,
                "model size differs from manifest"
            );
        }
    }

    Ok(ModelHandle {
        manifest,
        local_path,
    })
}

/// Opens a model that is already on disk. The manifest is read from
/// `<model>.json` next to it (e.g. `htdemucs.onnx.json`).
pub fn local_model(model_path: &Path) -> Result<ModelHandle> {
    if !model_path.is_file() {
        return Err(StemError::Config(format!(
            "model file not found: {}",
            model_path.display()
        )));
    }
    let mut manifest_path = model_path.as_os_str().to_owned();
    manifest_path.push(".json");
    let manifest_path = PathBuf::from(manifest_path);

    let raw = fs::read_to_string(&manifest_path).map_err(|e| {
        StemError::Manifest(format!("cannot read {}: {e}", manifest_path.display()))
    })?;
    let manifest: ModelManifest = serde_json::from_str(&raw)?;

    Ok(ModelHandle {
        manifest,
        local_path: model_path.to_path_buf(),
    })
}
