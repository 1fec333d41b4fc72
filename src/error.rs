use thiserror::Error;

/// Central error type for the stem-splitter-service crate.
///
/// Every variant is scoped to one request or one startup step; none of them
/// leaves the shared model in a different state.
#[derive(Debug, Error)]
pub enum StemError {
    // Generic fallback (wraps anyhow)
    #[error("{0}")]
    Anyhow(#[from] anyhow::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // Request-facing variants
    #[error("Upload error: {0}")]
    Upload(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Upload too large: {0}")]
    PayloadTooLarge(String),

    #[error("Decode error: {0}")]
    Decode(String),

    #[error("Unknown lane `{0}`")]
    UnknownLane(String),

    #[error("Unsupported sample rate {actual} Hz (model expects {expected} Hz)")]
    UnsupportedSampleRate { expected: u32, actual: u32 },

    // Pipeline variants
    #[error("Model inference failed: {0}")]
    ModelInference(String),

    #[error("Stems are not aligned: {0}")]
    StemAlignment(String),

    #[error("Stem `{0}` missing from separation output")]
    MissingStem(String),

    #[error("Resampling failed: {0}")]
    Resample(String),

    // Startup / provisioning variants
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Manifest error: {0}")]
    Manifest(String),

    #[error("Checksum mismatch for {path}")]
    Checksum { path: String },

    #[error("Cache dir not available")]
    CacheDirUnavailable,
}

impl StemError {
    /// Stable snake_case classification used in error payloads.
    pub fn kind(&self) -> &'static str {
        match self {
            StemError::Anyhow(_) => "internal",
            StemError::Io(_) => "io",
            StemError::Upload(_) => "upload",
            StemError::InvalidRequest(_) => "invalid_request",
            StemError::PayloadTooLarge(_) => "payload_too_large",
            StemError::Decode(_) => "decode",
            StemError::UnknownLane(_) => "unknown_lane",
            StemError::UnsupportedSampleRate { .. } => "unsupported_sample_rate",
            StemError::ModelInference(_) => "model_inference",
            StemError::StemAlignment(_) => "stem_alignment",
            StemError::MissingStem(_) => "missing_stem",
            StemError::Resample(_) => "resample",
            StemError::Config(_) => "config",
            StemError::Manifest(_) => "manifest",
            StemError::Checksum { .. } => "checksum",
            StemError::CacheDirUnavailable => "cache_dir_unavailable",
        }
    }

    /// True when the caller can fix the request and retry.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            StemError::Upload(_)
                | StemError::InvalidRequest(_)
                | StemError::PayloadTooLarge(_)
                | StemError::Decode(_)
                | StemError::UnknownLane(_)
                | StemError::UnsupportedSampleRate { .. }
        )
    }
}

// --- Implement From conversions for common errors ---
impl From<serde_json::Error> for StemError {
    fn from(e: serde_json::Error) -> Self {
        StemError::Anyhow(e.into())
    }
}

impl From<reqwest::Error> for StemError {
    fn from(e: reqwest::Error) -> Self {
        StemError::Anyhow(e.into())
    }
}

impl From<hex::FromHexError> for StemError {
    fn from(e: hex::FromHexError) -> Self {
        StemError::Anyhow(e.into())
    }
}

impl From<hound::Error> for StemError {
    fn from(e: hound::Error) -> Self {
        StemError::Anyhow(e.into())
    }
}

#[cfg(feature = "onnx")]
impl From<ort::Error> for StemError {
    fn from(e: ort::Error) -> Self {
        StemError::ModelInference(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, StemError>;
