use thiserror::Error;

/// Result type used across the deobfuscation pipeline.
pub type Result<T> = std::result::Result<T, Error>;

/// Every failure is fatal: the pipeline is single-shot and the first error
/// aborts the run.
#[derive(Error, Debug)]
pub enum Error {
    /// Bad key/IV material, truncated body, or a decompressed size that does
    /// not match the declared one.
    #[error("envelope decode failed: {0}")]
    Envelope(String),

    /// Non-success status after the optimized-preview/preview fallback.
    #[error("request to {url} failed with status {status}")]
    Network { url: String, status: u16 },

    #[error("HTTP transport error: {0}")]
    Http(#[from] reqwest::Error),

    /// Timestamp key from the model metadata has no entry in the seed map.
    #[error("seed not found for timestamp: {timestamp}")]
    UnknownScheme { timestamp: String },

    #[error("unknown obfuscation version: {version}")]
    UnsupportedVersion { version: String },

    /// Scheme needs the external meta generator but none was configured.
    #[error("obfuscation version {version} requires an external meta generator")]
    GeneratorUnavailable { version: String },

    #[error("failed to transcode texture: {0}")]
    Transcode(String),

    /// A consume-and-remove vendor block reached the write pass.
    #[error("extension {extension} must be removed prior to writing")]
    ProtocolMisuse { extension: String },

    #[error("invalid document: {0}")]
    Document(String),

    #[error("not a valid model id or URL: {0}")]
    InvalidModelId(String),

    #[error("filesystem error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("image codec error: {0}")]
    Image(#[from] image::ImageError),

    #[error("GLB container error: {0}")]
    Gltf(#[from] gltf::Error),
}
