//! AI capability provider.
//!
//! Detection (faces, objects, NSFW) and generative edits sit behind the
//! `AiProvider` trait. The concrete provider is picked once at startup from
//! `AiProviderKind` and shared as `Arc<dyn AiProvider>`.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::adapt::metadata::{DetectedObject, FaceBox};
use crate::config::AiConfig;
use crate::secrets::{self, SecretError};

pub mod gemini;
pub mod offline;

pub use gemini::GeminiProvider;
pub use offline::OfflineProvider;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AiProviderKind {
    Gemini,
    #[default]
    Offline,
}

/// Encoded image bytes returned by a generative call.
#[derive(Debug, Clone)]
pub struct GeneratedImage {
    pub bytes: Vec<u8>,
    pub mime_type: String,
}

#[derive(Error, Debug)]
pub enum AiError {
    #[error("{operation} is not available from the {provider} provider")]
    NotSupported {
        operation: &'static str,
        provider: &'static str,
    },

    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Provider returned HTTP {status}: {body}")]
    Api { status: u16, body: String },

    #[error("Unexpected provider response: {0}")]
    InvalidResponse(String),

    #[error("Failed to read image '{path}': {source}")]
    ReadImage {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Provider credentials unavailable: {0}")]
    Credentials(#[from] SecretError),
}

/// Detection and generative-edit capabilities.
///
/// Calls are blocking; they run on worker threads, never inside an async
/// runtime.
pub trait AiProvider: Send + Sync {
    fn name(&self) -> &'static str;

    fn detect_faces(&self, image: &Path) -> Result<Vec<FaceBox>, AiError>;

    fn detect_objects(&self, image: &Path) -> Result<Vec<DetectedObject>, AiError>;

    fn detect_nsfw(&self, image: &Path) -> Result<bool, AiError>;

    /// Generative resize to exactly `width` x `height`, optionally applying
    /// a creative prompt on the way.
    fn resize_image(
        &self,
        image: &Path,
        width: u32,
        height: u32,
        prompt: Option<&str>,
    ) -> Result<GeneratedImage, AiError>;

    /// Free-form edit driven by a user prompt.
    fn edit_image(&self, image: &Path, prompt: &str) -> Result<GeneratedImage, AiError>;
}

/// Builds the configured provider.
pub fn build_provider(config: &AiConfig) -> Result<Arc<dyn AiProvider>, AiError> {
    match config.provider {
        AiProviderKind::Offline => Ok(Arc::new(OfflineProvider)),
        AiProviderKind::Gemini => {
            let api_key = secrets::resolve_secret(
                config.api_key.as_deref(),
                config.api_key_file.as_deref(),
                config.api_key_env.as_deref(),
            )?;
            Ok(Arc::new(GeminiProvider::new(api_key, config)?))
        }
    }
}
