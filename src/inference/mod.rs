//! Classification engines.
//!
//! The engine is acquired once at startup and shared behind an `Arc`. It only
//! turns a validated image into a probability vector; ranking, validation of
//! the vector and persistence happen in `predictions`.

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;

pub mod http;
pub mod manifest;

pub use manifest::ClassManifest;

#[derive(Debug, thiserror::Error)]
pub enum InferenceError {
    #[error("inference engine unavailable: {0}")]
    Unavailable(String),
    #[error("inference timed out after {0:?}")]
    Timeout(Duration),
    #[error("inference returned malformed output: {0}")]
    Malformed(String),
    #[error("expected {expected} probabilities, got {actual}")]
    WrongLength { expected: usize, actual: usize },
    #[error("probability at index {index} is not finite")]
    NonFinite { index: usize },
    #[error("probability at index {index} is negative")]
    Negative { index: usize },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageFormat {
    Jpeg,
    Png,
}

impl ImageFormat {
    pub fn from_mime(ct: &str) -> Option<Self> {
        match ct.trim().to_ascii_lowercase().as_str() {
            "image/jpeg" | "image/jpg" => Some(Self::Jpeg),
            "image/png" => Some(Self::Png),
            _ => None,
        }
    }

    pub fn mime(self) -> &'static str {
        match self {
            Self::Jpeg => "image/jpeg",
            Self::Png => "image/png",
        }
    }

    pub fn ext(self) -> &'static str {
        match self {
            Self::Jpeg => "jpg",
            Self::Png => "png",
        }
    }
}

/// An upload that passed size, type and signature checks.
#[derive(Debug, Clone)]
pub struct NormalizedImage {
    pub bytes: Bytes,
    pub format: ImageFormat,
}

#[async_trait]
pub trait InferenceEngine: Send + Sync {
    /// Short identifier reported in `model_info`.
    fn name(&self) -> &str;

    /// One probability per manifest class, in manifest order.
    async fn classify(&self, image: &NormalizedImage) -> Result<Vec<f64>, InferenceError>;

    async fn ready(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mime_mapping() {
        assert_eq!(ImageFormat::from_mime("image/jpg"), Some(ImageFormat::Jpeg));
        assert_eq!(ImageFormat::from_mime("IMAGE/PNG"), Some(ImageFormat::Png));
        assert_eq!(ImageFormat::from_mime("image/webp"), None);
        assert_eq!(ImageFormat::Jpeg.mime(), "image/jpeg");
        assert_eq!(ImageFormat::Png.ext(), "png");
    }
}
