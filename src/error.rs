// src/error.rs
//! Error handling for the texture compilation pipeline.
//!
//! - Enum discriminant matching stays cheap; allocations happen only on error paths.
//! - Cache corruption is a *recoverable* condition: callers delete the entry and rebake.
//! - Device failures are hard per-material failures: the material is dropped, the
//!   pipeline keeps running.

use thiserror::Error;

/// Main error type; lightweight, Send + Sync + 'static.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum Error {
    /// I/O errors (most common).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON (de)serialization, used by the pipeline configuration.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Image decoding failures.
    #[error("image error: {0}")]
    Image(#[from] image::ImageError),

    /// A cache entry failed validation or parsing. The entry has already been
    /// deleted by the time this surfaces; treat as a miss.
    #[error("cache entry corrupt: {0}")]
    CacheCorrupt(String),

    /// Graphics device failure while creating or uploading a texture.
    #[error("device failure: {0}")]
    Device(String),

    /// A pixel format with no supported block compressor.
    #[error("no compressor for pixel format: {0}")]
    UnsupportedCompression(String),

    /// Invalid caller-supplied data (sizes, component counts, node trees).
    #[error("{0}")]
    Invalid(String),

    /// Simple custom message.
    #[error("{0}")]
    Custom(String),

    /// Context chaining.
    #[error("{message}: {source}")]
    WithContext {
        message: String,
        #[source]
        source: Box<Error>,
    },
}

impl Error {
    /// Create a custom error message.
    #[inline]
    pub fn custom<S: Into<String>>(msg: S) -> Self {
        Self::Custom(msg.into())
    }

    /// Create a device failure.
    #[inline]
    pub fn device<S: Into<String>>(msg: S) -> Self {
        Self::Device(msg.into())
    }

    /// Create an invalid-input error.
    #[inline]
    pub fn invalid<S: Into<String>>(msg: S) -> Self {
        Self::Invalid(msg.into())
    }

    /// Add context to any error (chainable).
    #[inline]
    pub fn context<C: Into<String>>(self, context: C) -> Self {
        Self::WithContext {
            message: context.into(),
            source: Box::new(self),
        }
    }

    // === Kind checks ===

    #[inline]
    pub fn is_io(&self) -> bool {
        matches!(self, Error::Io(_))
    }

    #[inline]
    pub fn is_cache_corrupt(&self) -> bool {
        matches!(self, Error::CacheCorrupt(_))
    }

    #[inline]
    pub fn is_device(&self) -> bool {
        matches!(self, Error::Device(_))
    }
}

/// Convenient `Result` alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;
