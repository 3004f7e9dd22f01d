//! Error types for the Capforge captioning drivers.
//!
//! Errors are organized by concern so messages carry the context a user needs
//! to act on them (file paths, model repos, HTTP status codes).

use std::path::PathBuf;
use thiserror::Error;

/// Top-level error type for Capforge operations.
#[derive(Error, Debug)]
pub enum CapforgeError {
    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Pipeline processing errors
    #[error("Pipeline error: {0}")]
    Pipeline(#[from] PipelineError),
}

/// Configuration-specific errors.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Failed to read the config file from disk
    #[error("Failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),

    /// Failed to parse TOML configuration
    #[error("Failed to parse config: {0}")]
    ParseError(#[from] toml::de::Error),

    /// Configuration values are invalid
    #[error("Invalid configuration: {0}")]
    ValidationError(String),
}

/// Errors raised while running a driver over a directory of images.
#[derive(Error, Debug)]
pub enum PipelineError {
    /// Image decoding failed
    #[error("Decode error for {path}: {message}")]
    Decode { path: PathBuf, message: String },

    /// Model loading or backend initialization failed
    #[error("Model error: {message}")]
    Model { message: String },

    /// Tagger inference failed
    #[error("Tagging failed for {path}: {message}")]
    Tagging { path: PathBuf, message: String },

    /// Caption generation failed
    #[error("Captioning failed for {path}: {message}")]
    Caption { path: PathBuf, message: String },

    /// Language model call failed
    #[error("LLM error: {message}")]
    Llm {
        message: String,
        /// HTTP status code, when the failure came from an HTTP response
        status_code: Option<u16>,
    },

    /// Model file download failed
    #[error("Download failed for {url}: {message}")]
    Download { url: String, message: String },

    /// Sidecar caption file could not be read or written
    #[error("Sidecar I/O failed for {path}: {source}")]
    Sidecar {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// No price entry exists for the requested chat model
    #[error("Unknown model '{model}'. Add the pricing for this model.")]
    UnknownPricing { model: String },

    /// Operation timed out
    #[error("Timeout in {stage} stage after {timeout_ms}ms")]
    Timeout { stage: String, timeout_ms: u64 },

    /// The remote endpoint refused or dropped the connection
    #[error("Connection to {stage} failed: {message}")]
    Connection { stage: String, message: String },
}

/// Convenience type alias for Capforge results.
pub type Result<T> = std::result::Result<T, CapforgeError>;

/// Convenience type alias for pipeline-specific results.
pub type PipelineResult<T> = std::result::Result<T, PipelineError>;
