//! Typed errors that callers branch on.
//!
//! Everything else flows through `anyhow::Result`.

use std::path::PathBuf;

use thiserror::Error;

/// The user pressed Ctrl-C while a command or pause was in flight.
#[derive(Debug, Error)]
#[error("interrupted by user")]
pub struct Interrupted;

/// Returns true if `err` (or anything in its context chain) is an interrupt.
pub fn is_interrupted(err: &anyhow::Error) -> bool {
    err.chain().any(|cause| cause.is::<Interrupted>())
}

/// Bad configuration values (environment or pattern file).
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{name} must be a whole number of seconds, got '{value}'")]
    InvalidSeconds { name: &'static str, value: String },

    #[error("unknown error category '{0}' in pattern file")]
    UnknownCategory(String),

    #[error("invalid pattern '{pattern}' for category {category}: {source}")]
    InvalidPattern {
        category: String,
        pattern: String,
        #[source]
        source: regex::Error,
    },
}

/// Problems with the produced disk image.
#[derive(Debug, Error)]
pub enum ArtifactError {
    #[error("image file not found: {0}")]
    Missing(PathBuf),

    #[error("image size out of range: {size} bytes (expected {min}..={max})")]
    SizeOutOfRange { size: u64, min: u64, max: u64 },
}
