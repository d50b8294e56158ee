//! Error types shared across the ECOD workspace

use thiserror::Error;

/// Result type alias for common operations
pub type Result<T> = std::result::Result<T, EcodError>;

/// Errors raised by shared types and helpers
#[derive(Error, Debug)]
pub enum EcodError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid chain key '{0}': expected PDBID_CHAIN (e.g. 8abc_A)")]
    InvalidChainKey(String),

    #[error("Unknown {kind} value: {value}")]
    UnknownVariant { kind: &'static str, value: String },

    #[error("Parse error: {0}")]
    Parse(String),
}

impl EcodError {
    pub fn unknown_variant(kind: &'static str, value: impl Into<String>) -> Self {
        Self::UnknownVariant {
            kind,
            value: value.into(),
        }
    }
}
