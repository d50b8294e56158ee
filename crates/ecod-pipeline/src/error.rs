//! Error types for the batch pipeline
//!
//! The pipeline distinguishes errors that are isolated to one chain
//! (parse failures, partitioner failures) from errors that stop a stage
//! (submission) or the whole batch (persistence). Per-chain errors are caught
//! inside the stage loops and written to the manifest as a failed status;
//! everything else propagates to the caller.

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for pipeline operations
pub type Result<T> = std::result::Result<T, PipelineError>;

#[derive(Error, Debug)]
pub enum PipelineError {
    /// The scheduler rejected a work group, or there was nothing to submit
    #[error("Job submission failed: {0}")]
    Submission(String),

    /// The scheduler could not be queried at all
    #[error("Scheduler unavailable: {0}. Check that the scheduler commands are on PATH.")]
    Scheduler(String),

    /// A single report is missing or malformed
    #[error("Failed to parse '{}': {reason}", path.display())]
    Parse { path: PathBuf, reason: String },

    /// A chain, job or batch named by the caller does not exist
    #[error("{kind} not found: {key}")]
    NotFound { kind: &'static str, key: String },

    /// A mutation was asked for out of stage order
    #[error("Invalid state change for {key}: {reason}")]
    InvalidTransition { key: String, reason: String },

    /// The manifest could not be read or written
    #[error("Manifest persistence failed for '{}': {reason}", path.display())]
    Persistence { path: PathBuf, reason: String },

    /// External partitioner failed for one chain
    #[error("Partitioning failed: {0}")]
    Partition(String),

    /// Cluster input violates the one-cluster-per-chain rule
    #[error("Invalid clustering input: {0}")]
    InvalidClustering(String),

    /// Configuration is missing or invalid
    #[error("Configuration error: {0}. Check ECOD_* environment variables or command flags.")]
    Config(String),

    #[error(transparent)]
    Common(#[from] ecod_common::EcodError),

    #[error("File operation failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid pattern: {0}")]
    Pattern(#[from] regex::Error),

    #[error("Failed to write XML: {0}")]
    Xml(String),
}

impl PipelineError {
    pub fn submission(msg: impl Into<String>) -> Self {
        Self::Submission(msg.into())
    }

    pub fn scheduler(msg: impl Into<String>) -> Self {
        Self::Scheduler(msg.into())
    }

    pub fn parse(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self::Parse {
            path: path.into(),
            reason: reason.into(),
        }
    }

    pub fn chain_not_found(key: impl ToString) -> Self {
        Self::NotFound {
            kind: "Chain",
            key: key.to_string(),
        }
    }

    pub fn job_not_found(key: impl ToString) -> Self {
        Self::NotFound {
            kind: "Job",
            key: key.to_string(),
        }
    }

    pub fn persistence(path: impl Into<PathBuf>, reason: impl ToString) -> Self {
        Self::Persistence {
            path: path.into(),
            reason: reason.to_string(),
        }
    }

    pub fn partition(msg: impl Into<String>) -> Self {
        Self::Partition(msg.into())
    }

    pub fn invalid_clustering(msg: impl Into<String>) -> Self {
        Self::InvalidClustering(msg.into())
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    pub fn xml(err: impl std::fmt::Display) -> Self {
        Self::Xml(err.to_string())
    }

    /// Errors that stay with one chain instead of stopping the stage
    pub fn is_per_chain(&self) -> bool {
        matches!(self, Self::Parse { .. } | Self::Partition(_) | Self::Xml(_))
    }
}
