//! Error types for the few-shot pipeline
//!
//! Configuration errors are raised eagerly, before any compute-heavy work,
//! and are always fatal. Tensor-shape violations propagate uncaught: a
//! malformed batch indicates an upstream data-pipeline defect.

use thiserror::Error;

/// Errors raised by the few-shot pipeline
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("neither a support image loader nor a (meta_query, meta_key) pair was provided; one of them is required for the meta-adapter path")]
    MissingMetaSource,
    #[error("support set of {total} embeddings does not split evenly across {num_classes} classes")]
    UnevenSupportSet { total: usize, num_classes: usize },
    #[error("class index {label} is out of range for {num_classes} classes")]
    ClassOutOfRange { label: usize, num_classes: usize },
    #[error("dimension mismatch: expected {expected}, got {got}")]
    DimensionMismatch { expected: usize, got: usize },
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    #[error(transparent)]
    Tensor(#[from] candle_core::Error),
    #[error("checkpoint I/O: {0}")]
    Io(#[from] std::io::Error),
}

/// Result alias used throughout the crate
pub type Result<T> = std::result::Result<T, PipelineError>;
