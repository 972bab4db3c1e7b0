//! Error types for the scprep library

use std::io;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ScprepError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("AnnData error: {0}")]
    AnnData(#[from] anyhow::Error),

    #[error("Polars error: {0}")]
    Polars(#[from] polars::error::PolarsError),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Data format error: {0}")]
    DataFormat(String),

    #[error("Sparse matrix error: {0}")]
    SparseMatrix(String),

    #[error("Failed to read input matrix '{path}': {reason}")]
    InputRead { path: String, reason: String },

    #[error("Failed to write output '{path}': {reason}")]
    Output { path: String, reason: String },

    #[error("Schema mismatch in sample '{sample}': {detail}")]
    SchemaMismatch { sample: String, detail: String },

    #[error("Malformed sample name '{input}': expected token {index} after splitting on '{delimiter}'")]
    MalformedSampleName {
        input: String,
        delimiter: String,
        index: usize,
    },

    #[error("Sample name '{0}' occurs more than once")]
    DuplicateSample(String),

    #[error("Missing metric: obs column '{0}' is absent or not numeric")]
    MissingMetric(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("File not found: {0}")]
    FileNotFound(String),

    #[error("Threshold validation error: {field} must be between {min} and {max}, got {value}")]
    ThresholdValidation {
        field: String,
        min: f64,
        max: f64,
        value: f64,
    },

    #[error("Dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: String, actual: String },

    #[error("Plot error: {0}")]
    Plot(String),

    #[error("Empty data: {0}")]
    EmptyData(String),
}

pub type Result<T> = std::result::Result<T, ScprepError>;

impl From<nalgebra_sparse::SparseFormatError> for ScprepError {
    fn from(err: nalgebra_sparse::SparseFormatError) -> Self {
        ScprepError::SparseMatrix(format!("Sparse format error: {:?}", err))
    }
}

/// Returns `true` if the error originated from a broken pipe.
#[inline]
pub fn is_broken_pipe(err: &anyhow::Error) -> bool {
    err.chain().any(|cause| {
        cause
            .downcast_ref::<io::Error>()
            .map(|io_err| io_err.kind() == io::ErrorKind::BrokenPipe)
            .unwrap_or(false)
            || matches!(
                cause.downcast_ref::<ScprepError>(),
                Some(ScprepError::Io(io_err)) if io_err.kind() == io::ErrorKind::BrokenPipe
            )
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn broken_pipe_is_detected_through_library_errors() {
        let inner = ScprepError::Io(io::Error::new(io::ErrorKind::BrokenPipe, "closed"));
        let err = anyhow::Error::new(inner).context("writing rank table");
        assert!(is_broken_pipe(&err));
    }

    #[test]
    fn other_errors_are_not_broken_pipes() {
        let err = anyhow::Error::new(ScprepError::MissingMetric("pct_counts_mt".into()));
        assert!(!is_broken_pipe(&err));
    }

    #[test]
    fn malformed_sample_name_reports_convention() {
        let err = ScprepError::MalformedSampleName {
            input: "sample.h5ad".into(),
            delimiter: "_".into(),
            index: 1,
        };
        assert_eq!(
            err.to_string(),
            "Malformed sample name 'sample.h5ad': expected token 1 after splitting on '_'"
        );
    }
}
