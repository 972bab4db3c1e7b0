//! Input validation utilities
//!
//! Checks shared by the command configs: H5AD input and output paths, and
//! numeric parameters that must be finite and positive.

use crate::core::error::{Result, ScprepError};
use std::path::Path;

/// Validate that an input H5AD file exists and carries the `.h5ad` extension.
///
/// # Errors
///
/// Returns an error if:
/// - the file doesn't exist
/// - the file doesn't have an `.h5ad` extension
pub fn validate_input_h5ad(input: &Path) -> Result<()> {
    if !input.exists() {
        return Err(ScprepError::FileNotFound(format!(
            "Input file not found: {}",
            input.display()
        )));
    }

    if !has_h5ad_extension(input) {
        return Err(ScprepError::InvalidInput(format!(
            "Input file must have .h5ad extension: {}",
            input.display()
        )));
    }

    Ok(())
}

/// Validate an output H5AD path, removing any existing file.
///
/// HDF5 refuses to create over an existing file, so a previous output is
/// deleted up front.
pub fn validate_output_h5ad(output: &Path) -> Result<()> {
    if !has_h5ad_extension(output) {
        return Err(ScprepError::InvalidInput(format!(
            "Output file must have .h5ad extension: {}",
            output.display()
        )));
    }

    if output.exists() {
        std::fs::remove_file(output).map_err(|e| {
            ScprepError::InvalidInput(format!(
                "Failed to remove existing output file '{}': {}",
                output.display(),
                e
            ))
        })?;
    }

    Ok(())
}

/// Validate a parameter that must be finite and strictly positive.
pub fn validate_positive(name: &str, value: f64) -> Result<()> {
    if !value.is_finite() {
        return Err(ScprepError::InvalidInput(format!(
            "{} must be a finite number",
            name
        )));
    }
    if value <= 0.0 {
        return Err(ScprepError::InvalidInput(format!(
            "{} must be greater than 0, got {}",
            name, value
        )));
    }
    Ok(())
}

/// Validate a count parameter that must be non-zero.
pub fn validate_nonzero(name: &str, value: usize) -> Result<()> {
    if value == 0 {
        return Err(ScprepError::InvalidInput(format!(
            "{} must be greater than 0",
            name
        )));
    }
    Ok(())
}

fn has_h5ad_extension(path: &Path) -> bool {
    path.extension().map(|ext| ext == "h5ad").unwrap_or(false)
}
