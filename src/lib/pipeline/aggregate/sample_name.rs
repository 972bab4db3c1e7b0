//! Sample identifiers derived from input paths

use crate::core::error::{Result, ScprepError};
use std::path::Path;

/// Strategy turning an input path into a sample name.
pub trait SampleNamer {
    fn sample_name(&self, path: &Path) -> Result<String>;
}

/// Split the file name on `delimiter` and take the token at `index`.
///
/// `cohort_SAMPLE07_rna.h5` with `_` and index 1 gives `SAMPLE07`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DelimitedToken {
    pub delimiter: String,
    pub index: usize,
}

impl Default for DelimitedToken {
    fn default() -> Self {
        Self {
            delimiter: "_".to_string(),
            index: 1,
        }
    }
}

impl DelimitedToken {
    pub fn new(delimiter: impl Into<String>, index: usize) -> Result<Self> {
        let delimiter = delimiter.into();
        if delimiter.is_empty() {
            return Err(ScprepError::InvalidInput(
                "Sample name delimiter must not be empty".to_string(),
            ));
        }
        Ok(Self { delimiter, index })
    }
}

impl SampleNamer for DelimitedToken {
    fn sample_name(&self, path: &Path) -> Result<String> {
        let file_name = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();

        match file_name.split(self.delimiter.as_str()).nth(self.index) {
            Some(token) if !token.is_empty() => Ok(token.to_string()),
            _ => Err(ScprepError::MalformedSampleName {
                input: file_name,
                delimiter: self.delimiter.clone(),
                index: self.index,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_underscore_token_is_the_sample() {
        let namer = DelimitedToken::default();
        assert_eq!(
            namer
                .sample_name(Path::new("/data/cohort_SAMPLE07_rna.h5"))
                .unwrap(),
            "SAMPLE07"
        );
    }

    #[test]
    fn too_few_tokens_is_malformed() {
        let namer = DelimitedToken::default();
        let err = namer.sample_name(Path::new("/data/sample.h5ad")).unwrap_err();
        assert!(matches!(
            err,
            ScprepError::MalformedSampleName { ref input, index: 1, .. } if input == "sample.h5ad"
        ));
    }

    #[test]
    fn empty_token_is_malformed() {
        let namer = DelimitedToken::default();
        assert!(namer.sample_name(Path::new("cohort__rna.h5ad")).is_err());
    }

    #[test]
    fn custom_delimiter_and_index() {
        let namer = DelimitedToken::new("-", 0).unwrap();
        assert_eq!(namer.sample_name(Path::new("S3-lane1.h5ad")).unwrap(), "S3");
        assert!(DelimitedToken::new("", 0).is_err());
    }
}
