//! scprep: single-cell RNA-seq preprocessing toolkit
//!
//! scprep prepares annotated single-cell matrices (`.h5ad`) for integration.
//! The library provides functionality for:
//! 1. Quality-control filtering of cells on upstream QC metrics
//! 2. Cross-sample ranking of highly variable genes with QC violin plots
//! 3. Normalization, cell-cycle scoring and batch-aware HVG selection
//!
//! # Modules
//!
//! The main modules are:
//! - [`core`]: Error type, thread pool sizing, file and sparse-matrix helpers
//! - [`pipeline`]: AnnData container, preprocessing kernels, aggregation and plotting
//! - [`utils`]: Utility functions used throughout the library

pub mod core;
pub mod pipeline;
pub mod utils;

pub use crate::core::error::{Result, ScprepError};
pub use crate::pipeline::anndata_ops::{read_anndata_h5ad, write_anndata_h5ad, AnnDataContainer};
