//! Expression preprocessing kernels
//!
//! - [`normalize`]: library-size normalization and `log1p`
//! - [`hvg`]: highly-variable gene selection (`seurat`, `seurat_v3`)
//! - [`cell_cycle`]: S / G2M scoring and phase assignment
//! - [`filter`]: QC-metric cell filters and gene-list subsetting

pub mod cell_cycle;
pub mod filter;
pub mod hvg;
pub mod normalize;

pub use cell_cycle::{score_cell_cycle, score_genes, Organism};
pub use filter::{apply_qc_filters, filter_genes, filter_obs, QcThresholds};
pub use hvg::{highly_variable_genes, HvgConfig, HvgFlavor, HvgResult, HvgStats};
pub use normalize::{log1p, normalize_total, store_counts_layer, COUNTS_LAYER};
