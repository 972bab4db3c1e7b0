pub mod aggregate;
pub mod anndata_ops;
pub mod plot;
pub mod preprocess;
pub mod validation;

pub mod prelude {
    pub use super::aggregate::{
        concat_samples, finalize, AggregateOutputs, AggregatorConfig, DelimitedToken,
        GeneRankAggregator, GeneRankTable, MinifiedSample, RankOrder, SampleNamer, QC_METRICS,
    };
    pub use super::anndata_ops::{read_anndata_h5ad, write_anndata_h5ad, AnnDataContainer};
    pub use super::plot::{PlotFormat, PlotSettings};
    pub use super::preprocess::{
        apply_qc_filters, highly_variable_genes, log1p, normalize_total, score_cell_cycle,
        store_counts_layer, HvgConfig, Organism, QcThresholds,
    };
}
