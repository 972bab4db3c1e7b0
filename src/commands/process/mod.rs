//! Normalization and HVG selection for integration
//!
//! # Pipeline Steps
//!
//! 1. Optional subset to the genes listed in a gene-rank CSV
//! 2. Raw counts copied into `layers["counts"]`
//! 3. Library-size normalization and `log1p`
//! 4. Cell-cycle scoring (`S_score`, `G2M_score`, `phase`)
//! 5. `seurat_v3` HVG selection on the counts layer, batched by sample, subsetting genes

mod args;

use anyhow::Result;
use log::info;
use scprep_lib::pipeline::aggregate::read_gene_list;
use scprep_lib::pipeline::anndata_ops::{read_anndata_h5ad, write_anndata_h5ad};
use scprep_lib::pipeline::preprocess::{
    filter_genes, highly_variable_genes, log1p, normalize_total, score_cell_cycle,
    store_counts_layer, HvgConfig, COUNTS_LAYER,
};

use crate::commands::common;

pub use args::{ProcessArgs, ProcessConfig};

pub fn run_process(args: ProcessArgs) -> Result<()> {
    info!("Starting normalization pipeline");
    info!("Arguments: {:?}", args);

    let config = ProcessConfig::from(args);
    config.validate()?;

    if config.dry_run {
        info!("Dry run completed successfully - all validations passed");
        return Ok(());
    }

    let active_threads = common::init_worker_pool(config.threads)?;
    info!("Worker pool: {} threads", active_threads);

    info!("Reading input AnnData file: {}", config.input.display());
    let mut adata = read_anndata_h5ad(&config.input)?;
    info!(
        "Loaded AnnData matrix with shape: {} × {}",
        adata.n_obs, adata.n_vars
    );

    if let Some(path) = &config.top_genes {
        let genes = read_gene_list(path)?;
        info!("Loaded {} ranked genes from {}", genes.len(), path.display());
        filter_genes(&mut adata, &genes)?;
    }

    store_counts_layer(&mut adata)?;
    normalize_total(&mut adata, config.target_sum)?;
    log1p(&mut adata)?;

    info!("Scoring cell cycle ({:?} gene symbols)", config.organism);
    score_cell_cycle(&mut adata, config.organism)?;

    let hvg_config = HvgConfig {
        subset: true,
        ..HvgConfig::seurat_v3(config.n_top_genes, COUNTS_LAYER, Some(&config.batch_key))
    };
    let hvg = highly_variable_genes(&mut adata, &hvg_config)?;
    info!(
        "Selected {} highly variable genes; dataset is now {} × {}",
        hvg.selected().len(),
        adata.n_obs,
        adata.n_vars
    );

    write_anndata_h5ad(&adata, &config.output)?;
    info!("Output written to: {}", config.output.display());
    Ok(())
}
