//! QC filtering of cells
//!
//! Drops cells outside the mitochondrial, doublet, total-count and
//! detected-gene bounds, in that order, and writes the survivors.

mod args;

use anyhow::Result;
use log::info;
use scprep_lib::pipeline::anndata_ops::{read_anndata_h5ad, write_anndata_h5ad};
use scprep_lib::pipeline::preprocess::apply_qc_filters;

use crate::commands::common;

pub use args::{FilterArgs, FilterConfig};

pub fn run_filter(args: FilterArgs) -> Result<()> {
    info!("Starting QC filtering");
    info!("Arguments: {:?}", args);

    let config = FilterConfig::from(args);
    config.validate()?;

    if config.dry_run {
        info!("Dry run completed successfully - all validations passed");
        return Ok(());
    }

    let active_threads = common::init_worker_pool(config.threads)?;
    info!("Worker pool: {} threads", active_threads);

    info!("Reading input AnnData file: {}", config.input.display());
    let mut adata = read_anndata_h5ad(&config.input)?;
    let n_before = adata.n_obs;
    info!(
        "Loaded AnnData matrix with shape: {} × {}",
        adata.n_obs, adata.n_vars
    );

    apply_qc_filters(&mut adata, &config.thresholds)?;
    info!(
        "Retained {} of {} cells after QC filtering",
        adata.n_obs, n_before
    );

    write_anndata_h5ad(&adata, &config.output)?;
    info!("Output written to: {}", config.output.display());
    Ok(())
}
