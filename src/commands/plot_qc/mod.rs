//! Cross-sample gene ranking and QC plots
//!
//! Each sample listed in the file-of-filenames is normalized on a copy, its
//! highly variable genes are ranked by normalized dispersion and summed into a
//! single table, and the raw sample is minified. The minified samples are then
//! concatenated and one violin plot per QC metric is written, grouped by sample.

mod args;

use anyhow::Result;
use log::info;
use scprep_lib::pipeline::aggregate::{finalize, AggregateOutputs, GeneRankAggregator};
use scprep_lib::pipeline::anndata_ops::read_anndata_h5ad;
use scprep_lib::utils;

use crate::commands::common;

pub use args::{PlotQcArgs, PlotQcConfig};

pub fn run_plot_qc(args: PlotQcArgs) -> Result<()> {
    info!("Starting QC plotting and gene ranking");
    info!("Arguments: {:?}", args);

    let config = PlotQcConfig::from(args);
    config.validate()?;
    info!("Working directory: {}", config.working_dir.display());
    info!("Script directory: {}", config.script_dir.display());

    let active_threads = common::init_worker_pool(config.threads)?;
    info!("Worker pool: {} threads", active_threads);

    let samples: Vec<_> = utils::read_fofn(&config.fofn)?
        .into_iter()
        .map(|path| utils::resolve_against(&config.working_dir, path))
        .collect();
    info!(
        "Read {} sample paths from {}",
        samples.len(),
        config.fofn.display()
    );

    let aggregator = GeneRankAggregator::new(config.namer()?, config.aggregator.clone());
    let aggregation = aggregator.run(&samples, |path| read_anndata_h5ad(path))?;

    let outputs = AggregateOutputs {
        top_genes: config.top_genes.clone(),
        metadata: config.metadata.clone(),
        combined: config.combined.clone(),
        metrics: config.metrics.clone(),
        plot: config.plot.clone(),
        threads: active_threads,
    };
    let report = finalize(aggregation, &outputs)?;

    info!(
        "Combined dataset: {} cells × {} genes",
        report.n_cells, report.n_genes
    );
    info!("Gene ranks written to: {}", outputs.top_genes.display());
    if let Some(path) = &outputs.metadata {
        info!("Metadata written to: {}", path.display());
    }
    for plot in &report.plots {
        info!("Plot written to: {}", plot.display());
    }
    Ok(())
}
