//! scprep - single-cell RNA-seq preprocessing
//!
//! scprep prepares per-sample annotated matrices (`.h5ad`) for integration.
//!
//! # Tools
//!
//! scprep provides several subcommands:
//!
//! - `filter`: Drop cells failing mitochondrial, doublet, count and gene QC bounds
//! - `plot-qc`: Rank highly variable genes across samples and plot QC metrics per sample
//! - `process`: Normalize, score cell cycle and select batch-aware highly variable genes
//!
//! # Usage
//!
//! ```bash
//! # QC-filter one sample
//! scprep filter --adata-input s1.h5ad --adata-output s1_filtered.h5ad
//!
//! # Rank genes across samples and write violin plots
//! scprep plot-qc --working-dir . --adata-objects-fofn samples.fofn --project-name cohort
//!
//! # Normalize and keep the top 8000 batch-aware HVGs
//! scprep process --working-dir . --adata-input merged.h5ad --adata-output processed.h5ad \
//!     --top-genes cohort_top_genes.csv
//! ```

extern crate scprep_lib;
pub mod commands;
use anyhow::Result;
use env_logger::Env;
use log::*;
use scprep_lib::utils;
use structopt::StructOpt;

#[derive(StructOpt)]
#[structopt(rename_all = "kebab-case", author, about)]
/// Single-cell RNA-seq preprocessing with scprep
struct Args {
    #[structopt(subcommand)]
    subcommand: Subcommand,
}

#[derive(StructOpt)]
#[structopt(rename_all = "kebab-case")]
enum Subcommand {
    /// Filter cells on per-cell QC metrics
    Filter(commands::FilterArgs),
    /// Rank highly variable genes across samples and plot QC metrics
    PlotQc(commands::PlotQcArgs),
    /// Normalize, score cell cycle and select highly variable genes
    Process(commands::ProcessArgs),
}

impl Subcommand {
    fn run(self) -> Result<()> {
        match self {
            Subcommand::Filter(args) => commands::run_filter(args)?,
            Subcommand::PlotQc(args) => commands::run_plot_qc(args)?,
            Subcommand::Process(args) => commands::run_process(args)?,
        }
        Ok(())
    }
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();
    if let Err(err) = Args::from_args().subcommand.run() {
        if utils::is_broken_pipe(&err) {
            std::process::exit(0);
        }
        error!("{:#}", err);
        std::process::exit(1);
    }
    Ok(())
}
