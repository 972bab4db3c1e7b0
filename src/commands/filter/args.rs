use anyhow::Result;
use log::info;
use scprep_lib::pipeline::preprocess::QcThresholds;
use scprep_lib::pipeline::validation::{validate_input_h5ad, validate_output_h5ad};
use scprep_lib::utils;
use std::path::PathBuf;
use structopt::StructOpt;

/// Arguments for the `filter` command.
#[derive(Debug, Clone, StructOpt)]
#[structopt(name = "filter", about = "Filter cells on per-cell QC metrics")]
pub struct FilterArgs {
    /// Input AnnData (.h5ad) with QC metrics and doublet scores in obs.
    #[structopt(long, parse(from_os_str))]
    pub adata_input: PathBuf,

    /// Output AnnData (.h5ad) path.
    #[structopt(long, parse(from_os_str))]
    pub adata_output: PathBuf,

    /// Keep cells with pct_counts_mt at or below this value.
    #[structopt(long, default_value = "10")]
    pub max_pct_mt: f64,

    /// Keep cells with doublet_score strictly below this value.
    #[structopt(long, default_value = "0.2")]
    pub max_doublet_score: f64,

    #[structopt(long, default_value = "500")]
    pub min_total_counts: f64,

    #[structopt(long, default_value = "100000")]
    pub max_total_counts: f64,

    /// Minimum n_genes_by_counts.
    #[structopt(long, default_value = "300")]
    pub min_genes: f64,

    /// Maximum n_genes_by_counts.
    #[structopt(long, default_value = "10000")]
    pub max_genes: f64,

    /// Number of threads to use.
    #[structopt(short, long, default_value = "2")]
    pub threads: usize,

    /// Validate inputs without processing.
    #[structopt(long)]
    pub dry_run: bool,
}

/// Normalised settings consumed by [`super::run_filter`].
#[derive(Debug, Clone)]
pub struct FilterConfig {
    pub input: PathBuf,
    pub output: PathBuf,
    pub thresholds: QcThresholds,
    pub threads: usize,
    pub dry_run: bool,
}

impl From<FilterArgs> for FilterConfig {
    fn from(args: FilterArgs) -> Self {
        Self {
            input: args.adata_input,
            output: args.adata_output,
            thresholds: QcThresholds {
                max_pct_mt: args.max_pct_mt,
                max_doublet_score: args.max_doublet_score,
                min_total_counts: args.min_total_counts,
                max_total_counts: args.max_total_counts,
                min_genes: args.min_genes,
                max_genes: args.max_genes,
            },
            threads: args.threads,
            dry_run: args.dry_run,
        }
    }
}

impl FilterConfig {
    pub fn validate(&self) -> Result<()> {
        self.thresholds.validate()?;
        utils::determine_allowed_cpus(self.threads)?;
        info!("Configuration validation passed");

        validate_input_h5ad(&self.input)?;
        utils::make_parent_dirs(&self.output)?;
        if !self.dry_run {
            validate_output_h5ad(&self.output)?;
        }
        info!("File validation passed");
        Ok(())
    }
}
