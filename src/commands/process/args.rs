use anyhow::Result;
use log::info;
use scprep_lib::pipeline::preprocess::Organism;
use scprep_lib::pipeline::validation::{
    validate_input_h5ad, validate_nonzero, validate_output_h5ad, validate_positive,
};
use scprep_lib::utils;
use std::path::PathBuf;
use structopt::StructOpt;

/// Arguments for the `process` command.
#[derive(Debug, Clone, StructOpt)]
#[structopt(
    name = "process",
    about = "Normalize, score cell cycle and select batch-aware highly variable genes"
)]
pub struct ProcessArgs {
    /// Working directory; relative paths are resolved against it.
    #[structopt(
        long,
        parse(from_os_str),
        default_value = "/data/CARD_singlecell/harmony-rna/"
    )]
    pub working_dir: PathBuf,

    /// AnnData object for a dataset.
    #[structopt(long, parse(from_os_str))]
    pub adata_input: PathBuf,

    /// Output file to save the AnnData object to.
    #[structopt(long, parse(from_os_str))]
    pub adata_output: PathBuf,

    /// Number of highly variable genes to keep.
    #[structopt(long, default_value = "8000")]
    pub n_top_genes: usize,

    /// obs column separating batches for HVG selection.
    #[structopt(long, default_value = "sample")]
    pub batch_key: String,

    /// Gene symbols used for cell-cycle scoring: human or mouse.
    #[structopt(long, default_value = "human")]
    pub organism: Organism,

    /// Gene-rank CSV from `plot-qc`; genes are subset to those listed before processing.
    #[structopt(long, parse(from_os_str))]
    pub top_genes: Option<PathBuf>,

    /// Per-cell total after normalization.
    #[structopt(long, default_value = "10000")]
    pub target_sum: f64,

    /// Number of threads to use.
    #[structopt(short, long, default_value = "2")]
    pub threads: usize,

    /// Validate inputs without processing.
    #[structopt(long)]
    pub dry_run: bool,
}

/// Normalised settings consumed by [`super::run_process`].
#[derive(Debug, Clone)]
pub struct ProcessConfig {
    pub input: PathBuf,
    pub output: PathBuf,
    pub top_genes: Option<PathBuf>,
    pub n_top_genes: usize,
    pub batch_key: String,
    pub organism: Organism,
    pub target_sum: f64,
    pub threads: usize,
    pub dry_run: bool,
}

impl From<ProcessArgs> for ProcessConfig {
    fn from(args: ProcessArgs) -> Self {
        let base = args.working_dir;
        Self {
            input: utils::resolve_against(&base, &args.adata_input),
            output: utils::resolve_against(&base, &args.adata_output),
            top_genes: args
                .top_genes
                .map(|path| utils::resolve_against(&base, path)),
            n_top_genes: args.n_top_genes,
            batch_key: args.batch_key,
            organism: args.organism,
            target_sum: args.target_sum,
            threads: args.threads,
            dry_run: args.dry_run,
        }
    }
}

impl ProcessConfig {
    pub fn validate(&self) -> Result<()> {
        validate_nonzero("n_top_genes", self.n_top_genes)?;
        validate_positive("target_sum", self.target_sum)?;
        utils::determine_allowed_cpus(self.threads)?;
        info!("Configuration validation passed");

        validate_input_h5ad(&self.input)?;
        if let Some(path) = &self.top_genes {
            if !path.exists() {
                anyhow::bail!("Top genes file not found: {}", path.display());
            }
        }
        utils::make_parent_dirs(&self.output)?;
        if !self.dry_run {
            validate_output_h5ad(&self.output)?;
        }
        info!("File validation passed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(extra: &[&str]) -> ProcessConfig {
        let mut argv = vec![
            "process",
            "--working-dir",
            "/work",
            "--adata-input",
            "in.h5ad",
            "--adata-output",
            "/abs/out.h5ad",
        ];
        argv.extend_from_slice(extra);
        ProcessArgs::from_iter_safe(argv).unwrap().into()
    }

    #[test]
    fn relative_paths_resolve_against_working_dir() {
        let config = parse(&["--top-genes", "ranks.csv"]);
        assert_eq!(config.input, PathBuf::from("/work/in.h5ad"));
        assert_eq!(config.output, PathBuf::from("/abs/out.h5ad"));
        assert_eq!(config.top_genes, Some(PathBuf::from("/work/ranks.csv")));
        assert_eq!(config.n_top_genes, 8000);
        assert_eq!(config.batch_key, "sample");
        assert_eq!(config.organism, Organism::Human);
    }

    #[test]
    fn zero_top_genes_fails_validation() {
        let config = parse(&["--n-top-genes", "0"]);
        assert!(config.validate().is_err());
    }

    #[test]
    fn organism_is_parsed() {
        assert_eq!(parse(&["--organism", "mouse"]).organism, Organism::Mouse);
        assert!(ProcessArgs::from_iter_safe(vec![
            "process",
            "--adata-input",
            "a.h5ad",
            "--adata-output",
            "b.h5ad",
            "--organism",
            "yeast",
        ])
        .is_err());
    }
}
