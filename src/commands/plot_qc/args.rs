use anyhow::Result;
use log::info;
use scprep_lib::pipeline::aggregate::{AggregatorConfig, DelimitedToken, RankOrder, QC_METRICS};
use scprep_lib::pipeline::plot::{PlotFormat, PlotSettings};
use scprep_lib::pipeline::validation::{validate_nonzero, validate_output_h5ad, validate_positive};
use scprep_lib::utils;
use std::path::PathBuf;
use structopt::StructOpt;

const DEFAULT_PROJECT: &str = "scprep";

/// Arguments for the `plot-qc` command.
#[derive(Debug, Clone, StructOpt)]
#[structopt(
    name = "plot-qc",
    about = "Rank highly variable genes across samples and plot QC metrics per sample"
)]
pub struct PlotQcArgs {
    /// Working directory; relative paths are resolved against it.
    #[structopt(
        long,
        parse(from_os_str),
        default_value = "/data/CARD_singlecell/harmony-rna/"
    )]
    pub working_dir: PathBuf,

    /// Directory containing workflow scripts (recorded in the log only).
    #[structopt(long, parse(from_os_str), default_value = "scripts")]
    pub script_dir: PathBuf,

    /// Number of threads to use.
    #[structopt(short, long, default_value = "2")]
    pub threads: usize,

    /// Newline-delimited paths to the per-sample .h5ad files (file-of-filenames).
    #[structopt(long, alias = "seurat-objects-fofn", parse(from_os_str))]
    pub adata_objects_fofn: PathBuf,

    /// Project name, used to name the default gene-rank output.
    #[structopt(long)]
    pub project_name: Option<String>,

    /// Write the combined per-cell metadata to this CSV.
    #[structopt(long, parse(from_os_str))]
    pub output_metadata_file: Option<PathBuf>,

    /// Gene-rank CSV output (default: <project>_top_genes.csv).
    #[structopt(long, parse(from_os_str))]
    pub output_top_genes: Option<PathBuf>,

    /// Write the concatenated, minified samples to this .h5ad.
    #[structopt(long, parse(from_os_str))]
    pub combined_output: Option<PathBuf>,

    /// Directory for violin plots.
    #[structopt(long, parse(from_os_str), default_value = "plots/")]
    pub figdir: PathBuf,

    /// Figure format: png or svg.
    #[structopt(long, default_value = "png")]
    pub plot_format: PlotFormat,

    /// Raster resolution of saved figures.
    #[structopt(long, default_value = "300")]
    pub dpi: u32,

    /// Highly variable genes selected per sample.
    #[structopt(long, default_value = "8000")]
    pub n_top_genes: usize,

    /// Per-cell total after normalization.
    #[structopt(long, default_value = "10000")]
    pub target_sum: f64,

    /// Rank direction by normalized dispersion: ascending or descending.
    #[structopt(long, default_value = "ascending")]
    pub rank_order: RankOrder,

    /// Delimiter splitting file names into sample-name tokens.
    #[structopt(long, default_value = "_")]
    pub sample_delimiter: String,

    /// Zero-based token holding the sample name.
    #[structopt(long, default_value = "1")]
    pub sample_token_index: usize,
}

/// Normalised settings consumed by [`super::run_plot_qc`].
#[derive(Debug, Clone)]
pub struct PlotQcConfig {
    pub working_dir: PathBuf,
    pub script_dir: PathBuf,
    pub fofn: PathBuf,
    pub top_genes: PathBuf,
    pub metadata: Option<PathBuf>,
    pub combined: Option<PathBuf>,
    pub plot: PlotSettings,
    pub aggregator: AggregatorConfig,
    pub sample_delimiter: String,
    pub sample_token_index: usize,
    pub metrics: Vec<String>,
    pub threads: usize,
}

impl From<PlotQcArgs> for PlotQcConfig {
    fn from(args: PlotQcArgs) -> Self {
        let base = args.working_dir;
        let resolve = |path: PathBuf| utils::resolve_against(&base, path);

        let project = args
            .project_name
            .unwrap_or_else(|| DEFAULT_PROJECT.to_string());
        let top_genes = args
            .output_top_genes
            .unwrap_or_else(|| PathBuf::from(format!("{}_top_genes.csv", project)));

        Self {
            fofn: resolve(args.adata_objects_fofn),
            top_genes: resolve(top_genes),
            metadata: args.output_metadata_file.map(resolve),
            combined: args.combined_output.map(resolve),
            plot: PlotSettings {
                figdir: resolve(args.figdir),
                format: args.plot_format,
                dpi: args.dpi,
                ..PlotSettings::default()
            },
            aggregator: AggregatorConfig {
                target_sum: args.target_sum,
                n_top_genes: args.n_top_genes,
                rank_order: args.rank_order,
            },
            sample_delimiter: args.sample_delimiter,
            sample_token_index: args.sample_token_index,
            metrics: QC_METRICS.iter().map(|m| m.to_string()).collect(),
            threads: args.threads,
            script_dir: args.script_dir,
            working_dir: base,
        }
    }
}

impl PlotQcConfig {
    pub fn validate(&self) -> Result<()> {
        validate_nonzero("n_top_genes", self.aggregator.n_top_genes)?;
        validate_positive("target_sum", self.aggregator.target_sum)?;
        validate_nonzero("dpi", self.plot.dpi as usize)?;
        utils::determine_allowed_cpus(self.threads)?;
        self.namer()?;
        info!("Configuration validation passed");

        if !self.fofn.exists() {
            anyhow::bail!("File-of-filenames not found: {}", self.fofn.display());
        }
        if let Some(path) = &self.combined {
            validate_output_h5ad(path)?;
        }
        info!("File validation passed");
        Ok(())
    }

    pub fn namer(&self) -> Result<DelimitedToken> {
        Ok(DelimitedToken::new(
            self.sample_delimiter.clone(),
            self.sample_token_index,
        )?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(extra: &[&str]) -> PlotQcConfig {
        let mut argv = vec![
            "plot-qc",
            "--working-dir",
            "/work",
            "--adata-objects-fofn",
            "samples.fofn",
        ];
        argv.extend_from_slice(extra);
        PlotQcArgs::from_iter_safe(argv).unwrap().into()
    }

    #[test]
    fn defaults_resolve_against_working_dir() {
        let config = parse(&["--project-name", "cohort"]);
        assert_eq!(config.fofn, PathBuf::from("/work/samples.fofn"));
        assert_eq!(config.top_genes, PathBuf::from("/work/cohort_top_genes.csv"));
        assert_eq!(config.plot.figdir, PathBuf::from("/work/plots/"));
        assert_eq!(config.plot.format, PlotFormat::Png);
        assert_eq!(config.plot.dpi, 300);
        assert_eq!(config.aggregator.n_top_genes, 8000);
        assert_eq!(config.aggregator.rank_order, RankOrder::Ascending);
        assert_eq!(config.metrics.len(), 5);
        assert!(config.metadata.is_none());
    }

    #[test]
    fn explicit_outputs_and_options() {
        let config = parse(&[
            "--output-top-genes",
            "/out/ranks.csv.gz",
            "--output-metadata-file",
            "meta.csv",
            "--rank-order",
            "descending",
            "--plot-format",
            "svg",
        ]);
        assert_eq!(config.top_genes, PathBuf::from("/out/ranks.csv.gz"));
        assert_eq!(config.metadata, Some(PathBuf::from("/work/meta.csv")));
        assert_eq!(config.aggregator.rank_order, RankOrder::Descending);
        assert_eq!(config.plot.format, PlotFormat::Svg);
    }

    #[test]
    fn legacy_fofn_flag_is_accepted() {
        let args = PlotQcArgs::from_iter_safe(vec!["plot-qc", "--seurat-objects-fofn", "x.fofn"])
            .unwrap();
        assert_eq!(args.adata_objects_fofn, PathBuf::from("x.fofn"));
    }

    #[test]
    fn empty_delimiter_fails_validation() {
        let config = parse(&["--sample-delimiter", ""]);
        assert!(config.namer().is_err());
    }
}
