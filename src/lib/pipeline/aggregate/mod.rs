//! Gene-rank aggregation across samples
//!
//! Each sample is normalized on a scratch copy, its highly-variable genes are
//! ranked by normalized dispersion, and the ranks are summed into a
//! [`GeneRankTable`]. The raw sample is then minified. Once every sample has
//! been seen, [`finalize`] concatenates the minified samples, exports the rank
//! table and renders QC violin plots grouped by sample.

pub mod concat;
pub mod gene_rank;
pub mod minify;
pub mod sample_name;

pub use concat::{concat_samples, SAMPLE_COLUMN};
pub use gene_rank::{
    rank_selected_genes, read_gene_list, GeneRank, GeneRankTable, RankOrder, RankedGenes,
};
pub use minify::{minify, MinifiedSample};
pub use sample_name::{DelimitedToken, SampleNamer};

use crate::core::error::{Result, ScprepError};
use crate::core::fs::{is_gzipped, make_parent_dirs};
use crate::core::io::get_raw_writer;
use crate::pipeline::anndata_ops::{numeric_column, write_anndata_h5ad, AnnDataContainer};
use crate::pipeline::plot::{render_violin_plot, PlotSettings};
use crate::pipeline::preprocess::{highly_variable_genes, log1p, normalize_total, HvgConfig};
use log::info;
use polars::prelude::*;
use rustc_hash::FxHashSet;
use std::io::Write;
use std::path::{Path, PathBuf};

/// Per-cell QC metrics plotted after concatenation.
pub const QC_METRICS: [&str; 5] = [
    "n_genes_by_counts",
    "total_counts",
    "pct_counts_mt",
    "pct_counts_rb",
    "doublet_score",
];

#[derive(Debug, Clone)]
pub struct AggregatorConfig {
    pub target_sum: f64,
    pub n_top_genes: usize,
    pub rank_order: RankOrder,
}

impl Default for AggregatorConfig {
    fn default() -> Self {
        Self {
            target_sum: 1e4,
            n_top_genes: 8000,
            rank_order: RankOrder::Ascending,
        }
    }
}

/// A processed sample awaiting concatenation.
#[derive(Debug, Clone)]
pub struct SampleOutcome {
    pub name: String,
    pub minified: MinifiedSample,
}

/// Everything accumulated over a run of samples.
#[derive(Debug, Clone)]
pub struct Aggregation {
    pub table: GeneRankTable,
    pub samples: Vec<SampleOutcome>,
}

pub struct GeneRankAggregator<N: SampleNamer> {
    namer: N,
    config: AggregatorConfig,
}

impl<N: SampleNamer> GeneRankAggregator<N> {
    pub fn new(namer: N, config: AggregatorConfig) -> Self {
        Self { namer, config }
    }

    /// Rank one sample's highly-variable genes into `table` and minify the raw data.
    pub fn process_sample(
        &self,
        table: GeneRankTable,
        path: &Path,
        raw: AnnDataContainer,
    ) -> Result<(GeneRankTable, SampleOutcome)> {
        let name = self.namer.sample_name(path)?;
        info!(
            "Processing sample '{}' ({} cells × {} genes)",
            name, raw.n_obs, raw.n_vars
        );

        let mut scratch = raw.clone();
        normalize_total(&mut scratch, self.config.target_sum)?;
        log1p(&mut scratch)?;
        let hvg_config = HvgConfig::seurat(self.config.n_top_genes);
        let hvg = highly_variable_genes(&mut scratch, &hvg_config)?;
        let ranks = rank_selected_genes(&scratch.var_names, &hvg, self.config.rank_order);
        info!("Sample '{}': ranked {} highly variable genes", name, ranks.len());
        drop(scratch);

        let table = table.fold(ranks);
        Ok((
            table,
            SampleOutcome {
                name,
                minified: minify(raw),
            },
        ))
    }

    /// Process every path in order, loading each with `load`.
    ///
    /// Sample names are checked for uniqueness before their data is read.
    pub fn run<L>(&self, paths: &[PathBuf], mut load: L) -> Result<Aggregation>
    where
        L: FnMut(&Path) -> Result<AnnDataContainer>,
    {
        if paths.is_empty() {
            return Err(ScprepError::InvalidInput(
                "No sample files were listed".to_string(),
            ));
        }

        let mut seen = FxHashSet::default();
        let mut table = GeneRankTable::new();
        let mut samples = Vec::with_capacity(paths.len());

        for (idx, path) in paths.iter().enumerate() {
            let name = self.namer.sample_name(path)?;
            if !seen.insert(name.clone()) {
                return Err(ScprepError::DuplicateSample(name));
            }

            info!("Sample {}/{}: {}", idx + 1, paths.len(), path.display());
            let raw = load(path)?;
            let (next, outcome) = self.process_sample(table, path, raw)?;
            table = next;
            samples.push(outcome);
        }

        info!(
            "Accumulated ranks for {} genes over {} samples",
            table.len(),
            samples.len()
        );
        Ok(Aggregation { table, samples })
    }
}

/// Output locations for [`finalize`].
#[derive(Debug, Clone)]
pub struct AggregateOutputs {
    pub top_genes: PathBuf,
    pub metadata: Option<PathBuf>,
    pub combined: Option<PathBuf>,
    pub metrics: Vec<String>,
    pub plot: PlotSettings,
    pub threads: usize,
}

/// Files written by [`finalize`].
#[derive(Debug, Clone)]
pub struct FinalizeReport {
    pub n_cells: usize,
    pub n_genes: usize,
    pub plots: Vec<PathBuf>,
}

/// Concatenate samples, export ranks and metadata, and plot QC metrics.
///
/// Every metric is checked against the combined obs before anything is plotted.
pub fn finalize(aggregation: Aggregation, outputs: &AggregateOutputs) -> Result<FinalizeReport> {
    let Aggregation { table, samples } = aggregation;
    let combined = concat_samples(
        samples
            .into_iter()
            .map(|outcome| (outcome.name, outcome.minified))
            .collect(),
    )?;

    ensure_metrics(&combined.obs, &outputs.metrics)?;

    table.finalize().write_csv(&outputs.top_genes, outputs.threads)?;

    if let Some(path) = &outputs.metadata {
        write_metadata(&combined, path, outputs.threads)?;
    }

    let groups_by_metric = outputs
        .metrics
        .iter()
        .map(|metric| metric_groups(&combined.obs, metric).map(|groups| (metric.as_str(), groups)))
        .collect::<Result<Vec<_>>>()?;

    let n_cells = combined.n_obs();
    let n_genes = combined.n_vars();
    if let Some(path) = &outputs.combined {
        write_anndata_h5ad(&combined.into_container(), path)?;
    }

    let mut plots = Vec::with_capacity(groups_by_metric.len());
    for (metric, groups) in groups_by_metric {
        plots.push(render_violin_plot(metric, &groups, &outputs.plot)?);
    }

    Ok(FinalizeReport {
        n_cells,
        n_genes,
        plots,
    })
}

/// Fail with [`ScprepError::MissingMetric`] on the first absent or non-numeric metric.
pub fn ensure_metrics(obs: &DataFrame, metrics: &[String]) -> Result<()> {
    for metric in metrics {
        numeric_column(obs, metric)?;
    }
    Ok(())
}

/// Metric values split by sample, in order of first appearance.
fn metric_groups(obs: &DataFrame, metric: &str) -> Result<Vec<(String, Vec<f64>)>> {
    let values = numeric_column(obs, metric)?;
    let labels = obs
        .column(SAMPLE_COLUMN)
        .map_err(|_| ScprepError::MissingMetric(SAMPLE_COLUMN.to_string()))?
        .cast(&DataType::String)?;

    let mut groups: Vec<(String, Vec<f64>)> = Vec::new();
    for (label, value) in labels.str()?.into_iter().zip(values) {
        let label = label.unwrap_or("");
        match groups.iter_mut().find(|(name, _)| name == label) {
            Some((_, bucket)) => bucket.push(value),
            None => groups.push((label.to_string(), vec![value])),
        }
    }
    Ok(groups)
}

/// Write obs with a leading `cell_id` column as CSV.
fn write_metadata(combined: &MinifiedSample, path: &Path, threads: usize) -> Result<()> {
    let output_err = |e: anyhow::Error| ScprepError::Output {
        path: path.display().to_string(),
        reason: format!("{:#}", e),
    };
    make_parent_dirs(path).map_err(output_err)?;

    let mut frame = combined.obs.clone();
    frame.insert_column(
        0,
        Series::new("cell_id".into(), combined.obs_names.clone()),
    )?;

    let mut writer =
        get_raw_writer(&Some(path), is_gzipped(path), threads, 6).map_err(output_err)?;
    CsvWriter::new(&mut writer)
        .include_header(true)
        .finish(&mut frame)?;
    writer.flush()?;

    info!(
        "Wrote metadata for {} cells to {}",
        frame.height(),
        path.display()
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::anndata_ops::test_support::dense_container;
    use crate::pipeline::plot::PlotFormat;
    use std::collections::HashMap;

    /// Ten cells over six genes with enough spread for every gene to vary.
    fn sample_container(seed: f64) -> AnnDataContainer {
        let rows: Vec<Vec<f64>> = (0..10)
            .map(|i| {
                let i = i as f64;
                vec![
                    1.0 + i,
                    ((i + seed) % 3.0) * 4.0 + 1.0,
                    5.0,
                    (i * seed) % 7.0 + 1.0,
                    20.0 - i,
                    ((i + 2.0 * seed) % 5.0) + 2.0,
                ]
            })
            .collect();
        let mut adata = dense_container(&rows, &["G1", "G2", "G3", "G4", "G5", "G6"]);
        for (k, metric) in QC_METRICS.iter().enumerate() {
            adata
                .set_obs_column(Series::new(
                    (*metric).into(),
                    (0..10).map(|i| (i * (k + 1)) as f64).collect::<Vec<f64>>(),
                ))
                .unwrap();
        }
        adata
    }

    fn metrics() -> Vec<String> {
        QC_METRICS.iter().map(|m| m.to_string()).collect()
    }

    #[test]
    fn process_sample_folds_ranks_and_minifies() {
        let aggregator = GeneRankAggregator::new(
            DelimitedToken::default(),
            AggregatorConfig {
                n_top_genes: 3,
                ..AggregatorConfig::default()
            },
        );
        let (table, outcome) = aggregator
            .process_sample(
                GeneRankTable::new(),
                Path::new("/data/cohort_S1_rna.h5ad"),
                sample_container(1.0),
            )
            .unwrap();

        assert_eq!(outcome.name, "S1");
        assert_eq!(outcome.minified.n_obs(), 10);
        assert!(!table.is_empty());
        let ranks: Vec<f64> = table.clone().finalize().rows().iter().map(|r| r.rank).collect();
        let mut sorted = ranks.clone();
        sorted.sort_by(|a, b| a.partial_cmp(b).unwrap());
        assert_eq!(sorted[0], 0.0);
        assert_eq!(sorted, (0..ranks.len()).map(|r| r as f64).collect::<Vec<_>>());
    }

    #[test]
    fn run_rejects_duplicate_names_before_loading() {
        let aggregator = GeneRankAggregator::new(DelimitedToken::default(), AggregatorConfig::default());
        let paths = vec![
            PathBuf::from("a_S1_x.h5ad"),
            PathBuf::from("b_S1_y.h5ad"),
        ];
        let mut loads = 0;
        let err = aggregator.run(&paths, |_| {
            loads += 1;
            Ok(sample_container(1.0))
        });
        assert!(matches!(err, Err(ScprepError::DuplicateSample(name)) if name == "S1"));
        assert_eq!(loads, 1);
    }

    #[test]
    fn finalize_checks_metrics_before_writing() {
        let dir = tempfile::tempdir().unwrap();
        let aggregator = GeneRankAggregator::new(DelimitedToken::default(), AggregatorConfig::default());
        let paths = vec![PathBuf::from("p_S1_x.h5ad")];
        let mut aggregation = aggregator.run(&paths, |_| Ok(sample_container(1.0))).unwrap();
        aggregation.samples[0]
            .minified
            .obs
            .drop_in_place("doublet_score")
            .unwrap();

        let outputs = AggregateOutputs {
            top_genes: dir.path().join("top_genes.csv"),
            metadata: None,
            combined: None,
            metrics: metrics(),
            plot: PlotSettings {
                figdir: dir.path().join("plots"),
                format: PlotFormat::Svg,
                ..PlotSettings::default()
            },
            threads: 1,
        };
        let err = finalize(aggregation, &outputs);
        assert!(matches!(err, Err(ScprepError::MissingMetric(m)) if m == "doublet_score"));
        assert!(!dir.path().join("plots").exists());
        assert!(!dir.path().join("top_genes.csv").exists());
    }

    #[test]
    fn finalize_writes_ranks_metadata_and_one_plot_per_metric() {
        let dir = tempfile::tempdir().unwrap();
        let config = AggregatorConfig {
            n_top_genes: 3,
            ..AggregatorConfig::default()
        };
        let paths = vec![PathBuf::from("p_S1_x.h5ad"), PathBuf::from("p_S2_x.h5ad")];
        let seeds = [1.0, 2.0];

        let aggregator = GeneRankAggregator::new(DelimitedToken::default(), config.clone());
        let aggregation = aggregator
            .run(&paths, |path| {
                let idx = paths.iter().position(|p| p == path).unwrap();
                Ok(sample_container(seeds[idx]))
            })
            .unwrap();

        // the same two samples folded by hand
        let replay = GeneRankAggregator::new(DelimitedToken::default(), config);
        let mut expected = GeneRankTable::new();
        for (path, seed) in paths.iter().zip(seeds) {
            let (next, _) = replay
                .process_sample(expected, path, sample_container(seed))
                .unwrap();
            expected = next;
        }
        let expected = expected.finalize();

        let outputs = AggregateOutputs {
            top_genes: dir.path().join("top_genes.csv"),
            metadata: Some(dir.path().join("metadata.csv")),
            combined: None,
            metrics: metrics(),
            plot: PlotSettings {
                figdir: dir.path().join("plots"),
                format: PlotFormat::Svg,
                dpi: 72,
                ..PlotSettings::default()
            },
            threads: 1,
        };
        let report = finalize(aggregation, &outputs).unwrap();

        assert_eq!(report.n_cells, 20);
        assert_eq!(report.n_genes, 6);
        assert_eq!(report.plots.len(), QC_METRICS.len());
        for metric in QC_METRICS {
            let plot = dir.path().join("plots").join(format!("violin_{}.svg", metric));
            assert!(plot.is_file(), "missing {}", plot.display());
            assert!(report.plots.contains(&plot));
        }

        let text = std::fs::read_to_string(&outputs.top_genes).unwrap();
        assert!(text.starts_with("gene,rank\n"));
        let mut reader = csv::Reader::from_reader(text.as_bytes());
        let written: Vec<GeneRank> = reader.deserialize().map(|row| row.unwrap()).collect();
        assert_eq!(written.as_slice(), expected.rows());
        assert!(!written.is_empty());

        let metadata = std::fs::read_to_string(dir.path().join("metadata.csv")).unwrap();
        assert_eq!(metadata.lines().count(), 21);
    }

    #[test]
    fn metadata_lists_every_cell() {
        let dir = tempfile::tempdir().unwrap();
        let aggregator = GeneRankAggregator::new(DelimitedToken::default(), AggregatorConfig::default());
        let paths = vec![PathBuf::from("p_S1_x.h5ad"), PathBuf::from("p_S2_x.h5ad")];
        let mut seeds: HashMap<PathBuf, f64> = HashMap::new();
        seeds.insert(paths[0].clone(), 1.0);
        seeds.insert(paths[1].clone(), 2.0);
        let aggregation = aggregator
            .run(&paths, |path| Ok(sample_container(seeds[path])))
            .unwrap();

        let combined = concat_samples(
            aggregation
                .samples
                .into_iter()
                .map(|s| (s.name, s.minified))
                .collect(),
        )
        .unwrap();
        let path = dir.path().join("meta/obs.csv");
        write_metadata(&combined, &path, 1).unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        let mut lines = text.lines();
        assert!(lines.next().unwrap().starts_with("cell_id,"));
        assert_eq!(lines.count(), 20);
        assert!(text.contains("c0_S2"));

        let groups = metric_groups(&combined.obs, "total_counts").unwrap();
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].0, "S1");
        assert_eq!(groups[1].1.len(), 10);
    }
}
