//! Cell filtering on per-cell QC metrics

use crate::core::error::{Result, ScprepError};
use crate::pipeline::anndata_ops::AnnDataContainer;
use log::{info, warn};
use rustc_hash::FxHashSet;

/// Keep cells whose `column` value satisfies `predicate`. Returns the number kept.
pub fn filter_obs<F>(adata: &mut AnnDataContainer, column: &str, predicate: F) -> Result<usize>
where
    F: Fn(f64) -> bool,
{
    let values = adata.obs_numeric(column)?;
    let keep: Vec<usize> = values
        .iter()
        .enumerate()
        .filter_map(|(idx, &v)| predicate(v).then_some(idx))
        .collect();

    let before = adata.n_obs;
    adata.subset_obs(&keep)?;
    info!(
        "Filter on '{}': kept {} of {} cells",
        column, adata.n_obs, before
    );
    Ok(adata.n_obs)
}

/// Keep only the listed genes, in dataset order. Unknown names are skipped.
pub fn filter_genes(adata: &mut AnnDataContainer, genes: &[String]) -> Result<usize> {
    let wanted: FxHashSet<&str> = genes.iter().map(String::as_str).collect();
    let keep: Vec<usize> = adata
        .var_names
        .iter()
        .enumerate()
        .filter_map(|(idx, name)| wanted.contains(name.as_str()).then_some(idx))
        .collect();

    if keep.is_empty() {
        return Err(ScprepError::EmptyData(
            "None of the listed genes are present in the dataset".to_string(),
        ));
    }
    if keep.len() < wanted.len() {
        warn!(
            "{} listed genes are absent from the dataset",
            wanted.len() - keep.len()
        );
    }

    let before = adata.n_vars;
    adata.subset_vars(&keep)?;
    info!("Gene subset: kept {} of {} genes", adata.n_vars, before);
    Ok(adata.n_vars)
}

/// Cutoffs applied by the `filter` command.
#[derive(Debug, Clone, PartialEq)]
pub struct QcThresholds {
    pub max_pct_mt: f64,
    /// Cells must score strictly below this.
    pub max_doublet_score: f64,
    pub min_total_counts: f64,
    pub max_total_counts: f64,
    pub min_genes: f64,
    pub max_genes: f64,
}

impl Default for QcThresholds {
    fn default() -> Self {
        Self {
            max_pct_mt: 10.0,
            max_doublet_score: 0.2,
            min_total_counts: 500.0,
            max_total_counts: 100_000.0,
            min_genes: 300.0,
            max_genes: 10_000.0,
        }
    }
}

impl QcThresholds {
    pub fn validate(&self) -> Result<()> {
        let fields = [
            ("max_pct_mt", self.max_pct_mt),
            ("max_doublet_score", self.max_doublet_score),
            ("min_total_counts", self.min_total_counts),
            ("max_total_counts", self.max_total_counts),
            ("min_genes", self.min_genes),
            ("max_genes", self.max_genes),
        ];
        for (name, value) in fields {
            if !value.is_finite() {
                return Err(ScprepError::InvalidInput(format!(
                    "{} must be a finite number",
                    name
                )));
            }
        }

        if self.min_total_counts > self.max_total_counts {
            return Err(ScprepError::ThresholdValidation {
                field: "min_total_counts".to_string(),
                min: 0.0,
                max: self.max_total_counts,
                value: self.min_total_counts,
            });
        }
        if self.min_genes > self.max_genes {
            return Err(ScprepError::ThresholdValidation {
                field: "min_genes".to_string(),
                min: 0.0,
                max: self.max_genes,
                value: self.min_genes,
            });
        }
        Ok(())
    }
}

/// Apply mitochondrial, doublet, library-size and gene-count filters in that order.
pub fn apply_qc_filters(adata: &mut AnnDataContainer, thresholds: &QcThresholds) -> Result<()> {
    let t = thresholds;
    filter_obs(adata, "pct_counts_mt", |v| v <= t.max_pct_mt)?;
    filter_obs(adata, "doublet_score", |v| v < t.max_doublet_score)?;
    filter_obs(adata, "total_counts", |v| {
        v >= t.min_total_counts && v <= t.max_total_counts
    })?;
    let kept = filter_obs(adata, "n_genes_by_counts", |v| {
        v >= t.min_genes && v <= t.max_genes
    })?;

    if kept == 0 {
        return Err(ScprepError::EmptyData(
            "All cells were removed by QC filtering".to_string(),
        ));
    }
    Ok(())
}
