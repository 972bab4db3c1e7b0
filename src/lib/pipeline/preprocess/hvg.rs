//! Highly-variable gene selection
//!
//! Two flavors are provided, both writing scanpy-compatible `var` columns:
//!
//! - [`HvgFlavor::Seurat`] works on log-normalized data. Dispersions are
//!   normalized within equal-width bins of mean expression.
//! - [`HvgFlavor::SeuratV3`] works on raw counts. Each gene's variance is
//!   standardized against a local mean-variance trend, optionally per batch.

use crate::core::error::{Result, ScprepError};
use crate::core::sparse::SparseOps;
use crate::pipeline::anndata_ops::AnnDataContainer;
use log::{debug, info};
use nalgebra_sparse::CsrMatrix;
use polars::prelude::*;
use rayon::prelude::*;
use std::cmp::Ordering;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HvgFlavor {
    Seurat,
    SeuratV3,
}

#[derive(Debug, Clone)]
pub struct HvgConfig {
    pub flavor: HvgFlavor,
    pub n_top_genes: usize,
    /// Mean-expression bins for [`HvgFlavor::Seurat`].
    pub n_bins: usize,
    /// Fraction of genes in each local trend window for [`HvgFlavor::SeuratV3`].
    pub span: f64,
    /// Read counts from this layer instead of `X`.
    pub layer: Option<String>,
    /// obs column splitting cells into batches.
    pub batch_key: Option<String>,
    /// Drop genes that were not selected.
    pub subset: bool,
}

impl Default for HvgConfig {
    fn default() -> Self {
        Self {
            flavor: HvgFlavor::Seurat,
            n_top_genes: 8000,
            n_bins: 20,
            span: 0.3,
            layer: None,
            batch_key: None,
            subset: false,
        }
    }
}

impl HvgConfig {
    pub fn seurat(n_top_genes: usize) -> Self {
        Self {
            n_top_genes,
            ..Self::default()
        }
    }

    pub fn seurat_v3(n_top_genes: usize, layer: &str, batch_key: Option<&str>) -> Self {
        Self {
            flavor: HvgFlavor::SeuratV3,
            n_top_genes,
            layer: Some(layer.to_string()),
            batch_key: batch_key.map(str::to_string),
            ..Self::default()
        }
    }
}

/// Flavor-specific per-gene statistics.
#[derive(Debug, Clone)]
pub enum HvgStats {
    Dispersion {
        /// Log dispersion.
        dispersions: Vec<f64>,
        dispersions_norm: Vec<f64>,
    },
    Variance {
        variances: Vec<f64>,
        variances_norm: Vec<f64>,
        /// Median within-batch rank; NaN when no batch selected the gene.
        highly_variable_rank: Vec<f64>,
        highly_variable_nbatches: Vec<u32>,
    },
}

/// Outcome of a selection, indexed by gene position before any subsetting.
#[derive(Debug, Clone)]
pub struct HvgResult {
    pub means: Vec<f64>,
    pub stats: HvgStats,
    pub highly_variable: Vec<bool>,
}

impl HvgResult {
    /// Indices of selected genes, ascending.
    pub fn selected(&self) -> Vec<usize> {
        self.highly_variable
            .iter()
            .enumerate()
            .filter_map(|(idx, &hv)| hv.then_some(idx))
            .collect()
    }

    /// The normalized score the selection was made on.
    pub fn normalized_scores(&self) -> &[f64] {
        match &self.stats {
            HvgStats::Dispersion {
                dispersions_norm, ..
            } => dispersions_norm,
            HvgStats::Variance { variances_norm, .. } => variances_norm,
        }
    }

    fn var_columns(&self) -> Vec<Series> {
        let mut columns = vec![
            Series::new("highly_variable".into(), self.highly_variable.clone()),
            Series::new("means".into(), self.means.clone()),
        ];
        match &self.stats {
            HvgStats::Dispersion {
                dispersions,
                dispersions_norm,
            } => {
                columns.push(Series::new("dispersions".into(), dispersions.clone()));
                columns.push(Series::new(
                    "dispersions_norm".into(),
                    dispersions_norm.clone(),
                ));
            }
            HvgStats::Variance {
                variances,
                variances_norm,
                highly_variable_rank,
                highly_variable_nbatches,
            } => {
                columns.push(Series::new("variances".into(), variances.clone()));
                columns.push(Series::new("variances_norm".into(), variances_norm.clone()));
                columns.push(Series::new(
                    "highly_variable_rank".into(),
                    highly_variable_rank.clone(),
                ));
                columns.push(Series::new(
                    "highly_variable_nbatches".into(),
                    highly_variable_nbatches.clone(),
                ));
            }
        }
        columns
    }
}

/// Select highly-variable genes, annotate `var`, and optionally subset.
pub fn highly_variable_genes(
    adata: &mut AnnDataContainer,
    config: &HvgConfig,
) -> Result<HvgResult> {
    if adata.n_obs < 2 {
        return Err(ScprepError::InvalidInput(
            "Highly-variable gene selection needs at least 2 cells".to_string(),
        ));
    }
    if config.n_top_genes == 0 {
        return Err(ScprepError::InvalidInput(
            "n_top_genes must be greater than 0".to_string(),
        ));
    }

    let result = {
        let layer_matrix;
        let matrix: &CsrMatrix<f64> = match &config.layer {
            Some(name) => {
                let layer = adata.layers.get(name).ok_or_else(|| {
                    ScprepError::InvalidInput(format!("Layer '{}' not found", name))
                })?;
                layer_matrix = SparseOps::from_counts(layer)?;
                &layer_matrix
            }
            None => adata.x_required("highly-variable gene selection")?,
        };

        match config.flavor {
            HvgFlavor::Seurat => seurat(matrix, config),
            HvgFlavor::SeuratV3 => {
                let batches = match &config.batch_key {
                    Some(key) => group_by_label(&adata.obs_strings(key)?),
                    None => vec![(0..adata.n_obs).collect()],
                };
                seurat_v3(matrix, &batches, config)?
            }
        }
    };

    for column in result.var_columns() {
        adata.set_var_column(column)?;
    }

    let selected = result.selected();
    info!(
        "Selected {} highly variable genes out of {} ({:?})",
        selected.len(),
        adata.n_vars,
        config.flavor
    );

    if config.subset {
        adata.subset_vars(&selected)?;
    }

    Ok(result)
}

fn seurat(matrix: &CsrMatrix<f64>, config: &HvgConfig) -> HvgResult {
    let moments = SparseOps::column_moments(matrix, None, f64::exp_m1);

    let (means, dispersions): (Vec<f64>, Vec<f64>) = moments
        .means
        .iter()
        .zip(&moments.variances)
        .map(|(&mean, &variance)| {
            let mean = if mean == 0.0 { 1e-12 } else { mean };
            let dispersion = variance / mean;
            let log_dispersion = if dispersion == 0.0 || !dispersion.is_finite() {
                f64::NAN
            } else {
                dispersion.ln()
            };
            (mean.ln_1p(), log_dispersion)
        })
        .unzip();

    let dispersions_norm = normalize_in_mean_bins(&means, &dispersions, config.n_bins);
    let highly_variable = top_by_cutoff(&dispersions_norm, config.n_top_genes);

    HvgResult {
        means,
        stats: HvgStats::Dispersion {
            dispersions,
            dispersions_norm,
        },
        highly_variable,
    }
}

/// Z-score each dispersion against the genes sharing its mean bin.
///
/// Bins are equal-width and right-closed over the observed mean range. A bin
/// holding one gene normalizes that gene to 1.
fn normalize_in_mean_bins(means: &[f64], dispersions: &[f64], n_bins: usize) -> Vec<f64> {
    let n_bins = n_bins.max(1);
    let lo = means.iter().cloned().fold(f64::INFINITY, f64::min);
    let hi = means.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
    let width = (hi - lo) / n_bins as f64;

    let bins: Vec<usize> = means
        .iter()
        .map(|&m| {
            if width <= 0.0 || !width.is_finite() {
                0
            } else {
                let pos = ((m - lo) / width).ceil() as isize - 1;
                pos.clamp(0, n_bins as isize - 1) as usize
            }
        })
        .collect();

    let mut members: Vec<Vec<f64>> = vec![Vec::new(); n_bins];
    for (&bin, &d) in bins.iter().zip(dispersions) {
        if !d.is_nan() {
            members[bin].push(d);
        }
    }

    let bin_stats: Vec<(f64, f64)> = members
        .iter()
        .map(|values| match values.len() {
            0 => (f64::NAN, f64::NAN),
            1 => (0.0, values[0]),
            n => {
                let mean = values.iter().sum::<f64>() / n as f64;
                let var =
                    values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (n as f64 - 1.0);
                (mean, var.sqrt())
            }
        })
        .collect();

    bins.iter()
        .zip(dispersions)
        .map(|(&bin, &d)| {
            let (mean, std) = bin_stats[bin];
            (d - mean) / std
        })
        .collect()
}

/// Flag every gene whose score reaches the `n_top`-th highest score.
fn top_by_cutoff(scores: &[f64], n_top: usize) -> Vec<bool> {
    let mut finite: Vec<f64> = scores.iter().cloned().filter(|s| !s.is_nan()).collect();
    if finite.is_empty() {
        return vec![false; scores.len()];
    }
    finite.sort_by(|a, b| b.partial_cmp(a).unwrap_or(Ordering::Equal));
    let cutoff = finite[n_top.min(finite.len()) - 1];
    scores.iter().map(|&s| !s.is_nan() && s >= cutoff).collect()
}

fn group_by_label(labels: &[String]) -> Vec<Vec<usize>> {
    let mut order: Vec<&str> = Vec::new();
    let mut groups: Vec<Vec<usize>> = Vec::new();
    for (idx, label) in labels.iter().enumerate() {
        match order.iter().position(|l| *l == label.as_str()) {
            Some(pos) => groups[pos].push(idx),
            None => {
                order.push(label);
                groups.push(vec![idx]);
            }
        }
    }
    debug!("Found {} batches", groups.len());
    groups
}

fn seurat_v3(
    counts: &CsrMatrix<f64>,
    batches: &[Vec<usize>],
    config: &HvgConfig,
) -> Result<HvgResult> {
    let n_vars = counts.ncols();
    let mut norm_gene_vars: Vec<Vec<f64>> = Vec::with_capacity(batches.len());

    for rows in batches {
        if rows.len() < 2 {
            return Err(ScprepError::InvalidInput(format!(
                "Every batch needs at least 2 cells, found a batch with {}",
                rows.len()
            )));
        }
        norm_gene_vars.push(standardized_variances(counts, rows, config.span));
    }

    let (highly_variable_rank, highly_variable_nbatches) =
        merge_batch_ranks(&norm_gene_vars, config.n_top_genes);

    let variances_norm: Vec<f64> = (0..n_vars)
        .map(|g| norm_gene_vars.iter().map(|b| b[g]).sum::<f64>() / norm_gene_vars.len() as f64)
        .collect();

    let mut order: Vec<usize> = (0..n_vars).collect();
    order.sort_by(|&a, &b| {
        highly_variable_nbatches[b]
            .cmp(&highly_variable_nbatches[a])
            .then_with(|| nan_last(highly_variable_rank[a], highly_variable_rank[b]))
    });
    let mut highly_variable = vec![false; n_vars];
    for &g in order.iter().take(config.n_top_genes) {
        highly_variable[g] = true;
    }

    let moments = SparseOps::column_moments(counts, None, |v| v);

    Ok(HvgResult {
        means: moments.means,
        stats: HvgStats::Variance {
            variances: moments.variances,
            variances_norm,
            highly_variable_rank,
            highly_variable_nbatches,
        },
        highly_variable,
    })
}

/// Variance of clipped counts relative to the fitted mean-variance trend.
fn standardized_variances(counts: &CsrMatrix<f64>, rows: &[usize], span: f64) -> Vec<f64> {
    let n_vars = counts.ncols();
    let n = rows.len() as f64;
    let moments = SparseOps::column_moments(counts, Some(rows), |v| v);

    let varying: Vec<usize> = (0..n_vars)
        .filter(|&g| moments.variances[g] > 0.0)
        .collect();
    let log_means: Vec<f64> = varying.iter().map(|&g| moments.means[g].log10()).collect();
    let log_vars: Vec<f64> = varying
        .iter()
        .map(|&g| moments.variances[g].log10())
        .collect();
    let fitted = loess_fit(&log_means, &log_vars, span);

    let mut reg_std = vec![1.0; n_vars];
    for (&g, &fit) in varying.iter().zip(&fitted) {
        reg_std[g] = 10f64.powf(fit).sqrt();
    }

    let clip: Vec<f64> = (0..n_vars)
        .map(|g| reg_std[g] * n.sqrt() + moments.means[g])
        .collect();
    let (sums, sq_sums) = SparseOps::column_power_sums(counts, rows, |g, v| v.min(clip[g]));

    (0..n_vars)
        .map(|g| {
            let mean = moments.means[g];
            let numerator = n * mean * mean + sq_sums[g] - 2.0 * sums[g] * mean;
            numerator / ((n - 1.0) * reg_std[g] * reg_std[g])
        })
        .collect()
}

/// Combine per-batch scores into a median rank and a count of selecting batches.
///
/// Within a batch, rank 0 is the highest score. Only ranks below `n_top`
/// contribute to the median.
fn merge_batch_ranks(batch_scores: &[Vec<f64>], n_top: usize) -> (Vec<f64>, Vec<u32>) {
    let n_vars = batch_scores.first().map(Vec::len).unwrap_or(0);
    let mut kept_ranks: Vec<Vec<f64>> = vec![Vec::new(); n_vars];

    for scores in batch_scores {
        let mut order: Vec<usize> = (0..n_vars).collect();
        order.sort_by(|&a, &b| nan_last(-scores[a], -scores[b]));
        for (rank, &g) in order.iter().enumerate().take(n_top) {
            kept_ranks[g].push(rank as f64);
        }
    }

    kept_ranks
        .into_iter()
        .map(|mut ranks| {
            let nbatches = ranks.len() as u32;
            (median(&mut ranks), nbatches)
        })
        .unzip()
}

fn median(values: &mut [f64]) -> f64 {
    if values.is_empty() {
        return f64::NAN;
    }
    values.sort_by(|a, b| a.partial_cmp(b).unwrap_or(Ordering::Equal));
    let n = values.len();
    if n % 2 == 0 {
        (values[n / 2 - 1] + values[n / 2]) / 2.0
    } else {
        values[n / 2]
    }
}

fn nan_last(a: f64, b: f64) -> Ordering {
    match (a.is_nan(), b.is_nan()) {
        (true, true) => Ordering::Equal,
        (true, false) => Ordering::Greater,
        (false, true) => Ordering::Less,
        (false, false) => a.partial_cmp(&b).unwrap_or(Ordering::Equal),
    }
}

/// Degree-2 loess of `y` on `x`, evaluated at each `x`.
///
/// Each point is fitted from its `ceil(span * n)` nearest neighbours along `x`,
/// tricube-weighted by distance. Windows too degenerate for a parabola fall
/// back to a weighted line, then to a weighted mean.
pub(crate) fn loess_fit(x: &[f64], y: &[f64], span: f64) -> Vec<f64> {
    let n = x.len();
    if n == 0 {
        return Vec::new();
    }
    if n < 3 {
        let mean = y.iter().sum::<f64>() / n as f64;
        return vec![mean; n];
    }

    let mut order: Vec<usize> = (0..n).collect();
    order.sort_by(|&a, &b| x[a].partial_cmp(&x[b]).unwrap_or(Ordering::Equal));
    let xs: Vec<f64> = order.iter().map(|&i| x[i]).collect();
    let ys: Vec<f64> = order.iter().map(|&i| y[i]).collect();

    let k = ((span * n as f64).ceil() as usize).clamp(3, n);
    let mut windows = Vec::with_capacity(n);
    let mut left = 0usize;
    for i in 0..n {
        while left + k < n && xs[left + k] - xs[i] < xs[i] - xs[left] {
            left += 1;
        }
        windows.push(left);
    }

    let fitted_sorted: Vec<f64> = (0..n)
        .into_par_iter()
        .map(|i| {
            let window = windows[i]..windows[i] + k;
            let dmax = window
                .clone()
                .map(|j| (xs[j] - xs[i]).abs())
                .fold(0.0f64, f64::max);
            // moments of the centred abscissa: m[p] = sum w d^p, r[p] = sum w d^p y
            let (mut m, mut r) = ([0.0f64; 5], [0.0f64; 3]);
            for j in window {
                let d = xs[j] - xs[i];
                let w = if dmax > 0.0 {
                    (1.0 - (d.abs() / dmax).powi(3)).max(0.0).powi(3)
                } else {
                    1.0
                };
                let mut dp = w;
                for p in 0..5 {
                    m[p] += dp;
                    if p < 3 {
                        r[p] += dp * ys[j];
                    }
                    dp *= d;
                }
            }
            local_intercept(&m, &r)
        })
        .collect();

    let mut fitted = vec![0.0; n];
    for (pos, &orig) in order.iter().enumerate() {
        fitted[orig] = fitted_sorted[pos];
    }
    fitted
}

/// Value at the window centre of the weighted quadratic fit, lowering the
/// degree while the normal equations are singular.
fn local_intercept(m: &[f64; 5], r: &[f64; 3]) -> f64 {
    let quadratic = [
        [m[0], m[1], m[2], r[0]],
        [m[1], m[2], m[3], r[1]],
        [m[2], m[3], m[4], r[2]],
    ];
    if let Some(coef) = solve3(quadratic) {
        return coef[0];
    }
    let denom = m[0] * m[2] - m[1] * m[1];
    if denom.abs() > 1e-12 * m[0] * m[0].max(m[2]) {
        return (m[2] * r[0] - m[1] * r[1]) / denom;
    }
    r[0] / m[0]
}

/// Gaussian elimination with partial pivoting on an augmented 3x4 system.
fn solve3(mut a: [[f64; 4]; 3]) -> Option<[f64; 3]> {
    let scale = a
        .iter()
        .flat_map(|row| row[..3].iter())
        .fold(0.0f64, |acc, v| acc.max(v.abs()));
    if scale == 0.0 {
        return None;
    }
    for col in 0..3 {
        let pivot = (col..3).max_by(|&p, &q| {
            a[p][col]
                .abs()
                .partial_cmp(&a[q][col].abs())
                .unwrap_or(Ordering::Equal)
        })?;
        if a[pivot][col].abs() <= 1e-10 * scale {
            return None;
        }
        a.swap(col, pivot);
        for row in col + 1..3 {
            let factor = a[row][col] / a[col][col];
            for c in col..4 {
                a[row][c] -= factor * a[col][c];
            }
        }
    }
    let mut coef = [0.0; 3];
    for row in (0..3).rev() {
        let tail: f64 = (row + 1..3).map(|c| a[row][c] * coef[c]).sum();
        coef[row] = (a[row][3] - tail) / a[row][row];
    }
    Some(coef)
}
