//! Concatenation of minified samples along the cell axis

use super::minify::MinifiedSample;
use crate::core::error::{Result, ScprepError};
use crate::pipeline::anndata_ops::take_rows;
use itertools::Itertools;
use log::{debug, info};
use polars::prelude::*;
use rustc_hash::{FxHashMap, FxHashSet};

/// obs column recording each cell's sample of origin.
pub const SAMPLE_COLUMN: &str = "sample";

/// Stack samples in order into one dataset.
///
/// Genes are the intersection across samples, in the first sample's order. A
/// var column survives only when it is identical in every sample for the kept
/// genes. Cell ids become `{cell}_{sample}`.
pub fn concat_samples(samples: Vec<(String, MinifiedSample)>) -> Result<MinifiedSample> {
    if samples.is_empty() {
        return Err(ScprepError::EmptyData("No samples to concatenate".to_string()));
    }

    let mut seen = FxHashSet::default();
    for (name, _) in &samples {
        if !seen.insert(name.as_str()) {
            return Err(ScprepError::DuplicateSample(name.clone()));
        }
    }

    check_obs_schemas(&samples)?;

    let gene_indices = shared_gene_indices(&samples);
    let (_, first) = &samples[0];
    let var_names: Vec<String> = gene_indices[0]
        .iter()
        .map(|&idx| first.var_names[idx].clone())
        .collect();
    let var = merge_same_var(&samples, &gene_indices)?;

    let mut obs: Option<DataFrame> = None;
    let mut obs_names = Vec::new();
    for (name, sample) in &samples {
        let mut frame = sample.obs.clone();
        frame.with_column(Series::new(
            SAMPLE_COLUMN.into(),
            vec![name.as_str(); sample.n_obs()],
        ))?;
        match obs.as_mut() {
            Some(combined) => {
                combined.vstack_mut(&frame)?;
            }
            None => obs = Some(frame),
        }
        obs_names.extend(
            sample
                .obs_names
                .iter()
                .map(|cell| format!("{}_{}", cell, name)),
        );
    }
    let obs = obs.unwrap_or_else(DataFrame::empty);

    if let Some(dup) = obs_names.iter().duplicates().next() {
        return Err(ScprepError::InvalidInput(format!(
            "Cell id '{}' is not unique after adding sample suffixes",
            dup
        )));
    }

    info!(
        "Concatenated {} samples: {} cells × {} shared genes",
        samples.len(),
        obs_names.len(),
        var_names.len()
    );

    Ok(MinifiedSample {
        obs,
        var,
        obs_names,
        var_names,
    })
}

fn obs_schema(df: &DataFrame) -> Vec<(String, DataType)> {
    df.get_columns()
        .iter()
        .map(|column| (column.name().to_string(), column.dtype().clone()))
        .collect()
}

fn check_obs_schemas(samples: &[(String, MinifiedSample)]) -> Result<()> {
    let reference = obs_schema(&samples[0].1.obs);
    for (name, sample) in samples.iter().skip(1) {
        let schema = obs_schema(&sample.obs);
        if schema == reference {
            continue;
        }

        let expected: Vec<&str> = reference.iter().map(|(n, _)| n.as_str()).collect();
        let found: Vec<&str> = schema.iter().map(|(n, _)| n.as_str()).collect();
        let detail = if expected != found {
            format!("obs columns {:?}, expected {:?}", found, expected)
        } else {
            match schema.iter().zip(&reference).find(|(a, b)| a.1 != b.1) {
                Some(((column, dtype), (_, wanted))) => format!(
                    "obs column '{}' has dtype {:?}, expected {:?}",
                    column, dtype, wanted
                ),
                None => "obs schemas differ".to_string(),
            }
        };
        return Err(ScprepError::SchemaMismatch {
            sample: name.clone(),
            detail,
        });
    }
    Ok(())
}

/// For each sample, the positions of the shared genes in first-sample order.
fn shared_gene_indices(samples: &[(String, MinifiedSample)]) -> Vec<Vec<usize>> {
    let lookups: Vec<FxHashMap<&str, usize>> = samples
        .iter()
        .map(|(_, sample)| {
            sample
                .var_names
                .iter()
                .enumerate()
                .map(|(idx, gene)| (gene.as_str(), idx))
                .collect()
        })
        .collect();

    let shared: Vec<&str> = samples[0]
        .1
        .var_names
        .iter()
        .map(String::as_str)
        .filter(|gene| lookups.iter().all(|lookup| lookup.contains_key(gene)))
        .collect();

    lookups
        .iter()
        .map(|lookup| shared.iter().map(|gene| lookup[gene]).collect())
        .collect()
}

fn merge_same_var(
    samples: &[(String, MinifiedSample)],
    gene_indices: &[Vec<usize>],
) -> Result<DataFrame> {
    let aligned: Vec<DataFrame> = samples
        .iter()
        .zip(gene_indices)
        .map(|((_, sample), indices)| take_rows(&sample.var, indices))
        .collect::<Result<_>>()?;

    let (first, rest) = aligned.split_first().ok_or_else(|| {
        ScprepError::EmptyData("No samples to concatenate".to_string())
    })?;

    let kept: Vec<Column> = first
        .get_columns()
        .iter()
        .filter(|column| {
            let identical = rest.iter().all(|other| match other.column(column.name()) {
                Ok(candidate) => {
                    candidate.dtype() == column.dtype()
                        && candidate
                            .as_materialized_series()
                            .equals_missing(column.as_materialized_series())
                }
                Err(_) => false,
            });
            if !identical {
                debug!("Dropping var column '{}': differs between samples", column.name());
            }
            identical
        })
        .cloned()
        .collect();

    if kept.is_empty() {
        return Ok(DataFrame::empty());
    }
    Ok(DataFrame::new(kept)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::aggregate::minify::minify;
    use crate::pipeline::anndata_ops::test_support::dense_container;

    fn sample(genes: &[&str], n_cells: usize, gene_ids: &[&str], means: &[f64]) -> MinifiedSample {
        let rows = vec![vec![1.0; genes.len()]; n_cells];
        let mut adata = dense_container(&rows, genes);
        adata
            .set_var_column(Series::new("gene_ids".into(), gene_ids.to_vec()))
            .unwrap();
        adata
            .set_var_column(Series::new("means".into(), means.to_vec()))
            .unwrap();
        adata
            .set_obs_column(Series::new("total_counts".into(), vec![100.0; n_cells]))
            .unwrap();
        minify(adata)
    }

    #[test]
    fn concat_stacks_cells_and_intersects_genes() {
        let a = sample(&["g1", "g2", "g3"], 2, &["i1", "i2", "i3"], &[1.0, 2.0, 3.0]);
        let b = sample(&["g3", "g1", "g4"], 3, &["i3", "i1", "i4"], &[9.0, 9.0, 9.0]);

        let combined =
            concat_samples(vec![("S1".to_string(), a), ("S2".to_string(), b)]).unwrap();

        assert_eq!(combined.n_obs(), 5);
        assert_eq!(combined.var_names, vec!["g1", "g3"]);
        assert_eq!(
            combined.obs_names,
            vec!["c0_S1", "c1_S1", "c0_S2", "c1_S2", "c2_S2"]
        );

        let samples: Vec<Option<&str>> = combined
            .obs
            .column(SAMPLE_COLUMN)
            .unwrap()
            .str()
            .unwrap()
            .into_iter()
            .collect();
        assert_eq!(
            samples,
            vec![Some("S1"), Some("S1"), Some("S2"), Some("S2"), Some("S2")]
        );

        assert!(combined.var.column("gene_ids").is_ok());
        assert!(combined.var.column("means").is_err());
        assert_eq!(combined.var.height(), 2);
    }

    #[test]
    fn mismatched_obs_schema_is_rejected() {
        let a = sample(&["g1"], 1, &["i1"], &[1.0]);
        let mut b = sample(&["g1"], 1, &["i1"], &[1.0]);
        b.obs
            .with_column(Series::new("total_counts".into(), vec!["high"]))
            .unwrap();

        let err = concat_samples(vec![("S1".to_string(), a), ("S2".to_string(), b)]);
        assert!(matches!(
            err,
            Err(ScprepError::SchemaMismatch { ref sample, .. }) if sample == "S2"
        ));
    }

    #[test]
    fn duplicate_sample_names_are_rejected() {
        let a = sample(&["g1"], 1, &["i1"], &[1.0]);
        let b = a.clone();
        let err = concat_samples(vec![("S1".to_string(), a), ("S1".to_string(), b)]);
        assert!(matches!(err, Err(ScprepError::DuplicateSample(name)) if name == "S1"));
    }

    #[test]
    fn nothing_to_concat_is_empty_data() {
        assert!(matches!(
            concat_samples(Vec::new()),
            Err(ScprepError::EmptyData(_))
        ));
    }
}
