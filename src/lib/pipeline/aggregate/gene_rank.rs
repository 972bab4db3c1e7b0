//! Per-sample HVG ranks and their accumulation across samples

use crate::core::error::{Result, ScprepError};
use crate::core::fs::{is_gzipped, make_parent_dirs};
use crate::core::io::{get_reader, get_writer};
use crate::pipeline::preprocess::HvgResult;
use log::info;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::path::Path;
use std::str::FromStr;

/// Direction in which selected genes are ranked by normalized dispersion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RankOrder {
    /// Rank 0 is the least dispersed selected gene.
    #[default]
    Ascending,
    /// Rank 0 is the most dispersed selected gene.
    Descending,
}

impl FromStr for RankOrder {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "ascending" | "asc" => Ok(RankOrder::Ascending),
            "descending" | "desc" => Ok(RankOrder::Descending),
            other => Err(format!(
                "Unknown rank order '{}': expected ascending or descending",
                other
            )),
        }
    }
}

/// Rank the selected genes of one sample.
///
/// Ties keep gene order. Genes that were not selected get no rank.
pub fn rank_selected_genes(
    var_names: &[String],
    hvg: &HvgResult,
    order: RankOrder,
) -> Vec<(String, f64)> {
    let scores = hvg.normalized_scores();
    let mut selected = hvg.selected();
    selected.sort_by(|&a, &b| {
        let ord = scores[a].partial_cmp(&scores[b]).unwrap_or(Ordering::Equal);
        match order {
            RankOrder::Ascending => ord,
            RankOrder::Descending => ord.reverse(),
        }
    });

    selected
        .into_iter()
        .enumerate()
        .map(|(rank, gene)| (var_names[gene].clone(), rank as f64))
        .collect()
}

/// Accumulated rank per gene across every processed sample.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GeneRankTable {
    ranks: FxHashMap<String, f64>,
}

impl GeneRankTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add one sample's ranks: new genes are inserted, known genes summed.
    pub fn fold<I>(mut self, sample_ranks: I) -> Self
    where
        I: IntoIterator<Item = (String, f64)>,
    {
        for (gene, rank) in sample_ranks {
            *self.ranks.entry(gene).or_insert(0.0) += rank;
        }
        self
    }

    pub fn get(&self, gene: &str) -> Option<f64> {
        self.ranks.get(gene).copied()
    }

    pub fn len(&self) -> usize {
        self.ranks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ranks.is_empty()
    }

    /// Freeze the table into rows sorted by gene.
    pub fn finalize(self) -> RankedGenes {
        let mut rows: Vec<GeneRank> = self
            .ranks
            .into_iter()
            .map(|(gene, rank)| GeneRank { gene, rank })
            .collect();
        rows.sort_by(|a, b| a.gene.cmp(&b.gene));
        RankedGenes { rows }
    }
}

/// One `gene,rank` row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeneRank {
    pub gene: String,
    pub rank: f64,
}

/// Final, read-only rank table.
#[derive(Debug, Clone, PartialEq)]
pub struct RankedGenes {
    rows: Vec<GeneRank>,
}

impl RankedGenes {
    pub fn rows(&self) -> &[GeneRank] {
        &self.rows
    }

    /// Write `gene,rank` CSV; a `.gz` path is gzip-compressed.
    pub fn write_csv(&self, path: &Path, threads: usize) -> Result<()> {
        let output_err = |e: anyhow::Error| ScprepError::Output {
            path: path.display().to_string(),
            reason: format!("{:#}", e),
        };
        make_parent_dirs(path).map_err(output_err)?;

        let mut writer =
            get_writer(&Some(path), is_gzipped(path), true, b',', threads, 6).map_err(output_err)?;
        for row in &self.rows {
            writer.serialize(row)?;
        }
        writer.flush()?;

        info!("Wrote {} ranked genes to {}", self.rows.len(), path.display());
        Ok(())
    }
}

/// Gene ids from a `gene,rank` CSV, in file order.
pub fn read_gene_list(path: &Path) -> Result<Vec<String>> {
    if !path.exists() {
        return Err(ScprepError::FileNotFound(path.display().to_string()));
    }
    let mut reader = get_reader(&Some(path), true, is_gzipped(path), b',').map_err(|e| {
        ScprepError::InputRead {
            path: path.display().to_string(),
            reason: format!("{:#}", e),
        }
    })?;

    let mut genes = Vec::new();
    for row in reader.deserialize() {
        let row: GeneRank = row?;
        genes.push(row.gene);
    }
    Ok(genes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::preprocess::HvgStats;
    use proptest::prelude::*;
    use std::collections::BTreeMap;

    fn ranks(pairs: &[(&str, f64)]) -> Vec<(String, f64)> {
        pairs.iter().map(|(g, r)| (g.to_string(), *r)).collect()
    }

    #[test]
    fn two_sample_fold() {
        let table = GeneRankTable::new()
            .fold(ranks(&[("g1", 0.0), ("g2", 1.0), ("g3", 2.0)]))
            .fold(ranks(&[("g2", 0.0), ("g3", 1.0), ("g4", 2.0)]));

        let rows = table.finalize();
        let expected = vec![
            GeneRank { gene: "g1".into(), rank: 0.0 },
            GeneRank { gene: "g2".into(), rank: 1.0 },
            GeneRank { gene: "g3".into(), rank: 3.0 },
            GeneRank { gene: "g4".into(), rank: 2.0 },
        ];
        assert_eq!(rows.rows(), expected.as_slice());
    }

    fn hvg(scores: Vec<f64>, highly_variable: Vec<bool>) -> HvgResult {
        HvgResult {
            means: vec![0.0; scores.len()],
            stats: HvgStats::Dispersion {
                dispersions: vec![0.0; scores.len()],
                dispersions_norm: scores,
            },
            highly_variable,
        }
    }

    #[test]
    fn only_selected_genes_are_ranked() {
        let names: Vec<String> = ["A", "B", "C", "D"].iter().map(|s| s.to_string()).collect();
        let result = hvg(vec![2.0, 0.5, f64::NAN, 1.0], vec![true, true, false, true]);

        let asc = rank_selected_genes(&names, &result, RankOrder::Ascending);
        assert_eq!(asc, ranks(&[("B", 0.0), ("D", 1.0), ("A", 2.0)]));

        let desc = rank_selected_genes(&names, &result, RankOrder::Descending);
        assert_eq!(desc, ranks(&[("A", 0.0), ("D", 1.0), ("B", 2.0)]));
    }

    #[test]
    fn ties_keep_gene_order() {
        let names: Vec<String> = ["A", "B", "C"].iter().map(|s| s.to_string()).collect();
        let result = hvg(vec![1.0, 1.0, 0.0], vec![true, true, true]);
        let asc = rank_selected_genes(&names, &result, RankOrder::Ascending);
        assert_eq!(asc, ranks(&[("C", 0.0), ("A", 1.0), ("B", 2.0)]));
    }

    #[test]
    fn csv_export_is_sorted_with_header() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("out/top_genes.csv");
        GeneRankTable::new()
            .fold(ranks(&[("TP53", 4.0), ("ACTB", 1.0)]))
            .finalize()
            .write_csv(&path, 1)?;

        let text = std::fs::read_to_string(&path)?;
        assert_eq!(text, "gene,rank\nACTB,1.0\nTP53,4.0\n");
        assert_eq!(read_gene_list(&path)?, vec!["ACTB", "TP53"]);
        Ok(())
    }

    #[test]
    fn gzipped_export_reads_back() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("top_genes.csv.gz");
        GeneRankTable::new()
            .fold(ranks(&[("GAPDH", 0.0)]))
            .finalize()
            .write_csv(&path, 2)?;
        assert_eq!(read_gene_list(&path)?, vec!["GAPDH"]);
        Ok(())
    }

    proptest! {
        #[test]
        fn fold_sums_per_sample_ranks(
            samples in prop::collection::vec(
                prop::collection::btree_map(0usize..12, 0u32..50, 0..8),
                0..6,
            )
        ) {
            let mut table = GeneRankTable::new();
            let mut expected: BTreeMap<String, f64> = BTreeMap::new();

            for sample in &samples {
                let before = table.clone();
                let sample_ranks: Vec<(String, f64)> = sample
                    .iter()
                    .map(|(g, r)| (format!("g{}", g), *r as f64))
                    .collect();
                for (gene, rank) in &sample_ranks {
                    *expected.entry(gene.clone()).or_insert(0.0) += rank;
                }
                table = table.fold(sample_ranks.clone());

                for (gene, _) in &sample_ranks {
                    let now = table.get(gene).unwrap();
                    prop_assert!(now >= before.get(gene).unwrap_or(0.0));
                }
            }

            prop_assert_eq!(table.len(), expected.len());
            for gene in (0..12).map(|g| format!("g{}", g)) {
                prop_assert_eq!(table.get(&gene), expected.get(&gene).copied());
            }
        }
    }
}
