//! Cell-cycle phase scoring from S and G2/M marker genes

use crate::core::error::{Result, ScprepError};
use crate::core::sparse::SparseOps;
use crate::pipeline::anndata_ops::AnnDataContainer;
use log::{info, warn};
use polars::prelude::*;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rayon::prelude::*;
use rustc_hash::FxHashMap;
use std::collections::BTreeSet;
use std::str::FromStr;

/// S-phase markers (Tirosh et al. 2016), human symbols.
pub const S_GENES: &[&str] = &[
    "MCM5", "PCNA", "TYMS", "FEN1", "MCM2", "MCM4", "RRM1", "UNG", "GINS2", "MCM6", "CDCA7",
    "DTL", "PRIM1", "UHRF1", "MLF1IP", "HELLS", "RFC2", "RPA2", "NASP", "RAD51AP1", "GMNN",
    "WDR76", "SLBP", "CCNE2", "UBR7", "POLD3", "MSH2", "ATAD2", "RAD51", "RRM2", "CDC45",
    "CDC6", "EXO1", "TIPIN", "DSCC1", "BLM", "CASP8AP2", "USP1", "CLSPN", "POLA1", "CHAF1B",
    "BRIP1", "E2F8",
];

/// G2/M-phase markers (Tirosh et al. 2016), human symbols.
pub const G2M_GENES: &[&str] = &[
    "HMGB2", "CDK1", "NUSAP1", "UBE2C", "BIRC5", "TPX2", "TOP2A", "NDC80", "CKS2", "NUF2",
    "CKS1B", "MKI67", "TMPO", "CENPF", "TACC3", "FAM64A", "SMC4", "CCNB2", "CKAP2L", "CKAP2",
    "AURKB", "BUB1", "KIF11", "ANP32E", "TUBB4B", "GTSE1", "KIF20B", "HJURP", "CDCA3", "HN1",
    "CDC20", "TTK", "CDC25C", "KIF2C", "RANGAP1", "NCAPD2", "DLGAP5", "CDCA2", "CDCA8", "ECT2",
    "KIF23", "HMMR", "AURKA", "PSRC1", "ANLN", "LBR", "CKAP5", "CENPE", "CTCF", "NEK2", "G2E3",
    "GAS2L3", "CBX5", "CENPA",
];

const N_EXPRESSION_BINS: usize = 25;
const CONTROL_SEED: u64 = 0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Organism {
    Human,
    Mouse,
}

impl Organism {
    /// Marker symbol in this organism's nomenclature.
    pub fn symbol(&self, human: &str) -> String {
        match self {
            Organism::Human => human.to_string(),
            Organism::Mouse => {
                let mut chars = human.chars();
                match chars.next() {
                    Some(first) => first
                        .to_uppercase()
                        .chain(chars.flat_map(char::to_lowercase))
                        .collect(),
                    None => String::new(),
                }
            }
        }
    }
}

impl FromStr for Organism {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "human" => Ok(Organism::Human),
            "mouse" => Ok(Organism::Mouse),
            other => Err(format!("Unknown organism '{}': expected human or mouse", other)),
        }
    }
}

/// Phase label from a pair of scores.
pub fn assign_phase(s_score: f64, g2m_score: f64) -> &'static str {
    if s_score < 0.0 && g2m_score < 0.0 {
        "G1"
    } else if s_score >= g2m_score {
        "S"
    } else {
        "G2M"
    }
}

/// Per-cell score of a gene set against expression-matched control genes.
///
/// Genes are split into `n_bins` bins by mean expression. For every bin that
/// holds a listed gene, `ctrl_size` genes are drawn from the whole bin and the
/// unlisted ones join the control set. The score is the mean over listed genes minus the mean over
/// control genes.
pub fn score_genes(
    adata: &AnnDataContainer,
    genes: &[String],
    ctrl_size: usize,
    n_bins: usize,
    rng: &mut StdRng,
) -> Result<Vec<f64>> {
    let x = adata.x_required("gene scoring")?;

    let var_index: FxHashMap<&str, usize> = adata
        .var_names
        .iter()
        .enumerate()
        .map(|(idx, name)| (name.as_str(), idx))
        .collect();
    let listed: BTreeSet<usize> = genes
        .iter()
        .filter_map(|g| var_index.get(g.as_str()).copied())
        .collect();
    if listed.is_empty() {
        return Err(ScprepError::InvalidInput(
            "No genes of the scoring list are present in the dataset".to_string(),
        ));
    }
    if listed.len() < genes.len() {
        warn!(
            "{} of {} scoring genes are absent from the dataset",
            genes.len() - listed.len(),
            genes.len()
        );
    }

    let means = SparseOps::column_moments(x, None, |v| v).means;
    let cuts = expression_cuts(&means, n_bins);

    let control = control_genes(&cuts, &listed, ctrl_size, rng);
    if control.is_empty() {
        warn!("No control genes available, scoring against zero");
    }

    let in_list: Vec<bool> = (0..means.len()).map(|g| listed.contains(&g)).collect();
    let in_control: Vec<bool> = (0..means.len()).map(|g| control.contains(&g)).collect();
    let n_listed = listed.len() as f64;
    let n_control = control.len() as f64;

    Ok((0..x.nrows())
        .into_par_iter()
        .map(|row_idx| {
            let row = x.row(row_idx);
            let (mut list_sum, mut control_sum) = (0.0, 0.0);
            for (&col, &val) in row.col_indices().iter().zip(row.values()) {
                if in_list[col] {
                    list_sum += val;
                } else if in_control[col] {
                    control_sum += val;
                }
            }
            let control_mean = if n_control > 0.0 {
                control_sum / n_control
            } else {
                0.0
            };
            list_sum / n_listed - control_mean
        })
        .collect())
}

/// Draws up to `ctrl_size` genes from every bin holding a listed gene, then
/// drops the listed genes from the draw.
fn control_genes(
    cuts: &[usize],
    listed: &BTreeSet<usize>,
    ctrl_size: usize,
    rng: &mut StdRng,
) -> BTreeSet<usize> {
    let listed_cuts: BTreeSet<usize> = listed.iter().map(|&g| cuts[g]).collect();
    let mut control = BTreeSet::new();
    for cut in listed_cuts {
        let bin: Vec<usize> = (0..cuts.len()).filter(|&g| cuts[g] == cut).collect();
        if bin.len() > ctrl_size {
            control.extend(bin.choose_multiple(rng, ctrl_size).copied());
        } else {
            control.extend(bin);
        }
    }
    control.retain(|g| !listed.contains(g));
    control
}

/// Bin index per gene: min-rank of its mean divided by the bin size.
fn expression_cuts(means: &[f64], n_bins: usize) -> Vec<usize> {
    let n = means.len();
    let per_bin = ((n as f64 / (n_bins.max(2) - 1) as f64).round() as usize).max(1);

    let mut order: Vec<usize> = (0..n).collect();
    order.sort_by(|&a, &b| {
        means[a]
            .partial_cmp(&means[b])
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    let mut cuts = vec![0; n];
    let mut min_rank = 1;
    for (pos, &g) in order.iter().enumerate() {
        if pos == 0 || means[g] != means[order[pos - 1]] {
            min_rank = pos + 1;
        }
        cuts[g] = min_rank / per_bin;
    }
    cuts
}

/// Score S and G2/M programs and write `S_score`, `G2M_score` and `phase` to obs.
pub fn score_cell_cycle(adata: &mut AnnDataContainer, organism: Organism) -> Result<()> {
    let s_genes: Vec<String> = S_GENES.iter().map(|g| organism.symbol(g)).collect();
    let g2m_genes: Vec<String> = G2M_GENES.iter().map(|g| organism.symbol(g)).collect();
    let ctrl_size = s_genes.len().min(g2m_genes.len());

    let mut rng = StdRng::seed_from_u64(CONTROL_SEED);
    let s_scores = score_genes(adata, &s_genes, ctrl_size, N_EXPRESSION_BINS, &mut rng)?;
    let g2m_scores = score_genes(adata, &g2m_genes, ctrl_size, N_EXPRESSION_BINS, &mut rng)?;

    let phases: Vec<&str> = s_scores
        .iter()
        .zip(&g2m_scores)
        .map(|(&s, &g2m)| assign_phase(s, g2m))
        .collect();
    let count = |phase: &str| phases.iter().filter(|p| **p == phase).count();
    info!(
        "Cell-cycle phases: G1={}, S={}, G2M={}",
        count("G1"),
        count("S"),
        count("G2M")
    );

    adata.set_obs_column(Series::new("S_score".into(), s_scores))?;
    adata.set_obs_column(Series::new("G2M_score".into(), g2m_scores))?;
    adata.set_obs_column(Series::new("phase".into(), phases))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::anndata_ops::test_support::dense_container;

    #[test]
    fn marker_lists_have_expected_sizes() {
        assert_eq!(S_GENES.len(), 43);
        assert_eq!(G2M_GENES.len(), 54);
    }

    #[test]
    fn mouse_symbols_are_title_cased() {
        assert_eq!(Organism::Mouse.symbol("MCM5"), "Mcm5");
        assert_eq!(Organism::Mouse.symbol("MLF1IP"), "Mlf1ip");
        assert_eq!(Organism::Human.symbol("MCM5"), "MCM5");
        assert_eq!("Mouse".parse::<Organism>(), Ok(Organism::Mouse));
        assert!("yeast".parse::<Organism>().is_err());
    }

    #[test]
    fn phase_rules() {
        assert_eq!(assign_phase(-0.1, -0.2), "G1");
        assert_eq!(assign_phase(0.3, 0.3), "S");
        assert_eq!(assign_phase(-0.1, 0.2), "G2M");
    }

    #[test]
    fn score_subtracts_matched_control() {
        // A and B tie on mean expression, so B is A's only control gene.
        let adata = dense_container(
            &[vec![2.0, 0.0, 5.0], vec![0.0, 2.0, 5.0]],
            &["A", "B", "C"],
        );
        let mut rng = StdRng::seed_from_u64(0);
        let scores = score_genes(&adata, &["A".to_string()], 5, 25, &mut rng).unwrap();
        assert_eq!(scores, vec![2.0, -2.0]);
    }

    #[test]
    fn control_draw_covers_whole_bin_before_dropping_listed() {
        // one bin of six genes, two of them listed
        let cuts = vec![0; 6];
        let listed: BTreeSet<usize> = [0, 1].into_iter().collect();

        let mut rng = StdRng::seed_from_u64(7);
        let control = control_genes(&cuts, &listed, 3, &mut rng);

        let mut replay = StdRng::seed_from_u64(7);
        let bin: Vec<usize> = (0..6).collect();
        let expected: BTreeSet<usize> = bin
            .choose_multiple(&mut replay, 3)
            .copied()
            .filter(|g| !listed.contains(g))
            .collect();
        assert_eq!(control, expected);
        assert!(control.len() <= 3);
        assert!(control.iter().all(|g| !listed.contains(g)));
    }

    #[test]
    fn small_bins_keep_every_unlisted_gene() {
        let cuts = vec![0, 0, 0, 1, 1];
        let listed: BTreeSet<usize> = [0].into_iter().collect();
        let mut rng = StdRng::seed_from_u64(0);
        let control = control_genes(&cuts, &listed, 5, &mut rng);
        assert_eq!(control.into_iter().collect::<Vec<_>>(), vec![1, 2]);
    }

    #[test]
    fn unknown_genes_only_is_invalid() {
        let adata = dense_container(&[vec![1.0]], &["A"]);
        let mut rng = StdRng::seed_from_u64(0);
        assert!(matches!(
            score_genes(&adata, &["ZZZ".to_string()], 5, 25, &mut rng),
            Err(ScprepError::InvalidInput(_))
        ));
    }

    #[test]
    fn phases_written_to_obs() {
        let adata_rows = vec![
            vec![3.0, 0.0, 1.0, 2.0],
            vec![0.0, 0.0, 1.0, 2.0],
            vec![0.0, 6.0, 1.0, 2.0],
        ];
        let mut adata = dense_container(&adata_rows, &["MCM5", "CDK1", "X1", "X2"]);
        score_cell_cycle(&mut adata, Organism::Human).unwrap();

        assert_eq!(adata.obs_numeric("S_score").unwrap(), vec![2.0, -1.0, -1.0]);
        assert_eq!(adata.obs_numeric("G2M_score").unwrap(), vec![-2.0, -2.0, 4.0]);
        assert_eq!(adata.obs_strings("phase").unwrap(), vec!["S", "G1", "G2M"]);
    }
}
