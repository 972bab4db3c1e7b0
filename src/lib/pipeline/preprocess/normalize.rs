//! Library-size normalization and log transform

use crate::core::error::Result;
use crate::core::sparse::SparseOps;
use crate::pipeline::anndata_ops::AnnDataContainer;
use log::info;

/// Name of the layer holding untouched integer counts.
pub const COUNTS_LAYER: &str = "counts";

/// Copy the expression matrix into `layers["counts"]` as integer counts.
pub fn store_counts_layer(adata: &mut AnnDataContainer) -> Result<()> {
    let counts = SparseOps::to_counts(adata.x_required("the counts layer")?)?;
    adata.layers.insert(COUNTS_LAYER.to_string(), counts);
    Ok(())
}

/// Scale every cell so its counts sum to `target_sum`.
///
/// Cells without counts stay all-zero.
pub fn normalize_total(adata: &mut AnnDataContainer, target_sum: f64) -> Result<()> {
    let x = adata.x_required("normalize_total")?;
    let factors: Vec<f64> = SparseOps::row_sums(x)
        .into_iter()
        .map(|total| if total > 0.0 { target_sum / total } else { 0.0 })
        .collect();
    let empty_cells = factors.iter().filter(|&&f| f == 0.0).count();

    let normalized = SparseOps::map_values_by_row(x, |row, value| value * factors[row])?;
    adata.x = Some(normalized);

    info!(
        "Normalized {} cells to {} counts each ({} empty cells left at zero)",
        adata.n_obs, target_sum, empty_cells
    );
    Ok(())
}

/// `x = ln(1 + x)` on every stored value.
pub fn log1p(adata: &mut AnnDataContainer) -> Result<()> {
    let x = adata.x_required("log1p")?;
    adata.x = Some(SparseOps::map_values_by_row(x, |_, value| value.ln_1p())?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::anndata_ops::test_support::dense_container;

    #[test]
    fn rows_sum_to_target() {
        let mut adata = dense_container(
            &[vec![1.0, 3.0, 0.0], vec![0.0, 0.0, 0.0], vec![5.0, 5.0, 10.0]],
            &["A", "B", "C"],
        );
        normalize_total(&mut adata, 1e4).unwrap();
        let sums = SparseOps::row_sums(adata.x.as_ref().unwrap());
        assert!((sums[0] - 1e4).abs() < 1e-6);
        assert_eq!(sums[1], 0.0);
        assert!((sums[2] - 1e4).abs() < 1e-6);
        let first = SparseOps::dense_column(adata.x.as_ref().unwrap(), 0);
        assert!((first[0] - 2500.0).abs() < 1e-9);
    }

    #[test]
    fn log1p_transforms_stored_values() {
        let mut adata = dense_container(&[vec![0.0, std::f64::consts::E - 1.0]], &["A", "B"]);
        log1p(&mut adata).unwrap();
        let col = SparseOps::dense_column(adata.x.as_ref().unwrap(), 1);
        assert!((col[0] - 1.0).abs() < 1e-12);
        assert_eq!(SparseOps::dense_column(adata.x.as_ref().unwrap(), 0), vec![0.0]);
    }

    #[test]
    fn counts_layer_keeps_raw_values() {
        let mut adata = dense_container(&[vec![2.0, 7.0]], &["A", "B"]);
        store_counts_layer(&mut adata).unwrap();
        normalize_total(&mut adata, 1.0).unwrap();
        let counts = SparseOps::from_counts(&adata.layers[COUNTS_LAYER]).unwrap();
        assert_eq!(SparseOps::row_sums(&counts), vec![9.0]);
    }

    #[test]
    fn dropped_matrix_is_reported() {
        let mut adata = dense_container(&[vec![1.0]], &["A"]);
        adata.x = None;
        assert!(normalize_total(&mut adata, 1e4).is_err());
    }
}
