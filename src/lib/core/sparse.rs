//! Sparse matrix utilities shared across scprep
//!
//! Expression matrices are held as `CsrMatrix` with cells on rows and genes
//! on columns. Helpers here never densify a full matrix.

use crate::core::error::{Result, ScprepError};
use itertools::Itertools;
use nalgebra_sparse::{CooMatrix, CsrMatrix};
use rayon::prelude::*;
use rustc_hash::FxHashMap;

/// Per-column first and second moments.
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnMoments {
    pub means: Vec<f64>,
    /// Sample variances (ddof = 1).
    pub variances: Vec<f64>,
}

pub struct SparseOps;

impl SparseOps {
    /// Create a CSR matrix from `(row, col, value)` triplets.
    pub fn from_triplets(
        nrows: usize,
        ncols: usize,
        triplets: Vec<(usize, usize, f64)>,
    ) -> Result<CsrMatrix<f64>> {
        if nrows == 0 || ncols == 0 || triplets.is_empty() {
            return Ok(CsrMatrix::zeros(nrows, ncols));
        }

        for &(row, col, _) in &triplets {
            if row >= nrows || col >= ncols {
                return Err(ScprepError::InvalidInput(format!(
                    "Index ({}, {}) exceeds matrix dimensions ({}, {})",
                    row, col, nrows, ncols
                )));
            }
        }

        let (row_indices, col_indices, values): (Vec<_>, Vec<_>, Vec<_>) =
            triplets.into_iter().multiunzip();

        let coo = CooMatrix::try_from_triplets(nrows, ncols, row_indices, col_indices, values)
            .map_err(|e| ScprepError::SparseMatrix(format!("COO creation failed: {:?}", e)))?;

        Ok(CsrMatrix::from(&coo))
    }

    /// Row sums, one per cell.
    pub fn row_sums(matrix: &CsrMatrix<f64>) -> Vec<f64> {
        (0..matrix.nrows())
            .into_par_iter()
            .map(|row_idx| matrix.row(row_idx).values().iter().sum())
            .collect()
    }

    /// Rebuild a matrix with every stored value passed through `f(row, value)`.
    ///
    /// The sparsity pattern is preserved, so explicit zeros produced by `f` stay stored.
    pub fn map_values_by_row<F>(matrix: &CsrMatrix<f64>, f: F) -> Result<CsrMatrix<f64>>
    where
        F: Fn(usize, f64) -> f64 + Sync,
    {
        let (row_offsets, col_indices, values) = matrix.csr_data();
        let mapped: Vec<f64> = (0..matrix.nrows())
            .into_par_iter()
            .flat_map_iter(|row| {
                let f = &f;
                values[row_offsets[row]..row_offsets[row + 1]]
                    .iter()
                    .map(move |&v| f(row, v))
            })
            .collect();

        CsrMatrix::try_from_csr_data(
            matrix.nrows(),
            matrix.ncols(),
            row_offsets.to_vec(),
            col_indices.to_vec(),
            mapped,
        )
        .map_err(|e| ScprepError::SparseMatrix(format!("Failed to rebuild matrix: {:?}", e)))
    }

    /// Per-column sums of `transform(col, value)` and of its square over the selected rows.
    ///
    /// `transform(col, 0.0)` must be `0.0`: implicit zeros are never visited.
    pub fn column_power_sums<F>(
        matrix: &CsrMatrix<f64>,
        rows: &[usize],
        transform: F,
    ) -> (Vec<f64>, Vec<f64>)
    where
        F: Fn(usize, f64) -> f64 + Sync,
    {
        let ncols = matrix.ncols();
        if rows.is_empty() {
            return (vec![0.0; ncols], vec![0.0; ncols]);
        }

        let chunk_size = std::cmp::max(1, rows.len() / rayon::current_num_threads());
        rows.par_chunks(chunk_size)
            .map(|chunk| {
                let mut local_sum = vec![0.0f64; ncols];
                let mut local_sq = vec![0.0f64; ncols];
                for &row_idx in chunk {
                    let row = matrix.row(row_idx);
                    for (&col, &val) in row.col_indices().iter().zip(row.values()) {
                        let v = transform(col, val);
                        local_sum[col] += v;
                        local_sq[col] += v * v;
                    }
                }
                (local_sum, local_sq)
            })
            .reduce(
                || (vec![0.0f64; ncols], vec![0.0f64; ncols]),
                |(mut acc_sum, mut acc_sq), (local_sum, local_sq)| {
                    for i in 0..ncols {
                        acc_sum[i] += local_sum[i];
                        acc_sq[i] += local_sq[i];
                    }
                    (acc_sum, acc_sq)
                },
            )
    }

    /// Per-column mean and sample variance of `transform(value)`.
    ///
    /// `rows = None` uses every row. `transform(0.0)` must be `0.0`.
    pub fn column_moments<F>(
        matrix: &CsrMatrix<f64>,
        rows: Option<&[usize]>,
        transform: F,
    ) -> ColumnMoments
    where
        F: Fn(f64) -> f64 + Sync,
    {
        let ncols = matrix.ncols();
        let all_rows: Vec<usize>;
        let row_list = match rows {
            Some(rows) => rows,
            None => {
                all_rows = (0..matrix.nrows()).collect();
                &all_rows
            }
        };
        let n = row_list.len();
        if n == 0 {
            return ColumnMoments {
                means: vec![0.0; ncols],
                variances: vec![f64::NAN; ncols],
            };
        }

        let (sums, sq_sums) = Self::column_power_sums(matrix, row_list, |_, v| transform(v));

        let nf = n as f64;
        let means: Vec<f64> = sums.iter().map(|s| s / nf).collect();
        let variances: Vec<f64> = if n < 2 {
            vec![f64::NAN; ncols]
        } else {
            means
                .iter()
                .zip(&sq_sums)
                .map(|(&m, &sq)| ((sq - nf * m * m) / (nf - 1.0)).max(0.0))
                .collect()
        };

        ColumnMoments { means, variances }
    }

    /// Keep only the listed rows, in the given order.
    pub fn select_rows<T: Copy>(matrix: &CsrMatrix<T>, keep_indices: &[usize]) -> Result<CsrMatrix<T>> {
        let mut new_row_offsets = Vec::with_capacity(keep_indices.len() + 1);
        let mut new_col_indices = Vec::new();
        let mut new_values = Vec::new();
        new_row_offsets.push(0);

        for &row_idx in keep_indices {
            if row_idx >= matrix.nrows() {
                return Err(ScprepError::InvalidInput(format!(
                    "Row {} exceeds matrix with {} rows",
                    row_idx,
                    matrix.nrows()
                )));
            }
            let row = matrix.row(row_idx);
            new_col_indices.extend_from_slice(row.col_indices());
            new_values.extend_from_slice(row.values());
            new_row_offsets.push(new_col_indices.len());
        }

        CsrMatrix::try_from_csr_data(
            keep_indices.len(),
            matrix.ncols(),
            new_row_offsets,
            new_col_indices,
            new_values,
        )
        .map_err(|e| ScprepError::SparseMatrix(format!("Failed to create row subset: {:?}", e)))
    }

    /// Keep only the listed columns; new column order follows `keep_indices`.
    pub fn select_columns<T: Copy>(matrix: &CsrMatrix<T>, keep_indices: &[usize]) -> Result<CsrMatrix<T>> {
        let nrows = matrix.nrows();
        let new_ncols = keep_indices.len();

        if new_ncols == 0 {
            return Ok(CsrMatrix::zeros(nrows, 0));
        }

        let col_map: FxHashMap<usize, usize> = keep_indices
            .iter()
            .enumerate()
            .map(|(new_idx, &old_idx)| (old_idx, new_idx))
            .collect();

        let mut new_row_offsets = Vec::with_capacity(nrows + 1);
        let mut new_col_indices = Vec::new();
        let mut new_values = Vec::new();
        new_row_offsets.push(0);

        for row_idx in 0..nrows {
            let row = matrix.row(row_idx);
            let mut entries: Vec<(usize, T)> = row
                .col_indices()
                .iter()
                .zip(row.values())
                .filter_map(|(old_col, &val)| col_map.get(old_col).map(|&new_col| (new_col, val)))
                .collect();
            // CSR requires sorted column indices within a row
            entries.sort_unstable_by_key(|&(col, _)| col);
            for (col, val) in entries {
                new_col_indices.push(col);
                new_values.push(val);
            }
            new_row_offsets.push(new_col_indices.len());
        }

        CsrMatrix::try_from_csr_data(
            nrows,
            new_ncols,
            new_row_offsets,
            new_col_indices,
            new_values,
        )
        .map_err(|e| ScprepError::SparseMatrix(format!("Failed to create column subset: {:?}", e)))
    }

    /// Column of values for a single gene, dense over all rows.
    pub fn dense_column(matrix: &CsrMatrix<f64>, col: usize) -> Vec<f64> {
        (0..matrix.nrows())
            .map(|row_idx| {
                let row = matrix.row(row_idx);
                match row.col_indices().binary_search(&col) {
                    Ok(pos) => row.values()[pos],
                    Err(_) => 0.0,
                }
            })
            .collect()
    }

    /// Convert an `f64` matrix into rounded, non-negative `u32` counts.
    pub fn to_counts(matrix: &CsrMatrix<f64>) -> Result<CsrMatrix<u32>> {
        let (row_offsets, col_indices, values) = matrix.csr_data();
        let counts: Vec<u32> = values
            .par_iter()
            .map(|&v| v.round().clamp(0.0, u32::MAX as f64) as u32)
            .collect();
        CsrMatrix::try_from_csr_data(
            matrix.nrows(),
            matrix.ncols(),
            row_offsets.to_vec(),
            col_indices.to_vec(),
            counts,
        )
        .map_err(|e| ScprepError::SparseMatrix(format!("Failed to convert to counts: {:?}", e)))
    }

    /// Convert a `u32` count matrix into `f64`.
    pub fn from_counts(matrix: &CsrMatrix<u32>) -> Result<CsrMatrix<f64>> {
        let (row_offsets, col_indices, values) = matrix.csr_data();
        CsrMatrix::try_from_csr_data(
            matrix.nrows(),
            matrix.ncols(),
            row_offsets.to_vec(),
            col_indices.to_vec(),
            values.iter().map(|&v| v as f64).collect(),
        )
        .map_err(|e| ScprepError::SparseMatrix(format!("Failed to convert counts: {:?}", e)))
    }

    /// Get matrix density statistics
    pub fn get_density_stats<T>(matrix: &CsrMatrix<T>) -> (f64, usize, usize) {
        let total_elements = matrix.nrows() * matrix.ncols();
        let nnz = matrix.nnz();
        let density = if total_elements > 0 {
            nnz as f64 / total_elements as f64
        } else {
            0.0
        };
        (density, nnz, total_elements)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_matrix() -> CsrMatrix<f64> {
        // [[1, 0, 2],
        //  [0, 3, 0],
        //  [4, 0, 5]]
        SparseOps::from_triplets(
            3,
            3,
            vec![(0, 0, 1.0), (0, 2, 2.0), (1, 1, 3.0), (2, 0, 4.0), (2, 2, 5.0)],
        )
        .unwrap()
    }

    #[test]
    fn row_sums_cover_every_row() {
        assert_eq!(SparseOps::row_sums(&sample_matrix()), vec![3.0, 3.0, 9.0]);
    }

    #[test]
    fn column_moments_include_implicit_zeros() {
        let moments = SparseOps::column_moments(&sample_matrix(), None, |v| v);
        assert_eq!(moments.means, vec![5.0 / 3.0, 1.0, 7.0 / 3.0]);
        // column 1 = [0, 3, 0]: mean 1, sample variance 3
        assert!((moments.variances[1] - 3.0).abs() < 1e-12);
    }

    #[test]
    fn column_moments_respect_row_subset() {
        let moments = SparseOps::column_moments(&sample_matrix(), Some(&[0, 2]), |v| v);
        assert_eq!(moments.means, vec![2.5, 0.0, 3.5]);
        assert!((moments.variances[0] - 4.5).abs() < 1e-12);
    }

    #[test]
    fn select_rows_and_columns() {
        let m = sample_matrix();
        let rows = SparseOps::select_rows(&m, &[2, 0]).unwrap();
        assert_eq!(SparseOps::row_sums(&rows), vec![9.0, 3.0]);

        let cols = SparseOps::select_columns(&m, &[2, 0]).unwrap();
        assert_eq!(cols.ncols(), 2);
        assert_eq!(SparseOps::dense_column(&cols, 0), vec![2.0, 0.0, 5.0]);
        assert_eq!(SparseOps::dense_column(&cols, 1), vec![1.0, 0.0, 4.0]);
    }

    #[test]
    fn map_values_keeps_pattern() {
        let m = sample_matrix();
        let doubled = SparseOps::map_values_by_row(&m, |row, v| v * (row as f64 + 1.0)).unwrap();
        assert_eq!(SparseOps::row_sums(&doubled), vec![3.0, 6.0, 27.0]);
        assert_eq!(doubled.nnz(), m.nnz());
    }

    #[test]
    fn out_of_bounds_triplet_is_rejected() {
        let err = SparseOps::from_triplets(2, 2, vec![(2, 0, 1.0)]);
        assert!(err.is_err());
    }

    #[test]
    fn counts_round_trip() {
        let m = sample_matrix();
        let counts = SparseOps::to_counts(&m).unwrap();
        let back = SparseOps::from_counts(&counts).unwrap();
        assert_eq!(SparseOps::row_sums(&back), SparseOps::row_sums(&m));
    }
}
