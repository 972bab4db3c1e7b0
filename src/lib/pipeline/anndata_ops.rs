//! In-memory AnnData container and H5AD reading/writing

use crate::core::error::{Result, ScprepError};
use crate::core::sparse::SparseOps;
use anndata::data::array::dataframe::DataFrameIndex;
use anndata::{
    data::*,
    traits::{AnnDataOp, AxisArraysOp},
    AnnData, Backend,
};
use anndata_hdf5::H5;
use itertools::Itertools;
use log::{debug, info, warn};
use nalgebra_sparse::CsrMatrix;
use polars::prelude::*;
use std::collections::HashMap;
use std::convert::TryFrom;
use std::path::Path;

/// Layers loaded from an H5AD file when present.
const KNOWN_LAYERS: &[&str] = &["counts", "raw_counts"];

/// Annotated data matrix held fully in memory.
///
/// `x` is cells × genes. Integer layers such as raw `counts` live in `layers`.
#[derive(Debug, Clone)]
pub struct AnnDataContainer {
    pub obs: DataFrame,
    pub var: DataFrame,
    pub x: Option<CsrMatrix<f64>>,
    pub layers: HashMap<String, CsrMatrix<u32>>,
    pub n_obs: usize,
    pub n_vars: usize,
    pub var_names: Vec<String>,
    pub obs_names: Vec<String>,
}

impl AnnDataContainer {
    /// Assemble a container from names and an optional expression matrix.
    pub fn from_parts(
        obs_names: Vec<String>,
        var_names: Vec<String>,
        x: Option<CsrMatrix<f64>>,
    ) -> Result<Self> {
        let mut container = Self {
            obs: DataFrame::empty(),
            var: DataFrame::empty(),
            x,
            layers: HashMap::new(),
            n_obs: obs_names.len(),
            n_vars: var_names.len(),
            var_names,
            obs_names,
        };
        container.ensure_name_frames()?;
        container.validate_dimensions()?;
        Ok(container)
    }

    /// Expression matrix, or an error naming `purpose` when it was dropped.
    pub fn x_required(&self, purpose: &str) -> Result<&CsrMatrix<f64>> {
        self.x.as_ref().ok_or_else(|| {
            ScprepError::EmptyData(format!("No expression matrix available for {}", purpose))
        })
    }

    /// Check that names, tables, `X` and layers all agree on the shape.
    ///
    /// An obs/var table of the wrong height only warns; it is rebuilt from the
    /// names before writing.
    pub fn validate_dimensions(&self) -> Result<()> {
        let names = [
            ("obs_names", self.obs_names.len(), self.n_obs),
            ("var_names", self.var_names.len(), self.n_vars),
        ];
        for (what, len, want) in names {
            if len != want {
                return Err(ScprepError::DimensionMismatch {
                    expected: format!("{} of length {}", what, want),
                    actual: format!("{} of length {}", what, len),
                });
            }
        }

        let tables = [("obs", &self.obs, self.n_obs), ("var", &self.var, self.n_vars)];
        for (axis, frame, want) in tables {
            if !frame.is_empty() && frame.height() != want {
                warn!(
                    "{} table has {} rows for {} names, rebuilding it from the names",
                    axis,
                    frame.height(),
                    want
                );
            }
        }

        let shape = (self.n_obs, self.n_vars);
        if let Some(x) = &self.x {
            check_shape("X", shape, x)?;
        }
        for (name, layer) in &self.layers {
            check_shape(&format!("layer '{}'", name), shape, layer)?;
        }
        Ok(())
    }

    /// Replace an empty or mis-sized obs/var table with a single names column.
    pub fn ensure_name_frames(&mut self) -> Result<()> {
        if self.obs.width() == 0 || self.obs.height() != self.n_obs {
            debug!("Rebuilding obs table from {} cell names", self.n_obs);
            self.obs = names_frame("obs_names", &self.obs_names)?;
        }
        if self.var.width() == 0 || self.var.height() != self.n_vars {
            debug!("Rebuilding var table from {} gene names", self.n_vars);
            self.var = names_frame("var_names", &self.var_names)?;
        }
        Ok(())
    }

    /// Numeric obs column as `f64`; nulls become NaN.
    ///
    /// A column that is absent or holds non-numeric data is a
    /// [`ScprepError::MissingMetric`].
    pub fn obs_numeric(&self, column: &str) -> Result<Vec<f64>> {
        numeric_column(&self.obs, column)
    }

    /// String view of an obs column (categoricals are decoded).
    pub fn obs_strings(&self, column: &str) -> Result<Vec<String>> {
        let col = self
            .obs
            .column(column)
            .map_err(|_| ScprepError::MissingMetric(column.to_string()))?;
        let as_str = col.cast(&DataType::String)?;
        Ok(as_str
            .str()?
            .into_iter()
            .map(|value| value.unwrap_or("").to_string())
            .collect())
    }

    /// Insert or replace an obs column.
    pub fn set_obs_column(&mut self, series: Series) -> Result<()> {
        if series.len() != self.n_obs {
            return Err(ScprepError::DimensionMismatch {
                expected: format!("obs column length = {}", self.n_obs),
                actual: format!("obs column '{}' length = {}", series.name(), series.len()),
            });
        }
        self.obs.with_column(series)?;
        Ok(())
    }

    /// Insert or replace a var column.
    pub fn set_var_column(&mut self, series: Series) -> Result<()> {
        if series.len() != self.n_vars {
            return Err(ScprepError::DimensionMismatch {
                expected: format!("var column length = {}", self.n_vars),
                actual: format!("var column '{}' length = {}", series.name(), series.len()),
            });
        }
        self.var.with_column(series)?;
        Ok(())
    }

    /// Keep the listed cells, in the given order.
    pub fn subset_obs(&mut self, keep: &[usize]) -> Result<()> {
        if let Some(ref x) = self.x {
            self.x = Some(SparseOps::select_rows(x, keep)?);
        }
        for matrix in self.layers.values_mut() {
            *matrix = SparseOps::select_rows(matrix, keep)?;
        }
        self.obs = take_rows(&self.obs, keep)?;
        self.obs_names = keep.iter().map(|&i| self.obs_names[i].clone()).collect();
        self.n_obs = keep.len();
        Ok(())
    }

    /// Keep the listed genes, in the given order.
    pub fn subset_vars(&mut self, keep: &[usize]) -> Result<()> {
        if let Some(ref x) = self.x {
            self.x = Some(SparseOps::select_columns(x, keep)?);
        }
        for matrix in self.layers.values_mut() {
            *matrix = SparseOps::select_columns(matrix, keep)?;
        }
        self.var = take_rows(&self.var, keep)?;
        self.var_names = keep.iter().map(|&i| self.var_names[i].clone()).collect();
        self.n_vars = keep.len();
        Ok(())
    }

    /// Approximate in-memory size of the annotations and of the matrices.
    pub fn footprint(&self) -> Footprint {
        Footprint {
            annotation_bytes: frame_bytes(&self.obs) + frame_bytes(&self.var),
            matrix_bytes: self.x.as_ref().map_or(0, csr_bytes)
                + self.layers.values().map(csr_bytes).sum::<usize>(),
        }
    }
}

/// Byte estimate returned by [`AnnDataContainer::footprint`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Footprint {
    pub annotation_bytes: usize,
    pub matrix_bytes: usize,
}

fn check_shape<T>(what: &str, (rows, cols): (usize, usize), matrix: &CsrMatrix<T>) -> Result<()> {
    if matrix.nrows() == rows && matrix.ncols() == cols {
        return Ok(());
    }
    Err(ScprepError::DimensionMismatch {
        expected: format!("{} of {}×{}", what, rows, cols),
        actual: format!("{} of {}×{}", what, matrix.nrows(), matrix.ncols()),
    })
}

fn names_frame(column: &str, names: &[String]) -> Result<DataFrame> {
    Ok(DataFrame::new(vec![Series::new(column.into(), names.to_vec()).into()])?)
}

/// Write an [`AnnDataContainer`] to an H5AD file.
///
/// A dropped expression matrix is written as an all-zero sparse `X` of the same
/// shape. Layers are stored as `f32`.
pub fn write_anndata_h5ad<P: AsRef<Path>>(adata: &AnnDataContainer, path: P) -> Result<()> {
    let path = path.as_ref();
    let mut adata = adata.clone();
    adata.ensure_name_frames()?;
    adata.validate_dimensions()?;

    let footprint = adata.footprint();
    info!(
        "Writing {} × {} AnnData to {} ({} KB of matrices, {} KB of annotations)",
        adata.n_obs,
        adata.n_vars,
        path.display(),
        footprint.matrix_bytes / 1024,
        footprint.annotation_bytes / 1024
    );

    let file = AnnData::<H5>::new(path)?;
    file.set_obs_names(adata.obs_names.iter().cloned().collect::<DataFrameIndex>())?;
    file.set_var_names(adata.var_names.iter().cloned().collect::<DataFrameIndex>())?;

    let x = match &adata.x {
        Some(x) => cast_csr(x, |v| v as f32)?,
        None => {
            debug!("No expression matrix, writing zeros for X");
            CsrMatrix::<f32>::zeros(adata.n_obs, adata.n_vars)
        }
    };
    file.set_x(x)?;

    for name in adata.layers.keys().sorted() {
        let layer = &adata.layers[name];
        debug!("Writing layer '{}' ({} non-zeros)", name, layer.nnz());
        file.layers().add(name, cast_csr(layer, |v| v as f32)?)?;
    }

    if adata.obs.width() > 0 {
        file.set_obs(adata.obs)?;
    }
    if adata.var.width() > 0 {
        file.set_var(adata.var)?;
    }
    file.set_n_obs(adata.n_obs)?;
    file.set_n_vars(adata.n_vars)?;
    file.close()?;
    Ok(())
}

/// Read an H5AD file into an [`AnnDataContainer`].
///
/// Failures to open or decode the file surface as [`ScprepError::InputRead`].
pub fn read_anndata_h5ad<P: AsRef<Path>>(path: P) -> Result<AnnDataContainer> {
    let path = path.as_ref();
    if !path.exists() {
        return Err(ScprepError::FileNotFound(path.display().to_string()));
    }
    let unreadable = |reason: String| ScprepError::InputRead {
        path: path.display().to_string(),
        reason,
    };

    let adata = H5::open(path)
        .and_then(AnnData::<H5>::open)
        .map_err(|e| unreadable(format!("{:#}", e)))?;
    let (n_obs, n_vars) = (adata.n_obs(), adata.n_vars());
    if n_obs == 0 || n_vars == 0 {
        return Err(ScprepError::EmptyData(format!(
            "{} holds no cells or genes ({} × {})",
            path.display(),
            n_obs,
            n_vars
        )));
    }
    info!("Reading {} × {} AnnData from {}", n_obs, n_vars, path.display());

    let obs = decode_categoricals(read_axis_dataframe(adata.read_obs(), "obs", n_obs))?;
    let var = decode_categoricals(read_axis_dataframe(adata.read_var(), "var", n_vars))?;
    let x = read_x_matrix(&adata).map_err(|e| unreadable(e.to_string()))?;
    let layers = read_layers(&adata);

    let mut container = AnnDataContainer {
        obs,
        var,
        x,
        layers,
        n_obs,
        n_vars,
        obs_names: adata.obs_names().into_vec(),
        var_names: adata.var_names().into_vec(),
    };
    container.ensure_name_frames()?;
    container.validate_dimensions()?;
    Ok(container)
}

/// Annotation table for one axis, or an empty frame when it is unreadable or
/// mis-sized so the caller rebuilds it from the names.
fn read_axis_dataframe(
    frame: anyhow::Result<DataFrame>,
    axis: &str,
    expected_height: usize,
) -> DataFrame {
    let reason = match frame {
        Ok(df) if df.height() == expected_height => return df,
        Ok(df) => format!("{} rows for {} names", df.height(), expected_height),
        Err(e) => format!("{:#}", e),
    };
    warn!("Discarding {} table ({}), rebuilding it from the names", axis, reason);
    DataFrame::empty()
}

/// Categorical columns carry per-file dictionaries; decode them so tables
/// from different files stack cleanly.
fn decode_categoricals(df: DataFrame) -> Result<DataFrame> {
    let columns = df
        .get_columns()
        .iter()
        .map(|column| match column.dtype() {
            DataType::Categorical(_, _) | DataType::Enum(_, _) => column.cast(&DataType::String),
            _ => Ok(column.clone()),
        })
        .collect::<PolarsResult<Vec<Column>>>()?;
    if columns.is_empty() {
        return Ok(df);
    }
    Ok(DataFrame::new(columns)?)
}

fn read_x_matrix(adata: &AnnData<H5>) -> Result<Option<CsrMatrix<f64>>> {
    let Some(mut elem) = adata.x().extract() else {
        debug!("File carries no X");
        return Ok(None);
    };
    let dims = elem.shape();
    if dims.ndim() == 0 || dims.as_ref().contains(&0) {
        debug!("Ignoring X with shape {:?}", dims.as_ref());
        return Ok(None);
    }

    let data = elem
        .data()
        .map_err(|e| ScprepError::DataFormat(format!("failed to extract X: {:?}", e)))?;
    let x = csr_from_array(data, "X", |v| v)?;
    let (density, nnz, _) = SparseOps::get_density_stats(&x);
    debug!("X holds {} non-zeros ({:.2}% dense)", nnz, density * 100.0);
    Ok(Some(x))
}

fn read_layers(adata: &AnnData<H5>) -> HashMap<String, CsrMatrix<u32>> {
    let layers = adata.layers();
    KNOWN_LAYERS
        .iter()
        .filter_map(|&name| {
            let data = match layers.get_item::<ArrayData>(name) {
                Ok(Some(data)) => data,
                Ok(None) | Err(_) => {
                    debug!("Layer '{}' not present", name);
                    return None;
                }
            };
            match csr_from_array(data, name, |v| v.round().clamp(0.0, u32::MAX as f64) as u32) {
                Ok(matrix) => {
                    debug!("Loaded layer '{}' ({} non-zeros)", name, matrix.nnz());
                    Some((name.to_string(), matrix))
                }
                Err(e) => {
                    warn!("Skipping layer '{}': {}", name, e);
                    None
                }
            }
        })
        .collect()
}

pub(crate) fn take_rows(df: &DataFrame, indices: &[usize]) -> Result<DataFrame> {
    let idx_chunked = UInt32Chunked::from_vec(
        "idx".into(),
        indices.iter().map(|&idx| idx as u32).collect(),
    );
    df.take(&idx_chunked)
        .map_err(|e| ScprepError::DataFormat(format!("Failed to subset DataFrame: {}", e)))
}

/// Numeric view of a DataFrame column; strings, booleans and categoricals are rejected.
pub(crate) fn numeric_column(df: &DataFrame, column: &str) -> Result<Vec<f64>> {
    let col = df
        .column(column)
        .map_err(|_| ScprepError::MissingMetric(column.to_string()))?;
    if !is_numeric_dtype(col.dtype()) {
        return Err(ScprepError::MissingMetric(column.to_string()));
    }
    let as_f64 = col
        .cast(&DataType::Float64)
        .map_err(|_| ScprepError::MissingMetric(column.to_string()))?;
    Ok(as_f64
        .f64()?
        .into_iter()
        .map(|value| value.unwrap_or(f64::NAN))
        .collect())
}

pub(crate) fn is_numeric_dtype(dtype: &DataType) -> bool {
    !matches!(
        dtype,
        DataType::String
            | DataType::Boolean
            | DataType::Binary
            | DataType::Null
            | DataType::List(_)
            | DataType::Categorical(_, _)
            | DataType::Enum(_, _)
    )
}

fn cast_csr<S: Copy, T>(matrix: &CsrMatrix<S>, cast: impl Fn(S) -> T) -> Result<CsrMatrix<T>> {
    let (row_offsets, col_indices, values) = matrix.csr_data();
    CsrMatrix::try_from_csr_data(
        matrix.nrows(),
        matrix.ncols(),
        row_offsets.to_vec(),
        col_indices.to_vec(),
        values.iter().map(|&v| cast(v)).collect(),
    )
    .map_err(ScprepError::from)
}

/// Sparse matrix of any stored numeric type, mapped through `from_f64`.
fn csr_from_array<T>(
    data: ArrayData,
    what: &str,
    from_f64: impl Fn(f64) -> T,
) -> Result<CsrMatrix<T>> {
    if let Ok(m) = CsrMatrix::<f64>::try_from(data.clone()) {
        return cast_csr(&m, from_f64);
    }
    if let Ok(m) = CsrMatrix::<f32>::try_from(data.clone()) {
        return cast_csr(&m, |v| from_f64(f64::from(v)));
    }
    if let Ok(m) = CsrMatrix::<u32>::try_from(data.clone()) {
        return cast_csr(&m, |v| from_f64(f64::from(v)));
    }
    Err(ScprepError::DataFormat(format!(
        "{} is not a numeric sparse matrix (found {:?})",
        what,
        data.data_type()
    )))
}

fn frame_bytes(df: &DataFrame) -> usize {
    df.get_columns()
        .iter()
        .map(|column| column.as_materialized_series().estimated_size())
        .sum()
}

fn csr_bytes<T>(matrix: &CsrMatrix<T>) -> usize {
    let (row_offsets, col_indices, values) = matrix.csr_data();
    std::mem::size_of_val(row_offsets)
        + std::mem::size_of_val(col_indices)
        + std::mem::size_of_val(values)
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;

    /// Build a container from dense rows; cells are `c0..`, genes as given.
    pub fn dense_container(rows: &[Vec<f64>], genes: &[&str]) -> AnnDataContainer {
        let triplets: Vec<(usize, usize, f64)> = rows
            .iter()
            .enumerate()
            .flat_map(|(i, row)| {
                row.iter()
                    .enumerate()
                    .filter(|(_, v)| **v != 0.0)
                    .map(move |(j, &v)| (i, j, v))
            })
            .collect();
        let x = SparseOps::from_triplets(rows.len(), genes.len(), triplets).unwrap();
        let obs_names = (0..rows.len()).map(|i| format!("c{}", i)).collect();
        let var_names = genes.iter().map(|g| g.to_string()).collect();
        AnnDataContainer::from_parts(obs_names, var_names, Some(x)).unwrap()
    }
}
