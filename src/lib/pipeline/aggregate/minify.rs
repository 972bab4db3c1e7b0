//! Annotation-only copies of samples

use crate::pipeline::anndata_ops::AnnDataContainer;
use log::debug;
use polars::prelude::DataFrame;
use std::collections::HashMap;

/// A sample stripped of its expression matrix and layers.
#[derive(Debug, Clone)]
pub struct MinifiedSample {
    pub obs: DataFrame,
    pub var: DataFrame,
    pub obs_names: Vec<String>,
    pub var_names: Vec<String>,
}

impl MinifiedSample {
    pub fn n_obs(&self) -> usize {
        self.obs_names.len()
    }

    pub fn n_vars(&self) -> usize {
        self.var_names.len()
    }

    /// Back into a container with no expression data.
    pub fn into_container(self) -> AnnDataContainer {
        AnnDataContainer {
            n_obs: self.obs_names.len(),
            n_vars: self.var_names.len(),
            obs: self.obs,
            var: self.var,
            x: None,
            layers: HashMap::new(),
            obs_names: self.obs_names,
            var_names: self.var_names,
        }
    }
}

/// Drop `X` and every layer, keeping annotations and names.
pub fn minify(adata: AnnDataContainer) -> MinifiedSample {
    debug!(
        "Minifying {} × {} sample, releasing {} KB of matrix data",
        adata.n_obs,
        adata.n_vars,
        adata.footprint().matrix_bytes / 1024
    );

    MinifiedSample {
        obs: adata.obs,
        var: adata.var,
        obs_names: adata.obs_names,
        var_names: adata.var_names,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::anndata_ops::test_support::dense_container;
    use crate::pipeline::preprocess::store_counts_layer;

    #[test]
    fn minify_keeps_annotations_only() {
        let mut adata = dense_container(&[vec![1.0, 0.0], vec![2.0, 3.0]], &["A", "B"]);
        store_counts_layer(&mut adata).unwrap();

        let mini = minify(adata);
        assert_eq!(mini.n_obs(), 2);
        assert_eq!(mini.var_names, vec!["A", "B"]);
        assert_eq!(mini.obs.height(), 2);

        let restored = mini.into_container();
        assert!(restored.x.is_none());
        assert!(restored.layers.is_empty());
        assert!(restored.validate_dimensions().is_ok());
    }
}
