use crate::error::{PipelineError, Result};
use crate::input::Table;

/// Ordered feature names a model was trained on. This is the single place
/// the feature order is defined; extraction and model loading both check
/// against it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeatureSet {
    names: Vec<String>,
}

impl FeatureSet {
    pub fn new(names: Vec<String>) -> Result<Self> {
        if names.is_empty() {
            return Err(PipelineError::invalid("feature list is empty"));
        }
        for (i, name) in names.iter().enumerate() {
            if names[..i].contains(name) {
                return Err(PipelineError::invalid(format!(
                    "feature '{name}' listed twice"
                )));
            }
        }
        Ok(Self { names })
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    /// Fails unless `declared` matches this set name for name, in order.
    pub fn check_declared(&self, declared: &[String], context: &str) -> Result<()> {
        if declared == self.names.as_slice() {
            return Ok(());
        }
        let detail = match declared
            .iter()
            .zip(&self.names)
            .position(|(a, b)| a != b)
        {
            Some(pos) => format!(
                "feature #{pos} is '{}' but '{}' is configured",
                declared[pos], self.names[pos]
            ),
            None => format!(
                "declares {} features, {} configured",
                declared.len(),
                self.names.len()
            ),
        };
        Err(PipelineError::schema(context, detail))
    }

    /// Binds the feature order and the weight field to column slices of
    /// `table` once, so per-row extraction never looks names up.
    pub fn resolve<'t>(
        &self,
        table: &'t Table,
        weight_field: &str,
        context: &str,
    ) -> Result<ResolvedFeatures<'t>> {
        let mut columns = Vec::with_capacity(self.names.len());
        for name in &self.names {
            let col = table
                .column(name)
                .ok_or_else(|| PipelineError::schema(context, format!("no feature '{name}'")))?;
            columns.push(col);
        }
        let weights = table.column(weight_field).ok_or_else(|| {
            PipelineError::schema(context, format!("no weight field '{weight_field}'"))
        })?;
        Ok(ResolvedFeatures {
            columns,
            weights,
            n_rows: table.n_rows(),
        })
    }
}

#[derive(Debug, Clone)]
pub struct ResolvedFeatures<'t> {
    columns: Vec<&'t [f64]>,
    weights: &'t [f64],
    n_rows: usize,
}

impl ResolvedFeatures<'_> {
    pub fn n_rows(&self) -> usize {
        self.n_rows
    }

    /// Fresh feature vector for `row`, in declared order.
    pub fn row(&self, row: usize) -> Vec<f64> {
        self.columns.iter().map(|c| c[row]).collect()
    }

    pub fn weight(&self, row: usize) -> f64 {
        self.weights[row]
    }
}

/// Per-feature standardization `(x - mean) / std`, fitted over a whole
/// table. Zero-variance features keep a unit scale.
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureScaler {
    mean: Vec<f64>,
    scale: Vec<f64>,
}

impl FeatureScaler {
    pub fn fit(features: &ResolvedFeatures<'_>) -> Self {
        let n_features = features.columns.len();
        let n = features.n_rows();
        let mut mean = vec![0.0; n_features];
        let mut scale = vec![1.0; n_features];
        if n == 0 {
            return Self { mean, scale };
        }
        for (j, col) in features.columns.iter().enumerate() {
            let m = col.iter().sum::<f64>() / n as f64;
            let var = col.iter().map(|x| (x - m) * (x - m)).sum::<f64>() / n as f64;
            mean[j] = m;
            let sd = var.sqrt();
            if sd > 0.0 && sd.is_finite() {
                scale[j] = sd;
            }
        }
        Self { mean, scale }
    }

    pub fn apply(&self, x: &mut [f64]) {
        for ((v, m), s) in x.iter_mut().zip(&self.mean).zip(&self.scale) {
            *v = (*v - m) / s;
        }
    }
}

#[cfg(test)]
#[path = "../../tests/src_inline/model/features.rs"]
mod tests;
