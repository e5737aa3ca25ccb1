use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{PipelineError, Result};
use crate::model::artifact::ModelName;
use crate::model::features::FeatureSet;

/// A trained per-fold model. `score` receives features in
/// `declared_features()` order; backends with several outputs return the
/// first one.
pub trait Scorer: Send + Sync {
    fn declared_features(&self) -> &[String];

    fn score(&self, features: &[f64]) -> f64;
}

/// Source of per-fold models, fold ids are 1-based.
pub trait ModelLoader: Sync {
    fn load(&self, fold: usize) -> Result<Box<dyn Scorer>>;

    /// Human-readable location of a fold's artifact, for diagnostics.
    fn describe(&self, fold: usize) -> String;
}

/// Loads a fold's model and checks its declared feature order against the
/// configured one. A mismatch is rejected here rather than producing
/// silently wrong scores.
pub fn load_checked(
    loader: &dyn ModelLoader,
    fold: usize,
    features: &FeatureSet,
) -> Result<Box<dyn Scorer>> {
    let model = loader.load(fold)?;
    features.check_declared(
        model.declared_features(),
        &format!("model {}", loader.describe(fold)),
    )?;
    Ok(model)
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Activation {
    #[default]
    Identity,
    Tanh,
    Sigmoid,
}

/// JSON linear/logistic model artifact:
/// `activation(intercept + sum(coefficients[i] * x[i]))`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinearModel {
    pub features: Vec<String>,
    pub coefficients: Vec<f64>,
    #[serde(default)]
    pub intercept: f64,
    #[serde(default)]
    pub activation: Activation,
}

impl LinearModel {
    pub fn from_file(path: &Path) -> std::result::Result<Self, String> {
        let raw = std::fs::read_to_string(path).map_err(|e| e.to_string())?;
        let model: LinearModel = serde_json::from_str(&raw).map_err(|e| e.to_string())?;
        if model.coefficients.len() != model.features.len() {
            return Err(format!(
                "{} coefficients for {} features",
                model.coefficients.len(),
                model.features.len()
            ));
        }
        Ok(model)
    }
}

impl Scorer for LinearModel {
    fn declared_features(&self) -> &[String] {
        &self.features
    }

    fn score(&self, features: &[f64]) -> f64 {
        let z = self.intercept
            + self
                .coefficients
                .iter()
                .zip(features)
                .map(|(c, x)| c * x)
                .sum::<f64>();
        match self.activation {
            Activation::Identity => z,
            Activation::Tanh => z.tanh(),
            Activation::Sigmoid => 1.0 / (1.0 + (-z).exp()),
        }
    }
}

/// Reads `LinearModel` artifacts named by `ModelName` from a directory.
#[derive(Debug, Clone)]
pub struct ArtifactLoader {
    dir: PathBuf,
    name: ModelName,
}

impl ArtifactLoader {
    pub fn new(dir: impl Into<PathBuf>, name: ModelName) -> Self {
        Self {
            dir: dir.into(),
            name,
        }
    }

    pub fn path(&self, fold: usize) -> PathBuf {
        self.dir.join(self.name.file_name(fold))
    }
}

impl ModelLoader for ArtifactLoader {
    fn load(&self, fold: usize) -> Result<Box<dyn Scorer>> {
        let path = self.path(fold);
        let model = LinearModel::from_file(&path).map_err(|reason| PipelineError::MissingModel {
            fold,
            path: path.display().to_string(),
            reason,
        })?;
        tracing::debug!(fold, path = %path.display(), "loaded model");
        Ok(Box::new(model))
    }

    fn describe(&self, fold: usize) -> String {
        self.path(fold).display().to_string()
    }
}

#[cfg(test)]
#[path = "../../tests/src_inline/model/backend.rs"]
mod tests;
