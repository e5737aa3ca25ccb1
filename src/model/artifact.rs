use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{PipelineError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
pub enum Method {
    #[serde(rename = "BDT")]
    #[value(name = "BDT", alias = "bdt")]
    Bdt,
    #[serde(rename = "DNN")]
    #[value(name = "DNN", alias = "dnn")]
    Dnn,
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Method::Bdt => f.write_str("BDT"),
            Method::Dnn => f.write_str("DNN"),
        }
    }
}

/// Underscore-separated hyperparameter string, e.g. `300_10_1_0.01` for a
/// BDT (trees, depth, min node size, learning rate) or
/// `416_160_416_480_0.0001_100_128` for a DNN (3 or 4 layer widths,
/// learning rate, epochs, batch size).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Hyperparameters {
    raw: String,
    fields: Vec<String>,
}

impl Hyperparameters {
    pub fn parse(method: Method, raw: &str) -> Result<Self> {
        let fields: Vec<String> = raw.split('_').map(|s| s.trim().to_string()).collect();
        let ok = match method {
            Method::Bdt => fields.len() == 4,
            Method::Dnn => fields.len() == 6 || fields.len() == 7,
        };
        if !ok {
            return Err(PipelineError::invalid(format!(
                "{method} hyperparameters '{raw}' have {} fields",
                fields.len()
            )));
        }
        for f in &fields {
            if f.is_empty() || f.parse::<f64>().is_err() {
                return Err(PipelineError::invalid(format!(
                    "hyperparameter field '{f}' in '{raw}' is not numeric"
                )));
            }
        }
        Ok(Self {
            raw: raw.to_string(),
            fields,
        })
    }

    pub fn raw(&self) -> &str {
        &self.raw
    }

    /// Name-safe form with decimal points dropped: `300_10_1_001`.
    pub fn tag(&self) -> String {
        self.fields
            .iter()
            .map(|f| f.replace('.', ""))
            .collect::<Vec<_>>()
            .join("_")
    }
}

/// Deterministic naming of per-fold model artifacts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelName {
    pub channel: String,
    pub k_folds: usize,
    pub method: Method,
    pub hyperparameters: Hyperparameters,
    pub tag: String,
}

impl ModelName {
    pub fn stem(&self, fold: usize) -> String {
        format!(
            "{}_{}fold_{}{}_{}_{}",
            self.channel,
            self.k_folds,
            self.method,
            fold,
            self.hyperparameters.tag(),
            self.tag
        )
    }

    pub fn file_name(&self, fold: usize) -> String {
        format!("{}.model.json", self.stem(fold))
    }
}

#[cfg(test)]
#[path = "../../tests/src_inline/model/artifact.rs"]
mod tests;
