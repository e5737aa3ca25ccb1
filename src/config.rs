use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{PipelineError, Result};
use crate::model::artifact::{Hyperparameters, Method, ModelName};
use crate::model::features::FeatureSet;
use crate::model::histogram::Binning;
use crate::pipeline::stage1_index::SourceSpec;

pub const DEFAULT_SEED: u64 = 42;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SampleKind {
    Signal,
    Background,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SampleConfig {
    pub name: String,
    /// Container holding the raw event table; defaults to the sample name.
    #[serde(default)]
    pub container: Option<String>,
    pub kind: SampleKind,
}

impl SampleConfig {
    pub fn container(&self) -> &str {
        self.container.as_deref().unwrap_or(&self.name)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisConfig {
    pub channel: String,
    #[serde(default = "default_tree")]
    pub tree: String,
    #[serde(default = "default_weight_field")]
    pub weight_field: String,
    pub features: Vec<String>,
    #[serde(default = "default_folds")]
    pub folds: usize,
    #[serde(default = "default_method")]
    pub method: Method,
    pub hyperparameters: String,
    #[serde(default = "default_tag")]
    pub tag: String,
    pub samples: Vec<SampleConfig>,
    /// Per-sample table names to read instead of `tree`; each one becomes
    /// its own indexed source `{sample}_{category}`.
    #[serde(default)]
    pub categories: Vec<String>,
    /// Training groups: group name -> sample names.
    #[serde(default)]
    pub groups: BTreeMap<String, Vec<String>>,
    #[serde(default)]
    pub histogram: Binning,
    #[serde(default = "default_seed")]
    pub seed: u64,
    #[serde(default)]
    pub suffix: String,
    #[serde(default)]
    pub standardize: bool,
}

fn default_tree() -> String {
    "sel_tree".to_string()
}

fn default_weight_field() -> String {
    "weight".to_string()
}

fn default_folds() -> usize {
    5
}

fn default_method() -> Method {
    Method::Bdt
}

fn default_tag() -> String {
    "all".to_string()
}

fn default_seed() -> u64 {
    DEFAULT_SEED
}

impl AnalysisConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            PipelineError::invalid(format!("cannot read config {}: {e}", path.display()))
        })?;
        let config: AnalysisConfig = serde_json::from_str(&raw).map_err(|e| {
            PipelineError::invalid(format!("cannot parse config {}: {e}", path.display()))
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.folds == 0 {
            return Err(PipelineError::invalid("folds must be >= 1"));
        }
        if self.samples.is_empty() {
            return Err(PipelineError::invalid("no samples configured"));
        }
        for (i, s) in self.samples.iter().enumerate() {
            if self.samples[..i].iter().any(|o| o.name == s.name) {
                return Err(PipelineError::invalid(format!(
                    "sample '{}' listed twice",
                    s.name
                )));
            }
        }
        let sources = self.sources();
        for (i, (source, _)) in sources.iter().enumerate() {
            if sources[..i].iter().any(|(o, _)| o.name == source.name) {
                return Err(PipelineError::invalid(format!(
                    "source name '{}' occurs twice; check categories and sample names",
                    source.name
                )));
            }
        }
        for (group, members) in &self.groups {
            for m in members {
                if self.sample(m).is_none() {
                    return Err(PipelineError::invalid(format!(
                        "group '{group}' refers to unknown sample '{m}'"
                    )));
                }
            }
        }
        if self.features.iter().any(|f| f == &self.weight_field) {
            return Err(PipelineError::invalid(format!(
                "weight field '{}' is also listed as a feature",
                self.weight_field
            )));
        }
        self.feature_set()?;
        self.histogram.validate()?;
        self.model_name()?;
        Ok(())
    }

    pub fn sample(&self, name: &str) -> Option<&SampleConfig> {
        self.samples.iter().find(|s| s.name == name)
    }

    pub fn feature_set(&self) -> Result<FeatureSet> {
        FeatureSet::new(self.features.clone())
    }

    pub fn model_name(&self) -> Result<ModelName> {
        Ok(ModelName {
            channel: self.channel.clone(),
            k_folds: self.folds,
            method: self.method,
            hyperparameters: Hyperparameters::parse(self.method, &self.hyperparameters)?,
            tag: self.tag.clone(),
        })
    }

    /// Fields every source table must carry: features in declared order,
    /// then the event weight.
    pub fn required_fields(&self) -> Vec<String> {
        let mut out = self.features.clone();
        out.push(self.weight_field.clone());
        out
    }

    /// Samples of a training group. An unknown group name is an error; the
    /// group `all` defaults to every configured sample.
    pub fn group_samples(&self, group: &str) -> Result<Vec<&SampleConfig>> {
        match self.groups.get(group) {
            Some(members) => Ok(members.iter().filter_map(|m| self.sample(m)).collect()),
            None if group == "all" => Ok(self.samples.iter().collect()),
            None => Err(PipelineError::invalid(format!("unknown group '{group}'"))),
        }
    }

    /// Ordered indexing sources: samples in configured order, each expanded
    /// over categories when categories are configured.
    pub fn sources(&self) -> Vec<(SourceSpec, SampleKind)> {
        self.samples
            .iter()
            .flat_map(|sample| {
                self.sample_sources(sample)
                    .into_iter()
                    .map(move |spec| (spec, sample.kind))
            })
            .collect()
    }

    /// Sources of the samples in a training group, in source order.
    pub fn group_sources(&self, group: &str) -> Result<Vec<(SourceSpec, SampleKind)>> {
        Ok(self
            .group_samples(group)?
            .into_iter()
            .flat_map(|sample| {
                self.sample_sources(sample)
                    .into_iter()
                    .map(move |spec| (spec, sample.kind))
            })
            .collect())
    }

    /// One source per category, named `{sample}_{category}`, or a single
    /// source over `tree` named after the sample.
    pub fn sample_sources(&self, sample: &SampleConfig) -> Vec<SourceSpec> {
        if self.categories.is_empty() {
            return vec![SourceSpec::new(&sample.name, sample.container(), &self.tree)];
        }
        self.categories
            .iter()
            .map(|category| {
                SourceSpec::new(
                    format!("{}_{}", sample.name, category),
                    sample.container(),
                    category,
                )
            })
            .collect()
    }
}

#[cfg(test)]
#[path = "../tests/src_inline/config.rs"]
mod tests;
