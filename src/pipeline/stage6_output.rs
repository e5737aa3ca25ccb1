use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::config::AnalysisConfig;
use crate::error::{PipelineError, Result};
use crate::input::{Column, NamedTable, Table, TableStore};
use crate::pipeline::stage1_index::SampleIndex;
use crate::pipeline::stage2_folds::RowSelection;
use crate::pipeline::stage4_ensemble::EnsembleHistogram;
use crate::pipeline::stage5_balance::BalancedSample;
use crate::report::{StreamStats, write_json};

/// Serialized form of an ensemble histogram.
#[derive(Debug, Clone, Serialize)]
pub struct HistogramRecord {
    pub name: String,
    pub edges: Vec<f64>,
    pub contents: Vec<f64>,
    pub sumw2: Vec<f64>,
    pub errors: Vec<f64>,
    pub underflow: f64,
    pub overflow: f64,
    pub underflow_sumw2: f64,
    pub overflow_sumw2: f64,
    pub entries: u64,
    pub negative_weight_entries: u64,
    pub total_weight: f64,
    pub rows_per_fold: Vec<usize>,
}

impl HistogramRecord {
    pub fn new(name: impl Into<String>, ensemble: &EnsembleHistogram) -> Self {
        let h = &ensemble.histogram;
        let (underflow_sumw2, overflow_sumw2) = h.flow_sumw2();
        Self {
            name: name.into(),
            edges: h.binning().edges(),
            contents: h.contents().to_vec(),
            sumw2: h.sumw2().to_vec(),
            errors: h.errors(),
            underflow: h.underflow(),
            overflow: h.overflow(),
            underflow_sumw2,
            overflow_sumw2,
            entries: h.entries(),
            negative_weight_entries: h.negative_weight_entries(),
            total_weight: h.total_weight(),
            rows_per_fold: ensemble.rows_per_fold.clone(),
        }
    }
}

/// `hist_{method}_{sample}_{channel}_{k}fold_{set}_{hp}_{tag}.json`
pub fn histogram_file_name(
    config: &AnalysisConfig,
    sample: &str,
    selection: RowSelection,
) -> Result<String> {
    let name = config.model_name()?;
    Ok(format!(
        "hist_{}_{}_{}_{}fold_{}_{}_{}.json",
        name.method,
        sample,
        name.channel,
        name.k_folds,
        selection.label(),
        name.hyperparameters.tag(),
        name.tag
    ))
}

pub fn write_histogram(
    out_dir: &Path,
    file_name: &str,
    sample: &str,
    ensemble: &EnsembleHistogram,
) -> Result<PathBuf> {
    let path = out_dir.join(file_name);
    let record = HistogramRecord::new(format!("h_score_{sample}"), ensemble);
    write_json(&path, &record)?;
    tracing::info!(
        path = %path.display(),
        entries = record.entries,
        total_weight = record.total_weight,
        "wrote histogram"
    );
    Ok(path)
}

pub fn discriminant_branch(suffix: &str) -> String {
    format!("discriminant{suffix}")
}

/// Cuts the row-aligned scores back into one table per indexed source, written
/// together in container `discriminant{suffix}`. Each table carries the
/// score and the event's signed weight.
pub fn write_discriminant_streams(
    store: &dyn TableStore,
    suffix: &str,
    index: &SampleIndex,
    scores: &[f64],
    weights: &[f64],
) -> Result<(String, Vec<StreamStats>)> {
    if scores.len() != index.total_rows() || weights.len() != index.total_rows() {
        return Err(PipelineError::invalid(format!(
            "{} scores and {} weights for {} indexed rows",
            scores.len(),
            weights.len(),
            index.total_rows()
        )));
    }
    let branch = discriminant_branch(suffix);
    let mut tables = Vec::with_capacity(index.entries().len());
    let mut stats = Vec::with_capacity(index.entries().len());
    for (name, range) in index.entries() {
        let slice = &scores[range.clone()];
        let table = Table::new(vec![
            Column::new(branch.clone(), slice.to_vec()),
            Column::new("weight", weights[range.clone()].to_vec()),
        ])?;
        tracing::info!(sample = %name, rows = slice.len(), "discriminant stream");
        stats.push(StreamStats::from_scores(name.clone(), slice));
        tables.push(NamedTable::new(format!("{name}{suffix}"), table));
    }
    let container = branch;
    store.write_container(&container, &tables)?;
    Ok((container, stats))
}

/// Container `discriminant_background{suffix}`, table `background{suffix}`.
pub fn write_balanced_background(
    store: &dyn TableStore,
    suffix: &str,
    sample: &BalancedSample,
) -> Result<String> {
    let container = format!("discriminant_background{suffix}");
    let table = Table::new(vec![Column::new(
        discriminant_branch(suffix),
        sample.scores.clone(),
    )])?;
    store.write_container(
        &container,
        &[NamedTable::new(format!("background{suffix}"), table)],
    )?;
    tracing::info!(
        container = %container,
        rows = sample.scores.len(),
        "wrote balanced background"
    );
    Ok(container)
}

#[cfg(test)]
#[path = "../../tests/src_inline/pipeline/stage6_output.rs"]
mod tests;
