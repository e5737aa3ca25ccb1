use serde::Serialize;

use crate::config::SampleKind;
use crate::error::{PipelineError, Result};
use crate::input::{Column, InputError, NamedTable, Table, TableStore};
use crate::model::features::FeatureSet;
use crate::pipeline::stage1_index::SourceSpec;
use crate::pipeline::stage2_folds::{Fold, TRAINING_TABLE, VALIDATION_TABLE};

pub const CLASS_FIELD: &str = "class_id";

/// Labeled feature vectors of one row set, ready for a trainer. Weights are
/// `abs(weight)`: class balancing during training works on magnitudes.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LabeledSet {
    pub features: Vec<Vec<f64>>,
    pub is_signal: Vec<bool>,
    pub weights: Vec<f64>,
}

impl LabeledSet {
    pub fn len(&self) -> usize {
        self.features.len()
    }

    pub fn is_empty(&self) -> bool {
        self.features.is_empty()
    }

    fn to_table(&self, features: &FeatureSet) -> Result<Table> {
        let mut columns: Vec<Column> = features
            .names()
            .iter()
            .enumerate()
            .map(|(j, name)| Column::new(name.clone(), self.features.iter().map(|x| x[j]).collect()))
            .collect();
        columns.push(Column::new(
            CLASS_FIELD,
            self.is_signal.iter().map(|&s| if s { 1.0 } else { 0.0 }).collect(),
        ));
        columns.push(Column::new("weight", self.weights.clone()));
        Ok(Table::new(columns)?)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct WeightSums {
    pub signal_training: f64,
    pub background_training: f64,
    pub signal_validation: f64,
    pub background_validation: f64,
}

#[derive(Debug, Clone)]
pub struct TrainingInputs {
    pub fold: usize,
    pub training: LabeledSet,
    pub validation: LabeledSet,
    pub sums: WeightSums,
}

/// The model-training backend. Returns the name of the artifact it produced.
pub trait Trainer {
    fn train(&mut self, inputs: &TrainingInputs, features: &FeatureSet) -> Result<String>;
}

/// Collects fold `fold`'s training and validation rows of `sources` from
/// their persisted fold containers. A source without a fold container is
/// skipped with a warning; a fold where nothing could be read is fatal.
pub fn assemble_training_inputs(
    store: &dyn TableStore,
    sources: &[(SourceSpec, SampleKind)],
    features: &FeatureSet,
    weight_field: &str,
    fold: usize,
) -> Result<TrainingInputs> {
    let mut training = LabeledSet::default();
    let mut validation = LabeledSet::default();
    let mut sums = WeightSums::default();
    let mut used = 0usize;

    for (source, kind) in sources {
        let container = Fold::container_name(&source.name, fold);
        let is_signal = *kind == SampleKind::Signal;

        let train_table = match store.read_table(&container, TRAINING_TABLE) {
            Ok(t) => t,
            Err(e @ (InputError::MissingContainer(_) | InputError::MissingTable { .. })) => {
                tracing::warn!(source = %source.name, fold, "skipping source: {e}");
                continue;
            }
            Err(e) => return Err(e.into()),
        };
        let val_table = store.read_table(&container, VALIDATION_TABLE)?;

        let added = append_rows(
            &mut training,
            &train_table,
            features,
            weight_field,
            is_signal,
            &format!("{container}/{TRAINING_TABLE}"),
        )?;
        let added_val = append_rows(
            &mut validation,
            &val_table,
            features,
            weight_field,
            is_signal,
            &format!("{container}/{VALIDATION_TABLE}"),
        )?;
        if is_signal {
            sums.signal_training += added.1;
            sums.signal_validation += added_val.1;
        } else {
            sums.background_training += added.1;
            sums.background_validation += added_val.1;
        }
        tracing::info!(
            source = %source.name,
            fold,
            training = added.0,
            validation = added_val.0,
            "collected training rows"
        );
        used += 1;
    }

    if used == 0 || training.is_empty() {
        return Err(PipelineError::FatalEmptyInput(format!(
            "no training rows for fold {fold}"
        )));
    }
    tracing::info!(
        fold,
        s_train = sums.signal_training,
        b_train = sums.background_training,
        s_val = sums.signal_validation,
        b_val = sums.background_validation,
        "training weight sums"
    );
    Ok(TrainingInputs {
        fold,
        training,
        validation,
        sums,
    })
}

fn append_rows(
    set: &mut LabeledSet,
    table: &Table,
    features: &FeatureSet,
    weight_field: &str,
    is_signal: bool,
    context: &str,
) -> Result<(usize, f64)> {
    let resolved = features.resolve(table, weight_field, context)?;
    let mut sum = 0.0;
    for row in 0..resolved.n_rows() {
        let w = resolved.weight(row).abs();
        set.features.push(resolved.row(row));
        set.is_signal.push(is_signal);
        set.weights.push(w);
        sum += w;
    }
    Ok((resolved.n_rows(), sum))
}

/// Trainer hand-off through the table store: writes the inputs to container
/// `{channel}_fold{f}_{group}_inputs` for an external training job.
pub struct ContainerHandoff<'a> {
    pub store: &'a dyn TableStore,
    pub channel: String,
    pub group: String,
}

impl ContainerHandoff<'_> {
    pub fn container_name(&self, fold: usize) -> String {
        format!("{}_fold{}_{}_inputs", self.channel, fold, self.group)
    }
}

impl Trainer for ContainerHandoff<'_> {
    fn train(&mut self, inputs: &TrainingInputs, features: &FeatureSet) -> Result<String> {
        let name = self.container_name(inputs.fold);
        let tables = [
            NamedTable::new(TRAINING_TABLE, inputs.training.to_table(features)?),
            NamedTable::new(VALIDATION_TABLE, inputs.validation.to_table(features)?),
        ];
        let path = self.store.write_container(&name, &tables)?;
        tracing::info!(fold = inputs.fold, path = %path.display(), "wrote training inputs");
        Ok(name)
    }
}

#[cfg(test)]
#[path = "../../tests/src_inline/pipeline/stage3_training.rs"]
mod tests;
