use std::borrow::Cow;
use std::ops::Range;

use rayon::prelude::*;

use crate::error::{PipelineError, Result};
use crate::input::{InputError, Table, TableStore};
use crate::model::backend::{ModelLoader, Scorer, load_checked};
use crate::model::features::{FeatureScaler, FeatureSet, ResolvedFeatures};
use crate::model::histogram::{Binning, WeightedHistogram};
use crate::pipeline::stage1_index::SampleIndex;
use crate::pipeline::stage2_folds::{Fold, IndexedFolds, RowSelection};

/// Rows one fold's model scores: a table and the row ranges within it.
pub struct FoldRows<'a> {
    pub table: Cow<'a, Table>,
    pub ranges: Vec<Range<usize>>,
    pub context: String,
}

/// Where each fold's rows come from.
pub trait FoldRowSource: Sync {
    fn fold_rows(&self, fold: usize) -> Result<FoldRows<'_>>;
}

/// Per-sample fold containers written by the split stage. The fold's table
/// is opened inside that fold's task and dropped when it finishes.
pub struct PersistedFolds<'a> {
    pub store: &'a dyn TableStore,
    pub sample: &'a str,
    pub selection: RowSelection,
}

impl FoldRowSource for PersistedFolds<'_> {
    fn fold_rows(&self, fold: usize) -> Result<FoldRows<'_>> {
        let container = Fold::container_name(self.sample, fold);
        let table_name = self.selection.table_name()?;
        let table = self
            .store
            .read_table(&container, table_name)
            .map_err(|e| match e {
                InputError::MissingContainer(_) | InputError::MissingTable { .. } => {
                    PipelineError::MissingSource {
                        name: container.clone(),
                        reason: e.to_string(),
                    }
                }
                other => other.into(),
            })?;
        let n = table.n_rows();
        Ok(FoldRows {
            table: Cow::Owned(table),
            ranges: vec![0..n],
            context: format!("{container}/{table_name}"),
        })
    }
}

/// One in-memory table with per-sample folds laid over it.
pub struct InMemoryFolds<'a> {
    pub table: &'a Table,
    pub folds: &'a IndexedFolds,
    pub selection: RowSelection,
}

impl FoldRowSource for InMemoryFolds<'_> {
    fn fold_rows(&self, fold: usize) -> Result<FoldRows<'_>> {
        Ok(FoldRows {
            table: Cow::Borrowed(self.table),
            ranges: self.folds.rows(fold, self.selection),
            context: format!("fold {fold} {:?} rows", self.selection),
        })
    }
}

#[derive(Debug, Clone)]
pub struct EnsembleHistogram {
    pub histogram: WeightedHistogram,
    /// Rows scored by each fold's model, fold 1 first.
    pub rows_per_fold: Vec<usize>,
}

/// Scores aligned 1:1 with the rows of a concatenated table.
#[derive(Debug, Clone, PartialEq)]
pub struct DiscriminantArray {
    values: Vec<f64>,
    multiplicity: Vec<u32>,
}

impl DiscriminantArray {
    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn values(&self) -> &[f64] {
        &self.values
    }

    /// Most fold models that scored any one row.
    pub fn max_multiplicity(&self) -> u32 {
        self.multiplicity.iter().copied().max().unwrap_or(0)
    }

    /// One sample's scores, cut out with the index the table was built with.
    pub fn for_sample(&self, index: &SampleIndex, name: &str) -> Option<&[f64]> {
        index.slice(name, &self.values)
    }
}

/// Runs every row of a selection through the K per-fold models.
pub struct EnsembleScorer<'a> {
    models: Vec<Box<dyn Scorer>>,
    features: &'a FeatureSet,
    weight_field: &'a str,
    scaler: Option<&'a FeatureScaler>,
}

impl<'a> EnsembleScorer<'a> {
    /// Loads all K models before any scoring. Any missing fold aborts: a
    /// partial ensemble would bias the aggregate.
    pub fn new(
        loader: &dyn ModelLoader,
        k_folds: usize,
        features: &'a FeatureSet,
        weight_field: &'a str,
    ) -> Result<Self> {
        if k_folds == 0 {
            return Err(PipelineError::invalid("k_folds must be >= 1"));
        }
        let models = (1..=k_folds)
            .into_par_iter()
            .map(|fold| load_checked(loader, fold, features))
            .collect::<Result<Vec<_>>>()?;
        tracing::info!(k_folds, "loaded fold models");
        Ok(Self {
            models,
            features,
            weight_field,
            scaler: None,
        })
    }

    pub fn with_scaler(mut self, scaler: Option<&'a FeatureScaler>) -> Self {
        self.scaler = scaler;
        self
    }

    pub fn k_folds(&self) -> usize {
        self.models.len()
    }

    fn score_ranges(
        &self,
        model: &dyn Scorer,
        resolved: &ResolvedFeatures<'_>,
        ranges: &[Range<usize>],
        mut sink: impl FnMut(usize, f64, f64),
    ) {
        for r in ranges {
            for row in r.clone() {
                let mut x = resolved.row(row);
                if let Some(scaler) = self.scaler {
                    scaler.apply(&mut x);
                }
                sink(row, model.score(&x), resolved.weight(row));
            }
        }
    }

    /// Fills one histogram per fold in parallel, then merges them in fold
    /// order. Weights are filled signed.
    pub fn fill_histogram(
        &self,
        source: &dyn FoldRowSource,
        binning: Binning,
    ) -> Result<EnsembleHistogram> {
        let partials = (1..=self.k_folds())
            .into_par_iter()
            .map(|fold| -> Result<(usize, WeightedHistogram)> {
                let rows = source.fold_rows(fold)?;
                let resolved = self
                    .features
                    .resolve(&rows.table, self.weight_field, &rows.context)?;
                check_ranges(&rows.ranges, resolved.n_rows(), &rows.context)?;
                let mut hist = WeightedHistogram::new(binning)?;
                let model = self.models[fold - 1].as_ref();
                let mut n = 0usize;
                self.score_ranges(model, &resolved, &rows.ranges, |_, score, weight| {
                    hist.fill(score, weight);
                    n += 1;
                });
                tracing::info!(
                    fold,
                    rows = n,
                    sum_weights = hist.total_weight(),
                    "scored fold"
                );
                Ok((n, hist))
            })
            .collect::<Result<Vec<_>>>()?;

        let mut histogram = WeightedHistogram::new(binning)?;
        let mut rows_per_fold = Vec::with_capacity(partials.len());
        for (n, partial) in &partials {
            histogram.merge(partial)?;
            rows_per_fold.push(*n);
        }
        Ok(EnsembleHistogram {
            histogram,
            rows_per_fold,
        })
    }

    /// Scores rows into their global slots. A row reached by several folds
    /// holds the mean of its scores; a row no fold reached is an error.
    pub fn score_array(
        &self,
        table: &Table,
        folds: &IndexedFolds,
        selection: RowSelection,
    ) -> Result<DiscriminantArray> {
        if folds.k_folds() != self.k_folds() {
            return Err(PipelineError::invalid(format!(
                "folds were built for K={}, ensemble has {} models",
                folds.k_folds(),
                self.k_folds()
            )));
        }
        let resolved = self
            .features
            .resolve(table, self.weight_field, "concatenated table")?;
        let n_rows = resolved.n_rows();

        let per_fold = (1..=self.k_folds())
            .into_par_iter()
            .map(|fold| -> Result<Vec<(usize, f64)>> {
                let ranges = folds.rows(fold, selection);
                check_ranges(&ranges, n_rows, "concatenated table")?;
                let mut out = Vec::with_capacity(ranges.iter().map(|r| r.len()).sum());
                let model = self.models[fold - 1].as_ref();
                self.score_ranges(model, &resolved, &ranges, |row, score, _| {
                    out.push((row, score));
                });
                tracing::info!(fold, rows = out.len(), "scored fold");
                Ok(out)
            })
            .collect::<Result<Vec<_>>>()?;

        let mut sums = vec![0.0f64; n_rows];
        let mut multiplicity = vec![0u32; n_rows];
        for scores in &per_fold {
            for &(row, score) in scores {
                sums[row] += score;
                multiplicity[row] += 1;
            }
        }
        if let Some(row) = multiplicity.iter().position(|&m| m == 0) {
            return Err(PipelineError::invalid(format!(
                "selection {selection:?} leaves row {row} unscored"
            )));
        }
        let values = sums
            .iter()
            .zip(&multiplicity)
            .map(|(s, &m)| if m == 1 { *s } else { s / m as f64 })
            .collect();
        Ok(DiscriminantArray {
            values,
            multiplicity,
        })
    }
}

fn check_ranges(ranges: &[Range<usize>], n_rows: usize, context: &str) -> Result<()> {
    match ranges.iter().find(|r| r.start > r.end || r.end > n_rows) {
        Some(r) => Err(PipelineError::invalid(format!(
            "row range {r:?} outside {context} ({n_rows} rows)"
        ))),
        None => Ok(()),
    }
}

#[cfg(test)]
#[path = "../../tests/src_inline/pipeline/stage4_ensemble.rs"]
mod tests;
