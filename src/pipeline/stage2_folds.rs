use std::ops::Range;
use std::path::PathBuf;

use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::error::{PipelineError, Result};
use crate::input::{NamedTable, Table, TableStore};
use crate::pipeline::stage1_index::SampleIndex;

pub const TEST_TABLE: &str = "test";
pub const TRAINING_TABLE: &str = "training";
pub const VALIDATION_TABLE: &str = "validation";

/// Which rows of a fold a pass works on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum RowSelection {
    Test,
    Validation,
    Training,
    All,
}

impl RowSelection {
    /// Table holding this selection in a persisted fold container.
    pub fn table_name(self) -> Result<&'static str> {
        match self {
            RowSelection::Test => Ok(TEST_TABLE),
            RowSelection::Validation => Ok(VALIDATION_TABLE),
            RowSelection::Training => Ok(TRAINING_TABLE),
            RowSelection::All => Err(PipelineError::invalid(
                "fold containers hold no 'all' table; use the in-memory path",
            )),
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            RowSelection::Test => "Test",
            RowSelection::Validation => "Val",
            RowSelection::Training => "Train",
            RowSelection::All => "All",
        }
    }
}

/// Row sets of fold `id` (1-based) over `0..n_rows`. `validation` is the
/// next fold's test range, so for K > 2 it lies inside `training`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fold {
    pub id: usize,
    pub k_folds: usize,
    pub n_rows: usize,
    pub test: Range<usize>,
    pub validation: Range<usize>,
}

impl Fold {
    /// Complement of `test`, as up to two increasing ranges.
    pub fn training(&self) -> Vec<Range<usize>> {
        [0..self.test.start, self.test.end..self.n_rows]
            .into_iter()
            .filter(|r| !r.is_empty())
            .collect()
    }

    pub fn rows(&self, selection: RowSelection) -> Vec<Range<usize>> {
        match selection {
            RowSelection::Test => vec![self.test.clone()],
            RowSelection::Validation => vec![self.validation.clone()],
            RowSelection::Training => self.training(),
            RowSelection::All => vec![0..self.n_rows],
        }
    }

    pub fn container_name(sample: &str, fold: usize) -> String {
        format!("{sample}_fold{fold}")
    }
}

/// Fold `i` (0-based) gets `n / k + 1` rows when `i < n % k`, else `n / k`,
/// laid out contiguously from row 0.
pub fn fold_ranges(n_entries: usize, k_folds: usize) -> Result<Vec<Range<usize>>> {
    if k_folds == 0 {
        return Err(PipelineError::invalid("k_folds must be >= 1"));
    }
    let base = n_entries / k_folds;
    let rem = n_entries % k_folds;
    let mut out = Vec::with_capacity(k_folds);
    let mut start = 0usize;
    for i in 0..k_folds {
        let len = base + usize::from(i < rem);
        out.push(start..start + len);
        start += len;
    }
    Ok(out)
}

pub fn partition(n_entries: usize, k_folds: usize) -> Result<Vec<Fold>> {
    let ranges = fold_ranges(n_entries, k_folds)?;
    Ok((0..k_folds)
        .map(|i| Fold {
            id: i + 1,
            k_folds,
            n_rows: n_entries,
            test: ranges[i].clone(),
            validation: ranges[(i + 1) % k_folds].clone(),
        })
        .collect())
}

/// Writes one container `{sample}_fold{f}` per fold with the `test`,
/// `training` and `validation` tables. Folds are written in parallel; each
/// container lands atomically.
pub fn materialize_folds(
    store: &dyn TableStore,
    sample: &str,
    table: &Table,
    folds: &[Fold],
) -> Result<Vec<PathBuf>> {
    if let Some(bad) = folds.iter().find(|f| f.n_rows != table.n_rows()) {
        return Err(PipelineError::invalid(format!(
            "fold {} was partitioned for {} rows, table has {}",
            bad.id,
            bad.n_rows,
            table.n_rows()
        )));
    }
    folds
        .par_iter()
        .map(|fold| -> Result<PathBuf> {
            let tables = [
                NamedTable::new(TEST_TABLE, table.select_ranges(&fold.rows(RowSelection::Test))),
                NamedTable::new(
                    TRAINING_TABLE,
                    table.select_ranges(&fold.rows(RowSelection::Training)),
                ),
                NamedTable::new(
                    VALIDATION_TABLE,
                    table.select_ranges(&fold.rows(RowSelection::Validation)),
                ),
            ];
            let name = Fold::container_name(sample, fold.id);
            let path = store.write_container(&name, &tables)?;
            tracing::info!(
                sample,
                fold = fold.id,
                test = tables[0].table.n_rows(),
                training = tables[1].table.n_rows(),
                validation = tables[2].table.n_rows(),
                "wrote fold container"
            );
            Ok(path)
        })
        .collect()
}

/// Per-sample folds laid over a concatenated table: every source range is
/// partitioned on its own, exactly as when that sample was split alone, and
/// shifted by the source's offset.
#[derive(Debug, Clone)]
pub struct IndexedFolds {
    k_folds: usize,
    per_source: Vec<(usize, Vec<Fold>)>,
}

impl IndexedFolds {
    pub fn new(index: &SampleIndex, k_folds: usize) -> Result<Self> {
        let mut per_source = Vec::with_capacity(index.entries().len());
        for (_, range) in index.entries() {
            per_source.push((range.start, partition(range.len(), k_folds)?));
        }
        Ok(Self { k_folds, per_source })
    }

    pub fn k_folds(&self) -> usize {
        self.k_folds
    }

    /// Global row ranges of fold `fold` (1-based) for `selection`.
    pub fn rows(&self, fold: usize, selection: RowSelection) -> Vec<Range<usize>> {
        let mut out = Vec::new();
        for (offset, folds) in &self.per_source {
            let Some(f) = folds.get(fold.wrapping_sub(1)) else {
                continue;
            };
            for r in f.rows(selection) {
                if !r.is_empty() {
                    out.push(offset + r.start..offset + r.end);
                }
            }
        }
        out
    }
}

#[cfg(test)]
#[path = "../../tests/src_inline/pipeline/stage2_folds.rs"]
mod tests;
