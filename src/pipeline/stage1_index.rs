use std::ops::Range;

use serde::Serialize;

use crate::error::{PipelineError, Result};
use crate::input::{InputError, Table, TableStore};

/// One named input: table `table` inside container `container`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceSpec {
    pub name: String,
    pub container: String,
    pub table: String,
}

impl SourceSpec {
    pub fn new(
        name: impl Into<String>,
        container: impl Into<String>,
        table: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            container: container.into(),
            table: table.into(),
        }
    }
}

/// Half-open row ranges of each source inside one concatenated table, in
/// supply order. Offsets are only meaningful against the table they were
/// built with; reordering the sources invalidates them.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SampleIndex {
    entries: Vec<(String, Range<usize>)>,
}

impl SampleIndex {
    /// Appends `name` right after the last entry. Names are lookup keys, so a
    /// repeated name is rejected.
    pub fn push(&mut self, name: impl Into<String>, len: usize) -> Result<()> {
        let name = name.into();
        if self.entries.iter().any(|(n, _)| *n == name) {
            return Err(PipelineError::invalid(format!(
                "source '{name}' is indexed twice"
            )));
        }
        let start = self.total_rows();
        self.entries.push((name, start..start + len));
        Ok(())
    }

    pub fn range(&self, name: &str) -> Option<Range<usize>> {
        self.entries
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, r)| r.clone())
    }

    pub fn entries(&self) -> &[(String, Range<usize>)] {
        &self.entries
    }

    pub fn total_rows(&self) -> usize {
        self.entries.last().map(|(_, r)| r.end).unwrap_or(0)
    }

    /// The part of a row-aligned array that belongs to `name`. `None` for an
    /// unknown name; an empty slice when the source had no data.
    pub fn slice<'a, T>(&self, name: &str, values: &'a [T]) -> Option<&'a [T]> {
        let r = self.range(name)?;
        values.get(r)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SkippedSource {
    pub name: String,
    pub kind: &'static str,
    pub reason: String,
}

#[derive(Debug)]
pub struct IndexedSamples {
    pub table: Table,
    pub index: SampleIndex,
    pub skipped: Vec<SkippedSource>,
}

/// Loads every source, keeps `required` columns in that order and
/// concatenates in supply order. Unusable sources get a zero-length entry and
/// a diagnostic; only a run where nothing is usable fails.
pub fn build_index(
    store: &dyn TableStore,
    sources: &[SourceSpec],
    required: &[String],
) -> Result<IndexedSamples> {
    for (i, source) in sources.iter().enumerate() {
        if sources[..i].iter().any(|s| s.name == source.name) {
            return Err(PipelineError::invalid(format!(
                "source name '{}' is supplied twice",
                source.name
            )));
        }
    }

    let mut index = SampleIndex::default();
    let mut tables = Vec::with_capacity(sources.len());
    let mut skipped = Vec::new();

    for source in sources {
        match load_source(store, source, required) {
            Ok(table) => {
                tracing::info!(
                    sample = %source.name,
                    rows = table.n_rows(),
                    start = index.total_rows(),
                    "indexed source"
                );
                index.push(&source.name, table.n_rows())?;
                tables.push(table);
            }
            Err(err) => {
                tracing::warn!(
                    sample = %source.name,
                    kind = err.kind(),
                    "skipping source: {err}"
                );
                skipped.push(SkippedSource {
                    name: source.name.clone(),
                    kind: err.kind(),
                    reason: err.to_string(),
                });
                index.push(&source.name, 0)?;
            }
        }
    }

    if index.total_rows() == 0 {
        return Err(PipelineError::FatalEmptyInput(format!(
            "none of {} sources yielded rows",
            sources.len()
        )));
    }

    let table = Table::concat(&tables)?;
    tracing::info!(
        rows = table.n_rows(),
        sources = sources.len(),
        skipped = skipped.len(),
        "concatenated sources"
    );
    Ok(IndexedSamples {
        table,
        index,
        skipped,
    })
}

fn load_source(
    store: &dyn TableStore,
    source: &SourceSpec,
    required: &[String],
) -> Result<Table> {
    let raw = store
        .read_table(&source.container, &source.table)
        .map_err(|e| match e {
            InputError::MissingField { .. } => PipelineError::Input(e),
            other => PipelineError::MissingSource {
                name: source.name.clone(),
                reason: other.to_string(),
            },
        })?;
    let context = format!("{}/{}", source.container, source.table);
    raw.project(required, &context).map_err(|e| match e {
        InputError::MissingField { context, field } => {
            PipelineError::schema(context, format!("no field '{field}'"))
        }
        other => PipelineError::Input(other),
    })
}

#[cfg(test)]
#[path = "../../tests/src_inline/pipeline/stage1_index.rs"]
mod tests;
