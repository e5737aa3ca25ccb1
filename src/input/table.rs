use std::ops::Range;

use serde::{Deserialize, Serialize};

use crate::input::InputError;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Column {
    pub name: String,
    pub values: Vec<f64>,
}

impl Column {
    pub fn new(name: impl Into<String>, values: Vec<f64>) -> Self {
        Self {
            name: name.into(),
            values,
        }
    }
}

/// Column-major event table. Every column has the same length and row order
/// is significant: selection and concatenation keep rows in their original
/// relative order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Table {
    columns: Vec<Column>,
}

impl Table {
    pub fn new(columns: Vec<Column>) -> Result<Self, InputError> {
        let table = Self { columns };
        table.validate()?;
        Ok(table)
    }

    /// Checks column lengths and name uniqueness. Tables decoded from a store
    /// go through this before use.
    pub fn validate(&self) -> Result<(), InputError> {
        if let Some(first) = self.columns.first() {
            let n = first.values.len();
            for col in &self.columns {
                if col.values.len() != n {
                    return Err(InputError::InvalidInput(format!(
                        "column '{}' has {} rows, expected {}",
                        col.name,
                        col.values.len(),
                        n
                    )));
                }
            }
        }
        for (i, col) in self.columns.iter().enumerate() {
            if self.columns[..i].iter().any(|c| c.name == col.name) {
                return Err(InputError::InvalidInput(format!(
                    "duplicate column '{}'",
                    col.name
                )));
            }
        }
        Ok(())
    }

    pub fn n_rows(&self) -> usize {
        self.columns.first().map(|c| c.values.len()).unwrap_or(0)
    }

    pub fn n_columns(&self) -> usize {
        self.columns.len()
    }

    pub fn column_names(&self) -> impl Iterator<Item = &str> {
        self.columns.iter().map(|c| c.name.as_str())
    }

    pub fn column(&self, name: &str) -> Option<&[f64]> {
        self.columns
            .iter()
            .find(|c| c.name == name)
            .map(|c| c.values.as_slice())
    }

    /// Keeps only `names`, in that order. Fails on the first absent field.
    pub fn project(&self, names: &[String], context: &str) -> Result<Table, InputError> {
        let mut columns = Vec::with_capacity(names.len());
        for name in names {
            let values = self.column(name).ok_or_else(|| InputError::MissingField {
                context: context.to_string(),
                field: name.clone(),
            })?;
            columns.push(Column::new(name.clone(), values.to_vec()));
        }
        Ok(Table { columns })
    }

    /// Rows covered by `ranges`, in the order the ranges are given.
    pub fn select_ranges(&self, ranges: &[Range<usize>]) -> Table {
        let n: usize = ranges.iter().map(|r| r.len()).sum();
        let columns = self
            .columns
            .iter()
            .map(|col| {
                let mut values = Vec::with_capacity(n);
                for r in ranges {
                    values.extend_from_slice(&col.values[r.clone()]);
                }
                Column::new(col.name.clone(), values)
            })
            .collect();
        Table { columns }
    }

    /// Appends tables that share the exact same column order. An empty
    /// column list stands for "no data" and is skipped.
    pub fn concat(tables: &[Table]) -> Result<Table, InputError> {
        let Some(first) = tables.iter().find(|t| t.n_columns() > 0) else {
            return Ok(Table::default());
        };
        let names: Vec<&str> = first.column_names().collect();
        let total: usize = tables.iter().map(|t| t.n_rows()).sum();
        let mut columns: Vec<Column> = names
            .iter()
            .map(|name| Column::new(*name, Vec::with_capacity(total)))
            .collect();
        for table in tables {
            if table.n_columns() == 0 {
                continue;
            }
            let other: Vec<&str> = table.column_names().collect();
            if other != names {
                return Err(InputError::InvalidInput(format!(
                    "cannot concatenate tables with schemas {:?} and {:?}",
                    names, other
                )));
            }
            for (dst, src) in columns.iter_mut().zip(&table.columns) {
                dst.values.extend_from_slice(&src.values);
            }
        }
        Ok(Table { columns })
    }
}
