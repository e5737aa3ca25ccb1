use thiserror::Error;

pub mod store;
pub mod table;

pub use store::{JsonStore, NamedTable, TableStore};
pub use table::{Column, Table};

#[derive(Debug, Error)]
pub enum InputError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("parse error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("container not found: {0}")]
    MissingContainer(String),

    #[error("table '{table}' not found in container '{container}'")]
    MissingTable { container: String, table: String },

    #[error("field '{field}' missing from {context}")]
    MissingField { context: String, field: String },

    #[error("invalid input: {0}")]
    InvalidInput(String),
}

impl InputError {
    /// Maps store failures onto the run-level error kinds.
    pub fn kind(&self) -> &'static str {
        match self {
            InputError::MissingContainer(_) | InputError::MissingTable { .. } => "missing_source",
            InputError::MissingField { .. } => "schema_mismatch",
            InputError::InvalidInput(_) => "invalid_argument",
            InputError::Io(_) | InputError::Json(_) => "io",
        }
    }
}

#[cfg(test)]
#[path = "../../tests/src_inline/input/tests.rs"]
mod tests;
