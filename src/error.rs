use thiserror::Error;

use crate::input::InputError;

/// Run-level error. `kind()` is the stable name reported to callers so a
/// failed run can be told apart as "no data", "corrupt model" or "bad
/// configuration" without parsing the message.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("missing source '{name}': {reason}")]
    MissingSource { name: String, reason: String },

    #[error("schema mismatch in {context}: {detail}")]
    SchemaMismatch { context: String, detail: String },

    #[error("no usable input: {0}")]
    FatalEmptyInput(String),

    #[error("missing model for fold {fold} ({path}): {reason}")]
    MissingModel {
        fold: usize,
        path: String,
        reason: String,
    },

    #[error(transparent)]
    Input(#[from] InputError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl PipelineError {
    pub fn kind(&self) -> &'static str {
        match self {
            PipelineError::InvalidArgument(_) => "invalid_argument",
            PipelineError::MissingSource { .. } => "missing_source",
            PipelineError::SchemaMismatch { .. } => "schema_mismatch",
            PipelineError::FatalEmptyInput(_) => "fatal_empty_input",
            PipelineError::MissingModel { .. } => "missing_model",
            PipelineError::Input(e) => e.kind(),
            PipelineError::Io(_) | PipelineError::Json(_) => "io",
        }
    }

    /// Process exit code for a run aborted with this error.
    pub fn exit_code(&self) -> i32 {
        match self.kind() {
            "invalid_argument" => 2,
            "missing_source" => 3,
            "schema_mismatch" => 4,
            "fatal_empty_input" => 5,
            "missing_model" => 6,
            _ => 1,
        }
    }

    pub fn invalid(msg: impl Into<String>) -> Self {
        PipelineError::InvalidArgument(msg.into())
    }

    pub fn schema(context: impl Into<String>, detail: impl Into<String>) -> Self {
        PipelineError::SchemaMismatch {
            context: context.into(),
            detail: detail.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, PipelineError>;
