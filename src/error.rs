//! Error types for askql.

use thiserror::Error;

use crate::template::{SlotKind, TemplateId};

/// The main error type for askql operations.
#[derive(Debug, Error)]
pub enum AskqlError {
    /// Schema metadata could not be read from the database.
    #[error("Schema introspection failed: {0}")]
    SchemaIntrospection(String),

    /// No template with the given id exists in the corpus.
    #[error("Template {0} not found in corpus")]
    TemplateNotFound(TemplateId),

    /// A template draft violated a corpus invariant.
    #[error("Invalid template '{pattern}': {reason}")]
    InvalidTemplate { pattern: String, reason: String },

    /// A required slot had no candidate entity. Recovered by falling back
    /// to the next-ranked template.
    #[error("Could not resolve required slot '{slot}' ({kind}) for pattern '{pattern}'")]
    UnresolvedSlot {
        slot: String,
        kind: SlotKind,
        pattern: String,
    },

    /// An extracted mention does not map to any real schema element.
    #[error("'{name}' is not a known {kind} in the schema")]
    UnknownSchemaElement { kind: &'static str, name: String },

    /// No template within the retry budget produced a valid composition.
    #[error("Cannot translate question: '{question}'")]
    UnsupportedQuery {
        question: String,
        /// Patterns of the nearest-ranked templates, best first.
        nearest: Vec<String>,
        /// Slot kinds that went unresolved while trying candidates.
        missing: Vec<SlotKind>,
    },

    /// Corrected SQL could not be generalized into a template.
    /// The corpus is left unchanged.
    #[error("Feedback rejected: {0}")]
    FeedbackConflict(String),

    /// Execution-boundary failure, passed through with the composed SQL
    /// attached for diagnosis.
    #[error("SQL execution failed: {message}\n  sql: {sql}")]
    SqlExecution { message: String, sql: String },

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl AskqlError {
    /// Create an introspection error from any sqlx failure.
    pub fn introspection(err: impl std::fmt::Display) -> Self {
        Self::SchemaIntrospection(err.to_string())
    }

    /// Create an execution error carrying the statement that failed.
    pub fn execution(err: impl std::fmt::Display, sql: impl Into<String>) -> Self {
        Self::SqlExecution {
            message: err.to_string(),
            sql: sql.into(),
        }
    }

    /// True for the failures the pipeline recovers from by trying the
    /// next-ranked template.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::UnresolvedSlot { .. } | Self::UnknownSchemaElement { .. }
        )
    }
}

/// Result type alias for askql operations.
pub type AskqlResult<T> = Result<T, AskqlError>;
