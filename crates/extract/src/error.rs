//! Error types for schema definition, extraction calls and response formatting.

use std::time::Duration;
use thiserror::Error;

use crate::schema::FieldType;

/// Raised while editing or compiling a schema. A failed edit commits nothing.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SchemaError {
    #[error("field '{name}' is already defined")]
    DuplicateField { name: String },

    #[error("unsupported field type '{given}' (expected string, boolean, integer or float)")]
    InvalidType { given: String },

    #[error("field name must not be blank")]
    EmptyName,

    #[error("schema has no fields")]
    EmptySchema,

    #[error("schema is limited to {limit} fields")]
    TooManyFields { limit: usize },
}

/// Raised by an [`ExtractionClient`](crate::client::ExtractionClient).
#[derive(Debug, Error)]
pub enum ExtractionError {
    /// Missing or rejected API key
    #[error("authentication failed: {0}")]
    Auth(String),

    /// The service answered with a failure
    #[error("extraction service error{}: {message}", .status.map(|s| format!(" ({s})")).unwrap_or_default())]
    Upstream { status: Option<u16>, message: String },

    #[error("extraction timed out after {after:?}")]
    Timeout { after: Duration },

    #[error("malformed response from extraction service: {0}")]
    MalformedResponse(String),

    /// Connection-level failure before any response arrived
    #[error("could not reach extraction service: {0}")]
    Transport(String),

    #[error("invalid URL '{url}': {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("prompt must not be empty")]
    EmptyPrompt,
}

/// Raised while shaping a payload into a table or serializing a table.
#[derive(Debug, Error)]
pub enum FormattingError {
    #[error("required field '{0}' is missing from the response")]
    MissingRequiredField(String),

    #[error("field '{field}' could not be read as {expected}: {value}")]
    TypeCoercion {
        field: String,
        expected: FieldType,
        value: String,
    },

    #[error("unexpected payload shape: {0}")]
    UnsupportedPayload(String),

    #[error("JSON export failed: {0}")]
    Json(#[from] serde_json::Error),

    #[error("CSV export failed: {0}")]
    Csv(#[from] csv::Error),
}

/// Everything that can fail a single chat turn.
#[derive(Debug, Error)]
pub enum AskError {
    #[error(transparent)]
    Extraction(#[from] ExtractionError),

    #[error(transparent)]
    Formatting(#[from] FormattingError),
}
