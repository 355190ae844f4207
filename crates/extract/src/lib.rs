//! Schema-driven website extraction.
//!
//! A [`SchemaBuilder`] collects typed fields and compiles them into a
//! [`SchemaContract`]. An [`ExtractionClient`] sends the contract with a URL
//! and a prompt to the extraction service, and [`ResponseFormatter`] turns the
//! returned payload into a typed table that exports to JSON, CSV or Markdown.
//! [`ChatSession`] strings these together one question at a time.

pub mod client;
pub mod error;
pub mod formatter;
pub mod schema;
pub mod session;
pub mod value;

pub use client::{ExtractionClient, FirecrawlClient, validate_request};
pub use error::{AskError, ExtractionError, FormattingError, SchemaError};
pub use formatter::{ExtractionResult, ResponseFormatter, Row, TabularResult};
pub use schema::{FieldSpec, FieldType, SchemaBuilder, SchemaContract};
pub use session::{ChatSession, ChatTurn, TurnOutcome};
pub use value::FieldValue;
