//! Error types for declaring, loading, checking and saving tables.

use arrow::error::ArrowError;
use thiserror::Error;
use typeframe_db::DbError;

use crate::column::LogicalType;

/// Result alias used throughout this crate.
pub type Result<T> = std::result::Result<T, FrameError>;

/// Top-level error for table operations.
///
/// Collaborator errors (DuckDB, csv, Arrow, I/O) pass through unchanged.
#[derive(Debug, Error)]
pub enum FrameError {
    /// Persistence was requested on a record declared without a target.
    #[error("record '{record}' has no persistence target; declare one with SchemaBuilder::persist")]
    MissingDecorator { record: String },

    /// A persistence target exists but lacks a required argument.
    #[error("persistence target of record '{record}' is missing its {argument}")]
    MissingArguments {
        record: String,
        argument: &'static str,
    },

    /// Upsert or keyed index requested on a record without unique columns.
    #[error("record '{record}' declares no unique column to key on")]
    MissingUniqueField { record: String },

    /// `IfExists::Replace` is refused; it would drop the backing table.
    #[error("if_exists=replace is not supported: it would drop table '{table}'")]
    ReplaceRejected { table: String },

    #[error(transparent)]
    Coercion(#[from] CoercionError),

    #[error(transparent)]
    Schema(#[from] SchemaError),

    #[error(transparent)]
    Db(#[from] DbError),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Arrow error: {0}")]
    Arrow(#[from] ArrowError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid TOML declaration: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("invalid JSON declaration: {0}")]
    Json(#[from] serde_json::Error),
}

/// A value could not be turned into its column's logical type.
#[derive(Debug, Error)]
pub enum CoercionError {
    #[error("column '{column}' row {row}: cannot read {value} as {expected}")]
    Unparsable {
        column: String,
        row: usize,
        value: String,
        expected: LogicalType,
    },

    #[error("column '{column}' row {row}: {value} matches neither boolean token")]
    UnmappedToken {
        column: String,
        row: usize,
        value: String,
    },

    #[error("column '{column}' is missing from the source")]
    MissingColumn { column: String },

    #[error("row {row} has {actual} values, expected {expected}")]
    Arity {
        row: usize,
        expected: usize,
        actual: usize,
    },

    #[error("column '{column}': {source}")]
    Cast {
        column: String,
        #[source]
        source: ArrowError,
    },
}

/// Invalid record declaration, reported by `SchemaBuilder::compile`.
#[derive(Debug, Error)]
pub enum SchemaError {
    #[error("record '{record}' declares no columns")]
    EmptySchema { record: String },

    #[error("record name must not be empty")]
    EmptyRecordName,

    #[error("record '{record}' has a column with an empty name")]
    EmptyColumnName { record: String },

    #[error("record '{record}' declares column '{column}' twice")]
    DuplicateColumn { record: String, column: String },

    #[error("column '{column}' is {logical_type}; a date format only applies to date columns")]
    FormatOnNonDate {
        column: String,
        logical_type: LogicalType,
    },

    #[error("column '{column}' is {logical_type}; true/false tokens only apply to boolean columns")]
    TokensOnNonBoolean {
        column: String,
        logical_type: LogicalType,
    },

    #[error("column '{column}' declares only one of the true/false tokens")]
    IncompleteTokens { column: String },
}
