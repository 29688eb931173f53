//! Column declarations.

use std::fmt;

use arrow::datatypes::{DataType, Field};
use serde::{Deserialize, Serialize};

use crate::error::SchemaError;
use crate::value::Value;

/// Logical type of a declared column, independent of storage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogicalType {
    #[serde(alias = "str", alias = "text")]
    String,
    #[serde(alias = "int")]
    Integer,
    #[serde(alias = "double")]
    Float,
    Date,
    #[serde(alias = "bool")]
    Boolean,
}

impl LogicalType {
    /// Arrow storage type a conforming column must have.
    pub fn arrow_type(&self) -> DataType {
        match self {
            LogicalType::String => DataType::Utf8,
            LogicalType::Integer => DataType::Int64,
            LogicalType::Float => DataType::Float64,
            LogicalType::Date => DataType::Date32,
            LogicalType::Boolean => DataType::Boolean,
        }
    }

    /// DuckDB column type used in derived table definitions.
    pub fn sql_type(&self) -> &'static str {
        match self {
            LogicalType::String => "VARCHAR",
            LogicalType::Integer => "BIGINT",
            LogicalType::Float => "DOUBLE",
            LogicalType::Date => "DATE",
            LogicalType::Boolean => "BOOLEAN",
        }
    }
}

impl fmt::Display for LogicalType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LogicalType::String => "string",
            LogicalType::Integer => "integer",
            LogicalType::Float => "float",
            LogicalType::Date => "date",
            LogicalType::Boolean => "boolean",
        };
        f.write_str(name)
    }
}

/// Source tokens standing for `true` and `false` in a boolean column.
#[derive(Debug, Clone, PartialEq)]
pub struct BoolTokens {
    pub true_token: Value,
    pub false_token: Value,
}

/// One declared column.
///
/// ```
/// use typeframe_schema::ColumnSpec;
///
/// let staff = ColumnSpec::boolean("is_staff").tokens("yes", "no");
/// let joined = ColumnSpec::date("insertion_date").format("%d-%m-%Y");
/// let id = ColumnSpec::integer("id").unique().target_name("ID");
/// assert_eq!(id.source_name(), "ID");
/// # let _ = (staff, joined);
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnSpec {
    name: String,
    target_name: Option<String>,
    logical_type: LogicalType,
    date_format: Option<String>,
    bool_tokens: Option<BoolTokens>,
    unique: bool,
}

impl ColumnSpec {
    pub fn new(name: impl Into<String>, logical_type: LogicalType) -> Self {
        Self {
            name: name.into(),
            target_name: None,
            logical_type,
            date_format: None,
            bool_tokens: None,
            unique: false,
        }
    }

    pub fn string(name: impl Into<String>) -> Self {
        Self::new(name, LogicalType::String)
    }

    pub fn integer(name: impl Into<String>) -> Self {
        Self::new(name, LogicalType::Integer)
    }

    pub fn float(name: impl Into<String>) -> Self {
        Self::new(name, LogicalType::Float)
    }

    pub fn date(name: impl Into<String>) -> Self {
        Self::new(name, LogicalType::Date)
    }

    pub fn boolean(name: impl Into<String>) -> Self {
        Self::new(name, LogicalType::Boolean)
    }

    /// Make this column part of the persistence key.
    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    /// chrono `strftime` pattern for parsing textual dates.
    pub fn format(mut self, pattern: impl Into<String>) -> Self {
        self.date_format = Some(pattern.into());
        self
    }

    /// Source values that mean `true` and `false`.
    pub fn tokens(mut self, true_token: impl Into<Value>, false_token: impl Into<Value>) -> Self {
        self.bool_tokens = Some(BoolTokens {
            true_token: true_token.into(),
            false_token: false_token.into(),
        });
        self
    }

    /// Read this column from `field` in the source.
    pub fn target_name(mut self, field: impl Into<String>) -> Self {
        self.target_name = Some(field.into());
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Field name read from sources; the declared name unless renamed.
    pub fn source_name(&self) -> &str {
        self.target_name.as_deref().unwrap_or(&self.name)
    }

    pub fn logical_type(&self) -> LogicalType {
        self.logical_type
    }

    pub fn date_format(&self) -> Option<&str> {
        self.date_format.as_deref()
    }

    pub fn bool_tokens(&self) -> Option<&BoolTokens> {
        self.bool_tokens.as_ref()
    }

    pub fn is_unique(&self) -> bool {
        self.unique
    }

    pub fn arrow_field(&self) -> Field {
        Field::new(&self.name, self.logical_type.arrow_type(), true)
    }

    pub(crate) fn check(&self, record: &str) -> Result<(), SchemaError> {
        if self.name.trim().is_empty() {
            return Err(SchemaError::EmptyColumnName {
                record: record.to_string(),
            });
        }
        if self.date_format.is_some() && self.logical_type != LogicalType::Date {
            return Err(SchemaError::FormatOnNonDate {
                column: self.name.clone(),
                logical_type: self.logical_type,
            });
        }
        if self.bool_tokens.is_some() && self.logical_type != LogicalType::Boolean {
            return Err(SchemaError::TokensOnNonBoolean {
                column: self.name.clone(),
                logical_type: self.logical_type,
            });
        }
        Ok(())
    }
}
