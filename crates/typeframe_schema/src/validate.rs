//! Conformance checks and in-place coercion.

use std::fmt;
use std::sync::Arc;

use arrow::array::ArrayRef;
use arrow::datatypes::{DataType, Field, Schema};
use arrow::record_batch::{RecordBatch, RecordBatchOptions};
use tracing::{debug, warn};

use crate::coerce::coerce_array;
use crate::error::{CoercionError, Result};
use crate::registry::SchemaRegistry;
use crate::table::{SchemaBoundTable, Validity};

/// One way a table fails to conform to its schema.
///
/// Never raised; returned by [`SchemaBoundTable::validation_report`] and
/// logged by [`SchemaBoundTable::is_valid`].
#[derive(Debug, Clone, PartialEq)]
pub enum ValidationError {
    MissingColumn {
        column: String,
    },
    UndeclaredColumn {
        column: String,
    },
    TypeMismatch {
        column: String,
        expected: DataType,
        actual: DataType,
    },
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValidationError::MissingColumn { column } => {
                write!(f, "declared column '{}' is missing", column)
            }
            ValidationError::UndeclaredColumn { column } => {
                write!(f, "column '{}' is not declared", column)
            }
            ValidationError::TypeMismatch {
                column,
                expected,
                actual,
            } => write!(
                f,
                "column '{}' has type {}, expected {}",
                column, actual, expected
            ),
        }
    }
}

impl std::error::Error for ValidationError {}

impl SchemaBoundTable {
    /// Every mismatch between the table and its schema. Empty when unbound.
    pub fn validation_report(&self) -> Vec<ValidationError> {
        let Some(schema) = self.schema.as_deref() else {
            return Vec::new();
        };
        let batch_schema = self.batch.schema();
        let mut errors = Vec::new();

        for spec in schema.columns() {
            let expected = spec.logical_type().arrow_type();
            match batch_schema.field_with_name(spec.name()) {
                Ok(field) if field.data_type() == &expected => {}
                Ok(field) => errors.push(ValidationError::TypeMismatch {
                    column: spec.name().to_string(),
                    expected,
                    actual: field.data_type().clone(),
                }),
                Err(_) => errors.push(ValidationError::MissingColumn {
                    column: spec.name().to_string(),
                }),
            }
        }
        for field in batch_schema.fields() {
            if schema.column(field.name()).is_none() {
                errors.push(ValidationError::UndeclaredColumn {
                    column: field.name().clone(),
                });
            }
        }
        errors
    }

    /// Check column types against the schema and record the verdict.
    ///
    /// Cells are never touched. Unbound tables are always valid.
    pub fn is_valid(&mut self) -> bool {
        if self.schema.is_none() {
            self.validity = Validity::Unbound;
            return true;
        }

        let errors = self.validation_report();
        let record = self.record_name().unwrap_or_default().to_string();
        for error in &errors {
            warn!(record = %record, "{}", error);
        }
        self.validity = if errors.is_empty() {
            Validity::Valid
        } else {
            Validity::Invalid
        };
        errors.is_empty()
    }

    /// Coerce every declared column to its storage type, then re-check.
    ///
    /// With `from_schema`, the table is first rebound to that schema.
    /// Columns are reordered to declaration order; undeclared columns are
    /// kept after them. Fails if a declared column is missing or holds a
    /// value that cannot be converted.
    pub fn validate(&mut self, from_schema: Option<Arc<SchemaRegistry>>) -> Result<&mut Self> {
        if let Some(schema) = from_schema {
            debug!(record = %schema.name(), "rebinding table");
            self.schema = Some(schema);
        }
        let Some(schema) = self.schema.clone() else {
            self.validity = Validity::Unbound;
            return Ok(self);
        };

        let batch_schema = self.batch.schema();
        let mut fields: Vec<Field> = Vec::with_capacity(batch_schema.fields().len());
        let mut columns: Vec<ArrayRef> = Vec::with_capacity(batch_schema.fields().len());

        for spec in schema.columns() {
            let array = self
                .batch
                .column_by_name(spec.name())
                .ok_or_else(|| CoercionError::MissingColumn {
                    column: spec.name().to_string(),
                })?;
            fields.push(spec.arrow_field());
            columns.push(coerce_array(spec, array)?);
        }
        for (field, column) in batch_schema.fields().iter().zip(self.batch.columns()) {
            if schema.column(field.name()).is_none() {
                fields.push(field.as_ref().clone());
                columns.push(Arc::clone(column));
            }
        }

        let options = RecordBatchOptions::new().with_row_count(Some(self.batch.num_rows()));
        self.batch =
            RecordBatch::try_new_with_options(Arc::new(Schema::new(fields)), columns, &options)?;
        self.is_valid();
        Ok(self)
    }
}
