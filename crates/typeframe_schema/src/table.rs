//! Tables bound to a record schema.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use arrow::array::{new_null_array, Array, ArrayRef, BooleanArray, UInt32Array};
use arrow::compute::{filter_record_batch, take};
use arrow::datatypes::{Field, Schema};
use arrow::error::ArrowError;
use arrow::record_batch::{RecordBatch, RecordBatchOptions};
use arrow::util::pretty::pretty_format_batches;

use crate::coerce::{array_value, array_values};
use crate::error::Result;
use crate::registry::SchemaRegistry;
use crate::value::Value;

/// Outcome of the last conformance check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Validity {
    /// No schema attached; always valid.
    Unbound,
    /// Bound, not checked since construction or the last mutation.
    Unchecked,
    Valid,
    Invalid,
}

/// An Arrow record batch plus the schema it was built under.
#[derive(Debug, Clone)]
pub struct SchemaBoundTable {
    pub(crate) batch: RecordBatch,
    pub(crate) schema: Option<Arc<SchemaRegistry>>,
    pub(crate) validity: Validity,
}

impl SchemaBoundTable {
    /// Wrap a batch with no schema.
    pub fn unbound(batch: RecordBatch) -> Self {
        Self {
            batch,
            schema: None,
            validity: Validity::Unbound,
        }
    }

    pub(crate) fn bound(batch: RecordBatch, schema: Arc<SchemaRegistry>) -> Self {
        Self {
            batch,
            schema: Some(schema),
            validity: Validity::Unchecked,
        }
    }

    /// Same schema, new cells.
    fn derive(&self, batch: RecordBatch) -> Self {
        let validity = match self.schema {
            Some(_) => Validity::Unchecked,
            None => Validity::Unbound,
        };
        Self {
            batch,
            schema: self.schema.clone(),
            validity,
        }
    }

    pub(crate) fn touch(&mut self) {
        if self.schema.is_some() {
            self.validity = Validity::Unchecked;
        }
    }

    pub fn batch(&self) -> &RecordBatch {
        &self.batch
    }

    pub fn into_batch(self) -> RecordBatch {
        self.batch
    }

    pub fn schema(&self) -> Option<&Arc<SchemaRegistry>> {
        self.schema.as_ref()
    }

    /// Name of the record this table is bound to.
    pub fn record_name(&self) -> Option<&str> {
        self.schema.as_deref().map(SchemaRegistry::name)
    }

    pub fn validity(&self) -> Validity {
        self.validity
    }

    pub fn num_rows(&self) -> usize {
        self.batch.num_rows()
    }

    pub fn num_columns(&self) -> usize {
        self.batch.num_columns()
    }

    pub fn column_names(&self) -> Vec<String> {
        self.batch
            .schema()
            .fields()
            .iter()
            .map(|f| f.name().clone())
            .collect()
    }

    pub fn column(&self, name: &str) -> Option<&ArrayRef> {
        self.batch.column_by_name(name)
    }

    /// Replace column `name`, or append it if absent.
    ///
    /// On a zero-row table a longer column widens every other column with
    /// nulls. Otherwise the length must match.
    pub fn set_column(&mut self, name: &str, array: ArrayRef) -> Result<()> {
        let schema = self.batch.schema();
        let rows = array.len();
        let widen = self.batch.num_rows() == 0 && rows > 0;

        let mut fields: Vec<Field> = Vec::with_capacity(schema.fields().len() + 1);
        let mut columns: Vec<ArrayRef> = Vec::with_capacity(schema.fields().len() + 1);
        let mut replaced = false;

        for (field, column) in schema.fields().iter().zip(self.batch.columns()) {
            if field.name() == name {
                fields.push(Field::new(name, array.data_type().clone(), true));
                columns.push(Arc::clone(&array));
                replaced = true;
            } else if widen {
                fields.push(field.as_ref().clone().with_nullable(true));
                columns.push(new_null_array(field.data_type(), rows));
            } else {
                fields.push(field.as_ref().clone());
                columns.push(Arc::clone(column));
            }
        }
        if !replaced {
            fields.push(Field::new(name, array.data_type().clone(), true));
            columns.push(array);
        }

        let options = RecordBatchOptions::new().with_row_count(Some(rows));
        self.batch =
            RecordBatch::try_new_with_options(Arc::new(Schema::new(fields)), columns, &options)?;
        self.touch();
        Ok(())
    }

    /// First `n` rows.
    pub fn head(&self, n: usize) -> Self {
        self.slice(0, n)
    }

    /// Rows `offset..offset + len`, clamped to the table.
    pub fn slice(&self, offset: usize, len: usize) -> Self {
        let rows = self.batch.num_rows();
        let offset = offset.min(rows);
        let len = len.min(rows - offset);
        self.derive(self.batch.slice(offset, len))
    }

    /// Rows where `predicate` is true.
    pub fn filter(&self, predicate: &BooleanArray) -> Result<Self> {
        Ok(self.derive(filter_record_batch(&self.batch, predicate)?))
    }

    /// Inner join with `other` on the column `on`.
    ///
    /// Keeps this table's schema. Right-hand columns other than `on` are
    /// appended; a name clash gets a `_right` suffix. Null keys never match.
    pub fn merge(&self, other: &SchemaBoundTable, on: &str) -> Result<Self> {
        let missing = |table: &str| {
            ArrowError::InvalidArgumentError(format!("merge key '{}' missing from {} table", on, table))
        };
        let left_key = self.batch.column_by_name(on).ok_or_else(|| missing("left"))?;
        let right_key = other.batch.column_by_name(on).ok_or_else(|| missing("right"))?;

        let mut index: HashMap<String, Vec<u32>> = HashMap::new();
        for (row, value) in array_values(right_key.as_ref()).into_iter().enumerate() {
            if let Some(key) = join_key(&value) {
                index.entry(key).or_default().push(row as u32);
            }
        }

        let mut left_rows = Vec::new();
        let mut right_rows = Vec::new();
        for row in 0..left_key.len() {
            let Some(key) = join_key(&array_value(left_key.as_ref(), row)) else {
                continue;
            };
            if let Some(matches) = index.get(&key) {
                for &r in matches {
                    left_rows.push(row as u32);
                    right_rows.push(r);
                }
            }
        }
        let left_rows = UInt32Array::from(left_rows);
        let right_rows = UInt32Array::from(right_rows);

        let left_schema = self.batch.schema();
        let mut fields: Vec<Field> = Vec::new();
        let mut columns: Vec<ArrayRef> = Vec::new();
        for (field, column) in left_schema.fields().iter().zip(self.batch.columns()) {
            fields.push(field.as_ref().clone());
            columns.push(take(column.as_ref(), &left_rows, None)?);
        }

        let right_schema = other.batch.schema();
        for (field, column) in right_schema.fields().iter().zip(other.batch.columns()) {
            if field.name() == on {
                continue;
            }
            let name = if left_schema.column_with_name(field.name()).is_some() {
                format!("{}_right", field.name())
            } else {
                field.name().clone()
            };
            fields.push(Field::new(name, field.data_type().clone(), true));
            columns.push(take(column.as_ref(), &right_rows, None)?);
        }

        let options = RecordBatchOptions::new().with_row_count(Some(left_rows.len()));
        let batch =
            RecordBatch::try_new_with_options(Arc::new(Schema::new(fields)), columns, &options)?;
        Ok(self.derive(batch))
    }

    /// Row-major export.
    pub fn to_rows(&self) -> Vec<Vec<Value>> {
        (0..self.batch.num_rows())
            .map(|row| {
                self.batch
                    .columns()
                    .iter()
                    .map(|c| array_value(c.as_ref(), row))
                    .collect()
            })
            .collect()
    }

    pub fn column_values(&self, name: &str) -> Option<Vec<Value>> {
        self.column(name).map(|c| array_values(c.as_ref()))
    }

    /// Column-major export, in table column order.
    pub fn to_columns(&self) -> Vec<(String, Vec<Value>)> {
        self.column_names()
            .into_iter()
            .zip(self.batch.columns())
            .map(|(name, column)| (name, array_values(column.as_ref())))
            .collect()
    }
}

impl fmt::Display for SchemaBoundTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match pretty_format_batches(std::slice::from_ref(&self.batch)) {
            Ok(rendered) => write!(f, "{}", rendered),
            Err(_) => write!(f, "<{} rows>", self.batch.num_rows()),
        }
    }
}

fn join_key(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        other => other.text_form(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use arrow::array::{Int64Array, StringArray};

    fn people_batch() -> RecordBatch {
        RecordBatch::try_from_iter(vec![
            (
                "name",
                Arc::new(StringArray::from(vec!["John", "Snow", "Arya"])) as ArrayRef,
            ),
            ("age", Arc::new(Int64Array::from(vec![15, 40, 11])) as ArrayRef),
        ])
        .unwrap()
    }

    #[test]
    fn slicing_clamps_to_table() {
        let table = SchemaBoundTable::unbound(people_batch());
        assert_eq!(table.head(2).num_rows(), 2);
        assert_eq!(table.slice(2, 10).num_rows(), 1);
        assert_eq!(table.slice(5, 1).num_rows(), 0);
        assert_eq!(table.head(1).validity(), Validity::Unbound);
    }

    #[test]
    fn filter_keeps_matching_rows() {
        let table = SchemaBoundTable::unbound(people_batch());
        let adults = table
            .filter(&BooleanArray::from(vec![false, true, false]))
            .unwrap();
        assert_eq!(adults.column_values("name").unwrap(), vec![Value::from("Snow")]);
    }

    #[test]
    fn set_column_replaces_and_appends() {
        let mut table = SchemaBoundTable::unbound(people_batch());
        table
            .set_column("age", Arc::new(Int64Array::from(vec![1, 2, 3])))
            .unwrap();
        table
            .set_column("city", Arc::new(StringArray::from(vec!["a", "b", "c"])))
            .unwrap();
        assert_eq!(table.column_names(), vec!["name", "age", "city"]);
        assert_eq!(table.column_values("age").unwrap()[2], Value::Int(3));

        let err = table.set_column("age", Arc::new(Int64Array::from(vec![1])));
        assert!(err.is_err());
    }

    #[test]
    fn set_column_widens_empty_table() {
        let mut table = SchemaBoundTable::unbound(people_batch().slice(0, 0));
        table
            .set_column("name", Arc::new(StringArray::from(vec!["a", "b"])))
            .unwrap();
        assert_eq!(table.num_rows(), 2);
        assert_eq!(table.column_values("age").unwrap(), vec![Value::Null, Value::Null]);
    }

    #[test]
    fn merge_joins_on_key() {
        let left = SchemaBoundTable::unbound(people_batch());
        let jobs = RecordBatch::try_from_iter(vec![
            (
                "name",
                Arc::new(StringArray::from(vec![Some("Snow"), Some("John"), None])) as ArrayRef,
            ),
            (
                "job",
                Arc::new(StringArray::from(vec!["guard", "student", "nobody"])) as ArrayRef,
            ),
            ("age", Arc::new(Int64Array::from(vec![1, 2, 3])) as ArrayRef),
        ])
        .unwrap();
        let merged = left.merge(&SchemaBoundTable::unbound(jobs), "name").unwrap();
        assert_eq!(merged.column_names(), vec!["name", "age", "job", "age_right"]);
        assert_eq!(merged.num_rows(), 2);
        assert_eq!(
            merged.to_rows()[0],
            vec![Value::from("John"), Value::Int(15), Value::from("student"), Value::Int(2)]
        );
    }

    #[test]
    fn merge_requires_key_on_both_sides() {
        let left = SchemaBoundTable::unbound(people_batch());
        assert!(left.merge(&left, "missing").is_err());
    }
}
