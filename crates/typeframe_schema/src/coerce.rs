//! Value coercion into declared column types.
//!
//! Two entry points: [`build_column`] turns raw source values into a typed
//! Arrow array (ingestion), [`coerce_array`] converts an existing array in
//! place of a column (validation).

use std::sync::Arc;

use arrow::array::{
    Array, ArrayRef, AsArray, BooleanArray, Date32Array, Float64Array, Int64Array, StringArray,
};
use arrow::compute::{cast_with_options, CastOptions};
use arrow::datatypes::{
    DataType, Date32Type, Date64Type, Float32Type, Float64Type, Int16Type, Int32Type, Int64Type,
    Int8Type, UInt16Type, UInt32Type, UInt64Type, UInt8Type,
};
use arrow::util::display::array_value_to_string;
use chrono::{DateTime, NaiveDate, NaiveDateTime};

use crate::column::{ColumnSpec, LogicalType};
use crate::error::CoercionError;
use crate::value::Value;

const ISO_DATE: &str = "%Y-%m-%d";
const ISO_DATETIME_FORMATS: &[&str] = &["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"];

/// Parse a textual date, with `format` if given, otherwise ISO forms.
pub fn parse_date(text: &str, format: Option<&str>) -> Option<NaiveDate> {
    let text = text.trim();
    if let Some(format) = format {
        return NaiveDate::parse_from_str(text, format)
            .ok()
            .or_else(|| {
                NaiveDateTime::parse_from_str(text, format)
                    .ok()
                    .map(|dt| dt.date())
            });
    }

    if let Ok(date) = NaiveDate::parse_from_str(text, ISO_DATE) {
        return Some(date);
    }
    for fmt in ISO_DATETIME_FORMATS {
        if let Ok(dt) = NaiveDateTime::parse_from_str(text, fmt) {
            return Some(dt.date());
        }
    }
    DateTime::parse_from_rfc3339(text)
        .ok()
        .map(|dt| dt.date_naive())
}

/// Read one cell of an Arrow array as a [`Value`].
pub fn array_value(array: &dyn Array, row: usize) -> Value {
    if array.is_null(row) {
        return Value::Null;
    }
    match array.data_type() {
        DataType::Boolean => Value::Bool(array.as_boolean().value(row)),
        DataType::Int8 => Value::Int(array.as_primitive::<Int8Type>().value(row) as i64),
        DataType::Int16 => Value::Int(array.as_primitive::<Int16Type>().value(row) as i64),
        DataType::Int32 => Value::Int(array.as_primitive::<Int32Type>().value(row) as i64),
        DataType::Int64 => Value::Int(array.as_primitive::<Int64Type>().value(row)),
        DataType::UInt8 => Value::Int(array.as_primitive::<UInt8Type>().value(row) as i64),
        DataType::UInt16 => Value::Int(array.as_primitive::<UInt16Type>().value(row) as i64),
        DataType::UInt32 => Value::Int(array.as_primitive::<UInt32Type>().value(row) as i64),
        DataType::UInt64 => {
            let v = array.as_primitive::<UInt64Type>().value(row);
            i64::try_from(v).map_or(Value::Float(v as f64), Value::Int)
        }
        DataType::Float32 => {
            Value::Float(array.as_primitive::<Float32Type>().value(row) as f64)
        }
        DataType::Float64 => Value::Float(array.as_primitive::<Float64Type>().value(row)),
        DataType::Utf8 => Value::Text(array.as_string::<i32>().value(row).to_string()),
        DataType::LargeUtf8 => Value::Text(array.as_string::<i64>().value(row).to_string()),
        DataType::Date32 => array
            .as_primitive::<Date32Type>()
            .value_as_date(row)
            .map_or(Value::Null, Value::Date),
        DataType::Date64 => array
            .as_primitive::<Date64Type>()
            .value_as_date(row)
            .map_or(Value::Null, Value::Date),
        _ => array_value_to_string(array, row).map_or(Value::Null, Value::Text),
    }
}

/// All cells of an array as values.
pub fn array_values(array: &dyn Array) -> Vec<Value> {
    (0..array.len()).map(|row| array_value(array, row)).collect()
}

/// Build a typed array for `spec` from raw source values.
///
/// Applies the column's date format and boolean tokens. Nulls stay null.
pub fn build_column(spec: &ColumnSpec, values: &[Value]) -> Result<ArrayRef, CoercionError> {
    let array: ArrayRef = match spec.logical_type() {
        LogicalType::String => Arc::new(
            values
                .iter()
                .map(Value::text_form)
                .collect::<StringArray>(),
        ),
        LogicalType::Integer => Arc::new(Int64Array::from(convert(spec, values, to_int)?)),
        LogicalType::Float => Arc::new(Float64Array::from(convert(spec, values, to_float)?)),
        LogicalType::Date => {
            let days = convert(spec, values, to_date)?
                .into_iter()
                .map(|d| d.map(Date32Type::from_naive_date))
                .collect::<Vec<_>>();
            Arc::new(Date32Array::from(days))
        }
        LogicalType::Boolean => Arc::new(BooleanArray::from(convert(spec, values, to_bool)?)),
    };
    Ok(array)
}

/// Convert an existing column to `spec`'s storage type.
///
/// Already conforming arrays are returned unchanged. Textual dates and
/// boolean tokens go through the same rules as ingestion; every other
/// conversion is a strict Arrow cast.
pub fn coerce_array(spec: &ColumnSpec, array: &ArrayRef) -> Result<ArrayRef, CoercionError> {
    let target = spec.logical_type().arrow_type();
    if array.data_type() == &target {
        return Ok(Arc::clone(array));
    }

    let textual = matches!(array.data_type(), DataType::Utf8 | DataType::LargeUtf8);
    let by_value = match spec.logical_type() {
        LogicalType::Date => textual,
        LogicalType::Boolean => textual || spec.bool_tokens().is_some(),
        _ => false,
    };
    if by_value {
        return build_column(spec, &array_values(array.as_ref()));
    }

    let options = CastOptions {
        safe: false,
        ..Default::default()
    };
    cast_with_options(array, &target, &options).map_err(|source| CoercionError::Cast {
        column: spec.name().to_string(),
        source,
    })
}

enum Failure {
    Unparsable,
    UnmappedToken,
}

fn convert<T>(
    spec: &ColumnSpec,
    values: &[Value],
    f: impl Fn(&ColumnSpec, &Value) -> Result<Option<T>, Failure>,
) -> Result<Vec<Option<T>>, CoercionError> {
    values
        .iter()
        .enumerate()
        .map(|(row, value)| {
            if is_blank(value) {
                return Ok(None);
            }
            f(spec, value).map_err(|failure| match failure {
                Failure::Unparsable => CoercionError::Unparsable {
                    column: spec.name().to_string(),
                    row,
                    value: value.to_string(),
                    expected: spec.logical_type(),
                },
                Failure::UnmappedToken => CoercionError::UnmappedToken {
                    column: spec.name().to_string(),
                    row,
                    value: value.to_string(),
                },
            })
        })
        .collect()
}

/// Null, or text with nothing in it.
fn is_blank(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Text(s) => s.trim().is_empty(),
        _ => false,
    }
}

fn to_int(_: &ColumnSpec, value: &Value) -> Result<Option<i64>, Failure> {
    match value {
        Value::Int(v) => Ok(Some(*v)),
        Value::Float(v) if v.fract() == 0.0 && v.abs() < i64::MAX as f64 => Ok(Some(*v as i64)),
        Value::Text(s) => {
            let s = s.trim();
            if let Ok(v) = s.parse::<i64>() {
                return Ok(Some(v));
            }
            match s.parse::<f64>() {
                Ok(v) if v.fract() == 0.0 && v.abs() < i64::MAX as f64 => Ok(Some(v as i64)),
                _ => Err(Failure::Unparsable),
            }
        }
        _ => Err(Failure::Unparsable),
    }
}

fn to_float(_: &ColumnSpec, value: &Value) -> Result<Option<f64>, Failure> {
    match value {
        Value::Float(v) => Ok(Some(*v)),
        Value::Int(v) => Ok(Some(*v as f64)),
        Value::Text(s) => s.trim().parse::<f64>().map(Some).map_err(|_| Failure::Unparsable),
        _ => Err(Failure::Unparsable),
    }
}

fn to_date(spec: &ColumnSpec, value: &Value) -> Result<Option<NaiveDate>, Failure> {
    match value {
        Value::Date(d) => Ok(Some(*d)),
        Value::Text(s) => parse_date(s, spec.date_format())
            .map(Some)
            .ok_or(Failure::Unparsable),
        _ => Err(Failure::Unparsable),
    }
}

fn to_bool(spec: &ColumnSpec, value: &Value) -> Result<Option<bool>, Failure> {
    if let Some(tokens) = spec.bool_tokens() {
        if value.matches_token(&tokens.true_token) {
            return Ok(Some(true));
        }
        if value.matches_token(&tokens.false_token) {
            return Ok(Some(false));
        }
        return match value {
            Value::Bool(b) => Ok(Some(*b)),
            _ => Err(Failure::UnmappedToken),
        };
    }

    match value {
        Value::Bool(b) => Ok(Some(*b)),
        Value::Int(0) => Ok(Some(false)),
        Value::Int(1) => Ok(Some(true)),
        Value::Text(s) => match s.trim().to_ascii_lowercase().as_str() {
            "true" | "1" => Ok(Some(true)),
            "false" | "0" => Ok(Some(false)),
            _ => Err(Failure::Unparsable),
        },
        _ => Err(Failure::Unparsable),
    }
}
