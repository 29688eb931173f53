//! Dynamically typed cell values.
//!
//! Used for row iterators, boolean tokens and table export. Never stored in
//! a table; columns are Arrow arrays.

use std::fmt;

use chrono::NaiveDate;
use typeframe_db::DbValue;

/// One cell value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    Date(NaiveDate),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Textual form used for token matching and string coercion.
    pub fn text_form(&self) -> Option<String> {
        match self {
            Value::Null => None,
            Value::Bool(v) => Some(v.to_string()),
            Value::Int(v) => Some(v.to_string()),
            Value::Float(v) => Some(v.to_string()),
            Value::Text(v) => Some(v.clone()),
            Value::Date(v) => Some(v.format("%Y-%m-%d").to_string()),
        }
    }

    /// True when `self` is `token`, either exactly or by text form.
    pub(crate) fn matches_token(&self, token: &Value) -> bool {
        if self == token {
            return true;
        }
        match (self.text_form(), token.text_form()) {
            (Some(a), Some(b)) => a == b,
            _ => false,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => f.write_str("null"),
            Value::Text(v) => write!(f, "{:?}", v),
            other => match other.text_form() {
                Some(text) => f.write_str(&text),
                None => Ok(()),
            },
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int(v as i64)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Text(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Text(v)
    }
}

impl From<NaiveDate> for Value {
    fn from(v: NaiveDate) -> Self {
        Value::Date(v)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map_or(Value::Null, Into::into)
    }
}

impl From<DbValue> for Value {
    fn from(v: DbValue) -> Self {
        match v {
            DbValue::Null => Value::Null,
            DbValue::Integer(i) => Value::Int(i),
            DbValue::Real(f) => Value::Float(f),
            DbValue::Text(s) => Value::Text(s),
            DbValue::Blob(b) => Value::Text(String::from_utf8_lossy(&b).into_owned()),
            DbValue::Boolean(b) => Value::Bool(b),
            DbValue::Date(d) => Value::Date(d),
            DbValue::Timestamp(ts) => Value::Text(ts.to_rfc3339()),
        }
    }
}

impl From<Value> for DbValue {
    fn from(v: Value) -> Self {
        match v {
            Value::Null => DbValue::Null,
            Value::Bool(b) => DbValue::Boolean(b),
            Value::Int(i) => DbValue::Integer(i),
            Value::Float(f) => DbValue::Real(f),
            Value::Text(s) => DbValue::Text(s),
            Value::Date(d) => DbValue::Date(d),
        }
    }
}
