//! Record declarations loaded from TOML or JSON files.
//!
//! ```toml
//! name = "People"
//! table = "people"
//!
//! [[columns]]
//! name = "name"
//! type = "string"
//! unique = true
//!
//! [[columns]]
//! name = "is_staff"
//! type = "boolean"
//! true = "yes"
//! false = "no"
//! ```

use std::path::Path;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use typeframe_db::DbConnection;

use crate::column::{ColumnSpec, LogicalType};
use crate::error::{Result, SchemaError};
use crate::registry::{Persistence, SchemaBuilder, SchemaRegistry};
use crate::value::Value;

/// A scalar token as written in a declaration file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Token {
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

impl From<Token> for Value {
    fn from(token: Token) -> Self {
        match token {
            Token::Bool(v) => Value::Bool(v),
            Token::Int(v) => Value::Int(v),
            Token::Float(v) => Value::Float(v),
            Token::Text(v) => Value::Text(v),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnDeclaration {
    pub name: String,
    #[serde(rename = "type")]
    pub logical_type: LogicalType,
    #[serde(default)]
    pub unique: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub format: Option<String>,
    #[serde(default, rename = "true", skip_serializing_if = "Option::is_none")]
    pub true_token: Option<Token>,
    #[serde(default, rename = "false", skip_serializing_if = "Option::is_none")]
    pub false_token: Option<Token>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_name: Option<String>,
}

impl ColumnDeclaration {
    fn to_spec(&self) -> std::result::Result<ColumnSpec, SchemaError> {
        let mut spec = ColumnSpec::new(&self.name, self.logical_type);
        if self.unique {
            spec = spec.unique();
        }
        if let Some(format) = &self.format {
            spec = spec.format(format);
        }
        match (&self.true_token, &self.false_token) {
            (Some(t), Some(f)) => spec = spec.tokens(t.clone(), f.clone()),
            (None, None) => {}
            _ => {
                return Err(SchemaError::IncompleteTokens {
                    column: self.name.clone(),
                })
            }
        }
        if let Some(target) = &self.target_name {
            spec = spec.target_name(target);
        }
        Ok(spec)
    }
}

/// Serializable form of a record declaration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchemaDeclaration {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub table: Option<String>,
    pub columns: Vec<ColumnDeclaration>,
}

impl SchemaDeclaration {
    pub fn from_toml_str(text: &str) -> Result<Self> {
        Ok(toml::from_str(text)?)
    }

    pub fn from_json_str(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }

    /// Load a `.json` file as JSON, anything else as TOML.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)?;
        match path.extension().and_then(|e| e.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("json") => Self::from_json_str(&text),
            _ => Self::from_toml_str(&text),
        }
    }

    /// Builder for this declaration.
    ///
    /// A persistence annotation is attached when a table or a connection is
    /// present; a missing half is reported when persistence is used.
    pub fn to_builder(
        &self,
        connection: Option<DbConnection>,
    ) -> std::result::Result<SchemaBuilder, SchemaError> {
        let specs = self
            .columns
            .iter()
            .map(ColumnDeclaration::to_spec)
            .collect::<std::result::Result<Vec<_>, _>>()?;
        let mut builder = SchemaBuilder::new(&self.name).columns(specs);
        if self.table.is_some() || connection.is_some() {
            builder = builder.persistence(Persistence {
                table: self.table.clone(),
                connection,
            });
        }
        Ok(builder)
    }

    pub fn compile(&self, connection: Option<DbConnection>) -> Result<Arc<SchemaRegistry>> {
        Ok(self.to_builder(connection)?.compile()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::FrameError;

    const PEOPLE: &str = r#"
name = "People"
table = "people"

[[columns]]
name = "name"
type = "string"
unique = true

[[columns]]
name = "insertion_date"
type = "date"
format = "%d-%m-%Y"

[[columns]]
name = "is_staff"
type = "bool"
true = "yes"
false = "no"

[[columns]]
name = "active"
type = "boolean"
true = 1
false = 0
target_name = "ACTIVE"
"#;

    #[test]
    fn toml_declaration_compiles() {
        let declaration = SchemaDeclaration::from_toml_str(PEOPLE).unwrap();
        let schema = declaration.compile(None).unwrap();
        assert_eq!(schema.name(), "People");
        assert_eq!(
            schema.column_names(),
            vec!["name", "insertion_date", "is_staff", "active"]
        );
        assert_eq!(schema.persisted_table(), Some("people"));
        assert!(matches!(
            schema.require_persistence(),
            Err(FrameError::MissingArguments { argument: "connection", .. })
        ));

        let active = schema.column("active").unwrap();
        assert_eq!(active.source_name(), "ACTIVE");
        assert_eq!(active.bool_tokens().unwrap().true_token, Value::Int(1));
        assert_eq!(
            schema.column("insertion_date").unwrap().date_format(),
            Some("%d-%m-%Y")
        );
    }

    #[test]
    fn json_declaration_round_trips_through_toml_shape() {
        let declaration = SchemaDeclaration::from_toml_str(PEOPLE).unwrap();
        let json = serde_json::to_string(&declaration).unwrap();
        assert_eq!(SchemaDeclaration::from_json_str(&json).unwrap(), declaration);
    }

    #[test]
    fn half_token_pair_is_rejected() {
        let text = r#"
name = "Flags"
[[columns]]
name = "flag"
type = "boolean"
true = "Y"
"#;
        let err = SchemaDeclaration::from_toml_str(text)
            .unwrap()
            .compile(None)
            .unwrap_err();
        assert!(matches!(
            err,
            FrameError::Schema(SchemaError::IncompleteTokens { .. })
        ));
    }

    #[test]
    fn declaration_without_table_has_no_persistence() {
        let text = r#"
name = "Scratch"
[[columns]]
name = "x"
type = "float"
"#;
        let schema = SchemaDeclaration::from_toml_str(text)
            .unwrap()
            .compile(None)
            .unwrap();
        assert!(schema.persistence().is_none());
    }
}
