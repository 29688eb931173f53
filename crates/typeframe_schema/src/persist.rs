//! Writing schema-bound tables to their backing DuckDB table.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use typeframe_db::{quote_ident, quote_ident_path, DbValue, OnConflict};

use crate::coerce::array_value;
use crate::error::{FrameError, Result};
use crate::table::SchemaBoundTable;

/// What to do when the backing table already exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IfExists {
    /// Create the table if absent, then insert.
    #[default]
    Append,
    /// Always refused with [`FrameError::ReplaceRejected`].
    Replace,
}

/// Conflict handling for rows whose unique key is already stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IfRowExists {
    Update,
    Ignore,
}

impl From<IfRowExists> for OnConflict {
    fn from(mode: IfRowExists) -> Self {
        match mode {
            IfRowExists::Update => OnConflict::Update,
            IfRowExists::Ignore => OnConflict::Ignore,
        }
    }
}

/// Error for unrecognized save option names.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownOption(pub String);

impl fmt::Display for UnknownOption {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown option '{}'", self.0)
    }
}

impl std::error::Error for UnknownOption {}

impl FromStr for IfExists {
    type Err = UnknownOption;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "append" => Ok(IfExists::Append),
            "replace" => Ok(IfExists::Replace),
            other => Err(UnknownOption(other.to_string())),
        }
    }
}

impl FromStr for IfRowExists {
    type Err = UnknownOption;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "update" => Ok(IfRowExists::Update),
            "ignore" => Ok(IfRowExists::Ignore),
            other => Err(UnknownOption(other.to_string())),
        }
    }
}

/// Options for [`SchemaBoundTable::save`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SaveOptions {
    #[serde(default)]
    pub if_exists: IfExists,
    /// Ensure an index on the unique columns.
    #[serde(default)]
    pub index: bool,
    /// Upsert instead of insert.
    #[serde(default)]
    pub if_row_exists: Option<IfRowExists>,
}

impl SaveOptions {
    /// Keyed upsert with the given conflict handling.
    pub fn upsert(mode: IfRowExists) -> Self {
        Self {
            if_row_exists: Some(mode),
            ..Self::default()
        }
    }

    pub fn if_exists(mut self, if_exists: IfExists) -> Self {
        self.if_exists = if_exists;
        self
    }

    pub fn index(mut self, index: bool) -> Self {
        self.index = index;
        self
    }

    pub fn if_row_exists(mut self, mode: Option<IfRowExists>) -> Self {
        self.if_row_exists = mode;
        self
    }
}

impl SchemaBoundTable {
    /// Write this table to its record's persistence target.
    ///
    /// Creates the backing table from the derived definition when absent.
    /// Everything happens in one transaction. Returns rows affected.
    pub fn save(&mut self, options: &SaveOptions) -> Result<u64> {
        if !self.is_valid() {
            warn!(
                record = self.record_name().unwrap_or_default(),
                "saving a table that does not conform to its schema"
            );
        }

        let schema = match &self.schema {
            Some(schema) => Arc::clone(schema),
            None => {
                return Err(FrameError::MissingDecorator {
                    record: "<unbound>".to_string(),
                })
            }
        };
        let target = schema.require_persistence()?;
        let table = target.table;
        let keys: Vec<&str> = schema.unique_columns().iter().map(|c| c.name()).collect();
        let missing_keys = || FrameError::MissingUniqueField {
            record: schema.name().to_string(),
        };

        // Replace is refused for upserts too.
        if options.if_exists == IfExists::Replace {
            return Err(FrameError::ReplaceRejected {
                table: table.to_string(),
            });
        }

        let mut statements = schema.table_definition_for(table);
        if options.if_row_exists.is_none() {
            if options.index {
                if keys.is_empty() {
                    return Err(missing_keys());
                }
                statements.push('\n');
                statements.push_str(&index_statement(table, &keys));
            }
        } else if keys.is_empty() {
            return Err(missing_keys());
        }

        let columns: Vec<&str> = schema
            .columns()
            .iter()
            .map(|c| c.name())
            .filter(|name| self.batch.column_by_name(name).is_some())
            .collect();
        let rows = self.db_rows(&columns);

        let affected = target.connection.transaction(|tx| {
            tx.execute_batch(&statements)?;
            match options.if_row_exists {
                Some(mode) => tx.upsert_rows(table, &columns, &keys, &rows, mode.into()),
                None => tx.bulk_insert_rows(table, &columns, &rows),
            }
        })?;

        info!(
            record = %schema.name(),
            table = %table,
            rows = rows.len(),
            affected,
            mode = ?options.if_row_exists,
            "saved table"
        );
        Ok(affected)
    }

    fn db_rows(&self, columns: &[&str]) -> Vec<Vec<DbValue>> {
        let arrays: Vec<_> = columns
            .iter()
            .filter_map(|name| self.batch.column_by_name(name))
            .collect();
        (0..self.batch.num_rows())
            .map(|row| {
                arrays
                    .iter()
                    .map(|array| DbValue::from(array_value(array.as_ref(), row)))
                    .collect()
            })
            .collect()
    }
}

fn index_statement(table: &str, keys: &[&str]) -> String {
    let name = format!("{}_{}_idx", table.replace('.', "_"), keys.join("_"));
    format!(
        "CREATE INDEX IF NOT EXISTS {} ON {} ({});",
        quote_ident(&name),
        quote_ident_path(table),
        keys.iter()
            .map(|k| quote_ident(k))
            .collect::<Vec<_>>()
            .join(", ")
    )
}
