//! Record declarations and their compiled, immutable registries.

use std::collections::HashSet;
use std::sync::Arc;

use arrow::datatypes::{Schema, SchemaRef};
use tracing::debug;
use typeframe_db::{quote_ident, quote_ident_path, DbConnection};

use crate::catalog::catalog;
use crate::column::ColumnSpec;
use crate::error::{FrameError, Result, SchemaError};

/// Persistence annotation of a record.
///
/// Both parts are optional so that an incomplete annotation can be declared
/// and reported as [`FrameError::MissingArguments`] when used.
#[derive(Debug, Clone, Default)]
pub struct Persistence {
    pub table: Option<String>,
    pub connection: Option<DbConnection>,
}

impl Persistence {
    pub fn new(table: impl Into<String>, connection: DbConnection) -> Self {
        Self {
            table: Some(table.into()),
            connection: Some(connection),
        }
    }
}

/// Resolved persistence target: a table name plus the connection to write it on.
#[derive(Debug, Clone, Copy)]
pub struct Target<'a> {
    pub table: &'a str,
    pub connection: &'a DbConnection,
}

/// Collects column declarations for one record.
#[derive(Debug, Clone)]
pub struct SchemaBuilder {
    name: String,
    columns: Vec<ColumnSpec>,
    persistence: Option<Persistence>,
}

impl SchemaBuilder {
    pub fn new(record_name: impl Into<String>) -> Self {
        Self {
            name: record_name.into(),
            columns: Vec::new(),
            persistence: None,
        }
    }

    /// Append a column; declaration order is output column order.
    pub fn column(mut self, spec: ColumnSpec) -> Self {
        self.columns.push(spec);
        self
    }

    pub fn columns(mut self, specs: impl IntoIterator<Item = ColumnSpec>) -> Self {
        self.columns.extend(specs);
        self
    }

    /// Persist tables of this record to `table` on `connection`.
    pub fn persist(self, table: impl Into<String>, connection: DbConnection) -> Self {
        self.persistence(Persistence::new(table, connection))
    }

    /// Attach a possibly incomplete persistence annotation.
    pub fn persistence(mut self, persistence: Persistence) -> Self {
        self.persistence = Some(persistence);
        self
    }

    /// Check the declaration and freeze it.
    ///
    /// Records with a persistence table are also registered in the
    /// process-wide [`catalog`](crate::catalog()).
    pub fn compile(self) -> std::result::Result<Arc<SchemaRegistry>, SchemaError> {
        if self.name.trim().is_empty() {
            return Err(SchemaError::EmptyRecordName);
        }
        if self.columns.is_empty() {
            return Err(SchemaError::EmptySchema { record: self.name });
        }

        let mut seen = HashSet::new();
        for col in &self.columns {
            col.check(&self.name)?;
            if !seen.insert(col.name()) {
                return Err(SchemaError::DuplicateColumn {
                    record: self.name.clone(),
                    column: col.name().to_string(),
                });
            }
        }

        let arrow_schema = Arc::new(Schema::new(
            self.columns
                .iter()
                .map(ColumnSpec::arrow_field)
                .collect::<Vec<_>>(),
        ));
        let registry = Arc::new(SchemaRegistry {
            name: self.name,
            columns: self.columns,
            arrow_schema,
            persistence: self.persistence,
        });

        debug!(
            record = %registry.name,
            columns = registry.columns.len(),
            unique = registry.unique_columns().len(),
            "compiled record schema"
        );
        if registry.persisted_table().is_some() {
            catalog().register(&registry);
        }
        Ok(registry)
    }
}

/// Compiled, immutable description of one record.
#[derive(Debug)]
pub struct SchemaRegistry {
    name: String,
    columns: Vec<ColumnSpec>,
    arrow_schema: SchemaRef,
    persistence: Option<Persistence>,
}

impl SchemaRegistry {
    /// Record name given at declaration.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn columns(&self) -> &[ColumnSpec] {
        &self.columns
    }

    pub fn column(&self, name: &str) -> Option<&ColumnSpec> {
        self.columns.iter().find(|c| c.name() == name)
    }

    pub fn column_names(&self) -> Vec<&str> {
        self.columns.iter().map(ColumnSpec::name).collect()
    }

    /// Columns forming the persistence key, in declaration order.
    pub fn unique_columns(&self) -> Vec<&ColumnSpec> {
        self.columns.iter().filter(|c| c.is_unique()).collect()
    }

    /// Arrow schema of a conforming table.
    pub fn arrow_schema(&self) -> SchemaRef {
        Arc::clone(&self.arrow_schema)
    }

    pub fn persistence(&self) -> Option<&Persistence> {
        self.persistence.as_ref()
    }

    /// Non-blank persistence table name, if declared.
    pub fn persisted_table(&self) -> Option<&str> {
        self.persistence
            .as_ref()
            .and_then(|p| p.table.as_deref())
            .filter(|t| !t.trim().is_empty())
    }

    /// Resolve the persistence target or explain what is missing.
    pub fn require_persistence(&self) -> Result<Target<'_>> {
        let persistence = self
            .persistence
            .as_ref()
            .ok_or_else(|| FrameError::MissingDecorator {
                record: self.name.clone(),
            })?;
        let table = self.persisted_table().ok_or_else(|| FrameError::MissingArguments {
            record: self.name.clone(),
            argument: "table name",
        })?;
        let connection = persistence
            .connection
            .as_ref()
            .ok_or_else(|| FrameError::MissingArguments {
                record: self.name.clone(),
                argument: "connection",
            })?;
        Ok(Target { table, connection })
    }

    /// `CREATE` statements for the backing table.
    ///
    /// Needs a table name but no connection.
    pub fn table_definition(&self) -> Result<String> {
        if self.persistence.is_none() {
            return Err(FrameError::MissingDecorator {
                record: self.name.clone(),
            });
        }
        let table = self.persisted_table().ok_or_else(|| FrameError::MissingArguments {
            record: self.name.clone(),
            argument: "table name",
        })?;
        Ok(self.table_definition_for(table))
    }

    pub(crate) fn table_definition_for(&self, table: &str) -> String {
        let mut columns: Vec<String> = Vec::with_capacity(self.columns.len() + 2);
        let mut statements = String::new();
        let unique: Vec<String> = self
            .unique_columns()
            .iter()
            .map(|c| quote_ident(c.name()))
            .collect();

        if unique.is_empty() {
            let sequence = format!("{}_id_seq", table.replace('.', "_"));
            statements.push_str(&format!(
                "CREATE SEQUENCE IF NOT EXISTS {};\n",
                quote_ident(&sequence)
            ));
            columns.push(format!(
                "{} BIGINT PRIMARY KEY DEFAULT nextval('{}')",
                quote_ident(self.surrogate_key()),
                sequence.replace('\'', "''")
            ));
        }

        for col in &self.columns {
            columns.push(format!(
                "{} {}",
                quote_ident(col.name()),
                col.logical_type().sql_type()
            ));
        }
        if !unique.is_empty() {
            columns.push(format!("PRIMARY KEY ({})", unique.join(", ")));
        }

        statements.push_str(&format!(
            "CREATE TABLE IF NOT EXISTS {} (\n    {}\n);",
            quote_ident_path(table),
            columns.join(",\n    ")
        ));
        statements
    }

    /// Name of the surrogate identity column used when no column is unique.
    pub fn surrogate_key(&self) -> &'static str {
        if self.column("id").is_some() {
            "_row_id"
        } else {
            "id"
        }
    }
}
