//! Subcommands of the `typeframe` binary.

pub mod check;
pub mod ddl;
pub mod load;
pub mod output;
pub mod query;

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use typeframe_db::DbConnection;
use typeframe_schema::{SchemaDeclaration, SchemaRegistry};

/// Open a database given either a `duckdb:` URL or a plain file path.
pub(crate) fn open_database(spec: &str, readonly: bool) -> Result<DbConnection> {
    let conn = if spec.starts_with("duckdb:") {
        DbConnection::open_from_url(spec)
    } else if readonly {
        DbConnection::open_duckdb_readonly(Path::new(spec))
    } else {
        DbConnection::open_duckdb(Path::new(spec))
    };
    conn.with_context(|| format!("Failed to open database '{}'", spec))
}

pub(crate) fn load_declaration(path: &Path) -> Result<SchemaDeclaration> {
    SchemaDeclaration::from_path(path)
        .with_context(|| format!("Failed to read declaration {}", path.display()))
}

pub(crate) fn compile_declaration(
    declaration: &SchemaDeclaration,
    connection: Option<DbConnection>,
) -> Result<Arc<SchemaRegistry>> {
    declaration
        .compile(connection)
        .with_context(|| format!("Invalid declaration for '{}'", declaration.name))
}

/// Delimiters are given as a single character; `\t` and `tab` mean tab.
pub(crate) fn parse_delimiter(raw: &str) -> Result<u8, String> {
    let c = match raw {
        "\\t" | "tab" => '\t',
        other => {
            let mut chars = other.chars();
            match (chars.next(), chars.next()) {
                (Some(c), None) => c,
                _ => return Err(format!("expected a single character, got '{}'", raw)),
            }
        }
    };
    if !c.is_ascii() {
        return Err(format!("delimiter '{}' is not ASCII", c));
    }
    Ok(c as u8)
}
