//! `typeframe query`: read a query result through a declaration.

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{bail, Context, Result};
use clap::Args;
use serde_json::json;
use typeframe_db::quote_ident_path;
use typeframe_schema::SqlSource;

use super::output::{print_frame, rows_json};
use super::{compile_declaration, load_declaration, open_database};

#[derive(Debug, Args)]
pub struct QueryArgs {
    /// Declaration file (.toml or .json)
    pub declaration: PathBuf,

    /// Database file, or a `duckdb:` URL
    #[arg(long)]
    pub db: String,

    /// Query text; defaults to every row of the declared table
    #[arg(long)]
    pub sql: Option<String>,

    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

pub fn run(args: QueryArgs) -> Result<ExitCode> {
    let declaration = load_declaration(&args.declaration)?;
    let sql = match (&args.sql, &declaration.table) {
        (Some(sql), _) => sql.clone(),
        (None, Some(table)) => format!("SELECT * FROM {}", quote_ident_path(table)),
        (None, None) => bail!("'{}' names no table; pass --sql", declaration.name),
    };

    let conn = open_database(&args.db, true)?;
    let schema = compile_declaration(&declaration, Some(conn))?;
    let mut table = schema
        .new_table(SqlSource::new(&sql))
        .and_then(|ingested| ingested.into_table())
        .with_context(|| format!("Query failed: {}", sql))?;
    let valid = table.is_valid();

    if args.json {
        let result = json!({
            "record": schema.name(),
            "rows": rows_json(&table),
            "valid": valid,
        });
        println!("{}", serde_json::to_string_pretty(&result)?);
    } else {
        print_frame(&table);
        println!("{} rows", table.num_rows());
    }
    Ok(ExitCode::SUCCESS)
}
