//! `typeframe load`: load a delimited file and save it to DuckDB.

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::Args;
use serde_json::json;
use tracing::info;
use typeframe_schema::{DelimitedSource, IfRowExists, Ingested, SaveOptions};

use super::{compile_declaration, load_declaration, open_database, parse_delimiter};

#[derive(Debug, Args)]
pub struct LoadArgs {
    /// Declaration file (.toml or .json)
    pub declaration: PathBuf,

    /// Delimited input file
    pub input: PathBuf,

    /// Database file, or a `duckdb:` URL
    #[arg(long)]
    pub db: String,

    /// Table name, overriding the one in the declaration
    #[arg(long)]
    pub table: Option<String>,

    /// Field delimiter
    #[arg(short, long, default_value = ",", value_parser = parse_delimiter)]
    pub delimiter: u8,

    /// Input has no header row; columns bind by position
    #[arg(long)]
    pub no_headers: bool,

    /// Upsert on the unique columns: `update` or `ignore`
    #[arg(long)]
    pub if_row_exists: Option<IfRowExists>,

    /// Create an index over the unique columns
    #[arg(long)]
    pub index: bool,

    /// Read and save the input N rows at a time
    #[arg(long)]
    pub chunk_size: Option<usize>,

    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

pub fn run(args: LoadArgs) -> Result<ExitCode> {
    let mut declaration = load_declaration(&args.declaration)?;
    if let Some(table) = args.table.clone() {
        declaration.table = Some(table);
    }
    let conn = open_database(&args.db, false)?;
    let schema = compile_declaration(&declaration, Some(conn))?;

    let mut source = DelimitedSource::new(&args.input)
        .delimiter(args.delimiter)
        .has_headers(!args.no_headers);
    if let Some(rows) = args.chunk_size {
        source = source.chunk_size(rows);
    }
    let options = SaveOptions::default()
        .index(args.index)
        .if_row_exists(args.if_row_exists);

    let ingested = schema
        .new_table(source)
        .with_context(|| format!("Failed to load {}", args.input.display()))?;

    let mut rows_read = 0usize;
    let mut affected = 0u64;
    let mut chunks = 0usize;
    match ingested {
        Ingested::Chunks(parts) => {
            for part in parts {
                let mut table = part.with_context(|| {
                    format!("Failed to read chunk {} of {}", chunks + 1, args.input.display())
                })?;
                rows_read += table.num_rows();
                affected += table.save(&options)?;
                chunks += 1;
            }
        }
        Ingested::Table(mut table) => {
            rows_read = table.num_rows();
            affected = table.save(&options)?;
            chunks = 1;
        }
    }

    let table = schema.persisted_table().unwrap_or_default().to_string();
    info!(record = %schema.name(), table = %table, rows_read, affected, chunks, "load finished");

    if args.json {
        let summary = json!({
            "record": schema.name(),
            "table": table,
            "rows_read": rows_read,
            "rows_affected": affected,
            "chunks": chunks,
        });
        println!("{}", serde_json::to_string_pretty(&summary)?);
    } else {
        println!(
            "Loaded {} rows into {} ({} affected, {} chunk(s))",
            rows_read, table, affected, chunks
        );
    }
    Ok(ExitCode::SUCCESS)
}
