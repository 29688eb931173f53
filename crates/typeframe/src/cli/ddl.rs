//! `typeframe ddl`: print the table definition derived from a declaration.

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{bail, Result};
use clap::Args;

use super::{compile_declaration, load_declaration};

#[derive(Debug, Args)]
pub struct DdlArgs {
    /// Declaration file (.toml or .json)
    pub declaration: PathBuf,

    /// Table name, overriding the one in the declaration
    #[arg(long)]
    pub table: Option<String>,
}

pub fn run(args: DdlArgs) -> Result<ExitCode> {
    let mut declaration = load_declaration(&args.declaration)?;
    if let Some(table) = args.table {
        declaration.table = Some(table);
    }
    if declaration.table.as_deref().map_or(true, |t| t.trim().is_empty()) {
        bail!(
            "'{}' names no table; pass --table or add `table = \"...\"`",
            declaration.name
        );
    }
    let schema = compile_declaration(&declaration, None)?;
    println!("{}", schema.table_definition()?);
    Ok(ExitCode::SUCCESS)
}
