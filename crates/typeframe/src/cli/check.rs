//! `typeframe check`: load a delimited file and report how it conforms.

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::Args;
use serde_json::json;
use typeframe_schema::DelimitedSource;

use super::output::{print_frame, rows_json};
use super::{compile_declaration, load_declaration, parse_delimiter};

#[derive(Debug, Args)]
pub struct CheckArgs {
    /// Declaration file (.toml or .json)
    pub declaration: PathBuf,

    /// Delimited input file
    pub input: PathBuf,

    /// Field delimiter
    #[arg(short, long, default_value = ",", value_parser = parse_delimiter)]
    pub delimiter: u8,

    /// Input has no header row; columns bind by position
    #[arg(long)]
    pub no_headers: bool,

    /// Print the first N rows
    #[arg(long, default_value_t = 0)]
    pub show: usize,

    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

/// Exits non-zero when the file does not conform.
pub fn run(args: CheckArgs) -> Result<ExitCode> {
    let declaration = load_declaration(&args.declaration)?;
    let schema = compile_declaration(&declaration, None)?;

    let source = DelimitedSource::new(&args.input)
        .delimiter(args.delimiter)
        .has_headers(!args.no_headers);
    let mut table = schema
        .new_table(source)
        .and_then(|ingested| ingested.into_table())
        .with_context(|| format!("Failed to load {}", args.input.display()))?;

    let problems = table.validation_report();
    let valid = table.is_valid();

    if args.json {
        let report = json!({
            "record": schema.name(),
            "rows": table.num_rows(),
            "valid": valid,
            "problems": problems.iter().map(ToString::to_string).collect::<Vec<_>>(),
            "sample": rows_json(&table.head(args.show)),
        });
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!(
            "{}: {} rows, {}",
            schema.name(),
            table.num_rows(),
            if valid { "valid" } else { "INVALID" }
        );
        for problem in &problems {
            println!("  - {}", problem);
        }
        if args.show > 0 {
            print_frame(&table.head(args.show));
        }
    }

    Ok(if valid {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}
