//! typeframe command line
//!
//! Works from a record declaration file (TOML or JSON):
//! - `ddl`: print the derived table definition
//! - `check`: load a delimited file and report conformance
//! - `load`: load a delimited file and save it to DuckDB
//! - `query`: read a query result through the declaration

use std::process::ExitCode;

use clap::{Parser, Subcommand};
use typeframe_logging::{init_logging, LogConfig};

mod cli;

#[derive(Parser, Debug)]
#[command(name = "typeframe", version, about = "Schema-driven typed tables")]
struct Cli {
    /// Debug logging for typeframe crates on stderr
    #[arg(short = 'v', long, global = true)]
    verbose: bool,

    /// Do not write a log file under $TYPEFRAME_HOME/logs
    #[arg(long, global = true)]
    no_log_file: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Print the CREATE statements derived from a declaration
    Ddl(cli::ddl::DdlArgs),
    /// Load a delimited file and report how it conforms to a declaration
    Check(cli::check::CheckArgs),
    /// Load a delimited file and save it to a DuckDB database
    Load(cli::load::LoadArgs),
    /// Run a query and read its result through a declaration
    Query(cli::query::QueryArgs),
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let mut config = LogConfig::new("typeframe").verbose(cli.verbose);
    if cli.no_log_file {
        config = config.without_file();
    }
    if let Err(err) = init_logging(config.clone()) {
        // Usually an unwritable home; stderr logging is still useful.
        eprintln!("warning: {:#}", err);
        if let Err(err) = init_logging(config.without_file()) {
            eprintln!("warning: logging disabled: {:#}", err);
        }
    }

    let result = match cli.command {
        Commands::Ddl(args) => cli::ddl::run(args),
        Commands::Check(args) => cli::check::run(args),
        Commands::Load(args) => cli::load::run(args),
        Commands::Query(args) => cli::query::run(args),
    };

    match result {
        Ok(code) => code,
        Err(err) => {
            eprintln!("error: {:#}", err);
            ExitCode::FAILURE
        }
    }
}
