use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use rust_relschema::{manifest, DeriveOptions, SqlDialect};

#[derive(Parser)]
#[command(name = "rust-relschema")]
#[command(author, version, about = "Derive relational schema models from ApiSchema files")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Derive the relational model set and print or write its JSON manifest
    Derive {
        /// ApiSchema files, directories or glob patterns
        #[arg(short, long, required = true, num_args = 1..)]
        schema: Vec<PathBuf>,

        /// Target dialect (pgsql, mssql)
        #[arg(short, long, value_parser = parse_dialect)]
        dialect: SqlDialect,

        /// Output path for the manifest (printed to stdout when omitted)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Enable verbose output
        #[arg(short, long)]
        verbose: bool,
    },
}

fn parse_dialect(value: &str) -> std::result::Result<SqlDialect, String> {
    SqlDialect::parse(value).ok_or_else(|| format!("unknown dialect '{}' (expected pgsql or mssql)", value))
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "info" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Derive {
            schema,
            dialect,
            output,
            verbose,
        } => {
            init_tracing(verbose);

            let print_to_stdout = output.is_none();
            let options = DeriveOptions {
                schema_paths: schema,
                dialect,
                output_path: output,
                verbose,
            };

            let set = rust_relschema::derive(options)?;
            if print_to_stdout {
                print!("{}", manifest::render_manifest(&set)?);
            }
        }
    }

    Ok(())
}
