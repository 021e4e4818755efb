//! vaultmeta CLI - backup metadata store management.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use tracing::{info, Level};

use vaultmeta::{Config, Result, StoreConnection, StoreError};

#[derive(Parser)]
#[command(name = "vaultmeta")]
#[command(about = "Backup metadata store management")]
#[command(version)]
struct Cli {
    /// Path to YAML configuration file
    #[arg(short, long, default_value = "config.yaml")]
    config: PathBuf,

    /// Log verbosity: debug, info, warn, error
    #[arg(long, default_value = "info")]
    verbosity: String,

    /// Output JSON result to stdout
    #[arg(long)]
    output_json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize a fresh store with the current schema
    Init,

    /// Rekey a legacy store to surrogate version identifiers
    Upgrade,

    /// Reverse the rekeying migration (unsupported; documented no-op)
    Downgrade,

    /// Report per-table row counts
    Status,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let level = match cli.verbosity.as_str() {
        "debug" => Level::DEBUG,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .init();

    match run(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("{}", err.format_detailed());
            match err {
                StoreError::Config(_) | StoreError::Precondition(_) => ExitCode::from(2),
                _ => ExitCode::FAILURE,
            }
        }
    }
}

fn run(cli: &Cli) -> Result<()> {
    let config = Config::load(&cli.config)?;
    let store = config.open()?;

    match &cli.command {
        Commands::Init => {
            vaultmeta::store::init(store.as_ref())?;
            info!("store initialized");
            println!("initialized store ({})", store.engine());
        }
        Commands::Upgrade => {
            let outcome = config.rekey_migration().upgrade(store.as_ref())?;
            if cli.output_json {
                println!("{}", serde_json::to_string_pretty(&outcome)?);
            } else {
                println!(
                    "rekeyed {} tables in {:.3}s (run {})",
                    outcome.tables.len(),
                    outcome.duration_seconds,
                    outcome.run_id
                );
                for table in &outcome.tables {
                    println!("  {}: {} rows", table.table, table.rows);
                }
            }
        }
        Commands::Downgrade => {
            config.rekey_migration().downgrade()?;
            println!("downgrade is not supported for the rekeying migration; nothing done");
        }
        Commands::Status => {
            let tables = ["storages", "versions", "blocks", "labels"];
            if cli.output_json {
                let mut counts = serde_json::Map::new();
                for table in tables {
                    counts.insert(
                        table.to_string(),
                        serde_json::Value::from(store.row_count(table)?),
                    );
                }
                println!("{}", serde_json::to_string_pretty(&counts)?);
            } else {
                for table in tables {
                    println!("{}: {} rows", table, store.row_count(table)?);
                }
            }
        }
    }

    Ok(())
}
