//! chainbatch CLI: inspect and manage processor state.
//!
//! Usage:
//! ```bash
//! chainbatch status ./processor.db
//! chainbatch reset  ./processor.db
//! chainbatch info
//! ```

use std::env;
use std::process;

use anyhow::{bail, Context};
use chainbatch_core::{format_head, ProcessorConfig};
use chainbatch_storage::sqlite::SqliteDatabase;

#[tokio::main]
async fn main() {
    let args: Vec<String> = env::args().collect();
    if args.len() < 2 {
        print_usage();
        process::exit(1);
    }

    let result = match args[1].as_str() {
        "info" => cmd_info(),
        "status" => cmd_status(args.get(2)).await,
        "reset" => cmd_reset(args.get(2)).await,
        "version" | "--version" | "-V" => {
            println!("chainbatch {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
        "help" | "--help" | "-h" => {
            print_usage();
            Ok(())
        }
        other => {
            eprintln!("Unknown command: {other}");
            print_usage();
            process::exit(1);
        }
    };

    if let Err(e) = result {
        eprintln!("error: {e:#}");
        process::exit(1);
    }
}

fn print_usage() {
    println!("chainbatch {}", env!("CARGO_PKG_VERSION"));
    println!("Resumable, crash-safe batch processor for finalized blocks\n");
    println!("USAGE:");
    println!("    chainbatch <COMMAND> [ARGS]\n");
    println!("COMMANDS:");
    println!("    info           Show effective processor configuration");
    println!("    status <db>    Print the resume cursor of a SQLite database");
    println!("    reset  <db>    Clear the cursor and all records of a SQLite database");
    println!("    version        Print version");
    println!("    help           Print this help");
}

fn cmd_info() -> anyhow::Result<()> {
    let config = ProcessorConfig::from_env().context("reading PROCESSOR_* environment")?;
    println!("ChainBatch v{}", env!("CARGO_PKG_VERSION"));
    println!("  Max retries: {}", config.max_retries);
    println!("  Retry delay: {} min", config.retry_delay().as_secs() / 60);
    println!(
        "  Finalized height refresh: every {} s",
        config.height_refresh_interval().as_secs()
    );
    println!(
        "  Status report interval: {} s",
        config.status_interval().as_secs()
    );
    match config.prometheus_port {
        Some(port) => println!("  Prometheus port: {port}"),
        None => println!("  Prometheus port: disabled"),
    }
    println!("  Databases: memory, SQLite");
    Ok(())
}

fn db_path(arg: Option<&String>) -> anyhow::Result<&str> {
    match arg {
        Some(path) => Ok(path.as_str()),
        None => bail!("missing database path"),
    }
}

async fn cmd_status(arg: Option<&String>) -> anyhow::Result<()> {
    let path = db_path(arg)?;
    let db = SqliteDatabase::open(path)
        .await
        .with_context(|| format!("opening {path}"))?;

    let head = db.head().await?;
    let updated_at = db
        .updated_at()
        .await?
        .and_then(|ts| chrono::DateTime::from_timestamp(ts, 0))
        .map(|t| t.to_rfc3339());

    let status = serde_json::json!({
        "database": path,
        "head": format_head(&head),
        "height": head.height,
        "hash": head.hash,
        "next_block": head.next_height(),
        "records": db.record_count().await?,
        "updated_at": updated_at,
    });
    println!("{}", serde_json::to_string_pretty(&status)?);
    Ok(())
}

async fn cmd_reset(arg: Option<&String>) -> anyhow::Result<()> {
    let path = db_path(arg)?;
    let db = SqliteDatabase::open(path)
        .await
        .with_context(|| format!("opening {path}"))?;

    let head = db.head().await?;
    db.reset().await?;
    println!("reset {path} (was at {})", format_head(&head));
    Ok(())
}
