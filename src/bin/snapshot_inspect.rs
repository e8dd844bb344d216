use std::path::PathBuf;

use anyhow::{anyhow, Result};
use clap::Parser;
use serde_json::Value;
use xero_archiver::config;
use xero_archiver::db;
use xero_archiver::sync::report::render;

#[derive(Parser, Debug)]
#[command(about = "Print the latest stored snapshot of an endpoint")]
struct Args {
    /// Path to YAML config
    #[arg(long, default_value = "config.yaml")]
    config: PathBuf,

    /// Endpoint whose snapshot to print
    #[arg(long, default_value = "invoices")]
    endpoint: String,

    /// Only print the snapshot header
    #[arg(long)]
    summary: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let cfg = config::load(Some(&args.config))?;

    let database_url = std::env::var("DATABASE_URL").unwrap_or_else(|_| cfg.database_url());
    let pool = db::init_pool(&database_url).await?;
    db::run_migrations(&pool).await?;

    let snap = db::latest_snapshot(&pool, &args.endpoint)
        .await?
        .ok_or_else(|| anyhow!("no snapshot stored for '{}'", args.endpoint))?;
    println!("Snapshot: {}", snap.id);
    println!("Endpoint: {}", snap.endpoint);
    println!("Taken at: {}", snap.taken_at);
    println!("Items:    {}", snap.item_count);
    if !args.summary {
        let items: Vec<Value> = snap.items()?;
        println!("{}", render(&items)?);
    }
    Ok(())
}
