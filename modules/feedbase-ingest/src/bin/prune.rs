//! Compact a feedbase database, print its counts, and cut it down to the
//! newest `--keep` content documents.
//!
//! Usage: cargo run --bin feedbase-prune -- --db-name tweets --keep 10

use anyhow::{Context, Result};
use clap::Parser;

use feedbase_ingest::logging;
use feedbase_ingest::settings::DEFAULT_STORE_URL;
use feedbase_store::{connect, ContentStore, PruneOrder};

#[derive(Parser)]
#[command(name = "feedbase-prune", about = "Prune the oldest content from a feedbase database")]
struct Cli {
    #[arg(long, default_value = DEFAULT_STORE_URL)]
    store_url: String,

    #[arg(long)]
    db_name: String,

    /// Content documents to keep; counts only when omitted
    #[arg(long)]
    keep: Option<u64>,

    /// Treat the oldest by creation time rather than by id
    #[arg(long)]
    by_date: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    logging::init(None)?;
    let cli = Cli::parse();

    let order = if cli.by_date {
        PruneOrder::Chronological
    } else {
        PruneOrder::Identity
    };
    let store = ContentStore::open(connect(&cli.store_url, &cli.db_name)?)
        .await
        .with_context(|| format!("Failed to open database {}", cli.db_name))?
        .with_prune_order(order);

    store.compact().await?;

    let content = store.content_count().await?;
    println!("CONTENT: {content}");
    println!("AUTHORS: {}", store.author_count().await?);

    if let Some(keep) = cli.keep {
        let excess = content.saturating_sub(keep);
        if excess > 0 {
            let deleted = store.prune_oldest(excess).await?;
            store.compact().await?;
            println!("PRUNED: {deleted}");
        }
    }
    Ok(())
}
