//! Print stored content, oldest first.
//!
//! Usage: cargo run --bin feedbase-query -- --db-name tweets --by-date --limit 20

use anyhow::{Context, Result};
use clap::Parser;

use feedbase_ingest::logging;
use feedbase_ingest::settings::DEFAULT_STORE_URL;
use feedbase_store::{connect, ContentStore, PruneOrder};

#[derive(Parser)]
#[command(name = "feedbase-query", about = "List content stored in a feedbase database")]
struct Cli {
    #[arg(long, default_value = DEFAULT_STORE_URL)]
    store_url: String,

    #[arg(long)]
    db_name: String,

    /// Order by creation time instead of id
    #[arg(long)]
    by_date: bool,

    #[arg(long)]
    limit: Option<usize>,

    /// List authors instead of content
    #[arg(long)]
    authors: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    logging::init(None)?;
    let cli = Cli::parse();

    let store = ContentStore::open(connect(&cli.store_url, &cli.db_name)?)
        .await
        .with_context(|| format!("Failed to open database {}", cli.db_name))?;

    let docs = if cli.authors {
        store.list_authors(cli.limit).await?
    } else {
        let order = if cli.by_date {
            PruneOrder::Chronological
        } else {
            PruneOrder::Identity
        };
        store.list_content(order, cli.limit).await?
    };

    for doc in &docs {
        println!("{}", serde_json::to_string(doc)?);
    }
    Ok(())
}
