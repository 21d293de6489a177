mod logging;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use odgovlt_ckan::{CatalogApi, CkanClient};
use odgovlt_storage::{CacheKey, UrlCache};
use odgovlt_sync::{Harvester, SyncConfig};
use tracing::info;

#[derive(Debug, Parser)]
#[command(name = "odgovlt")]
#[command(about = "Harvest the legacy rinkmenos database into a CKAN catalog")]
struct Cli {
    /// Source database url; overrides ODGOVLT_SOURCE_URL.
    #[arg(long, global = true)]
    source: Option<String>,
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Push every dataset row straight to the catalog.
    Sync,
    /// Run one harvest job: gather, fetch, import.
    Harvest,
    /// Show the catalog's status_show response.
    Status,
    /// Describe the harvester.
    Info,
    #[command(subcommand)]
    Cache(CacheCommand),
}

#[derive(Debug, Subcommand)]
enum CacheCommand {
    List,
    Add {
        url: String,
        #[arg(long)]
        forever: bool,
    },
    /// Look up an entry by numeric id or by url.
    Get { key: String },
    RemoveOld {
        #[arg(long, default_value_t = 30)]
        days: i64,
    },
    Reset,
}

#[tokio::main]
async fn main() -> Result<()> {
    logging::init_logging();
    let cli = Cli::parse();

    let mut config = SyncConfig::from_env();
    if let Some(source) = cli.source {
        config.source_url = source;
    }
    info!(source = %config.source_url, ckan = %config.ckan_url, "configuration loaded");

    match cli.command.unwrap_or(Commands::Sync) {
        Commands::Sync => {
            let summary = odgovlt_sync::run_sync(&config).await?;
            info!(
                elapsed_ms = (summary.finished_at - summary.started_at).num_milliseconds(),
                "sync run finished"
            );
            println!(
                "sync complete: ckan={} rows={} created={} already_imported={}",
                summary.ckan_version,
                summary.report.rows,
                summary.report.created.len(),
                summary.report.already_imported
            );
        }
        Commands::Harvest => {
            let summary = odgovlt_sync::run_harvest(&config).await?;
            info!(
                elapsed_ms = (summary.finished_at - summary.started_at).num_milliseconds(),
                "harvest run finished"
            );
            println!(
                "harvest complete: job_id={} gathered={} created={} already_imported={} failed={}",
                summary.job_id,
                summary.gathered,
                summary.created,
                summary.already_imported,
                summary.failed
            );
        }
        Commands::Status => {
            let client = CkanClient::new(config.ckan_client_config())?;
            let status = client
                .status_show()
                .await
                .with_context(|| format!("reaching CKAN at {}", config.ckan_url))?;
            println!("{}", serde_json::to_string_pretty(&status)?);
        }
        Commands::Info => {
            let info = Harvester::<CkanClient>::info();
            println!("{}", serde_json::to_string_pretty(&info)?);
        }
        Commands::Cache(command) => run_cache(&config.cache_db_url, command).await?,
    }

    Ok(())
}

async fn run_cache(url: &str, command: CacheCommand) -> Result<()> {
    let cache = UrlCache::open(url)
        .await
        .with_context(|| format!("opening cache {url}"))?;
    match command {
        CacheCommand::List => {
            for entry in cache.get_all().await? {
                println!(
                    "{}\t{}\t{}\t{}",
                    entry.id,
                    entry.url,
                    entry.date_accessed.to_rfc3339(),
                    if entry.cached_forever { "forever" } else { "-" }
                );
            }
        }
        CacheCommand::Add { url, forever } => {
            cache.update(&url, forever).await?;
            println!("cached {url}");
        }
        CacheCommand::Get { key } => {
            let key: CacheKey = key.parse()?;
            match cache.get(key.clone()).await? {
                Some(entry) => println!("{}", serde_json::to_string_pretty(&entry)?),
                None => println!("{key} is not cached"),
            }
        }
        CacheCommand::RemoveOld { days } => {
            let removed = cache.remove_old(days).await?;
            println!("removed {removed} entries older than {days} days");
        }
        CacheCommand::Reset => {
            let removed = cache.reset().await?;
            println!("removed {removed} entries");
        }
    }
    Ok(())
}
