mod config;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use dotenvy::dotenv;
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use feedsync_client::{LocalDirConnector, SyncServiceClient};
use feedsync_core::scheduler::TickSummary;
use feedsync_core::traits::{ConfigStore, TransferConnector};
use feedsync_core::{
    BatchWorker, ChannelPool, FeedIndexer, HttpConfig, IndexerService, IndexingStrategy,
    LocalExecutor, MediaUrlConfig, PipelineConfig, PipelineReporter, PollerScheduler,
    ResolverRegistry, SyncStatusPoller, SystemState, TracingReporter, load_feeds_config,
};
use feedsync_db::{PgConfigStore, PgItemSource, PgPollerJobStore};

use crate::config::{Command, Config, Transport};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .context("setting default subscriber failed")?;

    let config = Config::parse();

    info!("Connecting to database...");
    let pool = PgPoolOptions::new()
        .max_connections(config.db_max_connections)
        .connect(&config.database_url)
        .await
        .context("Failed to connect to database")?;
    feedsync_db::run_migrations(&pool)
        .await
        .context("Failed to apply database migrations")?;

    let pipeline = PipelineConfig::from_env()?;

    match config.command {
        Command::Run {
            name,
            transport,
            local_root,
            config: config_path,
        } => {
            let media = load_feeds_config(config_path)?
                .map(|feeds| feeds.media)
                .unwrap_or_default();
            match transport {
                Transport::Local => {
                    let root = local_root.ok_or_else(|| {
                        anyhow::anyhow!("--local-root <DIR> is required for the local transport")
                    })?;
                    run_feed(&pool, LocalDirConnector::new(root), &name, pipeline, media).await?;
                }
                Transport::Sftp => {
                    #[cfg(feature = "sftp")]
                    run_feed(&pool, feedsync_client::SftpConnector, &name, pipeline, media).await?;
                    #[cfg(not(feature = "sftp"))]
                    anyhow::bail!(
                        "feedsync was built without SFTP support; rebuild with `--features sftp` or use `--transport local`"
                    );
                }
            }
        }
        Command::Poll { once, tick_secs } => {
            poll(&pool, pipeline, once, Duration::from_secs(tick_secs)).await?;
        }
        Command::Import {
            config: config_path,
            feed,
        } => {
            import(&pool, config_path, feed.as_deref()).await?;
        }
        Command::Status { reset } => {
            show_status(&pool, reset.as_deref()).await?;
        }
    }

    Ok(())
}

/// Wires the PostgreSQL stores, the HTTP client and `connector` into one
/// pipeline and runs the named feed. The channel pool is closed afterwards,
/// whatever the outcome.
async fn run_feed<C: TransferConnector>(
    pool: &PgPool,
    connector: C,
    name: &str,
    pipeline: PipelineConfig,
    media: MediaUrlConfig,
) -> anyhow::Result<()> {
    let store = PgConfigStore::new(pool.clone());
    let items = PgItemSource::new(pool.clone());
    let jobs = PgPollerJobStore::new(pool.clone());
    let remote = SyncServiceClient::new(&HttpConfig::default())?;
    let system = SystemState::new();
    let reporter: Arc<dyn PipelineReporter> = Arc::new(TracingReporter);

    let channels = ChannelPool::new(connector, pipeline.connect_timeout, pipeline.borrow_timeout);
    let indexer = FeedIndexer::new(ResolverRegistry::with_defaults(media), channels.clone());
    let registry = indexer.registry().clone();
    let worker =
        BatchWorker::new(store.clone(), items.clone(), indexer).with_reporter(Arc::clone(&reporter));
    let executor = LocalExecutor::new(worker, system.clone(), pipeline.batch_concurrency);
    let strategy = IndexingStrategy::new(executor, remote, jobs, system.clone(), pipeline)
        .with_reporter(Arc::clone(&reporter));
    let service = IndexerService::new(store, items, strategy, registry, system).with_reporter(reporter);

    let result = service.run_by_name(name).await;
    channels.close_all();

    match result {
        Ok(()) => {
            info!(feed = name, "Feed uploaded; the sync-status poller will confirm the index swap");
            Ok(())
        }
        Err(e) => Err(anyhow::anyhow!(e.user_message())),
    }
}

async fn poll(
    pool: &PgPool,
    pipeline: PipelineConfig,
    once: bool,
    tick: Duration,
) -> anyhow::Result<()> {
    let poller = SyncStatusPoller::new(
        PgConfigStore::new(pool.clone()),
        SyncServiceClient::new(&HttpConfig::default())?,
        PgPollerJobStore::new(pool.clone()),
        pipeline.poll_interval,
    );
    let scheduler = PollerScheduler::new(poller, tick);

    if once {
        let summary = scheduler.run_once().await?;
        print_tick_summary(&summary);
        return Ok(());
    }

    let cancel = CancellationToken::new();
    let shutdown = cancel.clone();
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl-C");
        }
        info!("Shutdown requested");
        shutdown.cancel();
    });

    scheduler.run(cancel).await?;
    Ok(())
}

fn print_tick_summary(summary: &TickSummary) {
    println!();
    println!("  Jobs fired:          {}", summary.fired);
    println!("  Index swap observed: {}", summary.finished);
    println!("  Rescheduled:         {}", summary.rescheduled);
    println!("  Failed:              {}", summary.failed);
    println!();
}

async fn import(
    pool: &PgPool,
    config_path: Option<PathBuf>,
    only: Option<&str>,
) -> anyhow::Result<()> {
    let feeds = load_feeds_config(config_path)?.ok_or_else(|| {
        anyhow::anyhow!(
            "No configuration file found. Create ~/.config/feedsync/feeds.toml or use --config"
        )
    })?;

    let selected: Vec<_> = match only {
        Some(name) => vec![
            feeds
                .find_by_name(name)
                .ok_or_else(|| anyhow::anyhow!("Feed '{}' not found in configuration", name))?,
        ],
        None => feeds.feeds.iter().collect(),
    };

    if selected.is_empty() {
        info!("No feeds defined in configuration.");
        return Ok(());
    }

    let store = PgConfigStore::new(pool.clone());
    for entry in selected {
        if entry.endpoint.credential.is_empty() {
            warn!(feed = %entry.name, "Endpoint credential is empty");
        }
        store
            .upsert(&entry.to_run_config())
            .await
            .with_context(|| format!("Failed to import feed '{}'", entry.name))?;
        info!(feed = %entry.name, "Imported");
    }

    Ok(())
}

async fn show_status(pool: &PgPool, reset: Option<&str>) -> anyhow::Result<()> {
    let store = PgConfigStore::new(pool.clone());

    if let Some(name) = reset {
        if store.reset_status(name).await? {
            info!(feed = name, "Status reset to NONE");
        } else {
            warn!(feed = name, "Nothing to reset: feed is unknown or not RUNNING");
        }
    }

    let configs = store.list().await?;
    if configs.is_empty() {
        println!("\nNo feed configurations. Run `feedsync import` first.\n");
        return Ok(());
    }

    let jobs = PgPollerJobStore::new(pool.clone());
    println!();
    println!(
        "  {:<24} {:<10} {:<20} {:<21} {}",
        "FEED", "STATUS", "INDEX", "GENERATION", "NEXT POLL"
    );
    for config in configs {
        let next_poll = jobs
            .list_for_config(&config.name)
            .await?
            .into_iter()
            .filter_map(|job| job.trigger.filter(|t| t.active))
            .map(|t| t.activation_time)
            .min()
            .map(|at| at.format("%Y-%m-%d %H:%M UTC").to_string())
            .unwrap_or_else(|| "-".to_string());
        println!(
            "  {:<24} {:<10} {:<20} {:<21} {}",
            config.name,
            config.status.as_str(),
            config.last_index_name.as_deref().unwrap_or("-"),
            config
                .last_sync_generation
                .map(|g| g.to_string())
                .unwrap_or_else(|| "-".to_string()),
            next_poll
        );
    }
    println!();

    Ok(())
}
