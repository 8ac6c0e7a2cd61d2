use anyhow::Result;
use chrono::Utc;
use clap::{Parser, Subcommand};
use scan_service::{ScanOrchestrator, ScanPlan};
use search_client::{backfill, fetch_posts, SearchApiClient};
use sentiment_engine::{
    summarize, ClassificationCache, Classifier, ExtremeBoundaries, LexiconClassifier, TimeBucketer,
    TimelineProfile,
};
use sentiscan_core::{AppConfig, ConfigError, CoreError, ErrorExt};
use serde_json::json;
use std::path::{Path, PathBuf};
use timeline_store::{ScanStorage, SentimentStore};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "sentiscan")]
#[command(about = "Harvest author timelines and aggregate their sentiment over time")]
#[command(version)]
struct Cli {
    /// TOML configuration file
    #[arg(short, long, default_value = "config.toml", env = "SENTISCAN_CONFIG")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Discover authors per location and persist their timelines
    Scan,

    /// Classify persisted timelines and print per-bucket population statistics
    Analyze,

    /// Print the activity profile of every persisted author
    Profile,

    /// Run the configured search once and print the matching posts
    Search {
        /// Look these post ids up instead of searching
        #[arg(long, num_args = 1..)]
        lookup: Vec<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("sentiscan=info,scan_service=info,search_client=info")),
        )
        .init();

    let cli = Cli::parse();
    let result = run(cli).await;
    if let Err(e) = &result {
        if let Some(core) = e.downcast_ref::<CoreError>() {
            core.log_error();
            eprintln!("{}", core.user_friendly_message());
        } else if let Some(config) = e.downcast_ref::<ConfigError>() {
            config.log_error();
            eprintln!("{}", config.user_friendly_message());
        }
    }
    result
}

async fn run(cli: Cli) -> Result<()> {
    let config = AppConfig::load(&cli.config)?;

    match cli.command {
        Commands::Scan => cmd_scan(&config).await,
        Commands::Analyze => cmd_analyze(&config).await,
        Commands::Profile => cmd_profile(&config).await,
        Commands::Search { lookup } => cmd_search(&config, &lookup).await,
    }
}

fn api_client(config: &AppConfig) -> Result<SearchApiClient> {
    let token = config.bearer_token()?;
    Ok(SearchApiClient::new(&config.api, token, config.search.rate_limit)?)
}

async fn cmd_scan(config: &AppConfig) -> Result<()> {
    let client = api_client(config)?;
    let plan = ScanPlan::from_config(config, Utc::now())?;
    let storage = ScanStorage::new(&config.full_scan.path);

    info!("Starting scan over {} partitions", plan.partitions());
    let mut orchestrator = ScanOrchestrator::resume(storage, client, plan).await?;
    let report = orchestrator.run().await?;

    let metrics = orchestrator.provider().get_metrics().await;
    let status = orchestrator.provider().get_rate_limit_status().await;
    let output = json!({
        "report": report,
        "api": metrics,
        "rate_limit": {
            "remaining_in_window": status.requests_remaining_in_window(),
            "window_utilization_percentage": status.window_utilization_percentage(),
            "status": status,
        },
    });
    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}

async fn classifier(path: Option<&Path>) -> Result<LexiconClassifier> {
    match path {
        Some(path) => Ok(LexiconClassifier::load(&[path]).await?),
        None => Ok(LexiconClassifier::builtin()),
    }
}

async fn cmd_analyze(config: &AppConfig) -> Result<()> {
    let storage = ScanStorage::new(&config.full_scan.path);
    let classifier = classifier(config.analyze_sentiment.lexicon_path.as_deref()).await?;
    let boundaries = ExtremeBoundaries::from_config(&config.analyze_sentiment);
    let bucketer = TimeBucketer::from_config(&config.plot)?;

    let timelines = storage.load_author_timelines().await?;
    info!(
        "Analyzing {} timelines with {}",
        timelines.len(),
        classifier.name()
    );

    let store = SentimentStore::new(&config.analyze_sentiment.users_dir);
    let mut cache = ClassificationCache::open(store, config.analyze_sentiment.flush_every).await?;
    let (authors, stats) = cache
        .classify_authors(timelines, &classifier, boundaries, &bucketer)
        .await?;

    let output = json!({
        "classifier": classifier.name(),
        "authors": authors.len(),
        "cache_hits": stats.hits,
        "classified": stats.misses,
        "dropped": stats.dropped,
        "failed": stats.failed,
        "summary": summarize(&authors),
    });
    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}

async fn cmd_profile(config: &AppConfig) -> Result<()> {
    let storage = ScanStorage::new(&config.full_scan.path);
    let now = Utc::now();

    let mut profiles = serde_json::Map::new();
    for timeline in storage.load_author_timelines().await? {
        let Some(first) = timeline.first() else {
            continue;
        };
        let author = first.author_id.to_string();
        let profile = TimelineProfile::from_timeline(&timeline, now);
        profiles.insert(author, serde_json::to_value(profile)?);
    }
    println!("{}", serde_json::to_string_pretty(&profiles)?);
    Ok(())
}

async fn cmd_search(config: &AppConfig, lookup: &[String]) -> Result<()> {
    let client = api_client(config)?;
    let posts = if lookup.is_empty() {
        fetch_posts(&client, &config.search).await?.posts
    } else {
        backfill(&client, lookup).await
    };
    println!("{}", serde_json::to_string_pretty(&posts)?);
    Ok(())
}
