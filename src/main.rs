use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::signal;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use brainstorm_search::api::ApiServer;
use brainstorm_search::search::{
    ContentScanner, ContentSearch, JsonlFileScanner, SearchCache, StrfryScanner,
};
use brainstorm_search::{Config, Metrics, SearchOrchestrator};
use trust_cache::{
    fetch_trust_rows, CustomerRegistry, FileCustomerRegistry, GraphClient, Neo4jHttpClient,
    NoCustomers, ObserverId, PrecomputeManager, WhitelistCache, WhitelistSet,
};

#[derive(Parser)]
#[command(name = "brainstorm-search")]
#[command(about = "Trust-filtered keyword search over Nostr profiles")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Configuration file path
    #[arg(short, long, default_value = "brainstorm-search.toml")]
    config: String,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the search service
    Run,
    /// Validate configuration and query the graph database
    Check,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Load configuration
    let mut config = Config::load_from_file(&cli.config)
        .with_context(|| format!("Failed to load config from {}", cli.config))?;

    config
        .expand_paths()
        .with_context(|| "Failed to expand paths in config")?;

    // Initialize logging
    init_logging(&config.logging.level)?;

    // Validate configuration
    config
        .validate()
        .with_context(|| "Configuration validation failed")?;

    match cli.command.unwrap_or(Commands::Run) {
        Commands::Run => run_service(config).await,
        Commands::Check => check_config(&config).await,
    }
}

async fn run_service(config: Config) -> Result<()> {
    tracing::info!("Starting brainstorm-search v{}", env!("CARGO_PKG_VERSION"));

    let graph: Arc<dyn GraphClient> = Arc::new(
        Neo4jHttpClient::new(&config.neo4j).with_context(|| "Failed to create Neo4j client")?,
    );
    let customers: Arc<dyn CustomerRegistry> = match &config.customers.path {
        Some(path) => Arc::new(FileCustomerRegistry::new(path)),
        None => Arc::new(NoCustomers),
    };
    let precompute = PrecomputeManager::new(graph.clone(), customers, config.precompute.max_age());
    let whitelists = Arc::new(WhitelistCache::new(
        precompute.clone(),
        graph,
        config.whitelist.clone(),
    ));

    let content = ContentSearch::new(
        build_scanner(&config),
        config.search.pass_limits(),
        SearchCache::new(config.search.cache_capacity, config.search.cache_ttl()),
    );
    let metrics = Arc::new(Metrics::new().with_context(|| "Failed to register metrics")?);
    let orchestrator = SearchOrchestrator::new(content, whitelists, metrics)
        .with_owner(config.owner_pubkey())
        .with_limits(config.search.request_limits());

    let refresh_loop = config
        .precompute
        .refresh_interval()
        .map(|interval| precompute.spawn_refresh_loop(interval));
    if refresh_loop.is_none() {
        tracing::info!("Precompute refresh loop disabled");
    }

    let api_server = ApiServer::new(config.server.bind.clone());
    let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel::<()>();
    let mut server = tokio::spawn(async move {
        api_server
            .start(Arc::new(orchestrator), async move {
                let _ = shutdown_rx.await;
            })
            .await
    });

    let result = tokio::select! {
        joined = &mut server => joined.with_context(|| "API server task panicked")?,
        signal = wait_for_shutdown() => {
            signal?;
            tracing::info!("Received shutdown signal, stopping brainstorm-search...");
            let _ = shutdown_tx.send(());
            server.await.with_context(|| "API server task panicked")?
        }
    };

    if let Some(handle) = refresh_loop {
        handle.abort();
    }
    result
}

fn build_scanner(config: &Config) -> Arc<dyn ContentScanner> {
    match &config.strfry.jsonl_path {
        Some(path) => {
            tracing::info!("Scanning profiles from {}", path);
            Arc::new(JsonlFileScanner::new(path))
        }
        None => Arc::new(StrfryScanner::new(
            &config.strfry.binary,
            config.strfry.config.as_ref().map(PathBuf::from),
        )),
    }
}

async fn check_config(config: &Config) -> Result<()> {
    println!("Testing configuration...");
    println!("✓ Configuration is valid");

    match &config.strfry.jsonl_path {
        Some(path) if std::path::Path::new(path).is_file() => {
            println!("✓ Profile export found: {}", path)
        }
        Some(path) => println!("⚠ Profile export not found: {}", path),
        None if std::path::Path::new(&config.strfry.binary).is_file() => {
            println!("✓ strfry binary found: {}", config.strfry.binary)
        }
        None => println!("⚠ strfry binary not found: {}", config.strfry.binary),
    }

    match tokio::fs::read_to_string(&config.whitelist.file_path).await {
        Ok(text) => match WhitelistSet::from_json(&text) {
            Ok(set) => println!("✓ Whitelist file parsed ({} pubkeys)", set.len()),
            Err(e) => println!("⚠ Whitelist file is malformed: {}", e),
        },
        Err(e) => println!(
            "⚠ Whitelist file unreadable ({}): {}",
            config.whitelist.file_path.display(),
            e
        ),
    }

    if let Some(path) = &config.customers.path {
        match FileCustomerRegistry::new(path).active_customers().await {
            Ok(customers) => println!("✓ Customer registry lists {} active", customers.len()),
            Err(e) => println!("⚠ Customer registry failed: {}", e),
        }
    }

    let graph = Neo4jHttpClient::new(&config.neo4j)
        .with_context(|| "Failed to create Neo4j client")?;
    match fetch_trust_rows(&graph, &ObserverId::Owner).await {
        Ok(rows) => println!("✓ Neo4j owner query returned {} rows", rows.len()),
        Err(e) => {
            println!("⚠ Neo4j query failed: {}", e);
            println!("  (Searches will fall back to the whitelist file)");
        }
    }

    println!("\nConfiguration test completed.");
    Ok(())
}

async fn wait_for_shutdown() -> Result<()> {
    // Wait for either SIGTERM or SIGINT
    let mut sigterm = signal::unix::signal(signal::unix::SignalKind::terminate())
        .context("Failed to install SIGTERM handler")?;
    let mut sigint = signal::unix::signal(signal::unix::SignalKind::interrupt())
        .context("Failed to install SIGINT handler")?;

    tokio::select! {
        _ = sigterm.recv() => {
            tracing::info!("Received SIGTERM");
        },
        _ = sigint.recv() => {
            tracing::info!("Received SIGINT");
        },
    }

    Ok(())
}

fn init_logging(level: &str) -> Result<()> {
    let filter = match level.to_lowercase().as_str() {
        "error" => tracing::Level::ERROR,
        "warn" => tracing::Level::WARN,
        "info" => tracing::Level::INFO,
        "debug" => tracing::Level::DEBUG,
        "trace" => tracing::Level::TRACE,
        _ => tracing::Level::INFO,
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter.to_string())),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_timer(tracing_subscriber::fmt::time::ChronoLocal::rfc_3339())
                .with_target(false)
                .with_thread_ids(false)
                .with_thread_names(false)
                .compact(),
        )
        .try_init()
        .with_context(|| "Failed to initialize logging")?;

    Ok(())
}
