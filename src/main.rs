use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tokio::sync::watch;
use tracing::{error, info};

use feedrelay::config::DeliveryKind;
use feedrelay::feed::{LogSink, WebhookSink};
use feedrelay::{
    Config, Database, DeliverySink, FeedSource, PollScheduler, Result, RssFetcher,
    SubscriptionService,
};

#[derive(Parser)]
#[command(name = "feedrelay")]
#[command(about = "Poll RSS/Atom feeds and deliver new items")]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, default_value = "config.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the poll scheduler until interrupted
    Run,
    /// Subscribe a destination to a feed
    Add {
        /// Feed URL
        url: String,
        /// Destination identifier passed to the delivery sink
        destination: String,
    },
    /// Remove a subscription
    Remove {
        /// Feed URL
        url: String,
    },
    /// List subscriptions
    List,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Load configuration
    let mut config = match Config::load(&cli.config) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Failed to load {}: {e}", cli.config.display());
            eprintln!("Using default configuration.");
            Config::default()
        }
    };
    config.apply_env_overrides();

    if let Err(e) = config.validate() {
        eprintln!("Invalid configuration: {e}");
        return ExitCode::FAILURE;
    }

    // Initialize logging
    if matches!(cli.command, Commands::Run) {
        if let Err(e) = feedrelay::logging::init(&config.logging) {
            eprintln!("Failed to initialize logging: {e}");
            // Fall back to console-only logging
            feedrelay::logging::init_console_only(&config.logging.level);
        }
    } else {
        feedrelay::logging::init_console_only(&config.logging.level);
    }

    match run(cli.command, config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{e}");
            ExitCode::FAILURE
        }
    }
}

async fn run(command: Commands, config: Config) -> Result<()> {
    let db = Database::open(&config.database.path, config.database.max_connections).await?;
    let fetcher = RssFetcher::new(&config.fetch)?;

    match command {
        Commands::Run => {
            let sink = build_sink(&config)?;
            let db = Arc::new(db);
            let source: Arc<dyn FeedSource> = Arc::new(fetcher);
            let scheduler =
                PollScheduler::with_config(Arc::clone(&db), source, sink, &config.poll);

            let (shutdown_tx, shutdown_rx) = watch::channel(false);
            let handle = scheduler.spawn(shutdown_rx);

            info!("feedrelay started; press Ctrl-C to stop");
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!("Failed to listen for shutdown signal: {e}");
            }
            info!("Shutting down; finishing in-flight delivery");
            let _ = shutdown_tx.send(true);

            if let Err(e) = handle.await {
                error!("Poll scheduler task failed: {e}");
            }
            db.close().await;
        }
        Commands::Add { url, destination } => {
            let service = SubscriptionService::new(&db, &fetcher);
            let sub = service.add(&url, &destination).await?;
            println!(
                "Subscribed {} -> {} (cursor: {})",
                sub.url,
                sub.destination,
                sub.cursor_item_key.as_deref().unwrap_or("<empty feed>")
            );
            db.close().await;
        }
        Commands::Remove { url } => {
            SubscriptionService::new(&db, &fetcher).remove(&url).await?;
            println!("Removed {url}");
            db.close().await;
        }
        Commands::List => {
            let subs = SubscriptionService::new(&db, &fetcher).list().await?;
            if subs.is_empty() {
                println!("No subscriptions.");
            }
            for sub in subs {
                println!(
                    "{:>4}  {}  -> {}  cursor={}  errors={}",
                    sub.id,
                    sub.url,
                    sub.destination,
                    sub.cursor_timestamp
                        .map(|t| t.to_rfc3339())
                        .unwrap_or_else(|| "-".to_string()),
                    sub.error_count
                );
            }
            db.close().await;
        }
    }

    Ok(())
}

fn build_sink(config: &Config) -> Result<Arc<dyn DeliverySink>> {
    Ok(match config.delivery.kind {
        DeliveryKind::Log => Arc::new(LogSink),
        DeliveryKind::Webhook => Arc::new(WebhookSink::new(
            config.delivery.webhook_url.clone(),
            config.delivery.timeout_secs,
        )?),
    })
}
