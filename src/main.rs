use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use feedloom::feed::FeedRepository;
use feedloom::{
    shutdown_signal, BatchBuilder, Config, Daemon, Database, FeedCreationRequest, FeedHandler,
    FeedloomError, HttpFetcher, I18nManager, Integration, IntegrationDispatcher, NewUser,
    Result, UserRepository, WebhookIntegration, WorkerPool,
};

#[derive(Parser)]
#[command(name = "feedloom")]
#[command(about = "Feed ingestion and scheduling engine", long_about = None)]
struct Cli {
    /// Path to the configuration file
    #[arg(short, long, default_value = "config.toml", global = true)]
    config: PathBuf,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the scheduler, workers and cleanup until interrupted (default)
    Daemon,
    /// Refresh feeds once, regardless of their next check time
    RefreshFeeds {
        #[arg(long)]
        user_id: Option<i64>,
        #[arg(long)]
        category_id: Option<i64>,
        /// Maximum number of feeds, 0 for all
        #[arg(long, default_value_t = 0)]
        batch_size: i64,
    },
    /// Clear the error counter of every feed
    ResetFeedErrors,
    /// Create a user
    CreateUser {
        username: String,
        #[arg(long, default_value = "en")]
        language: String,
    },
    /// Subscribe a user to a feed
    AddFeed {
        username: String,
        url: String,
        #[arg(long)]
        category_id: Option<i64>,
        /// Keep crawled content instead of updating existing entries
        #[arg(long)]
        crawler: bool,
    },
    /// Apply database migrations and exit
    Migrate,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let config = match load_config(&cli.config) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Invalid configuration: {e}");
            return ExitCode::FAILURE;
        }
    };

    if let Err(e) = feedloom::logging::init(&config.logging) {
        eprintln!("Failed to initialize logging: {e}");
        feedloom::logging::init_console_only(&config.logging.level);
    }

    match run(cli.command.unwrap_or(Commands::Daemon), config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{}", e);
            ExitCode::FAILURE
        }
    }
}

fn load_config(path: &Path) -> Result<Config> {
    let mut config = if path.exists() {
        Config::load(path)?
    } else {
        eprintln!("{} not found, using default configuration.", path.display());
        Config::default()
    };
    config.apply_env_overrides()?;
    config.validate()?;
    Ok(config)
}

async fn run(command: Commands, config: Config) -> Result<()> {
    let db = Database::open(&config.database.path, config.database.max_connections).await?;

    match command {
        Commands::Migrate => {
            info!("Database schema at version {}", db.schema_version().await?);
        }
        Commands::ResetFeedErrors => {
            let count = FeedRepository::new(db.pool()).reset_all_errors().await?;
            info!("Reset errors of {} feeds", count);
        }
        Commands::CreateUser { username, language } => {
            let user = UserRepository::new(db.pool())
                .create(&NewUser::new(username).with_language(language))
                .await?;
            info!("Created user {} with ID {}", user.username, user.id);
        }
        Commands::AddFeed {
            username,
            url,
            category_id,
            crawler,
        } => {
            let user = UserRepository::new(db.pool())
                .get_by_username(&username)
                .await?
                .ok_or_else(|| FeedloomError::NotFound(format!("user {username}")))?;
            let (handler, integrations) = build_handler(&config, db.clone())?;
            let mut request = FeedCreationRequest::new(url).with_crawler(crawler);
            request.category_id = category_id;
            let feed = handler.create_feed(user.id, &request).await?;
            drop(handler);
            finish_integrations(integrations).await;
            info!("Created feed {} ({}) with ID {}", feed.title, feed.feed_url, feed.id);
        }
        Commands::RefreshFeeds {
            user_id,
            category_id,
            batch_size,
        } => {
            let (handler, integrations) = build_handler(&config, db.clone())?;
            let workers = WorkerPool::new(
                config.worker.pool_size,
                config.worker.queue_capacity,
                handler.clone(),
            );
            drop(handler);

            let mut builder = BatchBuilder::new(db.pool())
                .with_batch_size(batch_size)
                .with_error_limit(config.polling.parsing_error_limit)
                .without_disabled_feeds();
            if let Some(user_id) = user_id {
                builder = builder.with_user_id(user_id);
            }
            if let Some(category_id) = category_id {
                builder = builder.with_category_id(category_id);
            }
            let count = feedloom::scheduler::enqueue_batch(&builder, &workers).await?;
            workers.wait().await;
            finish_integrations(integrations).await;
            info!("Refreshed {} feeds", count);
        }
        Commands::Daemon => {
            let (handler, integrations) = build_handler(&config, db.clone())?;
            let workers = WorkerPool::new(
                config.worker.pool_size,
                config.worker.queue_capacity,
                handler.clone(),
            );
            drop(handler);

            let mut daemon = Daemon::new(
                db.clone(),
                workers,
                config.polling.clone(),
                config.cleanup.clone(),
                Duration::from_secs(config.worker.shutdown_grace_secs),
            );
            if let Some(task) = integrations {
                daemon = daemon.with_background_task(task);
            }
            daemon.run(shutdown_signal()).await?;
            return Ok(());
        }
    }

    db.close().await;
    Ok(())
}

/// Wait for queued integration pushes once every handler is gone.
async fn finish_integrations(task: Option<JoinHandle<()>>) {
    if let Some(task) = task {
        if let Err(e) = task.await {
            warn!("Integration task failed: {}", e);
        }
    }
}

/// Wire the refresh pipeline from configuration.
fn build_handler(
    config: &Config,
    db: Database,
) -> Result<(Arc<FeedHandler>, Option<JoinHandle<()>>)> {
    let mut i18n = I18nManager::embedded(&config.locale.default_language)
        .map_err(|e| FeedloomError::Config(e.to_string()))?;
    if !config.locale.catalog_dir.is_empty() {
        i18n.load_dir(&config.locale.catalog_dir)
            .map_err(|e| FeedloomError::Config(e.to_string()))?;
    }

    let fetcher = Arc::new(HttpFetcher::new(config.http_client.clone()));
    let mut handler = FeedHandler::new(db, fetcher, config.scheduler_config(), Arc::new(i18n))
        .with_rate_limited_backoff(config.polling.rate_limited_backoff_minutes);

    let mut integrations: Vec<Arc<dyn Integration>> = Vec::new();
    if !config.integration.webhook_url.is_empty() {
        integrations.push(Arc::new(WebhookIntegration::new(
            &config.integration.webhook_url,
            &config.http_client.user_agent,
            config.http_client.timeout(),
        )?));
    }

    let task = if integrations.is_empty() {
        None
    } else {
        let (dispatcher, task) =
            IntegrationDispatcher::spawn(integrations, config.integration.queue_capacity);
        handler = handler.with_dispatcher(dispatcher);
        Some(task)
    };

    Ok((Arc::new(handler), task))
}
