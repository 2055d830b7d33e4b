//! Application entry point for intel-hub.
//!
//! Builds every enabled connector and polls until Ctrl+C.

use std::sync::Arc;
use std::time::Instant;

use anyhow::Result;
use dotenv::dotenv;
use log::debug;
use log::info;
use tracing_appender::non_blocking::WorkerGuard;

use intel_hub::config::Config;
use intel_hub::connector::Connector;
use intel_hub::connector::ConnectorSettingsBuilder;
use intel_hub::logging::setup_logging;
use intel_hub::messenger::Messenger;
use intel_hub::messenger::TelegramMessenger;
use intel_hub::registry::ConnectorRegistry;
use intel_hub::repository::MemoryRepository;
use intel_hub::repository::SubscriptionRepository;
use intel_hub::source::sources::Sources;

#[tokio::main]
async fn main() -> Result<()> {
    dotenv().ok();

    let init_start = Instant::now();
    let (config, _log_guard) = load_config().await?;

    let repository = setup_repository(&config, init_start).await?;
    let messenger: Arc<dyn Messenger> = Arc::new(TelegramMessenger::new(
        config.telegram_api_url.clone(),
        config.telegram_bot_token.clone(),
    ));
    let registry = setup_registry(&config, repository, messenger)?;

    registry.init_all().await;
    registry.start_all().await;

    run(&registry, init_start).await
}

async fn load_config() -> Result<(Arc<Config>, WorkerGuard)> {
    let mut config = Config::new();
    config.load()?;
    let config = Arc::new(config);
    let log_guard = setup_logging(&config)?;
    info!("Starting intel-hub...");
    Ok((config, log_guard))
}

async fn setup_repository(
    config: &Config,
    init_start: Instant,
) -> Result<Arc<dyn SubscriptionRepository>> {
    debug!("Setting up subscription store...");
    let repository = match &config.data_path {
        Some(path) => MemoryRepository::open(path).await?,
        None => {
            info!("DATA_PATH is empty, subscriptions will not survive a restart.");
            MemoryRepository::new()
        }
    };
    info!(
        "Subscription store ready ({:.2}s).",
        init_start.elapsed().as_secs_f64()
    );
    Ok(Arc::new(repository))
}

fn setup_registry(
    config: &Config,
    repository: Arc<dyn SubscriptionRepository>,
    messenger: Arc<dyn Messenger>,
) -> Result<ConnectorRegistry> {
    debug!("Setting up connectors...");
    let sources = Sources::new(config)?;
    let mut registry = ConnectorRegistry::new();

    for source in sources.enabled(config) {
        let mut settings = ConnectorSettingsBuilder::default();
        if let Some(interval) = config.poll_intervals.get(&source.kind()) {
            settings = settings.interval(*interval);
        }
        let connector = Connector::new(
            source,
            repository.clone(),
            messenger.clone(),
            settings.build()?,
        )?;
        registry.register(connector);
    }
    Ok(registry)
}

async fn run(registry: &ConnectorRegistry, init_start: Instant) -> Result<()> {
    info!(
        "intel-hub is up in {:.2}s. Press Ctrl+C to stop.",
        init_start.elapsed().as_secs_f64()
    );

    tokio::signal::ctrl_c().await?;
    info!("Ctrl+C received, shutting down.");
    registry.stop_all().await;

    Ok(())
}
