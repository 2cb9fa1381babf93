use advisory_escrow_engine::{
    api::start_server,
    clock::SystemClock,
    config::EngineConfig,
    directory::{InMemoryCatalog, InMemoryDirectory},
    engine::BookingEngine,
    notify::{LogNotifier, Notifier, WebhookNotifier},
    store::InMemoryStore,
    sweeper::ResolutionSweeper,
};
use std::sync::Arc;
use tracing::info;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .init();

    // Load environment variables
    dotenv::dotenv().ok();

    let config = EngineConfig::from_env();
    let port = config.api_port;

    info!("Advisory escrow engine - API server");
    info!("Port: {}", port);

    let notifier: Arc<dyn Notifier> = match WebhookNotifier::from_env() {
        Some(webhook) => {
            info!("webhook notifier enabled");
            Arc::new(webhook)
        }
        None => Arc::new(LogNotifier),
    };

    // Create components
    let engine = Arc::new(BookingEngine::new(
        Arc::new(InMemoryStore::new()),
        Arc::new(InMemoryDirectory::new()),
        Arc::new(InMemoryCatalog::with_categories(&[
            "finanzas", "legal", "tecnologia", "marketing",
        ])),
        Arc::new(SystemClock),
        notifier,
        config,
    ));

    // Start the resolution sweeper
    let sweeper = ResolutionSweeper::from_config(engine.clone());
    let sweeper_handle = sweeper.spawn();
    info!("resolution sweeper started");

    let result = start_server(engine, port).await;

    sweeper_handle.abort();
    result
}
