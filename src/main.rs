mod config;

use anyhow::Context as _;
use clap::Parser as _;
use config::{Command, Config};
use keygate::{
    AppState,
    admin::{self, KeyListing},
    build_metrics_layer_and_handle, build_metrics_router, build_router,
    clock::SystemClock,
    gate::AdmissionGate,
    limiter::RateLimiter,
    proxy::Backend,
    sqlite_store::SqliteKeyStore,
    traits::KeyStore,
};
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{error, info, instrument};

#[tokio::main]
#[instrument]
pub async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let config = Config::parse().validate()?;

    let store = Arc::new(
        SqliteKeyStore::open(&config.database)
            .with_context(|| format!("Failed to open key database {}", config.database.display()))?,
    );

    match config.command.clone() {
        None | Some(Command::Serve) => serve(config, store).await,
        Some(command) => run_key_command(command, store.as_ref()).await,
    }
}

async fn serve(config: Config, store: Arc<SqliteKeyStore>) -> anyhow::Result<()> {
    info!("Starting keygate with config: {:?}", config);

    let gate = AdmissionGate::new(store, RateLimiter::new());
    let backend = Backend::new(config.ollama_url.clone());
    let app_state = AppState::new(gate, backend, config.pool());
    let mut router = build_router(app_state);

    if config.metrics {
        let (prometheus_layer, handle) =
            build_metrics_layer_and_handle(config.metrics_prefix.clone());
        router = router.layer(prometheus_layer);

        let metrics_addr = format!("0.0.0.0:{}", config.metrics_port);
        let metrics_listener = TcpListener::bind(&metrics_addr).await?;
        info!("Metrics listening on {}", metrics_addr);
        tokio::spawn(async move {
            if let Err(e) = axum::serve(metrics_listener, build_metrics_router(handle)).await {
                error!("Metrics server failed: {}", e);
            }
        });
    }

    let bind_addr = format!("0.0.0.0:{}", config.port);
    let listener = TcpListener::bind(&bind_addr).await?;
    info!(
        "keygate listening on {}, forwarding to {}",
        bind_addr, config.ollama_url
    );

    axum::serve(listener, router).await?;

    Ok(())
}

async fn run_key_command(command: Command, store: &dyn KeyStore) -> anyhow::Result<()> {
    let clock = SystemClock;
    match command {
        Command::Serve => {}
        Command::GenerateKey {
            rate_limit,
            description,
        } => {
            let record = admin::create_key(store, &clock, rate_limit, description).await?;
            println!("API key generated: {}", record.key);
        }
        Command::AddKey {
            key,
            rate_limit,
            description,
        } => {
            admin::add_key(store, &clock, &key, rate_limit, description).await?;
            println!("API key added: {key}");
        }
        Command::ListKeys => {
            let keys = store.list().await?;
            if keys.is_empty() {
                println!("No API keys");
            }
            for record in &keys {
                println!("{}", KeyListing(record));
            }
        }
        Command::RemoveKey { key } => {
            store.remove(&key).await?;
            println!("API key removed: {key}");
        }
        Command::Activate { key } => {
            store.set_active(&key, true).await?;
            println!("Activated key: {key}");
        }
        Command::Deactivate { key } => {
            store.set_active(&key, false).await?;
            println!("Deactivated key: {key}");
        }
        Command::RateLimit { key, limit } => {
            store.set_rate_limit(&key, limit).await?;
            println!("Set rate limit to {limit} for key: {key}");
        }
    }
    Ok(())
}
