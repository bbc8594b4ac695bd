//! Unigate binary
//!
//! Loads configuration from the environment (with `.env` support), wires the
//! standalone collaborator implementations, and serves the gateway until
//! interrupted.

use std::path::PathBuf;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};
use url::Url;

use unigate_core::GatewayConfig;
use unigate_gateway::auth::{sha256_hex, IdentityProvider};
use unigate_gateway::pool::TcpConnector;
use unigate_gateway::providers::{
    generate_api_key, DisabledIdentityProvider, FileBackedRepository, HttpIdentityProvider,
    WebhookNotifier,
};
use unigate_gateway::server;
use unigate_gateway::services::{GatewayDependencies, GatewayServices};

fn init_logging() -> Option<tracing_appender::non_blocking::WorkerGuard> {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("unigate=info,tower_http=warn"));

    let console_layer = fmt::layer().with_target(false);

    // Optional daily-rolling file logs alongside the console.
    let (file_layer, guard) = match std::env::var("UNIGATE_LOG_DIR") {
        Ok(dir) => {
            if let Err(e) = std::fs::create_dir_all(&dir) {
                eprintln!("Warning: failed to create log directory: {}", e);
            }
            let appender = RollingFileAppender::builder()
                .rotation(Rotation::DAILY)
                .filename_prefix("unigate")
                .filename_suffix("log")
                .build(&dir)
                .expect("file appender");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = fmt::layer().with_ansi(false).with_writer(writer);
            (Some(layer), Some(guard))
        }
        Err(_) => (None, None),
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(console_layer)
        .with(file_layer)
        .init();

    guard
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    if std::env::args().any(|arg| arg == "--generate-key") {
        let key = generate_api_key();
        println!("api key:     {}", key);
        println!("key hash:    {}", sha256_hex(&key));
        println!("Store the hash in the api_keys section of your config file.");
        return Ok(());
    }

    let _log_guard = init_logging();

    let config = GatewayConfig::from_env();
    info!(addr = %config.addr(), "[Main] Starting unigate");

    let config_file = std::env::var("UNIGATE_CONFIG_FILE")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("unigate.json"));
    let repository = Arc::new(FileBackedRepository::load(&config_file)?);
    info!(file = %config_file.display(), "[Main] Loaded server and key records");

    let identity: Arc<dyn IdentityProvider> = match std::env::var("UNIGATE_JWKS_URL") {
        Ok(raw) => {
            let url = Url::parse(&raw)?;
            info!(jwks_url = %url, "[Main] Bearer verification enabled");
            Arc::new(HttpIdentityProvider::new(url))
        }
        Err(_) => {
            warn!("[Main] UNIGATE_JWKS_URL not set - bearer tokens will be rejected");
            Arc::new(DisabledIdentityProvider)
        }
    };

    let notifier = match std::env::var("UNIGATE_NOTIFY_WEBHOOK") {
        Ok(raw) => Arc::new(WebhookNotifier::new(Some(Url::parse(&raw)?))),
        Err(_) => Arc::new(WebhookNotifier::disabled()),
    };

    let services = GatewayServices::build(
        config,
        GatewayDependencies {
            servers: repository.clone(),
            api_keys: repository,
            identity,
            notifier,
            connector: Arc::new(TcpConnector),
        },
    );

    let shutdown = CancellationToken::new();
    let maintenance = services.spawn_maintenance(shutdown.clone());

    let shutdown_on_signal = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("[Main] Shutdown signal received");
            shutdown_on_signal.cancel();
        }
    });

    server::run(services, shutdown).await?;
    maintenance.abort();
    Ok(())
}
