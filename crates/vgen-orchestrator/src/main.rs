//! Orchestrator binary.

use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use vgen_db::{create_pool, Db, PoolConfig, RetryConfig};
use vgen_media::MediaUploader;
use vgen_orchestrator::{Context, Orchestrator, OrchestratorConfig};
use vgen_tokens::{TokenPool, TokenPoolConfig};
use vgen_upstream::UpstreamClient;

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    // Colored output for dev, JSON for production.
    let use_json = std::env::var("LOG_FORMAT")
        .map(|v| v.to_lowercase() == "json")
        .unwrap_or(false);

    let env_filter = EnvFilter::from_default_env()
        .add_directive("vgen=info".parse().expect("valid directive"));

    if use_json {
        tracing_subscriber::registry()
            .with(fmt::layer().json())
            .with(env_filter)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(
                fmt::layer()
                    .with_ansi(true)
                    .with_target(true)
                    .with_file(false)
                    .with_line_number(false),
            )
            .with(env_filter)
            .init();
    }

    info!("Starting vgen-orchestrator");

    let pool_config = match PoolConfig::from_env() {
        Ok(c) => c,
        Err(e) => {
            error!("Invalid database configuration: {}", e);
            std::process::exit(1);
        }
    };
    let pg = match create_pool(&pool_config).await {
        Ok(p) => p,
        Err(e) => {
            error!("Failed to connect to database: {}", e);
            std::process::exit(1);
        }
    };
    let db = Db::new(pg, RetryConfig::from_env());

    let tokens = TokenPool::new(db.clone(), TokenPoolConfig::from_env());

    let upstream = match UpstreamClient::from_env() {
        Ok(c) => c,
        Err(e) => {
            error!("Failed to build upstream client: {}", e);
            std::process::exit(1);
        }
    };

    let media = match MediaUploader::from_env() {
        Ok(m) => m,
        Err(e) => {
            error!("Failed to build media uploader: {}", e);
            std::process::exit(1);
        }
    };

    let config = OrchestratorConfig::from_env();
    info!("Orchestrator config: {:?}", config);

    let orchestrator = Orchestrator::new(Context::new(db, tokens, upstream, media, config));
    orchestrator.start().await;

    info!("Orchestrator running; press Ctrl-C to stop");
    tokio::signal::ctrl_c().await.ok();
    info!("Shutdown signal received, exiting");
}
