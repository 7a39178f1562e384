use std::sync::Arc;

use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use calgate::cache::FreshnessCache;
use calgate::config::GatewayConfig;
use calgate::fetcher::ReadThroughFetcher;
use calgate::gateway::{self, Gateway};
use calgate::middleware::{CorsMiddleware, LoggerMiddleware, Pipeline};
use calgate::server::Server;
use calgate::transport::HttpTransport;

fn init_tracing(level: &str) {
    // RUST_LOG wins over the configured level.
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = GatewayConfig::parse();
    config.validate()?;
    init_tracing(&config.log_level);

    let cache = Arc::new(FreshnessCache::new());
    let fetcher = ReadThroughFetcher::new(Arc::clone(&cache), HttpTransport::new()?);
    let gateway = Arc::new(Gateway::new(config.upstream.clone(), fetcher));

    let pipeline = Pipeline::new(gateway::routes(gateway))
        .layer(LoggerMiddleware)
        .layer(CorsMiddleware::permissive());

    let server = Server::bind(&config.listen)
        .await?
        .with_timeouts(config.timeouts());
    info!(
        address = %server.local_addr(),
        upstream = %config.upstream,
        "calendar API gateway running"
    );

    server
        .run(
            move |req| {
                let pipeline = pipeline.clone();
                async move { pipeline.handle(req).await }
            },
            async {
                if let Err(e) = tokio::signal::ctrl_c().await {
                    tracing::error!(error = %e, "failed to listen for ctrl-c");
                    std::future::pending::<()>().await;
                }
            },
        )
        .await?;

    info!(cached_keys = cache.len(), "gateway stopped");
    Ok(())
}
