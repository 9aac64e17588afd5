use anyhow::Result;
use clap::Parser;
use matteserve::Config;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    // A missing .env file is fine
    dotenvy::dotenv().ok();
    let config = Config::parse();

    let default_filter = if config.debug {
        "matteserve=debug,tower_http=debug"
    } else {
        "matteserve=info,tower_http=info"
    };
    let filter = if config.debug {
        EnvFilter::new(default_filter)
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter))
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .init();

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "matteserve starting");
    matteserve::serve(config).await
}
