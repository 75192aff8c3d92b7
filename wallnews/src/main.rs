/*
wallnews - single-binary main.rs
This binary builds the dashboard (news client, LLM provider, cache) and serves it over HTTP.
*/

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use common::Config;
use tracing::{error, info};
use tracing_subscriber::{fmt, EnvFilter};

use wallnews::dashboard::Dashboard;
use wallnews::server::launch_rocket;

#[derive(Parser, Debug)]
#[command(name = "wallnews", about = "WallNews digest server")]
struct Args {
    /// Path to config.toml
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Override log level (info, debug, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let filter = EnvFilter::try_new(&args.log_level).unwrap_or_else(|_| EnvFilter::new("info"));
    fmt().with_env_filter(filter).init();

    // API keys may live in a local .env
    dotenv::dotenv().ok();

    let default_path = PathBuf::from("config.default.toml");
    let override_path = if let Some(p) = args.config {
        if !p.exists() {
            error!(path = ?p, "specified config file not found");
            return Err(anyhow::anyhow!("Config file not found: {}", p.display()));
        }
        Some(p)
    } else {
        let p = PathBuf::from("config.toml");
        if p.exists() {
            Some(p)
        } else {
            None
        }
    };

    let config = match Config::load_with_defaults(
        if default_path.exists() { Some(&default_path) } else { None },
        override_path.as_deref(),
    )
    .await
    {
        Ok(cfg) => cfg,
        Err(e) => {
            error!(%e, "failed to load configuration");
            return Err(e);
        }
    };
    info!(default = ?default_path, override = ?override_path, "configuration loaded");

    let dashboard = match Dashboard::from_config(&config).await {
        Ok(d) => d,
        Err(e) => {
            error!("failed to initialize dashboard: {:#}", e);
            return Err(e);
        }
    };
    info!(
        model = dashboard.model(),
        cache = dashboard.cache().backend_name(),
        "dashboard initialized"
    );

    info!("Launching Rocket HTTP server");
    if let Err(e) = launch_rocket(Arc::new(dashboard), Arc::new(config)).await {
        error!(%e, "Rocket server failed");
        return Err(e);
    }

    info!("Shutdown complete");
    Ok(())
}
