use std::sync::Arc;

use clap::Parser;
use solace_core::{EnvCredentials, SolaceConfig};
use tokio::sync::broadcast;
use tracing_subscriber::{fmt, EnvFilter};

use solace_server::http::{start_http_server, HttpState};
use solace_server::pipeline;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    #[arg(short, long, default_value = "solace.toml")]
    config: String,

    #[arg(long)]
    health: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present (dev convenience — production uses real env vars)
    dotenvy::dotenv().ok();

    let args = Args::parse();

    // Load config
    let config = match SolaceConfig::load(&args.config) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Failed to load config from {}: {}", args.config, e);
            std::process::exit(1);
        }
    };

    // Init logging; RUST_LOG wins over the configured level
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.service.log_level));
    fmt().with_env_filter(filter).init();

    let pipeline = match pipeline::build_pipeline(&config, Arc::new(EnvCredentials)).await {
        Ok(p) => p,
        Err(e) => {
            eprintln!("Failed to build dispatch pipeline: {}", e);
            std::process::exit(1);
        }
    };

    if args.health {
        match &pipeline.pool {
            Some(pool) => match solace_core::db::health_check(pool).await {
                Ok(v) => println!("✅ PostgreSQL connected: {}", v),
                Err(e) => {
                    println!("❌ PostgreSQL connection failed: {}", e);
                    std::process::exit(1);
                }
            },
            None => println!("✅ Store: {}", pipeline.store.name()),
        }
        println!("✅ Backend: {}", pipeline.dispatcher.backend_name());
        println!("✅ Solace health check passed");
        return Ok(());
    }

    if !config.http.enabled {
        anyhow::bail!("HTTP API is disabled in {}; nothing to serve", args.config);
    }

    let (tx, _rx) = broadcast::channel(1);
    let shutdown_tx = tx.clone();

    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl+C: {}", e);
            return;
        }
        tracing::info!("Shutdown signal received");
        let _ = shutdown_tx.send(());
    });

    let state = HttpState {
        dispatcher: pipeline.dispatcher,
        store: pipeline.store,
        pool: pipeline.pool,
    };
    start_http_server(state, &config, tx.subscribe()).await?;

    Ok(())
}
