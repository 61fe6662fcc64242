mod collectors;
mod config;
mod engine;
mod health;
mod http;
mod metrics;
mod report;
mod rpc;
mod state;

use axum::serve;
use clap::Parser;
use collectors::CollectorSet;
use config::Config;
use engine::{Engine, RefreshOutcome};
use health::{evaluate, HealthStatus, HealthThresholds};
use reqwest::Client;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "transmission-monitord")]
#[command(version)]
struct Cli {
    /// YAML config file; environment variables override its values.
    #[arg(long)]
    config: Option<PathBuf>,
    #[arg(long)]
    print_default_config: bool,
    /// Run a single collection round, print the health document and exit.
    #[arg(long)]
    once: bool,
}

#[tokio::main]
async fn main() {
    init_tracing();

    let cli = Cli::parse();
    if cli.print_default_config {
        println!("{}", Config::example_yaml());
        return;
    }

    let cfg = match Config::load(cli.config.as_deref()) {
        Ok(cfg) => cfg,
        Err(err) => {
            error!(error = %err, "failed to load configuration");
            std::process::exit(1);
        }
    };

    if !cfg.enabled {
        info!("metrics disabled by configuration, exiting");
        return;
    }

    let client = Client::builder()
        .user_agent(concat!("transmission-monitord/", env!("CARGO_PKG_VERSION")))
        .build()
        .unwrap_or_else(|_| Client::new());
    let engine = Arc::new(Engine::new(
        CollectorSet::from_config(&cfg, client),
        cfg.interval(),
        cfg.collector_timeout(),
    ));
    let thresholds = HealthThresholds::from(&cfg.health);

    if cli.once {
        std::process::exit(run_once(&engine, &thresholds).await);
    }

    info!(
        listen = %cfg.listen,
        interval_secs = cfg.interval_secs,
        transmission = %cfg.transmission.rpc_url(),
        "starting transmission-monitord"
    );

    let addr: SocketAddr = match cfg.listen.parse() {
        Ok(addr) => addr,
        Err(err) => {
            error!(error = %err, listen = %cfg.listen, "invalid listen address");
            std::process::exit(1);
        }
    };
    let listener = match TcpListener::bind(addr).await {
        Ok(l) => l,
        Err(err) => {
            error!(error = %err, listen = %addr, "failed to bind HTTP listener");
            std::process::exit(1);
        }
    };

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let refresh_task = tokio::spawn(engine.clone().run(shutdown_rx.clone()));

    let http_task = {
        let mut shutdown_rx = shutdown_rx.clone();
        let app = http::build_router(http::HttpAppState {
            engine: engine.clone(),
            thresholds,
            refresh_wait: cfg.request_refresh_timeout(),
        });
        tokio::spawn(async move {
            let server = serve(listener, app).with_graceful_shutdown(async move {
                let _ = shutdown_rx.changed().await;
            });

            if let Err(err) = server.await {
                error!(error = %err, "HTTP server error");
            }
        })
    };

    if let Err(err) = tokio::signal::ctrl_c().await {
        error!(error = %err, "failed to listen for Ctrl+C");
    }
    info!("Ctrl+C received, shutting down");

    let _ = shutdown_tx.send(true);

    let _ = refresh_task.await;
    let _ = http_task.await;
}

/// Exit code 0 while the daemon is serving (healthy or degraded), 1 otherwise.
async fn run_once(engine: &Engine, thresholds: &HealthThresholds) -> i32 {
    let snapshot = match engine.refresh().await {
        RefreshOutcome::Completed(snapshot) => snapshot,
        RefreshOutcome::Coalesced => engine.snapshot(),
    };
    let verdict = evaluate(&snapshot, thresholds);
    match report::HealthDocument::new(&snapshot, &verdict, http::now_unix()).to_json_pretty() {
        Ok(json) => println!("{json}"),
        Err(err) => {
            error!(error = %err, "failed to encode health document");
            return 1;
        }
    }
    match verdict.status {
        HealthStatus::Healthy | HealthStatus::Degraded => 0,
        HealthStatus::Unhealthy | HealthStatus::Error => {
            warn!(status = verdict.status.as_str(), "daemon not healthy");
            1
        }
    }
}

/// `RUST_LOG` wins; `LOG_LEVEL` is accepted as a plain level for container setups.
fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| {
            std::env::var("LOG_LEVEL")
                .map_err(|_| ())
                .and_then(|level| EnvFilter::try_new(level.to_lowercase()).map_err(|_| ()))
        })
        .unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}
