//! knockgate - passive port-knock gateway
//!
//! This is the composition root that wires together all the components.

use anyhow::Context;
use clap::Parser;
use knockgate::adapters::inbound::{Dispatcher, ListenerManager};
use knockgate::adapters::outbound::{DuoAuthenticator, IpInfoProvider, RouterOsEnforcer};
use knockgate::application::{AccessController, GeoLocator};
use knockgate::config::{load_config, Config, DEFAULT_CONFIG_PATH};
use knockgate::infrastructure::{shutdown_signal, ShutdownController};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::fmt::format::FmtSpan;

/// How long running evaluations may take to finish after a shutdown signal.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Parser, Debug)]
#[command(name = "knockgate", version, about = "Passive port-knock gateway for RouterOS address lists")]
struct Cli {
    /// Path to the YAML configuration file
    #[arg(env = "KNOCKGATE_CONFIG", default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Load configuration from file and environment
    let cfg = load_config(&cli.config)
        .with_context(|| format!("loading configuration from {}", cli.config.display()))?;

    // Setup logging
    let log_level = if cfg.debug {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };

    tracing_subscriber::fmt()
        .with_max_level(log_level)
        .with_span_events(FmtSpan::CLOSE)
        .init();

    tracing::info!(
        "starting knockgate config={} bind={} listeners={}",
        cli.config.display(),
        cfg.bind_address,
        cfg.listeners.len()
    );
    log_summary(&cfg);

    // ===== COMPOSITION ROOT =====

    // 1. Outbound adapters
    let geo_provider = Arc::new(IpInfoProvider::new(&cfg.ipinfo.base_url, &cfg.ipinfo.token)?);
    let second_factor = Arc::new(DuoAuthenticator::new(cfg.duo_credentials())?);
    let enforcer = Arc::new(RouterOsEnforcer::new(cfg.routeros_settings())?);

    // 2. Application services
    let locator = Arc::new(GeoLocator::new(geo_provider, cfg.cache_settings()));
    let controller = Arc::new(AccessController::new(locator, second_factor, enforcer));

    // 3. Inbound adapters
    let shutdown = ShutdownController::new();
    let dispatcher = Dispatcher::new(controller, cfg.max_concurrent_evaluations, shutdown.clone());
    let listeners = ListenerManager::bind_all(cfg.listener_profiles(), cfg.bind_address).await?;
    let handles = listeners.spawn(dispatcher, shutdown.clone());

    shutdown_signal(shutdown.clone()).await;

    for handle in handles {
        if let Err(e) = handle.await {
            tracing::error!("listener task failed: {}", e);
        }
    }

    if shutdown.wait_for_drain(DRAIN_TIMEOUT).await {
        tracing::info!("all evaluations finished");
    }

    Ok(())
}

/// Log the effective configuration without credentials.
fn log_summary(cfg: &Config) {
    tracing::info!(
        url = %cfg.routeros.url,
        username = %cfg.routeros.username,
        insecure = cfg.routeros.insecure_skip_verify,
        "routeros"
    );
    tracing::info!(
        token = !cfg.ipinfo.token.is_empty(),
        cache_time = cfg.ipinfo.cache_time,
        cache_max_count = cfg.ipinfo.cache_max_count,
        "ipinfo"
    );

    let mut cred_names: Vec<&String> = cfg.duo_creds.keys().collect();
    cred_names.sort();
    for name in cred_names {
        let creds = &cfg.duo_creds[name];
        tracing::info!(name = %name, username = %creds.username, hostname = %creds.hostname, "duo credentials");
    }

    for listener in &cfg.listeners {
        tracing::info!(
            listener = %listener.name,
            proto = %listener.proto.to_uppercase(),
            port = listener.port,
            duo = %listener.duo_name,
            allow = %listener.allow_list_name,
            allow_timeout = listener.allow_list_timeout,
            deny = %listener.deny_list_name,
            deny_timeout = listener.deny_list_timeout,
            geos = listener.geos.len(),
            "listener"
        );
    }
}
