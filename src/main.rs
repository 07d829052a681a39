//! OpenLDAP Exporter Binary Entry Point
//!
//! Runs the scrape loop and serves its metrics over HTTP.
//! Core functionality is provided by the `openldap_exporter` library crate.

use std::net::SocketAddr;
use std::time::Duration;

use clap::Parser;
use openldap_exporter::{
    config::{AppConfig, parse_duration},
    directory::{LdapConnector, Transport},
    metrics::MetricSink,
    scrape::Scraper,
    server::{AppState, create_router},
};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// OpenLDAP Exporter - Prometheus metrics from cn=Monitor
#[derive(Parser, Debug)]
#[command(name = "openldap-exporter", version, about, long_about = None)]
struct Cli {
    /// Path to configuration file (built-in defaults when omitted)
    #[arg(short, long, env = "OPENLDAP_EXPORTER_CONFIG")]
    config: Option<String>,

    /// Server bind address (overrides config file)
    #[arg(long, env = "OPENLDAP_EXPORTER_SERVER_BIND")]
    server_bind: Option<String>,

    /// Server port (overrides config file)
    #[arg(long, env = "OPENLDAP_EXPORTER_SERVER_PORT")]
    server_port: Option<u16>,

    /// Directory server address (overrides config file)
    #[arg(long, env = "OPENLDAP_EXPORTER_LDAP_ADDR")]
    ldap_addr: Option<String>,

    /// Directory transport: tcp, tls or unix (overrides config file)
    #[arg(long, env = "OPENLDAP_EXPORTER_LDAP_TRANSPORT", value_parser = parse_transport)]
    ldap_transport: Option<Transport>,

    /// Bind DN (overrides config file)
    #[arg(long, env = "OPENLDAP_EXPORTER_LDAP_USER")]
    ldap_user: Option<String>,

    /// Bind password (overrides config file)
    #[arg(long, env = "OPENLDAP_EXPORTER_LDAP_PASSWORD", hide_env_values = true)]
    ldap_password: Option<String>,

    /// Scrape interval, e.g. 30s (overrides config file)
    #[arg(long, env = "OPENLDAP_EXPORTER_INTERVAL", value_parser = parse_duration)]
    interval: Option<Duration>,

    /// Replication peer base DN, repeatable (replaces the config file list)
    #[arg(long = "replication-object", env = "OPENLDAP_EXPORTER_REPLICATION_OBJECTS", value_delimiter = ',')]
    replication_objects: Vec<String>,

    /// Check replication delay against the primary
    #[arg(long, env = "OPENLDAP_EXPORTER_DELAY_CHECK")]
    delay_check: bool,

    /// Primary directory server address
    #[arg(long, env = "OPENLDAP_EXPORTER_PRIMARY_ADDR")]
    primary_addr: Option<String>,
}

fn parse_transport(s: &str) -> Result<Transport, String> {
    s.parse()
        .map_err(|e: strum::ParseError| format!("{}: '{}', expected tcp, tls or unix", e, s))
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,openldap_exporter=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("OpenLDAP Exporter");

    // Parse CLI arguments
    let cli = Cli::parse();

    // Load configuration from file
    let mut config = match cli.config {
        Some(ref path) => {
            tracing::info!("Loading configuration from: {}", path);
            AppConfig::load(path)?
        }
        None => AppConfig::default(),
    };

    // Apply CLI/env overrides (CLI > ENV > config file)
    if let Some(bind) = cli.server_bind {
        config.server.bind = bind;
    }
    if let Some(port) = cli.server_port {
        config.server.port = port;
    }
    if let Some(addr) = cli.ldap_addr {
        config.ldap.addr = addr;
    }
    if let Some(transport) = cli.ldap_transport {
        config.ldap.transport = transport;
    }
    if let Some(user) = cli.ldap_user {
        config.ldap.user = user;
    }
    if let Some(password) = cli.ldap_password {
        config.ldap.password = password;
    }
    if let Some(interval) = cli.interval {
        config.scrape.interval = interval;
    }
    if !cli.replication_objects.is_empty() {
        config.replication.objects = cli.replication_objects;
    }
    if cli.delay_check {
        config.replication.delay_check = true;
    }
    if let Some(primary) = cli.primary_addr {
        config.replication.primary_addr = Some(primary);
    }
    config.validate()?;

    tracing::info!(
        "Server: {}:{}{}, Directory: {} ({})",
        config.server.bind,
        config.server.port,
        config.server.path,
        config.ldap.addr,
        config.ldap.transport,
    );

    // Build metrics registry and scraper
    let sink = MetricSink::new()?;
    let connector = LdapConnector::new(config.ldap.timeout);
    let scraper = Scraper::new(config.to_scraper_config(), connector, sink.clone());

    let cancel = CancellationToken::new();
    let scraper_handle = tokio::spawn(scraper.start(cancel.clone()));

    // Build Axum router
    let app = create_router(AppState { sink }, &config.server.path);

    // Parse bind address
    let addr: SocketAddr = format!("{}:{}", config.server.bind, config.server.port).parse()?;

    tracing::info!("Web server listening on: http://{}", addr);
    tracing::info!("Press Ctrl+C to shutdown");

    // Start server with graceful shutdown
    let listener = tokio::net::TcpListener::bind(addr).await?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(cancel.clone()))
        .await?;

    tracing::info!("Waiting for scraper to stop...");
    if let Err(e) = scraper_handle.await {
        tracing::error!("Scraper task failed: {}", e);
    }

    tracing::info!("Shutdown complete");
    Ok(())
}

/// Setup graceful shutdown signal handler.
async fn shutdown_signal(cancel: CancellationToken) {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C signal");
        }
        _ = terminate => {
            tracing::info!("Received terminate signal");
        }
    }

    tracing::info!("Stopping scraper...");
    cancel.cancel();
}
