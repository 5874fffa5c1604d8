use std::path::PathBuf;

use clap::Parser;
use maas_dashboard::Env;
use maas_dashboard::dashboard::{DashboardConfig, DashboardHttpState, router};

/// Dashboard backend for a Kuadrant-protected Models-as-a-Service gateway.
#[derive(Debug, Parser)]
#[command(name = "maas-dashboard", version)]
struct Cli {
    /// TOML, YAML or JSON config file; missing keys keep their defaults.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Dotenv file consulted before the process environment.
    #[arg(long)]
    dotenv: Option<PathBuf>,

    #[arg(long, alias = "addr")]
    listen: Option<String>,

    #[arg(long)]
    namespace: Option<String>,

    /// Repeatable; replaces the configured Prometheus endpoint list.
    #[arg(long = "prometheus-url")]
    prometheus_urls: Vec<String>,

    #[arg(long)]
    simulator_url: Option<String>,

    #[arg(long)]
    json_logs: bool,

    #[arg(long)]
    otel: bool,

    #[arg(long)]
    otel_endpoint: Option<String>,
}

const DEFAULT_LISTEN: &str = "0.0.0.0:3001";

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let _otel_guard = attach_tracing(cli.otel, cli.otel_endpoint.as_deref(), cli.json_logs)?;

    let env = match cli.dotenv.as_deref() {
        Some(path) => Env::from_dotenv_file(path)?,
        None => Env::default(),
    };
    let config_path = cli
        .config
        .or_else(|| env.get("MAAS_DASHBOARD_CONFIG").map(PathBuf::from));
    let mut config = match config_path {
        Some(path) => DashboardConfig::load(&path)?,
        None => DashboardConfig::default(),
    };
    config.apply_env(&env);

    if config.listen.is_none() {
        config.listen = env.get("LISTEN_ADDR");
    }

    if let Some(listen) = cli.listen {
        config.listen = Some(listen);
    }
    if let Some(namespace) = cli.namespace {
        config.cluster.namespace = namespace;
    }
    if !cli.prometheus_urls.is_empty() {
        config.prometheus.endpoints = cli.prometheus_urls;
    }
    if let Some(url) = cli.simulator_url {
        config.simulator.upstream_url = url;
    }
    config.validate()?;

    let listen = config
        .listen
        .clone()
        .unwrap_or_else(|| DEFAULT_LISTEN.to_string());
    tracing::info!(
        namespace = %config.cluster.namespace,
        prometheus_endpoints = config.prometheus.endpoints.len(),
        simulator = %config.simulator.upstream_url,
        "starting maas-dashboard"
    );

    let state = DashboardHttpState::from_config(config)?;
    let app = router(state);

    let listener = tokio::net::TcpListener::bind(&listen).await?;
    tracing::info!(%listen, "maas-dashboard listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %err, "failed to listen for ctrl-c");
        std::future::pending::<()>().await;
    }
    tracing::info!("shutting down");
}

#[cfg(feature = "otel")]
fn attach_tracing(
    otel: bool,
    endpoint: Option<&str>,
    json_logs: bool,
) -> Result<Option<maas_dashboard::dashboard::telemetry::OtelGuard>, Box<dyn std::error::Error>> {
    if otel || endpoint.is_some() {
        return Ok(Some(
            maas_dashboard::dashboard::telemetry::init_tracing_with_otel(endpoint, json_logs)?,
        ));
    }
    maas_dashboard::dashboard::telemetry::init_tracing(json_logs)?;
    Ok(None)
}

#[cfg(not(feature = "otel"))]
fn attach_tracing(
    otel: bool,
    endpoint: Option<&str>,
    json_logs: bool,
) -> Result<Option<()>, Box<dyn std::error::Error>> {
    if otel || endpoint.is_some() {
        return Err("otel requires `--features otel`".into());
    }
    maas_dashboard::dashboard::telemetry::init_tracing(json_logs)?;
    Ok(None)
}
