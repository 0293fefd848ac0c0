use clap::{Parser, ValueEnum};
use dethrottler_core::DethrottlerConfig;
use dethrottler_runtime::{
    ApiClient, ApiTaintStore, Controller, ControllerConfig, MetricsServer, MockTaintStore,
    PrometheusMetrics, ProcLoadSampler, TaintStore,
};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

#[derive(Parser)]
#[command(
    name = "dethrottler",
    about = "Taints a Kubernetes node while its CPU load average is too high"
)]
struct Cli {
    /// Path to the YAML config file
    #[arg(
        long,
        env = "DETHROTTLER_CONFIG",
        default_value = "/etc/dethrottler/config.yaml"
    )]
    config: PathBuf,

    /// Node to manage; overrides nodeName from the config file. $NODE_NAME is
    /// only consulted when neither sets one.
    #[arg(long)]
    node_name: Option<String>,

    /// Address for the Prometheus endpoint; overrides metricsAddr
    #[arg(long)]
    metrics_addr: Option<SocketAddr>,

    /// Log decisions without touching the cluster
    #[arg(long)]
    dry_run: bool,

    /// Log output format
    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,
}

#[derive(Clone, Copy, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[tokio::main]
async fn main() -> miette::Result<()> {
    let cli = Cli::parse();

    // Initialize tracing
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    match cli.log_format {
        LogFormat::Text => tracing_subscriber::fmt().with_env_filter(filter).init(),
        LogFormat::Json => tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .init(),
    }

    let mut config = DethrottlerConfig::load(&cli.config)?;
    apply_overrides(&mut config, &cli);

    run(config, cli.dry_run).await
}

/// Command-line flags win over the config file
fn apply_overrides(config: &mut DethrottlerConfig, cli: &Cli) {
    if let Some(node_name) = cli.node_name.as_deref().map(str::trim).filter(|n| !n.is_empty()) {
        config.node_name = node_name.to_string();
    }
    if cli.metrics_addr.is_some() {
        config.metrics_addr = cli.metrics_addr;
    }
}

/// Wire up the controller and its collaborators, then run until signalled
async fn run(config: DethrottlerConfig, dry_run: bool) -> miette::Result<()> {
    let store: Arc<dyn TaintStore> = if dry_run {
        warn!("Dry run: taints are recorded in memory only");
        Arc::new(MockTaintStore::new())
    } else {
        let api_client = Arc::new(ApiClient::from_config(&config.api_server, config.kubeconfig_path.as_deref())?);
        info!("Using API server at {}", api_client.base_url());
        Arc::new(ApiTaintStore::new(api_client))
    };

    let sampler = Arc::new(ProcLoadSampler::new(&config.load_avg_path));
    let metrics = PrometheusMetrics::new(&config.node_name)?;

    let token = CancellationToken::new();

    // Signal handler cancels the shared token
    let signal_token = token.clone();
    let signal_handle = tokio::spawn(async move {
        wait_for_signal().await;
        info!("Received shutdown signal");
        signal_token.cancel();
    });

    let metrics_handle = match config.metrics_addr {
        Some(addr) => {
            let server = MetricsServer::bind(addr, metrics.clone()).await?;
            let metrics_token = token.clone();
            Some(tokio::spawn(async move {
                if let Err(e) = server.run(metrics_token).await {
                    error!("Metrics server error: {}", e);
                }
            }))
        }
        None => None,
    };

    let controller = Controller::new(
        ControllerConfig::from(&config),
        sampler,
        store,
        Arc::new(metrics),
    );
    let result = controller.run(token.clone()).await;

    // Stop the helpers as well when the controller exits on its own
    token.cancel();
    signal_handle.abort();
    if let Some(handle) = metrics_handle {
        let _ = handle.await;
    }

    let final_state = result?;
    info!(
        "Shutdown complete (node tainted: {})",
        final_state.tainted
    );
    Ok(())
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    let mut terminate = match signal(SignalKind::terminate()) {
        Ok(s) => s,
        Err(e) => {
            error!("Failed to install SIGTERM handler: {}", e);
            let _ = tokio::signal::ctrl_c().await;
            return;
        }
    };

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {}
        _ = terminate.recv() => {}
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for ctrl-c: {}", e);
    }
}
