use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};
use vex_core::{
    config::AppConfig,
    metrics::install_prometheus_exporter,
    runtime::VexRuntime,
    scanner::{ScanMode, ScanReport},
};

#[derive(Parser)]
#[command(name = "vexd")]
#[command(about = "Verus explorer indexing daemon")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file (defaults to $VEX_CONFIG or config/config.toml)
    #[arg(short, long, global = true)]
    config: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the indexer: real-time ingest, identity backfill, and maintenance
    Run,

    /// Scan a height range once and exit
    Scan {
        /// First height; defaults to the height after the stored checkpoint
        #[arg(long)]
        from: Option<u64>,

        /// Last height; defaults to the node's current height
        #[arg(long)]
        to: Option<u64>,

        /// What to extract (full, rewards); defaults to the configured mode
        #[arg(long)]
        mode: Option<ScanMode>,
    },
}

fn init_logging(config: &AppConfig) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!(
            "warn,vex_core={level},vexd={level}",
            level = config.logging.level
        ))
    });

    let registry = tracing_subscriber::registry().with(filter);

    if config.logging.format.as_str() == "json" {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        let fmt_layer = tracing_subscriber::fmt::layer()
            .pretty()
            .with_file(true)
            .with_line_number(true)
            .with_target(false);
        registry.with(fmt_layer).init();
    }
}

fn load_config(path: Option<&str>) -> Result<AppConfig> {
    let config = match path {
        Some(path) => AppConfig::from_file(path),
        None => AppConfig::load(),
    }
    .context("Failed to load configuration")?;
    config.validate().map_err(|e| anyhow::anyhow!("Configuration validation failed: {e}"))?;
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let mut config = load_config(cli.config.as_deref())?;

    init_logging(&config);

    if let Some(addr) = config.metrics_addr() {
        install_prometheus_exporter(addr)
            .map_err(|e| anyhow::anyhow!("Failed to install metrics exporter: {e}"))?;
    }

    match cli.command {
        Commands::Run => run(config).await,
        Commands::Scan { from, to, mode } => {
            if let Some(mode) = mode {
                config.scanner.mode = mode;
            }
            scan(config, from, to).await
        }
    }
}

async fn run(config: AppConfig) -> Result<()> {
    info!(rpc_url = %config.node.rpc_url, "Starting Vex indexer");
    let runtime = VexRuntime::builder().with_config(config).build().await?;

    shutdown_signal().await;
    info!("Shutdown signal received");
    runtime.shutdown().await;
    Ok(())
}

async fn scan(config: AppConfig, from: Option<u64>, to: Option<u64>) -> Result<()> {
    let mode = config.scanner.mode;
    let runtime = VexRuntime::builder()
        .with_config(config)
        .disable_ingest()
        .disable_identity_backfill()
        .disable_mempool_eviction()
        .build()
        .await?;

    let cancel = runtime.cancellation_token();
    let interrupt = cancel.clone();
    tokio::spawn(async move {
        shutdown_signal().await;
        warn!("Interrupted, stopping after the current batch");
        interrupt.cancel();
    });

    let components = runtime.components();
    let end = match to {
        Some(to) => to,
        None => components.node().block_count().await.context("Failed to read node height")?,
    };

    info!(%mode, from = ?from, to = end, "Starting historical scan");
    let result = match from {
        Some(from) => components.scanner().scan(from..=end, &cancel).await,
        None => components.scanner().scan_from_checkpoint(end, &cancel).await,
    };

    runtime.shutdown().await;
    let report: ScanReport = result.context("Historical scan failed")?;
    info!(
        scanner = %report.scanner_id,
        blocks = report.blocks_scanned,
        utxos = report.applied.utxos_inserted,
        spends = report.applied.spends_applied,
        rewards = report.applied.rewards_inserted,
        checkpoint = ?report.checkpoint,
        cancelled = report.cancelled,
        "Historical scan complete"
    );
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut s) => {
                s.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install signal handler");
                () = std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }
}
