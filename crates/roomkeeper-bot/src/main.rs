use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use clap::{Parser, Subcommand};
use roomkeeper_core::provider::{MemoryProvider, VoiceProvider};
use roomkeeper_core::surface::{ControlSurface, LoggingSurface};
use roomkeeper_lifecycle::commands::Commands;
use roomkeeper_lifecycle::config::{ProviderKind, RoomkeeperConfig};
use roomkeeper_lifecycle::controls::DeletionControls;
use roomkeeper_lifecycle::metrics::{LifecycleMetrics, LoggingMetricsBackend};
use roomkeeper_lifecycle::reconcile::Reconciler;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{EnvFilter, fmt};

mod dispatch;
mod gateway;

use dispatch::Dispatcher;
use gateway::HttpGateway;

const HEALTH_POLL_INTERVAL: Duration = Duration::from_secs(2);

#[derive(Parser)]
#[command(name = "roomkeeper", about = "Ephemeral voice-room lifecycle manager")]
struct Cli {
    /// Path to roomkeeper.toml (default: ./roomkeeper.toml, then ~/.config/roomkeeper/)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the reconciliation loop and serve chat events on stdio
    Serve,
    /// Print the registered rooms as JSON
    Rooms,
    /// Validate the configuration and print a summary
    CheckConfig,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Logs go to stderr; stdout carries the event replies
    fmt()
        .with_env_filter(EnvFilter::from_env("ROOMKEEPER_LOG"))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = RoomkeeperConfig::load(cli.config.as_deref())?;

    match cli.command {
        Command::Serve => serve(config).await,
        Command::Rooms => rooms(config).await,
        Command::CheckConfig => check_config(config),
    }
}

async fn rooms(config: RoomkeeperConfig) -> Result<()> {
    let registry = config.storage.open_registry();
    let records = registry.list().await;
    println!("{}", serde_json::to_string_pretty(&records)?);
    Ok(())
}

fn check_config(config: RoomkeeperConfig) -> Result<()> {
    config.validate()?;
    let admins = config.admin_set();
    println!("provider:       {:?}", config.provider.kind);
    if config.provider.kind == ProviderKind::Http {
        println!("gateway:        {}", config.provider.base_url);
        println!(
            "gateway token:  {}",
            if config.provider.resolved_token().is_some() { "set" } else { "not set" }
        );
    }
    println!("storage:        {}", config.storage.dir().display());
    println!("idle threshold: {}s", config.lifecycle.idle_threshold_secs);
    println!("tick interval:  {}s", config.lifecycle.tick_interval_secs);
    println!("admins:         {}", admins.len());
    Ok(())
}

struct Adapters {
    provider: Arc<dyn VoiceProvider>,
    surface: Arc<dyn ControlSurface>,
    ready: watch::Receiver<bool>,
}

fn build_adapters(config: &RoomkeeperConfig, shutdown: &CancellationToken) -> Adapters {
    match config.provider.kind {
        ProviderKind::Http => {
            let gateway = Arc::new(HttpGateway::new(
                config.provider.base_url.clone(),
                config.provider.resolved_token(),
            ));
            let (ready_tx, ready) = watch::channel(false);
            tokio::spawn(wait_for_gateway(gateway.clone(), ready_tx, shutdown.clone()));
            Adapters {
                provider: gateway.clone(),
                surface: gateway,
                ready,
            }
        }
        ProviderKind::Memory => {
            tracing::warn!("Using the in-memory provider; no real rooms will be managed");
            let (ready_tx, ready) = watch::channel(false);
            let _ = ready_tx.send(true);
            Adapters {
                provider: Arc::new(MemoryProvider::new()),
                surface: Arc::new(LoggingSurface::new()),
                ready,
            }
        }
    }
}

async fn wait_for_gateway(
    gateway: Arc<HttpGateway>,
    ready: watch::Sender<bool>,
    shutdown: CancellationToken,
) {
    loop {
        if gateway.is_ready().await {
            tracing::info!("Chat gateway ready");
            let _ = ready.send(true);
            return;
        }
        tokio::select! {
            _ = tokio::time::sleep(HEALTH_POLL_INTERVAL) => {}
            _ = shutdown.cancelled() => return,
        }
    }
}

async fn serve(config: RoomkeeperConfig) -> Result<()> {
    config.validate()?;
    let shutdown = CancellationToken::new();
    let adapters = build_adapters(&config, &shutdown);

    let registry = Arc::new(config.storage.open_registry());
    let allowed = Arc::new(config.storage.open_allowed_surfaces());
    let metrics = Arc::new(LifecycleMetrics::with_backend(Arc::new(LoggingMetricsBackend)));
    let adapter_timeout = config.lifecycle.adapter_timeout();

    let controls = Arc::new(
        DeletionControls::new(
            registry.clone(),
            adapters.provider.clone(),
            adapters.surface.clone(),
            metrics.clone(),
        )
        .with_timeouts(config.lifecycle.confirm_timeout(), adapter_timeout),
    );
    let commands = Arc::new(
        Commands::new(
            registry.clone(),
            allowed,
            adapters.provider.clone(),
            adapters.surface.clone(),
            controls.clone(),
            metrics.clone(),
            config.admin_set(),
        )
        .with_adapter_timeout(adapter_timeout),
    );
    let reconciler = Reconciler::new(
        registry,
        adapters.provider.clone(),
        adapters.surface.clone(),
        metrics.clone(),
        config.lifecycle.reconcile_settings(),
    )
    .with_controls(controls.clone());

    tracing::info!(
        provider = adapters.provider.provider_name(),
        storage = %config.storage.dir().display(),
        "Starting roomkeeper"
    );

    let loop_handle = tokio::spawn(reconciler.run(adapters.ready, shutdown.clone()));
    let sweep_handle = tokio::spawn(dispatch::sweep_expired_confirmations(
        controls.clone(),
        shutdown.clone(),
    ));

    let ctrl_c_token = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Interrupt received, shutting down");
            ctrl_c_token.cancel();
        }
    });

    let dispatcher = Dispatcher::new(commands, controls);
    let served = dispatcher
        .serve(tokio::io::stdin(), tokio::io::stdout(), shutdown.clone())
        .await;

    shutdown.cancel();
    loop_handle.await?;
    sweep_handle.await?;

    tracing::info!(metrics = ?metrics.snapshot(), "roomkeeper shutting down");
    served?;
    Ok(())
}
