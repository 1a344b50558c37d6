//! ephemerad - The ephemera background service
//!
//! This is the main entry point for the ephemerad service.
//! It wires together all the components:
//! - Configuration loading
//! - Store initialization
//! - Hook-based resource host
//! - Core engine: timer recovery and the reconciliation sweeper

mod hooks;

use anyhow::{Context, Result};
use clap::Parser;
use ephemera_config::load_config_or_default;
use ephemera_core::{CoreEngine, CoreEvent};
use ephemera_store::{AuditEvent, AuditEventType, SqliteStore, Store};
use ephemera_util::{default_config_path, format_duration, SystemClock};
use hooks::HookHost;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::{broadcast, watch};
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

/// ephemerad - Deadline enforcement for ephemeral resources
#[derive(Parser, Debug)]
#[command(name = "ephemerad")]
#[command(about = "Deadline enforcement for ephemeral resources", long_about = None)]
struct Args {
    /// Configuration file path (default: ~/.config/ephemera/config.toml)
    #[arg(short, long, env = "EPHEMERA_CONFIG", default_value_os_t = default_config_path())]
    config: PathBuf,

    /// Data directory override (or set EPHEMERA_DATA_DIR env var)
    #[arg(short, long, env = "EPHEMERA_DATA_DIR")]
    data_dir: Option<PathBuf>,

    /// Log level
    #[arg(short, long, default_value = "info")]
    log_level: String,
}

/// Main service state
struct Service {
    engine: CoreEngine,
    store: Arc<dyn Store>,
}

impl Service {
    fn new(args: &Args) -> Result<Self> {
        // Load configuration
        let mut policy = load_config_or_default(&args.config)
            .with_context(|| format!("Failed to load config from {:?}", args.config))?;

        info!(
            config_path = %args.config.display(),
            sweep_interval = %format_duration(policy.lifecycle.sweep_interval),
            warnings = policy.lifecycle.warnings.len(),
            "Configuration loaded"
        );

        if let Some(data_dir) = &args.data_dir {
            policy.service.data_dir = data_dir.clone();
        }

        std::fs::create_dir_all(&policy.service.data_dir).with_context(|| {
            format!("Failed to create data directory {:?}", policy.service.data_dir)
        })?;

        // Initialize store
        let db_path = policy.service.database_path();
        let store: Arc<dyn Store> = Arc::new(
            SqliteStore::open(&db_path)
                .with_context(|| format!("Failed to open database {:?}", db_path))?,
        );

        info!(db_path = %db_path.display(), "Store initialized");

        store.append_audit(AuditEvent::new(AuditEventType::ServiceStarted))?;

        if ephemera_util::is_mock_time_active() {
            warn!("Mock time is active, deadlines are evaluated against a shifted clock");
        }

        let host = Arc::new(HookHost::new(&policy.hooks));
        let engine = CoreEngine::new(policy.lifecycle, store.clone(), host, Arc::new(SystemClock));

        Ok(Self { engine, store })
    }

    async fn run(self) -> Result<()> {
        // Timers are in-memory only; rebuild them before anything else
        let report = self
            .engine
            .recover()
            .await
            .context("Failed to recover resources from store")?;

        info!(
            rearmed = report.rearmed,
            expired = report.expired,
            "Resources recovered"
        );

        if !self.engine.is_healthy() {
            warn!("Store or resource host reports unhealthy, continuing");
        }

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let sweeper = tokio::spawn(self.engine.sweeper().run(shutdown_rx));

        let mut events = self.engine.subscribe();

        // Set up signal handlers
        let mut sigterm = signal(SignalKind::terminate())
            .context("Failed to create SIGTERM handler")?;
        let mut sigint = signal(SignalKind::interrupt())
            .context("Failed to create SIGINT handler")?;
        let mut sighup = signal(SignalKind::hangup())
            .context("Failed to create SIGHUP handler")?;

        info!("Service running");

        loop {
            tokio::select! {
                _ = sigterm.recv() => {
                    info!("Received SIGTERM, shutting down gracefully");
                    break;
                }
                _ = sigint.recv() => {
                    info!("Received SIGINT, shutting down gracefully");
                    break;
                }
                _ = sighup.recv() => {
                    info!("Received SIGHUP, shutting down gracefully");
                    break;
                }

                event = events.recv() => match event {
                    Ok(event) => Self::handle_core_event(&event),
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped, "Event log lagged behind the engine");
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        error!("Engine event channel closed");
                        break;
                    }
                },
            }
        }

        // Graceful shutdown
        info!("Shutting down ephemerad");

        let _ = shutdown_tx.send(true);
        if let Err(e) = sweeper.await {
            warn!(error = %e, "Sweeper task ended abnormally");
        }

        // Records stay in the store; timers are rebuilt on next start
        self.engine.shutdown();

        if let Err(e) = self
            .store
            .append_audit(AuditEvent::new(AuditEventType::ServiceStopped))
        {
            warn!(error = %e, "Failed to log service shutdown");
        }

        info!("Shutdown complete");
        Ok(())
    }

    fn handle_core_event(event: &CoreEvent) {
        let resource_id = event.resource_id();
        match event {
            CoreEvent::ResourceCreated { title, delete_at, .. } => {
                debug!(resource_id = %resource_id, title = %title, delete_at = %delete_at, "Event: created");
            }
            CoreEvent::WarningIssued {
                seconds_before,
                remaining,
                ..
            } => {
                debug!(
                    resource_id = %resource_id,
                    seconds_before,
                    remaining = %format_duration(*remaining),
                    "Event: warning"
                );
            }
            CoreEvent::ResourceExtended { delete_at, .. } => {
                debug!(resource_id = %resource_id, delete_at = %delete_at, "Event: extended");
            }
            CoreEvent::ResourceDeleted { reason, .. } => {
                debug!(resource_id = %resource_id, ?reason, "Event: deleted");
            }
            CoreEvent::Frozen { until, .. } => {
                debug!(resource_id = %resource_id, until = %until, "Event: frozen");
            }
            CoreEvent::Unfrozen { .. } => {
                debug!(resource_id = %resource_id, "Event: unfrozen");
            }
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&args.log_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .init();

    info!(version = env!("CARGO_PKG_VERSION"), "ephemerad starting");

    let service = Service::new(&args)?;
    service.run().await
}
