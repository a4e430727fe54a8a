use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::bail;
use chrono::Utc;
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use deckhand::bus::{ConsumerManager, ConsumerSettings, HandlerRegistry, NatsBus};
use deckhand::config::Settings;
use deckhand::deploy::{
    DeploymentHandler, DeploymentReconciler, DeploymentStatusHandler, WorkflowRunHandler,
};
use deckhand::platform::{GitHubClient, PlatformClient};
use deckhand::recovery::{
    LOCK_POLL_PERIOD, LockExpiry, STUCK_SWEEP_PERIOD, StuckDeploymentSweeper, run_periodic,
};
use deckhand::server::{AppState, create_router};
use deckhand::store::{SqliteStore, Store};
use deckhand::sync::{SyncOrchestrator, SyncOutcome, run_scheduled};

#[derive(Parser)]
#[command(name = "deckhand")]
#[command(about = "Keeps a local mirror of platform deployments in sync", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the database schema
    Init {
        /// Data directory for the database
        #[arg(long, default_value = "./data")]
        data_dir: PathBuf,
    },

    /// Run the event consumer, recovery loops, scheduled sync and ops server
    Serve {
        /// Path to the TOML configuration file
        #[arg(long, short, default_value = "deckhand.toml")]
        config: PathBuf,
    },

    /// Run one sync for a repository and exit
    Sync {
        /// Repository as owner/name
        repository: String,

        /// Path to the TOML configuration file
        #[arg(long, short, default_value = "deckhand.toml")]
        config: PathBuf,
    },
}

fn run_init(data_dir: PathBuf) -> anyhow::Result<()> {
    fs::create_dir_all(&data_dir)?;

    let db_path = data_dir.join("deckhand.db");
    let store = SqliteStore::new(&db_path)?;
    store.initialize()?;

    println!("Initialized database at {}", db_path.display());
    Ok(())
}

fn open_store(settings: &Settings) -> anyhow::Result<Arc<dyn Store>> {
    let db_path = settings.db_path();
    if !db_path.exists() {
        bail!(
            "Database not found at {}. Run 'deckhand init' first.",
            db_path.display()
        );
    }

    let store = SqliteStore::new(&db_path)?;
    store.initialize()?;
    Ok(Arc::new(store))
}

fn build_orchestrator(
    settings: &Settings,
    store: Arc<dyn Store>,
) -> anyhow::Result<Arc<SyncOrchestrator>> {
    if settings.github.token.is_none() {
        tracing::warn!("No platform token configured; requests are unauthenticated");
    }
    let client: Arc<dyn PlatformClient> = Arc::new(GitHubClient::new(&settings.github)?);
    Ok(Arc::new(SyncOrchestrator::new(store, client, &settings.sync)))
}

async fn run_sync(repository: String, config: PathBuf) -> anyhow::Result<()> {
    let settings = Settings::load(&config)?;
    let store = open_store(&settings)?;
    let orchestrator = build_orchestrator(&settings, store)?;

    let outcome = orchestrator.sync_repository(&repository).await?;
    println!("{}", serde_json::to_string_pretty(&outcome)?);

    if let SyncOutcome::Failed { .. } = outcome {
        bail!("Sync of {repository} failed");
    }
    Ok(())
}

async fn run_serve(config: PathBuf) -> anyhow::Result<()> {
    let settings = Settings::load(&config)?;
    let store = open_store(&settings)?;
    let orchestrator = build_orchestrator(&settings, store.clone())?;
    let reconciler = DeploymentReconciler::new(store.clone());
    let cancel = CancellationToken::new();

    // Event consumer
    let mut registry =
        HandlerRegistry::new(settings.nats.subject_prefix.clone(), &settings.sync.repositories);
    registry
        .register(DeploymentStatusHandler::new(reconciler.clone()))
        .register(DeploymentHandler::new(reconciler.clone()))
        .register(WorkflowRunHandler::new(reconciler.clone()));

    let bus = NatsBus::connect(&settings.nats).await?;
    let manager = ConsumerManager::new(
        Arc::new(bus),
        registry,
        ConsumerSettings::from_config(&settings.nats, &settings.sync),
    );
    let consumer = manager.start(cancel.clone()).await;

    // Recovery loops
    let sweeper = Arc::new(StuckDeploymentSweeper::new(store.clone()));
    let stuck = tokio::spawn(run_periodic(
        "stuck_deployments",
        STUCK_SWEEP_PERIOD,
        true,
        cancel.clone(),
        move || {
            let sweeper = sweeper.clone();
            async move {
                if let Err(e) = sweeper.sweep(Utc::now()) {
                    error!("Stuck deployment sweep failed: {e}");
                }
            }
        },
    ));

    let expiry = Arc::new(LockExpiry::new(store.clone()));
    let locks = tokio::spawn(run_periodic(
        "lock_expiration",
        LOCK_POLL_PERIOD,
        true,
        cancel.clone(),
        move || {
            let expiry = expiry.clone();
            async move {
                if let Err(e) = expiry.expire_locks(Utc::now()) {
                    error!("Lock expiration failed: {e}");
                }
            }
        },
    ));

    let scheduled = tokio::spawn(run_scheduled(
        orchestrator.clone(),
        settings.sync.clone(),
        cancel.clone(),
    ));

    tokio::spawn({
        let cancel = cancel.clone();
        async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!("Failed to listen for shutdown signal: {e}");
                return;
            }
            info!("Shutting down");
            cancel.cancel();
        }
    });

    let state = Arc::new(AppState {
        orchestrator,
        reconciler,
    });
    let app = create_router(state);
    let addr = settings.server.socket_addr()?;

    info!("Starting server on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(cancel.clone().cancelled_owned())
        .await?;

    cancel.cancel();
    let _ = tokio::join!(consumer, stuck, locks, scheduled);
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("deckhand=info".parse()?))
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Init { data_dir } => run_init(data_dir)?,
        Commands::Serve { config } => run_serve(config).await?,
        Commands::Sync { repository, config } => run_sync(repository, config).await?,
    }

    Ok(())
}
