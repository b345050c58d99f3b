//! Fleetgate Aggregator
//!
//! Redfish-style front end that contacts plugins on behalf of callers.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tokio::sync::mpsc;
use tracing::{info, warn};

use fleetgate_core::config::{AggregatorConfig, load_config};
use fleetgate_core::tracing_init::init_tracing;

use fleetgate_aggregator::auth::password::hasher_for;
use fleetgate_aggregator::auth::{AccountService, CredentialHasher, SessionManager, spawn_sweeper};
use fleetgate_aggregator::device::DeviceContact;
use fleetgate_aggregator::events::{BroadcastPublisher, EVENT_BROADCAST_CAPACITY, EventPublisher};
use fleetgate_aggregator::plugin::{ContactProtocol, HttpTransport, PlainPasswords};
use fleetgate_aggregator::proxy::PluginProxy;
use fleetgate_aggregator::rediscovery::RediscoveryCoordinator;
use fleetgate_aggregator::resources::ResourceService;
use fleetgate_aggregator::server::{AppState, build_router};
use fleetgate_aggregator::storage::AggregatorDatabase;
use fleetgate_aggregator::subscription::SubscriptionReconciler;
use fleetgate_aggregator::translate::IdentityTranslator;

#[derive(Parser, Debug)]
#[command(name = "fleetgate-aggregator")]
#[command(
    version,
    about = "Fleetgate aggregator - plugin contact, caller sessions and the Redfish API"
)]
struct Args {
    /// Configuration file, merged over the global one.
    #[arg(long, env = "FLEETGATE_CONFIG")]
    config: Option<PathBuf>,

    /// Address to listen on. Overrides `server.addr`.
    #[arg(long, env = "FLEETGATE_ADDR")]
    addr: Option<SocketAddr>,

    /// Path to SQLite database file. Overrides `server.database_path`.
    #[arg(long, env = "FLEETGATE_DB_PATH")]
    db_path: Option<PathBuf>,

    /// Output logs as JSON (for structured log aggregation).
    #[arg(long, env = "FLEETGATE_LOG_JSON")]
    log_json: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_tracing("fleetgate_aggregator=info", args.log_json);

    let mut config = load_config(args.config.as_deref())?;
    if let Some(addr) = args.addr {
        config.server.addr = addr;
    }
    if config.server.root_service_uuid.is_empty() {
        config.server.root_service_uuid = uuid::Uuid::new_v4().to_string();
    }

    info!(
        version = env!("CARGO_PKG_VERSION"),
        addr = %config.server.addr,
        root_service_uuid = %config.server.root_service_uuid,
        "Starting fleetgate-aggregator"
    );

    let db_path = match args.db_path.or_else(|| config.server.database_path.clone()) {
        Some(path) => path,
        None => default_db_path()?,
    };
    info!(path = %db_path.display(), "Opening aggregator database");
    let db = AggregatorDatabase::open(&db_path).await?;

    let hasher: Arc<dyn CredentialHasher> = Arc::from(hasher_for(config.auth.hasher));
    let accounts = Arc::new(AccountService::new(db.clone(), Arc::clone(&hasher)));
    bootstrap_admin(&db, &accounts, &config).await?;

    let (sweep_tx, sweep_rx) = mpsc::channel(1);
    let sessions = Arc::new(SessionManager::new(
        db.clone(),
        hasher,
        &config.auth,
        sweep_tx,
    ));
    let _sweeper = spawn_sweeper(&sessions, sweep_rx, config.auth.cleanup_interval());

    let transport = Arc::new(HttpTransport::new(&config.plugin, &config.tls)?);
    let contact = Arc::new(ContactProtocol::new(
        transport,
        Arc::new(PlainPasswords),
        &config.plugin,
        &config.plugin_status_polling,
    ));
    let translator = Arc::new(IdentityTranslator::new(&config.url_translation));
    let devices = Arc::new(DeviceContact::new(
        db.clone(),
        Arc::clone(&contact),
        Arc::clone(&translator),
    ));
    let proxy = Arc::new(PluginProxy::new(db.clone(), contact, translator));
    let resources = Arc::new(ResourceService::new(
        db.clone(),
        Arc::clone(&devices),
        Arc::clone(&proxy),
        config.server.root_service_uuid.clone(),
    ));
    let subscriptions = Arc::new(SubscriptionReconciler::new(
        Arc::clone(&devices),
        &config.events,
        &config.fan_out,
    ));

    // Rediscovery runs once in the background; the API is served meanwhile.
    let publisher: Arc<dyn EventPublisher> =
        Arc::new(BroadcastPublisher::new(EVENT_BROADCAST_CAPACITY));
    let rediscovery = RediscoveryCoordinator::new(db.clone(), devices, publisher, &config.fan_out);
    tokio::spawn(async move {
        match rediscovery.run().await {
            Ok(report) => info!(
                reconciled = report.reconciled,
                skipped = report.skipped,
                failed = report.failed,
                "Startup rediscovery finished"
            ),
            Err(e) => warn!(error = %e, "Startup rediscovery failed"),
        }
    });

    let app = build_router(AppState {
        authorizer: sessions.clone(),
        sessions,
        accounts,
        resources,
        proxy,
        subscriptions,
    });

    let listener = tokio::net::TcpListener::bind(config.server.addr).await?;
    info!(addr = %config.server.addr, "Aggregator listening (plaintext)");

    tokio::select! {
        result = axum::serve(listener, app) => {
            result?;
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received shutdown signal");
        }
    }

    info!("Aggregator stopped");
    Ok(())
}

/// Create the configured administrator when the account table is empty.
async fn bootstrap_admin(
    db: &AggregatorDatabase,
    accounts: &AccountService,
    config: &AggregatorConfig,
) -> anyhow::Result<()> {
    if db.count_users().await? > 0 {
        return Ok(());
    }
    let Some(password) = config.bootstrap.admin_password.as_deref() else {
        warn!("No accounts exist and bootstrap.admin_password is unset; nobody can log in");
        return Ok(());
    };
    accounts
        .create(&config.bootstrap.admin_username, password, "Administrator")
        .await?;
    info!(username = %config.bootstrap.admin_username, "Bootstrap administrator created");
    Ok(())
}

fn default_db_path() -> anyhow::Result<PathBuf> {
    if let Some(path) = fleetgate_core::config::database_path() {
        return Ok(path);
    }
    let home =
        dirs::home_dir().ok_or_else(|| anyhow::anyhow!("Cannot determine home directory"))?;
    Ok(home.join(".fleetgate").join("aggregator.db"))
}
