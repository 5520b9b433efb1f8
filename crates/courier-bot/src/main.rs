use std::sync::Arc;

use clap::Parser;
use rusqlite::Connection;
use tracing::{error, info, warn};

use courier_compose::Composer;
use courier_core::config::CourierConfig;
use courier_core::OwnerId;
use courier_scheduler::{Dispatcher, JobStore, SqliteJobStore};
use courier_telegram::{CourierContext, TelegramAdapter, TelegramError};
use courier_users::{GroupStore, OperatorStore};

/// Telegram bot that schedules messages into groups and deletes them later.
#[derive(Debug, Parser)]
#[command(name = "courier-bot", version)]
struct Cli {
    /// Config file. Falls back to $COURIER_CONFIG, then ~/.courier/courier.toml.
    #[arg(long)]
    config: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "courier_bot=info,courier_scheduler=info,courier_compose=info,courier_telegram=info"
                    .into()
            }),
        )
        .init();

    let cli = Cli::parse();

    // explicit path > COURIER_CONFIG env > ~/.courier/courier.toml
    let config_path = cli.config.or_else(|| std::env::var("COURIER_CONFIG").ok());
    let config = CourierConfig::load(config_path.as_deref()).unwrap_or_else(|e| {
        warn!(code = e.code(), "Config load failed ({}), using defaults", e);
        CourierConfig::default()
    });

    // single SQLite file for all subsystems
    let db_path = &config.database.path;
    ensure_parent_dir(db_path);
    info!(path = %db_path, "opening SQLite database");

    let db = Connection::open(db_path)?;
    db.execute_batch("PRAGMA journal_mode=WAL;")?;
    courier_users::db::init_db(&db)?;
    courier_scheduler::db::init_db(&db)?;
    info!("database migrations complete");

    // each subsystem gets its own connection
    let operators = OperatorStore::new(Connection::open(db_path)?)?;
    let groups = GroupStore::new(Connection::open(db_path)?)?;
    let jobs: Arc<dyn JobStore> = Arc::new(SqliteJobStore::new(Connection::open(db_path)?)?);

    match config.operators.admin_id {
        Some(admin) => operators.ensure_admin(OwnerId(admin))?,
        None => warn!("no operators.admin_id configured; nobody can manage the bot"),
    }

    let Some(telegram) = config.telegram.as_ref() else {
        return Err(TelegramError::NoToken.into());
    };

    let composer = Composer::new(
        Arc::new(operators.clone()),
        Arc::clone(&jobs),
        Arc::new(groups.clone()),
    );
    let ctx = Arc::new(CourierContext {
        composer,
        operators,
        groups,
        jobs: Arc::clone(&jobs),
        offset: config.time.offset(),
    });

    let adapter = TelegramAdapter::connect(telegram, ctx).await?;
    let dispatcher = Dispatcher::new(jobs, Arc::new(adapter.gateway()), &config.dispatcher);

    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    let dispatcher_task = tokio::spawn(dispatcher.run(shutdown_rx));

    // returns on ctrl-c
    adapter.run().await;

    let _ = shutdown_tx.send(true);
    if let Err(e) = dispatcher_task.await {
        error!("dispatcher task ended abnormally: {e}");
    }
    info!("courier stopped");
    Ok(())
}

fn ensure_parent_dir(path: &str) {
    if let Some(parent) = std::path::Path::new(path).parent() {
        let _ = std::fs::create_dir_all(parent);
    }
}
