use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tokio::sync::mpsc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use common::{Config, EngineCommand, InstrumentSet, Notifier, Outbox, Tick, TradeReporter};
use engine::{Coordinator, DeliveryWorker, Engine, HttpReporter, SqliteStore};
use monitor::TradeMonitor;
use strategy::{clock, StrategyFileConfig};
use telegram_ctrl::{start_bot, BotDeps, TelegramNotifier};

const OUTBOX_CAPACITY: usize = 1024;
const TICK_QUEUE: usize = 8192;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // ── Logging ──────────────────────────────────────────────────────────────
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("info".parse()?))
        .init();

    // ── Config ────────────────────────────────────────────────────────────────
    let cfg = Config::from_env().context("loading environment")?;
    let set = InstrumentSet::load(&cfg.instruments_config_path)
        .with_context(|| format!("loading {}", cfg.instruments_config_path))?;
    let strategies = StrategyFileConfig::load(&cfg.strategy_config_path)
        .with_context(|| format!("loading {}", cfg.strategy_config_path))?;
    info!(
        instruments = set.instruments.len(),
        strategies = strategies.strategies.len(),
        "SweepBot starting"
    );

    // ── Database ──────────────────────────────────────────────────────────────
    ensure_db_dir(&cfg.database_url)?;
    let store = SqliteStore::connect(&cfg.database_url)
        .await
        .context("opening database")?;

    // ── Signal core ───────────────────────────────────────────────────────────
    let (outbox, outbox_rx) = Outbox::channel(OUTBOX_CAPACITY);
    let monitor = TradeMonitor::new(outbox.clone());
    let mut coordinator = Coordinator::new(
        &set.instruments,
        set.sessions,
        &strategies,
        monitor.clone(),
        outbox,
    )?;
    let today = clock::day_key(chrono::Utc::now().timestamp_millis());
    coordinator.seed_snapshots(&store, today).await;
    let status = coordinator.status_board();

    // ── Collaborators ─────────────────────────────────────────────────────────
    let mut reporters: Vec<Arc<dyn TradeReporter>> = vec![Arc::new(store.clone())];
    if let Some(url) = &cfg.dashboard_url {
        info!(url = %url, "Dashboard reporter enabled");
        reporters.push(Arc::new(HttpReporter::new(url.as_str())?));
    }

    let bot = cfg.telegram_token.clone().map(teloxide::Bot::new);
    let notifier: Option<Arc<dyn Notifier>> = bot.clone().map(|bot| {
        Arc::new(TelegramNotifier::new(
            bot,
            &cfg.telegram_allowed_user_ids,
            Duration::from_secs(cfg.notify_throttle_secs),
        )) as Arc<dyn Notifier>
    });
    if notifier.is_none() {
        warn!("TELEGRAM_TOKEN not set, alerts go to the log only");
    }

    let delivery = DeliveryWorker::new(outbox_rx, reporters, notifier, Arc::new(store));

    // ── Engine ────────────────────────────────────────────────────────────────
    let (tick_tx, tick_rx) = mpsc::channel::<Tick>(TICK_QUEUE);
    let (engine, engine_handle) = Engine::new(&set.instruments, cfg.finnhub_api_key.clone(), tick_tx);

    // ── Spawn all tasks ───────────────────────────────────────────────────────
    tokio::spawn(delivery.run());
    coordinator.spawn(tick_rx);
    tokio::spawn(engine.run());

    if let Some(bot) = bot {
        let deps = BotDeps {
            engine: engine_handle.clone(),
            allowed_user_ids: Arc::new(cfg.telegram_allowed_user_ids.clone()),
            status,
            monitor,
        };
        tokio::spawn(start_bot(bot, deps));
    }

    if cfg.auto_start {
        engine_handle.send(EngineCommand::Start).await;
    } else {
        info!("AUTO_START disabled, waiting for /start");
    }

    info!("All subsystems started. Waiting for shutdown signal.");
    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received. Exiting.");
    Ok(())
}

/// Create the parent directory of a file-backed SQLite URL.
fn ensure_db_dir(database_url: &str) -> anyhow::Result<()> {
    let path = database_url
        .trim_start_matches("sqlite://")
        .trim_start_matches("sqlite:")
        .split('?')
        .next()
        .unwrap_or_default();
    if path.is_empty() || path.starts_with(":memory:") {
        return Ok(());
    }
    if let Some(dir) = Path::new(path).parent().filter(|d| !d.as_os_str().is_empty()) {
        std::fs::create_dir_all(dir).with_context(|| format!("creating {}", dir.display()))?;
    }
    Ok(())
}
