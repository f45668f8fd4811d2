use std::sync::Arc;

use chrono::DateTime;
use teloxide::{
    dispatching::UpdateHandler,
    prelude::*,
    utils::command::BotCommands,
};
use tracing::{info, warn};

use common::{EngineCommand, EngineState, InstrumentStatus, Trade};
use engine::{EngineHandle, StatusBoard};
use monitor::TradeMonitor;

type HandlerResult = Result<(), Box<dyn std::error::Error + Send + Sync>>;

/// Dependencies injected into every handler via `dptree`.
#[derive(Clone)]
pub struct BotDeps {
    pub engine: EngineHandle,
    pub allowed_user_ids: Arc<Vec<i64>>,
    pub status: StatusBoard,
    pub monitor: TradeMonitor,
}

/// Telegram bot commands exposed to the operator.
#[derive(BotCommands, Clone)]
#[command(rename_rule = "lowercase", description = "SweepBot commands:")]
pub enum Command {
    #[command(description = "Start the price feeds")]
    Start,
    #[command(description = "Stop the price feeds (open trades stay tracked)")]
    Stop,
    #[command(description = "Show engine state and per-instrument sessions")]
    Status,
    #[command(description = "List open simulated trades")]
    Trades,
    #[command(description = "Show this help")]
    Help,
}

/// Start the Telegram bot in long-polling mode.
pub async fn start_bot(bot: Bot, deps: BotDeps) {
    let deps = Arc::new(deps);

    info!("Telegram bot starting (long-polling)");

    Dispatcher::builder(bot, schema())
        .dependencies(dptree::deps![deps])
        .enable_ctrlc_handler()
        .build()
        .dispatch()
        .await;
}

fn schema() -> UpdateHandler<Box<dyn std::error::Error + Send + Sync>> {
    use dptree::case;

    let command_handler = teloxide::filter_command::<Command, _>()
        .branch(case![Command::Start].endpoint(handle_start))
        .branch(case![Command::Stop].endpoint(handle_stop))
        .branch(case![Command::Status].endpoint(handle_status))
        .branch(case![Command::Trades].endpoint(handle_trades))
        .branch(case![Command::Help].endpoint(handle_help));

    Update::filter_message()
        .filter_map(|msg: Message| msg.from().map(|u| u.id))
        .filter_async(auth_filter)
        .branch(command_handler)
}

/// Silently drop messages from users not in the allowed list.
async fn auth_filter(user_id: UserId, deps: Arc<BotDeps>) -> bool {
    let uid = user_id.0 as i64;
    let allowed = deps.allowed_user_ids.contains(&uid);
    if !allowed {
        warn!(user_id = uid, "Unauthorized Telegram access attempt");
    }
    allowed
}

async fn handle_start(bot: Bot, msg: Message, deps: Arc<BotDeps>) -> HandlerResult {
    if deps.engine.state().await == EngineState::Running {
        bot.send_message(msg.chat.id, "Feeds are already running.").await?;
    } else {
        deps.engine.send(EngineCommand::Start).await;
        bot.send_message(msg.chat.id, "Feeds started.").await?;
    }
    Ok(())
}

async fn handle_stop(bot: Bot, msg: Message, deps: Arc<BotDeps>) -> HandlerResult {
    if deps.engine.state().await == EngineState::Stopped {
        bot.send_message(msg.chat.id, "Feeds are already stopped.").await?;
    } else {
        deps.engine.send(EngineCommand::Stop).await;
        bot.send_message(msg.chat.id, "Feeds stopped.").await?;
    }
    Ok(())
}

async fn handle_status(bot: Bot, msg: Message, deps: Arc<BotDeps>) -> HandlerResult {
    let state = deps.engine.state().await;
    let open = deps.monitor.open_count().await;
    let mut statuses: Vec<InstrumentStatus> = deps.status.read().await.values().cloned().collect();
    statuses.sort_by(|a, b| a.instrument_id.cmp(&b.instrument_id));

    bot.send_message(msg.chat.id, format_status(state, open, &statuses)).await?;
    Ok(())
}

async fn handle_trades(bot: Bot, msg: Message, deps: Arc<BotDeps>) -> HandlerResult {
    let trades = deps.monitor.open_trades().await;
    bot.send_message(msg.chat.id, format_trades(&trades)).await?;
    Ok(())
}

async fn handle_help(bot: Bot, msg: Message) -> HandlerResult {
    bot.send_message(msg.chat.id, Command::descriptions().to_string()).await?;
    Ok(())
}

fn level(v: Option<f64>) -> String {
    v.map_or_else(|| "-".to_string(), |p| p.to_string())
}

fn format_status(state: EngineState, open_trades: usize, statuses: &[InstrumentStatus]) -> String {
    let mut out = format!("SweepBot Status\nFeeds: {state}\nOpen trades: {open_trades}\n");
    for s in statuses {
        let ctx = &s.sessions;
        out.push_str(&format!(
            "\n{} last {} | open {} | Asia {}-{}{} | {} strategies",
            s.instrument_id,
            level(s.last_price),
            level(ctx.daily_open),
            level(ctx.asia_low),
            level(ctx.asia_high),
            if ctx.asia_locked { " locked" } else { "" },
            s.strategies.len(),
        ));
    }
    out
}

fn format_trades(trades: &[Trade]) -> String {
    if trades.is_empty() {
        return "No open trades.".to_string();
    }
    let mut out = format!("Open trades ({})\n", trades.len());
    for t in trades {
        let p = |v: f64| format!("{:.*}", t.decimals as usize, v);
        let opened = DateTime::from_timestamp_millis(t.entry_time_ms)
            .map(|d| d.format("%m-%d %H:%M UTC").to_string())
            .unwrap_or_default();
        out.push_str(&format!(
            "\n{} {} {} @ {} SL {} TP {} ({}) {}",
            t.instrument_id,
            t.strategy,
            t.direction.to_string().to_uppercase(),
            p(t.entry_price),
            p(t.stop_price),
            p(t.target_price),
            t.variant_label,
            opened,
        ));
    }
    out
}
