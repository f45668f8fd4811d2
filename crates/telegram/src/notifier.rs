use std::collections::HashMap;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use teloxide::prelude::*;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use common::{Alert, Error, Notifier, Result, Trade};

/// Minimum interval between alerts sharing a throttle key.
#[derive(Debug)]
pub struct Throttle {
    min_interval: Duration,
    last_sent: HashMap<String, Instant>,
}

impl Throttle {
    pub fn new(min_interval: Duration) -> Self {
        Self {
            min_interval,
            last_sent: HashMap::new(),
        }
    }

    /// Marks `key` as sent at `now` when allowed.
    pub fn allow(&mut self, key: &str, now: Instant) -> bool {
        match self.last_sent.get(key) {
            Some(prev) if now.duration_since(*prev) < self.min_interval => false,
            _ => {
                self.last_sent.insert(key.to_string(), now);
                true
            }
        }
    }

    /// Undo a mark so a retried delivery is not swallowed.
    pub fn forget(&mut self, key: &str) {
        self.last_sent.remove(key);
    }
}

/// Sends entry/result alerts to every allowed Telegram user.
pub struct TelegramNotifier {
    bot: Bot,
    chat_ids: Vec<ChatId>,
    throttle: Mutex<Throttle>,
}

impl TelegramNotifier {
    pub fn new(bot: Bot, user_ids: &[i64], min_interval: Duration) -> Self {
        Self {
            bot,
            chat_ids: user_ids.iter().map(|&id| ChatId(id)).collect(),
            throttle: Mutex::new(Throttle::new(min_interval)),
        }
    }
}

#[async_trait]
impl Notifier for TelegramNotifier {
    async fn notify(&self, alert: &Alert) -> Result<()> {
        let key = alert.throttle_key();
        if !self.throttle.lock().await.allow(&key, Instant::now()) {
            debug!(key = %key, "Alert throttled");
            return Ok(());
        }

        let text = format_alert(alert);
        let mut delivered = 0;
        for &chat_id in &self.chat_ids {
            match self.bot.send_message(chat_id, text.as_str()).await {
                Ok(_) => delivered += 1,
                Err(e) => warn!(chat_id = ?chat_id, error = %e, "Failed to send Telegram alert"),
            }
        }

        if delivered == 0 && !self.chat_ids.is_empty() {
            self.throttle.lock().await.forget(&key);
            return Err(Error::Notify(format!("no chat accepted {}", alert.kind())));
        }
        Ok(())
    }
}

fn price(t: &Trade, v: f64) -> String {
    format!("{:.*}", t.decimals as usize, v)
}

fn fmt_opt(t: &Trade, v: Option<f64>) -> String {
    v.map_or_else(|| "-".to_string(), |p| price(t, p))
}

/// Plain-text message body for an alert.
pub fn format_alert(alert: &Alert) -> String {
    match alert {
        Alert::StrategyEntry(t) => {
            let s = &t.sessions;
            format!(
                "\u{1F4E3} {} {} {}\n\
                 Entry: {}\n\
                 SL: {}\n\
                 TP: {}\n\
                 Variant: {}\n\
                 Asia: {} - {}\n\
                 Daily open: {}",
                t.instrument_id,
                t.strategy,
                t.direction.to_string().to_uppercase(),
                price(t, t.entry_price),
                price(t, t.stop_price),
                price(t, t.target_price),
                t.variant_label,
                fmt_opt(t, s.asia_low),
                fmt_opt(t, s.asia_high),
                fmt_opt(t, s.daily_open),
            )
        }
        Alert::Result(c) => {
            let t = &c.trade;
            let icon = match c.outcome {
                common::Outcome::Win => "\u{2705}",
                common::Outcome::Loss => "\u{274C}",
            };
            format!(
                "{icon} {} {} {} {}\n\
                 Entry: {} -> Exit: {}\n\
                 Pips: {:+.1}\n\
                 Variant: {}",
                t.instrument_id,
                t.strategy,
                t.direction.to_string().to_uppercase(),
                c.outcome.to_string().to_uppercase(),
                price(t, t.entry_price),
                price(t, c.exit_price),
                c.pips,
                t.variant_label,
            )
        }
    }
}
