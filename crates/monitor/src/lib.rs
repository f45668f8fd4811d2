use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::info;

use common::{ClosedTrade, Delivery, Outbox, Trade};

/// Open simulated trades across all instruments.
///
/// Every instrument task shares one monitor; the lock serialises entry and
/// close. Closed trades go to the outbox and never block the caller.
#[derive(Clone, Default)]
pub struct TradeMonitor {
    open_trades: Arc<RwLock<Vec<Trade>>>,
    outbox: Option<Outbox>,
}

impl TradeMonitor {
    pub fn new(outbox: Outbox) -> Self {
        Self {
            open_trades: Arc::new(RwLock::new(Vec::new())),
            outbox: Some(outbox),
        }
    }

    pub async fn add_trade(&self, trade: Trade) {
        info!(
            id = %trade.id,
            instrument = %trade.instrument_id,
            strategy = %trade.strategy,
            direction = %trade.direction,
            entry = trade.entry_price,
            stop = trade.stop_price,
            target = trade.target_price,
            "Trade opened"
        );
        self.open_trades.write().await.push(trade);
    }

    /// Close every open trade on `instrument_id` whose stop or target `price`
    /// touches. Returns the closed trades in entry order.
    pub async fn on_tick(&self, instrument_id: &str, price: f64, ts_ms: i64) -> Vec<ClosedTrade> {
        {
            let open = self.open_trades.read().await;
            let any = open
                .iter()
                .any(|t| t.instrument_id == instrument_id && t.touched(price).is_some());
            if !any {
                return Vec::new();
            }
        }

        let mut closed = Vec::new();
        {
            let mut open = self.open_trades.write().await;
            let mut i = 0;
            while i < open.len() {
                let outcome = (open[i].instrument_id == instrument_id)
                    .then(|| open[i].touched(price))
                    .flatten();
                match outcome {
                    Some(outcome) => closed.push(open.remove(i).close(price, ts_ms, outcome)),
                    None => i += 1,
                }
            }
        }

        for c in &closed {
            info!(
                id = %c.trade.id,
                instrument = %c.trade.instrument_id,
                strategy = %c.trade.strategy,
                outcome = %c.outcome,
                exit = c.exit_price,
                pips = c.pips,
                "Trade closed"
            );
            if let Some(outbox) = &self.outbox {
                outbox.publish(Delivery::TradeClosed(c.clone()));
            }
        }
        closed
    }

    pub async fn open_trades(&self) -> Vec<Trade> {
        self.open_trades.read().await.clone()
    }

    pub async fn open_count(&self) -> usize {
        self.open_trades.read().await.len()
    }
}
