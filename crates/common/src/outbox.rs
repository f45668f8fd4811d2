use serde::Serialize;
use tokio::sync::mpsc;
use tracing::warn;

use crate::{ClosedTrade, SessionSnapshot, Trade};

/// Work item for the delivery worker.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "kind", content = "payload", rename_all = "snake_case")]
pub enum Delivery {
    TradeOpened(Trade),
    TradeClosed(ClosedTrade),
    SaveSnapshot(SessionSnapshot),
}

impl Delivery {
    pub fn label(&self) -> &'static str {
        match self {
            Delivery::TradeOpened(_) => "trade_opened",
            Delivery::TradeClosed(_) => "trade_closed",
            Delivery::SaveSnapshot(_) => "save_snapshot",
        }
    }
}

/// Non-blocking handle into the delivery queue.
///
/// `publish` never awaits: a full or closed queue drops the item with a warning.
#[derive(Debug, Clone)]
pub struct Outbox {
    tx: mpsc::Sender<Delivery>,
}

impl Outbox {
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<Delivery>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self { tx }, rx)
    }

    pub fn publish(&self, item: Delivery) {
        if let Err(e) = self.tx.try_send(item) {
            let (reason, item) = match e {
                mpsc::error::TrySendError::Full(item) => ("queue full", item),
                mpsc::error::TrySendError::Closed(item) => ("queue closed", item),
            };
            warn!(kind = item.label(), reason, "Dropping outbox delivery");
        }
    }
}
