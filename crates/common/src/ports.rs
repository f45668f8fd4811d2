//! Narrow interfaces to the collaborators that live outside the signal core.
//!
//! Everything behind these traits is best-effort: callers go through the
//! [`Outbox`](crate::Outbox) and never await them on the tick path.

use async_trait::async_trait;
use chrono::NaiveDate;

use crate::{Alert, ClosedTrade, Result, SessionSnapshot, Trade};

/// Receives the open/close lifecycle of every simulated trade.
///
/// Both calls carry the same `Trade::id`, so implementations can upsert.
#[async_trait]
pub trait TradeReporter: Send + Sync {
    fn name(&self) -> &str;

    async fn open_trade(&self, trade: &Trade) -> Result<()>;

    async fn close_trade(&self, closed: &ClosedTrade) -> Result<()>;
}

/// Human-facing alert sink. Implementations own any rate limiting.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, alert: &Alert) -> Result<()>;
}

/// Key-value store for per-(instrument, day) session snapshots.
#[async_trait]
pub trait SnapshotStore: Send + Sync {
    async fn load(&self, instrument_id: &str, day_key: NaiveDate)
        -> Result<Option<SessionSnapshot>>;

    async fn save(&self, snapshot: &SessionSnapshot) -> Result<()>;
}
