pub mod aggregator;
pub mod clock;
pub mod config;
pub mod detectors;
pub mod dispatcher;
pub mod patterns;

pub use aggregator::{CandleAggregator, ClosedBars};
pub use config::{StopMode, StrategyConfig, StrategyFileConfig};
pub use dispatcher::{DispatchEvent, Dispatcher};

use common::{Candle, Direction, SessionContext};

/// Everything a detector sees when an M1 candle closes.
#[derive(Debug, Clone, Copy)]
pub struct CandleContext<'a> {
    /// The M1 candle that just closed; also the last element of `m1`.
    pub closed: &'a Candle,
    pub m1: &'a [Candle],
    pub m5: &'a [Candle],
    /// Set when this close also completed an M5 bar.
    pub m5_closed: Option<&'a Candle>,
    pub sessions: &'a SessionContext,
}

/// Everything a detector sees on a tick.
#[derive(Debug, Clone, Copy)]
pub struct TickContext<'a> {
    pub price: f64,
    pub ts_ms: i64,
    pub sessions: &'a SessionContext,
}

/// A zone a detector is waiting for price to reach.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingSetup {
    pub direction: Direction,
    pub zone_low: f64,
    pub zone_high: f64,
    pub stop: Option<f64>,
    /// Ordered nearest-first in the trade direction.
    pub targets: Vec<f64>,
    pub formed_at_ms: i64,
    pub expires_at_ms: Option<i64>,
}

impl PendingSetup {
    /// A setup whose trigger is a single price level.
    pub fn at_level(direction: Direction, level: f64, formed_at_ms: i64) -> Self {
        Self {
            direction,
            zone_low: level,
            zone_high: level,
            stop: None,
            targets: Vec::new(),
            formed_at_ms,
            expires_at_ms: None,
        }
    }

    pub fn contains(&self, price: f64) -> bool {
        price >= self.zone_low.min(self.zone_high) && price <= self.zone_low.max(self.zone_high)
    }

    pub fn is_expired(&self, ts_ms: i64) -> bool {
        self.expires_at_ms.is_some_and(|exp| ts_ms > exp)
    }
}

/// A detector's entry, before stops are settled by the dispatcher.
#[derive(Debug, Clone, PartialEq)]
pub struct FiredEntry {
    pub direction: Direction,
    pub entry: f64,
    /// Structural stop, when the detector computes one.
    pub stop: Option<f64>,
    pub targets: Vec<f64>,
    /// Which level triggered, for detectors with several.
    pub level: Option<&'static str>,
}

impl FiredEntry {
    pub fn market(direction: Direction, entry: f64) -> Self {
        Self {
            direction,
            entry,
            stop: None,
            targets: Vec::new(),
            level: None,
        }
    }

    pub(crate) fn from_setup(setup: PendingSetup, entry: f64) -> Self {
        Self {
            direction: setup.direction,
            entry,
            stop: setup.stop,
            targets: setup.targets,
            level: None,
        }
    }
}

/// One pattern state machine for one instrument.
///
/// `arm` runs once per closed M1 candle and `fire` once per tick. Neither may
/// fail: missing history or consumed zones simply yield `None`.
pub trait Detector: Send {
    /// Strategy label used in trade ids and logs.
    fn name(&self) -> &'static str;

    /// Evaluate the closed candle. Returns the setup when one is newly armed.
    fn arm(&mut self, ctx: &CandleContext<'_>) -> Option<PendingSetup>;

    /// Evaluate a tick against the armed setup.
    fn fire(&mut self, tick: &TickContext<'_>) -> Option<FiredEntry>;

    /// Drop all per-day state.
    fn reset_day(&mut self);
}
