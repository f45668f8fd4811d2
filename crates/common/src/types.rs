use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// One trade print delivered by a feed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Tick {
    /// Feed-specific symbol, e.g. `OANDA:EUR_USD` or `btcusdt`.
    pub symbol: String,
    pub price: f64,
    pub timestamp_ms: i64,
}

/// OHLC candle. `open_time_ms` is the start of the bucket.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    pub open_time_ms: i64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
}

impl Candle {
    /// A fresh candle seeded by a single price.
    pub fn seeded(open_time_ms: i64, price: f64) -> Self {
        Self {
            open_time_ms,
            open: price,
            high: price,
            low: price,
            close: price,
        }
    }

    /// Fold another price into the candle.
    pub fn update(&mut self, price: f64) {
        self.high = self.high.max(price);
        self.low = self.low.min(price);
        self.close = price;
    }

    pub fn body(&self) -> f64 {
        (self.close - self.open).abs()
    }

    pub fn range(&self) -> f64 {
        self.high - self.low
    }

    pub fn body_mid(&self) -> f64 {
        (self.open + self.close) / 2.0
    }

    pub fn range_mid(&self) -> f64 {
        (self.high + self.low) / 2.0
    }

    pub fn body_high(&self) -> f64 {
        self.open.max(self.close)
    }

    pub fn body_low(&self) -> f64 {
        self.open.min(self.close)
    }

    pub fn is_bullish(&self) -> bool {
        self.close > self.open
    }

    pub fn is_bearish(&self) -> bool {
        self.close < self.open
    }
}

/// Side of a simulated trade.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(type_name = "TEXT", rename_all = "lowercase")]
pub enum Direction {
    Buy,
    Sell,
}

impl Direction {
    pub fn opposite(self) -> Self {
        match self {
            Direction::Buy => Direction::Sell,
            Direction::Sell => Direction::Buy,
        }
    }

    /// +1 for longs, -1 for shorts.
    pub fn sign(self) -> f64 {
        match self {
            Direction::Buy => 1.0,
            Direction::Sell => -1.0,
        }
    }
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Direction::Buy => write!(f, "buy"),
            Direction::Sell => write!(f, "sell"),
        }
    }
}

/// Rolling per-day session levels for one instrument.
///
/// Owned and mutated by the candle aggregator; everything downstream receives
/// a copy.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionContext {
    /// Calendar day in the session timezone.
    pub day_key: Option<NaiveDate>,
    pub daily_open: Option<f64>,
    pub asia_high: Option<f64>,
    pub asia_low: Option<f64>,
    pub asia_locked: bool,
    pub prev_day_high: Option<f64>,
    pub prev_day_low: Option<f64>,
    pub prev_day_open: Option<f64>,
    pub prev_day_close: Option<f64>,
    pub today_high: Option<f64>,
    pub today_low: Option<f64>,
}

impl SessionContext {
    /// `(low, high)` of the Asia range, once both sides exist.
    pub fn asia_range(&self) -> Option<(f64, f64)> {
        Some((self.asia_low?, self.asia_high?))
    }

    /// The Asia range, but only after it has been locked for the day.
    pub fn locked_asia_range(&self) -> Option<(f64, f64)> {
        if self.asia_locked {
            self.asia_range()
        } else {
            None
        }
    }
}

/// Persisted subset of a [`SessionContext`], keyed by (instrument, day).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionSnapshot {
    pub instrument_id: String,
    pub day_key: NaiveDate,
    pub daily_open: Option<f64>,
    pub asia_high: Option<f64>,
    pub asia_low: Option<f64>,
    pub asia_locked: bool,
    pub prev_day_high: Option<f64>,
    pub prev_day_low: Option<f64>,
    pub today_high: Option<f64>,
    pub today_low: Option<f64>,
    pub saved_at_ms: i64,
}

impl SessionSnapshot {
    /// Capture the current context. Returns `None` before the first candle
    /// has assigned a day.
    pub fn capture(instrument_id: &str, ctx: &SessionContext, saved_at_ms: i64) -> Option<Self> {
        Some(Self {
            instrument_id: instrument_id.to_string(),
            day_key: ctx.day_key?,
            daily_open: ctx.daily_open,
            asia_high: ctx.asia_high,
            asia_low: ctx.asia_low,
            asia_locked: ctx.asia_locked,
            prev_day_high: ctx.prev_day_high,
            prev_day_low: ctx.prev_day_low,
            today_high: ctx.today_high,
            today_low: ctx.today_low,
            saved_at_ms,
        })
    }

    /// A snapshot is only worth restoring once the Asia range it carries is complete.
    pub fn has_locked_asia(&self) -> bool {
        self.asia_locked && self.asia_high.is_some() && self.asia_low.is_some()
    }
}

/// Local-time session windows, expressed as fractional hours (8.5 = 08:30).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionWindows {
    pub asia_start: f64,
    pub asia_end: f64,
    pub london_start: f64,
    pub london_end: f64,
}

impl Default for SessionWindows {
    fn default() -> Self {
        Self {
            asia_start: 0.0,
            asia_end: 2.0,
            london_start: 2.0,
            london_end: 5.0,
        }
    }
}

/// Which live feed delivers ticks for an instrument.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FeedKind {
    Binance,
    Finnhub,
}

impl std::fmt::Display for FeedKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FeedKind::Binance => write!(f, "binance"),
            FeedKind::Finnhub => write!(f, "finnhub"),
        }
    }
}

/// Static, validated per-instrument metadata. Read-only after startup.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Instrument {
    pub id: String,
    pub feed: FeedKind,
    pub feed_symbol: String,
    pub pip_size: f64,
    pub decimals: u32,
    /// Fixed take-profit distance in pips.
    pub tp_pips: f64,
    /// Fixed stop-loss distance in pips.
    pub sl_pips: f64,
}

impl Instrument {
    /// Convert a pip count to a price distance.
    pub fn price_distance(&self, pips: f64) -> f64 {
        pips * self.pip_size
    }

    pub fn format_price(&self, price: f64) -> String {
        format!("{:.*}", self.decimals as usize, price)
    }

    /// Label attached to trades using the fixed pip table, e.g. `TP20/SL25`.
    pub fn fixed_variant_label(&self) -> String {
        format!("TP{}/SL{}", self.tp_pips, self.sl_pips)
    }

    /// `(stop, target)` at the fixed pip distances from `entry`.
    pub fn fixed_stops(&self, entry: f64, direction: Direction) -> (f64, f64) {
        let sl = self.price_distance(self.sl_pips);
        let tp = self.price_distance(self.tp_pips);
        match direction {
            Direction::Buy => (entry - sl, entry + tp),
            Direction::Sell => (entry + sl, entry - tp),
        }
    }
}

/// An open simulated position.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trade {
    /// `{instrument}-{strategy}-{entry_time_ms}`, stable across reporting calls.
    pub id: String,
    pub instrument_id: String,
    pub strategy: String,
    pub direction: Direction,
    pub entry_price: f64,
    pub entry_time_ms: i64,
    pub stop_price: f64,
    pub target_price: f64,
    pub pip_size: f64,
    pub decimals: u32,
    pub variant_label: String,
    /// Session context at the moment of entry.
    pub sessions: SessionContext,
}

impl Trade {
    pub fn trade_id(instrument_id: &str, strategy: &str, entry_time_ms: i64) -> String {
        format!("{instrument_id}-{strategy}-{entry_time_ms}")
    }

    /// Signed result in pips if the trade were closed at `exit`.
    pub fn pips_at(&self, exit: f64) -> f64 {
        (exit - self.entry_price) * self.direction.sign() / self.pip_size
    }

    /// Outcome if `price` touches a boundary, `None` while strictly inside.
    pub fn touched(&self, price: f64) -> Option<Outcome> {
        match self.direction {
            Direction::Buy if price <= self.stop_price => Some(Outcome::Loss),
            Direction::Buy if price >= self.target_price => Some(Outcome::Win),
            Direction::Sell if price >= self.stop_price => Some(Outcome::Loss),
            Direction::Sell if price <= self.target_price => Some(Outcome::Win),
            _ => None,
        }
    }

    pub fn close(self, exit_price: f64, exit_time_ms: i64, outcome: Outcome) -> ClosedTrade {
        let pips = self.pips_at(exit_price);
        ClosedTrade {
            trade: self,
            exit_price,
            exit_time_ms,
            outcome,
            pips,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(type_name = "TEXT", rename_all = "lowercase")]
pub enum Outcome {
    Win,
    Loss,
}

impl std::fmt::Display for Outcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Outcome::Win => write!(f, "win"),
            Outcome::Loss => write!(f, "loss"),
        }
    }
}

/// A trade after its stop or target was touched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClosedTrade {
    pub trade: Trade,
    pub exit_price: f64,
    pub exit_time_ms: i64,
    pub outcome: Outcome,
    pub pips: f64,
}

/// Human-facing notification payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Alert {
    StrategyEntry(Trade),
    Result(ClosedTrade),
}

impl Alert {
    pub fn kind(&self) -> &'static str {
        match self {
            Alert::StrategyEntry(_) => "strategy_entry",
            Alert::Result(_) => "result",
        }
    }

    pub fn trade(&self) -> &Trade {
        match self {
            Alert::StrategyEntry(t) => t,
            Alert::Result(c) => &c.trade,
        }
    }

    /// Throttle key: (type, instrument, direction, variant).
    pub fn throttle_key(&self) -> String {
        let t = self.trade();
        format!(
            "{}:{}:{}:{}",
            self.kind(),
            t.instrument_id,
            t.direction,
            t.variant_label
        )
    }
}

/// Periodic per-instrument summary for status lines and `/status`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InstrumentStatus {
    pub instrument_id: String,
    pub last_price: Option<f64>,
    pub last_tick_ms: Option<i64>,
    pub sessions: SessionContext,
    pub strategies: Vec<String>,
}

/// Current state of the feed engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum EngineState {
    #[default]
    Stopped,
    Running,
}

impl std::fmt::Display for EngineState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineState::Stopped => write!(f, "stopped"),
            EngineState::Running => write!(f, "running"),
        }
    }
}

/// Commands sent to the engine via the command channel.
#[derive(Debug, Clone)]
pub enum EngineCommand {
    Start,
    Stop,
}
