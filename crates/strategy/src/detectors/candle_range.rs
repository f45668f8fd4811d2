use std::collections::HashMap;

use common::{Candle, Direction, Error, Result, SessionContext};

use crate::config::{param_bool, param_f64, param_strings, param_usize};
use crate::patterns::{atr, detect_fvgs, order_block_before, GapKind};
use crate::{clock, CandleContext, Detector, FiredEntry, PendingSetup, TickContext};

/// Retracement levels of a displacement candle, in configurable priority.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RangeLevel {
    FvgMid,
    Ob50,
    Body50,
    Range50,
    ObOpen,
}

impl RangeLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            RangeLevel::FvgMid => "fvgMid",
            RangeLevel::Ob50 => "ob50",
            RangeLevel::Body50 => "body50",
            RangeLevel::Range50 => "range50",
            RangeLevel::ObOpen => "obOpen",
        }
    }

    fn parse(s: &str) -> Result<Self> {
        match s {
            "fvgMid" => Ok(RangeLevel::FvgMid),
            "ob50" => Ok(RangeLevel::Ob50),
            "body50" => Ok(RangeLevel::Body50),
            "range50" => Ok(RangeLevel::Range50),
            "obOpen" => Ok(RangeLevel::ObOpen),
            other => Err(Error::Config(format!("Unknown candle range level '{other}'"))),
        }
    }
}

const DEFAULT_LEVELS: [RangeLevel; 5] = [
    RangeLevel::FvgMid,
    RangeLevel::Ob50,
    RangeLevel::Body50,
    RangeLevel::Range50,
    RangeLevel::ObOpen,
];

#[derive(Debug, Clone)]
struct Armed {
    setup: PendingSetup,
    /// Resolved prices, already in priority order.
    levels: Vec<(RangeLevel, f64)>,
}

/// Candle range entry: a displacement candle that swept session liquidity
/// inside the window arms up to five retracement levels; the first one
/// touched or crossed is the entry.
#[derive(Debug)]
pub struct CandleRangeEntry {
    start_hour: f64,
    end_hour: f64,
    use_asia: bool,
    use_prev_day: bool,
    use_daily_open: bool,
    displacement_mult: f64,
    min_body: f64,
    atr_period: usize,
    min_candles: usize,
    expiry_ms: i64,
    levels: Vec<RangeLevel>,
    touch_tolerance: f64,
    one_trade_per_day: bool,

    armed: Option<Armed>,
    entered_today: bool,
    prev_price: Option<f64>,
}

impl CandleRangeEntry {
    pub fn from_params(params: &HashMap<String, toml::Value>, pip_size: f64) -> Result<Self> {
        let levels = match param_strings(params, "levels")? {
            Some(names) => names.iter().map(|n| RangeLevel::parse(n)).collect::<Result<Vec<_>>>()?,
            None => DEFAULT_LEVELS.to_vec(),
        };
        Ok(Self {
            start_hour: param_f64(params, "start_hour", 8.5)?,
            end_hour: param_f64(params, "end_hour", 11.0)?,
            use_asia: param_bool(params, "use_asia", true)?,
            use_prev_day: param_bool(params, "use_prev_day", true)?,
            use_daily_open: param_bool(params, "use_daily_open", true)?,
            displacement_mult: param_f64(params, "displacement_mult", 1.2)?,
            min_body: param_f64(params, "min_body_pips", 0.0)? * pip_size,
            atr_period: param_usize(params, "atr_period", 14)?,
            min_candles: param_usize(params, "min_candles", 20)?,
            expiry_ms: (param_f64(params, "expiry_min", 60.0)? * 60_000.0) as i64,
            levels,
            touch_tolerance: (param_f64(params, "touch_pips", 1.0)? * pip_size).max(1e-10),
            one_trade_per_day: param_bool(params, "one_trade_per_day", true)?,
            armed: None,
            entered_today: false,
            prev_price: None,
        })
    }

    /// Which side's liquidity the candle took. A candle that took both is
    /// resolved by its colour.
    fn sweep_direction(&self, c: &Candle, s: &SessionContext) -> Option<Direction> {
        let mut took_sell_side = false;
        let mut took_buy_side = false;

        if self.use_asia {
            took_buy_side |= s.asia_high.is_some_and(|h| c.high >= h);
            took_sell_side |= s.asia_low.is_some_and(|l| c.low <= l);
        }
        if self.use_prev_day {
            took_buy_side |= s.prev_day_high.is_some_and(|h| c.high >= h);
            took_sell_side |= s.prev_day_low.is_some_and(|l| c.low <= l);
        }
        if self.use_daily_open {
            if let Some(open) = s.daily_open {
                took_sell_side |= c.low <= open && c.close > open;
                took_buy_side |= c.high >= open && c.close < open;
            }
        }

        match (took_sell_side, took_buy_side) {
            (true, false) => Some(Direction::Buy),
            (false, true) => Some(Direction::Sell),
            (true, true) if c.close >= c.open => Some(Direction::Buy),
            (true, true) => Some(Direction::Sell),
            (false, false) => None,
        }
    }

    fn resolve_levels(&self, m1: &[Candle], direction: Direction) -> Vec<(RangeLevel, f64)> {
        let idx = m1.len() - 1;
        let c = m1[idx];
        let ob = order_block_before(m1, idx, direction, 1);
        let want = match direction {
            Direction::Buy => GapKind::Bull,
            Direction::Sell => GapKind::Bear,
        };
        let fvg = detect_fvgs(&m1[idx.saturating_sub(10)..], 20)
            .last()
            .copied()
            .filter(|g| g.kind == want);

        self.levels
            .iter()
            .filter_map(|&level| {
                let price = match level {
                    RangeLevel::FvgMid => fvg?.mid(),
                    RangeLevel::Ob50 => ob?.mid(),
                    RangeLevel::ObOpen => ob?.open,
                    RangeLevel::Body50 => c.body_mid(),
                    RangeLevel::Range50 => c.range_mid(),
                };
                Some((level, price))
            })
            .collect()
    }

    fn triggered(&self, direction: Direction, level: f64, price: f64, prev: Option<f64>) -> bool {
        if (price - level).abs() <= self.touch_tolerance {
            return true;
        }
        match (direction, prev) {
            (Direction::Buy, Some(p)) => p > level && price <= level,
            (Direction::Sell, Some(p)) => p < level && price >= level,
            (_, None) => false,
        }
    }
}

impl Detector for CandleRangeEntry {
    fn name(&self) -> &'static str {
        "CandleRange"
    }

    fn arm(&mut self, ctx: &CandleContext<'_>) -> Option<PendingSetup> {
        if (self.one_trade_per_day && self.entered_today) || ctx.m1.len() < self.min_candles {
            return None;
        }
        let c = ctx.closed;
        if !clock::in_hour_range(c.open_time_ms, self.start_hour, self.end_hour) {
            return None;
        }
        let atr = atr(ctx.m1, self.atr_period)?;
        if c.body() < self.displacement_mult * atr || c.body() < self.min_body {
            return None;
        }
        let direction = self.sweep_direction(c, ctx.sessions)?;
        let levels = self.resolve_levels(ctx.m1, direction);
        if levels.is_empty() {
            return None;
        }

        let lo = levels.iter().map(|(_, p)| *p).fold(f64::MAX, f64::min);
        let hi = levels.iter().map(|(_, p)| *p).fold(f64::MIN, f64::max);
        let formed_at_ms = c.open_time_ms;
        let setup = PendingSetup {
            direction,
            zone_low: lo,
            zone_high: hi,
            stop: None,
            targets: Vec::new(),
            formed_at_ms,
            expires_at_ms: (self.expiry_ms > 0).then_some(formed_at_ms + self.expiry_ms),
        };
        self.armed = Some(Armed { setup: setup.clone(), levels });
        Some(setup)
    }

    fn fire(&mut self, tick: &TickContext<'_>) -> Option<FiredEntry> {
        let prev = self.prev_price.replace(tick.price);
        if self.one_trade_per_day && self.entered_today {
            return None;
        }
        let armed = self.armed.as_ref()?;
        if armed.setup.is_expired(tick.ts_ms) {
            self.armed = None;
            return None;
        }
        if !clock::in_hour_range(tick.ts_ms, self.start_hour, self.end_hour) {
            return None;
        }

        let direction = armed.setup.direction;
        let (level, price) = armed
            .levels
            .iter()
            .copied()
            .find(|&(_, px)| self.triggered(direction, px, tick.price, prev))?;

        self.armed = None;
        self.entered_today = true;
        Some(FiredEntry {
            direction,
            entry: price,
            stop: None,
            targets: Vec::new(),
            level: Some(level.as_str()),
        })
    }

    fn reset_day(&mut self) {
        self.armed = None;
        self.entered_today = false;
        self.prev_price = None;
    }
}
