use std::collections::HashMap;

use common::{Candle, Direction, Result};

use crate::config::{param_f64, param_usize};
use crate::patterns::{detect_fvgs, GapKind};
use crate::{CandleContext, Detector, FiredEntry, PendingSetup, TickContext};

/// Trend continuation: an M5 range breakout sets the bias, the latest aligned
/// M1 fair-value gap is the entry zone.
#[derive(Debug)]
pub struct FvgContinuation {
    pip_size: f64,
    stop_buffer_pips: f64,
    gap_lookback: usize,
    trend_lookback: usize,
    min_m1: usize,
    min_m5: usize,
    pending: Option<PendingSetup>,
    last_gap: Option<(GapKind, i64)>,
}

impl FvgContinuation {
    pub fn from_params(params: &HashMap<String, toml::Value>, pip_size: f64) -> Result<Self> {
        Ok(Self {
            pip_size,
            stop_buffer_pips: param_f64(params, "stop_buffer_pips", 2.0)?,
            gap_lookback: param_usize(params, "gap_lookback", 120)?,
            trend_lookback: param_usize(params, "trend_lookback", 10)?.max(1),
            min_m1: param_usize(params, "min_m1", 50)?,
            min_m5: param_usize(params, "min_m5", 30)?,
            pending: None,
            last_gap: None,
        })
    }

    fn trend(&self, m5: &[Candle]) -> Option<Direction> {
        let (last, prior) = m5.split_last()?;
        if prior.len() < self.trend_lookback {
            return None;
        }
        let window = &prior[prior.len() - self.trend_lookback..];
        let hi = window.iter().map(|c| c.high).fold(f64::MIN, f64::max);
        let lo = window.iter().map(|c| c.low).fold(f64::MAX, f64::min);
        if last.close > hi {
            Some(Direction::Buy)
        } else if last.close < lo {
            Some(Direction::Sell)
        } else {
            None
        }
    }
}

impl Detector for FvgContinuation {
    fn name(&self) -> &'static str {
        "FVGC"
    }

    fn arm(&mut self, ctx: &CandleContext<'_>) -> Option<PendingSetup> {
        if ctx.m1.len() < self.min_m1 || ctx.m5.len() < self.min_m5 {
            return None;
        }
        let direction = self.trend(ctx.m5)?;
        let want = match direction {
            Direction::Buy => GapKind::Bull,
            Direction::Sell => GapKind::Bear,
        };
        let gap = detect_fvgs(ctx.m1, self.gap_lookback)
            .into_iter()
            .rev()
            .find(|g| g.kind == want)?;

        let key = (gap.kind, gap.formed_at_ms);
        if self.last_gap == Some(key) {
            return None;
        }
        self.last_gap = Some(key);

        let buffer = self.stop_buffer_pips * self.pip_size;
        let (stop, target) = match direction {
            Direction::Buy => (gap.low - buffer, gap.high),
            Direction::Sell => (gap.high + buffer, gap.low),
        };
        let setup = PendingSetup {
            direction,
            zone_low: gap.low,
            zone_high: gap.high,
            stop: Some(stop),
            targets: vec![target],
            formed_at_ms: ctx.closed.open_time_ms,
            expires_at_ms: None,
        };
        self.pending = Some(setup.clone());
        Some(setup)
    }

    fn fire(&mut self, tick: &TickContext<'_>) -> Option<FiredEntry> {
        if !self.pending.as_ref()?.contains(tick.price) {
            return None;
        }
        let setup = self.pending.take()?;
        Some(FiredEntry::from_setup(setup, tick.price))
    }

    fn reset_day(&mut self) {
        self.pending = None;
    }
}
