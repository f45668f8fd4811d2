use std::collections::HashMap;

use common::{Candle, Direction, Result};

use crate::aggregator::merge;
use crate::config::{param_f64, param_usize};
use crate::{clock, CandleContext, Detector, FiredEntry, PendingSetup, TickContext};

const M3_MS: i64 = 3 * 60_000;
const MAX_M3: usize = 500;

/// Evening range order block: lock the 17:00-21:00 range, wait for a sweep of
/// either side, then trade the midpoint of the M3 order block left behind by
/// the displacement away from the sweep.
#[derive(Debug)]
pub struct NyRangeOb {
    range_start: f64,
    range_end: f64,
    displacement_ratio: f64,
    range_window: usize,

    range_high: Option<f64>,
    range_low: Option<f64>,
    locked: bool,
    /// Trade direction implied by the last sweep (high swept -> sell).
    swept: Option<Direction>,
    armed: Option<(Direction, f64)>,
    done_for_day: bool,

    m3: Vec<Candle>,
    m3_building: Vec<Candle>,
    prev_price: Option<f64>,
}

impl NyRangeOb {
    pub fn from_params(params: &HashMap<String, toml::Value>) -> Result<Self> {
        Ok(Self {
            range_start: param_f64(params, "range_start", 17.0)?,
            range_end: param_f64(params, "range_end", 21.0)?,
            displacement_ratio: param_f64(params, "displacement_ratio", 1.3)?,
            range_window: param_usize(params, "range_window", 10)?.max(3),
            range_high: None,
            range_low: None,
            locked: false,
            swept: None,
            armed: None,
            done_for_day: false,
            m3: Vec::new(),
            m3_building: Vec::new(),
            prev_price: None,
        })
    }

    /// Fold an M1 close into the M3 series. Returns true when an M3 bar completed.
    fn ingest_m3(&mut self, c: &Candle) -> bool {
        let bucket = c.open_time_ms.div_euclid(M3_MS);
        let completed = match self.m3_building.first() {
            Some(first) if first.open_time_ms.div_euclid(M3_MS) != bucket => {
                self.m3.push(merge(&self.m3_building));
                if self.m3.len() > MAX_M3 {
                    self.m3.remove(0);
                }
                self.m3_building.clear();
                true
            }
            _ => false,
        };
        self.m3_building.push(*c);
        completed
    }

    fn detect_block(&mut self) -> Option<(Direction, f64, i64)> {
        if self.armed.is_some() || self.done_for_day {
            return None;
        }
        let swept = self.swept?;
        let n = self.m3.len();
        if n < 3 {
            return None;
        }
        let (prev, cur) = (self.m3[n - 2], self.m3[n - 1]);
        let window = &self.m3[n.saturating_sub(self.range_window)..];
        let avg_range = window.iter().map(Candle::range).sum::<f64>() / window.len() as f64;
        if cur.range() <= self.displacement_ratio * avg_range {
            return None;
        }
        let formed = match swept {
            Direction::Sell => prev.is_bullish() && cur.close < prev.low,
            Direction::Buy => prev.is_bearish() && cur.close > prev.high,
        };
        formed.then(|| (swept, prev.range_mid(), cur.open_time_ms))
    }
}

impl Detector for NyRangeOb {
    fn name(&self) -> &'static str {
        "NYRangeOB"
    }

    fn arm(&mut self, ctx: &CandleContext<'_>) -> Option<PendingSetup> {
        let c = ctx.closed;
        let hour = clock::hour_fraction(c.open_time_ms);

        if hour >= self.range_start && hour < self.range_end {
            self.range_high = Some(self.range_high.map_or(c.high, |h| h.max(c.high)));
            self.range_low = Some(self.range_low.map_or(c.low, |l| l.min(c.low)));
        }
        if !self.locked && hour >= self.range_end && self.range_high.is_some() {
            self.locked = true;
        }

        if !self.ingest_m3(c) {
            return None;
        }
        let (direction, mid, formed_at_ms) = self.detect_block()?;
        self.armed = Some((direction, mid));
        Some(PendingSetup::at_level(direction, mid, formed_at_ms))
    }

    fn fire(&mut self, tick: &TickContext<'_>) -> Option<FiredEntry> {
        let price = tick.price;
        let prev = self.prev_price.replace(price);

        if !self.locked || self.done_for_day || clock::hour_fraction(tick.ts_ms) < self.range_end {
            return None;
        }
        let prev = prev?;

        if let Some(high) = self.range_high {
            if prev < high && price >= high {
                self.swept = Some(Direction::Sell);
                self.armed = None;
            }
        }
        if let Some(low) = self.range_low {
            if prev > low && price <= low {
                self.swept = Some(Direction::Buy);
                self.armed = None;
            }
        }

        let (direction, mid) = self.armed?;
        let crossed = match direction {
            Direction::Sell => prev > mid && price <= mid,
            Direction::Buy => prev < mid && price >= mid,
        };
        if !crossed {
            return None;
        }
        self.armed = None;
        self.done_for_day = true;
        Some(FiredEntry::market(direction, mid))
    }

    fn reset_day(&mut self) {
        self.range_high = None;
        self.range_low = None;
        self.locked = false;
        self.swept = None;
        self.armed = None;
        self.done_for_day = false;
        self.m3.clear();
        self.m3_building.clear();
        self.prev_price = None;
    }
}
