use std::collections::HashMap;

use common::{Direction, Result};

use crate::config::{param_bool, param_f64, param_usize};
use crate::{clock, CandleContext, Detector, FiredEntry, PendingSetup, TickContext};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Break {
    Above,
    Below,
}

/// Opening range breakout.
///
/// Builds the range over `[start_hour, start_hour + duration)`. After it
/// completes, a breakout is confirmed either by an M1 close beyond the range
/// or by a tick crossing out of it. Each confirmation is consumed by the entry
/// it produces.
#[derive(Debug)]
pub struct OpeningRangeBreakout {
    start_hour: f64,
    end_hour: f64,
    confirm_by_close: bool,
    reverse: bool,
    max_entries_per_day: usize,
    touch_tolerance: f64,
    eod_hour: f64,

    high: Option<f64>,
    low: Option<f64>,
    started: bool,
    complete: bool,
    entries: usize,
    close_break: Option<Break>,
    prev_price: Option<f64>,
}

impl OpeningRangeBreakout {
    pub fn from_params(params: &HashMap<String, toml::Value>, pip_size: f64) -> Result<Self> {
        let start_hour = param_f64(params, "start_hour", 9.5)?;
        let duration_min = param_f64(params, "duration_min", 30.0)?;
        Ok(Self {
            start_hour,
            end_hour: start_hour + duration_min / 60.0,
            confirm_by_close: param_bool(params, "confirm_by_close", true)?,
            reverse: param_bool(params, "reverse", false)?,
            max_entries_per_day: param_usize(params, "max_entries_per_day", 1)?.clamp(1, 2),
            touch_tolerance: (param_f64(params, "touch_pips", 0.0)? * pip_size).max(0.0),
            eod_hour: param_f64(params, "eod_hour", 16.5)?,
            high: None,
            low: None,
            started: false,
            complete: false,
            entries: 0,
            close_break: None,
            prev_price: None,
        })
    }

    fn classify(&self, price: f64, high: f64, low: f64) -> Option<Break> {
        if price >= high - self.touch_tolerance {
            Some(Break::Above)
        } else if price <= low + self.touch_tolerance {
            Some(Break::Below)
        } else {
            None
        }
    }

    fn entry_for(&self, brk: Break, high: f64, low: f64) -> FiredEntry {
        let breakout = match brk {
            Break::Above => Direction::Buy,
            Break::Below => Direction::Sell,
        };
        let direction = if self.reverse { breakout.opposite() } else { breakout };
        let edge = match brk {
            Break::Above => high,
            Break::Below => low,
        };
        FiredEntry::market(direction, edge)
    }
}

impl Detector for OpeningRangeBreakout {
    fn name(&self) -> &'static str {
        "ORB"
    }

    fn arm(&mut self, ctx: &CandleContext<'_>) -> Option<PendingSetup> {
        let c = ctx.closed;
        let hour = clock::hour_fraction(c.open_time_ms);

        if hour >= self.start_hour && hour < self.end_hour {
            self.started = true;
            self.high = Some(self.high.map_or(c.high, |h| h.max(c.high)));
            self.low = Some(self.low.map_or(c.low, |l| l.min(c.low)));
            return None;
        }

        let (high, low) = (self.high?, self.low?);
        if !self.complete && self.started && hour >= self.end_hour {
            self.complete = true;
        }
        if !self.complete || !self.confirm_by_close || self.entries >= self.max_entries_per_day {
            return None;
        }

        self.close_break = self.classify(c.close, high, low);
        let brk = self.close_break?;
        let preview = self.entry_for(brk, high, low);
        Some(PendingSetup::at_level(preview.direction, preview.entry, c.open_time_ms))
    }

    fn fire(&mut self, tick: &TickContext<'_>) -> Option<FiredEntry> {
        let prev = self.prev_price.replace(tick.price);
        if !self.complete
            || self.entries >= self.max_entries_per_day
            || clock::hour_fraction(tick.ts_ms) > self.eod_hour
        {
            return None;
        }
        let (high, low) = (self.high?, self.low?);

        let brk = if self.confirm_by_close {
            self.close_break.take()?
        } else {
            let now = self.classify(tick.price, high, low)?;
            // Fresh cross only: the previous tick must have been inside.
            if self.classify(prev?, high, low).is_some() {
                return None;
            }
            now
        };

        self.entries += 1;
        Some(self.entry_for(brk, high, low))
    }

    fn reset_day(&mut self) {
        self.high = None;
        self.low = None;
        self.started = false;
        self.complete = false;
        self.entries = 0;
        self.close_break = None;
        self.prev_price = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detectors::test_support::*;
    use common::{Candle, SessionContext};

    fn build_range(d: &mut OpeningRangeBreakout, m1: &mut Vec<Candle>, s: &SessionContext) {
        for i in 0..30 {
            m1.push(candle(ny(9, 30 + i), 1.1010, 1.1020, 1.1000, 1.1010));
            d.arm(&ctx(m1, &[], s));
        }
    }

    #[test]
    fn close_confirmation_respects_max_entries() {
        let s = SessionContext::default();
        let mut d = OpeningRangeBreakout::from_params(&HashMap::new(), PIP).unwrap();
        let mut m1 = Vec::new();
        build_range(&mut d, &mut m1, &s);

        // first breakout close
        m1.push(candle(ny(10, 0), 1.1015, 1.1030, 1.1014, 1.1025));
        let armed = d.arm(&ctx(&m1, &[], &s)).expect("break above");
        assert_eq!(armed.direction, Direction::Buy);

        let e = d.fire(&tick(1.1026, ny(10, 1), &s)).expect("fired");
        assert_eq!(e.direction, Direction::Buy);
        assert_eq!(e.entry, 1.1020);
        assert!(d.fire(&tick(1.1027, ny(10, 1) + 500, &s)).is_none());

        // second qualifying breakout on the same day
        m1.push(candle(ny(10, 1), 1.1025, 1.1040, 1.1024, 1.1035));
        assert!(d.arm(&ctx(&m1, &[], &s)).is_none());
        assert!(d.fire(&tick(1.1036, ny(10, 2), &s)).is_none());
    }

    #[test]
    fn tick_mode_needs_fresh_cross() {
        let s = SessionContext::default();
        let mut params = HashMap::new();
        params.insert("confirm_by_close".to_string(), toml::Value::Boolean(false));
        params.insert("max_entries_per_day".to_string(), toml::Value::Integer(2));
        let mut d = OpeningRangeBreakout::from_params(&params, PIP).unwrap();
        let mut m1 = Vec::new();
        build_range(&mut d, &mut m1, &s);
        m1.push(candle(ny(10, 0), 1.1010, 1.1015, 1.1005, 1.1010));
        d.arm(&ctx(&m1, &[], &s));

        assert!(d.fire(&tick(1.1010, ny(10, 1), &s)).is_none());
        let e = d.fire(&tick(1.0999, ny(10, 1) + 100, &s)).expect("break below");
        assert_eq!(e.direction, Direction::Sell);
        assert_eq!(e.entry, 1.1000);
        // staying outside is not a new cross
        assert!(d.fire(&tick(1.0990, ny(10, 1) + 200, &s)).is_none());
        // back inside, then out again: second entry allowed
        assert!(d.fire(&tick(1.1010, ny(10, 1) + 300, &s)).is_none());
        assert!(d.fire(&tick(1.1021, ny(10, 1) + 400, &s)).is_some());
        // cap of two reached
        assert!(d.fire(&tick(1.1010, ny(10, 1) + 500, &s)).is_none());
        assert!(d.fire(&tick(1.0990, ny(10, 1) + 600, &s)).is_none());
    }

    #[test]
    fn reverse_flips_direction() {
        let s = SessionContext::default();
        let mut params = HashMap::new();
        params.insert("reverse".to_string(), toml::Value::Boolean(true));
        let mut d = OpeningRangeBreakout::from_params(&params, PIP).unwrap();
        let mut m1 = Vec::new();
        build_range(&mut d, &mut m1, &s);
        m1.push(candle(ny(10, 0), 1.1015, 1.1030, 1.1014, 1.1025));
        d.arm(&ctx(&m1, &[], &s));
        assert_eq!(d.fire(&tick(1.1026, ny(10, 1), &s)).unwrap().direction, Direction::Sell);
    }

    #[test]
    fn no_entries_after_end_of_day() {
        let s = SessionContext::default();
        let mut d = OpeningRangeBreakout::from_params(&HashMap::new(), PIP).unwrap();
        let mut m1 = Vec::new();
        build_range(&mut d, &mut m1, &s);
        m1.push(candle(ny(16, 40), 1.1015, 1.1030, 1.1014, 1.1025));
        d.arm(&ctx(&m1, &[], &s));
        assert!(d.fire(&tick(1.1026, ny(16, 41), &s)).is_none());
    }
}
