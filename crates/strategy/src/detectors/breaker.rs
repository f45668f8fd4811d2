use std::collections::HashMap;

use common::{Candle, Direction, Result};

use crate::config::{param_f64, param_usize};
use crate::patterns::{order_block_before, swings};
use crate::{CandleContext, Detector, FiredEntry, PendingSetup, TickContext};

/// Breaker reversal: after a swing is followed by a structure shift, the last
/// opposite candle before the swing becomes the retest zone.
#[derive(Debug)]
pub struct BreakerReversal {
    pip_size: f64,
    stop_buffer_pips: f64,
    min_candles: usize,
    swing_left: usize,
    swing_right: usize,
    breaker_lookback: usize,
    pending: Option<PendingSetup>,
    /// (direction, swing ts, broken swing ts) of the last armed structure.
    last_key: Option<(Direction, i64, i64)>,
}

impl BreakerReversal {
    pub fn from_params(params: &HashMap<String, toml::Value>, pip_size: f64) -> Result<Self> {
        Ok(Self {
            pip_size,
            stop_buffer_pips: param_f64(params, "stop_buffer_pips", 3.0)?,
            min_candles: param_usize(params, "min_candles", 80)?,
            swing_left: param_usize(params, "swing_left", 2)?,
            swing_right: param_usize(params, "swing_right", 2)?,
            breaker_lookback: param_usize(params, "breaker_lookback", 15)?,
            pending: None,
            last_key: None,
        })
    }

    /// Check one side. `swing` is the latest swing of the reversing side,
    /// `opposing` the first opposite swing after it.
    fn check(&mut self, m1: &[Candle], direction: Direction, swing: usize, opposing: usize) -> Option<PendingSetup> {
        let last_close = m1.last()?.close;
        let broken = match direction {
            Direction::Sell => m1[opposing].low,
            Direction::Buy => m1[opposing].high,
        };
        let shifted = match direction {
            Direction::Sell => last_close < broken,
            Direction::Buy => last_close > broken,
        };
        if !shifted {
            return None;
        }

        // Bearish breaker: last bullish candle before the swing high.
        let block = order_block_before(m1, swing, direction, self.breaker_lookback)?;

        let key = (direction, m1[swing].open_time_ms, m1[opposing].open_time_ms);
        if self.last_key == Some(key) {
            return None;
        }
        self.last_key = Some(key);

        let buffer = self.stop_buffer_pips * self.pip_size;
        let stop = match direction {
            Direction::Sell => block.high + buffer,
            Direction::Buy => block.low - buffer,
        };
        let setup = PendingSetup {
            direction,
            zone_low: block.low,
            zone_high: block.high,
            stop: Some(stop),
            targets: vec![broken],
            formed_at_ms: m1.last()?.open_time_ms,
            expires_at_ms: None,
        };
        self.pending = Some(setup.clone());
        Some(setup)
    }
}

impl Detector for BreakerReversal {
    fn name(&self) -> &'static str {
        "BREAKER"
    }

    fn arm(&mut self, ctx: &CandleContext<'_>) -> Option<PendingSetup> {
        let m1 = ctx.m1;
        if m1.len() < self.min_candles {
            return None;
        }
        let sw = swings(m1, self.swing_left, self.swing_right);
        if sw.highs.len() < 2 || sw.lows.len() < 2 {
            return None;
        }

        // Bearish: latest swing high, then a close below the next swing low.
        if let Some(&h) = sw.highs.last() {
            if let Some(&l) = sw.lows.iter().find(|&&i| i > h) {
                if let Some(setup) = self.check(m1, Direction::Sell, h, l) {
                    return Some(setup);
                }
            }
        }

        // Bullish: latest swing low, then a close above the next swing high.
        let &l = sw.lows.last()?;
        let &h = sw.highs.iter().find(|&&i| i > l)?;
        self.check(m1, Direction::Buy, l, h)
    }

    fn fire(&mut self, tick: &TickContext<'_>) -> Option<FiredEntry> {
        if !self.pending.as_ref()?.contains(tick.price) {
            return None;
        }
        let setup = self.pending.take()?;
        Some(FiredEntry::from_setup(setup, tick.price))
    }

    fn reset_day(&mut self) {
        // The dedupe key survives: yesterday's structure is still in the buffer.
        self.pending = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detectors::test_support::*;
    use common::SessionContext;

    /// Rally into a swing high, drop to a swing low, bounce to a lower high,
    /// then break below the swing low.
    fn bearish_structure() -> Vec<Candle> {
        let t0 = ny(9, 0);
        let mut m1 = quiet_history(70, t0, 1.1000, 0.0002);
        let mut push = |o: f64, h: f64, l: f64, c: f64| {
            let ts = t0 + m1.len() as i64 * 60_000;
            m1.push(candle(ts, o, h, l, c));
        };
        // earlier swing pair so both sides have two swings
        push(1.1000, 1.1010, 1.0999, 1.1008);
        push(1.1008, 1.1012, 1.1004, 1.1005);
        push(1.1005, 1.1006, 1.0990, 1.0992);
        push(1.0992, 1.0998, 1.0991, 1.0996);
        push(1.0996, 1.1004, 1.0995, 1.1002); // bullish, breaker candle
        push(1.1002, 1.1030, 1.1001, 1.1025); // swing high
        push(1.1025, 1.1026, 1.1010, 1.1012);
        push(1.1012, 1.1014, 1.1000, 1.1003); // swing low
        push(1.1003, 1.1015, 1.1002, 1.1012);
        push(1.1012, 1.1018, 1.1010, 1.1016);
        push(1.1016, 1.1017, 1.0990, 1.0994); // close below the swing low
        m1
    }

    #[test]
    fn arms_bearish_breaker_once() {
        let s = SessionContext::default();
        let m1 = bearish_structure();
        let mut d = BreakerReversal::from_params(&HashMap::new(), PIP).unwrap();

        let setup = d.arm(&ctx(&m1, &[], &s)).expect("armed");
        assert_eq!(setup.direction, Direction::Sell);
        assert_eq!((setup.zone_low, setup.zone_high), (1.0995, 1.1004));
        assert!((setup.stop.unwrap() - 1.1007).abs() < 1e-9);
        assert_eq!(setup.targets, vec![1.1000]);

        // same structure on the next close is not re-armed
        assert!(d.arm(&ctx(&m1, &[], &s)).is_none());

        let ts = m1.last().unwrap().open_time_ms + 60_000;
        let e = d.fire(&tick(1.1000, ts, &s)).expect("retest fires");
        assert_eq!(e.direction, Direction::Sell);
        assert_eq!(e.targets, vec![1.1000]);
    }

    #[test]
    fn too_little_history_is_quiet() {
        let s = SessionContext::default();
        let m1 = quiet_history(20, ny(9, 0), 1.1, 0.0002);
        let mut d = BreakerReversal::from_params(&HashMap::new(), PIP).unwrap();
        assert!(d.arm(&ctx(&m1, &[], &s)).is_none());
    }
}
