use std::collections::HashMap;

use common::{Direction, Result, SessionWindows};
use tracing::debug;

use crate::config::{param_f64, param_usize};
use crate::patterns::{atr, is_displacement};
use crate::{clock, CandleContext, Detector, FiredEntry, PendingSetup, TickContext};

/// Power of three: London sweep of the Asia range, then displacement back
/// inside, then a retrace into the displacement body.
#[derive(Debug)]
pub struct Po3 {
    pip_size: f64,
    stop_buffer_pips: f64,
    min_candles: usize,
    atr_period: usize,
    displacement_mult: f64,
    windows: SessionWindows,

    sweep: Option<Sweep>,
    pending: Option<PendingSetup>,
    fired: bool,
}

#[derive(Debug, Clone, Copy)]
struct Sweep {
    direction: Direction,
    extreme: f64,
}

impl Po3 {
    pub fn from_params(params: &HashMap<String, toml::Value>, pip_size: f64, windows: SessionWindows) -> Result<Self> {
        Ok(Self {
            pip_size,
            stop_buffer_pips: param_f64(params, "stop_buffer_pips", 5.0)?,
            min_candles: param_usize(params, "min_candles", 30)?,
            atr_period: param_usize(params, "atr_period", 14)?,
            displacement_mult: param_f64(params, "displacement_mult", 1.2)?,
            windows,
            sweep: None,
            pending: None,
            fired: false,
        })
    }

    fn targets(&self, direction: Direction, zone_low: f64, zone_high: f64, ctx: &CandleContext<'_>) -> Vec<f64> {
        let s = ctx.sessions;
        let candidates = match direction {
            Direction::Sell => [s.daily_open, s.asia_low, s.prev_day_low],
            Direction::Buy => [s.daily_open, s.asia_high, s.prev_day_high],
        };
        let mut targets: Vec<f64> = candidates
            .into_iter()
            .flatten()
            .filter(|t| match direction {
                Direction::Sell => *t < zone_low,
                Direction::Buy => *t > zone_high,
            })
            .collect();
        match direction {
            Direction::Sell => targets.sort_by(|a, b| b.total_cmp(a)),
            Direction::Buy => targets.sort_by(|a, b| a.total_cmp(b)),
        }
        targets.dedup();
        targets
    }
}

impl Detector for Po3 {
    fn name(&self) -> &'static str {
        "PO3"
    }

    fn arm(&mut self, ctx: &CandleContext<'_>) -> Option<PendingSetup> {
        if self.fired || self.pending.is_some() || ctx.m1.len() < self.min_candles {
            return None;
        }
        let (asia_low, asia_high) = ctx.sessions.locked_asia_range()?;
        let atr = atr(ctx.m1, self.atr_period)?;
        let c = ctx.closed;

        let Some(sweep) = self.sweep else {
            let w = self.windows;
            if !clock::in_hour_range(c.open_time_ms, w.london_start, w.london_end) {
                return None;
            }
            if c.high > asia_high && c.close <= asia_high {
                self.sweep = Some(Sweep { direction: Direction::Sell, extreme: c.high });
                debug!(level = c.high, "PO3 swept Asia high");
            } else if c.low < asia_low && c.close >= asia_low {
                self.sweep = Some(Sweep { direction: Direction::Buy, extreme: c.low });
                debug!(level = c.low, "PO3 swept Asia low");
            }
            return None;
        };

        if !is_displacement(c, atr, self.displacement_mult) {
            return None;
        }
        let buffer = self.stop_buffer_pips * self.pip_size;
        let (zone_low, zone_high, stop) = match sweep.direction {
            Direction::Sell if c.is_bearish() && c.close < asia_high => {
                (c.body_mid(), c.body_high(), sweep.extreme + buffer)
            }
            Direction::Buy if c.is_bullish() && c.close > asia_low => {
                (c.body_low(), c.body_mid(), sweep.extreme - buffer)
            }
            _ => return None,
        };

        let setup = PendingSetup {
            direction: sweep.direction,
            zone_low,
            zone_high,
            stop: Some(stop),
            targets: self.targets(sweep.direction, zone_low, zone_high, ctx),
            formed_at_ms: c.open_time_ms,
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
        self.fired = true;
        Some(FiredEntry::from_setup(setup, tick.price))
    }

    fn reset_day(&mut self) {
        self.sweep = None;
        self.pending = None;
        self.fired = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detectors::test_support::*;
    use common::{Candle, SessionContext};

    fn sessions() -> SessionContext {
        SessionContext {
            daily_open: Some(1.1020),
            asia_high: Some(1.1050),
            asia_low: Some(1.1000),
            asia_locked: true,
            prev_day_low: Some(1.0950),
            prev_day_high: Some(1.1120),
            ..SessionContext::default()
        }
    }

    fn po3() -> Po3 {
        Po3::from_params(&HashMap::new(), PIP, SessionWindows::default()).unwrap()
    }

    /// Quiet history, London sweep of the Asia high, then a bearish displacement.
    fn sell_sequence() -> (Vec<Candle>, Candle, Candle) {
        let sweep_ts = ny(2, 30);
        let history = quiet_history(30, sweep_ts, 1.1030, 0.0003);
        let sweep = candle(sweep_ts, 1.1035, 1.1060, 1.1030, 1.1040);
        let disp = candle(sweep_ts + 60_000, 1.1040, 1.1042, 1.1008, 1.1010);
        (history, sweep, disp)
    }

    #[test]
    fn arms_sell_after_sweep_and_displacement() {
        let s = sessions();
        let mut d = po3();
        let (mut m1, sweep, disp) = sell_sequence();

        m1.push(sweep);
        assert!(d.arm(&ctx(&m1, &[], &s)).is_none());
        m1.push(disp);
        let setup = d.arm(&ctx(&m1, &[], &s)).expect("armed");

        assert_eq!(setup.direction, Direction::Sell);
        assert!((setup.zone_low - 1.1025).abs() < 1e-9);
        assert!((setup.zone_high - 1.1040).abs() < 1e-9);
        assert!((setup.stop.unwrap() - 1.1065).abs() < 1e-9);
        // daily open 1.1020, Asia low 1.1000, prev-day low 1.0950 nearest-first
        assert_eq!(setup.targets, vec![1.1020, 1.1000, 1.0950]);
    }

    #[test]
    fn fires_once_inside_zone() {
        let s = sessions();
        let mut d = po3();
        let (mut m1, sweep, disp) = sell_sequence();
        m1.push(sweep);
        d.arm(&ctx(&m1, &[], &s));
        m1.push(disp);
        d.arm(&ctx(&m1, &[], &s)).unwrap();

        let t = disp.open_time_ms + 90_000;
        assert!(d.fire(&tick(1.1050, t, &s)).is_none());
        let e = d.fire(&tick(1.10325, t, &s)).expect("fired");
        assert_eq!(e.direction, Direction::Sell);
        assert!(d.fire(&tick(1.10325, t + 1, &s)).is_none());

        // Still done for the day even if structure repeats.
        m1.push(candle(t + 60_000, 1.1040, 1.1042, 1.1008, 1.1010));
        assert!(d.arm(&ctx(&m1, &[], &s)).is_none());
    }

    #[test]
    fn sweep_outside_london_is_ignored() {
        let s = sessions();
        let mut d = po3();
        let ts = ny(7, 0);
        let mut m1 = quiet_history(30, ts, 1.1030, 0.0003);
        m1.push(candle(ts, 1.1035, 1.1060, 1.1030, 1.1040));
        d.arm(&ctx(&m1, &[], &s));
        m1.push(candle(ts + 60_000, 1.1040, 1.1042, 1.1008, 1.1010));
        assert!(d.arm(&ctx(&m1, &[], &s)).is_none());
    }

    #[test]
    fn unlocked_asia_never_arms() {
        let mut s = sessions();
        s.asia_locked = false;
        let mut d = po3();
        let (mut m1, sweep, disp) = sell_sequence();
        m1.push(sweep);
        d.arm(&ctx(&m1, &[], &s));
        m1.push(disp);
        assert!(d.arm(&ctx(&m1, &[], &s)).is_none());
    }

    #[test]
    fn reset_day_discards_pending() {
        let s = sessions();
        let mut d = po3();
        let (mut m1, sweep, disp) = sell_sequence();
        m1.push(sweep);
        d.arm(&ctx(&m1, &[], &s));
        m1.push(disp);
        d.arm(&ctx(&m1, &[], &s)).unwrap();
        d.reset_day();
        assert!(d.fire(&tick(1.1030, disp.open_time_ms + 90_000, &s)).is_none());
    }
}
