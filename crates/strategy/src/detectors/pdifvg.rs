use std::collections::HashMap;

use common::{Direction, Result};

use crate::config::{param_f64, param_usize};
use crate::patterns::{detect_fvgs, GapKind};
use crate::{CandleContext, Detector, FiredEntry, PendingSetup, TickContext};

/// Side price came from when it touched a previous-day level.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Approach {
    FromAbove,
    FromBelow,
    Unknown,
}

#[derive(Debug, Clone, Copy)]
struct Touch {
    approach: Approach,
}

/// Previous-day inverse FVG: after price tags yesterday's open or close, wait
/// for an M5 gap against the approach and take the next tick at market.
#[derive(Debug)]
pub struct PrevDayInverseFvg {
    touch_tolerance: f64,
    gap_lookback: usize,
    prev_price: Option<f64>,
    touched: Option<Touch>,
    armed: Option<Direction>,
}

impl PrevDayInverseFvg {
    pub fn from_params(params: &HashMap<String, toml::Value>, pip_size: f64) -> Result<Self> {
        Ok(Self {
            touch_tolerance: (param_f64(params, "touch_pips", 3.0)? * pip_size).max(1e-10),
            gap_lookback: param_usize(params, "gap_lookback", 40)?,
            prev_price: None,
            touched: None,
            armed: None,
        })
    }

    fn record_touch(&mut self, tick: &TickContext<'_>) {
        if self.touched.is_some() {
            return;
        }
        let s = tick.sessions;
        for level in [s.prev_day_open, s.prev_day_close].into_iter().flatten() {
            if (tick.price - level).abs() > self.touch_tolerance {
                continue;
            }
            let approach = match self.prev_price {
                Some(p) if p > level => Approach::FromAbove,
                Some(p) if p < level => Approach::FromBelow,
                _ => Approach::Unknown,
            };
            self.touched = Some(Touch { approach });
            return;
        }
    }
}

impl Detector for PrevDayInverseFvg {
    fn name(&self) -> &'static str {
        "PDIFVG"
    }

    fn arm(&mut self, ctx: &CandleContext<'_>) -> Option<PendingSetup> {
        let touch = self.touched?;
        // Only a gap completed by the M5 bar that just closed counts.
        let bar = ctx.m5_closed?;
        let gap = *detect_fvgs(ctx.m5, self.gap_lookback).last()?;
        if gap.formed_at_ms != bar.open_time_ms {
            return None;
        }
        let direction = match (touch.approach, gap.kind) {
            (Approach::FromAbove, GapKind::Bull) => Direction::Buy,
            (Approach::FromBelow, GapKind::Bear) => Direction::Sell,
            _ => return None,
        };
        self.armed = Some(direction);
        Some(PendingSetup::at_level(direction, bar.close, bar.open_time_ms))
    }

    fn fire(&mut self, tick: &TickContext<'_>) -> Option<FiredEntry> {
        self.record_touch(tick);
        self.prev_price = Some(tick.price);

        let direction = self.armed.take()?;
        self.touched = None;
        Some(FiredEntry::market(direction, tick.price))
    }

    fn reset_day(&mut self) {
        self.prev_price = None;
        self.touched = None;
        self.armed = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detectors::test_support::*;
    use common::{Candle, SessionContext};

    fn sessions() -> SessionContext {
        SessionContext {
            prev_day_open: Some(1.1000),
            prev_day_close: Some(1.1080),
            ..SessionContext::default()
        }
    }

    fn bull_gap_m5(ts: i64) -> Vec<Candle> {
        let step = 5 * 60_000;
        vec![
            candle(ts - 2 * step, 1.0990, 1.0995, 1.0985, 1.0993),
            candle(ts - step, 1.0993, 1.1010, 1.0992, 1.1008),
            candle(ts, 1.1008, 1.1015, 1.1000, 1.1012),
        ]
    }

    #[test]
    fn touch_from_above_then_bull_gap_fires_buy_on_next_tick() {
        let s = sessions();
        let mut d = PrevDayInverseFvg::from_params(&HashMap::new(), PIP).unwrap();
        let ts = ny(10, 0);

        assert!(d.fire(&tick(1.1010, ts - 600_000, &s)).is_none());
        assert!(d.fire(&tick(1.1002, ts - 590_000, &s)).is_none()); // touch within 3 pips

        let m5 = bull_gap_m5(ts);
        let mut c = ctx(&m5, &m5, &s);
        c.m5_closed = m5.last();
        let setup = d.arm(&c).expect("armed");
        assert_eq!(setup.direction, Direction::Buy);

        let e = d.fire(&tick(1.1013, ts + 300_000, &s)).expect("fired");
        assert_eq!(e.direction, Direction::Buy);
        assert_eq!(e.entry, 1.1013);
        assert!(e.stop.is_none());
        assert!(d.fire(&tick(1.1013, ts + 301_000, &s)).is_none());
    }

    #[test]
    fn same_polarity_gap_does_not_arm() {
        let s = sessions();
        let mut d = PrevDayInverseFvg::from_params(&HashMap::new(), PIP).unwrap();
        let ts = ny(10, 0);
        d.fire(&tick(1.0990, ts - 600_000, &s));
        d.fire(&tick(1.0999, ts - 590_000, &s)); // touch from below

        let m5 = bull_gap_m5(ts);
        let mut c = ctx(&m5, &m5, &s);
        c.m5_closed = m5.last();
        assert!(d.arm(&c).is_none());
    }

    #[test]
    fn gap_without_touch_is_ignored() {
        let s = sessions();
        let mut d = PrevDayInverseFvg::from_params(&HashMap::new(), PIP).unwrap();
        let ts = ny(10, 0);
        let m5 = bull_gap_m5(ts);
        let mut c = ctx(&m5, &m5, &s);
        c.m5_closed = m5.last();
        assert!(d.arm(&c).is_none());
    }
}
