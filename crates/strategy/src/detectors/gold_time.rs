use std::collections::HashMap;

use common::{Direction, Error, Result};

use crate::config::{param_bool, param_usize};
use crate::patterns::Ema;
use crate::{clock, CandleContext, Detector, FiredEntry, PendingSetup, TickContext};

const HOUR_MS: i64 = 3_600_000;

/// Gold time: go long at the check hour when the bull/bear power reading
/// `(high - ema) + (low - ema)` was negative at each of the three preceding
/// top-of-hour candles.
///
/// The three hours may straddle midnight, so readings carry their candle time
/// and survive the day roll. Only readings from the last three hours count.
#[derive(Debug)]
pub struct GoldTime {
    check_hour: u32,
    one_trade_per_day: bool,
    ema: Ema,
    /// `(candle open ms, reading)` for check_hour - 3, - 2, - 1.
    readings: [Option<(i64, f64)>; 3],
    entered_today: bool,
}

impl GoldTime {
    pub fn from_params(params: &HashMap<String, toml::Value>) -> Result<Self> {
        let check_hour = param_usize(params, "check_hour", 4)?;
        if check_hour > 23 {
            return Err(Error::Config(format!(
                "strategy param 'check_hour' must be 0-23, got {check_hour}"
            )));
        }
        Ok(Self {
            check_hour: check_hour as u32,
            one_trade_per_day: param_bool(params, "one_trade_per_day", true)?,
            ema: Ema::new(param_usize(params, "ema_length", 14)?),
            readings: [None; 3],
            entered_today: false,
        })
    }

    fn slot_for(&self, hour: u32) -> Option<usize> {
        (0..3).find(|&i| (self.check_hour + 24 - 3 + i as u32) % 24 == hour)
    }
}

impl Detector for GoldTime {
    fn name(&self) -> &'static str {
        "GoldTime"
    }

    fn arm(&mut self, ctx: &CandleContext<'_>) -> Option<PendingSetup> {
        let c = ctx.closed;
        let ema = self.ema.update(c.close);
        let (hour, minute) = clock::hour_minute(c.open_time_ms);
        if minute == 0 {
            if let Some(slot) = self.slot_for(hour) {
                self.readings[slot] = Some((c.open_time_ms, (c.high - ema) + (c.low - ema)));
            }
        }
        None
    }

    fn fire(&mut self, tick: &TickContext<'_>) -> Option<FiredEntry> {
        if self.one_trade_per_day && self.entered_today {
            return None;
        }
        if clock::hour_minute(tick.ts_ms) != (self.check_hour, 0) {
            return None;
        }
        let bearish_run = self.readings.iter().all(|r| {
            r.is_some_and(|(at, v)| tick.ts_ms - at <= 3 * HOUR_MS && v < 0.0)
        });
        self.readings = [None; 3];
        if !bearish_run {
            return None;
        }
        self.entered_today = true;
        Some(FiredEntry::market(Direction::Buy, tick.price))
    }

    fn reset_day(&mut self) {
        self.entered_today = false;
    }
}
