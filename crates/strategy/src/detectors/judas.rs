use std::collections::HashMap;

use common::{Direction, Result, SessionWindows};

use crate::config::{param_f64, param_usize};
use crate::{clock, CandleContext, Detector, FiredEntry, PendingSetup, TickContext};

/// Judas swing: fade a London sweep of the Asia range straight back to the
/// swept boundary, without waiting for displacement.
#[derive(Debug)]
pub struct JudasSwing {
    pip_size: f64,
    stop_buffer_pips: f64,
    min_candles: usize,
    windows: SessionWindows,
    pending: Option<PendingSetup>,
}

impl JudasSwing {
    pub fn from_params(params: &HashMap<String, toml::Value>, pip_size: f64, windows: SessionWindows) -> Result<Self> {
        Ok(Self {
            pip_size,
            stop_buffer_pips: param_f64(params, "stop_buffer_pips", 5.0)?,
            min_candles: param_usize(params, "min_candles", 10)?,
            windows,
            pending: None,
        })
    }
}

impl Detector for JudasSwing {
    fn name(&self) -> &'static str {
        "JUDAS"
    }

    fn arm(&mut self, ctx: &CandleContext<'_>) -> Option<PendingSetup> {
        if ctx.m1.len() < self.min_candles {
            return None;
        }
        let (asia_low, asia_high) = ctx.sessions.locked_asia_range()?;
        let c = ctx.closed;
        if !clock::in_hour_range(c.open_time_ms, self.windows.london_start, self.windows.london_end) {
            return None;
        }

        let buffer = self.stop_buffer_pips * self.pip_size;
        let setup = if c.high > asia_high && c.close <= asia_high {
            PendingSetup {
                direction: Direction::Sell,
                zone_low: asia_high,
                zone_high: c.high,
                stop: Some(c.high + buffer),
                targets: vec![asia_high],
                formed_at_ms: c.open_time_ms,
                expires_at_ms: None,
            }
        } else if c.low < asia_low && c.close >= asia_low {
            PendingSetup {
                direction: Direction::Buy,
                zone_low: c.low,
                zone_high: asia_low,
                stop: Some(c.low - buffer),
                targets: vec![asia_low],
                formed_at_ms: c.open_time_ms,
                expires_at_ms: None,
            }
        } else {
            return None;
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
