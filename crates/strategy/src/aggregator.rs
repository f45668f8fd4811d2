use common::{Candle, SessionContext, SessionSnapshot, SessionWindows};

use crate::clock;

/// Bars closed by a single tick.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClosedBars {
    pub m1: Candle,
    /// Present on every fifth closed M1.
    pub m5: Option<Candle>,
}

/// Turns ticks into M1/M5 candles and keeps the rolling session context.
///
/// The aggregator is the only writer of [`SessionContext`]; callers get copies
/// through [`CandleAggregator::sessions`].
#[derive(Debug)]
pub struct CandleAggregator {
    windows: SessionWindows,
    current: Option<Candle>,
    m1: Vec<Candle>,
    m5: Vec<Candle>,
    m1_since_m5: usize,
    sessions: SessionContext,
}

impl CandleAggregator {
    pub const MAX_M1: usize = 5000;
    pub const MAX_M5: usize = 2000;

    pub fn new(windows: SessionWindows) -> Self {
        Self {
            windows,
            current: None,
            m1: Vec::new(),
            m5: Vec::new(),
            m1_since_m5: 0,
            sessions: SessionContext::default(),
        }
    }

    /// Fold one tick in. Returns the bars closed by it, if any.
    ///
    /// A tick from a minute earlier than the in-progress one is folded into the
    /// in-progress candle; feed ordering is best-effort.
    pub fn ingest(&mut self, price: f64, ts_ms: i64) -> Option<ClosedBars> {
        let minute_start = ts_ms.div_euclid(60_000) * 60_000;

        match self.current.as_mut() {
            None => {
                self.current = Some(Candle::seeded(minute_start, price));
                None
            }
            Some(c) if minute_start <= c.open_time_ms => {
                c.update(price);
                None
            }
            Some(c) => {
                let closed = *c;
                *c = Candle::seeded(minute_start, price);
                Some(self.finalize(closed))
            }
        }
    }

    pub fn m1(&self) -> &[Candle] {
        &self.m1
    }

    pub fn m5(&self) -> &[Candle] {
        &self.m5
    }

    /// The in-progress M1 candle.
    pub fn current(&self) -> Option<&Candle> {
        self.current.as_ref()
    }

    /// Copy of the current session context.
    pub fn sessions(&self) -> SessionContext {
        self.sessions.clone()
    }

    /// Restore session levels saved earlier for the same day.
    pub fn seed_from_snapshot(&mut self, snap: &SessionSnapshot) {
        let s = &mut self.sessions;
        s.day_key = Some(snap.day_key);
        s.daily_open = snap.daily_open.or(s.daily_open);
        s.asia_high = snap.asia_high.or(s.asia_high);
        s.asia_low = snap.asia_low.or(s.asia_low);
        s.asia_locked = snap.asia_locked;
        s.prev_day_high = snap.prev_day_high.or(s.prev_day_high);
        s.prev_day_low = snap.prev_day_low.or(s.prev_day_low);
        s.today_high = snap.today_high.or(s.today_high);
        s.today_low = snap.today_low.or(s.today_low);
    }

    fn finalize(&mut self, c: Candle) -> ClosedBars {
        self.roll_day(&c);
        self.track_sessions(&c);

        self.m1.push(c);
        if self.m1.len() > Self::MAX_M1 {
            self.m1.remove(0);
        }

        self.m1_since_m5 += 1;
        let m5 = if self.m1_since_m5 == 5 {
            self.m1_since_m5 = 0;
            let bar = merge(&self.m1[self.m1.len() - 5..]);
            self.m5.push(bar);
            if self.m5.len() > Self::MAX_M5 {
                self.m5.remove(0);
            }
            Some(bar)
        } else {
            None
        };

        ClosedBars { m1: c, m5 }
    }

    fn roll_day(&mut self, c: &Candle) {
        let key = clock::day_key(c.open_time_ms);
        if self.sessions.day_key == Some(key) {
            return;
        }
        let s = &mut self.sessions;
        if s.day_key.is_some() {
            s.prev_day_high = s.today_high;
            s.prev_day_low = s.today_low;
            s.prev_day_open = s.daily_open;
            s.prev_day_close = self.m1.last().map(|c| c.close);
        }
        s.day_key = Some(key);
        s.daily_open = None;
        s.asia_high = None;
        s.asia_low = None;
        s.asia_locked = false;
        s.today_high = None;
        s.today_low = None;
    }

    fn track_sessions(&mut self, c: &Candle) {
        let (hour, minute) = clock::hour_minute(c.open_time_ms);
        let hf = clock::hour_fraction(c.open_time_ms);
        let w = self.windows;
        let s = &mut self.sessions;

        if hour == 0 && minute == 0 && s.daily_open.is_none() {
            s.daily_open = Some(c.open);
        }

        s.today_high = Some(s.today_high.map_or(c.high, |h| h.max(c.high)));
        s.today_low = Some(s.today_low.map_or(c.low, |l| l.min(c.low)));

        if !s.asia_locked && hf >= w.asia_start && hf < w.asia_end {
            s.asia_high = Some(s.asia_high.map_or(c.high, |h| h.max(c.high)));
            s.asia_low = Some(s.asia_low.map_or(c.low, |l| l.min(c.low)));
        }

        if !s.asia_locked && hf >= w.asia_end && s.asia_range().is_some() {
            s.asia_locked = true;
        }
    }
}

/// Merge consecutive candles into one higher-timeframe bar.
pub fn merge(bars: &[Candle]) -> Candle {
    let first = bars[0];
    bars[1..].iter().fold(first, |mut acc, c| {
        acc.high = acc.high.max(c.high);
        acc.low = acc.low.min(c.low);
        acc.close = c.close;
        acc
    })
}
