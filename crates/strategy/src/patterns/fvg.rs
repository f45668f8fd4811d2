use common::Candle;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GapKind {
    Bull,
    Bear,
}

/// Three-candle imbalance `[low, high]`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FairValueGap {
    pub kind: GapKind,
    /// Index of the first of the three candles.
    pub start_index: usize,
    /// Index of the third candle.
    pub end_index: usize,
    pub low: f64,
    pub high: f64,
    /// Open time of the third candle; stable across buffer eviction.
    pub formed_at_ms: i64,
}

impl FairValueGap {
    pub fn mid(&self) -> f64 {
        (self.low + self.high) / 2.0
    }
}

const MAX_GAPS: usize = 10;

/// Fair-value gaps among the last `lookback` candles, oldest first.
///
/// Same-kind gaps whose third candles are within two bars of each other are
/// coalesced into the later one. At most the ten most recent are returned.
pub fn detect_fvgs(candles: &[Candle], lookback: usize) -> Vec<FairValueGap> {
    let start = candles.len().saturating_sub(lookback);
    let mut out: Vec<FairValueGap> = Vec::new();

    for (offset, w) in candles[start..].windows(3).enumerate() {
        let (a, c) = (w[0], w[2]);
        let i = start + offset;
        let found = if a.high < c.low {
            Some((GapKind::Bull, a.high, c.low))
        } else if a.low > c.high {
            Some((GapKind::Bear, c.high, a.low))
        } else {
            None
        };
        let Some((kind, low, high)) = found else {
            continue;
        };
        let gap = FairValueGap {
            kind,
            start_index: i,
            end_index: i + 2,
            low,
            high,
            formed_at_ms: c.open_time_ms,
        };
        match out.last_mut() {
            Some(last) if last.kind == kind && gap.end_index - last.end_index <= 2 => *last = gap,
            _ => out.push(gap),
        }
    }

    if out.len() > MAX_GAPS {
        out.drain(..out.len() - MAX_GAPS);
    }
    out
}
