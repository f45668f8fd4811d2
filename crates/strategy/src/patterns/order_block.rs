use common::{Candle, Direction};

/// Last opposite-colour candle before a displacement.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OrderBlock {
    pub high: f64,
    pub low: f64,
    pub open: f64,
    pub open_time_ms: i64,
}

impl OrderBlock {
    pub fn mid(&self) -> f64 {
        (self.high + self.low) / 2.0
    }
}

/// Nearest candle before `idx` whose colour opposes `direction`, searching at
/// most `lookback` candles back. A bullish move looks for a bearish candle.
pub fn order_block_before(
    candles: &[Candle],
    idx: usize,
    direction: Direction,
    lookback: usize,
) -> Option<OrderBlock> {
    let floor = idx.saturating_sub(lookback);
    candles
        .get(floor..idx)?
        .iter()
        .rev()
        .find(|c| match direction {
            Direction::Buy => c.is_bearish(),
            Direction::Sell => c.is_bullish(),
        })
        .map(|c| OrderBlock {
            high: c.high,
            low: c.low,
            open: c.open,
            open_time_ms: c.open_time_ms,
        })
}
