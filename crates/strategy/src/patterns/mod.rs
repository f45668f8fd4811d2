//! Stateless structural primitives over candle slices (oldest first).

pub mod ema;
pub mod fvg;
pub mod order_block;
pub mod swings;

pub use ema::Ema;
pub use fvg::{detect_fvgs, FairValueGap, GapKind};
pub use order_block::{order_block_before, OrderBlock};
pub use swings::{swings, Swings};

use common::Candle;

/// Average true range over the last `period` candles.
///
/// Returns `None` until `period + 1` candles exist.
pub fn atr(candles: &[Candle], period: usize) -> Option<f64> {
    if period == 0 || candles.len() < period + 1 {
        return None;
    }
    let tail = &candles[candles.len() - period - 1..];
    let sum: f64 = tail
        .windows(2)
        .map(|w| {
            let (prev, c) = (w[0], w[1]);
            (c.high - c.low)
                .max((c.high - prev.close).abs())
                .max((c.low - prev.close).abs())
        })
        .sum();
    Some(sum / period as f64)
}

/// Body of `candle` is at least `mult` times `atr`.
pub fn is_displacement(candle: &Candle, atr: f64, mult: f64) -> bool {
    atr > 0.0 && candle.body() >= mult * atr
}

#[cfg(test)]
pub(crate) mod test_support {
    use common::Candle;

    /// Candle with explicit OHLC at minute `i`.
    pub fn bar(i: i64, open: f64, high: f64, low: f64, close: f64) -> Candle {
        Candle {
            open_time_ms: i * 60_000,
            open,
            high,
            low,
            close,
        }
    }

    /// Flat, narrow candles around `price`.
    pub fn flat(n: usize, price: f64, half_range: f64) -> Vec<Candle> {
        (0..n)
            .map(|i| bar(i as i64, price, price + half_range, price - half_range, price))
            .collect()
    }
}
