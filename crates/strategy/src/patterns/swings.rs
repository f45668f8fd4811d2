use common::Candle;

/// Indices of local swing highs and lows, ascending.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Swings {
    pub highs: Vec<usize>,
    pub lows: Vec<usize>,
}

/// Swing points with `left` candles before and `right` after.
///
/// A high must be strictly above every high on the left and not exceeded on
/// the right (ties on the right still count). Lows mirror this.
pub fn swings(candles: &[Candle], left: usize, right: usize) -> Swings {
    let mut out = Swings::default();
    if candles.len() < left + right + 1 {
        return out;
    }
    for i in left..candles.len() - right {
        let c = &candles[i];
        let before = &candles[i - left..i];
        let after = &candles[i + 1..=i + right];

        let is_high = before.iter().all(|b| b.high < c.high) && after.iter().all(|a| a.high <= c.high);
        let is_low = before.iter().all(|b| b.low > c.low) && after.iter().all(|a| a.low >= c.low);

        if is_high {
            out.highs.push(i);
        }
        if is_low {
            out.lows.push(i);
        }
    }
    out
}
