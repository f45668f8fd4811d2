use std::collections::BTreeSet;

use proptest::prelude::*;

use common::SessionWindows;
use strategy::CandleAggregator;

/// 2024-03-04 00:00 New York, in epoch ms.
const DAY_START: i64 = 1_709_528_400_000;

fn tick_stream() -> impl Strategy<Value = Vec<(f64, i64)>> {
    prop::collection::vec((0.5f64..2.0f64, 0i64..20_000i64), 1..400).prop_map(|steps| {
        let mut ts = DAY_START;
        steps
            .into_iter()
            .map(|(price, gap)| {
                ts += gap;
                (price, ts)
            })
            .collect()
    })
}

proptest! {
    /// Every closed candle respects high >= max(open, close) and low <= min(open, close).
    #[test]
    fn candles_keep_ohlc_invariant(ticks in tick_stream()) {
        let mut agg = CandleAggregator::new(SessionWindows::default());
        for (price, ts) in &ticks {
            if let Some(bars) = agg.ingest(*price, *ts) {
                for c in std::iter::once(bars.m1).chain(bars.m5) {
                    prop_assert!(c.high >= c.open.max(c.close));
                    prop_assert!(c.low <= c.open.min(c.close));
                }
            }
        }
        if let Some(c) = agg.current() {
            prop_assert!(c.high >= c.open.max(c.close));
            prop_assert!(c.low <= c.open.min(c.close));
        }
    }

    /// With monotone timestamps, closed + in-progress candles equal the distinct minutes seen.
    #[test]
    fn one_candle_per_minute_bucket(ticks in tick_stream()) {
        let mut agg = CandleAggregator::new(SessionWindows::default());
        let mut buckets = BTreeSet::new();
        for (price, ts) in &ticks {
            agg.ingest(*price, *ts);
            buckets.insert(ts.div_euclid(60_000));
        }
        let in_progress = usize::from(agg.current().is_some());
        prop_assert_eq!(agg.m1().len() + in_progress, buckets.len());
        prop_assert_eq!(agg.m5().len(), agg.m1().len() / 5);
    }

    /// Out-of-order ticks never panic and never close a candle.
    #[test]
    fn late_ticks_fold_into_current(price in 0.5f64..2.0f64, back in 60_000i64..3_600_000i64) {
        let mut agg = CandleAggregator::new(SessionWindows::default());
        agg.ingest(1.0, DAY_START + 7_200_000);
        prop_assert!(agg.ingest(price, DAY_START + 7_200_000 - back).is_none());
        prop_assert!(agg.m1().is_empty());
    }
}
