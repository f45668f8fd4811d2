//! The nine pattern detectors and their construction from config.

pub mod breaker;
pub mod candle_range;
pub mod fvg_continuation;
pub mod gold_time;
pub mod judas;
pub mod ny_range_ob;
pub mod orb;
pub mod pdifvg;
pub mod po3;

pub use breaker::BreakerReversal;
pub use candle_range::CandleRangeEntry;
pub use fvg_continuation::FvgContinuation;
pub use gold_time::GoldTime;
pub use judas::JudasSwing;
pub use ny_range_ob::NyRangeOb;
pub use orb::OpeningRangeBreakout;
pub use pdifvg::PrevDayInverseFvg;
pub use po3::Po3;

use common::{Error, Instrument, Result, SessionWindows};

use crate::config::StrategyConfig;
use crate::Detector;

/// Tick evaluation order. Config order does not matter.
const FIRE_ORDER: [&str; 9] = [
    "po3",
    "pdifvg",
    "fvgc",
    "breaker",
    "judas",
    "nyrangeob",
    "orb",
    "candlerange",
    "goldtime",
];

/// Rank of a strategy type in the tick evaluation order.
pub fn fire_rank(strategy_type: &str) -> Option<usize> {
    FIRE_ORDER.iter().position(|t| *t == strategy_type)
}

/// Build one detector for `instrument` from its config entry.
pub fn build_detector(
    cfg: &StrategyConfig,
    instrument: &Instrument,
    windows: SessionWindows,
) -> Result<Box<dyn Detector>> {
    let pip = instrument.pip_size;
    let p = &cfg.params;
    let detector: Box<dyn Detector> = match cfg.strategy_type.as_str() {
        "po3" => Box::new(Po3::from_params(p, pip, windows)?),
        "judas" => Box::new(JudasSwing::from_params(p, pip, windows)?),
        "breaker" => Box::new(BreakerReversal::from_params(p, pip)?),
        "fvgc" => Box::new(FvgContinuation::from_params(p, pip)?),
        "pdifvg" => Box::new(PrevDayInverseFvg::from_params(p, pip)?),
        "nyrangeob" => Box::new(NyRangeOb::from_params(p)?),
        "orb" => Box::new(OpeningRangeBreakout::from_params(p, pip)?),
        "candlerange" => Box::new(CandleRangeEntry::from_params(p, pip)?),
        "goldtime" => Box::new(GoldTime::from_params(p)?),
        other => {
            return Err(Error::Config(format!("Unknown strategy type '{other}'")));
        }
    };
    Ok(detector)
}


#[cfg(test)]
mod tests {
    use super::*;
    use common::FeedKind;

    fn eurusd() -> Instrument {
        Instrument {
            id: "EURUSD".into(),
            feed: FeedKind::Finnhub,
            feed_symbol: "OANDA:EUR_USD".into(),
            pip_size: 0.0001,
            decimals: 5,
            tp_pips: 20.0,
            sl_pips: 25.0,
        }
    }

    #[test]
    fn builds_every_known_type() {
        for t in FIRE_ORDER {
            let d = build_detector(&StrategyConfig::new(t), &eurusd(), SessionWindows::default());
            assert!(d.is_ok(), "failed to build {t}");
        }
    }

    #[test]
    fn unknown_type_is_config_error() {
        let err = build_detector(&StrategyConfig::new("rsi"), &eurusd(), SessionWindows::default());
        assert!(matches!(err, Err(Error::Config(_))));
    }

    #[test]
    fn fire_rank_is_fixed() {
        assert_eq!(fire_rank("po3"), Some(0));
        assert_eq!(fire_rank("goldtime"), Some(8));
        assert_eq!(fire_rank("macd"), None);
    }
}
