use chrono::NaiveDate;
use tracing::{debug, info};

use common::{Direction, Instrument, Result, SessionContext, SessionSnapshot, SessionWindows, Trade};

use crate::aggregator::CandleAggregator;
use crate::config::{StopMode, StrategyFileConfig};
use crate::detectors::{build_detector, fire_rank};
use crate::{CandleContext, Detector, FiredEntry, TickContext};

/// Something the dispatcher wants the outside world to act on.
#[derive(Debug, Clone, PartialEq)]
pub enum DispatchEvent {
    TradeOpened(Trade),
    /// The Asia range just locked for the first time today.
    SnapshotReady(SessionSnapshot),
}

struct Slot {
    detector: Box<dyn Detector>,
    stops: StopMode,
}

/// Per-instrument fan-out: one aggregator, one of each enabled detector.
///
/// Callers feed ticks strictly in order; different instruments get
/// different dispatchers.
pub struct Dispatcher {
    instrument: Instrument,
    aggregator: CandleAggregator,
    slots: Vec<Slot>,
    snapshot_day: Option<NaiveDate>,
    last_price: Option<f64>,
}

impl Dispatcher {
    /// Build every detector enabled for `instrument`, in fire order.
    pub fn new(instrument: Instrument, windows: SessionWindows, cfg: &StrategyFileConfig) -> Result<Self> {
        let mut ranked = Vec::new();
        for sc in cfg.strategies.iter().filter(|s| s.applies_to(&instrument.id)) {
            let detector = build_detector(sc, &instrument, windows)?;
            let rank = fire_rank(&sc.strategy_type).unwrap_or(usize::MAX);
            info!(
                instrument = %instrument.id,
                strategy = detector.name(),
                stops = ?sc.stops,
                "Registered strategy"
            );
            ranked.push((rank, Slot { detector, stops: sc.stops }));
        }
        ranked.sort_by_key(|(rank, _)| *rank);

        Ok(Self {
            instrument,
            aggregator: CandleAggregator::new(windows),
            slots: ranked.into_iter().map(|(_, slot)| slot).collect(),
            snapshot_day: None,
            last_price: None,
        })
    }

    pub fn instrument(&self) -> &Instrument {
        &self.instrument
    }

    /// Names of the registered detectors, in fire order.
    pub fn strategy_names(&self) -> Vec<&'static str> {
        self.slots.iter().map(|s| s.detector.name()).collect()
    }

    pub fn sessions(&self) -> SessionContext {
        self.aggregator.sessions()
    }

    pub fn last_price(&self) -> Option<f64> {
        self.last_price
    }

    /// Restore today's session levels after a restart. A restored lock counts
    /// as already saved.
    pub fn seed_from_snapshot(&mut self, snap: &SessionSnapshot) {
        self.aggregator.seed_from_snapshot(snap);
        if snap.asia_locked {
            self.snapshot_day = Some(snap.day_key);
        }
        info!(
            instrument = %self.instrument.id,
            day = %snap.day_key,
            asia_high = ?snap.asia_high,
            asia_low = ?snap.asia_low,
            locked = snap.asia_locked,
            "Session snapshot loaded"
        );
    }

    /// Process one tick: candle close (day roll, arm, snapshot) first, then fire.
    pub fn process_tick(&mut self, price: f64, ts_ms: i64) -> Vec<DispatchEvent> {
        let mut events = Vec::new();
        self.last_price = Some(price);

        let day_before = self.aggregator.sessions().day_key;
        if let Some(bars) = self.aggregator.ingest(price, ts_ms) {
            let sessions = self.aggregator.sessions();
            if day_before.is_some() && sessions.day_key != day_before {
                self.roll_day(&sessions);
            }

            let m1 = self.aggregator.m1();
            let m5 = self.aggregator.m5();
            let ctx = CandleContext {
                closed: &bars.m1,
                m1,
                m5,
                m5_closed: bars.m5.as_ref(),
                sessions: &sessions,
            };
            for slot in &mut self.slots {
                if let Some(setup) = slot.detector.arm(&ctx) {
                    debug!(
                        instrument = %self.instrument.id,
                        strategy = slot.detector.name(),
                        direction = %setup.direction,
                        zone_low = setup.zone_low,
                        zone_high = setup.zone_high,
                        "Setup armed"
                    );
                }
            }

            if sessions.asia_locked && self.snapshot_day != sessions.day_key {
                self.snapshot_day = sessions.day_key;
                if let Some(snap) = SessionSnapshot::capture(&self.instrument.id, &sessions, ts_ms) {
                    info!(
                        instrument = %self.instrument.id,
                        asia_high = ?snap.asia_high,
                        asia_low = ?snap.asia_low,
                        "Asia range locked"
                    );
                    events.push(DispatchEvent::SnapshotReady(snap));
                }
            }
        }

        let sessions = self.aggregator.sessions();
        let tick = TickContext { price, ts_ms, sessions: &sessions };
        let mut fired = Vec::new();
        for slot in &mut self.slots {
            if let Some(entry) = slot.detector.fire(&tick) {
                fired.push((slot.detector.name(), slot.stops, entry));
            }
        }
        for (name, stops, entry) in fired {
            let level = entry.level.unwrap_or("-");
            let trade = self.build_trade(name, stops, entry, ts_ms, &sessions);
            info!(
                instrument = %trade.instrument_id,
                strategy = name,
                level,
                direction = %trade.direction,
                entry = %self.instrument.format_price(trade.entry_price),
                stop = %self.instrument.format_price(trade.stop_price),
                target = %self.instrument.format_price(trade.target_price),
                "Entry fired"
            );
            events.push(DispatchEvent::TradeOpened(trade));
        }
        events
    }

    fn roll_day(&mut self, sessions: &SessionContext) {
        info!(
            instrument = %self.instrument.id,
            day = ?sessions.day_key,
            prev_high = ?sessions.prev_day_high,
            prev_low = ?sessions.prev_day_low,
            "Day rollover"
        );
        for slot in &mut self.slots {
            slot.detector.reset_day();
        }
    }

    fn build_trade(
        &self,
        strategy: &str,
        stops: StopMode,
        entry: FiredEntry,
        ts_ms: i64,
        sessions: &SessionContext,
    ) -> Trade {
        let inst = &self.instrument;
        let native = match stops {
            StopMode::Native => native_stops(&entry),
            StopMode::Fixed => None,
        };
        let (stop_price, target_price, variant_label) = match native {
            Some((stop, target)) => (stop, target, "Native".to_string()),
            None => {
                let (stop, target) = inst.fixed_stops(entry.entry, entry.direction);
                (stop, target, inst.fixed_variant_label())
            }
        };

        Trade {
            id: Trade::trade_id(&inst.id, strategy, ts_ms),
            instrument_id: inst.id.clone(),
            strategy: strategy.to_string(),
            direction: entry.direction,
            entry_price: entry.entry,
            entry_time_ms: ts_ms,
            stop_price,
            target_price,
            pip_size: inst.pip_size,
            decimals: inst.decimals,
            variant_label,
            sessions: sessions.clone(),
        }
    }
}

/// The detector's own stop and first target, if both sit on the right side.
fn native_stops(entry: &FiredEntry) -> Option<(f64, f64)> {
    let stop = entry.stop?;
    let target = *entry.targets.first()?;
    let valid = match entry.direction {
        Direction::Buy => stop < entry.entry && target > entry.entry,
        Direction::Sell => stop > entry.entry && target < entry.entry,
    };
    valid.then_some((stop, target))
}
