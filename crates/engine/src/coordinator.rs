use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::NaiveDate;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, RwLock};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use common::{
    Delivery, Instrument, InstrumentStatus, Outbox, Result, SessionWindows, SnapshotStore, Tick,
};
use monitor::TradeMonitor;
use strategy::{DispatchEvent, Dispatcher, StrategyFileConfig};

/// Shared, read-mostly view of every instrument's latest status.
pub type StatusBoard = Arc<RwLock<HashMap<String, InstrumentStatus>>>;

const STATUS_INTERVAL: Duration = Duration::from_secs(60);
const BOARD_REFRESH: Duration = Duration::from_secs(5);
const INSTRUMENT_QUEUE: usize = 4096;

/// Instrument-keyed registry of dispatchers, built once at startup.
///
/// After [`Coordinator::spawn`] each dispatcher lives in its own task and
/// receives ticks in order over a channel; the router only holds senders.
pub struct Coordinator {
    dispatchers: Vec<Dispatcher>,
    monitor: TradeMonitor,
    outbox: Outbox,
    status: StatusBoard,
}

impl Coordinator {
    /// Build one dispatcher per instrument. Any configuration error aborts.
    pub fn new(
        instruments: &[Instrument],
        windows: SessionWindows,
        strategies: &StrategyFileConfig,
        monitor: TradeMonitor,
        outbox: Outbox,
    ) -> Result<Self> {
        let dispatchers = instruments
            .iter()
            .map(|i| Dispatcher::new(i.clone(), windows, strategies))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self {
            dispatchers,
            monitor,
            outbox,
            status: StatusBoard::default(),
        })
    }

    pub fn status_board(&self) -> StatusBoard {
        self.status.clone()
    }

    /// Restore today's locked Asia range for every instrument that has one.
    /// Store failures are logged; the instrument simply starts unseeded.
    pub async fn seed_snapshots(&mut self, store: &dyn SnapshotStore, day_key: NaiveDate) {
        for d in &mut self.dispatchers {
            let id = d.instrument().id.clone();
            match store.load(&id, day_key).await {
                Ok(Some(snap)) if snap.has_locked_asia() => d.seed_from_snapshot(&snap),
                Ok(Some(_)) => debug!(instrument = %id, "Snapshot has no locked Asia range, ignoring"),
                Ok(None) => debug!(instrument = %id, day = %day_key, "No session snapshot"),
                Err(e) => warn!(instrument = %id, error = %e, "Failed to load session snapshot"),
            }
        }
    }

    /// Spawn one task per instrument plus the tick router.
    pub fn spawn(self, tick_rx: mpsc::Receiver<Tick>) -> Vec<JoinHandle<()>> {
        let mut routes = HashMap::new();
        let mut handles = Vec::new();

        for dispatcher in self.dispatchers {
            let symbol = dispatcher.instrument().feed_symbol.to_lowercase();
            let (tx, rx) = mpsc::channel(INSTRUMENT_QUEUE);
            routes.insert(symbol, tx);
            let task = InstrumentTask {
                dispatcher,
                monitor: self.monitor.clone(),
                outbox: self.outbox.clone(),
                status: self.status.clone(),
            };
            handles.push(tokio::spawn(task.run(rx)));
        }

        handles.push(tokio::spawn(route_ticks(tick_rx, routes)));
        handles
    }
}

/// Fan feed ticks out by feed symbol. Unknown symbols are dropped, as are
/// ticks for an instrument whose queue is full.
async fn route_ticks(mut tick_rx: mpsc::Receiver<Tick>, routes: HashMap<String, mpsc::Sender<Tick>>) {
    info!(instruments = routes.len(), "Tick router running");
    while let Some(tick) = tick_rx.recv().await {
        let Some(tx) = routes.get(&tick.symbol.to_lowercase()) else {
            debug!(symbol = %tick.symbol, "Tick for unknown symbol");
            continue;
        };
        match tx.try_send(tick) {
            Ok(()) => {}
            Err(TrySendError::Full(t)) => {
                warn!(symbol = %t.symbol, "Instrument queue full, dropping tick");
            }
            Err(TrySendError::Closed(t)) => {
                warn!(symbol = %t.symbol, "Instrument task gone, dropping tick");
            }
        }
    }
    warn!("Tick channel closed, router stopping");
}

struct InstrumentTask {
    dispatcher: Dispatcher,
    monitor: TradeMonitor,
    outbox: Outbox,
    status: StatusBoard,
}

impl InstrumentTask {
    async fn run(mut self, mut rx: mpsc::Receiver<Tick>) {
        let id = self.dispatcher.instrument().id.clone();
        info!(
            instrument = %id,
            strategies = ?self.dispatcher.strategy_names(),
            "Instrument task running"
        );
        self.publish_status(None).await;

        let mut status_timer = tokio::time::interval(STATUS_INTERVAL);
        status_timer.tick().await;
        let mut last_tick_ms = None;
        let mut last_publish = Instant::now();

        loop {
            tokio::select! {
                msg = rx.recv() => {
                    let Some(tick) = msg else { break };
                    last_tick_ms = Some(tick.timestamp_ms);
                    self.on_tick(&tick).await;
                    if last_publish.elapsed() >= BOARD_REFRESH {
                        self.publish_status(last_tick_ms).await;
                        last_publish = Instant::now();
                    }
                }
                _ = status_timer.tick() => {
                    self.log_status();
                    self.publish_status(last_tick_ms).await;
                }
            }
        }
        warn!(instrument = %id, "Instrument task stopping");
    }

    /// Existing trades are checked before this tick can open new ones.
    async fn on_tick(&mut self, tick: &Tick) {
        let id = &self.dispatcher.instrument().id;
        self.monitor.on_tick(id, tick.price, tick.timestamp_ms).await;

        for event in self.dispatcher.process_tick(tick.price, tick.timestamp_ms) {
            match event {
                DispatchEvent::TradeOpened(trade) => {
                    self.monitor.add_trade(trade.clone()).await;
                    self.outbox.publish(Delivery::TradeOpened(trade));
                }
                DispatchEvent::SnapshotReady(snap) => {
                    self.outbox.publish(Delivery::SaveSnapshot(snap));
                }
            }
        }
    }

    fn log_status(&self) {
        let inst = self.dispatcher.instrument();
        let s = self.dispatcher.sessions();
        let fmt = |p: Option<f64>| p.map_or_else(|| "-".to_string(), |v| inst.format_price(v));
        info!(
            instrument = %inst.id,
            last = %fmt(self.dispatcher.last_price()),
            daily_open = %fmt(s.daily_open),
            asia_high = %fmt(s.asia_high),
            asia_low = %fmt(s.asia_low),
            asia_locked = s.asia_locked,
            "Status"
        );
    }

    async fn publish_status(&mut self, last_tick_ms: Option<i64>) {
        let status = InstrumentStatus {
            instrument_id: self.dispatcher.instrument().id.clone(),
            last_price: self.dispatcher.last_price(),
            last_tick_ms,
            sessions: self.dispatcher.sessions(),
            strategies: self
                .dispatcher
                .strategy_names()
                .into_iter()
                .map(str::to_string)
                .collect(),
        };
        self.status
            .write()
            .await
            .insert(status.instrument_id.clone(), status);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use common::{FeedKind, SessionSnapshot};
    use strategy::StrategyConfig;

    fn instrument(id: &str, symbol: &str) -> Instrument {
        Instrument {
            id: id.into(),
            feed: FeedKind::Binance,
            feed_symbol: symbol.into(),
            pip_size: 0.0001,
            decimals: 5,
            tp_pips: 20.0,
            sl_pips: 25.0,
        }
    }

    fn orb_only() -> StrategyFileConfig {
        StrategyFileConfig { strategies: vec![StrategyConfig::new("orb")] }
    }

    /// 2024-03-04 New York wall time in epoch ms (EST, UTC-5).
    fn ny(h: i64, m: i64) -> i64 {
        1_709_528_400_000 + (h * 60 + m) * 60_000
    }

    #[tokio::test]
    async fn routes_ticks_and_opens_trades() {
        let (outbox, mut deliveries) = Outbox::channel(64);
        let monitor = TradeMonitor::new(outbox.clone());
        let coordinator = Coordinator::new(
            &[instrument("EURUSD", "eurusd"), instrument("GBPUSD", "gbpusd")],
            SessionWindows::default(),
            &orb_only(),
            monitor.clone(),
            outbox,
        )
        .unwrap();
        let status = coordinator.status_board();

        let (tick_tx, tick_rx) = mpsc::channel(1024);
        coordinator.spawn(tick_rx);

        let send = |symbol: &str, price: f64, ts: i64| Tick { symbol: symbol.into(), price, timestamp_ms: ts };
        for m in 0..30 {
            tick_tx.send(send("EURUSD", 1.1000, ny(9, 30 + m))).await.unwrap();
            tick_tx.send(send("EURUSD", 1.1010, ny(9, 30 + m) + 30_000)).await.unwrap();
        }
        tick_tx.send(send("EURUSD", 1.1025, ny(10, 0))).await.unwrap();
        tick_tx.send(send("EURUSD", 1.1026, ny(10, 1))).await.unwrap();
        tick_tx.send(send("XAUUSD", 2000.0, ny(10, 1))).await.unwrap();

        let opened = tokio::time::timeout(Duration::from_secs(5), deliveries.recv())
            .await
            .unwrap()
            .unwrap();
        match opened {
            Delivery::TradeOpened(t) => {
                assert_eq!(t.instrument_id, "EURUSD");
                assert_eq!(t.strategy, "ORB");
            }
            other => panic!("unexpected delivery: {other:?}"),
        }
        assert_eq!(monitor.open_count().await, 1);

        // target at 1.1030 closes it
        tick_tx.send(send("EURUSD", 1.1031, ny(10, 2))).await.unwrap();
        let closed = tokio::time::timeout(Duration::from_secs(5), deliveries.recv())
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(closed, Delivery::TradeClosed(c) if c.outcome == common::Outcome::Win));

        let board = status.read().await;
        assert!(board.contains_key("EURUSD"));
        assert!(board.contains_key("GBPUSD"));
    }

    struct OneSnapshot(SessionSnapshot);

    #[async_trait]
    impl SnapshotStore for OneSnapshot {
        async fn load(&self, id: &str, day: NaiveDate) -> Result<Option<SessionSnapshot>> {
            Ok((id == self.0.instrument_id && day == self.0.day_key).then(|| self.0.clone()))
        }

        async fn save(&self, _: &SessionSnapshot) -> Result<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn seeds_only_matching_instruments() {
        let (outbox, _rx) = Outbox::channel(8);
        let mut coordinator = Coordinator::new(
            &[instrument("EURUSD", "eurusd"), instrument("GBPUSD", "gbpusd")],
            SessionWindows::default(),
            &StrategyFileConfig { strategies: Vec::new() },
            TradeMonitor::default(),
            outbox,
        )
        .unwrap();
        let day = NaiveDate::from_ymd_opt(2024, 3, 4).unwrap();
        let store = OneSnapshot(SessionSnapshot {
            instrument_id: "EURUSD".into(),
            day_key: day,
            daily_open: Some(1.1010),
            asia_high: Some(1.1050),
            asia_low: Some(1.1000),
            asia_locked: true,
            prev_day_high: None,
            prev_day_low: None,
            today_high: None,
            today_low: None,
            saved_at_ms: 0,
        });

        coordinator.seed_snapshots(&store, day).await;

        let eur = coordinator.dispatchers[0].sessions();
        assert!(eur.asia_locked);
        assert_eq!(eur.asia_high, Some(1.1050));
        assert!(!coordinator.dispatchers[1].sessions().asia_locked);
    }

    #[tokio::test]
    async fn full_instrument_queue_does_not_stall_others() {
        let (slow_tx, mut slow_rx) = mpsc::channel(1);
        let (fast_tx, mut fast_rx) = mpsc::channel(8);
        let routes = HashMap::from([("eurusd".to_string(), slow_tx), ("gbpusd".to_string(), fast_tx)]);
        let (tick_tx, tick_rx) = mpsc::channel(16);
        tokio::spawn(route_ticks(tick_rx, routes));

        let tick = |symbol: &str, ts: i64| Tick { symbol: symbol.into(), price: 1.1, timestamp_ms: ts };
        for ts in 0..3 {
            tick_tx.send(tick("EURUSD", ts)).await.unwrap();
        }
        tick_tx.send(tick("GBPUSD", 10)).await.unwrap();

        let got = tokio::time::timeout(Duration::from_secs(5), fast_rx.recv())
            .await
            .expect("router stalled on the full queue")
            .unwrap();
        assert_eq!(got.timestamp_ms, 10);

        // only the first tick fit; the overflow was dropped
        assert_eq!(slow_rx.recv().await.unwrap().timestamp_ms, 0);
        assert!(slow_rx.try_recv().is_err());
    }

    #[test]
    fn unknown_strategy_aborts_construction() {
        let (outbox, _rx) = Outbox::channel(8);
        let cfg = StrategyFileConfig { strategies: vec![StrategyConfig::new("macd")] };
        let res = Coordinator::new(
            &[instrument("EURUSD", "eurusd")],
            SessionWindows::default(),
            &cfg,
            TradeMonitor::default(),
            outbox,
        );
        assert!(res.is_err());
    }
}
