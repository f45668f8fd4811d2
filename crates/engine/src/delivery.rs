use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::{error, info, warn};

use common::{Alert, Delivery, Notifier, Result, SnapshotStore, TradeReporter};

/// Drains the outbox and calls the collaborators, retrying each call with a
/// doubling delay. Calls that still fail are logged under the `dead_letter`
/// target with their payload and dropped.
pub struct DeliveryWorker {
    rx: mpsc::Receiver<Delivery>,
    reporters: Vec<Arc<dyn TradeReporter>>,
    notifier: Option<Arc<dyn Notifier>>,
    snapshots: Arc<dyn SnapshotStore>,
    max_attempts: u32,
    base_delay: Duration,
}

impl DeliveryWorker {
    pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

    pub fn new(
        rx: mpsc::Receiver<Delivery>,
        reporters: Vec<Arc<dyn TradeReporter>>,
        notifier: Option<Arc<dyn Notifier>>,
        snapshots: Arc<dyn SnapshotStore>,
    ) -> Self {
        Self {
            rx,
            reporters,
            notifier,
            snapshots,
            max_attempts: Self::DEFAULT_MAX_ATTEMPTS,
            base_delay: Duration::from_millis(500),
        }
    }

    pub fn with_retry(mut self, max_attempts: u32, base_delay: Duration) -> Self {
        self.max_attempts = max_attempts.max(1);
        self.base_delay = base_delay;
        self
    }

    /// Run until every outbox sender is dropped. Call from `tokio::spawn`.
    pub async fn run(mut self) {
        info!(
            reporters = ?self.reporters.iter().map(|r| r.name()).collect::<Vec<_>>(),
            notifier = self.notifier.is_some(),
            "DeliveryWorker running"
        );
        while let Some(item) = self.rx.recv().await {
            self.deliver(&item).await;
        }
        warn!("Outbox closed, DeliveryWorker stopping");
    }

    async fn deliver(&self, item: &Delivery) {
        match item {
            Delivery::TradeOpened(trade) => {
                for r in &self.reporters {
                    self.attempt(r.name(), item, || r.open_trade(trade)).await;
                }
                if let Some(n) = &self.notifier {
                    let alert = Alert::StrategyEntry(trade.clone());
                    self.attempt("notifier", item, || n.notify(&alert)).await;
                }
            }
            Delivery::TradeClosed(closed) => {
                for r in &self.reporters {
                    self.attempt(r.name(), item, || r.close_trade(closed)).await;
                }
                if let Some(n) = &self.notifier {
                    let alert = Alert::Result(closed.clone());
                    self.attempt("notifier", item, || n.notify(&alert)).await;
                }
            }
            Delivery::SaveSnapshot(snap) => {
                self.attempt("snapshot_store", item, || self.snapshots.save(snap)).await;
            }
        }
    }

    /// Retry `call` with doubling delay; the last failure goes to `dead_letter`.
    async fn attempt<F, Fut>(&self, collaborator: &str, item: &Delivery, mut call: F)
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<()>>,
    {
        let mut delay = self.base_delay;
        for attempt in 1..=self.max_attempts {
            match call().await {
                Ok(()) => return,
                Err(e) if attempt < self.max_attempts => {
                    warn!(
                        collaborator,
                        kind = item.label(),
                        attempt,
                        error = %e,
                        "Delivery failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    delay *= 2;
                }
                Err(e) => {
                    let payload = serde_json::to_string(item).unwrap_or_default();
                    error!(
                        target: "dead_letter",
                        collaborator,
                        kind = item.label(),
                        attempts = attempt,
                        error = %e,
                        payload = %payload,
                        "Delivery abandoned"
                    );
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    use async_trait::async_trait;
    use chrono::NaiveDate;
    use tokio::sync::Mutex;

    use common::{
        ClosedTrade, Direction, Error, Outbox, Outcome, SessionContext, SessionSnapshot, Trade,
    };

    #[derive(Default)]
    struct Recorder {
        fail_first: u32,
        calls: AtomicU32,
        opened: Mutex<Vec<String>>,
        closed: Mutex<Vec<String>>,
        alerts: Mutex<Vec<String>>,
        snapshots: Mutex<Vec<SessionSnapshot>>,
    }

    impl Recorder {
        fn failing(n: u32) -> Self {
            Self { fail_first: n, ..Self::default() }
        }

        fn gate(&self) -> Result<()> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if n < self.fail_first {
                Err(Error::Http("503".into()))
            } else {
                Ok(())
            }
        }
    }

    #[async_trait]
    impl TradeReporter for Recorder {
        fn name(&self) -> &str {
            "recorder"
        }

        async fn open_trade(&self, trade: &Trade) -> Result<()> {
            self.gate()?;
            self.opened.lock().await.push(trade.id.clone());
            Ok(())
        }

        async fn close_trade(&self, closed: &ClosedTrade) -> Result<()> {
            self.gate()?;
            self.closed.lock().await.push(closed.trade.id.clone());
            Ok(())
        }
    }

    #[async_trait]
    impl Notifier for Recorder {
        async fn notify(&self, alert: &Alert) -> Result<()> {
            self.alerts.lock().await.push(alert.kind().to_string());
            Ok(())
        }
    }

    #[async_trait]
    impl SnapshotStore for Recorder {
        async fn load(&self, _: &str, _: NaiveDate) -> Result<Option<SessionSnapshot>> {
            Ok(None)
        }

        async fn save(&self, snapshot: &SessionSnapshot) -> Result<()> {
            self.snapshots.lock().await.push(snapshot.clone());
            Ok(())
        }
    }

    fn trade() -> Trade {
        Trade {
            id: Trade::trade_id("EURUSD", "ORB", 1),
            instrument_id: "EURUSD".into(),
            strategy: "ORB".into(),
            direction: Direction::Buy,
            entry_price: 1.1010,
            entry_time_ms: 1,
            stop_price: 1.0985,
            target_price: 1.1030,
            pip_size: 0.0001,
            decimals: 5,
            variant_label: "TP20/SL25".into(),
            sessions: SessionContext::default(),
        }
    }

    fn worker(
        rx: mpsc::Receiver<Delivery>,
        reporter: Arc<Recorder>,
        sink: Arc<Recorder>,
    ) -> DeliveryWorker {
        let reporters: Vec<Arc<dyn TradeReporter>> = vec![reporter];
        let notifier: Arc<dyn Notifier> = sink.clone();
        DeliveryWorker::new(rx, reporters, Some(notifier), sink)
            .with_retry(3, Duration::from_millis(100))
    }

    #[tokio::test(start_paused = true)]
    async fn delivers_open_close_and_snapshot() {
        let (outbox, rx) = Outbox::channel(8);
        let reporter = Arc::new(Recorder::default());
        let sink = Arc::new(Recorder::default());

        outbox.publish(Delivery::TradeOpened(trade()));
        outbox.publish(Delivery::TradeClosed(trade().close(1.1030, 2, Outcome::Win)));
        let ctx = SessionContext {
            day_key: NaiveDate::from_ymd_opt(2024, 3, 4),
            ..SessionContext::default()
        };
        let snap = SessionSnapshot::capture("EURUSD", &ctx, 3).unwrap();
        outbox.publish(Delivery::SaveSnapshot(snap.clone()));
        drop(outbox);

        worker(rx, reporter.clone(), sink.clone()).run().await;

        assert_eq!(*reporter.opened.lock().await, vec!["EURUSD-ORB-1"]);
        assert_eq!(*reporter.closed.lock().await, vec!["EURUSD-ORB-1"]);
        assert_eq!(*sink.alerts.lock().await, vec!["strategy_entry", "result"]);
        assert_eq!(*sink.snapshots.lock().await, vec![snap]);
    }

    #[tokio::test(start_paused = true)]
    async fn retries_until_success() {
        let (outbox, rx) = Outbox::channel(8);
        let reporter = Arc::new(Recorder::failing(2));
        let sink = Arc::new(Recorder::default());
        outbox.publish(Delivery::TradeOpened(trade()));
        drop(outbox);

        worker(rx, reporter.clone(), sink.clone()).run().await;

        assert_eq!(reporter.calls.load(Ordering::SeqCst), 3);
        assert_eq!(reporter.opened.lock().await.len(), 1);
        // the notifier still runs after the reporter
        assert_eq!(sink.alerts.lock().await.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn retry_delay_doubles() {
        let (outbox, rx) = Outbox::channel(8);
        let reporter = Arc::new(Recorder::failing(2));
        let sink = Arc::new(Recorder::default());
        outbox.publish(Delivery::TradeOpened(trade()));
        drop(outbox);

        let started = tokio::time::Instant::now();
        worker(rx, reporter.clone(), sink).run().await;

        // 100ms then 200ms
        let waited = started.elapsed();
        assert!(waited >= Duration::from_millis(300), "{waited:?}");
        assert!(waited < Duration::from_millis(700), "{waited:?}");
        assert_eq!(reporter.opened.lock().await.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn gives_up_after_max_attempts() {
        let (outbox, rx) = Outbox::channel(8);
        let reporter = Arc::new(Recorder::failing(10));
        let sink = Arc::new(Recorder::default());
        outbox.publish(Delivery::TradeOpened(trade()));
        outbox.publish(Delivery::TradeOpened(trade()));
        drop(outbox);

        worker(rx, reporter.clone(), sink.clone()).run().await;

        assert_eq!(reporter.calls.load(Ordering::SeqCst), 6);
        assert!(reporter.opened.lock().await.is_empty());
        assert_eq!(sink.alerts.lock().await.len(), 2);
    }
}
