use std::sync::Arc;

use tokio::sync::{mpsc, RwLock};
use tokio::task::JoinHandle;
use tracing::{info, warn};

use common::{EngineCommand, EngineState, FeedKind, Instrument, Tick};

use crate::feed::{BinanceFeed, FinnhubFeed};

/// Cloneable handle passed to other crates (Telegram).
#[derive(Clone)]
pub struct EngineHandle {
    command_tx: mpsc::Sender<EngineCommand>,
    state: Arc<RwLock<EngineState>>,
}

impl EngineHandle {
    pub async fn send(&self, cmd: EngineCommand) {
        if self.command_tx.send(cmd).await.is_err() {
            warn!("Engine command channel closed");
        }
    }

    pub async fn state(&self) -> EngineState {
        *self.state.read().await
    }
}

/// Owns the feed tasks. `Start` spawns one task per configured feed, `Stop`
/// aborts them; dispatcher state lives elsewhere and is never touched.
pub struct Engine {
    binance_symbols: Vec<String>,
    finnhub_symbols: Vec<String>,
    finnhub_api_key: Option<String>,
    tick_tx: mpsc::Sender<Tick>,
    state: Arc<RwLock<EngineState>>,
    command_rx: mpsc::Receiver<EngineCommand>,
}

impl Engine {
    pub fn new(
        instruments: &[Instrument],
        finnhub_api_key: Option<String>,
        tick_tx: mpsc::Sender<Tick>,
    ) -> (Self, EngineHandle) {
        let (command_tx, command_rx) = mpsc::channel(32);
        let state = Arc::new(RwLock::new(EngineState::Stopped));

        let symbols = |kind: FeedKind| -> Vec<String> {
            instruments
                .iter()
                .filter(|i| i.feed == kind)
                .map(|i| i.feed_symbol.clone())
                .collect()
        };

        let handle = EngineHandle {
            command_tx,
            state: state.clone(),
        };
        let engine = Engine {
            binance_symbols: symbols(FeedKind::Binance),
            finnhub_symbols: symbols(FeedKind::Finnhub),
            finnhub_api_key,
            tick_tx,
            state,
            command_rx,
        };
        (engine, handle)
    }

    fn spawn_feeds(&self) -> Vec<JoinHandle<()>> {
        let mut handles = Vec::new();
        if !self.binance_symbols.is_empty() {
            let feed = BinanceFeed::new(self.binance_symbols.clone(), self.tick_tx.clone());
            handles.push(tokio::spawn(feed.run()));
        }
        match (&self.finnhub_api_key, self.finnhub_symbols.is_empty()) {
            (_, true) => {}
            (Some(key), false) => {
                let feed = FinnhubFeed::new(key.clone(), self.finnhub_symbols.clone(), self.tick_tx.clone());
                handles.push(tokio::spawn(feed.run()));
            }
            (None, false) => {
                warn!(symbols = ?self.finnhub_symbols, "FINNHUB_API_KEY not set, Finnhub instruments get no ticks");
            }
        }
        handles
    }

    /// Run the command loop. Call from `tokio::spawn`.
    pub async fn run(mut self) {
        info!("Engine initialized in Stopped state. Waiting for Start command.");
        let mut feeds: Vec<JoinHandle<()>> = Vec::new();

        loop {
            match self.command_rx.recv().await {
                Some(EngineCommand::Start) => {
                    if *self.state.read().await == EngineState::Running {
                        info!("Engine already running");
                        continue;
                    }
                    info!(
                        binance = ?self.binance_symbols,
                        finnhub = ?self.finnhub_symbols,
                        "Starting feeds"
                    );
                    feeds = self.spawn_feeds();
                    *self.state.write().await = EngineState::Running;
                }
                Some(EngineCommand::Stop) => {
                    info!("Engine stopping, aborting feed tasks");
                    *self.state.write().await = EngineState::Stopped;
                    for h in feeds.drain(..) {
                        h.abort();
                    }
                }
                None => {
                    warn!("Engine command channel closed, shutting down");
                    for h in feeds.drain(..) {
                        h.abort();
                    }
                    break;
                }
            }
        }
    }
}
