use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::{info, warn};
use url::Url;

use common::{Error, Result, Tick};

use super::Backoff;

const FINNHUB_WS: &str = "wss://ws.finnhub.io";

/// Finnhub trade stream. Subscribes each symbol after connecting.
pub struct FinnhubFeed {
    api_key: String,
    symbols: Vec<String>,
    tick_tx: mpsc::Sender<Tick>,
}

impl FinnhubFeed {
    pub fn new(api_key: impl Into<String>, symbols: Vec<String>, tick_tx: mpsc::Sender<Tick>) -> Self {
        Self {
            api_key: api_key.into(),
            symbols,
            tick_tx,
        }
    }

    /// Run forever, reconnecting with backoff. Call inside `tokio::spawn`.
    pub async fn run(self) {
        if self.symbols.is_empty() {
            return;
        }
        let mut backoff = Backoff::default();
        loop {
            info!(symbols = ?self.symbols, "Connecting to Finnhub trade stream");
            match self.connect_once(&mut backoff).await {
                Ok(()) => info!("Finnhub stream closed"),
                Err(e) => warn!(error = %e, "Finnhub stream error"),
            }
            if self.tick_tx.is_closed() {
                warn!("Tick channel closed, stopping Finnhub feed");
                return;
            }
            let delay = backoff.next_delay();
            info!(backoff = ?delay, "Reconnecting to Finnhub");
            tokio::time::sleep(delay).await;
        }
    }

    async fn connect_once(&self, backoff: &mut Backoff) -> Result<()> {
        let url = Url::parse_with_params(FINNHUB_WS, &[("token", &self.api_key)])
            .map_err(|e| Error::WebSocket(e.to_string()))?;
        let (ws, _) = connect_async(url)
            .await
            .map_err(|e| Error::WebSocket(e.to_string()))?;
        info!("Finnhub stream connected");
        backoff.reset();

        let (mut write, mut read) = ws.split();
        for symbol in &self.symbols {
            let sub = serde_json::json!({ "type": "subscribe", "symbol": symbol });
            write
                .send(Message::Text(sub.to_string()))
                .await
                .map_err(|e| Error::WebSocket(e.to_string()))?;
        }

        while let Some(msg) = read.next().await {
            let msg = msg.map_err(|e| Error::WebSocket(e.to_string()))?;
            match msg {
                Message::Text(text) => match parse_trades(&text, now_ms()) {
                    Ok(ticks) => {
                        for tick in ticks {
                            if self.tick_tx.send(tick).await.is_err() {
                                return Ok(());
                            }
                        }
                    }
                    Err(e) => warn!(error = %e, "Failed to parse Finnhub message"),
                },
                Message::Ping(payload) => {
                    let _ = write.send(Message::Pong(payload)).await;
                }
                _ => {}
            }
        }
        Ok(())
    }
}

fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

// ─── trade JSON parsing ───────────────────────────────────────────────────────

#[derive(Deserialize)]
struct TradeMessage {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    data: Vec<TradePrint>,
}

#[derive(Deserialize)]
struct TradePrint {
    #[serde(rename = "s")]
    symbol: String,
    #[serde(rename = "p")]
    price: f64,
    #[serde(rename = "t")]
    time_ms: Option<i64>,
}

/// Ticks in a `trade` message; pings and other types yield none. Prints
/// without a timestamp are stamped `fallback_ms`.
fn parse_trades(text: &str, fallback_ms: i64) -> Result<Vec<Tick>> {
    let msg: TradeMessage = serde_json::from_str(text)?;
    if msg.kind != "trade" {
        return Ok(Vec::new());
    }
    Ok(msg
        .data
        .into_iter()
        .map(|p| Tick {
            symbol: p.symbol,
            price: p.price,
            timestamp_ms: p.time_ms.unwrap_or(fallback_ms),
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_trade_batch() {
        let raw = r#"{"type":"trade","data":[
            {"s":"OANDA:EUR_USD","p":1.08412,"t":1709528400000,"v":0},
            {"s":"OANDA:GBP_USD","p":1.26701}
        ]}"#;
        let ticks = parse_trades(raw, 42).unwrap();
        assert_eq!(ticks.len(), 2);
        assert_eq!(ticks[0].symbol, "OANDA:EUR_USD");
        assert_eq!(ticks[0].timestamp_ms, 1709528400000);
        assert_eq!(ticks[1].timestamp_ms, 42);
    }

    #[test]
    fn ping_yields_nothing() {
        assert!(parse_trades(r#"{"type":"ping"}"#, 0).unwrap().is_empty());
    }
}
