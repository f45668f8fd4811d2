use futures_util::StreamExt;
use serde::Deserialize;
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::{info, warn};
use url::Url;

use common::{Error, Result, Tick};

use super::Backoff;

const DEFAULT_BASES: [&str; 4] = [
    "wss://stream.binance.com:9443",
    "wss://stream.binance.com",
    "wss://stream.binance.us:9443",
    "wss://stream.binance.us",
];

/// Binance combined `aggTrade` stream for a set of symbols.
///
/// On every disconnect the next base URL in the list is tried after the
/// backoff delay.
pub struct BinanceFeed {
    symbols: Vec<String>,
    bases: Vec<String>,
    tick_tx: mpsc::Sender<Tick>,
}

impl BinanceFeed {
    pub fn new(symbols: Vec<String>, tick_tx: mpsc::Sender<Tick>) -> Self {
        Self {
            symbols: symbols.into_iter().map(|s| s.to_lowercase()).collect(),
            bases: DEFAULT_BASES.iter().map(|b| b.to_string()).collect(),
            tick_tx,
        }
    }

    /// Run forever, rotating endpoints on failure. Call inside `tokio::spawn`.
    pub async fn run(self) {
        if self.symbols.is_empty() {
            return;
        }
        let mut backoff = Backoff::default();
        let mut base_idx = 0;

        loop {
            let url = stream_url(&self.bases[base_idx], &self.symbols);
            info!(url = %url, "Connecting to Binance aggTrade stream");
            match self.connect_once(&url, &mut backoff).await {
                Ok(()) => info!("Binance stream closed"),
                Err(e) => warn!(error = %e, "Binance stream error"),
            }
            if self.tick_tx.is_closed() {
                warn!("Tick channel closed, stopping Binance feed");
                return;
            }
            base_idx = (base_idx + 1) % self.bases.len();
            let delay = backoff.next_delay();
            info!(backoff = ?delay, next = %self.bases[base_idx], "Reconnecting to Binance");
            tokio::time::sleep(delay).await;
        }
    }

    async fn connect_once(&self, url: &str, backoff: &mut Backoff) -> Result<()> {
        let url = Url::parse(url).map_err(|e| Error::WebSocket(e.to_string()))?;
        let (ws, _) = connect_async(url)
            .await
            .map_err(|e| Error::WebSocket(e.to_string()))?;
        info!("Binance stream connected");
        backoff.reset();

        let (_, mut read) = ws.split();
        while let Some(msg) = read.next().await {
            let msg = msg.map_err(|e| Error::WebSocket(e.to_string()))?;
            if let Message::Text(text) = msg {
                match parse_agg_trade(&text) {
                    Ok(Some(tick)) => {
                        if self.tick_tx.send(tick).await.is_err() {
                            return Ok(());
                        }
                    }
                    Ok(None) => {}
                    Err(e) => warn!(error = %e, "Failed to parse Binance message"),
                }
            }
        }
        Ok(())
    }
}

fn stream_url(base: &str, symbols: &[String]) -> String {
    let streams: Vec<String> = symbols.iter().map(|s| format!("{s}@aggTrade")).collect();
    format!("{}/stream?streams={}", base.trim_end_matches('/'), streams.join("/"))
}

// ─── aggTrade JSON parsing ────────────────────────────────────────────────────

#[derive(Deserialize)]
struct Combined {
    data: AggTrade,
}

#[derive(Deserialize)]
struct AggTrade {
    #[serde(rename = "e")]
    event: String,
    #[serde(rename = "s")]
    symbol: String,
    #[serde(rename = "p")]
    price: String,
    #[serde(rename = "T")]
    trade_time_ms: i64,
}

fn parse_agg_trade(text: &str) -> Result<Option<Tick>> {
    let value: serde_json::Value = serde_json::from_str(text)?;
    if value.get("stream").is_none() || value.get("data").is_none() {
        return Ok(None);
    }
    let Combined { data } = serde_json::from_value(value)?;
    if data.event != "aggTrade" {
        return Ok(None);
    }
    let price = data
        .price
        .parse::<f64>()
        .map_err(|e| Error::Other(format!("bad aggTrade price '{}': {e}", data.price)))?;
    Ok(Some(Tick {
        symbol: data.symbol.to_lowercase(),
        price,
        timestamp_ms: data.trade_time_ms,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_combined_stream_url() {
        let url = stream_url("wss://stream.binance.com:9443/", &["btcusdt".into(), "ethusdt".into()]);
        assert_eq!(
            url,
            "wss://stream.binance.com:9443/stream?streams=btcusdt@aggTrade/ethusdt@aggTrade"
        );
    }

    #[test]
    fn parses_agg_trade() {
        let raw = r#"{"stream":"btcusdt@aggTrade","data":{"e":"aggTrade","E":1,"s":"BTCUSDT","a":5,"p":"64123.50","q":"0.01","f":1,"l":1,"T":1709528400123,"m":false}}"#;
        let tick = parse_agg_trade(raw).unwrap().unwrap();
        assert_eq!(tick.symbol, "btcusdt");
        assert_eq!(tick.price, 64123.5);
        assert_eq!(tick.timestamp_ms, 1709528400123);
    }

    #[test]
    fn ignores_non_trade_messages() {
        assert!(parse_agg_trade(r#"{"result":null,"id":1}"#).unwrap().is_none());
    }

    #[test]
    fn rejects_bad_price() {
        let raw = r#"{"stream":"x","data":{"e":"aggTrade","s":"BTCUSDT","p":"abc","T":1}}"#;
        assert!(parse_agg_trade(raw).is_err());
    }
}
