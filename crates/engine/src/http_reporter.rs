use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use tracing::debug;

use common::{ClosedTrade, Direction, Error, Outcome, Result, SessionContext, Trade, TradeReporter};

/// Posts trade open/close events to the dashboard's internal endpoints.
pub struct HttpReporter {
    base_url: String,
    http: Client,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct EntryPayload<'a> {
    instrument_id: &'a str,
    strategy: &'a str,
    direction: Direction,
    entry: f64,
    entry_ts: i64,
    sl: f64,
    tp: f64,
    pip_size: f64,
    decimals: u32,
    sessions: &'a SessionContext,
    variant_label: &'a str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ResultPayload<'a> {
    instrument_id: &'a str,
    strategy: &'a str,
    entry_ts: i64,
    direction: Direction,
    exit: f64,
    exit_ts: i64,
    outcome: Outcome,
    pips: f64,
    variant: &'a str,
}

impl<'a> From<&'a Trade> for EntryPayload<'a> {
    fn from(t: &'a Trade) -> Self {
        Self {
            instrument_id: &t.instrument_id,
            strategy: &t.strategy,
            direction: t.direction,
            entry: t.entry_price,
            entry_ts: t.entry_time_ms,
            sl: t.stop_price,
            tp: t.target_price,
            pip_size: t.pip_size,
            decimals: t.decimals,
            sessions: &t.sessions,
            variant_label: &t.variant_label,
        }
    }
}

impl<'a> From<&'a ClosedTrade> for ResultPayload<'a> {
    fn from(c: &'a ClosedTrade) -> Self {
        Self {
            instrument_id: &c.trade.instrument_id,
            strategy: &c.trade.strategy,
            entry_ts: c.trade.entry_time_ms,
            direction: c.trade.direction,
            exit: c.exit_price,
            exit_ts: c.exit_time_ms,
            outcome: c.outcome,
            pips: c.pips,
            variant: &c.trade.variant_label,
        }
    }
}

impl HttpReporter {
    pub fn new(base_url: impl Into<String>) -> Result<Self> {
        let http = Client::builder()
            .use_rustls_tls()
            .timeout(std::time::Duration::from_secs(10))
            .build()
            .map_err(|e| Error::Http(e.to_string()))?;
        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            http,
        })
    }

    async fn post<T: Serialize + ?Sized>(&self, path: &str, body: &T) -> Result<()> {
        let url = format!("{}{path}", self.base_url);
        let resp = self
            .http
            .post(&url)
            .json(body)
            .send()
            .await
            .map_err(|e| Error::Http(e.to_string()))?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(Error::Http(format!("POST {path} -> HTTP {status}: {text}")));
        }
        debug!(path, "Dashboard accepted payload");
        Ok(())
    }
}

#[async_trait]
impl TradeReporter for HttpReporter {
    fn name(&self) -> &str {
        "dashboard"
    }

    async fn open_trade(&self, trade: &Trade) -> Result<()> {
        self.post("/_internal/strategy_entry", &EntryPayload::from(trade)).await
    }

    async fn close_trade(&self, closed: &ClosedTrade) -> Result<()> {
        self.post("/_internal/result", &ResultPayload::from(closed)).await
    }
}
