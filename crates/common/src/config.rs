use std::collections::HashSet;
use std::path::Path;

use serde::Deserialize;

use crate::{Error, FeedKind, Instrument, Result, SessionWindows};

/// All configuration loaded from environment variables at startup.
#[derive(Debug, Clone)]
pub struct Config {
    // Database
    pub database_url: String,

    // Config file paths
    pub instruments_config_path: String,
    pub strategy_config_path: String,

    // Feeds
    pub finnhub_api_key: Option<String>,

    // Telegram
    pub telegram_token: Option<String>,
    pub telegram_allowed_user_ids: Vec<i64>,
    pub notify_throttle_secs: u64,

    // Dashboard reporter
    pub dashboard_url: Option<String>,

    pub auto_start: bool,
}

impl Config {
    /// Load all configuration from environment variables.
    /// Loads `.env` if present. Malformed values are a configuration error.
    pub fn from_env() -> Result<Self> {
        let _ = dotenvy::dotenv(); // ignore error if .env not present

        let telegram_token = optional_env("TELEGRAM_TOKEN");
        let telegram_allowed_user_ids = match optional_env("TELEGRAM_ALLOWED_USER_IDS") {
            Some(raw) => parse_user_ids(&raw)?,
            None if telegram_token.is_some() => {
                return Err(Error::Config(
                    "TELEGRAM_ALLOWED_USER_IDS is required when TELEGRAM_TOKEN is set".into(),
                ))
            }
            None => Vec::new(),
        };

        let notify_throttle_secs = match optional_env("NOTIFY_THROTTLE_SECS") {
            Some(v) => v.parse().map_err(|_| {
                Error::Config(format!("NOTIFY_THROTTLE_SECS must be an integer, got '{v}'"))
            })?,
            None => 60,
        };

        let auto_start = match optional_env("AUTO_START").as_deref() {
            None => true,
            Some("1") | Some("true") | Some("yes") => true,
            Some("0") | Some("false") | Some("no") => false,
            Some(other) => {
                return Err(Error::Config(format!(
                    "AUTO_START must be true or false, got '{other}'"
                )))
            }
        };

        Ok(Config {
            database_url: optional_env("DATABASE_URL")
                .unwrap_or_else(|| "sqlite://data/sweepbot.db?mode=rwc".to_string()),
            instruments_config_path: optional_env("INSTRUMENTS_CONFIG_PATH")
                .unwrap_or_else(|| "config/instruments.toml".to_string()),
            strategy_config_path: optional_env("STRATEGY_CONFIG_PATH")
                .unwrap_or_else(|| "config/strategies.toml".to_string()),
            finnhub_api_key: optional_env("FINNHUB_API_KEY"),
            telegram_token,
            telegram_allowed_user_ids,
            notify_throttle_secs,
            dashboard_url: optional_env("DASHBOARD_URL"),
            auto_start,
        })
    }
}

fn optional_env(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn parse_user_ids(raw: &str) -> Result<Vec<i64>> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| {
            s.parse::<i64>().map_err(|_| {
                Error::Config(format!(
                    "TELEGRAM_ALLOWED_USER_IDS contains non-numeric ID: '{s}'"
                ))
            })
        })
        .collect()
}

// ─── Instrument file ──────────────────────────────────────────────────────────

/// Validated contents of `instruments.toml`.
#[derive(Debug, Clone)]
pub struct InstrumentSet {
    pub sessions: SessionWindows,
    pub instruments: Vec<Instrument>,
}

#[derive(Debug, Deserialize)]
struct RawInstrumentFile {
    #[serde(default)]
    defaults: RawDefaults,
    #[serde(default)]
    sessions: SessionWindows,
    #[serde(default, rename = "instrument")]
    instruments: Vec<RawInstrument>,
}

#[derive(Debug, Deserialize)]
struct RawDefaults {
    #[serde(default = "default_pips")]
    tp_pips: f64,
    #[serde(default = "default_pips")]
    sl_pips: f64,
}

impl Default for RawDefaults {
    fn default() -> Self {
        Self {
            tp_pips: default_pips(),
            sl_pips: default_pips(),
        }
    }
}

fn default_pips() -> f64 {
    100.0
}

#[derive(Debug, Deserialize)]
struct RawInstrument {
    id: String,
    feed: FeedKind,
    feed_symbol: String,
    pip_size: Option<f64>,
    decimals: Option<u32>,
    tp_pips: Option<f64>,
    sl_pips: Option<f64>,
}

impl InstrumentSet {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("Cannot read instrument config {}: {e}", path.display()))
        })?;
        Self::parse(&contents)
    }

    /// Parse and validate. Every instrument needs a positive `pip_size` and a
    /// `decimals` entry; ids must be unique.
    pub fn parse(contents: &str) -> Result<Self> {
        let raw: RawInstrumentFile = toml::from_str(contents)?;

        let w = raw.sessions;
        if !(w.asia_start < w.asia_end && w.london_start < w.london_end) {
            return Err(Error::Config(format!("Invalid session windows: {w:?}")));
        }

        let mut seen = HashSet::new();
        let mut instruments = Vec::with_capacity(raw.instruments.len());
        for r in raw.instruments {
            if !seen.insert(r.id.clone()) {
                return Err(Error::Config(format!("Duplicate instrument id '{}'", r.id)));
            }
            let pip_size = match r.pip_size {
                Some(p) if p > 0.0 && p.is_finite() => p,
                Some(p) => {
                    return Err(Error::Config(format!(
                        "Instrument '{}' has invalid pip_size {p}",
                        r.id
                    )))
                }
                None => {
                    return Err(Error::Config(format!(
                        "Instrument '{}' is missing pip_size",
                        r.id
                    )))
                }
            };
            let decimals = r.decimals.ok_or_else(|| {
                Error::Config(format!("Instrument '{}' is missing decimals", r.id))
            })?;
            let tp_pips = r.tp_pips.unwrap_or(raw.defaults.tp_pips);
            let sl_pips = r.sl_pips.unwrap_or(raw.defaults.sl_pips);
            if tp_pips <= 0.0 || sl_pips <= 0.0 {
                return Err(Error::Config(format!(
                    "Instrument '{}' needs positive tp_pips/sl_pips",
                    r.id
                )));
            }
            instruments.push(Instrument {
                id: r.id,
                feed: r.feed,
                feed_symbol: r.feed_symbol,
                pip_size,
                decimals,
                tp_pips,
                sl_pips,
            });
        }

        if instruments.is_empty() {
            return Err(Error::Config("No instruments configured".into()));
        }

        Ok(Self {
            sessions: w,
            instruments,
        })
    }
}
