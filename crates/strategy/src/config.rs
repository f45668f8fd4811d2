use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use common::{Error, Result};

/// Top-level strategy config file (TOML).
///
/// Example `config/strategies.toml`:
/// ```toml
/// [[strategy]]
/// type = "orb"
/// instruments = ["EURUSD", "GBPUSD"]
/// stops = "fixed"
///
/// [strategy.params]
/// start_hour = 9.5
/// duration_min = 30
/// ```
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StrategyFileConfig {
    #[serde(rename = "strategy", default)]
    pub strategies: Vec<StrategyConfig>,
}

/// Which stop/target scheme turns a detector entry into a trade.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StopMode {
    /// Per-instrument pip table.
    #[default]
    Fixed,
    /// The detector's own stop and first target, when it supplies valid ones.
    Native,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StrategyConfig {
    /// Detector type: po3, judas, breaker, fvgc, pdifvg, nyrangeob, orb,
    /// candlerange or goldtime.
    #[serde(rename = "type")]
    pub strategy_type: String,
    #[serde(default = "enabled_default")]
    pub enabled: bool,
    /// Instrument ids this detector runs on. Empty means all.
    #[serde(default)]
    pub instruments: Vec<String>,
    #[serde(default)]
    pub stops: StopMode,
    /// Detector-specific parameters.
    #[serde(default)]
    pub params: HashMap<String, toml::Value>,
}

fn enabled_default() -> bool {
    true
}

impl StrategyConfig {
    pub fn new(strategy_type: &str) -> Self {
        Self {
            strategy_type: strategy_type.to_string(),
            enabled: true,
            instruments: Vec::new(),
            stops: StopMode::Fixed,
            params: HashMap::new(),
        }
    }

    pub fn applies_to(&self, instrument_id: &str) -> bool {
        self.enabled
            && (self.instruments.is_empty() || self.instruments.iter().any(|i| i == instrument_id))
    }
}

impl StrategyFileConfig {
    pub fn load(path: &str) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("Failed to read strategy config at '{path}': {e}"))
        })?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }
}

impl Default for StrategyFileConfig {
    /// Every detector enabled with default parameters; Gold-Time on XAUUSD only.
    fn default() -> Self {
        let mut strategies: Vec<StrategyConfig> = [
            "po3",
            "pdifvg",
            "fvgc",
            "breaker",
            "judas",
            "nyrangeob",
            "orb",
            "candlerange",
        ]
        .into_iter()
        .map(StrategyConfig::new)
        .collect();
        let mut gold = StrategyConfig::new("goldtime");
        gold.instruments = vec!["XAUUSD".to_string()];
        strategies.push(gold);
        Self { strategies }
    }
}

// ─── Param helpers ────────────────────────────────────────────────────────────

// Missing keys take the default. A key that is present with the wrong type
// is a config error naming the key.

fn bad_param(key: &str, expected: &str, v: &toml::Value) -> Error {
    Error::Config(format!(
        "strategy param '{key}' must be {expected}, got {}",
        v.type_str()
    ))
}

pub(crate) fn param_f64(params: &HashMap<String, toml::Value>, key: &str, default: f64) -> Result<f64> {
    let Some(v) = params.get(key) else { return Ok(default) };
    v.as_float()
        .or_else(|| v.as_integer().map(|i| i as f64))
        .ok_or_else(|| bad_param(key, "a number", v))
}

pub(crate) fn param_usize(params: &HashMap<String, toml::Value>, key: &str, default: usize) -> Result<usize> {
    let Some(v) = params.get(key) else { return Ok(default) };
    v.as_integer()
        .filter(|i| *i >= 0)
        .map(|i| i as usize)
        .ok_or_else(|| bad_param(key, "a non-negative integer", v))
}

pub(crate) fn param_bool(params: &HashMap<String, toml::Value>, key: &str, default: bool) -> Result<bool> {
    let Some(v) = params.get(key) else { return Ok(default) };
    v.as_bool().ok_or_else(|| bad_param(key, "a boolean", v))
}

pub(crate) fn param_strings(params: &HashMap<String, toml::Value>, key: &str) -> Result<Option<Vec<String>>> {
    let Some(v) = params.get(key) else { return Ok(None) };
    let arr = v
        .as_array()
        .ok_or_else(|| bad_param(key, "an array of strings", v))?;
    arr.iter()
        .map(|item| {
            item.as_str()
                .map(str::to_string)
                .ok_or_else(|| bad_param(key, "an array of strings", item))
        })
        .collect::<Result<Vec<_>>>()
        .map(Some)
}
