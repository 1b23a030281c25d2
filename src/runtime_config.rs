// =============================================================================
// Runtime Configuration — service settings loaded at startup
// =============================================================================
//
// Settings come from a JSON file (every field has a serde default, so a
// partial or empty file is valid) and are then overridden by environment
// variables:
//
//   INDICATOR_BIND_ADDR   listen address
//   INDICATOR_SYMBOLS     comma-separated symbol list pinning the universe
//   INDICATOR_POLL_SECS   streaming cadence in seconds
//   BINANCE_BASE_URL      market data REST endpoint
// =============================================================================

use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

// =============================================================================
// Default-value helpers (required by serde `default = "..."` attribute)
// =============================================================================

fn default_bind_addr() -> String {
    "0.0.0.0:3001".to_string()
}

fn default_binance_base_url() -> String {
    "https://api.binance.com".to_string()
}

fn default_quote_asset() -> String {
    "USDT".to_string()
}

fn default_interval() -> String {
    "30m".to_string()
}

fn default_poll_interval_secs() -> u64 {
    8
}

fn default_kline_limit() -> u32 {
    100
}

fn default_max_concurrent_fetches() -> usize {
    16
}

fn default_request_timeout_secs() -> u64 {
    10
}

// =============================================================================
// RuntimeConfig
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeConfig {
    /// Address the HTTP / WebSocket server binds to.
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,

    #[serde(default = "default_binance_base_url")]
    pub binance_base_url: String,

    /// Only symbols quoted in this asset are part of the universe.
    #[serde(default = "default_quote_asset")]
    pub quote_asset: String,

    /// When non-empty, pins the universe to these symbols.
    #[serde(default)]
    pub symbols: Vec<String>,

    /// Interval used by the query endpoint and by new streaming sessions.
    #[serde(default = "default_interval")]
    pub default_interval: String,

    /// Delay between two pushes of one streaming session.
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,

    /// Number of bars requested per symbol.
    #[serde(default = "default_kline_limit")]
    pub kline_limit: u32,

    /// Upper bound on simultaneous per-symbol fetches within one scan.
    #[serde(default = "default_max_concurrent_fetches")]
    pub max_concurrent_fetches: usize,

    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
            binance_base_url: default_binance_base_url(),
            quote_asset: default_quote_asset(),
            symbols: Vec::new(),
            default_interval: default_interval(),
            poll_interval_secs: default_poll_interval_secs(),
            kline_limit: default_kline_limit(),
            max_concurrent_fetches: default_max_concurrent_fetches(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

impl RuntimeConfig {
    /// Load configuration from a JSON file at `path`.
    ///
    /// If the file does not exist, returns an error so the caller can fall
    /// back to defaults with a warning.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read runtime config from {}", path.display()))?;

        let mut config: Self = serde_json::from_str(&content)
            .with_context(|| format!("failed to parse runtime config from {}", path.display()))?;
        config.sanitize();

        info!(
            path = %path.display(),
            symbols = config.symbols.len(),
            default_interval = %config.default_interval,
            "runtime config loaded"
        );

        Ok(config)
    }

    /// Replace values that would break the service with their defaults.
    fn sanitize(&mut self) {
        if self.poll_interval_secs == 0 {
            warn!("poll_interval_secs must be at least 1, using default");
            self.poll_interval_secs = default_poll_interval_secs();
        }
        if self.kline_limit == 0 {
            warn!("kline_limit must be at least 1, using default");
            self.kline_limit = default_kline_limit();
        }
        if self.max_concurrent_fetches == 0 {
            warn!("max_concurrent_fetches must be at least 1, using default");
            self.max_concurrent_fetches = default_max_concurrent_fetches();
        }
    }

    /// Apply environment overrides on top of the loaded values.
    pub fn apply_env(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(addr) = lookup("INDICATOR_BIND_ADDR") {
            self.bind_addr = addr;
        }
        if let Some(syms) = lookup("INDICATOR_SYMBOLS") {
            self.symbols = parse_symbol_list(&syms);
        }
        if let Some(secs) = lookup("INDICATOR_POLL_SECS") {
            match secs.parse::<u64>() {
                Ok(v) if v > 0 => self.poll_interval_secs = v,
                _ => warn!(value = %secs, "ignoring invalid INDICATOR_POLL_SECS"),
            }
        }
        if let Some(url) = lookup("BINANCE_BASE_URL") {
            self.binance_base_url = url;
        }
    }
}

/// Split a comma-separated symbol list, upper-casing and dropping blanks.
pub fn parse_symbol_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|s| s.trim().to_uppercase())
        .filter(|s| !s.is_empty())
        .collect()
}
