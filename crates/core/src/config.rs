//! Layered configuration for the order lifecycle service.
//!
//! Configuration is loaded in layers with increasing priority:
//! 1. Compiled-in defaults
//! 2. TOML configuration file (if provided)
//! 3. Environment variable overrides (prefix `TQ_`, nested with `__`)
//! 4. Dedicated credential env vars (`TQ_ACCESS_KEY`, `TQ_SECRET_KEY`, `TQ_PASSPHRASE`)
//!
//! Venue credentials are expected from the environment. A value set in a file
//! is still overridden by the dedicated variables.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use config::{Config, Environment, File};
use serde::Deserialize;

use crate::types::{StrategyIdentity, Symbol};

// ── Default value functions ────────────────────────────────────────────

/// Venue request timeout: 10 000 ms.
fn default_request_timeout_ms() -> u64 {
    10_000
}

/// How long an orphan event waits for its order to be bound: 5 000 ms.
fn default_orphan_retry_window_ms() -> u64 {
    5_000
}

fn default_orphan_buffer_capacity() -> usize {
    1_024
}

fn default_orphan_sweep_interval_ms() -> u64 {
    500
}

fn default_dispatch_workers() -> usize {
    4
}

fn default_dispatch_queue_capacity() -> usize {
    1_024
}

/// Paper venue simulated latency: 1 ms.
fn default_paper_latency_ms() -> u64 {
    1
}

fn default_log_level() -> String {
    "info".to_string()
}

// ── Configuration structs ──────────────────────────────────────────────

/// Top-level application configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    /// Venue identity and connection settings.
    pub venue: VenueConfig,
    /// Lifecycle manager tuning.
    #[serde(default)]
    pub oms: OmsConfig,
    /// Paper venue parameters.
    #[serde(default)]
    pub paper: PaperConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    pub trading: TradingConfig,
}

/// Venue identity and connection settings.
#[derive(Debug, Clone, Deserialize)]
pub struct VenueConfig {
    /// Venue name, e.g. `binance`.
    pub platform: String,
    pub account: String,
    pub strategy: String,
    /// Traded symbol, e.g. `BTC/USDT`.
    pub symbol: String,
    /// REST base URL.
    #[serde(default)]
    pub host: String,
    /// Websocket base URL.
    #[serde(default)]
    pub wss: String,
    /// Loaded from `TQ_ACCESS_KEY`.
    #[serde(default)]
    pub access_key: String,
    /// Loaded from `TQ_SECRET_KEY`.
    #[serde(default)]
    pub secret_key: String,
    /// Loaded from `TQ_PASSPHRASE`. Only some venues need one.
    #[serde(default)]
    pub passphrase: String,
}

impl VenueConfig {
    pub fn identity(&self) -> StrategyIdentity {
        StrategyIdentity::new(
            self.platform.clone(),
            self.account.clone(),
            self.strategy.clone(),
            Symbol::new(self.symbol.clone()),
        )
    }
}

impl From<&VenueConfig> for StrategyIdentity {
    fn from(venue: &VenueConfig) -> Self {
        venue.identity()
    }
}

/// Lifecycle manager tuning.
#[derive(Debug, Clone, Deserialize)]
pub struct OmsConfig {
    /// Upper bound on any single venue request.
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
    /// How long an event for an unknown remote id is kept for retry.
    #[serde(default = "default_orphan_retry_window_ms")]
    pub orphan_retry_window_ms: u64,
    /// Maximum number of parked orphan events.
    #[serde(default = "default_orphan_buffer_capacity")]
    pub orphan_buffer_capacity: usize,
    #[serde(default = "default_orphan_sweep_interval_ms")]
    pub orphan_sweep_interval_ms: u64,
    /// Poll interval for venues without a push stream. `0` disables polling.
    #[serde(default)]
    pub poll_interval_ms: u64,
    /// Number of notification worker tasks.
    #[serde(default = "default_dispatch_workers")]
    pub dispatch_workers: usize,
    /// Bounded queue size per notification worker.
    #[serde(default = "default_dispatch_queue_capacity")]
    pub dispatch_queue_capacity: usize,
    /// Adopt venue orders this session did not create.
    #[serde(default)]
    pub adopt_orphan_orders: bool,
}

impl OmsConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn orphan_retry_window(&self) -> Duration {
        Duration::from_millis(self.orphan_retry_window_ms)
    }

    pub fn orphan_sweep_interval(&self) -> Duration {
        Duration::from_millis(self.orphan_sweep_interval_ms)
    }

    /// `None` when polling is disabled.
    pub fn poll_interval(&self) -> Option<Duration> {
        (self.poll_interval_ms > 0).then(|| Duration::from_millis(self.poll_interval_ms))
    }
}

impl Default for OmsConfig {
    fn default() -> Self {
        Self {
            request_timeout_ms: default_request_timeout_ms(),
            orphan_retry_window_ms: default_orphan_retry_window_ms(),
            orphan_buffer_capacity: default_orphan_buffer_capacity(),
            orphan_sweep_interval_ms: default_orphan_sweep_interval_ms(),
            poll_interval_ms: 0,
            dispatch_workers: default_dispatch_workers(),
            dispatch_queue_capacity: default_dispatch_queue_capacity(),
            adopt_orphan_orders: false,
        }
    }
}

/// Paper venue simulation parameters.
#[derive(Debug, Clone, Deserialize)]
pub struct PaperConfig {
    /// Simulated request latency in milliseconds.
    #[serde(default = "default_paper_latency_ms")]
    pub latency_ms: u64,
}

impl Default for PaperConfig {
    fn default() -> Self {
        Self {
            latency_ms: default_paper_latency_ms(),
        }
    }
}

/// Log output settings.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// JSON output with nanosecond timestamps instead of pretty output.
    #[serde(default)]
    pub json: bool,
    /// Filter used when `RUST_LOG` is unset.
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            json: false,
            level: default_log_level(),
        }
    }
}

/// Trading mode configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct TradingConfig {
    /// `paper` for the simulated venue, `live` for a real one.
    pub mode: TradingMode,
}

/// Trading mode selector.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum TradingMode {
    /// Simulated venue.
    Paper,
    /// Real venue with real funds.
    Live,
}

impl AppConfig {
    /// Load configuration using layered sources.
    ///
    /// 1. Compiled-in defaults.
    /// 2. TOML file at `config_path` (if `Some`).
    /// 3. Environment variable overrides with prefix `TQ_` and `__` as the
    ///    nesting separator (e.g., `TQ_OMS__REQUEST_TIMEOUT_MS=2000`).
    /// 4. Credentials from `TQ_ACCESS_KEY`, `TQ_SECRET_KEY`, `TQ_PASSPHRASE`.
    ///
    /// The result is validated before it is returned.
    pub fn load(config_path: Option<PathBuf>) -> Result<Self> {
        let mut builder = Config::builder()
            // ── Layer 1: compiled-in defaults ───────────────────────
            .set_default("venue.platform", "paper")?
            .set_default("venue.account", "paper-account")?
            .set_default("venue.strategy", "demo")?
            .set_default("venue.symbol", "BTC/USDT")?
            .set_default("venue.host", "")?
            .set_default("venue.wss", "")?
            .set_default("oms.request_timeout_ms", 10_000i64)?
            .set_default("oms.orphan_retry_window_ms", 5_000i64)?
            .set_default("oms.orphan_buffer_capacity", 1_024i64)?
            .set_default("oms.orphan_sweep_interval_ms", 500i64)?
            .set_default("oms.poll_interval_ms", 0i64)?
            .set_default("oms.dispatch_workers", 4i64)?
            .set_default("oms.dispatch_queue_capacity", 1_024i64)?
            .set_default("oms.adopt_orphan_orders", false)?
            .set_default("paper.latency_ms", 1i64)?
            .set_default("logging.json", false)?
            .set_default("logging.level", "info")?
            .set_default("trading.mode", "paper")?;

        // ── Layer 2: TOML file ─────────────────────────────────────
        if let Some(path) = config_path {
            let path_str = path.to_str().context("config path is not valid UTF-8")?;
            builder = builder.add_source(File::with_name(path_str).required(true));
        }

        // ── Layer 3: env var overrides (TQ_ prefix) ───────────────
        // `prefix_separator` defaults to the nesting separator once one is
        // set, so it has to be pinned to a single underscore.
        builder = builder.add_source(
            Environment::with_prefix("TQ")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        let mut cfg: AppConfig = builder
            .build()
            .context("failed to build configuration")?
            .try_deserialize()
            .context("failed to deserialize configuration")?;

        // ── Layer 4: dedicated credential env vars ─────────────────
        if let Ok(v) = std::env::var("TQ_ACCESS_KEY") {
            cfg.venue.access_key = v;
        }
        if let Ok(v) = std::env::var("TQ_SECRET_KEY") {
            cfg.venue.secret_key = v;
        }
        if let Ok(v) = std::env::var("TQ_PASSPHRASE") {
            cfg.venue.passphrase = v;
        }

        cfg.validate()?;

        Ok(cfg)
    }

    /// Validate configuration invariants.
    fn validate(&self) -> Result<()> {
        let venue = &self.venue;
        for (name, value) in [
            ("platform", &venue.platform),
            ("account", &venue.account),
            ("strategy", &venue.strategy),
            ("symbol", &venue.symbol),
        ] {
            if value.trim().is_empty() {
                bail!("venue.{name} must not be empty");
            }
        }
        if self.trading.mode == TradingMode::Live
            && (venue.access_key.is_empty() || venue.secret_key.is_empty())
        {
            bail!("access key and secret key are required in live trading mode");
        }
        if self.oms.dispatch_workers == 0 {
            bail!("oms.dispatch_workers must be at least 1");
        }
        if self.oms.dispatch_queue_capacity == 0 {
            bail!("oms.dispatch_queue_capacity must be at least 1");
        }
        if self.oms.request_timeout_ms == 0 {
            bail!("oms.request_timeout_ms must be positive");
        }
        Ok(())
    }
}
