//! Process configuration read from `EXCHANGE_*` environment variables.
//!
//! Every variable is optional. Unset variables take the defaults below;
//! set but unparsable ones are an error rather than a silent fallback.

use rust_decimal::Decimal;
use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;
use types::ids::Symbol;
use types::numeric::MAX_SCALE;

use market_data::snapshot::default_bucket_interval;
use persistence::SettlementConfig;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{key}={value:?} is not valid: {reason}")]
    Invalid {
        key: &'static str,
        value: String,
        reason: String,
    },

    #[error("{0} must not be empty")]
    Empty(&'static str),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub listen_addr: SocketAddr,
    pub symbols: Vec<Symbol>,
    /// Matching workers; each owns a fixed share of the symbols
    pub workers: usize,
    /// Per-worker command queue
    pub queue_capacity: usize,
    /// Per-partition settlement queue
    pub settlement_queue_capacity: usize,
    /// Unsettled jobs per symbol before intake refuses new orders
    pub backlog_limit: usize,
    pub settlement_attempts: u32,
    pub ledger_timeout: Duration,
    pub settlement_backoff: Duration,
    pub max_readmissions: u32,
    pub readmission_delay: Duration,
    pub depth_interval: Decimal,
    pub depth_period: Duration,
    /// Broadcast capacity for settlement events and depth snapshots
    pub event_capacity: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen_addr: SocketAddr::from(([0, 0, 0, 0], 8080)),
            symbols: vec![Symbol::from("BTCUSDT"), Symbol::from("ETHUSDT")],
            workers: 4,
            queue_capacity: 1024,
            settlement_queue_capacity: 1024,
            backlog_limit: 10_000,
            settlement_attempts: 5,
            ledger_timeout: Duration::from_secs(2),
            settlement_backoff: Duration::from_millis(20),
            max_readmissions: 3,
            readmission_delay: Duration::from_millis(50),
            depth_interval: default_bucket_interval(),
            depth_period: Duration::from_secs(1),
            event_capacity: 1024,
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup; `from_env` passes the process environment.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let lookup = &lookup;

        let symbols = match lookup("EXCHANGE_SYMBOLS") {
            Some(raw) => parse_symbols(&raw)?,
            None => defaults.symbols,
        };

        let config = Self {
            listen_addr: parse_or(lookup, "EXCHANGE_LISTEN_ADDR", defaults.listen_addr)?,
            symbols,
            workers: parse_or(lookup, "EXCHANGE_WORKERS", defaults.workers)?,
            queue_capacity: parse_or(lookup, "EXCHANGE_QUEUE_CAPACITY", defaults.queue_capacity)?,
            settlement_queue_capacity: parse_or(
                lookup,
                "EXCHANGE_SETTLEMENT_QUEUE_CAPACITY",
                defaults.settlement_queue_capacity,
            )?,
            backlog_limit: parse_or(lookup, "EXCHANGE_BACKLOG_LIMIT", defaults.backlog_limit)?,
            settlement_attempts: parse_or(
                lookup,
                "EXCHANGE_SETTLEMENT_ATTEMPTS",
                defaults.settlement_attempts,
            )?,
            ledger_timeout: millis_or(lookup, "EXCHANGE_LEDGER_TIMEOUT_MS", defaults.ledger_timeout)?,
            settlement_backoff: millis_or(
                lookup,
                "EXCHANGE_SETTLEMENT_BACKOFF_MS",
                defaults.settlement_backoff,
            )?,
            max_readmissions: parse_or(
                lookup,
                "EXCHANGE_MAX_READMISSIONS",
                defaults.max_readmissions,
            )?,
            readmission_delay: millis_or(
                lookup,
                "EXCHANGE_READMISSION_DELAY_MS",
                defaults.readmission_delay,
            )?,
            depth_interval: parse_or(lookup, "EXCHANGE_DEPTH_INTERVAL", defaults.depth_interval)?,
            depth_period: millis_or(lookup, "EXCHANGE_DEPTH_PERIOD_MS", defaults.depth_period)?,
            event_capacity: parse_or(lookup, "EXCHANGE_EVENT_CAPACITY", defaults.event_capacity)?,
        };

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        let positive = [
            ("EXCHANGE_WORKERS", self.workers),
            ("EXCHANGE_QUEUE_CAPACITY", self.queue_capacity),
            ("EXCHANGE_SETTLEMENT_QUEUE_CAPACITY", self.settlement_queue_capacity),
            ("EXCHANGE_BACKLOG_LIMIT", self.backlog_limit),
            ("EXCHANGE_SETTLEMENT_ATTEMPTS", self.settlement_attempts as usize),
            ("EXCHANGE_EVENT_CAPACITY", self.event_capacity),
        ];
        for (key, value) in positive {
            if value == 0 {
                return Err(ConfigError::Invalid {
                    key,
                    value: value.to_string(),
                    reason: "must be greater than zero".into(),
                });
            }
        }

        if self.depth_interval <= Decimal::ZERO {
            return Err(ConfigError::Invalid {
                key: "EXCHANGE_DEPTH_INTERVAL",
                value: self.depth_interval.to_string(),
                reason: "must be positive".into(),
            });
        }
        if self.depth_interval.normalize().scale() > MAX_SCALE {
            return Err(ConfigError::Invalid {
                key: "EXCHANGE_DEPTH_INTERVAL",
                value: self.depth_interval.to_string(),
                reason: format!("must have at most {MAX_SCALE} fractional digits"),
            });
        }
        if self.depth_period.is_zero() {
            return Err(ConfigError::Invalid {
                key: "EXCHANGE_DEPTH_PERIOD_MS",
                value: "0".into(),
                reason: "must be greater than zero".into(),
            });
        }
        Ok(())
    }

    pub fn settlement(&self) -> SettlementConfig {
        SettlementConfig {
            max_attempts: self.settlement_attempts,
            call_timeout: self.ledger_timeout,
            retry_backoff: self.settlement_backoff,
        }
    }
}

fn parse_or<T, F>(lookup: &F, key: &'static str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        Some(raw) => raw.trim().parse().map_err(|err: T::Err| ConfigError::Invalid {
            key,
            value: raw,
            reason: err.to_string(),
        }),
        None => Ok(default),
    }
}

fn millis_or<F>(lookup: &F, key: &'static str, default: Duration) -> Result<Duration, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    parse_or(lookup, key, default.as_millis() as u64).map(Duration::from_millis)
}

fn parse_symbols(raw: &str) -> Result<Vec<Symbol>, ConfigError> {
    let mut symbols: Vec<Symbol> = Vec::new();
    for part in raw.split(',').filter(|s| !s.trim().is_empty()) {
        let symbol = Symbol::new(part);
        if !symbol.is_well_formed() {
            return Err(ConfigError::Invalid {
                key: "EXCHANGE_SYMBOLS",
                value: raw.to_string(),
                reason: format!("malformed symbol {part:?}"),
            });
        }
        if !symbols.contains(&symbol) {
            symbols.push(symbol);
        }
    }
    if symbols.is_empty() {
        return Err(ConfigError::Empty("EXCHANGE_SYMBOLS"));
    }
    Ok(symbols)
}
