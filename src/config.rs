//! Configuration module for Whale Alert

use anyhow::{anyhow, bail, Result};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::env;
use std::fmt::Display;
use std::path::PathBuf;
use std::str::FromStr;

/// Which upstream supplies transfers and the chain head
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferSourceKind {
    Explorer,
    Indexer,
}

impl FromStr for TransferSourceKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "explorer" => Ok(Self::Explorer),
            "indexer" => Ok(Self::Indexer),
            other => Err(format!("unknown transfer source {:?}", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PriceSourceKind {
    DexScreener,
    Static,
}

impl FromStr for PriceSourceKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "dexscreener" => Ok(Self::DexScreener),
            "static" => Ok(Self::Static),
            other => Err(format!("unknown price source {:?}", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageBackend {
    Json,
    Sqlite,
}

impl FromStr for StorageBackend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "json" => Ok(Self::Json),
            "sqlite" => Ok(Self::Sqlite),
            other => Err(format!("unknown storage backend {:?}", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Pretty,
    Json,
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "pretty" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            other => Err(format!("unknown log format {:?}", other)),
        }
    }
}

/// Application configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    // Telegram
    pub telegram_bot_token: Option<String>,

    // Upstreams
    pub transfer_source: TransferSourceKind,
    pub explorer_api_url: String,
    pub explorer_api_key: String,
    pub indexer_api_url: String,
    pub indexer_api_key: String,
    pub indexer_chain: String,
    pub price_source: PriceSourceKind,
    pub price_api_url: String,
    pub fallback_price_usd: Decimal,

    // Token
    pub token_contract: String,
    pub token_symbol: String,
    pub token_decimals: u32,
    /// Circulating supply for the `/price` market cap line; unset hides it
    pub token_supply: Option<Decimal>,

    // Detection
    pub min_alert_usd: Decimal,
    pub poll_interval_secs: u64,
    pub dedup_capacity: usize,
    pub delivery_concurrency: usize,

    // Persistence
    pub storage_backend: StorageBackend,
    pub subscribers_file: PathBuf,
    pub checkpoint_file: PathBuf,
    pub database_path: PathBuf,

    // Presentation
    pub dashboard_port: u16,
    pub explorer_tx_url: String,
    pub explorer_token_url: String,
    pub chart_url: String,
    pub log_format: LogFormat,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            telegram_bot_token: None,
            transfer_source: TransferSourceKind::Explorer,
            explorer_api_url: "https://api.bscscan.com/api".to_string(),
            explorer_api_key: String::new(),
            indexer_api_url: "https://deep-index.moralis.io/api/v2.2".to_string(),
            indexer_api_key: String::new(),
            indexer_chain: "bsc".to_string(),
            price_source: PriceSourceKind::DexScreener,
            price_api_url: "https://api.dexscreener.com/latest/dex/tokens".to_string(),
            fallback_price_usd: dec!(0.70),
            token_contract: "0x000Ae314E2A2172a039B26378814C252734f556A".to_string(),
            token_symbol: "ASTER".to_string(),
            token_decimals: 18,
            token_supply: None,
            min_alert_usd: dec!(5000),
            poll_interval_secs: 30,
            dedup_capacity: 1000,
            delivery_concurrency: 8,
            storage_backend: StorageBackend::Json,
            subscribers_file: PathBuf::from("./data/subscribers.json"),
            checkpoint_file: PathBuf::from("./data/lastblock.json"),
            database_path: PathBuf::from("./data/whale-alert.db"),
            dashboard_port: 3000,
            explorer_tx_url: "https://bscscan.com/tx".to_string(),
            explorer_token_url: "https://bscscan.com/token".to_string(),
            chart_url: "https://dexscreener.com/bsc".to_string(),
            log_format: LogFormat::Pretty,
        }
    }
}

fn parsed<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: Display,
{
    match lookup(key) {
        Some(raw) => raw
            .parse()
            .map_err(|e| anyhow!("{}={:?} is invalid: {}", key, raw, e)),
        None => Ok(default),
    }
}

fn optional<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: Display,
{
    lookup(key)
        .map(|raw| {
            raw.parse()
                .map_err(|e| anyhow!("{}={:?} is invalid: {}", key, raw, e))
        })
        .transpose()
}

impl Config {
    /// Load configuration from `.env` and the process environment
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();

        Self::from_lookup(|key| {
            env::var(key)
                .ok()
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        })
    }

    /// Build from any key lookup; unset keys take their defaults
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let d = Self::default();
        let text = |key: &str, default: String| lookup(key).unwrap_or(default);

        let config = Self {
            telegram_bot_token: lookup("TELEGRAM_BOT_TOKEN"),

            transfer_source: parsed(&lookup, "TRANSFER_SOURCE", d.transfer_source)?,
            explorer_api_url: text("EXPLORER_API_URL", d.explorer_api_url),
            explorer_api_key: text("EXPLORER_API_KEY", d.explorer_api_key),
            indexer_api_url: text("INDEXER_API_URL", d.indexer_api_url),
            indexer_api_key: text("INDEXER_API_KEY", d.indexer_api_key),
            indexer_chain: text("INDEXER_CHAIN", d.indexer_chain),
            price_source: parsed(&lookup, "PRICE_SOURCE", d.price_source)?,
            price_api_url: text("PRICE_API_URL", d.price_api_url),
            fallback_price_usd: parsed(&lookup, "FALLBACK_PRICE_USD", d.fallback_price_usd)?,

            token_contract: text("TOKEN_CONTRACT", d.token_contract),
            token_symbol: text("TOKEN_SYMBOL", d.token_symbol),
            token_decimals: parsed(&lookup, "TOKEN_DECIMALS", d.token_decimals)?,
            token_supply: optional(&lookup, "TOKEN_SUPPLY")?,

            min_alert_usd: parsed(&lookup, "MIN_ALERT_USD", d.min_alert_usd)?,
            poll_interval_secs: parsed(&lookup, "POLL_INTERVAL", d.poll_interval_secs)?,
            dedup_capacity: parsed(&lookup, "DEDUP_CAPACITY", d.dedup_capacity)?,
            delivery_concurrency: parsed(&lookup, "DELIVERY_CONCURRENCY", d.delivery_concurrency)?,

            storage_backend: parsed(&lookup, "STORAGE_BACKEND", d.storage_backend)?,
            subscribers_file: parsed(&lookup, "SUBSCRIBERS_FILE", d.subscribers_file)?,
            checkpoint_file: parsed(&lookup, "CHECKPOINT_FILE", d.checkpoint_file)?,
            database_path: parsed(&lookup, "DATABASE_PATH", d.database_path)?,

            dashboard_port: parsed(&lookup, "DASHBOARD_PORT", d.dashboard_port)?,
            explorer_tx_url: text("EXPLORER_TX_URL", d.explorer_tx_url),
            explorer_token_url: text("EXPLORER_TOKEN_URL", d.explorer_token_url),
            chart_url: text("CHART_URL", d.chart_url),
            log_format: parsed(&lookup, "LOG_FORMAT", d.log_format)?,
        };

        config.validate()?;
        Ok(config)
    }

    /// Reject values the pipeline cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.min_alert_usd <= Decimal::ZERO {
            bail!("MIN_ALERT_USD must be positive, got {}", self.min_alert_usd);
        }
        if self.fallback_price_usd <= Decimal::ZERO {
            bail!("FALLBACK_PRICE_USD must be positive, got {}", self.fallback_price_usd);
        }
        if let Some(supply) = self.token_supply.filter(|s| *s <= Decimal::ZERO) {
            bail!("TOKEN_SUPPLY must be positive, got {}", supply);
        }
        if self.poll_interval_secs == 0 {
            bail!("POLL_INTERVAL must be at least 1 second");
        }
        if self.dedup_capacity == 0 {
            bail!("DEDUP_CAPACITY must be at least 1");
        }
        if self.delivery_concurrency == 0 {
            bail!("DELIVERY_CONCURRENCY must be at least 1");
        }
        if self.token_decimals > 28 {
            bail!("TOKEN_DECIMALS must be at most 28, got {}", self.token_decimals);
        }
        if self.token_contract.is_empty() {
            bail!("TOKEN_CONTRACT must be set");
        }
        Ok(())
    }

    pub fn dashboard_enabled(&self) -> bool {
        self.dashboard_port != 0
    }
}
