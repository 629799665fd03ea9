//! Block explorer client (Etherscan-family API, e.g. BscScan)

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use serde::Deserialize;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

use crate::config::Config;
use crate::modules::transfer::{TokenValue, TransferRecord};

/// Explorer queries are open-ended upward
const END_BLOCK: &str = "99999999";

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("upstream returned status {0}")]
    Status(reqwest::StatusCode),
    #[error("upstream API error: {0}")]
    Api(String),
    #[error("malformed response: {0}")]
    Malformed(String),
}

pub type SourceResult<T> = Result<T, SourceError>;

/// Supplies transfers of the watched token at or after a height
#[async_trait]
pub trait TransferSource: Send + Sync {
    /// Order is not guaranteed; an empty result is valid
    async fn fetch_transfers(&self, since_height: u64) -> SourceResult<Vec<TransferRecord>>;
}

/// Supplies the chain head, used only to seed the first checkpoint
#[async_trait]
pub trait HeightSource: Send + Sync {
    async fn fetch_current_height(&self) -> SourceResult<Option<u64>>;
}

pub(crate) fn http_client() -> reqwest::Client {
    reqwest::Client::builder()
        .timeout(Duration::from_secs(20))
        .user_agent(concat!("whale-alert/", env!("CARGO_PKG_VERSION")))
        .build()
        .unwrap_or_else(|_| reqwest::Client::new())
}

#[derive(Debug, Deserialize)]
struct ExplorerEnvelope {
    #[serde(default)]
    status: String,
    #[serde(default)]
    message: String,
    #[serde(default)]
    result: serde_json::Value,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ExplorerTransfer {
    hash: String,
    from: String,
    to: String,
    value: String,
    block_number: String,
    time_stamp: String,
}

impl ExplorerTransfer {
    fn into_record(self) -> Option<TransferRecord> {
        let block_height = self.block_number.trim().parse().ok()?;
        let value = TokenValue::parse(&self.value).ok()?;
        let timestamp = self
            .time_stamp
            .trim()
            .parse::<i64>()
            .ok()
            .and_then(|secs| Utc.timestamp_opt(secs, 0).single())
            .unwrap_or_else(Utc::now);

        Some(TransferRecord {
            hash: self.hash,
            from: self.from,
            to: self.to,
            value,
            block_height,
            timestamp,
        })
    }
}

/// Turn an explorer `tokentx` body into transfer records
fn parse_transfers(body: &str) -> SourceResult<Vec<TransferRecord>> {
    let envelope: ExplorerEnvelope =
        serde_json::from_str(body).map_err(|e| SourceError::Malformed(e.to_string()))?;

    if envelope.message.starts_with("No transactions found") {
        return Ok(Vec::new());
    }

    if envelope.status != "1" {
        let detail = envelope
            .result
            .as_str()
            .map(|r| format!("{} ({})", envelope.message, r))
            .unwrap_or(envelope.message);
        return Err(SourceError::Api(detail));
    }

    let rows: Vec<serde_json::Value> = serde_json::from_value(envelope.result)
        .map_err(|e| SourceError::Malformed(e.to_string()))?;

    let total = rows.len();
    let records: Vec<TransferRecord> = rows
        .into_iter()
        .filter_map(|row| {
            serde_json::from_value::<ExplorerTransfer>(row)
                .ok()
                .and_then(ExplorerTransfer::into_record)
        })
        .collect();

    if records.len() < total {
        warn!(
            target: "EXPLORER",
            "Dropped {} unparseable transfer rows",
            total - records.len()
        );
    }
    Ok(records)
}

/// Parse an `eth_blockNumber` proxy body
fn parse_block_number(body: &str) -> SourceResult<Option<u64>> {
    let envelope: ExplorerEnvelope =
        serde_json::from_str(body).map_err(|e| SourceError::Malformed(e.to_string()))?;

    let Some(hex) = envelope.result.as_str() else {
        return Ok(None);
    };
    let digits = hex.trim_start_matches("0x").trim_start_matches("0X");
    u64::from_str_radix(digits, 16)
        .map(Some)
        .map_err(|_| SourceError::Malformed(format!("block number {:?}", hex)))
}

/// Explorer API client
pub struct ExplorerClient {
    client: reqwest::Client,
    api_url: String,
    api_key: String,
    contract: String,
}

impl ExplorerClient {
    pub fn new(config: &Config) -> Self {
        Self {
            client: http_client(),
            api_url: config.explorer_api_url.clone(),
            api_key: config.explorer_api_key.clone(),
            contract: config.token_contract.clone(),
        }
    }

    async fn get(&self, query: &[(&str, &str)]) -> SourceResult<String> {
        let response = self
            .client
            .get(&self.api_url)
            .query(query)
            .query(&[("apikey", self.api_key.as_str())])
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(SourceError::Status(response.status()));
        }
        Ok(response.text().await?)
    }
}

#[async_trait]
impl TransferSource for ExplorerClient {
    async fn fetch_transfers(&self, since_height: u64) -> SourceResult<Vec<TransferRecord>> {
        let start = since_height.to_string();
        let body = self
            .get(&[
                ("module", "account"),
                ("action", "tokentx"),
                ("contractaddress", self.contract.as_str()),
                ("startblock", start.as_str()),
                ("endblock", END_BLOCK),
                ("sort", "desc"),
            ])
            .await?;

        let transfers = parse_transfers(&body)?;
        debug!(target: "EXPLORER", "{} transfers since block {}", transfers.len(), since_height);
        Ok(transfers)
    }
}

#[async_trait]
impl HeightSource for ExplorerClient {
    async fn fetch_current_height(&self) -> SourceResult<Option<u64>> {
        let body = self
            .get(&[("module", "proxy"), ("action", "eth_blockNumber")])
            .await?;
        parse_block_number(&body)
    }
}
