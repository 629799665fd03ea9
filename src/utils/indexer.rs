//! Indexer REST client (Moralis-style ERC20 transfer API)

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use tracing::{debug, warn};

use crate::config::Config;
use crate::modules::transfer::{TokenValue, TransferRecord};
use crate::utils::explorer::{
    http_client, HeightSource, SourceError, SourceResult, TransferSource,
};

const PAGE_LIMIT: &str = "100";

/// Upper bound on cursor pages followed in one fetch
const MAX_PAGES: usize = 50;

#[derive(Debug, Deserialize)]
struct TransferPage {
    #[serde(default)]
    cursor: Option<String>,
    #[serde(default)]
    result: Vec<serde_json::Value>,
}

/// One page of transfers plus the cursor for the next, if any
#[derive(Debug)]
struct ParsedPage {
    transfers: Vec<TransferRecord>,
    next: Option<String>,
}

#[derive(Debug, Deserialize)]
struct IndexerTransfer {
    transaction_hash: String,
    from_address: String,
    to_address: String,
    value: String,
    block_number: String,
    #[serde(default)]
    block_timestamp: Option<String>,
}

impl IndexerTransfer {
    fn into_record(self) -> Option<TransferRecord> {
        Some(TransferRecord {
            block_height: self.block_number.trim().parse().ok()?,
            value: TokenValue::parse(&self.value).ok()?,
            timestamp: self
                .block_timestamp
                .as_deref()
                .and_then(|ts| DateTime::parse_from_rfc3339(ts).ok())
                .map(|ts| ts.with_timezone(&Utc))
                .unwrap_or_else(Utc::now),
            hash: self.transaction_hash,
            from: self.from_address,
            to: self.to_address,
        })
    }
}

#[derive(Debug, Deserialize)]
struct DateToBlock {
    block: Option<u64>,
}

fn parse_page(body: &str) -> SourceResult<ParsedPage> {
    let page: TransferPage =
        serde_json::from_str(body).map_err(|e| SourceError::Malformed(e.to_string()))?;

    let total = page.result.len();
    let records: Vec<TransferRecord> = page
        .result
        .into_iter()
        .filter_map(|row| {
            serde_json::from_value::<IndexerTransfer>(row)
                .ok()
                .and_then(IndexerTransfer::into_record)
        })
        .collect();

    if records.len() < total {
        warn!(
            target: "INDEXER",
            "Dropped {} unparseable transfer rows",
            total - records.len()
        );
    }

    Ok(ParsedPage {
        transfers: records,
        next: page.cursor.filter(|c| !c.is_empty()),
    })
}

fn parse_height(body: &str) -> SourceResult<Option<u64>> {
    let parsed: DateToBlock =
        serde_json::from_str(body).map_err(|e| SourceError::Malformed(e.to_string()))?;
    Ok(parsed.block)
}

/// Indexer API client
pub struct IndexerClient {
    client: reqwest::Client,
    api_url: String,
    api_key: String,
    chain: String,
    contract: String,
}

impl IndexerClient {
    pub fn new(config: &Config) -> Self {
        Self {
            client: http_client(),
            api_url: config.indexer_api_url.trim_end_matches('/').to_string(),
            api_key: config.indexer_api_key.clone(),
            chain: config.indexer_chain.clone(),
            contract: config.token_contract.clone(),
        }
    }

    async fn get(&self, path: &str, query: &[(&str, &str)]) -> SourceResult<String> {
        let response = self
            .client
            .get(format!("{}{}", self.api_url, path))
            .header("X-API-Key", &self.api_key)
            .query(query)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(SourceError::Status(status));
        }
        Ok(response.text().await?)
    }
}

#[async_trait]
impl TransferSource for IndexerClient {
    /// Follows the cursor until the range is exhausted, so a busy token
    /// never leaves transfers below the returned maximum height unseen
    async fn fetch_transfers(&self, since_height: u64) -> SourceResult<Vec<TransferRecord>> {
        let path = format!("/erc20/{}/transfers", self.contract);
        let from_block = since_height.to_string();
        let mut transfers = Vec::new();
        let mut cursor: Option<String> = None;

        for _ in 0..MAX_PAGES {
            let mut query = vec![
                ("chain", self.chain.as_str()),
                ("from_block", from_block.as_str()),
                ("order", "ASC"),
                ("limit", PAGE_LIMIT),
            ];
            if let Some(cursor) = cursor.as_deref() {
                query.push(("cursor", cursor));
            }

            let page = parse_page(&self.get(&path, &query).await?)?;
            transfers.extend(page.transfers);

            match page.next {
                Some(next) => cursor = Some(next),
                None => {
                    debug!(
                        target: "INDEXER",
                        "{} transfers since block {}",
                        transfers.len(),
                        since_height
                    );
                    return Ok(transfers);
                }
            }
        }

        // A partial range would let the checkpoint skip the unread tail
        Err(SourceError::Malformed(format!(
            "more than {} pages of transfers since block {}",
            MAX_PAGES, since_height
        )))
    }
}

#[async_trait]
impl HeightSource for IndexerClient {
    async fn fetch_current_height(&self) -> SourceResult<Option<u64>> {
        let now = Utc::now().to_rfc3339();
        let body = self
            .get("/dateToBlock", &[("chain", self.chain.as_str()), ("date", now.as_str())])
            .await?;
        parse_height(&body)
    }
}
