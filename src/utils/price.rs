//! Token price sources with fallback

use async_trait::async_trait;
use parking_lot::RwLock;
use rust_decimal::Decimal;
use serde::Deserialize;
use std::str::FromStr;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::config::Config;
use crate::utils::explorer::{http_client, SourceError, SourceResult};

/// Token to USD rate. Implementations may fail; wrap in [`FallbackPriceSource`].
#[async_trait]
pub trait PriceSource: Send + Sync {
    async fn fetch_price(&self) -> SourceResult<Decimal>;
}

/// Fixed price
pub struct StaticPriceSource {
    price: Decimal,
}

impl StaticPriceSource {
    pub fn new(price: Decimal) -> Self {
        Self { price }
    }
}

#[async_trait]
impl PriceSource for StaticPriceSource {
    async fn fetch_price(&self) -> SourceResult<Decimal> {
        Ok(self.price)
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DexPair {
    #[serde(default)]
    price_usd: Option<String>,
}

#[derive(Debug, Deserialize)]
struct DexTokenResponse {
    #[serde(default)]
    pairs: Option<Vec<DexPair>>,
}

fn parse_dexscreener(body: &str) -> SourceResult<Decimal> {
    let response: DexTokenResponse =
        serde_json::from_str(body).map_err(|e| SourceError::Malformed(e.to_string()))?;

    let raw = response
        .pairs
        .unwrap_or_default()
        .into_iter()
        .find_map(|pair| pair.price_usd)
        .ok_or_else(|| SourceError::Api("no priced pairs for token".to_string()))?;

    Decimal::from_str(&raw).map_err(|_| SourceError::Malformed(format!("priceUsd {:?}", raw)))
}

/// DexScreener token endpoint; first listed pair wins
pub struct DexScreenerPriceSource {
    client: reqwest::Client,
    url: String,
}

impl DexScreenerPriceSource {
    pub fn new(config: &Config) -> Self {
        Self {
            client: http_client(),
            url: format!(
                "{}/{}",
                config.price_api_url.trim_end_matches('/'),
                config.token_contract
            ),
        }
    }
}

#[async_trait]
impl PriceSource for DexScreenerPriceSource {
    async fn fetch_price(&self) -> SourceResult<Decimal> {
        let response = self.client.get(&self.url).send().await?;
        if !response.status().is_success() {
            return Err(SourceError::Status(response.status()));
        }
        let price = parse_dexscreener(&response.text().await?)?;
        debug!(target: "PRICE", "DexScreener price ${}", price);
        Ok(price)
    }
}

/// Never fails: bad or missing prices fall back to the last good one, then the default
pub struct FallbackPriceSource {
    inner: Arc<dyn PriceSource>,
    default_price: Decimal,
    last_good: RwLock<Option<Decimal>>,
}

impl FallbackPriceSource {
    pub fn new(inner: Arc<dyn PriceSource>, default_price: Decimal) -> Self {
        Self {
            inner,
            default_price,
            last_good: RwLock::new(None),
        }
    }

    pub async fn price(&self) -> Decimal {
        match self.inner.fetch_price().await {
            Ok(price) if price > Decimal::ZERO => {
                *self.last_good.write() = Some(price);
                price
            }
            Ok(price) => {
                warn!(target: "PRICE", "Ignoring non-positive price {}", price);
                self.cached()
            }
            Err(e) => {
                warn!(target: "PRICE", "Price fetch failed: {}", e);
                self.cached()
            }
        }
    }

    /// Last good price without a fetch
    pub fn cached(&self) -> Decimal {
        (*self.last_good.read()).unwrap_or(self.default_price)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Replays a fixed script of results
    struct Scripted {
        results: Vec<SourceResult<Decimal>>,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl PriceSource for Scripted {
        async fn fetch_price(&self) -> SourceResult<Decimal> {
            let i = self.calls.fetch_add(1, Ordering::SeqCst);
            match &self.results[i] {
                Ok(p) => Ok(*p),
                Err(_) => Err(SourceError::Api("down".to_string())),
            }
        }
    }

    #[tokio::test]
    async fn falls_back_to_default_then_last_good() {
        let source = FallbackPriceSource::new(
            Arc::new(Scripted {
                results: vec![
                    Err(SourceError::Api("down".to_string())),
                    Ok(dec!(0.82)),
                    Err(SourceError::Api("down".to_string())),
                    Ok(dec!(0)),
                ],
                calls: AtomicUsize::new(0),
            }),
            dec!(0.70),
        );

        assert_eq!(source.price().await, dec!(0.70));
        assert_eq!(source.price().await, dec!(0.82));
        assert_eq!(source.price().await, dec!(0.82));
        assert_eq!(source.price().await, dec!(0.82));
    }

    #[tokio::test]
    async fn static_source() {
        let source = StaticPriceSource::new(dec!(1.25));
        assert_eq!(source.fetch_price().await.unwrap(), dec!(1.25));
    }

    #[test]
    fn parses_dexscreener_pairs() {
        let body = r#"{"schemaVersion":"1.0.0","pairs":[{"chainId":"bsc","priceUsd":"0.7123"},{"priceUsd":"0.7"}]}"#;
        assert_eq!(parse_dexscreener(body).unwrap(), dec!(0.7123));
    }

    #[test]
    fn dexscreener_without_pairs_is_an_error() {
        assert!(parse_dexscreener(r#"{"pairs":null}"#).is_err());
        assert!(parse_dexscreener(r#"{"pairs":[{"chainId":"bsc"}]}"#).is_err());
        assert!(parse_dexscreener(r#"{"pairs":[{"priceUsd":"abc"}]}"#).is_err());
    }
}
