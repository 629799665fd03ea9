//! Whale Detector - turns a transfer batch into deduplicated, thresholded alerts

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::{debug, warn};

use crate::modules::dedup::DedupWindow;
use crate::modules::transfer::{format_token_amount, TransferRecord};

/// Severity of an alert, by multiples of the configured USD threshold
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Tier {
    /// `[threshold, 2×threshold)`
    Large,
    /// `[2×threshold, 10×threshold)`
    Whale,
    /// `[10×threshold, ∞)`
    Mega,
}

impl Tier {
    /// Lower bounds are inclusive; `None` below the threshold.
    pub fn classify(usd_value: Decimal, threshold_usd: Decimal) -> Option<Tier> {
        let at_least = |multiple: i64| {
            threshold_usd
                .checked_mul(Decimal::from(multiple))
                .map_or(false, |bound| usd_value >= bound)
        };

        if at_least(10) {
            Some(Tier::Mega)
        } else if at_least(2) {
            Some(Tier::Whale)
        } else if usd_value >= threshold_usd {
            Some(Tier::Large)
        } else {
            None
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Tier::Large => "LARGE",
            Tier::Whale => "WHALE",
            Tier::Mega => "MEGA",
        }
    }

    /// Headline used in notifications
    pub fn title(&self) -> &'static str {
        match self {
            Tier::Large => "LARGE BUY",
            Tier::Whale => "WHALE",
            Tier::Mega => "MEGA WHALE",
        }
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// A qualifying transfer, priced at detection time
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AlertEvent {
    pub transfer: TransferRecord,
    pub token_amount: Decimal,
    pub usd_value: Decimal,
    pub tier: Tier,
    /// Price the event was valued at
    pub price: Decimal,
}

/// Output of one detection pass
#[derive(Debug, Clone, Default)]
pub struct Detection {
    pub alerts: Vec<AlertEvent>,
    pub new_max_height: u64,
    pub duplicates: usize,
    pub below_threshold: usize,
    pub malformed: usize,
}

/// Stateful detector; owns the dedup window across cycles
#[derive(Debug, Clone)]
pub struct WhaleDetector {
    decimals: u32,
    window: DedupWindow,
}

impl WhaleDetector {
    pub fn new(decimals: u32, dedup_capacity: usize) -> Self {
        Self {
            decimals,
            window: DedupWindow::new(dedup_capacity),
        }
    }

    /// Token amount a transfer must reach to be worth `threshold_usd` at `price`
    pub fn min_token_amount(threshold_usd: Decimal, price: Decimal) -> Decimal {
        threshold_usd.checked_div(price).unwrap_or(Decimal::MAX)
    }

    /// Run one batch. The batch order is kept but not assumed chronological.
    pub fn detect(
        &mut self,
        transfers: &[TransferRecord],
        price: Decimal,
        threshold_usd: Decimal,
        prior_max_height: u64,
    ) -> Detection {
        let min_token_amount = Self::min_token_amount(threshold_usd, price);

        let mut detection = Detection {
            new_max_height: transfers
                .iter()
                .map(|t| t.block_height)
                .fold(prior_max_height, u64::max),
            ..Default::default()
        };

        for transfer in transfers {
            let token_amount = match format_token_amount(&transfer.value, self.decimals) {
                Ok(amount) => amount,
                Err(e) => {
                    warn!(target: "DETECTOR", "Skipping {}: {}", transfer.hash, e);
                    detection.malformed += 1;
                    continue;
                }
            };

            if self.window.contains(&transfer.hash) {
                detection.duplicates += 1;
                continue;
            }

            if token_amount < min_token_amount {
                detection.below_threshold += 1;
                continue;
            }

            let usd_value = token_amount.checked_mul(price).unwrap_or(Decimal::MAX);
            // threshold / price can round up past the exact quotient
            let tier = Tier::classify(usd_value, threshold_usd).unwrap_or(Tier::Large);

            self.window.insert(&transfer.hash);
            debug!(
                target: "DETECTOR",
                "{} {} tokens (${}) at height {}",
                tier,
                token_amount,
                usd_value.round_dp(2),
                transfer.block_height
            );

            detection.alerts.push(AlertEvent {
                transfer: transfer.clone(),
                token_amount,
                usd_value,
                tier,
                price,
            });
        }

        detection
    }

    #[cfg(test)]
    pub(crate) fn window(&self) -> &DedupWindow {
        &self.window
    }
}
