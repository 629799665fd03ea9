//! Process-lifetime alert statistics with a trailing 24h window

use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

use crate::modules::whale_detector::AlertEvent;

/// Biggest single alert seen since start
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LargestBuy {
    pub token_amount: Decimal,
    pub usd_value: Decimal,
    pub hash: String,
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct WindowEntry {
    usd_value: Decimal,
    recorded_at: DateTime<Utc>,
}

/// Read-only view for commands and the dashboard
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatsSnapshot {
    pub count: usize,
    pub volume_usd: Decimal,
    pub total_alerts: u64,
    pub largest_buy: Option<LargestBuy>,
}

#[derive(Debug, Clone)]
pub struct RollingStats {
    total_alerts: u64,
    largest_buy: Option<LargestBuy>,
    window: VecDeque<WindowEntry>,
    horizon: Duration,
}

impl RollingStats {
    pub fn new() -> Self {
        Self::with_horizon(Duration::hours(24))
    }

    pub fn with_horizon(horizon: Duration) -> Self {
        Self {
            total_alerts: 0,
            largest_buy: None,
            window: VecDeque::new(),
            horizon,
        }
    }

    pub fn record(&mut self, event: &AlertEvent, now: DateTime<Utc>) {
        self.total_alerts += 1;
        self.window.push_back(WindowEntry {
            usd_value: event.usd_value,
            recorded_at: now,
        });

        let is_record = self
            .largest_buy
            .as_ref()
            .map_or(true, |best| event.usd_value > best.usd_value);
        if is_record {
            self.largest_buy = Some(LargestBuy {
                token_amount: event.token_amount,
                usd_value: event.usd_value,
                hash: event.transfer.hash.clone(),
            });
        }
    }

    /// Drop entries older than the horizon. Idempotent.
    pub fn prune_expired(&mut self, now: DateTime<Utc>) {
        let cutoff = now - self.horizon;
        self.window.retain(|entry| entry.recorded_at > cutoff);
    }

    /// Pure read; expired entries are excluded even if not yet pruned.
    pub fn snapshot(&self, now: DateTime<Utc>) -> StatsSnapshot {
        let cutoff = now - self.horizon;
        let live = self.window.iter().filter(|entry| entry.recorded_at > cutoff);

        let (count, volume_usd) = live.fold((0usize, Decimal::ZERO), |(count, volume), entry| {
            (count + 1, volume.saturating_add(entry.usd_value))
        });

        StatsSnapshot {
            count,
            volume_usd,
            total_alerts: self.total_alerts,
            largest_buy: self.largest_buy.clone(),
        }
    }

    #[cfg(test)]
    pub(crate) fn total_alerts(&self) -> u64 {
        self.total_alerts
    }

    #[cfg(test)]
    pub(crate) fn window_len(&self) -> usize {
        self.window.len()
    }
}

impl Default for RollingStats {
    fn default() -> Self {
        Self::new()
    }
}
