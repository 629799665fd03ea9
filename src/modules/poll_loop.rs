//! Poll Loop - timer-driven detection cycles with an overlap guard
//!
//! One cycle: fetch price -> fetch transfers since the checkpoint -> detect ->
//! persist the checkpoint -> fan out notifications. At most one cycle is in
//! flight; a timer fire that finds a cycle running is dropped.

use chrono::Utc;
use futures_util::stream::{self, StreamExt};
use parking_lot::RwLock;
use rust_decimal::prelude::*;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::log_whale;
use crate::modules::rolling_stats::RollingStats;
use crate::modules::whale_detector::{AlertEvent, WhaleDetector};
use crate::utils::alerts::{AlertFormat, DeliveryOutcome, Notifier};
use crate::utils::explorer::{HeightSource, TransferSource};
use crate::utils::metrics::MetricsService;
use crate::utils::price::FallbackPriceSource;
use crate::utils::storage::{CheckpointStore, RecipientId, SubscriberRegistry};

/// Scheduler state as seen from outside
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum LoopState {
    Idle,
    CycleRunning,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleOutcome {
    /// No checkpoint yet; seeded from the chain head, nothing alerted
    Bootstrapped,
    /// No checkpoint and the head height was unavailable
    AwaitingHeight,
    Completed,
    /// Transfer fetch failed; treated as an empty batch
    SourceUnavailable,
}

impl CycleOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            CycleOutcome::Bootstrapped => "bootstrapped",
            CycleOutcome::AwaitingHeight => "awaiting_height",
            CycleOutcome::Completed => "completed",
            CycleOutcome::SourceUnavailable => "source_unavailable",
        }
    }
}

/// What one cycle did
#[derive(Debug, Clone)]
pub struct CycleReport {
    pub outcome: CycleOutcome,
    pub transfers: usize,
    pub alerts: Vec<AlertEvent>,
    pub checkpoint: Option<u64>,
    pub delivered: usize,
    pub permanent_failures: usize,
    pub transient_failures: usize,
}

impl CycleReport {
    fn new(outcome: CycleOutcome, checkpoint: Option<u64>) -> Self {
        Self {
            outcome,
            transfers: 0,
            alerts: Vec::new(),
            checkpoint,
            delivered: 0,
            permanent_failures: 0,
            transient_failures: 0,
        }
    }
}

#[derive(Debug, Clone)]
pub struct PollSettings {
    pub interval: Duration,
    pub threshold_usd: Decimal,
    pub delivery_concurrency: usize,
    pub token_decimals: u32,
    pub dedup_capacity: usize,
}

impl PollSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            interval: Duration::from_secs(config.poll_interval_secs),
            threshold_usd: config.min_alert_usd,
            delivery_concurrency: config.delivery_concurrency.max(1),
            token_decimals: config.token_decimals,
            dedup_capacity: config.dedup_capacity,
        }
    }
}

/// Adapters the loop drives
pub struct PollServices {
    pub transfers: Arc<dyn TransferSource>,
    pub heights: Arc<dyn HeightSource>,
    pub price: Arc<FallbackPriceSource>,
    pub notifier: Arc<dyn Notifier>,
    pub checkpoints: Arc<dyn CheckpointStore>,
    pub registry: Arc<SubscriberRegistry>,
    pub metrics: Arc<MetricsService>,
    pub format: AlertFormat,
}

/// Poll Loop module
pub struct PollLoop {
    settings: PollSettings,
    transfers: Arc<dyn TransferSource>,
    heights: Arc<dyn HeightSource>,
    price: Arc<FallbackPriceSource>,
    notifier: Arc<dyn Notifier>,
    checkpoints: Arc<dyn CheckpointStore>,
    registry: Arc<SubscriberRegistry>,
    metrics: Arc<MetricsService>,
    format: AlertFormat,

    is_running: Arc<AtomicBool>,
    ticks_skipped: Arc<AtomicU64>,
    // Held for the duration of a cycle
    detector: Arc<Mutex<WhaleDetector>>,
    checkpoint: Arc<RwLock<Option<u64>>>,
    stats: Arc<RwLock<RollingStats>>,
}

impl PollLoop {
    /// Create the loop and read back the persisted checkpoint
    pub fn new(settings: PollSettings, services: PollServices) -> Self {
        let checkpoint = match services.checkpoints.load() {
            Ok(Some(saved)) => {
                info!(
                    target: "POLL_LOOP",
                    "Resuming from block {} (saved {})",
                    saved.height,
                    saved.written_at
                );
                Some(saved.height)
            }
            Ok(None) => {
                info!(target: "POLL_LOOP", "No checkpoint yet - first cycle will bootstrap");
                None
            }
            Err(e) => {
                error!(target: "POLL_LOOP", "Failed to load checkpoint, bootstrapping: {}", e);
                None
            }
        };

        if let Some(height) = checkpoint {
            services.metrics.checkpoint_height.set(height as i64);
        }
        services.metrics.subscribers.set(services.registry.len() as i64);

        Self {
            detector: Arc::new(Mutex::new(WhaleDetector::new(
                settings.token_decimals,
                settings.dedup_capacity,
            ))),
            settings,
            transfers: services.transfers,
            heights: services.heights,
            price: services.price,
            notifier: services.notifier,
            checkpoints: services.checkpoints,
            registry: services.registry,
            metrics: services.metrics,
            format: services.format,
            is_running: Arc::new(AtomicBool::new(false)),
            ticks_skipped: Arc::new(AtomicU64::new(0)),
            checkpoint: Arc::new(RwLock::new(checkpoint)),
            stats: Arc::new(RwLock::new(RollingStats::new())),
        }
    }

    /// Fire the timer until [`stop`](Self::stop) is called
    pub async fn run(&self) {
        if self.is_running.swap(true, Ordering::SeqCst) {
            warn!(target: "POLL_LOOP", "Already running");
            return;
        }

        info!(
            target: "POLL_LOOP",
            "Polling every {}s, threshold ${}",
            self.settings.interval.as_secs(),
            self.settings.threshold_usd
        );

        let mut timer = interval(self.settings.interval);
        timer.set_missed_tick_behavior(MissedTickBehavior::Skip);

        while self.is_running.load(Ordering::SeqCst) {
            timer.tick().await;
            if !self.is_running.load(Ordering::SeqCst) {
                break;
            }
            // Detached; the next tick sees the cycle through its lock
            drop(self.tick());
        }
    }

    pub fn stop(&self) {
        self.is_running.store(false, Ordering::SeqCst);
        info!(target: "POLL_LOOP", "Poll loop stopping...");
    }

    /// One timer fire. Returns `None` when a cycle is already running.
    pub fn tick(&self) -> Option<JoinHandle<CycleReport>> {
        let mut detector = match Arc::clone(&self.detector).try_lock_owned() {
            Ok(guard) => guard,
            Err(_) => {
                let skipped = self.ticks_skipped.fetch_add(1, Ordering::SeqCst) + 1;
                self.metrics.ticks_skipped.inc();
                debug!(target: "POLL_LOOP", "Cycle still running, tick dropped ({} total)", skipped);
                return None;
            }
        };

        let this = self.clone();
        Some(tokio::spawn(async move { this.execute(&mut detector).await }))
    }

    /// Run one cycle now, waiting for any in-flight cycle first
    #[cfg(test)]
    pub(crate) async fn run_cycle(&self) -> CycleReport {
        let mut detector = self.detector.lock().await;
        self.execute(&mut detector).await
    }

    async fn execute(&self, detector: &mut WhaleDetector) -> CycleReport {
        let report = self.cycle(detector).await;
        self.metrics.record_cycle(report.outcome.label());
        debug!(
            target: "POLL_LOOP",
            "Cycle {}: {} transfers, {} alerts, checkpoint {:?}",
            report.outcome.label(),
            report.transfers,
            report.alerts.len(),
            report.checkpoint
        );
        report
    }

    async fn cycle(&self, detector: &mut WhaleDetector) -> CycleReport {
        let now = Utc::now();

        let price = self.price.price().await;
        self.metrics.price_usd.set(price.to_f64().unwrap_or_default());

        self.stats.write().prune_expired(now);

        let prior = *self.checkpoint.read();
        let prior = match prior {
            Some(height) => height,
            None => return self.bootstrap().await,
        };

        let (transfers, outcome) = match self.transfers.fetch_transfers(prior).await {
            Ok(transfers) => (transfers, CycleOutcome::Completed),
            Err(e) => {
                warn!(target: "POLL_LOOP", "Transfer fetch failed, treating as empty: {}", e);
                self.metrics.record_upstream_error("transfers");
                (Vec::new(), CycleOutcome::SourceUnavailable)
            }
        };
        self.metrics.transfers_seen.inc_by(transfers.len() as u64);

        let detection = detector.detect(&transfers, price, self.settings.threshold_usd, prior);

        let mut report = CycleReport::new(outcome, Some(prior));
        report.transfers = transfers.len();

        if detection.new_max_height > prior {
            self.advance_checkpoint(detection.new_max_height);
            report.checkpoint = Some(detection.new_max_height);
        }

        if detection.alerts.is_empty() {
            return report;
        }

        {
            let mut stats = self.stats.write();
            for alert in &detection.alerts {
                stats.record(alert, now);
            }
        }

        for alert in &detection.alerts {
            self.metrics.record_alert(alert.tier);
            log_whale!("{} | {}", self.format.summary(alert), alert.transfer.hash);
            self.dispatch(alert, &mut report).await;
        }

        report.alerts = detection.alerts;
        report
    }

    async fn bootstrap(&self) -> CycleReport {
        match self.heights.fetch_current_height().await {
            Ok(Some(height)) => {
                self.advance_checkpoint(height);
                info!(target: "POLL_LOOP", "Bootstrapped checkpoint at block {}", height);
                CycleReport::new(CycleOutcome::Bootstrapped, Some(height))
            }
            Ok(None) => {
                warn!(target: "POLL_LOOP", "Head height unavailable, bootstrap deferred");
                CycleReport::new(CycleOutcome::AwaitingHeight, None)
            }
            Err(e) => {
                warn!(target: "POLL_LOOP", "Head height fetch failed, bootstrap deferred: {}", e);
                self.metrics.record_upstream_error("height");
                CycleReport::new(CycleOutcome::AwaitingHeight, None)
            }
        }
    }

    /// Memory first, then the store; a failed save keeps the in-memory value
    fn advance_checkpoint(&self, height: u64) {
        *self.checkpoint.write() = Some(height);
        self.metrics.checkpoint_height.set(height as i64);

        if let Err(e) = self.checkpoints.save(height) {
            error!(
                target: "POLL_LOOP",
                "Failed to persist checkpoint {} (kept in memory): {}",
                height,
                e
            );
        }
    }

    async fn dispatch(&self, alert: &AlertEvent, report: &mut CycleReport) {
        let recipients = self.registry.snapshot();
        if recipients.is_empty() {
            return;
        }

        let alert = Arc::new(alert.clone());
        let outcomes: Vec<(RecipientId, DeliveryOutcome)> = stream::iter(recipients)
            .map(|recipient| {
                let notifier = Arc::clone(&self.notifier);
                let alert = Arc::clone(&alert);
                async move { (recipient, notifier.deliver(recipient, &alert).await) }
            })
            .buffer_unordered(self.settings.delivery_concurrency)
            .collect()
            .await;

        for (recipient, outcome) in outcomes {
            self.metrics.record_delivery(&outcome);
            match outcome {
                DeliveryOutcome::Delivered => report.delivered += 1,
                DeliveryOutcome::Permanent(reason) => {
                    report.permanent_failures += 1;
                    self.registry.remove_unreachable(recipient, &reason);
                }
                DeliveryOutcome::Transient(reason) => {
                    report.transient_failures += 1;
                    warn!(target: "POLL_LOOP", "Delivery to {} failed: {}", recipient, reason);
                }
            }
        }

        self.metrics.subscribers.set(self.registry.len() as i64);
    }

    /// Persist the in-memory checkpoint and subscriber set
    pub fn flush(&self) {
        if let Some(height) = *self.checkpoint.read() {
            match self.checkpoints.save(height) {
                Ok(_) => info!(target: "POLL_LOOP", "Checkpoint {} flushed", height),
                Err(e) => error!(target: "POLL_LOOP", "Failed to flush checkpoint: {}", e),
            }
        }
        match self.registry.flush() {
            Ok(()) => info!(target: "POLL_LOOP", "{} subscribers flushed", self.registry.len()),
            Err(e) => error!(target: "POLL_LOOP", "Failed to flush subscribers: {}", e),
        }
    }

    pub fn state(&self) -> LoopState {
        match self.detector.try_lock() {
            Ok(_) => LoopState::Idle,
            Err(_) => LoopState::CycleRunning,
        }
    }

    pub fn is_running(&self) -> bool {
        self.is_running.load(Ordering::SeqCst)
    }

    pub fn checkpoint(&self) -> Option<u64> {
        *self.checkpoint.read()
    }

    pub fn ticks_skipped(&self) -> u64 {
        self.ticks_skipped.load(Ordering::SeqCst)
    }

    pub fn threshold_usd(&self) -> Decimal {
        self.settings.threshold_usd
    }

    pub fn registry(&self) -> &Arc<SubscriberRegistry> {
        &self.registry
    }

    pub fn price_source(&self) -> &Arc<FallbackPriceSource> {
        &self.price
    }

    pub fn metrics(&self) -> &Arc<MetricsService> {
        &self.metrics
    }

    /// Shared handle to the rolling statistics
    pub fn stats(&self) -> Arc<RwLock<RollingStats>> {
        Arc::clone(&self.stats)
    }
}

impl Clone for PollLoop {
    fn clone(&self) -> Self {
        Self {
            settings: self.settings.clone(),
            transfers: Arc::clone(&self.transfers),
            heights: Arc::clone(&self.heights),
            price: Arc::clone(&self.price),
            notifier: Arc::clone(&self.notifier),
            checkpoints: Arc::clone(&self.checkpoints),
            registry: Arc::clone(&self.registry),
            metrics: Arc::clone(&self.metrics),
            format: self.format.clone(),
            is_running: Arc::clone(&self.is_running),
            ticks_skipped: Arc::clone(&self.ticks_skipped),
            detector: Arc::clone(&self.detector),
            checkpoint: Arc::clone(&self.checkpoint),
            stats: Arc::clone(&self.stats),
        }
    }
}
