//! Prometheus metrics service for Whale Alert

use prometheus::{
    Encoder, Gauge, IntCounter, IntCounterVec, IntGauge, Opts, Registry, TextEncoder,
};
use std::time::Instant;
use tracing::info;

use crate::modules::whale_detector::Tier;
use crate::utils::alerts::DeliveryOutcome;

/// Metrics service for Prometheus
#[derive(Clone)]
pub struct MetricsService {
    registry: Registry,
    start_time: Instant,

    // Poll loop
    pub cycles: IntCounterVec,
    pub ticks_skipped: IntCounter,
    pub transfers_seen: IntCounter,
    pub upstream_errors: IntCounterVec,
    pub checkpoint_height: IntGauge,
    pub price_usd: Gauge,

    // Alerts
    pub alerts: IntCounterVec,
    pub deliveries: IntCounterVec,
    pub subscribers: IntGauge,

    // System
    pub uptime: Gauge,
}

impl MetricsService {
    pub fn new() -> prometheus::Result<Self> {
        let registry = Registry::new();

        let cycles = IntCounterVec::new(
            Opts::new("whale_alert_cycles_total", "Poll cycles by outcome"),
            &["outcome"],
        )?;
        let ticks_skipped = IntCounter::new(
            "whale_alert_ticks_skipped_total",
            "Timer fires dropped because a cycle was still running",
        )?;
        let transfers_seen =
            IntCounter::new("whale_alert_transfers_seen_total", "Transfers fetched from upstream")?;
        let upstream_errors = IntCounterVec::new(
            Opts::new("whale_alert_upstream_errors_total", "Failed upstream calls"),
            &["source"],
        )?;
        let checkpoint_height =
            IntGauge::new("whale_alert_checkpoint_height", "Last processed block height")?;
        let price_usd = Gauge::new("whale_alert_price_usd", "Token price used by the last cycle")?;

        let alerts = IntCounterVec::new(
            Opts::new("whale_alert_alerts_total", "Alerts emitted by tier"),
            &["tier"],
        )?;
        let deliveries = IntCounterVec::new(
            Opts::new("whale_alert_deliveries_total", "Per-recipient deliveries by outcome"),
            &["outcome"],
        )?;
        let subscribers = IntGauge::new("whale_alert_subscribers", "Current subscriber count")?;

        let uptime = Gauge::new("whale_alert_uptime_seconds", "Application uptime")?;

        registry.register(Box::new(cycles.clone()))?;
        registry.register(Box::new(ticks_skipped.clone()))?;
        registry.register(Box::new(transfers_seen.clone()))?;
        registry.register(Box::new(upstream_errors.clone()))?;
        registry.register(Box::new(checkpoint_height.clone()))?;
        registry.register(Box::new(price_usd.clone()))?;
        registry.register(Box::new(alerts.clone()))?;
        registry.register(Box::new(deliveries.clone()))?;
        registry.register(Box::new(subscribers.clone()))?;
        registry.register(Box::new(uptime.clone()))?;

        info!(target: "METRICS", "Prometheus metrics initialized");

        Ok(Self {
            registry,
            start_time: Instant::now(),
            cycles,
            ticks_skipped,
            transfers_seen,
            upstream_errors,
            checkpoint_height,
            price_usd,
            alerts,
            deliveries,
            subscribers,
            uptime,
        })
    }

    pub fn record_cycle(&self, outcome: &str) {
        self.cycles.with_label_values(&[outcome]).inc();
    }

    pub fn record_upstream_error(&self, source: &str) {
        self.upstream_errors.with_label_values(&[source]).inc();
    }

    pub fn record_alert(&self, tier: Tier) {
        self.alerts.with_label_values(&[tier.label()]).inc();
    }

    pub fn record_delivery(&self, outcome: &DeliveryOutcome) {
        self.deliveries.with_label_values(&[outcome.label()]).inc();
    }

    pub fn uptime_secs(&self) -> f64 {
        self.start_time.elapsed().as_secs_f64()
    }

    /// Metrics in Prometheus text format
    pub fn render(&self) -> prometheus::Result<String> {
        self.uptime.set(self.uptime_secs());

        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        encoder.encode(&metric_families, &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
    }
}
