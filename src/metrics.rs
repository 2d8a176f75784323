//! Prometheus metrics for batch runs.
//!
//! [`VolleyMetrics`] is a [`BatchObserver`] backed by a Prometheus registry. Attach it to a
//! runner (alongside [`TracingObserver`](crate::observer::TracingObserver) via
//! [`ObserverSet`](crate::observer::ObserverSet) if logs are wanted too) and export the registry
//! from whatever HTTP surface the process already has.
//!
//! - **Gauges**: fetches in flight
//! - **Counters**: fetches by outcome, batches by terminal state, abandoned fetches
//! - **Histograms**: fetch duration

use prometheus::{Counter, CounterVec, Gauge, Histogram, HistogramOpts, Opts, Registry};
use std::time::Duration;

use crate::error::Result;
use crate::observer::BatchObserver;
use crate::outcome::{BatchResult, FetchOutcome};
use crate::target::Target;

/// Prometheus metrics registry for batch runs.
#[derive(Clone)]
pub struct VolleyMetrics {
    registry: Registry,

    // Gauges (point-in-time state)
    fetches_in_flight: Gauge,

    // Counters (cumulative totals)
    fetches_total: CounterVec,
    fetches_abandoned_total: Counter,
    batches_total: CounterVec,

    // Histograms (distributions)
    fetch_duration_seconds: Histogram,
}

impl VolleyMetrics {
    /// Create a new VolleyMetrics instance with the given registry.
    ///
    /// # Errors
    ///
    /// Returns an error if metrics fail to register (e.g., duplicate registration).
    pub fn new(registry: Registry) -> Result<Self> {
        let fetches_in_flight = Gauge::with_opts(Opts::new(
            "volley_fetches_in_flight",
            "Number of fetches currently executing",
        ))
        .map_err(|e| anyhow::anyhow!("Failed to create fetches_in_flight gauge: {}", e))?;

        let fetches_total = CounterVec::new(
            Opts::new(
                "volley_fetches_total",
                "Total number of fetches recorded, by outcome",
            ),
            &["outcome"],
        )
        .map_err(|e| anyhow::anyhow!("Failed to create fetches_total counter: {}", e))?;

        let fetches_abandoned_total = Counter::with_opts(Opts::new(
            "volley_fetches_abandoned_total",
            "Total number of fetches cancelled at a batch deadline",
        ))
        .map_err(|e| anyhow::anyhow!("Failed to create fetches_abandoned_total counter: {}", e))?;

        let batches_total = CounterVec::new(
            Opts::new(
                "volley_batches_total",
                "Total number of batch runs, by terminal state",
            ),
            &["state"],
        )
        .map_err(|e| anyhow::anyhow!("Failed to create batches_total counter: {}", e))?;

        let fetch_duration_seconds = Histogram::with_opts(
            HistogramOpts::new(
                "volley_fetch_duration_seconds",
                "Fetch duration in seconds, for fetches that finished",
            )
            .buckets(vec![0.05, 0.1, 0.25, 0.5, 1.0, 2.0, 5.0, 10.0, 30.0]),
        )
        .map_err(|e| anyhow::anyhow!("Failed to create fetch_duration_seconds histogram: {}", e))?;

        registry
            .register(Box::new(fetches_in_flight.clone()))
            .map_err(|e| anyhow::anyhow!("Failed to register fetches_in_flight: {}", e))?;
        registry
            .register(Box::new(fetches_total.clone()))
            .map_err(|e| anyhow::anyhow!("Failed to register fetches_total: {}", e))?;
        registry
            .register(Box::new(fetches_abandoned_total.clone()))
            .map_err(|e| anyhow::anyhow!("Failed to register fetches_abandoned_total: {}", e))?;
        registry
            .register(Box::new(batches_total.clone()))
            .map_err(|e| anyhow::anyhow!("Failed to register batches_total: {}", e))?;
        registry
            .register(Box::new(fetch_duration_seconds.clone()))
            .map_err(|e| anyhow::anyhow!("Failed to register fetch_duration_seconds: {}", e))?;

        Ok(Self {
            registry,
            fetches_in_flight,
            fetches_total,
            fetches_abandoned_total,
            batches_total,
            fetch_duration_seconds,
        })
    }

    /// Get the underlying Prometheus registry.
    pub fn registry(&self) -> &Registry {
        &self.registry
    }
}

impl BatchObserver for VolleyMetrics {
    fn fetch_started(&self, _target: &Target) {
        self.fetches_in_flight.inc();
    }

    fn fetch_finished(&self, outcome: &FetchOutcome, elapsed: Duration) {
        self.fetches_in_flight.dec();
        self.fetches_total
            .with_label_values(&[outcome.label()])
            .inc();
        self.fetch_duration_seconds.observe(elapsed.as_secs_f64());
    }

    fn fetch_abandoned(&self, _target: &Target) {
        self.fetches_in_flight.dec();
        self.fetches_abandoned_total.inc();
    }

    fn run_finished(&self, result: &BatchResult) {
        self.batches_total
            .with_label_values(&[result.state.as_str()])
            .inc();
    }
}
