//! Observation hooks for batch runs.
//!
//! The runner reports what it does through a [`BatchObserver`] handed to it at construction,
//! rather than through process-global state. Hooks are plain synchronous calls made from the
//! coordinator or from worker tasks; implementations must return quickly and never block.

use std::time::Duration;

use crate::outcome::{BatchResult, FetchOutcome};
use crate::target::Target;

/// Receives per-target and per-run events from a [`BatchRunner`](crate::runner::BatchRunner).
///
/// All methods have empty default bodies so implementations only override what they need.
pub trait BatchObserver: Send + Sync {
    /// A run started with `targets` distinct targets.
    fn run_started(&self, _targets: usize, _concurrency: usize, _deadline: Duration) {}

    /// A worker is about to fetch `target`.
    fn fetch_started(&self, _target: &Target) {}

    /// A fetch finished and its outcome was recorded.
    fn fetch_finished(&self, _outcome: &FetchOutcome, _elapsed: Duration) {}

    /// A fetch was still running when the deadline fired and has been cancelled.
    fn fetch_abandoned(&self, _target: &Target) {}

    /// The run reached a terminal state.
    fn run_finished(&self, _result: &BatchResult) {}
}

/// Observer that writes every event to `tracing`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingObserver;

impl BatchObserver for TracingObserver {
    fn run_started(&self, targets: usize, concurrency: usize, deadline: Duration) {
        tracing::info!(
            targets,
            concurrency,
            deadline_ms = deadline.as_millis() as u64,
            "Batch run starting"
        );
    }

    fn fetch_started(&self, target: &Target) {
        tracing::info!(url = %target, "Opening");
    }

    fn fetch_finished(&self, outcome: &FetchOutcome, elapsed: Duration) {
        match outcome {
            FetchOutcome::Success { target, summary } => {
                tracing::info!(
                    url = %target,
                    status = summary.status,
                    bytes = summary.bytes,
                    content_type = summary.content_type.as_deref().unwrap_or("-"),
                    elapsed_ms = elapsed.as_millis() as u64,
                    "Done with target"
                );
            }
            FetchOutcome::Failure {
                target,
                kind,
                message,
            } => {
                tracing::warn!(
                    url = %target,
                    kind = %kind,
                    error = %message,
                    elapsed_ms = elapsed.as_millis() as u64,
                    "Fetch failed"
                );
            }
        }
    }

    fn fetch_abandoned(&self, target: &Target) {
        tracing::debug!(url = %target, "Fetch abandoned at deadline");
    }

    fn run_finished(&self, result: &BatchResult) {
        if result.is_timed_out() {
            tracing::warn!(
                state = %result.state,
                completed = result.len(),
                missing = result.missing().len(),
                elapsed_ms = result.elapsed_ms,
                "Batch run hit its deadline, returning partial results"
            );
        } else {
            tracing::info!(
                state = %result.state,
                completed = result.len(),
                failed = result.failures().count(),
                elapsed_ms = result.elapsed_ms,
                "Batch run completed"
            );
        }
    }
}

/// Observer that ignores everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopObserver;

impl BatchObserver for NoopObserver {}

/// Fans events out to several observers, in order.
#[derive(Default, Clone)]
pub struct ObserverSet {
    observers: Vec<std::sync::Arc<dyn BatchObserver>>,
}

impl ObserverSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, observer: std::sync::Arc<dyn BatchObserver>) -> Self {
        self.observers.push(observer);
        self
    }
}

impl BatchObserver for ObserverSet {
    fn run_started(&self, targets: usize, concurrency: usize, deadline: Duration) {
        for o in &self.observers {
            o.run_started(targets, concurrency, deadline);
        }
    }

    fn fetch_started(&self, target: &Target) {
        for o in &self.observers {
            o.fetch_started(target);
        }
    }

    fn fetch_finished(&self, outcome: &FetchOutcome, elapsed: Duration) {
        for o in &self.observers {
            o.fetch_finished(outcome, elapsed);
        }
    }

    fn fetch_abandoned(&self, target: &Target) {
        for o in &self.observers {
            o.fetch_abandoned(target);
        }
    }

    fn run_finished(&self, result: &BatchResult) {
        for o in &self.observers {
            o.run_finished(result);
        }
    }
}
