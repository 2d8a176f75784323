//! Per-target outcomes and the aggregate result of one batch run.
//!
//! A fetch either completes an HTTP exchange (any status code) and becomes
//! [`FetchOutcome::Success`], or fails before a response arrives and becomes
//! [`FetchOutcome::Failure`]. A batch run collects the outcomes that arrived before its deadline
//! into a [`BatchResult`]; targets with no outcome are listed in [`BatchResult::missing`].

use std::collections::HashSet;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::target::Target;

/// Metadata of a completed HTTP exchange. The body itself is never retained.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResponseSummary {
    /// HTTP status code, recorded as-is (4xx and 5xx are still successes)
    pub status: u16,
    /// Number of body bytes read. Zero when body draining is disabled.
    pub bytes: u64,
    /// Value of the `Content-Type` header, if present and valid UTF-8
    pub content_type: Option<String>,
    /// Wall-clock time from sending the request to finishing the body
    pub elapsed_ms: u64,
}

/// Why a fetch produced no response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// The target is not a well-formed http(s) URL. No network call was made.
    InvalidTarget,
    /// Connection refused, DNS failure, reset, TLS failure, or a broken body stream.
    Transport,
    /// The optional per-fetch timeout elapsed.
    Timeout,
    /// The worker task running the fetch died without reporting (panic).
    TaskTerminated,
}

impl FailureKind {
    /// Low-cardinality label used for logs and metrics.
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureKind::InvalidTarget => "invalid_target",
            FailureKind::Transport => "transport",
            FailureKind::Timeout => "timeout",
            FailureKind::TaskTerminated => "task_terminated",
        }
    }
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of fetching one target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum FetchOutcome {
    Success {
        target: Target,
        summary: ResponseSummary,
    },
    Failure {
        target: Target,
        kind: FailureKind,
        message: String,
    },
}

impl FetchOutcome {
    pub fn success(target: Target, summary: ResponseSummary) -> Self {
        FetchOutcome::Success { target, summary }
    }

    pub fn failure(target: Target, kind: FailureKind, message: impl Into<String>) -> Self {
        FetchOutcome::Failure {
            target,
            kind,
            message: message.into(),
        }
    }

    /// Get the target regardless of variant.
    pub fn target(&self) -> &Target {
        match self {
            FetchOutcome::Success { target, .. } => target,
            FetchOutcome::Failure { target, .. } => target,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, FetchOutcome::Success { .. })
    }

    /// Failure kind, if this is a failure.
    pub fn failure_kind(&self) -> Option<FailureKind> {
        match self {
            FetchOutcome::Success { .. } => None,
            FetchOutcome::Failure { kind, .. } => Some(*kind),
        }
    }

    /// Label used for logs and metrics: `"success"` or the failure kind.
    pub fn label(&self) -> &'static str {
        match self {
            FetchOutcome::Success { .. } => "success",
            FetchOutcome::Failure { kind, .. } => kind.as_str(),
        }
    }
}

/// Terminal state of a batch run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchState {
    /// Every target produced an outcome before the deadline.
    Completed,
    /// The deadline fired with targets still queued or in flight.
    TimedOut,
}

impl BatchState {
    pub fn as_str(&self) -> &'static str {
        match self {
            BatchState::Completed => "completed",
            BatchState::TimedOut => "timed_out",
        }
    }
}

impl std::fmt::Display for BatchState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Everything one run produced before its deadline.
///
/// Owned by the caller once `run` returns. Outcomes arrive in completion order, which is not
/// meaningful; each target appears at most once.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchResult {
    pub state: BatchState,
    pub outcomes: Vec<FetchOutcome>,
    /// Targets that were never dispatched or were still in flight at the deadline, in input order
    pub missing: Vec<Target>,
    pub started_at: DateTime<Utc>,
    pub elapsed_ms: u64,
}

impl BatchResult {
    /// Result of a run over an empty target list.
    pub fn empty(started_at: DateTime<Utc>) -> Self {
        BatchResult {
            state: BatchState::Completed,
            outcomes: Vec::new(),
            missing: Vec::new(),
            started_at,
            elapsed_ms: 0,
        }
    }

    /// Build a result from recorded outcomes, deriving `missing` from the input targets.
    pub(crate) fn from_outcomes(
        state: BatchState,
        targets: &[Target],
        outcomes: Vec<FetchOutcome>,
        started_at: DateTime<Utc>,
        elapsed: Duration,
    ) -> Self {
        let finished: HashSet<&Target> = outcomes.iter().map(FetchOutcome::target).collect();
        let missing = targets
            .iter()
            .filter(|t| !finished.contains(t))
            .cloned()
            .collect();

        BatchResult {
            state,
            outcomes,
            missing,
            started_at,
            elapsed_ms: u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX),
        }
    }

    pub fn is_timed_out(&self) -> bool {
        self.state == BatchState::TimedOut
    }

    pub fn elapsed(&self) -> Duration {
        Duration::from_millis(self.elapsed_ms)
    }

    pub fn missing(&self) -> &[Target] {
        &self.missing
    }

    pub fn successes(&self) -> impl Iterator<Item = &FetchOutcome> {
        self.outcomes.iter().filter(|o| o.is_success())
    }

    pub fn failures(&self) -> impl Iterator<Item = &FetchOutcome> {
        self.outcomes.iter().filter(|o| !o.is_success())
    }

    /// Outcome recorded for `target`, if any.
    pub fn outcome_for(&self, target: &Target) -> Option<&FetchOutcome> {
        self.outcomes.iter().find(|o| o.target() == target)
    }

    pub fn len(&self) -> usize {
        self.outcomes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.outcomes.is_empty()
    }
}
