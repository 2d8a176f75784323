//! Bounded concurrent fetch batches with a group deadline.
//!
//! [`BatchRunner::run`] fetches every target with at most `concurrency` fetches in flight and
//! returns no later than `deadline` after it was called:
//!
//! ```text
//! Idle ──run()──> Running ──all targets finished──> Completed ──> Done
//!                    │
//!                    └──────deadline fired─────────> TimedOut ───> Done
//! ```
//!
//! # Coordination
//!
//! The calling task is the coordinator and the only writer of the result. For each target it
//! acquires a permit from a counting semaphore sized to the concurrency cap, then spawns a
//! worker onto a [`JoinSet`]. The worker holds the permit for the duration of its fetch and
//! reports the outcome back over an mpsc channel.
//!
//! When the deadline fires the coordinator cancels the shared token, closes the channel and
//! aborts the worker set without awaiting it. Outcomes already buffered in the channel are kept
//! only if they were produced before the deadline; anything that finishes afterwards has nowhere
//! to go and is dropped.
//!
//! A worker that panics is reported as a [`FailureKind::TaskTerminated`] outcome for its target.
//! The only errors `run` returns are invalid arguments and a worker pool that cannot be built.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use metrics::{counter, gauge, histogram};
use tokio::sync::{Semaphore, mpsc};
use tokio::task::JoinSet;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::config::BatchConfig;
use crate::error::{Result, VolleyError};
use crate::http::Fetcher;
use crate::observer::{BatchObserver, TracingObserver};
use crate::outcome::{BatchResult, BatchState, FailureKind, FetchOutcome};
use crate::target::Target;

/// Message sent from a worker to the coordinator.
struct Completion {
    outcome: FetchOutcome,
    elapsed: Duration,
    finished_at: Instant,
}

/// Runs fetch batches over a shared [`Fetcher`].
///
/// A runner holds no per-run state; the same runner can execute any number of runs, including
/// concurrently. Each run owns its own pool, channel and result.
pub struct BatchRunner<F>
where
    F: Fetcher,
{
    fetcher: Arc<F>,
    observer: Arc<dyn BatchObserver>,
    fetches_in_flight: Arc<AtomicUsize>,
}

impl<F> BatchRunner<F>
where
    F: Fetcher + 'static,
{
    /// Create a runner that reports through [`TracingObserver`].
    pub fn new(fetcher: Arc<F>) -> Self {
        Self {
            fetcher,
            observer: Arc::new(TracingObserver),
            fetches_in_flight: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn with_observer(mut self, observer: Arc<dyn BatchObserver>) -> Self {
        self.observer = observer;
        self
    }

    pub fn fetcher(&self) -> &Arc<F> {
        &self.fetcher
    }

    /// Number of fetches currently executing across all runs of this runner.
    pub fn in_flight(&self) -> usize {
        self.fetches_in_flight.load(Ordering::Relaxed)
    }

    /// Run the batch described by `config`.
    ///
    /// Only `targets`, `concurrency` and `deadline_ms` are read here. Fetch settings
    /// (`fetch_timeout_ms`, `drain_body`, `user_agent`) belong to the fetcher and are fixed when
    /// it is built, see [`ReqwestFetcher::from_config`](crate::http::ReqwestFetcher::from_config).
    pub async fn run_config(&self, config: &BatchConfig) -> Result<BatchResult> {
        config.validate()?;
        self.run(config.targets.clone(), config.concurrency, config.deadline())
            .await
    }

    /// Fetch `targets` with at most `concurrency` fetches in flight, returning by `deadline`.
    ///
    /// Duplicate targets are fetched once. Timing out is not an error: the result carries
    /// [`BatchState::TimedOut`] with whatever finished in time.
    ///
    /// # Errors
    /// - [`VolleyError::InvalidConfig`] if `concurrency` is 0 or `deadline` is zero
    /// - [`VolleyError::PoolExhausted`] if the worker pool cannot be created or stops handing
    ///   out permits
    #[tracing::instrument(
        skip(self, targets, deadline),
        fields(targets = targets.len(), deadline_ms = deadline.as_millis() as u64)
    )]
    pub async fn run(
        &self,
        targets: Vec<Target>,
        concurrency: usize,
        deadline: Duration,
    ) -> Result<BatchResult> {
        if concurrency == 0 {
            return Err(VolleyError::InvalidConfig(
                "concurrency must be at least 1".to_string(),
            ));
        }
        if deadline.is_zero() {
            return Err(VolleyError::InvalidConfig(
                "deadline must be greater than 0".to_string(),
            ));
        }

        let started = Instant::now();
        let started_at = chrono::Utc::now();
        let deadline_at = started + deadline;

        let targets = dedupe(targets);
        self.observer.run_started(targets.len(), concurrency, deadline);

        if targets.is_empty() {
            let result = BatchResult::empty(started_at);
            counter!("volley_batches_total", "state" => result.state.as_str()).increment(1);
            self.observer.run_finished(&result);
            return Ok(result);
        }

        // More permits than targets would never be used
        let width = concurrency.min(targets.len());
        if width > Semaphore::MAX_PERMITS {
            return Err(VolleyError::PoolExhausted(format!(
                "requested {} workers, at most {} are supported",
                width,
                Semaphore::MAX_PERMITS
            )));
        }
        let semaphore = Arc::new(Semaphore::new(width));

        let cancel = CancellationToken::new();
        let (tx, mut rx) = mpsc::channel::<Completion>(width);
        let mut workers: JoinSet<()> = JoinSet::new();
        let mut dispatched: HashMap<tokio::task::Id, Target> = HashMap::with_capacity(width);

        let mut queue = targets.iter().cloned();
        let mut next = queue.next();
        let mut outcomes: Vec<FetchOutcome> = Vec::with_capacity(targets.len());
        let mut remaining = targets.len();

        // Targets started but not yet recorded. If this future is dropped before returning
        // (an aborted job), whatever is left is reported as abandoned.
        let observer = self.observer.clone();
        let mut pending = scopeguard::guard(HashSet::<Target>::new(), move |pending| {
            for target in &pending {
                observer.fetch_abandoned(target);
            }
        });

        let expiry = tokio::time::sleep_until(deadline_at);
        tokio::pin!(expiry);

        let mut state = loop {
            if remaining == 0 {
                break BatchState::Completed;
            }
            // The timer only fires on millisecond ticks
            if Instant::now() > deadline_at {
                break BatchState::TimedOut;
            }

            tokio::select! {
                biased;

                _ = &mut expiry => {
                    break BatchState::TimedOut;
                }

                Some(done) = rx.recv() => {
                    if done.finished_at > deadline_at {
                        discard_late(&done);
                        break BatchState::TimedOut;
                    }
                    self.record(&mut outcomes, &mut pending, done.outcome, done.elapsed);
                    remaining -= 1;
                }

                Some(joined) = workers.join_next_with_id(), if !workers.is_empty() => {
                    match joined {
                        Ok((id, ())) => {
                            dispatched.remove(&id);
                        }
                        Err(join_error) => {
                            // A worker that panicked never reported; record it here
                            if let Some(target) = dispatched.remove(&join_error.id()) {
                                tracing::error!(
                                    url = %target,
                                    error = %join_error,
                                    "Fetch task panicked"
                                );
                                let outcome = FetchOutcome::failure(
                                    target,
                                    FailureKind::TaskTerminated,
                                    join_error.to_string(),
                                );
                                self.record(&mut outcomes, &mut pending, outcome, Duration::ZERO);
                                remaining -= 1;
                            }
                        }
                    }
                }

                permit = semaphore.clone().acquire_owned(),
                    if next.is_some() && !cancel.is_cancelled() =>
                {
                    let permit = permit.map_err(|e| VolleyError::PoolExhausted(e.to_string()))?;
                    let Some(target) = next.take() else {
                        continue;
                    };
                    next = queue.next();

                    let fetcher = self.fetcher.clone();
                    let tx = tx.clone();
                    let cancel = cancel.clone();
                    let fetches_in_flight = self.fetches_in_flight.clone();
                    let worker_target = target.clone();

                    fetches_in_flight.fetch_add(1, Ordering::Relaxed);
                    gauge!("volley_fetches_in_flight").increment(1.0);
                    self.observer.fetch_started(&target);
                    pending.insert(target.clone());

                    let handle = workers.spawn(async move {
                        // Permit is held for the duration of this task
                        let _permit = permit;

                        // Ensure we decrement the counter when this task ends, aborted or not
                        let _guard = scopeguard::guard((), |_| {
                            fetches_in_flight.fetch_sub(1, Ordering::Relaxed);
                            gauge!("volley_fetches_in_flight").decrement(1.0);
                        });

                        let fetch_started = Instant::now();

                        let outcome = tokio::select! {
                            biased;
                            _ = cancel.cancelled() => return,
                            outcome = fetcher.fetch(&worker_target) => outcome,
                        };

                        // Receiver is closed once the run has returned; the send then fails
                        // and the outcome is dropped
                        let _ = tx
                            .send(Completion {
                                outcome,
                                elapsed: fetch_started.elapsed(),
                                finished_at: Instant::now(),
                            })
                            .await;
                    });

                    tracing::trace!(url = %target, task_id = %handle.id(), "Dispatched fetch");
                    dispatched.insert(handle.id(), target);
                }
            }
        };

        if state == BatchState::TimedOut {
            cancel.cancel();
            rx.close();

            // Keep outcomes that were produced in time but not yet received
            while let Ok(done) = rx.try_recv() {
                if done.finished_at <= deadline_at {
                    self.record(&mut outcomes, &mut pending, done.outcome, done.elapsed);
                    remaining -= 1;
                } else {
                    discard_late(&done);
                }
            }

            for target in pending.drain() {
                self.observer.fetch_abandoned(&target);
            }

            // Everything was in by the deadline, only the receiving was late
            if remaining == 0 {
                state = BatchState::Completed;
            }
        }

        // Never awaited: aborted workers are torn down by the runtime after we return
        workers.abort_all();
        drop(workers);

        let result =
            BatchResult::from_outcomes(state, &targets, outcomes, started_at, started.elapsed());

        counter!("volley_batches_total", "state" => state.as_str()).increment(1);
        self.observer.run_finished(&result);

        Ok(result)
    }

    fn record(
        &self,
        outcomes: &mut Vec<FetchOutcome>,
        pending: &mut HashSet<Target>,
        outcome: FetchOutcome,
        elapsed: Duration,
    ) {
        pending.remove(outcome.target());
        counter!("volley_fetches_total", "outcome" => outcome.label()).increment(1);
        histogram!("volley_fetch_duration_seconds").record(elapsed.as_secs_f64());
        self.observer.fetch_finished(&outcome, elapsed);
        outcomes.push(outcome);
    }
}

/// Run one batch with a fresh runner over `fetcher`.
///
/// Shorthand for `BatchRunner::new(fetcher).run(targets, concurrency, deadline)`.
pub async fn run_batch<F>(
    fetcher: Arc<F>,
    targets: Vec<Target>,
    concurrency: usize,
    deadline: Duration,
) -> Result<BatchResult>
where
    F: Fetcher + 'static,
{
    BatchRunner::new(fetcher)
        .run(targets, concurrency, deadline)
        .await
}

fn discard_late(done: &Completion) {
    counter!("volley_fetches_discarded_total").increment(1);
    tracing::debug!(
        url = %done.outcome.target(),
        "Discarded outcome produced after the deadline"
    );
}

/// Drop repeated targets, keeping the first occurrence and the input order.
fn dedupe(targets: Vec<Target>) -> Vec<Target> {
    let mut seen = HashSet::with_capacity(targets.len());
    let mut unique = Vec::with_capacity(targets.len());
    for target in targets {
        if seen.insert(target.clone()) {
            unique.push(target);
        } else {
            tracing::warn!(url = %target, "Duplicate target in batch, fetching it once");
        }
    }
    unique
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::MockFetcher;
    use crate::observer::NoopObserver;
    use async_trait::async_trait;
    use parking_lot::Mutex;

    fn targets(urls: &[&str]) -> Vec<Target> {
        urls.iter().copied().map(Target::from).collect()
    }

    fn runner(mock: &MockFetcher) -> BatchRunner<MockFetcher> {
        BatchRunner::new(Arc::new(mock.clone())).with_observer(Arc::new(NoopObserver))
    }

    /// Let the runtime tear down aborted workers.
    async fn settle() {
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    #[test_log::test(tokio::test(start_paused = true))]
    async fn test_empty_batch_completes_immediately() {
        let mock = MockFetcher::new();

        let result = runner(&mock)
            .run(Vec::new(), 4, Duration::from_secs(10))
            .await
            .unwrap();

        assert_eq!(result.state, BatchState::Completed);
        assert!(result.is_empty());
        assert!(result.missing().is_empty());
        assert_eq!(result.elapsed_ms, 0);
        assert_eq!(mock.call_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_generous_deadline_yields_one_outcome_per_target() {
        let mock = MockFetcher::new();
        let urls: Vec<String> = (0..5).map(|i| format!("https://host{}.test/", i)).collect();
        for (i, url) in urls.iter().enumerate() {
            mock.add_delayed_response(
                url.as_str(),
                Duration::from_millis(50 * (i as u64 + 1)),
                MockFetcher::ok(200),
            );
        }
        let input: Vec<Target> = urls.iter().map(|u| Target::new(u)).collect();

        let result = runner(&mock)
            .run(input.clone(), 10, Duration::from_secs(10))
            .await
            .unwrap();

        assert_eq!(result.state, BatchState::Completed);
        assert_eq!(result.len(), 5);
        assert!(result.missing().is_empty());
        for target in &input {
            assert!(result.outcome_for(target).is_some(), "no outcome for {}", target);
        }
        // Everything ran in parallel, so the run takes as long as the slowest fetch
        assert!(result.elapsed() >= Duration::from_millis(250));
        assert!(result.elapsed() < Duration::from_millis(300));
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrency_cap_is_never_exceeded() {
        let mock = MockFetcher::new();
        let urls: Vec<String> = (0..20).map(|i| format!("https://host{}.test/", i)).collect();
        for url in &urls {
            mock.add_delayed_response(
                url.as_str(),
                Duration::from_millis(100),
                MockFetcher::ok(200),
            );
        }
        let input: Vec<Target> = urls.iter().map(|u| Target::new(u)).collect();

        let result = runner(&mock)
            .run(input, 3, Duration::from_secs(10))
            .await
            .unwrap();

        assert_eq!(result.state, BatchState::Completed);
        assert_eq!(result.len(), 20);
        assert_eq!(mock.max_in_flight(), 3);
        // 20 fetches, 3 at a time, 100ms each: 7 waves
        assert!(result.elapsed() >= Duration::from_millis(700));
        assert!(result.elapsed() < Duration::from_millis(800));
    }

    #[tokio::test(start_paused = true)]
    async fn test_short_deadline_returns_partial_results() {
        let mock = MockFetcher::new();
        let urls: Vec<String> = (0..10).map(|i| format!("https://host{}.test/", i)).collect();
        for url in &urls {
            mock.add_delayed_response(url.as_str(), Duration::from_secs(1), MockFetcher::ok(200));
        }
        let input: Vec<Target> = urls.iter().map(|u| Target::new(u)).collect();

        let result = runner(&mock)
            .run(input.clone(), 2, Duration::from_millis(2500))
            .await
            .unwrap();

        assert_eq!(result.state, BatchState::TimedOut);
        // Two waves of two finish at 1s and 2s; the third wave is cut off at 2.5s
        assert_eq!(result.len(), 4);
        assert!(result.len() < input.len());
        assert_eq!(result.missing().len(), 6);
        assert!(result.elapsed() >= Duration::from_millis(2500));
        assert!(result.elapsed() < Duration::from_millis(2600));

        // Every outcome belongs to the input and appears once
        let seen: HashSet<&Target> = result.outcomes.iter().map(FetchOutcome::target).collect();
        assert_eq!(seen.len(), result.len());
        assert!(seen.iter().all(|t| input.contains(t)));

        settle().await;
        // Nothing was dispatched after the deadline
        assert_eq!(mock.call_count(), 6);
        assert_eq!(mock.in_flight_count(), 0);
        assert_eq!(mock.abandoned_count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_completion_between_deadline_and_timer_tick_is_discarded() {
        let mock = MockFetcher::new();
        let trigger = mock.add_response_with_trigger("https://edge.test/", MockFetcher::ok(200));
        let runner = Arc::new(runner(&mock));

        // Deadline falls between two millisecond ticks of the timer
        let deadline = Duration::from_micros(1_000_500);
        let run = tokio::spawn({
            let runner = runner.clone();
            async move { runner.run(targets(&["https://edge.test/"]), 1, deadline).await }
        });

        tokio::time::sleep(Duration::from_millis(1)).await;
        assert_eq!(mock.in_flight_count(), 1);

        // Past the deadline, but before the timer's next tick
        tokio::time::advance(Duration::from_micros(999_600)).await;
        trigger.send(()).unwrap();

        let result = run.await.unwrap().unwrap();
        assert_eq!(result.state, BatchState::TimedOut);
        assert!(result.is_empty());
        assert_eq!(result.missing(), &[Target::new("https://edge.test/")]);
    }

    #[test_log::test(tokio::test(start_paused = true))]
    async fn test_fast_slow_failing_scenario() {
        let mock = MockFetcher::new();
        mock.add_response("https://fast.test/", MockFetcher::ok(200));
        mock.add_delayed_response(
            "https://slow.test/",
            Duration::from_secs(5),
            MockFetcher::ok(200),
        );
        mock.add_delayed_response(
            "https://failing.test/",
            Duration::from_millis(10),
            MockFetcher::err(FailureKind::Transport, "connection refused"),
        );

        let input = targets(&["https://fast.test/", "https://slow.test/", "https://failing.test/"]);
        let result = runner(&mock)
            .run(input, 2, Duration::from_secs(1))
            .await
            .unwrap();

        assert_eq!(result.state, BatchState::TimedOut);
        assert_eq!(result.len(), 2);

        let fast = result.outcome_for(&Target::new("https://fast.test/")).unwrap();
        assert!(fast.is_success());

        let failing = result.outcome_for(&Target::new("https://failing.test/")).unwrap();
        assert_eq!(failing.failure_kind(), Some(FailureKind::Transport));

        assert!(result.outcome_for(&Target::new("https://slow.test/")).is_none());
        assert_eq!(result.missing(), &[Target::new("https://slow.test/")]);
        assert!(result.elapsed() >= Duration::from_secs(1));
        assert!(result.elapsed() < Duration::from_millis(1100));
    }

    #[tokio::test(start_paused = true)]
    async fn test_failures_do_not_stop_the_batch() {
        let mock = MockFetcher::new();
        mock.add_response("https://a.test/", MockFetcher::err(FailureKind::Transport, "dns"));
        mock.add_response("https://b.test/", MockFetcher::ok(500));
        mock.add_response("https://c.test/", MockFetcher::err(FailureKind::Timeout, "slow"));
        mock.add_response("https://d.test/", MockFetcher::ok(200));

        let input = targets(&[
            "https://a.test/",
            "not a url",
            "https://b.test/",
            "https://c.test/",
            "https://d.test/",
        ]);

        let result = runner(&mock)
            .run(input, 1, Duration::from_secs(10))
            .await
            .unwrap();

        assert_eq!(result.state, BatchState::Completed);
        assert_eq!(result.len(), 5);
        assert_eq!(result.successes().count(), 2);
        assert_eq!(
            result
                .outcome_for(&Target::new("not a url"))
                .and_then(FetchOutcome::failure_kind),
            Some(FailureKind::InvalidTarget)
        );
        // The invalid target never reached the network
        assert_eq!(mock.call_count(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_dispatch_follows_input_order() {
        let mock = MockFetcher::new();
        let input = targets(&["https://c.test/", "https://a.test/", "https://b.test/"]);
        for target in &input {
            mock.add_delayed_response(
                target.clone(),
                Duration::from_millis(5),
                MockFetcher::ok(200),
            );
        }

        runner(&mock)
            .run(input.clone(), 1, Duration::from_secs(10))
            .await
            .unwrap();

        assert_eq!(mock.get_calls(), input);
    }

    #[tokio::test(start_paused = true)]
    async fn test_duplicate_targets_are_fetched_once() {
        let mock = MockFetcher::new();
        mock.add_response("https://a.test/", MockFetcher::ok(200));
        mock.add_response("https://b.test/", MockFetcher::ok(200));

        let input = targets(&["https://a.test/", "https://a.test/", "https://b.test/"]);
        let result = runner(&mock)
            .run(input, 4, Duration::from_secs(10))
            .await
            .unwrap();

        assert_eq!(result.state, BatchState::Completed);
        assert_eq!(result.len(), 2);
        assert_eq!(mock.call_count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_late_completion_is_discarded() {
        let mock = MockFetcher::new();
        let trigger = mock.add_response_with_trigger("https://hang.test/", MockFetcher::ok(200));

        let result = runner(&mock)
            .run(targets(&["https://hang.test/"]), 1, Duration::from_millis(100))
            .await
            .unwrap();

        assert_eq!(result.state, BatchState::TimedOut);
        assert!(result.is_empty());

        // Releasing the fetch after the run returned has no effect anywhere
        let _ = trigger.send(());
        settle().await;

        assert!(result.is_empty());
        assert_eq!(result.missing(), &[Target::new("https://hang.test/")]);
        assert_eq!(mock.abandoned_count(), 1);
        assert_eq!(mock.in_flight_count(), 0);
    }

    #[tokio::test]
    async fn test_invalid_arguments_are_rejected() {
        let mock = MockFetcher::new();
        let runner = runner(&mock);

        let err = runner
            .run(targets(&["https://a.test/"]), 0, Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(matches!(err, VolleyError::InvalidConfig(_)));

        let err = runner
            .run(targets(&["https://a.test/"]), 1, Duration::ZERO)
            .await
            .unwrap_err();
        assert!(matches!(err, VolleyError::InvalidConfig(_)));

        assert_eq!(mock.call_count(), 0);
    }

    /// Fetcher that panics for one target and succeeds for the rest.
    struct PanickingFetcher;

    #[async_trait]
    impl Fetcher for PanickingFetcher {
        async fn fetch(&self, target: &Target) -> FetchOutcome {
            if target.as_str().contains("boom") {
                panic!("fetcher blew up");
            }
            FetchOutcome::success(
                target.clone(),
                crate::outcome::ResponseSummary {
                    status: 204,
                    bytes: 0,
                    content_type: None,
                    elapsed_ms: 0,
                },
            )
        }
    }

    #[tokio::test]
    async fn test_panicking_fetch_is_recorded_as_task_terminated() {
        let runner =
            BatchRunner::new(Arc::new(PanickingFetcher)).with_observer(Arc::new(NoopObserver));

        let result = runner
            .run(
                targets(&["https://ok.test/", "https://boom.test/", "https://ok2.test/"]),
                2,
                Duration::from_secs(5),
            )
            .await
            .unwrap();

        assert_eq!(result.state, BatchState::Completed);
        assert_eq!(result.len(), 3);
        assert_eq!(
            result
                .outcome_for(&Target::new("https://boom.test/"))
                .and_then(FetchOutcome::failure_kind),
            Some(FailureKind::TaskTerminated)
        );
        assert_eq!(runner.in_flight(), 0);
    }

    #[derive(Default)]
    struct RecordingObserver {
        started: Mutex<Vec<Target>>,
        finished: Mutex<Vec<Target>>,
        abandoned: Mutex<Vec<Target>>,
        runs: Mutex<Vec<BatchState>>,
    }

    impl BatchObserver for RecordingObserver {
        fn fetch_started(&self, target: &Target) {
            self.started.lock().push(target.clone());
        }

        fn fetch_finished(&self, outcome: &FetchOutcome, _elapsed: Duration) {
            self.finished.lock().push(outcome.target().clone());
        }

        fn fetch_abandoned(&self, target: &Target) {
            self.abandoned.lock().push(target.clone());
        }

        fn run_finished(&self, result: &BatchResult) {
            self.runs.lock().push(result.state);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_observer_sees_start_and_finish_per_target() {
        let mock = MockFetcher::new();
        mock.add_response("https://a.test/", MockFetcher::ok(200));
        mock.add_delayed_response("https://b.test/", Duration::from_secs(30), MockFetcher::ok(200));

        let observer = Arc::new(RecordingObserver::default());
        let runner = BatchRunner::new(Arc::new(mock.clone())).with_observer(observer.clone());

        let result = runner
            .run(
                targets(&["https://a.test/", "https://b.test/"]),
                2,
                Duration::from_secs(1),
            )
            .await
            .unwrap();

        assert_eq!(result.state, BatchState::TimedOut);
        assert_eq!(observer.started.lock().len(), 2);
        assert_eq!(*observer.finished.lock(), targets(&["https://a.test/"]));
        assert_eq!(*observer.abandoned.lock(), targets(&["https://b.test/"]));
        assert_eq!(*observer.runs.lock(), vec![BatchState::TimedOut]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropped_run_reports_in_flight_fetches_as_abandoned() {
        let mock = MockFetcher::new();
        mock.add_response("https://a.test/", MockFetcher::ok(200));
        let _trigger = mock.add_response_with_trigger("https://hang.test/", MockFetcher::ok(200));

        let observer = Arc::new(RecordingObserver::default());
        let runner = BatchRunner::new(Arc::new(mock.clone())).with_observer(observer.clone());

        // The caller gives up long before the batch deadline and drops the run
        let run = runner.run(
            targets(&["https://a.test/", "https://hang.test/"]),
            2,
            Duration::from_secs(60),
        );
        assert!(tokio::time::timeout(Duration::from_secs(1), run).await.is_err());

        assert_eq!(observer.started.lock().len(), 2);
        assert_eq!(*observer.finished.lock(), targets(&["https://a.test/"]));
        assert_eq!(*observer.abandoned.lock(), targets(&["https://hang.test/"]));
        assert!(observer.runs.lock().is_empty());

        settle().await;
        assert_eq!(runner.in_flight(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_config_leaves_fetch_settings_to_the_fetcher() {
        let mock = MockFetcher::new();
        mock.add_delayed_response(
            "https://a.test/",
            Duration::from_millis(50),
            MockFetcher::ok(200),
        );

        // Per-fetch timeout and body draining belong to the fetcher; a run only takes the
        // targets, concurrency and deadline from the config
        let config = BatchConfig {
            targets: targets(&["https://a.test/"]),
            concurrency: 1,
            deadline_ms: 1_000,
            fetch_timeout_ms: Some(1),
            drain_body: false,
            ..Default::default()
        };

        let result = runner(&mock).run_config(&config).await.unwrap();
        assert_eq!(result.state, BatchState::Completed);
        assert!(result.outcome_for(&Target::new("https://a.test/")).unwrap().is_success());
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_config_uses_config_values() {
        let mock = MockFetcher::new();
        mock.add_response("https://a.test/", MockFetcher::ok(200));

        let config = BatchConfig {
            targets: targets(&["https://a.test/"]),
            concurrency: 1,
            deadline_ms: 500,
            ..Default::default()
        };

        let result = runner(&mock).run_config(&config).await.unwrap();
        assert_eq!(result.state, BatchState::Completed);
        assert_eq!(result.len(), 1);

        let bad = BatchConfig {
            concurrency: 0,
            ..config
        };
        assert!(runner(&mock).run_config(&bad).await.is_err());
    }
}
