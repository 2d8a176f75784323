//! Fetcher abstraction for issuing one GET per target.
//!
//! This module defines the `Fetcher` trait to abstract the network call, enabling the runner to
//! be tested without real HTTP. A fetcher never returns an error: every problem becomes a
//! [`FetchOutcome::Failure`].

use std::time::{Duration, Instant};

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::header::CONTENT_TYPE;

use crate::error::Result;
use crate::outcome::{FailureKind, FetchOutcome, ResponseSummary};
use crate::target::Target;

/// Trait for fetching a single target.
///
/// Implementations must be cancel-safe: the runner drops the future of any fetch still in
/// flight when the group deadline fires.
///
/// # Example
/// ```ignore
/// let fetcher = ReqwestFetcher::new();
/// match fetcher.fetch(&Target::new("https://example.com/")).await {
///     FetchOutcome::Success { summary, .. } => {
///         println!("{} ({} bytes)", summary.status, summary.bytes)
///     }
///     FetchOutcome::Failure { kind, message, .. } => println!("{}: {}", kind, message),
/// }
/// ```
#[async_trait]
pub trait Fetcher: Send + Sync {
    /// Issue one GET against `target`.
    ///
    /// Any completed HTTP exchange is a success, whatever its status code. Malformed targets
    /// fail with [`FailureKind::InvalidTarget`] without touching the network.
    async fn fetch(&self, target: &Target) -> FetchOutcome;
}

// ============================================================================
// Production Implementation using reqwest
// ============================================================================

/// Production fetcher using reqwest.
#[derive(Clone)]
pub struct ReqwestFetcher {
    client: reqwest::Client,
    /// Per-fetch timeout, independent of the group deadline
    timeout: Option<Duration>,
    /// Read (and discard) the body so `bytes` reflects the payload size
    drain_body: bool,
}

impl ReqwestFetcher {
    /// Create a fetcher with a default reqwest client, no per-fetch timeout, and body draining.
    pub fn new() -> Self {
        Self::with_client(reqwest::Client::new())
    }

    pub fn with_client(client: reqwest::Client) -> Self {
        Self {
            client,
            timeout: None,
            drain_body: true,
        }
    }

    /// Build a fetcher from a batch configuration.
    ///
    /// # Errors
    /// Returns an error if the underlying reqwest client cannot be built (e.g. TLS backend
    /// initialisation fails).
    pub fn from_config(config: &crate::config::BatchConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(config.user_agent.clone())
            .build()?;

        Ok(Self::with_client(client)
            .with_timeout(config.fetch_timeout_ms.map(Duration::from_millis))
            .with_drain_body(config.drain_body))
    }

    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_drain_body(mut self, drain_body: bool) -> Self {
        self.drain_body = drain_body;
        self
    }

    async fn exchange(
        &self,
        url: reqwest::Url,
    ) -> std::result::Result<ResponseSummary, reqwest::Error> {
        let started = Instant::now();
        let response = self.client.get(url).send().await?;

        let status = response.status().as_u16();
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);

        let mut bytes = 0u64;
        if self.drain_body {
            let mut body = response.bytes_stream();
            while let Some(chunk) = body.next().await {
                bytes += chunk?.len() as u64;
            }
        }

        Ok(ResponseSummary {
            status,
            bytes,
            content_type,
            elapsed_ms: millis(started.elapsed()),
        })
    }
}

impl Default for ReqwestFetcher {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Fetcher for ReqwestFetcher {
    #[tracing::instrument(skip(self), fields(url = %target))]
    async fn fetch(&self, target: &Target) -> FetchOutcome {
        let url = match target.to_url() {
            Ok(url) => url,
            Err(reason) => {
                tracing::debug!(reason = %reason, "Rejected target without a network call");
                return FetchOutcome::failure(target.clone(), FailureKind::InvalidTarget, reason);
            }
        };

        let result = match self.timeout {
            Some(timeout) => match tokio::time::timeout(timeout, self.exchange(url)).await {
                Ok(result) => result,
                Err(_) => {
                    return FetchOutcome::failure(
                        target.clone(),
                        FailureKind::Timeout,
                        format!("fetch exceeded per-fetch timeout of {}ms", millis(timeout)),
                    );
                }
            },
            None => self.exchange(url).await,
        };

        match result {
            Ok(summary) => {
                tracing::debug!(
                    status = summary.status,
                    bytes = summary.bytes,
                    elapsed_ms = summary.elapsed_ms,
                    "HTTP exchange completed"
                );
                FetchOutcome::success(target.clone(), summary)
            }
            Err(e) => {
                let kind = classify(&e);
                let message = error_chain(&e);
                tracing::debug!(kind = %kind, error = %message, "HTTP exchange failed");
                FetchOutcome::failure(target.clone(), kind, message)
            }
        }
    }
}

/// Map a reqwest error onto the failure taxonomy.
fn classify(error: &reqwest::Error) -> FailureKind {
    if error.is_timeout() {
        FailureKind::Timeout
    } else if error.is_builder() {
        FailureKind::InvalidTarget
    } else {
        FailureKind::Transport
    }
}

/// Render an error with its source chain, e.g. "error sending request: connection refused".
fn error_chain(error: &(dyn std::error::Error + 'static)) -> String {
    let mut message = error.to_string();
    let mut source = error.source();
    while let Some(cause) = source {
        let text = cause.to_string();
        // hyper and reqwest often repeat the inner message in the outer one
        if !message.contains(&text) {
            message.push_str(": ");
            message.push_str(&text);
        }
        source = cause.source();
    }
    message
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

// ============================================================================
// Test/Mock Implementation
// ============================================================================

use dashmap::DashMap;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::oneshot;

/// What a mock fetch resolves to.
pub type MockReply = std::result::Result<ResponseSummary, (FailureKind, String)>;

/// Mock fetcher for testing.
///
/// Replies are scripted per target and consumed in FIFO order. The mock tracks how many
/// fetches are in flight, the highest in-flight count ever observed, and how many fetches were
/// dropped before they finished (cancelled by the runner).
///
/// # Example
/// ```ignore
/// let mock = MockFetcher::new();
/// mock.add_response("https://fast.test/", MockFetcher::ok(200));
/// mock.add_delayed_response("https://slow.test/", Duration::from_secs(5), MockFetcher::ok(200));
/// ```
#[derive(Clone)]
pub struct MockFetcher {
    responses: Arc<DashMap<Target, VecDeque<MockResponse>>>,
    calls: Arc<Mutex<Vec<Target>>>,
    in_flight: Arc<AtomicUsize>,
    max_in_flight: Arc<AtomicUsize>,
    abandoned: Arc<AtomicUsize>,
}

/// A mock response that can optionally wait before completing.
enum MockResponse {
    /// Immediate reply
    Immediate(MockReply),
    /// Reply after sleeping (uses tokio time, so paused-clock tests advance it instantly)
    Delayed { reply: MockReply, delay: Duration },
    /// Reply that waits for a trigger signal before completing
    Triggered {
        reply: MockReply,
        trigger: oneshot::Receiver<()>,
    },
}

impl MockFetcher {
    pub fn new() -> Self {
        Self {
            responses: Arc::new(DashMap::new()),
            calls: Arc::new(Mutex::new(Vec::new())),
            in_flight: Arc::new(AtomicUsize::new(0)),
            max_in_flight: Arc::new(AtomicUsize::new(0)),
            abandoned: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Successful reply with the given status and a small body.
    pub fn ok(status: u16) -> MockReply {
        Ok(ResponseSummary {
            status,
            bytes: 128,
            content_type: Some("text/plain".to_string()),
            elapsed_ms: 0,
        })
    }

    /// Failed reply.
    pub fn err(kind: FailureKind, message: &str) -> MockReply {
        Err((kind, message.to_string()))
    }

    pub fn add_response(&self, target: impl Into<Target>, reply: MockReply) {
        self.push(target.into(), MockResponse::Immediate(reply));
    }

    pub fn add_delayed_response(
        &self,
        target: impl Into<Target>,
        delay: Duration,
        reply: MockReply,
    ) {
        self.push(target.into(), MockResponse::Delayed { reply, delay });
    }

    /// Add a reply that will wait for a manual trigger before completing.
    ///
    /// Returns a sender that when triggered (by sending `()` or dropping) lets the fetch
    /// complete with the given reply.
    pub fn add_response_with_trigger(
        &self,
        target: impl Into<Target>,
        reply: MockReply,
    ) -> oneshot::Sender<()> {
        let (tx, rx) = oneshot::channel();
        self.push(target.into(), MockResponse::Triggered { reply, trigger: rx });
        tx
    }

    fn push(&self, target: Target, response: MockResponse) {
        self.responses.entry(target).or_default().push_back(response);
    }

    /// Targets fetched so far, in call order.
    pub fn get_calls(&self) -> Vec<Target> {
        self.calls.lock().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().len()
    }

    /// Number of fetches currently executing.
    pub fn in_flight_count(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// Highest number of fetches ever executing at the same time.
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    /// Number of fetches dropped before they produced a reply.
    pub fn abandoned_count(&self) -> usize {
        self.abandoned.load(Ordering::SeqCst)
    }
}

impl Default for MockFetcher {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Fetcher for MockFetcher {
    async fn fetch(&self, target: &Target) -> FetchOutcome {
        if let Err(reason) = target.to_url() {
            return FetchOutcome::failure(target.clone(), FailureKind::InvalidTarget, reason);
        }

        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);

        // Guard to ensure we decrement even if cancelled/panicked
        let mut guard = InFlightGuard {
            in_flight: self.in_flight.clone(),
            abandoned: self.abandoned.clone(),
            finished: false,
        };

        self.calls.lock().push(target.clone());

        let response = self
            .responses
            .get_mut(target)
            .and_then(|mut queue| queue.pop_front());

        let started = tokio::time::Instant::now();
        let reply = match response {
            Some(MockResponse::Immediate(reply)) => reply,
            Some(MockResponse::Delayed { reply, delay }) => {
                tokio::time::sleep(delay).await;
                reply
            }
            Some(MockResponse::Triggered { reply, trigger }) => {
                // Proceed whether the sender fired or was dropped
                let _ = trigger.await;
                reply
            }
            None => Err((
                FailureKind::Transport,
                format!("No mock response configured for {}", target),
            )),
        };
        guard.finished = true;

        match reply {
            Ok(mut summary) => {
                summary.elapsed_ms = millis(started.elapsed());
                FetchOutcome::success(target.clone(), summary)
            }
            Err((kind, message)) => FetchOutcome::failure(target.clone(), kind, message),
        }
    }
}

/// Guard that decrements the in-flight counter when dropped.
/// A guard dropped before `finished` is set counts as an abandoned fetch.
struct InFlightGuard {
    in_flight: Arc<AtomicUsize>,
    abandoned: Arc<AtomicUsize>,
    finished: bool,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        if !self.finished {
            self.abandoned.fetch_add(1, Ordering::SeqCst);
        }
    }
}
