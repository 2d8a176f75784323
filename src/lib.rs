//! Bounded concurrent URL fetch batches with a group deadline.
//!
//! A [`BatchRunner`] fetches a list of targets with at most `concurrency` requests in flight and
//! returns once every target has an outcome or the group deadline fires, whichever comes first.
//! A timed-out run is not an error: the [`BatchResult`] carries the outcomes recorded in time and
//! names the targets that never finished.
//!
//! ```ignore
//! let fetcher = Arc::new(ReqwestFetcher::new());
//! let result = run_batch(fetcher, targets, 200, Duration::from_secs(10)).await?;
//! for outcome in result.failures() {
//!     println!("{}: {:?}", outcome.target(), outcome.failure_kind());
//! }
//! ```
//!
//! Batches can also run in the background through a [`JobDispatcher`], which is what the HTTP
//! trigger in `server` (feature `server`) does for every request.

pub mod config;
pub mod error;
pub mod http;
pub mod job;
#[cfg(feature = "metrics")]
pub mod metrics;
pub mod observer;
pub mod outcome;
pub mod runner;
#[cfg(feature = "server")]
pub mod server;
pub mod target;

// Re-export commonly used types
pub use config::{BatchConfig, DEFAULT_TARGETS};
pub use error::{Result, VolleyError};
pub use http::{Fetcher, MockFetcher, MockReply, ReqwestFetcher};
pub use job::{JobDispatcher, JobHandle, JobId};
#[cfg(feature = "metrics")]
pub use metrics::VolleyMetrics;
pub use observer::{BatchObserver, NoopObserver, ObserverSet, TracingObserver};
pub use outcome::{BatchResult, BatchState, FailureKind, FetchOutcome, ResponseSummary};
pub use runner::{BatchRunner, run_batch};
pub use target::Target;
