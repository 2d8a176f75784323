//! Batch configuration.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Result, VolleyError};
use crate::target::Target;

/// Targets fetched by the reference deployment: a mix of images, HTML pages, a PDF, and a couple
/// of large archives/videos that are not expected to finish inside the default deadline.
pub const DEFAULT_TARGETS: [&str; 9] = [
    "http://www.google.com/intl/en_ALL/images/logo.gif",
    "https://www.python.org/static/img/python-logo.png",
    "http://us.i1.yimg.com/us.yimg.com/i/ww/beta/y3.gif",
    "https://astrahospital.com/ortho/",
    "https://code9tech.com/",
    "http://kmmc.in/wp-content/uploads/2014/01/lesson2.pdf",
    "https://sample-videos.com/download-sample-zip.php",
    "https://sample-videos.com/zip/100mb.zip",
    "https://sample-videos.com/video123/mp4/240/big_buck_bunny_240p_30mb.mp4",
];

/// Configuration for one batch.
///
/// Every field has a default, so a JSON file only needs to name what it overrides.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchConfig {
    /// URLs to fetch
    pub targets: Vec<Target>,

    /// Maximum number of fetches in flight at once
    pub concurrency: usize,

    /// Group deadline for the whole batch in milliseconds
    pub deadline_ms: u64,

    /// Optional timeout for each individual fetch in milliseconds.
    /// Independent of the group deadline; None means only the deadline applies.
    pub fetch_timeout_ms: Option<u64>,

    /// Stream and count response bodies. When false only headers are awaited.
    pub drain_body: bool,

    /// User-Agent header sent with every fetch
    pub user_agent: String,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            targets: DEFAULT_TARGETS.iter().copied().map(Target::from).collect(),
            concurrency: 200,
            deadline_ms: 10_000, // 10 seconds
            fetch_timeout_ms: None,
            drain_body: true,
            user_agent: concat!("volley/", env!("CARGO_PKG_VERSION")).to_string(),
        }
    }
}

impl BatchConfig {
    /// Load a configuration from a JSON file, filling unspecified fields with defaults.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let raw = std::fs::read_to_string(path.as_ref())?;
        let config: BatchConfig = serde_json::from_str(&raw)?;
        tracing::debug!(
            path = %path.as_ref().display(),
            targets = config.targets.len(),
            "Loaded batch configuration"
        );
        Ok(config)
    }

    /// Reject settings no run can honour.
    pub fn validate(&self) -> Result<()> {
        if self.concurrency == 0 {
            return Err(VolleyError::InvalidConfig(
                "concurrency must be at least 1".to_string(),
            ));
        }
        if self.deadline_ms == 0 {
            return Err(VolleyError::InvalidConfig(
                "deadline_ms must be greater than 0".to_string(),
            ));
        }
        if self.fetch_timeout_ms == Some(0) {
            return Err(VolleyError::InvalidConfig(
                "fetch_timeout_ms must be greater than 0 when set".to_string(),
            ));
        }
        Ok(())
    }

    pub fn deadline(&self) -> Duration {
        Duration::from_millis(self.deadline_ms)
    }

    pub fn fetch_timeout(&self) -> Option<Duration> {
        self.fetch_timeout_ms.map(Duration::from_millis)
    }
}
