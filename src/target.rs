//! Fetch targets.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

/// One URL to fetch.
///
/// Targets are opaque to the runner: they are compared, hashed and logged as strings, and only
/// the fetcher parses them. Cloning is cheap (the string is shared), so a target can be handed
/// to a worker task and still be reported by the coordinator.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Target(Arc<str>);

impl Target {
    pub fn new(url: impl AsRef<str>) -> Self {
        Target(Arc::from(url.as_ref()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Parse this target into an absolute http(s) URL.
    ///
    /// Returns a short human-readable reason when the target is empty, unparseable, or uses a
    /// scheme other than `http`/`https`.
    pub fn to_url(&self) -> std::result::Result<reqwest::Url, String> {
        let raw = self.0.trim();
        if raw.is_empty() {
            return Err("target is empty".to_string());
        }

        let url = reqwest::Url::parse(raw).map_err(|e| format!("malformed URL '{}': {}", raw, e))?;

        match url.scheme() {
            "http" | "https" => {}
            other => return Err(format!("unsupported scheme '{}' in '{}'", other, raw)),
        }

        if url.host_str().is_none_or(str::is_empty) {
            return Err(format!("URL '{}' has no host", raw));
        }

        Ok(url)
    }
}

impl std::fmt::Display for Target {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Target {
    fn from(url: &str) -> Self {
        Target::new(url)
    }
}

impl From<String> for Target {
    fn from(url: String) -> Self {
        Target(Arc::from(url))
    }
}

impl AsRef<str> for Target {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
