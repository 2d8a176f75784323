//! Background batch jobs.
//!
//! A [`JobDispatcher`] accepts a batch, starts it on the runtime and returns immediately with a
//! [`JobHandle`]. Callers that only need to acknowledge the submission (the HTTP trigger) drop
//! the handle; the job keeps running to completion either way.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::config::BatchConfig;
use crate::error::{Result, VolleyError};
use crate::http::Fetcher;
use crate::outcome::BatchResult;
use crate::runner::BatchRunner;

/// Unique identifier for a submitted job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct JobId(pub Uuid);

impl JobId {
    pub fn new() -> Self {
        JobId(Uuid::new_v4())
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Display only first 8 characters for readability in logs
        write!(f, "{}", &self.0.to_string()[..8])
    }
}

impl From<Uuid> for JobId {
    fn from(uuid: Uuid) -> Self {
        JobId(uuid)
    }
}

impl std::ops::Deref for JobId {
    type Target = Uuid;
    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

/// A batch running in the background.
#[derive(Debug)]
pub struct JobHandle {
    id: JobId,
    accepted_at: DateTime<Utc>,
    handle: JoinHandle<Result<BatchResult>>,
}

impl JobHandle {
    pub fn id(&self) -> JobId {
        self.id
    }

    pub fn accepted_at(&self) -> DateTime<Utc> {
        self.accepted_at
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Cancel the job. In-flight fetches are dropped with it.
    pub fn abort(&self) {
        self.handle.abort();
    }

    /// Wait for the job to finish.
    ///
    /// # Errors
    /// - Whatever the run itself returned
    /// - [`VolleyError::JobAborted`] if the job was aborted or its task panicked
    pub async fn wait(self) -> Result<BatchResult> {
        match self.handle.await {
            Ok(result) => result,
            Err(e) => Err(VolleyError::JobAborted(self.id.to_string(), e.to_string())),
        }
    }
}

/// Starts batches as background jobs over a shared runner.
pub struct JobDispatcher<F>
where
    F: Fetcher,
{
    runner: Arc<BatchRunner<F>>,
    config: BatchConfig,
}

impl<F> Clone for JobDispatcher<F>
where
    F: Fetcher,
{
    fn clone(&self) -> Self {
        Self {
            runner: self.runner.clone(),
            config: self.config.clone(),
        }
    }
}

impl<F> JobDispatcher<F>
where
    F: Fetcher + 'static,
{
    pub fn new(runner: Arc<BatchRunner<F>>, config: BatchConfig) -> Self {
        Self { runner, config }
    }

    pub fn config(&self) -> &BatchConfig {
        &self.config
    }

    pub fn runner(&self) -> &Arc<BatchRunner<F>> {
        &self.runner
    }

    /// Start the configured batch in the background.
    pub fn dispatch(&self) -> Result<JobHandle> {
        self.dispatch_with(self.config.clone())
    }

    /// Start `config` in the background.
    ///
    /// The configuration is validated before anything is spawned, so a bad configuration is
    /// reported to the caller instead of being logged from inside the job. As with
    /// [`BatchRunner::run_config`], only the targets, concurrency and deadline apply per job; fetch
    /// settings come from the fetcher the runner was built with.
    pub fn dispatch_with(&self, config: BatchConfig) -> Result<JobHandle> {
        config.validate()?;

        let id = JobId::new();
        let accepted_at = Utc::now();
        let runner = self.runner.clone();

        tracing::info!(
            job_id = %id,
            targets = config.targets.len(),
            concurrency = config.concurrency,
            deadline_ms = config.deadline_ms,
            "Batch job accepted"
        );

        let deadline = config.deadline();
        let BatchConfig {
            targets,
            concurrency,
            ..
        } = config;

        let handle = tokio::spawn(async move {
            let result = runner.run(targets, concurrency, deadline).await;
            match &result {
                Ok(batch) => tracing::info!(
                    job_id = %id,
                    state = %batch.state,
                    completed = batch.len(),
                    missing = batch.missing().len(),
                    "Batch job finished"
                ),
                Err(e) => tracing::error!(job_id = %id, error = %e, "Batch job failed"),
            }
            result
        });

        Ok(JobHandle {
            id,
            accepted_at,
            handle,
        })
    }
}
