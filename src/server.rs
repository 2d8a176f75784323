//! HTTP trigger for background batch jobs.
//!
//! Provides endpoints for:
//! - Starting the configured batch (`/asynctask`)
//! - Health check (`/health`)
//! - Prometheus metrics (`/metrics`, with the `metrics` feature and a registry attached)
//!
//! The trigger acknowledges as soon as the job is accepted. It always answers 200 with a JSON
//! body of the form `{"response": "..."}`; failures to start a job are reported in the message,
//! not the status code.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{Json, Router, extract::State, response::IntoResponse, routing::get};
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;

use crate::error::Result;
use crate::http::Fetcher;
use crate::job::JobDispatcher;

/// Shared state behind the router.
pub struct AppState<F>
where
    F: Fetcher,
{
    pub dispatcher: JobDispatcher<F>,
    #[cfg(feature = "metrics")]
    pub metrics: Option<crate::metrics::VolleyMetrics>,
}

impl<F> AppState<F>
where
    F: Fetcher + 'static,
{
    pub fn new(dispatcher: JobDispatcher<F>) -> Self {
        Self {
            dispatcher,
            #[cfg(feature = "metrics")]
            metrics: None,
        }
    }

    #[cfg(feature = "metrics")]
    pub fn with_metrics(mut self, metrics: crate::metrics::VolleyMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }
}

/// Body of every trigger response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TriggerResponse {
    pub response: String,
}

/// Create the HTTP router.
pub fn create_router<F>(state: Arc<AppState<F>>) -> Router
where
    F: Fetcher + 'static,
{
    let router = Router::new()
        .route("/asynctask", get(trigger::<F>))
        .route("/asynctask/", get(trigger::<F>))
        .route("/health", get(health_check));

    #[cfg(feature = "metrics")]
    let router = router.route("/metrics", get(metrics_handler::<F>));

    router.with_state(state)
}

/// Bind `addr` and serve the trigger router until the process stops.
pub async fn serve<F>(addr: SocketAddr, state: Arc<AppState<F>>) -> Result<()>
where
    F: Fetcher + 'static,
{
    let listener = TcpListener::bind(addr).await?;
    tracing::info!(addr = %listener.local_addr()?, "Trigger endpoint listening");
    axum::serve(listener, create_router(state)).await?;
    Ok(())
}

/// Start the configured batch and acknowledge immediately.
async fn trigger<F>(State(state): State<Arc<AppState<F>>>) -> Json<TriggerResponse>
where
    F: Fetcher + 'static,
{
    let response = match state.dispatcher.dispatch() {
        Ok(job) => format!(
            "Sit tight, process has started. For more details check console with process id {}",
            job.id()
        ),
        Err(e) => {
            tracing::error!(error = %e, "Failed to start batch job");
            format!("Exception caused by: {}", e)
        }
    };
    Json(TriggerResponse { response })
}

/// Health check endpoint.
async fn health_check() -> impl IntoResponse {
    Json(serde_json::json!({ "status": "ok" }))
}

/// Prometheus metrics endpoint.
#[cfg(feature = "metrics")]
async fn metrics_handler<F>(State(state): State<Arc<AppState<F>>>) -> axum::response::Response
where
    F: Fetcher + 'static,
{
    use axum::http::{StatusCode, header};
    use prometheus::Encoder;

    let Some(metrics) = &state.metrics else {
        return (StatusCode::NOT_FOUND, "metrics are not enabled").into_response();
    };

    let encoder = prometheus::TextEncoder::new();
    let mut body = Vec::new();
    if let Err(e) = encoder.encode(&metrics.registry().gather(), &mut body) {
        tracing::error!(error = %e, "Failed to encode metrics");
        return (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response();
    }
    ([(header::CONTENT_TYPE, encoder.format_type().to_string())], body).into_response()
}
