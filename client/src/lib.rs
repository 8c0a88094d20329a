//! Producer-side client for the task router
//!
//! Producers hold a request open against `POST /task/run` for as long as
//! their task takes to execute, so the client keeps connections alive with
//! TCP keepalive and retries connection-level failures with exponential
//! back-off. HTTP error statuses are surfaced to the caller and never
//! retried; retrying a rejected submission is a caller decision.

use shared::api::{endpoints, params};
use shared::utils::calculate_backoff_delay;
use std::time::Duration;
use tracing::{debug, warn};
use url::Url;

/// Errors reported by the client
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("invalid server URL '{url}': {reason}")]
    InvalidServerUrl { url: String, reason: String },

    #[error("failed to build HTTP client: {0}")]
    Build(#[source] reqwest::Error),

    #[error("router rejected task submission with status {status}")]
    Rejected { status: reqwest::StatusCode },

    #[error("failed to decode task result: {0}")]
    InvalidResult(#[source] reqwest::Error),
}

/// HTTP client for submitting tasks to a router and awaiting their results
pub struct ApiClient {
    /// Resolved `/task/run` endpoint on the configured server
    endpoint: Url,
    client: reqwest::Client,
    initial_retry_timeout: Duration,
    maximum_retry_timeout: Duration,
}

impl ApiClient {
    /// Creates a client against the given server URL.
    ///
    /// The URL may carry a path prefix; the task submission endpoint is
    /// appended to it. Connections are kept alive indefinitely once
    /// established, only the connection setup is bounded by
    /// `connect_timeout`.
    pub fn new(
        server_url: &str,
        connect_timeout: Duration,
        initial_retry_timeout: Duration,
        maximum_retry_timeout: Duration,
    ) -> Result<Self, ClientError> {
        let endpoint = Self::endpoint_for(server_url)?;

        let client = reqwest::Client::builder()
            .connect_timeout(connect_timeout)
            // no total request timeout: a submission legitimately stays
            // open for the full runtime of its task
            .tcp_keepalive(Some(Duration::from_secs(
                shared::defaults::keepalive_idle_seconds(),
            )))
            .build()
            .map_err(ClientError::Build)?;

        Ok(Self {
            endpoint,
            client,
            initial_retry_timeout,
            maximum_retry_timeout,
        })
    }

    fn endpoint_for(server_url: &str) -> Result<Url, ClientError> {
        let mut endpoint = Url::parse(server_url).map_err(|e| ClientError::InvalidServerUrl {
            url: server_url.to_string(),
            reason: e.to_string(),
        })?;

        {
            let mut segments =
                endpoint
                    .path_segments_mut()
                    .map_err(|_| ClientError::InvalidServerUrl {
                        url: server_url.to_string(),
                        reason: "URL cannot be a base".to_string(),
                    })?;
            segments
                .pop_if_empty()
                .extend(endpoints::TASK_RUN.split('/').filter(|s| !s.is_empty()));
        }

        Ok(endpoint)
    }

    /// Submits a task and waits for its result.
    ///
    /// Connection-level failures are retried indefinitely with exponential
    /// back-off, doubling from the initial retry timeout up to the maximum.
    /// An HTTP error status ends the call immediately.
    pub async fn run(
        &self,
        task_type: &str,
        payload: &serde_json::Value,
    ) -> Result<serde_json::Value, ClientError> {
        let mut retry_count: u32 = 0;

        loop {
            let attempt = self
                .client
                .post(self.endpoint.clone())
                .query(&[(params::TASK_TYPE, task_type)])
                .json(payload)
                .send()
                .await;

            match attempt {
                Ok(response) => {
                    let status = response.status();
                    if status.is_success() {
                        if retry_count > 0 {
                            debug!(
                                task_type = %task_type,
                                retries = retry_count,
                                "Task submission succeeded after retries"
                            );
                        }
                        return response.json().await.map_err(ClientError::InvalidResult);
                    }
                    return Err(ClientError::Rejected { status });
                }
                Err(error) => {
                    warn!(
                        task_type = %task_type,
                        error = %error,
                        retries = retry_count,
                        "Failed to reach router while running task, retrying"
                    );
                }
            }

            let delay = calculate_backoff_delay(
                retry_count,
                self.initial_retry_timeout.as_millis() as u64,
                self.maximum_retry_timeout.as_millis() as u64,
            );
            tokio::time::sleep(Duration::from_millis(delay)).await;
            retry_count = retry_count.saturating_add(1);
        }
    }
}
