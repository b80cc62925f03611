use crate::config::UpstreamConfig;
use anyhow::Result;
use axum::http::StatusCode;
use axum::http::header::{CONTENT_TYPE, USER_AGENT};
use bytes::Bytes;
use reqwest::redirect::Policy;
use reqwest::{Client, ClientBuilder, Url};
use thiserror::Error;

pub const FORWARDER_HEADER: &str = "X-Forwarder-User-Agent";
pub const FORWARDER_NAME: &str = concat!("csp-forwarder/", env!("CARGO_PKG_VERSION"));

#[derive(Debug, Error)]
pub enum ForwardError {
    #[error("upstream responded with {status}")]
    Status { status: StatusCode, body: String },
    #[error("upstream request failed: {0}")]
    Transport(#[from] reqwest::Error),
}

impl ForwardError {
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            ForwardError::Status { status, .. } => Some(*status),
            ForwardError::Transport(err) => err.status(),
        }
    }

    /// What Sentry told us, or the transport failure when it said nothing.
    pub fn upstream_message(&self) -> String {
        match self {
            ForwardError::Status { body, .. } => body.clone(),
            ForwardError::Transport(err) => err.to_string(),
        }
    }
}

/// Sentry's security endpoint.
#[derive(Debug, Clone)]
pub struct Upstream {
    client: Client,
    url: Url,
    success_status: StatusCode,
}

impl Upstream {
    pub fn new(config: &UpstreamConfig) -> Result<Upstream> {
        let client = ClientBuilder::new()
            .redirect(Policy::none())
            .timeout(config.timeout())
            .build()?;

        Ok(Upstream {
            client,
            url: config.parsed_url()?,
            success_status: config.success_status,
        })
    }

    /// Posts one encoded envelope. Exactly one request, no retries.
    pub async fn send(&self, user_agent: &str, payload: Bytes) -> Result<(), ForwardError> {
        let res = self
            .client
            .post(self.url.clone())
            .header(CONTENT_TYPE, "application/json")
            .header(USER_AGENT, user_agent)
            .header(FORWARDER_HEADER, FORWARDER_NAME)
            .body(payload)
            .send()
            .await?;

        let status = res.status();
        if status == self.success_status {
            return Ok(());
        }

        let body = match res.text().await {
            Ok(body) => body,
            Err(err) => {
                tracing::debug!(%status, error = %err, "failed to read upstream response body");
                format!("unreadable response body: {err}")
            }
        };
        Err(ForwardError::Status { status, body })
    }
}
