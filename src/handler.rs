use crate::csp::Envelope;
use crate::filter::{ForwardingFilter, Noise};
use crate::forward::{ForwardError, Upstream};
use axum::Router;
use axum::extract::rejection::BytesRejection;
use axum::extract::{DefaultBodyLimit, State};
use axum::http::header::USER_AGENT;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Json, Response};
use axum::routing::post;
use bytes::Bytes;
use serde_derive::Serialize;
use std::sync::Arc;
use thiserror::Error;
use tower_http::trace::TraceLayer;

pub struct AppState {
    pub filter: ForwardingFilter,
    pub upstream: Upstream,
}

pub fn router(state: Arc<AppState>, max_body_bytes: usize) -> Router {
    Router::new()
        .route("/", post(receive_report))
        .route("/{*path}", post(receive_report))
        .layer(DefaultBodyLimit::max(max_body_bytes))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[derive(Debug, Error)]
pub enum ReportError {
    #[error("read error: {}", .0.body_text())]
    Read(#[source] BytesRejection),
    #[error("decode error")]
    Decode(#[source] serde_json::Error),
    #[error("encode error")]
    Encode(#[source] serde_json::Error),
    #[error("forward error")]
    Forward {
        #[source]
        source: ForwardError,
        payload: Bytes,
    },
}

impl ReportError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            ReportError::Read(rejection) => rejection.status(),
            ReportError::Decode(_) | ReportError::Encode(_) => StatusCode::BAD_REQUEST,
            ReportError::Forward { .. } => StatusCode::BAD_GATEWAY,
        }
    }
}

/// What happened to a report that was handled without error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    Forwarded,
    Filtered(Noise),
}

#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct Outcome {
    pub report_forwarded: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sentry_error_message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sentry_status_code: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub csp_report_sent_to_sentry: Option<String>,
}

impl From<Delivery> for Outcome {
    fn from(delivery: Delivery) -> Outcome {
        Outcome {
            report_forwarded: delivery == Delivery::Forwarded,
            ..Default::default()
        }
    }
}

impl From<&ReportError> for Outcome {
    fn from(err: &ReportError) -> Outcome {
        let mut outcome = Outcome {
            report_forwarded: false,
            error_message: Some(err.to_string()),
            ..Default::default()
        };

        if let ReportError::Forward { source, payload } = err {
            outcome.sentry_error_message = Some(source.upstream_message());
            outcome.sentry_status_code = source.status().map(|s| s.as_u16());
            outcome.csp_report_sent_to_sentry = Some(String::from_utf8_lossy(payload).into_owned());
        }

        outcome
    }
}

impl IntoResponse for ReportError {
    fn into_response(self) -> Response {
        (self.status_code(), Json(Outcome::from(&self))).into_response()
    }
}

/// Decodes, filters and forwards a single report body.
pub async fn handle_report(
    state: &AppState,
    user_agent: &str,
    body: &[u8],
) -> Result<Delivery, ReportError> {
    let envelope = Envelope::decode(body).map_err(ReportError::Decode)?;

    if let Err(noise) = state.filter.check(envelope.report.blocked_uri()) {
        tracing::debug!(
            blocked_uri = envelope.report.blocked_uri(),
            reason = %noise,
            "report filtered"
        );
        return Ok(Delivery::Filtered(noise));
    }

    let payload = Bytes::from(envelope.encode().map_err(ReportError::Encode)?);

    match state.upstream.send(user_agent, payload.clone()).await {
        Ok(()) => {
            tracing::info!(
                blocked_uri = envelope.report.blocked_uri(),
                document_uri = envelope.report.document_uri(),
                "report forwarded"
            );
            Ok(Delivery::Forwarded)
        }
        Err(source) => {
            tracing::warn!(error = %source, "failed to forward report");
            Err(ReportError::Forward { source, payload })
        }
    }
}

async fn receive_report(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Result<Bytes, BytesRejection>,
) -> Response {
    let body = match body {
        Ok(body) => body,
        Err(rejection) => return ReportError::Read(rejection).into_response(),
    };
    let user_agent = headers
        .get(USER_AGENT)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();

    match handle_report(&state, user_agent, &body).await {
        Ok(delivery) => (StatusCode::OK, Json(Outcome::from(delivery))).into_response(),
        Err(err) => err.into_response(),
    }
}
