//! HTTP/JSON front door.
//!
//! Every delivery call runs under the caller's deadline and is abandoned with
//! `Canceled` once the service starts shutting down.

use std::{collections::HashMap, future::Future, sync::Arc, time::Duration};

use anyhow::Result;
use axum::{
    Router,
    extract::{State, rejection::JsonRejection},
    http::{HeaderMap, HeaderName, HeaderValue, StatusCode},
    response::{IntoResponse, Json, Response},
    routing::{get, post},
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::{
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    trace::TraceLayer,
};
use tracing::{Instrument, debug, info, info_span, warn};
use uuid::Uuid;

use crate::{
    clients::health::HealthChecker,
    dispatcher::Dispatcher,
    error::DeliveryError,
    logging::redact,
    metrics::MetricsSnapshot,
    models::{
        envelope::QueuedEnvelope,
        health::HealthStatus,
        notification::NotificationRequest,
        outcome::DeliveryOutcome,
        response::{ApiResponse, SendResponse},
    },
};

pub const REQUEST_TIMEOUT_HEADER: &str = "x-request-timeout-ms";
pub const CORRELATION_ID_HEADER: &str = "x-correlation-id";
const REQUEST_ID_HEADER: &str = "x-request-id";

#[derive(Clone)]
pub struct AppState {
    pub dispatcher: Arc<Dispatcher>,
    pub health_checker: Arc<HealthChecker>,
    pub shutdown: CancellationToken,
    pub default_timeout: Duration,
}

/// Body of the email convenience call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SendEmailRequest {
    pub to: String,
    pub email_type: String,
    #[serde(default)]
    pub template_data: HashMap<String, Value>,
    #[serde(default)]
    pub allow_fallback: bool,
}

impl From<SendEmailRequest> for NotificationRequest {
    fn from(request: SendEmailRequest) -> Self {
        NotificationRequest::email_template(request.to, request.email_type, request.template_data)
            .with_fallback(request.allow_fallback)
    }
}

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    InvalidArgument(String),

    #[error("{0}")]
    Internal(String),

    #[error("Deadline of {0:?} exceeded")]
    DeadlineExceeded(Duration),

    #[error("Service is shutting down")]
    Canceled,
}

impl ApiError {
    pub fn code(&self) -> &'static str {
        match self {
            ApiError::InvalidArgument(_) => "invalid_argument",
            ApiError::Internal(_) => "internal",
            ApiError::DeadlineExceeded(_) => "deadline_exceeded",
            ApiError::Canceled => "canceled",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::InvalidArgument(_) => StatusCode::BAD_REQUEST,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ApiError::DeadlineExceeded(_) => StatusCode::GATEWAY_TIMEOUT,
            // Client Closed Request, as used by nginx and gRPC gateways.
            ApiError::Canceled => {
                StatusCode::from_u16(499).unwrap_or(StatusCode::SERVICE_UNAVAILABLE)
            }
        }
    }
}

impl From<DeliveryError> for ApiError {
    fn from(error: DeliveryError) -> Self {
        match error {
            DeliveryError::Validation(_)
            | DeliveryError::UnsupportedKind(_)
            | DeliveryError::Decode(_) => ApiError::InvalidArgument(error.to_string()),
            DeliveryError::ChannelDelivery { .. } | DeliveryError::Enqueue(_) => {
                ApiError::Internal(error.to_string())
            }
        }
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::InvalidArgument(rejection.body_text())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = ApiResponse::<()>::error(self.code().to_string(), self.to_string());
        (self.status(), Json(body)).into_response()
    }
}

pub fn router(state: AppState) -> Router {
    let request_id = HeaderName::from_static(REQUEST_ID_HEADER);

    Router::new()
        .route("/v1/notifications", post(send_notification))
        .route("/v1/notifications/email", post(send_email))
        .route("/v1/notifications/queued", post(process_queued))
        .route("/health", get(health_check))
        .route("/metrics", get(metrics))
        .layer(PropagateRequestIdLayer::new(request_id.clone()))
        .layer(TraceLayer::new_for_http())
        .layer(SetRequestIdLayer::new(request_id, MakeRequestUuid))
        .with_state(state)
}

pub async fn run_api_server(
    listener: TcpListener,
    state: AppState,
    shutdown: CancellationToken,
) -> Result<()> {
    let addr = listener.local_addr()?;
    info!(address = %addr, "API server started");

    axum::serve(listener, router(state))
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await?;

    info!("API server stopped");
    Ok(())
}

async fn send_notification(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Result<Json<NotificationRequest>, JsonRejection>,
) -> Response {
    let correlation_id = correlation_id(&headers);
    let span = info_span!("rpc", method = "SendNotification", correlation_id = %correlation_id);

    let result: Result<DeliveryOutcome, ApiError> = async {
        let Json(request) = body?;
        let dispatcher = Arc::clone(&state.dispatcher);
        call_with_deadline(&state, &headers, async move { dispatcher.send(request).await }).await
    }
    .instrument(span)
    .await;

    respond(result, &correlation_id)
}

async fn send_email(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Result<Json<SendEmailRequest>, JsonRejection>,
) -> Response {
    let correlation_id = correlation_id(&headers);
    let span = info_span!("rpc", method = "SendEmail", correlation_id = %correlation_id);

    let result: Result<DeliveryOutcome, ApiError> = async {
        let Json(email) = body?;
        debug!(
            email_type = %email.email_type,
            template_data = %redact(&email.template_data),
            allow_fallback = email.allow_fallback,
            "Email request received"
        );

        let dispatcher = Arc::clone(&state.dispatcher);
        let request = NotificationRequest::from(email);
        call_with_deadline(&state, &headers, async move { dispatcher.send(request).await }).await
    }
    .instrument(span)
    .await;

    respond(result, &correlation_id)
}

async fn process_queued(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Result<Json<QueuedEnvelope>, JsonRejection>,
) -> Response {
    let correlation_id = correlation_id(&headers);
    let span = info_span!("rpc", method = "ProcessQueuedEnvelope", correlation_id = %correlation_id);

    let result: Result<DeliveryOutcome, ApiError> = async {
        let Json(envelope) = body?;
        let dispatcher = Arc::clone(&state.dispatcher);
        call_with_deadline(&state, &headers, async move { dispatcher.reprocess(&envelope).await })
            .await
    }
    .instrument(span)
    .await;

    respond(result, &correlation_id)
}

async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    let health = state.health_checker.check_all().await;

    let status_code = match health.status {
        HealthStatus::Healthy => StatusCode::OK,
        HealthStatus::Degraded => StatusCode::OK,
        HealthStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    };

    (status_code, Json(health))
}

async fn metrics(State(state): State<AppState>) -> Json<MetricsSnapshot> {
    Json(state.dispatcher.metrics().snapshot())
}

async fn call_with_deadline<F>(
    state: &AppState,
    headers: &HeaderMap,
    call: F,
) -> Result<DeliveryOutcome, ApiError>
where
    F: Future<Output = Result<DeliveryOutcome, DeliveryError>>,
{
    let deadline = request_deadline(headers, state.default_timeout);

    tokio::select! {
        biased;
        _ = state.shutdown.cancelled() => {
            warn!("Call abandoned, service shutting down");
            Err(ApiError::Canceled)
        }
        result = tokio::time::timeout(deadline, call) => match result {
            Ok(outcome) => outcome.map_err(ApiError::from),
            Err(_) => {
                warn!(deadline_ms = deadline.as_millis() as u64, "Caller deadline exceeded");
                Err(ApiError::DeadlineExceeded(deadline))
            }
        },
    }
}

/// The caller's deadline, or the configured default when the header is
/// absent, unparsable or zero.
pub fn request_deadline(headers: &HeaderMap, default: Duration) -> Duration {
    headers
        .get(REQUEST_TIMEOUT_HEADER)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.trim().parse::<u64>().ok())
        .filter(|millis| *millis > 0)
        .map(Duration::from_millis)
        .unwrap_or(default)
}

fn correlation_id(headers: &HeaderMap) -> String {
    headers
        .get(CORRELATION_ID_HEADER)
        .and_then(|value| value.to_str().ok())
        .filter(|value| !value.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| Uuid::new_v4().to_string())
}

fn respond(result: Result<DeliveryOutcome, ApiError>, correlation_id: &str) -> Response {
    let mut response = match result {
        Ok(outcome) => (StatusCode::OK, Json(ApiResponse::<SendResponse>::from(outcome))).into_response(),
        Err(e) => e.into_response(),
    };

    if let Ok(value) = HeaderValue::from_str(correlation_id) {
        response
            .headers_mut()
            .insert(HeaderName::from_static(CORRELATION_ID_HEADER), value);
    }

    response
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deadline_header_overrides_default() {
        let mut headers = HeaderMap::new();
        headers.insert(REQUEST_TIMEOUT_HEADER, HeaderValue::from_static("250"));

        assert_eq!(
            request_deadline(&headers, Duration::from_secs(5)),
            Duration::from_millis(250)
        );
    }

    #[test]
    fn bad_deadline_header_falls_back_to_default() {
        let mut headers = HeaderMap::new();
        headers.insert(REQUEST_TIMEOUT_HEADER, HeaderValue::from_static("soon"));
        assert_eq!(request_deadline(&headers, Duration::from_secs(5)), Duration::from_secs(5));

        headers.insert(REQUEST_TIMEOUT_HEADER, HeaderValue::from_static("0"));
        assert_eq!(request_deadline(&headers, Duration::from_secs(5)), Duration::from_secs(5));
    }

    #[test]
    fn delivery_errors_map_to_caller_statuses() {
        let invalid = ApiError::from(DeliveryError::Validation("missing recipient".to_string()));
        assert_eq!(invalid.status(), StatusCode::BAD_REQUEST);

        let unsupported = ApiError::from(DeliveryError::UnsupportedKind("sms".to_string()));
        assert_eq!(unsupported.status(), StatusCode::BAD_REQUEST);

        let enqueue = ApiError::from(DeliveryError::Enqueue(anyhow::anyhow!("broker down")));
        assert_eq!(enqueue.status(), StatusCode::INTERNAL_SERVER_ERROR);

        assert_eq!(ApiError::Canceled.status().as_u16(), 499);
        assert_eq!(
            ApiError::DeadlineExceeded(Duration::from_secs(1)).status(),
            StatusCode::GATEWAY_TIMEOUT
        );
    }

    #[test]
    fn generated_correlation_id_when_absent() {
        let id = correlation_id(&HeaderMap::new());
        assert!(Uuid::parse_str(&id).is_ok());

        let mut headers = HeaderMap::new();
        headers.insert(CORRELATION_ID_HEADER, HeaderValue::from_static("abc-123"));
        assert_eq!(correlation_id(&headers), "abc-123");
    }
}
