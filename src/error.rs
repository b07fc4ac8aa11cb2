//! Gateway-wide error type and its conversion into HTTP responses.
//!
//! `GatewayError` is the `Result` error type for every fallible pipeline stage
//! (auth, routing, rate limiting, quota, abuse, cache, upstream). It carries
//! the request id assigned at the top of the pipeline so the JSON error body
//! and the `X-Request-Id` header stay consistent with what a successful
//! response would have carried, and implements [`Responder`] directly, the
//! same seam `anyhow::Error` already uses in `responder.rs`, so handlers and
//! middleware can just use `?`.

use http::{HeaderValue, StatusCode, header::RETRY_AFTER};

use crate::body::GatewayBody;
use crate::responder::Responder;
use crate::types::Response;

#[derive(Debug, thiserror::Error)]
pub enum ErrorKind {
    #[error("no X-API-Key header present")]
    MissingApiKey,

    #[error("api key is unknown, disabled, revoked, or its tenant is inactive")]
    InvalidApiKey,

    #[error("no active route matches this request")]
    NoRoute,

    #[error("rate limit exceeded")]
    RateLimited { retry_after_secs: u64 },

    #[error("daily or monthly quota exceeded")]
    QuotaExceeded { retry_after_secs: u64 },

    #[error("key is under an abuse soft-block")]
    AbuseBlocked { retry_after_secs: u64 },

    #[error("upstream did not respond within the route's deadline")]
    UpstreamTimeout,

    #[error("upstream connection or protocol error: {0}")]
    UpstreamError(String),

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

/// The `Result` error type threaded through every pipeline stage. Wraps an
/// [`ErrorKind`] with the request id assigned when the pipeline started, set
/// via [`GatewayError::with_request_id`] once that id is known.
#[derive(Debug)]
pub struct GatewayError {
    pub kind: ErrorKind,
    pub request_id: Option<String>,
}

impl std::fmt::Display for GatewayError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.kind)
    }
}

impl std::error::Error for GatewayError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.kind)
    }
}

impl From<ErrorKind> for GatewayError {
    fn from(kind: ErrorKind) -> Self {
        Self {
            kind,
            request_id: None,
        }
    }
}

impl From<anyhow::Error> for GatewayError {
    fn from(e: anyhow::Error) -> Self {
        ErrorKind::Internal(e).into()
    }
}

impl GatewayError {
    pub fn missing_api_key() -> Self {
        ErrorKind::MissingApiKey.into()
    }

    pub fn invalid_api_key() -> Self {
        ErrorKind::InvalidApiKey.into()
    }

    pub fn no_route() -> Self {
        ErrorKind::NoRoute.into()
    }

    pub fn rate_limited(retry_after_secs: u64) -> Self {
        ErrorKind::RateLimited { retry_after_secs }.into()
    }

    pub fn quota_exceeded(retry_after_secs: u64) -> Self {
        ErrorKind::QuotaExceeded { retry_after_secs }.into()
    }

    pub fn abuse_blocked(retry_after_secs: u64) -> Self {
        ErrorKind::AbuseBlocked { retry_after_secs }.into()
    }

    pub fn upstream_timeout() -> Self {
        ErrorKind::UpstreamTimeout.into()
    }

    pub fn upstream_error(detail: impl Into<String>) -> Self {
        ErrorKind::UpstreamError(detail.into()).into()
    }

    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = Some(request_id.into());
        self
    }

    /// The stable machine-readable kind string used in the JSON error body,
    /// matching the client-visible error kinds.
    pub fn kind_str(&self) -> &'static str {
        match &self.kind {
            ErrorKind::MissingApiKey => "missing_api_key",
            ErrorKind::InvalidApiKey => "invalid_api_key",
            ErrorKind::NoRoute => "no_route",
            ErrorKind::RateLimited { .. } => "rate_limited",
            ErrorKind::QuotaExceeded { .. } => "quota_exceeded",
            ErrorKind::AbuseBlocked { .. } => "abuse_blocked",
            ErrorKind::UpstreamTimeout => "upstream_timeout",
            ErrorKind::UpstreamError(_) => "upstream_error",
            ErrorKind::Internal(_) => "internal",
        }
    }

    pub fn status(&self) -> StatusCode {
        match &self.kind {
            ErrorKind::MissingApiKey | ErrorKind::InvalidApiKey => StatusCode::UNAUTHORIZED,
            ErrorKind::NoRoute => StatusCode::NOT_FOUND,
            ErrorKind::RateLimited { .. }
            | ErrorKind::QuotaExceeded { .. }
            | ErrorKind::AbuseBlocked { .. } => StatusCode::TOO_MANY_REQUESTS,
            ErrorKind::UpstreamTimeout => StatusCode::GATEWAY_TIMEOUT,
            ErrorKind::UpstreamError(_) => StatusCode::BAD_GATEWAY,
            ErrorKind::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn retry_after(&self) -> Option<u64> {
        match &self.kind {
            ErrorKind::RateLimited { retry_after_secs }
            | ErrorKind::QuotaExceeded { retry_after_secs }
            | ErrorKind::AbuseBlocked { retry_after_secs } => Some(*retry_after_secs),
            _ => None,
        }
    }

    fn detail(&self) -> Option<String> {
        match &self.kind {
            ErrorKind::Internal(e) => Some(e.to_string()),
            ErrorKind::UpstreamError(detail) => Some(detail.clone()),
            _ => None,
        }
    }
}

impl Responder for GatewayError {
    fn into_response(self) -> Response {
        if matches!(self.kind, ErrorKind::Internal(_)) {
            tracing::error!(error = %self, request_id = ?self.request_id, "internal error");
        } else {
            tracing::debug!(error = %self, status = %self.status(), request_id = ?self.request_id, "request rejected");
        }

        let status = self.status();
        let retry_after = self.retry_after();
        let request_id = self.request_id.clone().unwrap_or_default();

        let mut body = format!(
            "{{\"error\":\"{}\",\"request_id\":\"{}\"",
            self.kind_str(),
            request_id
        );
        if let Some(detail) = self.detail() {
            body.push_str(&format!(",\"detail\":\"{}\"", detail.replace('"', "'")));
        }
        body.push('}');

        let mut res = Response::new(GatewayBody::from(body));
        *res.status_mut() = status;
        res.headers_mut().insert(
            http::header::CONTENT_TYPE,
            HeaderValue::from_static("application/json"),
        );
        if let Ok(v) = HeaderValue::from_str(&request_id) {
            res.headers_mut().insert("x-request-id", v);
        }
        if let Some(secs) = retry_after {
            if let Ok(v) = HeaderValue::from_str(&secs.to_string()) {
                res.headers_mut().insert(RETRY_AFTER, v);
            }
        }
        res
    }
}

pub type Result<T> = std::result::Result<T, GatewayError>;
