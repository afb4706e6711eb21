//! Request correlation.
//!
//! Every request gets a correlation id, taken from `X-Correlation-ID` or
//! `X-Request-ID` when the caller sent a usable one and generated otherwise.
//! Handlers run inside an `http_request` span carrying the id, and the response
//! echoes it in `X-Correlation-ID`.
//!
//! The job transport forwards its own delivery id in `X-Request-ID`, so the
//! retries of one rollback job share a correlation id across log lines.

use axum::{extract::Request, http::HeaderValue, response::Response};
use std::sync::Arc;
use std::task::{Context, Poll};
use tower::{Layer, Service};
use tracing::Instrument;
use uuid::Uuid;

/// Header name for correlation ID.
pub const CORRELATION_ID_HEADER: &str = "X-Correlation-ID";

/// Fallback header set by proxies and the job transport.
pub const REQUEST_ID_HEADER: &str = "X-Request-ID";

const MAX_ID_LEN: usize = 128;

/// Correlation id of the current request, stored in request extensions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CorrelationId(Arc<str>);

impl CorrelationId {
    fn generate() -> Self {
        Self(Arc::from(Uuid::new_v4().to_string()))
    }

    /// Accept an upstream id if it is short and made of token characters.
    fn from_upstream(raw: &str) -> Option<Self> {
        let raw = raw.trim();
        let usable = !raw.is_empty()
            && raw.len() <= MAX_ID_LEN
            && raw
                .bytes()
                .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'-' | b'_' | b'.' | b':'));
        usable.then(|| Self(Arc::from(raw)))
    }

    /// The id as sent in headers and logs.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Create the correlation layer.
#[must_use]
pub const fn correlation_id_layer() -> CorrelationIdLayer {
    CorrelationIdLayer
}

/// Layer installing [`CorrelationIdMiddleware`].
#[derive(Clone, Copy, Debug)]
pub struct CorrelationIdLayer;

impl<S> Layer<S> for CorrelationIdLayer {
    type Service = CorrelationIdMiddleware<S>;

    fn layer(&self, inner: S) -> Self::Service {
        CorrelationIdMiddleware { inner }
    }
}

/// Service assigning a [`CorrelationId`] to each request.
#[derive(Clone, Debug)]
pub struct CorrelationIdMiddleware<S> {
    inner: S,
}

fn resolve(req: &Request) -> CorrelationId {
    [CORRELATION_ID_HEADER, REQUEST_ID_HEADER]
        .into_iter()
        .filter_map(|name| req.headers().get(name))
        .filter_map(|value| value.to_str().ok())
        .find_map(CorrelationId::from_upstream)
        .unwrap_or_else(CorrelationId::generate)
}

impl<S> Service<Request> for CorrelationIdMiddleware<S>
where
    S: Service<Request, Response = Response> + Send + 'static,
    S::Future: Send + 'static,
{
    type Response = S::Response;
    type Error = S::Error;
    type Future = std::pin::Pin<
        Box<dyn std::future::Future<Output = Result<Self::Response, Self::Error>> + Send>,
    >;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, mut req: Request) -> Self::Future {
        let correlation_id = resolve(&req);
        let header_value = HeaderValue::from_str(correlation_id.as_str()).ok();

        // Path only: query strings may carry buyer details.
        let span = tracing::info_span!(
            "http_request",
            correlation_id = %correlation_id.as_str(),
            method = %req.method(),
            path = %req.uri().path(),
        );
        req.extensions_mut().insert(correlation_id);

        let fut = self.inner.call(req);

        Box::pin(async move {
            let mut response = fut.instrument(span).await?;
            if let Some(value) = header_value {
                response.headers_mut().insert(CORRELATION_ID_HEADER, value);
            }
            Ok(response)
        })
    }
}
