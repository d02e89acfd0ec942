//! Per-request logging.
//!
//! Sits inside [`AuthLayer`](crate::AuthLayer), so it only sees
//! authenticated calls. Rejections are logged by the gate itself.

use std::task::{Context, Poll};
use std::time::Instant;

use futures::future::BoxFuture;
use tower::{Layer, Service};

use crate::infrastructure::auth::AuthenticatedIdentity;

/// Layer that wraps services in [`RequestLogService`].
#[derive(Debug, Clone, Copy, Default)]
pub struct RequestLogLayer;

impl RequestLogLayer {
    /// Create the layer.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

impl<S> Layer<S> for RequestLogLayer {
    type Service = RequestLogService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        RequestLogService { inner }
    }
}

/// Logs procedure, caller, outcome and duration of each call.
#[derive(Debug, Clone)]
pub struct RequestLogService<S> {
    inner: S,
}

impl<S, ReqBody, ResBody> Service<http::Request<ReqBody>> for RequestLogService<S>
where
    S: Service<http::Request<ReqBody>, Response = http::Response<ResBody>> + Clone + Send + 'static,
    S::Future: Send + 'static,
    S::Error: std::fmt::Display,
    ReqBody: Send + 'static,
{
    type Response = http::Response<ResBody>;
    type Error = S::Error;
    type Future = BoxFuture<'static, Result<Self::Response, Self::Error>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, request: http::Request<ReqBody>) -> Self::Future {
        let clone = self.inner.clone();
        let mut inner = std::mem::replace(&mut self.inner, clone);

        let procedure = request.uri().path().to_owned();
        let identity = request
            .extensions()
            .get::<AuthenticatedIdentity>()
            .map(|id| id.as_str().to_owned())
            .unwrap_or_default();
        tracing::info!(
            procedure = %procedure,
            protocol = ?request.version(),
            identity = %identity,
            "Request started"
        );

        Box::pin(async move {
            let started = Instant::now();
            let result = inner.call(request).await;
            let duration_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);

            match &result {
                Ok(response) => match tonic::Status::from_header_map(response.headers()) {
                    // Trailers-only responses carry a failed status in the headers.
                    Some(status) if status.code() != tonic::Code::Ok => tracing::warn!(
                        procedure = %procedure,
                        duration_ms,
                        code = ?status.code(),
                        message = status.message(),
                        "Request failed"
                    ),
                    _ => tracing::info!(procedure = %procedure, duration_ms, "Request completed"),
                },
                Err(e) => tracing::error!(
                    procedure = %procedure,
                    duration_ms,
                    error = %e,
                    "Request failed"
                ),
            }
            result
        })
    }
}
