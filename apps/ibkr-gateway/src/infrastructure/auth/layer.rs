//! Tower layer that authenticates every request before routing.
//!
//! [`GatewayServer`](crate::infrastructure::server::GatewayServer) mounts
//! it outermost so it wraps every service:
//!
//! ```ignore
//! Server::builder()
//!     .layer(AuthLayer::new(gate))
//!     .layer(RequestLogLayer::new())
//!     .add_routes(routes)
//!     .serve_with_incoming_shutdown(tls_incoming, shutdown)
//!     .await?;
//! ```
//!
//! Handlers read the caller with [`authenticated_identity`].

use std::sync::Arc;
use std::task::{Context, Poll};

use futures::future::BoxFuture;
use tonic::transport::server::{TcpConnectInfo, TlsConnectInfo};
use tower::{Layer, Service};

use super::gate::{AuthenticatedIdentity, AuthenticationGate, RequestCredentials};

impl RequestCredentials {
    /// Collect credentials from an HTTP/2 request.
    ///
    /// Reads the `authorization` header and the first certificate of the
    /// verified peer chain that tonic records in the request extensions.
    #[must_use]
    pub fn from_http<B>(request: &http::Request<B>) -> Self {
        let authorization = request
            .headers()
            .get(http::header::AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .map(str::to_owned);

        let peer_certificate = request
            .extensions()
            .get::<TlsConnectInfo<TcpConnectInfo>>()
            .and_then(|info| info.peer_certs())
            .and_then(|chain| chain.first().map(|cert| cert.to_vec()));

        Self {
            authorization,
            peer_certificate,
        }
    }
}

/// Identity attached by [`AuthLayer`], if the request was authenticated.
#[must_use]
pub fn authenticated_identity<T>(request: &tonic::Request<T>) -> Option<&AuthenticatedIdentity> {
    request.extensions().get::<AuthenticatedIdentity>()
}

/// Layer that wraps services in [`AuthService`].
#[derive(Debug, Clone)]
pub struct AuthLayer {
    gate: Arc<AuthenticationGate>,
}

impl AuthLayer {
    /// Create a layer around `gate`.
    #[must_use]
    pub fn new(gate: AuthenticationGate) -> Self {
        Self {
            gate: Arc::new(gate),
        }
    }
}

impl<S> Layer<S> for AuthLayer {
    type Service = AuthService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        AuthService {
            inner,
            gate: Arc::clone(&self.gate),
        }
    }
}

/// Service that rejects unauthenticated requests and tags the rest.
#[derive(Debug, Clone)]
pub struct AuthService<S> {
    inner: S,
    gate: Arc<AuthenticationGate>,
}

impl<S, ReqBody, ResBody> Service<http::Request<ReqBody>> for AuthService<S>
where
    S: Service<http::Request<ReqBody>, Response = http::Response<ResBody>> + Clone + Send + 'static,
    S::Future: Send + 'static,
    ReqBody: Send + 'static,
    ResBody: Default + Send + 'static,
{
    type Response = http::Response<ResBody>;
    type Error = S::Error;
    type Future = BoxFuture<'static, Result<Self::Response, Self::Error>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, mut request: http::Request<ReqBody>) -> Self::Future {
        // Keep the instance that was polled ready; leave a fresh clone behind.
        let clone = self.inner.clone();
        let mut inner = std::mem::replace(&mut self.inner, clone);
        let gate = Arc::clone(&self.gate);

        Box::pin(async move {
            let credentials = RequestCredentials::from_http(&request);
            match gate.authenticate(&credentials).await {
                Ok(identity) => {
                    request.extensions_mut().insert(identity);
                    inner.call(request).await
                }
                Err(rejection) => Ok(rejection.to_status().into_http()),
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use std::convert::Infallible;

    use tower::ServiceExt;

    use super::*;
    use crate::infrastructure::auth::MtlsAuthenticator;

    #[test]
    fn from_http_reads_authorization() {
        let request = http::Request::builder()
            .header("authorization", "Bearer abc")
            .body(())
            .unwrap();
        let creds = RequestCredentials::from_http(&request);
        assert_eq!(creds.authorization.as_deref(), Some("Bearer abc"));
        assert!(creds.peer_certificate.is_none());
    }

    #[test]
    fn from_http_without_headers() {
        let request = http::Request::builder().body(()).unwrap();
        assert_eq!(
            RequestCredentials::from_http(&request),
            RequestCredentials::default()
        );
    }

    #[test]
    fn from_http_drops_non_utf8_header() {
        let request = http::Request::builder()
            .header(
                "authorization",
                http::HeaderValue::from_bytes(b"Bearer \xff").unwrap(),
            )
            .body(())
            .unwrap();
        assert!(RequestCredentials::from_http(&request).authorization.is_none());
    }

    #[tokio::test]
    async fn plaintext_connection_rejected_in_mtls_mode() {
        let gate = AuthenticationGate::new(Arc::new(MtlsAuthenticator::new()));
        let inner = tower::service_fn(|_: http::Request<()>| async {
            Ok::<_, Infallible>(http::Response::new("handler".to_string()))
        });

        let response = AuthLayer::new(gate)
            .layer(inner)
            .oneshot(http::Request::new(()))
            .await
            .unwrap();

        assert_eq!(response.headers().get("grpc-status").unwrap(), "16");
        assert!(response.body().is_empty());
    }
}
