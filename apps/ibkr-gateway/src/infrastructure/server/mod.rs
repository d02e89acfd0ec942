//! gRPC Server Hosting
//!
//! Hosts tonic routes behind the authentication and request-logging layers.
//! In mTLS mode connections are accepted through a rustls acceptor that only
//! speaks TLS 1.3 and requires a client certificate; failed handshakes are
//! logged and dropped before tonic sees them.
//!
//! ```text
//! TCP ──► TLS 1.3 handshake ──► AuthLayer ──► RequestLogLayer ──► routes
//! ```

mod logging;

use std::net::SocketAddr;
use std::time::Duration;

use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_rustls::TlsAcceptor;
use tokio_rustls::server::TlsStream;
use tokio_stream::wrappers::{ReceiverStream, TcpListenerStream};
use tokio_util::sync::CancellationToken;
use tonic::service::Routes;
use tonic::transport::Server;

pub use logging::{RequestLogLayer, RequestLogService};

use crate::infrastructure::auth::AuthLayer;

/// Longest a client may take to complete the TLS handshake.
pub const TLS_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

/// Completed handshakes waiting for tonic to pick them up.
const ACCEPT_BACKLOG: usize = 64;

/// Server errors.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    /// Failed to bind the listening socket.
    #[error("failed to bind gRPC server to port {port}: {source}")]
    Bind {
        /// Requested port.
        port: u16,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// Transport failure while serving.
    #[error("gRPC transport error: {0}")]
    Transport(#[from] tonic::transport::Error),
}

/// Bind the gRPC listener on all interfaces.
pub async fn bind(port: u16) -> Result<TcpListener, ServerError> {
    TcpListener::bind(SocketAddr::from(([0, 0, 0, 0], port)))
        .await
        .map_err(|source| ServerError::Bind { port, source })
}

/// tonic server with the gateway's layers mounted.
pub struct GatewayServer {
    auth: AuthLayer,
    tls: Option<TlsAcceptor>,
    shutdown: CancellationToken,
}

impl std::fmt::Debug for GatewayServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GatewayServer")
            .field("auth", &self.auth)
            .field("tls", &self.tls.is_some())
            .finish_non_exhaustive()
    }
}

impl GatewayServer {
    /// Plaintext server; call [`with_tls`](Self::with_tls) for mTLS.
    #[must_use]
    pub const fn new(auth: AuthLayer, shutdown: CancellationToken) -> Self {
        Self {
            auth,
            tls: None,
            shutdown,
        }
    }

    /// Accept connections through `acceptor`.
    #[must_use]
    pub fn with_tls(mut self, acceptor: TlsAcceptor) -> Self {
        self.tls = Some(acceptor);
        self
    }

    /// Serve `routes` on `listener` until the shutdown token is cancelled.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::Transport`] if tonic fails while serving.
    pub async fn serve(self, listener: TcpListener, routes: Routes) -> Result<(), ServerError> {
        let local_addr = listener.local_addr().ok();
        let router = Server::builder()
            .layer(self.auth)
            .layer(RequestLogLayer::new())
            .add_routes(routes);
        let signal = self.shutdown.clone().cancelled_owned();

        match self.tls {
            Some(acceptor) => {
                tracing::info!(addr = ?local_addr, tls = true, "gRPC server listening");
                let incoming = tls_incoming(listener, acceptor, self.shutdown.clone());
                router.serve_with_incoming_shutdown(incoming, signal).await?;
            }
            None => {
                tracing::info!(addr = ?local_addr, tls = false, "gRPC server listening");
                let incoming = TcpListenerStream::new(listener);
                router.serve_with_incoming_shutdown(incoming, signal).await?;
            }
        }

        tracing::info!("gRPC server stopped");
        Ok(())
    }
}

/// Stream of established TLS connections.
///
/// Each handshake runs on its own task so a slow client cannot stall the
/// accept loop.
fn tls_incoming(
    listener: TcpListener,
    acceptor: TlsAcceptor,
    shutdown: CancellationToken,
) -> ReceiverStream<Result<TlsStream<TcpStream>, std::io::Error>> {
    let (tx, rx) = mpsc::channel(ACCEPT_BACKLOG);

    tokio::spawn(async move {
        loop {
            let (tcp, peer) = tokio::select! {
                biased;
                () = shutdown.cancelled() => break,
                accepted = listener.accept() => match accepted {
                    Ok(accepted) => accepted,
                    Err(e) => {
                        tracing::warn!(error = %e, "TCP accept failed");
                        continue;
                    }
                },
            };
            let _ = tcp.set_nodelay(true);

            let acceptor = acceptor.clone();
            let tx = tx.clone();
            tokio::spawn(async move {
                match tokio::time::timeout(TLS_HANDSHAKE_TIMEOUT, acceptor.accept(tcp)).await {
                    Ok(Ok(stream)) => {
                        let _ = tx.send(Ok(stream)).await;
                    }
                    Ok(Err(e)) => {
                        tracing::warn!(peer = %peer, error = %e, "TLS handshake rejected");
                    }
                    Err(_) => tracing::warn!(peer = %peer, "TLS handshake timed out"),
                }
            });
        }
    });

    ReceiverStream::new(rx)
}
