//! Transport Integration Tests
//!
//! Runs `GatewayServer` on a loopback socket and talks HTTP/2 to it, over
//! TLS with a throwaway CA in mTLS mode and in plaintext for bearer mode.
//! The handler echoes the identity the authentication layer attached.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::task::{Context, Poll};
use std::time::Duration;

use rcgen::{
    BasicConstraints, Certificate, CertificateParams, DnType, ExtendedKeyUsagePurpose, IsCa,
    KeyPair,
};
use rustls::pki_types::pem::PemObject;
use rustls::pki_types::{CertificateDer, PrivateKeyDer, ServerName};
use rustls::{ClientConfig, RootCertStore, SupportedProtocolVersion};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpListener, TcpStream};
use tokio_rustls::TlsConnector;
use tokio_util::sync::CancellationToken;
use tonic::server::NamedService;
use tonic::service::RoutesBuilder;

use ibkr_gateway::infrastructure::server::GatewayServer;
use ibkr_gateway::{
    AuthLayer, AuthMode, AuthenticatedIdentity, AuthenticationGate, EncryptionKey,
    InMemoryCredentialStore, MtlsConfig, SessionManager, build_authenticator,
};

const CALL_TIMEOUT: Duration = Duration::from_secs(10);

// =============================================================================
// Test PKI
// =============================================================================

struct Authority {
    cert: Certificate,
    key: KeyPair,
}

impl Authority {
    fn new(name: &str) -> Self {
        let key = KeyPair::generate().unwrap();
        let mut params = CertificateParams::new(Vec::<String>::new()).unwrap();
        params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
        params.distinguished_name.push(DnType::CommonName, name);
        let cert = params.self_signed(&key).unwrap();
        Self { cert, key }
    }

    /// Issue a leaf, returning `(cert_pem, key_pem)`.
    fn issue(&self, cn: &str, sans: &[&str], usage: ExtendedKeyUsagePurpose) -> (String, String) {
        let key = KeyPair::generate().unwrap();
        let sans: Vec<String> = sans.iter().map(|s| (*s).to_string()).collect();
        let mut params = CertificateParams::new(sans).unwrap();
        params.distinguished_name.push(DnType::CommonName, cn);
        params.extended_key_usages = vec![usage];
        let cert = params.signed_by(&key, &self.cert, &self.key).unwrap();
        (cert.pem(), key.serialize_pem())
    }

    fn pem(&self) -> String {
        self.cert.pem()
    }
}

fn client_config(
    ca_pem: &str,
    identity: Option<&(String, String)>,
    version: &'static SupportedProtocolVersion,
) -> ClientConfig {
    let mut roots = RootCertStore::empty();
    for cert in CertificateDer::pem_slice_iter(ca_pem.as_bytes()) {
        roots.add(cert.unwrap()).unwrap();
    }
    let builder =
        ClientConfig::builder_with_provider(Arc::new(rustls::crypto::ring::default_provider()))
            .with_protocol_versions(&[version])
            .unwrap()
            .with_root_certificates(roots);

    let mut config = match identity {
        Some((cert_pem, key_pem)) => {
            let chain = CertificateDer::pem_slice_iter(cert_pem.as_bytes())
                .collect::<Result<Vec<_>, _>>()
                .unwrap();
            let key = PrivateKeyDer::from_pem_slice(key_pem.as_bytes()).unwrap();
            builder.with_client_auth_cert(chain, key).unwrap()
        }
        None => builder.with_no_client_auth(),
    };
    config.alpn_protocols = vec![b"h2".to_vec()];
    config
}

// =============================================================================
// Echo Service
// =============================================================================

#[derive(Clone, Default)]
struct Echo {
    hits: Arc<AtomicUsize>,
}

impl NamedService for Echo {
    const NAME: &'static str = "test.Echo";
}

impl tower::Service<http::Request<tonic::body::Body>> for Echo {
    type Response = http::Response<tonic::body::Body>;
    type Error = Infallible;
    type Future = std::future::Ready<Result<Self::Response, Self::Error>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, request: http::Request<tonic::body::Body>) -> Self::Future {
        self.hits.fetch_add(1, Ordering::SeqCst);
        let identity = request
            .extensions()
            .get::<AuthenticatedIdentity>()
            .map(|id| id.as_str().to_string())
            .unwrap_or_default();
        let response = http::Response::builder()
            .header("content-type", "application/grpc")
            .header("grpc-status", "0")
            .header("x-identity", identity)
            .body(tonic::body::Body::empty())
            .unwrap();
        std::future::ready(Ok(response))
    }
}

// =============================================================================
// Harness
// =============================================================================

struct Running {
    addr: SocketAddr,
    hits: Arc<AtomicUsize>,
    shutdown: CancellationToken,
}

impl Drop for Running {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

async fn start(server: GatewayServer, shutdown: CancellationToken) -> Running {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let echo = Echo::default();
    let hits = Arc::clone(&echo.hits);

    let mut routes = RoutesBuilder::default();
    routes.add_service(echo);
    let routes = routes.routes();
    tokio::spawn(async move { server.serve(listener, routes).await });

    Running {
        addr,
        hits,
        shutdown,
    }
}

fn sessions() -> Arc<SessionManager<InMemoryCredentialStore>> {
    Arc::new(SessionManager::new(
        Arc::new(InMemoryCredentialStore::new()),
        EncryptionKey::from_bytes(&[0x17; 32]).unwrap(),
    ))
}

async fn start_mtls(ca: &Authority) -> Running {
    let (cert, key) = ca.issue("ibkr-gateway", &["localhost"], ExtendedKeyUsagePurpose::ServerAuth);
    let acceptor = MtlsConfig::from_pem(cert, key, ca.pem())
        .unwrap()
        .acceptor()
        .unwrap();
    let gate = AuthenticationGate::new(build_authenticator(AuthMode::Mtls, sessions()));
    let shutdown = CancellationToken::new();
    let server = GatewayServer::new(AuthLayer::new(gate), shutdown.clone()).with_tls(acceptor);
    start(server, shutdown).await
}

type Response = http::Response<h2::RecvStream>;

/// One unary-shaped HTTP/2 request over an established stream.
async fn send<T>(io: T, authorization: Option<&str>) -> Result<Response, String>
where
    T: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let (client, connection) = h2::client::handshake(io)
        .await
        .map_err(|e| e.to_string())?;
    tokio::spawn(async move {
        let _ = connection.await;
    });
    let mut client = client.ready().await.map_err(|e| e.to_string())?;

    let mut request = http::Request::builder()
        .method("POST")
        .uri("https://localhost/test.Echo/Identity")
        .header("content-type", "application/grpc")
        .header("te", "trailers");
    if let Some(value) = authorization {
        request = request.header("authorization", value);
    }
    let (response, _) = client
        .send_request(request.body(()).unwrap(), true)
        .map_err(|e| e.to_string())?;
    response.await.map_err(|e| e.to_string())
}

async fn call_tls(addr: SocketAddr, config: ClientConfig) -> Result<Response, String> {
    let attempt = async {
        let tcp = TcpStream::connect(addr).await.map_err(|e| e.to_string())?;
        let tls = TlsConnector::from(Arc::new(config))
            .connect(ServerName::try_from("localhost").unwrap(), tcp)
            .await
            .map_err(|e| e.to_string())?;
        send(tls, None).await
    };
    tokio::time::timeout(CALL_TIMEOUT, attempt)
        .await
        .expect("call neither completed nor failed")
}

async fn call_plain(addr: SocketAddr, authorization: Option<&str>) -> Result<Response, String> {
    let attempt = async {
        let tcp = TcpStream::connect(addr).await.map_err(|e| e.to_string())?;
        send(tcp, authorization).await
    };
    tokio::time::timeout(CALL_TIMEOUT, attempt)
        .await
        .expect("call neither completed nor failed")
}

fn header<'a>(response: &'a Response, name: &str) -> Option<&'a str> {
    response.headers().get(name).and_then(|v| v.to_str().ok())
}

// =============================================================================
// mTLS
// =============================================================================

#[tokio::test]
async fn verified_client_certificate_reaches_handler() {
    let ca = Authority::new("gateway-test-ca");
    let running = start_mtls(&ca).await;
    let client = ca.issue("trader-one", &[], ExtendedKeyUsagePurpose::ClientAuth);

    let response = call_tls(
        running.addr,
        client_config(&ca.pem(), Some(&client), &rustls::version::TLS13),
    )
    .await
    .unwrap();

    assert_eq!(response.status(), http::StatusCode::OK);
    assert_eq!(header(&response, "x-identity"), Some("trader-one"));
    assert_eq!(running.hits.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn client_without_certificate_is_refused() {
    let ca = Authority::new("gateway-test-ca");
    let running = start_mtls(&ca).await;

    let result = call_tls(
        running.addr,
        client_config(&ca.pem(), None, &rustls::version::TLS13),
    )
    .await;

    assert!(result.is_err(), "handshake without client certificate succeeded");
    assert_eq!(running.hits.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn tls12_client_is_refused() {
    let ca = Authority::new("gateway-test-ca");
    let running = start_mtls(&ca).await;
    let client = ca.issue("trader-one", &[], ExtendedKeyUsagePurpose::ClientAuth);

    let result = call_tls(
        running.addr,
        client_config(&ca.pem(), Some(&client), &rustls::version::TLS12),
    )
    .await;

    assert!(result.is_err(), "TLS 1.2 handshake succeeded");
    assert_eq!(running.hits.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn certificate_from_unknown_ca_is_refused() {
    let ca = Authority::new("gateway-test-ca");
    let rogue = Authority::new("rogue-ca");
    let running = start_mtls(&ca).await;
    let client = rogue.issue("trader-one", &[], ExtendedKeyUsagePurpose::ClientAuth);

    let result = call_tls(
        running.addr,
        client_config(&ca.pem(), Some(&client), &rustls::version::TLS13),
    )
    .await;

    assert!(result.is_err(), "certificate from an untrusted CA was accepted");
    assert_eq!(running.hits.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn server_keeps_serving_after_refused_handshake() {
    let ca = Authority::new("gateway-test-ca");
    let running = start_mtls(&ca).await;
    let client = ca.issue("trader-two", &[], ExtendedKeyUsagePurpose::ClientAuth);

    let refused = call_tls(
        running.addr,
        client_config(&ca.pem(), None, &rustls::version::TLS13),
    )
    .await;
    assert!(refused.is_err());

    let response = call_tls(
        running.addr,
        client_config(&ca.pem(), Some(&client), &rustls::version::TLS13),
    )
    .await
    .unwrap();
    assert_eq!(header(&response, "x-identity"), Some("trader-two"));
}

// =============================================================================
// Bearer over plaintext
// =============================================================================

#[tokio::test]
async fn bearer_session_reaches_handler() {
    let sessions = sessions();
    let token = sessions.create("U7654321").await.unwrap();
    let gate = AuthenticationGate::new(build_authenticator(AuthMode::Bearer, sessions));
    let shutdown = CancellationToken::new();
    let running = start(
        GatewayServer::new(AuthLayer::new(gate), shutdown.clone()),
        shutdown,
    )
    .await;

    let authorization = format!("Bearer {}", token.expose());
    let response = call_plain(running.addr, Some(&authorization)).await.unwrap();
    assert_eq!(header(&response, "x-identity"), Some("U7654321"));

    let rejected = call_plain(running.addr, None).await.unwrap();
    assert_eq!(header(&rejected, "grpc-status"), Some("16"));
    assert_eq!(running.hits.load(Ordering::SeqCst), 1);
}
