// Transport factory
// Builds the blocking HTTP execution unit: proxy routing, timeouts, TLS trust

mod trust;

pub use trust::{AcceptAllCertificates, PinnedRootsPolicy, TrustPolicy};

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use reqwest::blocking::{Client, Request};
use reqwest::header::HeaderMap;

use crate::error::{ClientError, Result, TransportFailureKind};
use trust::PolicyVerifier;

/// HTTP proxy every outbound connection is routed through
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxyConfig {
    host: String,
    port: u16,
}

impl ProxyConfig {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    fn url(&self) -> String {
        format!("http://{}:{}", self.host, self.port)
    }
}

/// TLS protocol versions the transport may negotiate
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TlsVersion {
    Tls12,
    Tls13,
}

impl TlsVersion {
    fn as_rustls(&self) -> &'static rustls::SupportedProtocolVersion {
        match self {
            TlsVersion::Tls12 => &rustls::version::TLS12,
            TlsVersion::Tls13 => &rustls::version::TLS13,
        }
    }
}

/// Everything the factory needs to build a transport
#[derive(Debug, Clone)]
pub struct TransportSettings {
    /// Route through this proxy; direct connections when `None`
    pub proxy: Option<ProxyConfig>,

    /// Certificate policy. Defaults to [`AcceptAllCertificates`] (insecure).
    pub trust_policy: Arc<dyn TrustPolicy>,

    pub connect_timeout: Duration,

    /// Whole-request timeout, covering the read of the response body
    pub request_timeout: Duration,

    pub tls_versions: Vec<TlsVersion>,

    pub user_agent: String,
}

impl Default for TransportSettings {
    fn default() -> Self {
        Self {
            proxy: None,
            trust_policy: Arc::new(AcceptAllCertificates),
            connect_timeout: Duration::from_secs(30),
            request_timeout: Duration::from_secs(300),
            tls_versions: vec![TlsVersion::Tls12, TlsVersion::Tls13],
            user_agent: format!("cfc/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

/// A fully read HTTP response
#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: u16,
    pub headers: HeaderMap,
    pub body: Vec<u8>,
}

impl HttpResponse {
    pub fn new(status: u16, body: impl Into<Vec<u8>>) -> Self {
        Self {
            status,
            headers: HeaderMap::new(),
            body: body.into(),
        }
    }

    pub fn with_header(mut self, name: &'static str, value: &str) -> Self {
        if let Ok(value) = value.parse() {
            self.headers.insert(name, value);
        }
        self
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }
}

/// Why an exchange produced no HTTP response
#[derive(Debug, Clone)]
pub struct TransportFailure {
    pub kind: TransportFailureKind,
    pub message: String,
}

impl TransportFailure {
    pub fn new(kind: TransportFailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    fn from_reqwest(e: &reqwest::Error) -> Self {
        // TLS failures surface as connect errors, so look for them first
        let kind = if is_tls_failure(e) {
            TransportFailureKind::Tls
        } else if e.is_timeout() {
            TransportFailureKind::Timeout
        } else if e.is_connect() {
            TransportFailureKind::Connect
        } else if e.is_request() {
            TransportFailureKind::Request
        } else if e.is_body() || e.is_decode() {
            TransportFailureKind::Body
        } else {
            TransportFailureKind::Other
        };

        Self {
            kind,
            message: error_chain(e),
        }
    }

    /// Attach the attempted operation
    pub fn into_error(self, operation: &str) -> ClientError {
        ClientError::Transport {
            operation: operation.to_string(),
            kind: self.kind,
            status: None,
            message: self.message,
        }
    }
}

impl fmt::Display for TransportFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.message, self.kind)
    }
}

/// Sends one request and reads the whole response. Never retries.
pub trait Transport: Send + Sync {
    fn send(&self, request: Request) -> std::result::Result<HttpResponse, TransportFailure>;
}

/// Production transport over a blocking reqwest client
pub struct ReqwestTransport {
    client: Client,
    policy: &'static str,
}

impl ReqwestTransport {
    /// Name of the trust policy this transport was built with
    pub fn trust_policy(&self) -> &'static str {
        self.policy
    }
}

impl Transport for ReqwestTransport {
    fn send(&self, request: Request) -> std::result::Result<HttpResponse, TransportFailure> {
        let response = self
            .client
            .execute(request)
            .map_err(|e| TransportFailure::from_reqwest(&e))?;

        let status = response.status().as_u16();
        let headers = response.headers().clone();
        let body = response
            .bytes()
            .map_err(|e| TransportFailure::from_reqwest(&e))?;

        Ok(HttpResponse {
            status,
            headers,
            body: body.to_vec(),
        })
    }
}

/// Builds transports from [`TransportSettings`]. Performs no network I/O.
pub struct TransportFactory;

impl TransportFactory {
    pub fn build(settings: &TransportSettings) -> Result<ReqwestTransport> {
        let tls = build_tls_config(settings)?;

        let mut builder = Client::builder()
            .connect_timeout(settings.connect_timeout)
            .timeout(settings.request_timeout)
            .user_agent(settings.user_agent.clone())
            .use_preconfigured_tls(tls);

        builder = match &settings.proxy {
            Some(proxy) => {
                let proxy = reqwest::Proxy::all(proxy.url()).map_err(|e| {
                    ClientError::TransportInit(format!("Invalid proxy {}: {}", proxy.url(), e))
                })?;
                builder.proxy(proxy)
            }
            None => builder.no_proxy(),
        };

        let client = builder
            .build()
            .map_err(|e| ClientError::TransportInit(format!("Failed to create HTTP client: {}", e)))?;

        tracing::debug!(
            proxy = ?settings.proxy.as_ref().map(ProxyConfig::url),
            trust_policy = settings.trust_policy.name(),
            connect_timeout_ms = settings.connect_timeout.as_millis() as u64,
            request_timeout_ms = settings.request_timeout.as_millis() as u64,
            "HTTP transport initialized"
        );

        if settings.trust_policy.name() == AcceptAllCertificates.name() {
            tracing::warn!("TLS certificate verification is disabled (accept-all trust policy)");
        }

        Ok(ReqwestTransport {
            client,
            policy: settings.trust_policy.name(),
        })
    }

    /// Same as [`TransportFactory::build`], boxed behind the trait
    pub fn build_shared(settings: &TransportSettings) -> Result<Arc<dyn Transport>> {
        Ok(Arc::new(Self::build(settings)?))
    }
}

fn build_tls_config(settings: &TransportSettings) -> Result<rustls::ClientConfig> {
    if settings.tls_versions.is_empty() {
        return Err(ClientError::TransportInit(
            "No TLS protocol versions enabled".to_string(),
        ));
    }

    let versions: Vec<&'static rustls::SupportedProtocolVersion> = settings
        .tls_versions
        .iter()
        .map(TlsVersion::as_rustls)
        .collect();

    let provider = Arc::new(rustls::crypto::ring::default_provider());
    let verifier = PolicyVerifier::new(settings.trust_policy.clone(), provider.clone());

    let config = rustls::ClientConfig::builder_with_provider(provider)
        .with_protocol_versions(&versions)
        .map_err(|e| ClientError::TransportInit(format!("Unsupported TLS configuration: {}", e)))?
        .dangerous()
        .with_custom_certificate_verifier(Arc::new(verifier))
        .with_no_client_auth();

    Ok(config)
}

fn is_tls_failure(e: &reqwest::Error) -> bool {
    let mut source: Option<&(dyn std::error::Error + 'static)> = Some(e);
    while let Some(err) = source {
        if err.is::<rustls::Error>() {
            return true;
        }
        if let Some(io) = err.downcast_ref::<std::io::Error>() {
            if io.get_ref().is_some_and(|inner| inner.is::<rustls::Error>()) {
                return true;
            }
        }
        source = err.source();
    }
    false
}

fn error_chain(e: &reqwest::Error) -> String {
    let mut message = e.to_string();
    let mut source = std::error::Error::source(e);
    while let Some(err) = source {
        message.push_str(": ");
        message.push_str(&err.to_string());
        source = err.source();
    }
    message
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_with_defaults() {
        let transport = TransportFactory::build(&TransportSettings::default()).unwrap();
        assert_eq!(transport.trust_policy(), "accept-all");
    }

    #[test]
    fn test_build_with_proxy() {
        let settings = TransportSettings {
            proxy: Some(ProxyConfig::new("proxy.internal", 3128)),
            ..TransportSettings::default()
        };
        assert!(TransportFactory::build(&settings).is_ok());
    }

    #[test]
    fn test_empty_tls_versions_fail_init() {
        let settings = TransportSettings {
            tls_versions: vec![],
            ..TransportSettings::default()
        };
        let err = TransportFactory::build(&settings).err().unwrap();
        assert!(matches!(err, ClientError::TransportInit(_)));
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_tls13_only_builds() {
        let settings = TransportSettings {
            tls_versions: vec![TlsVersion::Tls13],
            ..TransportSettings::default()
        };
        assert!(TransportFactory::build(&settings).is_ok());
    }

    #[test]
    fn test_proxy_url() {
        let proxy = ProxyConfig::new("10.0.0.1", 8080);
        assert_eq!(proxy.url(), "http://10.0.0.1:8080");
        assert_eq!(proxy.host(), "10.0.0.1");
        assert_eq!(proxy.port(), 8080);
    }

    #[test]
    fn test_http_response_helpers() {
        let response = HttpResponse::new(206, "partial").with_header("x-app-staging-log", "http://log");
        assert!(response.is_success());
        assert_eq!(response.text(), "partial");
        assert_eq!(response.header("x-app-staging-log"), Some("http://log"));
        assert!(!HttpResponse::new(404, "").is_success());
    }

    #[test]
    fn test_failure_into_error() {
        let err = TransportFailure::new(TransportFailureKind::Connect, "connection refused")
            .into_error("GET /v2/info");
        assert!(err.is_retryable());
        assert!(err.to_string().contains("GET /v2/info"));
        assert!(err.to_string().contains("connection_failed"));
    }
}
