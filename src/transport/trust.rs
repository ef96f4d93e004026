// Certificate trust policies and their rustls adapter

use std::fmt;
use std::path::Path;
use std::sync::Arc;

use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::client::WebPkiServerVerifier;
use rustls::crypto::CryptoProvider;
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::{DigitallySignedStruct, RootCertStore, SignatureScheme};

use crate::error::{ClientError, Result};

/// Decides whether a server certificate chain is acceptable for a host
///
/// The transport hands every TLS handshake to the configured policy, so
/// swapping the policy changes verification without touching request code.
pub trait TrustPolicy: fmt::Debug + Send + Sync {
    /// Accept or reject the chain presented by `server_name`
    fn verify(
        &self,
        end_entity: &CertificateDer<'_>,
        intermediates: &[CertificateDer<'_>],
        server_name: &ServerName<'_>,
        now: UnixTime,
    ) -> std::result::Result<(), rustls::Error>;

    /// Short name used in logs
    fn name(&self) -> &'static str;
}

/// Accepts every certificate chain and every hostname.
///
/// This is the default policy and it is INSECURE: any party able to intercept
/// traffic can impersonate the controller and capture bearer tokens. It exists
/// for compatibility with controllers running self-signed certificates.
/// Production deployments should configure [`PinnedRootsPolicy`] instead.
#[derive(Debug, Default, Clone, Copy)]
pub struct AcceptAllCertificates;

impl TrustPolicy for AcceptAllCertificates {
    fn verify(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _now: UnixTime,
    ) -> std::result::Result<(), rustls::Error> {
        Ok(())
    }

    fn name(&self) -> &'static str {
        "accept-all"
    }
}

/// Full WebPKI chain and hostname validation against caller-supplied roots
#[derive(Debug, Clone)]
pub struct PinnedRootsPolicy {
    verifier: Arc<WebPkiServerVerifier>,
    roots: usize,
}

impl PinnedRootsPolicy {
    /// Build from one or more PEM encoded CA certificates
    pub fn from_pem(pem: &[u8]) -> Result<Self> {
        let mut roots = RootCertStore::empty();
        let mut reader = pem;

        for cert in rustls_pemfile::certs(&mut reader) {
            let cert = cert.map_err(|e| {
                ClientError::TransportInit(format!("Failed to read PEM certificate: {}", e))
            })?;
            roots.add(cert).map_err(|e| {
                ClientError::TransportInit(format!("Rejected CA certificate: {}", e))
            })?;
        }

        if roots.is_empty() {
            return Err(ClientError::TransportInit(
                "No CA certificates found in PEM input".to_string(),
            ));
        }

        let count = roots.len();
        let verifier = WebPkiServerVerifier::builder_with_provider(
            Arc::new(roots),
            Arc::new(rustls::crypto::ring::default_provider()),
        )
        .build()
        .map_err(|e| {
            ClientError::TransportInit(format!("Failed to build certificate verifier: {}", e))
        })?;

        Ok(Self {
            verifier,
            roots: count,
        })
    }

    /// Read CA certificates from a PEM file
    pub fn from_pem_file(path: &Path) -> Result<Self> {
        let pem = std::fs::read(path).map_err(|e| {
            ClientError::TransportInit(format!(
                "Failed to read CA file {}: {}",
                path.display(),
                e
            ))
        })?;
        Self::from_pem(&pem)
    }

    /// Number of trusted roots
    pub fn root_count(&self) -> usize {
        self.roots
    }
}

impl TrustPolicy for PinnedRootsPolicy {
    fn verify(
        &self,
        end_entity: &CertificateDer<'_>,
        intermediates: &[CertificateDer<'_>],
        server_name: &ServerName<'_>,
        now: UnixTime,
    ) -> std::result::Result<(), rustls::Error> {
        self.verifier
            .verify_server_cert(end_entity, intermediates, server_name, &[], now)
            .map(|_| ())
    }

    fn name(&self) -> &'static str {
        "pinned-roots"
    }
}

/// Bridges a [`TrustPolicy`] into rustls
///
/// Chain and hostname decisions belong to the policy. Handshake signatures
/// are always checked with the provider's algorithms.
#[derive(Debug)]
pub(crate) struct PolicyVerifier {
    policy: Arc<dyn TrustPolicy>,
    provider: Arc<CryptoProvider>,
}

impl PolicyVerifier {
    pub(crate) fn new(policy: Arc<dyn TrustPolicy>, provider: Arc<CryptoProvider>) -> Self {
        Self { policy, provider }
    }
}

impl ServerCertVerifier for PolicyVerifier {
    fn verify_server_cert(
        &self,
        end_entity: &CertificateDer<'_>,
        intermediates: &[CertificateDer<'_>],
        server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        now: UnixTime,
    ) -> std::result::Result<ServerCertVerified, rustls::Error> {
        match self.policy.verify(end_entity, intermediates, server_name, now) {
            Ok(()) => Ok(ServerCertVerified::assertion()),
            Err(e) => {
                tracing::warn!(
                    policy = self.policy.name(),
                    server = ?server_name,
                    error = %e,
                    "Server certificate rejected"
                );
                Err(e)
            }
        }
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls12_signature(
            message,
            cert,
            dss,
            &self.provider.signature_verification_algorithms,
        )
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls13_signature(
            message,
            cert,
            dss,
            &self.provider.signature_verification_algorithms,
        )
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.provider
            .signature_verification_algorithms
            .supported_schemes()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_accept_all_accepts_anything() {
        let policy = AcceptAllCertificates;
        let cert = CertificateDer::from(vec![0u8, 1, 2, 3]);
        let name = ServerName::try_from("api.example.com").unwrap();

        assert!(policy.verify(&cert, &[], &name, UnixTime::now()).is_ok());
        assert_eq!(policy.name(), "accept-all");
    }

    #[test]
    fn test_pinned_roots_rejects_empty_pem() {
        let err = PinnedRootsPolicy::from_pem(b"not a certificate").unwrap_err();
        assert!(matches!(err, ClientError::TransportInit(_)));
        assert!(err.to_string().contains("No CA certificates"));
    }

    #[test]
    fn test_pinned_roots_missing_file() {
        let err = PinnedRootsPolicy::from_pem_file(Path::new("/nonexistent/ca.pem")).unwrap_err();
        assert!(matches!(err, ClientError::TransportInit(_)));
    }

    #[test]
    fn test_policy_verifier_delegates_chain_decision() {
        #[derive(Debug)]
        struct RejectAll;

        impl TrustPolicy for RejectAll {
            fn verify(
                &self,
                _end_entity: &CertificateDer<'_>,
                _intermediates: &[CertificateDer<'_>],
                _server_name: &ServerName<'_>,
                _now: UnixTime,
            ) -> std::result::Result<(), rustls::Error> {
                Err(rustls::Error::General("rejected".into()))
            }

            fn name(&self) -> &'static str {
                "reject-all"
            }
        }

        let provider = Arc::new(rustls::crypto::ring::default_provider());
        let cert = CertificateDer::from(vec![0u8; 4]);
        let name = ServerName::try_from("api.example.com").unwrap();

        let verifier = PolicyVerifier::new(Arc::new(RejectAll), provider.clone());
        assert!(verifier
            .verify_server_cert(&cert, &[], &name, &[], UnixTime::now())
            .is_err());

        let verifier = PolicyVerifier::new(Arc::new(AcceptAllCertificates), provider);
        assert!(verifier
            .verify_server_cert(&cert, &[], &name, &[], UnixTime::now())
            .is_ok());
        assert!(!verifier.supported_verify_schemes().is_empty());
    }
}
