//! TLS configuration.
//!
//! Trust and key material are handed to a connection through an explicit
//! configure call ([`CertStore`] and [`Identity`]); hostname verification
//! can be replaced per connection with a [`HostnameVerifier`]. Installing a
//! custom verifier gives the connection its own TLS-aware connector and a
//! fresh connection pool instead of the one shared through the factory.

use std::fmt;
use std::io::Cursor;
use std::sync::Arc;
use std::time::SystemTime;

use rustls::client::{ServerCertVerified, ServerCertVerifier, WebPkiVerifier};
use rustls::{CertificateError, OwnedTrustAnchor, RootCertStore, ServerName};

use crate::error;

/// A DER-encoded X.509 certificate.
pub struct Certificate {
    der: Vec<u8>,
}

impl Certificate {
    /// Create a `Certificate` from DER bytes.
    pub fn from_der(der: &[u8]) -> Certificate {
        Certificate { der: der.to_vec() }
    }

    /// Create a `Certificate` from the first certificate in a PEM bundle.
    pub fn from_pem(pem: &[u8]) -> crate::Result<Certificate> {
        let mut reader = Cursor::new(pem);
        let mut certs = rustls_pemfile::certs(&mut reader).map_err(error::tls)?;
        if certs.is_empty() {
            return Err(error::tls("PEM contains no certificate"));
        }
        Ok(Certificate {
            der: certs.remove(0),
        })
    }
}

impl fmt::Debug for Certificate {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Certificate")
            .field("der_len", &self.der.len())
            .finish()
    }
}

/// Client key material: a certificate chain plus its private key.
pub struct Identity {
    certs: Vec<rustls::Certificate>,
    key: rustls::PrivateKey,
}

impl Identity {
    /// Parse an identity from a PEM bundle holding the certificate chain and
    /// a PKCS#8, RSA or EC private key.
    pub fn from_pem(pem: &[u8]) -> crate::Result<Identity> {
        let mut reader = Cursor::new(pem);
        let mut certs = Vec::new();
        let mut key = None;

        while let Some(item) = rustls_pemfile::read_one(&mut reader).map_err(error::tls)? {
            match item {
                rustls_pemfile::Item::X509Certificate(der) => {
                    certs.push(rustls::Certificate(der));
                }
                rustls_pemfile::Item::PKCS8Key(der)
                | rustls_pemfile::Item::RSAKey(der)
                | rustls_pemfile::Item::ECKey(der) => {
                    key = Some(rustls::PrivateKey(der));
                }
                _ => {}
            }
        }

        match (certs.is_empty(), key) {
            (false, Some(key)) => Ok(Identity { certs, key }),
            (true, _) => Err(error::tls("identity PEM contains no certificate")),
            (_, None) => Err(error::tls("identity PEM contains no private key")),
        }
    }
}

impl fmt::Debug for Identity {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Identity")
            .field("certs", &self.certs.len())
            .finish()
    }
}

/// Trust material used to validate the server's certificate chain.
#[derive(Clone)]
pub struct CertStore {
    roots: RootCertStore,
}

impl CertStore {
    /// A store seeded with the bundled webpki root certificates.
    pub fn with_webpki_roots() -> CertStore {
        let mut roots = RootCertStore::empty();
        roots.add_trust_anchors(webpki_roots::TLS_SERVER_ROOTS.iter().map(|ta| {
            OwnedTrustAnchor::from_subject_spki_name_constraints(
                ta.subject,
                ta.spki,
                ta.name_constraints,
            )
        }));
        CertStore { roots }
    }

    /// An empty store. Every chain is rejected until roots are added.
    pub fn empty() -> CertStore {
        CertStore {
            roots: RootCertStore::empty(),
        }
    }

    /// Add a trusted root certificate.
    pub fn add(&mut self, cert: &Certificate) -> crate::Result<()> {
        self.roots
            .add(&rustls::Certificate(cert.der.clone()))
            .map_err(error::tls)
    }

    /// Number of trust anchors in the store.
    pub fn len(&self) -> usize {
        self.roots.len()
    }

    /// Whether the store holds no trust anchors.
    pub fn is_empty(&self) -> bool {
        self.roots.is_empty()
    }
}

impl Default for CertStore {
    fn default() -> CertStore {
        CertStore::with_webpki_roots()
    }
}

impl fmt::Debug for CertStore {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("CertStore")
            .field("roots", &self.roots.len())
            .finish()
    }
}

/// Decides whether a host name is acceptable for the certificate the server
/// presented.
///
/// Chain validation against the trust store always runs; only the hostname
/// decision is delegated.
pub trait HostnameVerifier: Send + Sync {
    /// Return `true` to accept `host` for the given end-entity certificate
    /// (DER encoded).
    fn verify(&self, host: &str, end_entity_der: &[u8]) -> bool;
}

/// A `ServerCertVerifier` that narrows the full rustls verification
/// interface down to the single hostname decision a [`HostnameVerifier`]
/// makes. Chain validation is still performed by the webpki verifier.
struct OverrideHostnameVerification {
    inner: WebPkiVerifier,
    verifier: Arc<dyn HostnameVerifier>,
}

impl ServerCertVerifier for OverrideHostnameVerification {
    fn verify_server_cert(
        &self,
        end_entity: &rustls::Certificate,
        intermediates: &[rustls::Certificate],
        server_name: &ServerName,
        scts: &mut dyn Iterator<Item = &[u8]>,
        ocsp_response: &[u8],
        now: SystemTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        let host = match server_name {
            ServerName::DnsName(dns) => dns.as_ref().to_string(),
            ServerName::IpAddress(ip) => ip.to_string(),
            _ => return Err(rustls::Error::General("unsupported server name".into())),
        };

        let mismatch = rustls::Error::InvalidCertificate(CertificateError::NotValidForName);

        match self.inner.verify_server_cert(
            end_entity,
            intermediates,
            server_name,
            scts,
            ocsp_response,
            now,
        ) {
            Ok(verified) => {
                if self.verifier.verify(&host, &end_entity.0) {
                    Ok(verified)
                } else {
                    Err(mismatch)
                }
            }
            Err(rustls::Error::InvalidCertificate(CertificateError::NotValidForName)) => {
                if self.verifier.verify(&host, &end_entity.0) {
                    Ok(ServerCertVerified::assertion())
                } else {
                    Err(mismatch)
                }
            }
            Err(other) => Err(other),
        }
    }
}

/// Assemble the rustls client configuration for one connection.
pub(crate) fn client_config(
    identity: Option<Identity>,
    store: Option<CertStore>,
    verifier: Option<Arc<dyn HostnameVerifier>>,
) -> crate::Result<rustls::ClientConfig> {
    let store = store.unwrap_or_default();
    let verify_roots = store.roots.clone();

    let builder = rustls::ClientConfig::builder()
        .with_safe_defaults()
        .with_root_certificates(store.roots);

    let mut config = match identity {
        Some(identity) => builder
            .with_client_auth_cert(identity.certs, identity.key)
            .map_err(error::tls)?,
        None => builder.with_no_client_auth(),
    };

    if let Some(custom) = verifier {
        let inner = WebPkiVerifier::new(verify_roots, None);
        config
            .dangerous()
            .set_certificate_verifier(Arc::new(OverrideHostnameVerification {
                inner,
                verifier: custom,
            }));
    }

    Ok(config)
}
