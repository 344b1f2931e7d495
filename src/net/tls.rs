//! TLS certificate loading and SNI selection.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use rustls::server::{ClientHello, ResolvesServerCert};
use rustls::sign::CertifiedKey;
use rustls::ServerConfig;
use thiserror::Error;

use crate::routing::{AcceptRule, RuleSet};

/// Errors loading certificate material.
#[derive(Debug, Error)]
pub enum TlsError {
    #[error("{0} not found: {1}")]
    NotFound(&'static str, String),

    #[error("failed to read {0}: {1}")]
    Io(String, std::io::Error),

    #[error("no certificates found in {0}")]
    NoCertificates(String),

    #[error("no private key found in {0}")]
    NoPrivateKey(String),

    #[error("unusable private key in {0}: {1}")]
    Key(String, rustls::Error),

    #[error("TLS configuration error: {0}")]
    Config(#[from] rustls::Error),
}

/// Certificate chain and signing key for one accept host.
#[derive(Clone)]
pub struct CertificateMaterial {
    certified: Arc<CertifiedKey>,
    label: String,
}

impl fmt::Debug for CertificateMaterial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CertificateMaterial")
            .field("label", &self.label)
            .field("chain_len", &self.certified.cert.len())
            .finish()
    }
}

impl CertificateMaterial {
    /// Parse a PEM certificate chain and private key.
    pub fn from_pem(cert_pem: &[u8], key_pem: &[u8], label: impl Into<String>) -> Result<Self, TlsError> {
        let label = label.into();

        let chain = rustls_pemfile::certs(&mut &cert_pem[..])
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| TlsError::Io(label.clone(), e))?;
        if chain.is_empty() {
            return Err(TlsError::NoCertificates(label));
        }

        let key = rustls_pemfile::private_key(&mut &key_pem[..])
            .map_err(|e| TlsError::Io(label.clone(), e))?
            .ok_or_else(|| TlsError::NoPrivateKey(label.clone()))?;

        let signing_key = rustls::crypto::aws_lc_rs::sign::any_supported_type(&key)
            .map_err(|e| TlsError::Key(label.clone(), e))?;

        Ok(Self {
            certified: Arc::new(CertifiedKey::new(chain, signing_key)),
            label,
        })
    }

    /// Load certificate and key PEM files.
    pub async fn load(cert_path: &Path, key_path: &Path) -> Result<Self, TlsError> {
        Self::load_with_chain(cert_path, key_path, &[]).await
    }

    /// Load certificate and key PEM files, appending each CA file to the chain.
    pub async fn load_with_chain(cert_path: &Path, key_path: &Path, ca_paths: &[PathBuf]) -> Result<Self, TlsError> {
        if !cert_path.exists() {
            return Err(TlsError::NotFound("certificate file", cert_path.display().to_string()));
        }
        if !key_path.exists() {
            return Err(TlsError::NotFound("private key file", key_path.display().to_string()));
        }

        let mut cert_pem = read_pem(cert_path).await?;
        for ca_path in ca_paths {
            if !ca_path.exists() {
                return Err(TlsError::NotFound("CA file", ca_path.display().to_string()));
            }
            cert_pem.push(b'\n');
            cert_pem.extend(read_pem(ca_path).await?);
        }
        let key_pem = read_pem(key_path).await?;

        Self::from_pem(&cert_pem, &key_pem, cert_path.display().to_string())
    }

    pub fn certified_key(&self) -> Arc<CertifiedKey> {
        self.certified.clone()
    }

    pub fn label(&self) -> &str {
        &self.label
    }
}

async fn read_pem(path: &Path) -> Result<Vec<u8>, TlsError> {
    tokio::fs::read(path)
        .await
        .map_err(|e| TlsError::Io(path.display().to_string(), e))
}

/// Find the certificate of the TLS rule serving `server_name`.
///
/// Exact host match only; no wildcard names.
pub fn select_certificate(rules: &[Arc<AcceptRule>], server_name: &str) -> Option<CertificateMaterial> {
    rules
        .iter()
        .filter(|rule| rule.host() == Some(server_name))
        .find_map(|rule| rule.tls().cloned())
}

/// Resolves handshake certificates from the live rule set.
pub struct SniResolver {
    rules: Arc<RuleSet>,
}

impl SniResolver {
    pub fn new(rules: Arc<RuleSet>) -> Self {
        Self { rules }
    }
}

impl fmt::Debug for SniResolver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SniResolver")
            .field("rules", &self.rules.len())
            .finish()
    }
}

impl ResolvesServerCert for SniResolver {
    fn resolve(&self, client_hello: ClientHello<'_>) -> Option<Arc<CertifiedKey>> {
        let Some(server_name) = client_hello.server_name() else {
            tracing::debug!("TLS handshake without SNI rejected");
            return None;
        };

        let selected = select_certificate(&self.rules.snapshot(), server_name);
        if selected.is_none() {
            tracing::warn!(server_name = %server_name, "No TLS accept rule for server name");
        }
        selected.map(|material| material.certified_key())
    }
}

/// Build a rustls server config that picks certificates by SNI.
pub fn server_config(rules: Arc<RuleSet>) -> Result<Arc<ServerConfig>, TlsError> {
    let provider = Arc::new(rustls::crypto::aws_lc_rs::default_provider());
    let mut config = ServerConfig::builder_with_provider(provider)
        .with_safe_default_protocol_versions()?
        .with_no_client_auth()
        .with_cert_resolver(Arc::new(SniResolver::new(rules)));
    config.alpn_protocols = vec![b"h2".to_vec(), b"http/1.1".to_vec()];
    Ok(Arc::new(config))
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::routing::{RuleError, RuleSpec};

    pub(crate) fn material_for(host: &str) -> CertificateMaterial {
        let generated = rcgen::generate_simple_self_signed(vec![host.to_string()]).unwrap();
        CertificateMaterial::from_pem(
            generated.cert.pem().as_bytes(),
            generated.key_pair.serialize_pem().as_bytes(),
            host,
        )
        .unwrap()
    }

    #[test]
    fn rejects_pem_without_certificates() {
        let err = CertificateMaterial::from_pem(b"", b"", "empty").unwrap_err();
        assert!(matches!(err, TlsError::NoCertificates(_)));
    }

    #[test]
    fn selects_exact_host_only() {
        let set = RuleSet::new();
        let a = material_for("a.example");
        for rule in RuleSpec::new().host("a.example").tls(a).expand() {
            set.register(rule).unwrap();
        }
        for rule in RuleSpec::new().host("b.example").port(8443).tls(material_for("b.example")).expand() {
            set.register(rule).unwrap();
        }

        let rules = set.snapshot();
        assert_eq!(select_certificate(&rules, "a.example").unwrap().label(), "a.example");
        assert_eq!(select_certificate(&rules, "b.example").unwrap().label(), "b.example");
        assert!(select_certificate(&rules, "c.example").is_none());
        assert!(select_certificate(&rules, "sub.a.example").is_none());
    }

    #[test]
    fn plaintext_rule_for_host_has_no_certificate() {
        let set = RuleSet::new();
        for rule in RuleSpec::new().host("a.example").port(8080).expand() {
            set.register(rule).unwrap();
        }
        assert!(select_certificate(&set.snapshot(), "a.example").is_none());
    }

    #[test]
    fn tls_rules_need_host_and_own_their_port() {
        let set = RuleSet::new();
        let hostless = RuleSpec::new().tls(material_for("x.example")).expand().remove(0);
        assert!(matches!(set.register(hostless), Err(RuleError::TlsWithoutHost(_))));

        let tls = RuleSpec::new().host("x.example").port(8443).tls(material_for("x.example")).expand().remove(0);
        assert_eq!(tls.port(), 8443);
        set.register(tls).unwrap();

        let plain = RuleSpec::new().host("y.example").port(8443).expand().remove(0);
        assert_eq!(set.register(plain).unwrap_err(), RuleError::PortConflict(8443));
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn tls_rules_default_to_port_443() {
        let rule = RuleSpec::new().host("x.example").tls(material_for("x.example")).expand().remove(0);
        assert_eq!(rule.port(), 443);
        assert_eq!(rule.canonical(), "https://x.example/");
    }

    #[tokio::test]
    async fn load_appends_ca_files_to_chain() {
        let dir = std::env::temp_dir().join(format!("later-tls-{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();

        let leaf = rcgen::generate_simple_self_signed(vec!["leaf.example".to_string()]).unwrap();
        let ca = rcgen::generate_simple_self_signed(vec!["ca.example".to_string()]).unwrap();
        let (cert, key, ca_file) = (dir.join("cert.pem"), dir.join("key.pem"), dir.join("ca.pem"));
        std::fs::write(&cert, leaf.cert.pem()).unwrap();
        std::fs::write(&key, leaf.key_pair.serialize_pem()).unwrap();
        std::fs::write(&ca_file, ca.cert.pem()).unwrap();

        let plain = CertificateMaterial::load(&cert, &key).await.unwrap();
        assert_eq!(plain.certified_key().cert.len(), 1);

        let chained = CertificateMaterial::load_with_chain(&cert, &key, &[ca_file]).await.unwrap();
        assert_eq!(chained.certified_key().cert.len(), 2);

        let missing = CertificateMaterial::load_with_chain(&cert, &key, &[dir.join("nope.pem")]).await;
        assert!(matches!(missing, Err(TlsError::NotFound("CA file", _))));

        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn builds_server_config() {
        let set = Arc::new(RuleSet::new());
        let config = server_config(set).unwrap();
        assert!(config.alpn_protocols.contains(&b"http/1.1".to_vec()));
    }
}
