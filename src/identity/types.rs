use std::collections::HashMap;
use std::fmt;

use rustls_pki_types::{CertificateDer, PrivatePkcs8KeyDer};

use crate::error::Error;
use crate::types::Result;

/// Trust domain of a SPIFFE identity, e.g. "example.org"
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TrustDomain(String);

impl TrustDomain {
    /// Create a trust domain; names are case-insensitive and stored lowercase
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into().to_lowercase())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TrustDomain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Represents a SPIFFE identity
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpiffeId {
    /// Full SPIFFE URI (e.g. "spiffe://example.org/workload")
    uri: String,
    /// Trust domain component
    trust_domain: TrustDomain,
    /// Workload path component, without the leading slash
    path: String,
}

impl SpiffeId {
    /// Parse from a SPIFFE URI
    pub fn parse(uri: &str) -> Result<Self> {
        let uri_obj = url::Url::parse(uri)
            .map_err(|e| Error::InvalidSpiffeId(format!("Invalid URI: {}", e)))?;

        if uri_obj.scheme() != "spiffe" {
            return Err(Error::InvalidSpiffeId("Invalid scheme, must be 'spiffe'".into()));
        }

        let host = uri_obj
            .host_str()
            .ok_or_else(|| Error::InvalidSpiffeId("Missing trust domain component".into()))?;

        let path = uri_obj.path().trim_start_matches('/').to_string();

        Ok(Self {
            uri: uri.to_string(),
            trust_domain: TrustDomain::new(host),
            path,
        })
    }

    pub fn trust_domain(&self) -> &TrustDomain {
        &self.trust_domain
    }

    pub fn path(&self) -> &str {
        &self.path
    }
}

impl fmt::Display for SpiffeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.uri)
    }
}

/// One pushed identity document: certificate chain, private key and identity
///
/// The chain is ordered leaf first, followed by zero or more intermediates.
/// The caller keeps ownership for the duration of one update; nothing here is
/// retained by the sidecar afterwards.
#[derive(Debug)]
pub struct SvidUpdate {
    /// SPIFFE identity the document was issued for
    pub spiffe_id: SpiffeId,
    /// X.509 certificate chain in DER form, leaf first
    pub cert_chain: Vec<CertificateDer<'static>>,
    /// Unencrypted PKCS#8 private key in DER form
    pub private_key: PrivatePkcs8KeyDer<'static>,
}

impl SvidUpdate {
    /// Leaf certificate of the chain, if the chain is non-empty
    pub fn leaf(&self) -> Option<&CertificateDer<'static>> {
        self.cert_chain.first()
    }

    /// Intermediate certificates following the leaf
    pub fn intermediates(&self) -> &[CertificateDer<'static>] {
        if self.cert_chain.len() > 1 {
            &self.cert_chain[1..]
        } else {
            &[]
        }
    }
}

/// Trust anchors keyed by trust domain, delivered alongside each update
#[derive(Debug, Default)]
pub struct TrustBundleSet {
    bundles: HashMap<TrustDomain, Vec<CertificateDer<'static>>>,
}

impl TrustBundleSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the anchors for a trust domain
    pub fn insert(&mut self, trust_domain: TrustDomain, anchors: Vec<CertificateDer<'static>>) {
        self.bundles.insert(trust_domain, anchors);
    }

    /// Anchors for a trust domain, in delivery order
    pub fn get(&self, trust_domain: &TrustDomain) -> Option<&[CertificateDer<'static>]> {
        self.bundles.get(trust_domain).map(Vec::as_slice)
    }

    pub fn is_empty(&self) -> bool {
        self.bundles.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_spiffe_id() {
        let id = SpiffeId::parse("spiffe://example.org/workload/api").unwrap();
        assert_eq!(id.trust_domain().as_str(), "example.org");
        assert_eq!(id.path(), "workload/api");
        assert_eq!(id.to_string(), "spiffe://example.org/workload/api");
    }

    #[test]
    fn test_parse_rejects_other_schemes() {
        assert!(matches!(
            SpiffeId::parse("https://example.org/workload"),
            Err(Error::InvalidSpiffeId(_))
        ));
    }

    #[test]
    fn test_trust_domain_is_case_insensitive() {
        assert_eq!(TrustDomain::new("Example.ORG"), TrustDomain::new("example.org"));
    }

    #[test]
    fn test_chain_split() {
        let certs: Vec<CertificateDer<'static>> = vec![
            CertificateDer::from(vec![1u8, 2, 3]),
            CertificateDer::from(vec![4u8, 5, 6]),
            CertificateDer::from(vec![7u8, 8, 9]),
        ];
        let update = SvidUpdate {
            spiffe_id: SpiffeId::parse("spiffe://example.org/workload").unwrap(),
            cert_chain: certs,
            private_key: PrivatePkcs8KeyDer::from(vec![0u8; 8]),
        };

        assert_eq!(update.leaf().unwrap().as_ref(), &[1, 2, 3]);
        assert_eq!(update.intermediates().len(), 2);
    }

    #[test]
    fn test_bundle_lookup() {
        let mut bundles = TrustBundleSet::new();
        bundles.insert(
            TrustDomain::new("example.org"),
            vec![CertificateDer::from(vec![9u8])],
        );

        assert!(bundles.get(&TrustDomain::new("example.org")).is_some());
        assert!(bundles.get(&TrustDomain::new("other.org")).is_none());
    }
}
