//! Certificates, trust stores and chain building.
//!
//! Roots are always an explicit input: a [`TrustStore`] is built by the
//! caller and never derived from the signing key or the document.

use crate::crypto::fingerprint;
use crate::crypto::verify::verify_signature;
use crate::error::{Error, Result};
use chrono::{DateTime, TimeZone, Utc};
use der::asn1::ObjectIdentifier;
use std::collections::HashSet;
use x509_parser::extensions::{DistributionPointName, GeneralName, ParsedExtension};
use x509_parser::prelude::{FromDer, X509Certificate};

/// Longest chain accepted, leaf and root included.
pub const MAX_CHAIN_DEPTH: usize = 10;

const ID_AD_OCSP: &str = "1.3.6.1.5.5.7.48.1";

/// Owned view of the parts of an X.509 certificate the engine needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CertificateInfo {
    /// DER encoding
    pub der: Vec<u8>,
    /// SHA-256 fingerprint, lowercase hex
    pub fingerprint: String,
    /// Subject in RFC 4514 form
    pub subject: String,
    /// Issuer in RFC 4514 form
    pub issuer: String,
    /// Serial number bytes
    pub serial: Vec<u8>,
    /// Start of validity
    pub not_before: DateTime<Utc>,
    /// End of validity
    pub not_after: DateTime<Utc>,
    /// Basic constraints `cA`
    pub is_ca: bool,
    /// OCSP responder URLs from authority information access
    pub ocsp_urls: Vec<String>,
    /// CRL distribution point URLs
    pub crl_urls: Vec<String>,
    pub(crate) subject_raw: Vec<u8>,
    pub(crate) issuer_raw: Vec<u8>,
    pub(crate) spki: Vec<u8>,
    pub(crate) public_key_bits: Vec<u8>,
    tbs: Vec<u8>,
    signature_algorithm: ObjectIdentifier,
    signature: Vec<u8>,
}

fn timestamp(secs: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(secs, 0).single().unwrap_or_default()
}

impl CertificateInfo {
    /// Parse a DER certificate.
    pub fn parse(der: &[u8]) -> Result<Self> {
        let fingerprint = fingerprint(der);
        let bad = |reason: String| Error::Certificate {
            fingerprint: fingerprint.clone(),
            reason,
        };
        let (_, cert) = X509Certificate::from_der(der).map_err(|e| bad(format!("invalid certificate: {}", e)))?;

        let mut ocsp_urls = Vec::new();
        let mut crl_urls = Vec::new();
        for ext in cert.extensions() {
            match ext.parsed_extension() {
                ParsedExtension::AuthorityInfoAccess(aia) => {
                    for desc in &aia.accessdescs {
                        if desc.access_method.to_id_string() == ID_AD_OCSP {
                            if let GeneralName::URI(uri) = &desc.access_location {
                                ocsp_urls.push(uri.to_string());
                            }
                        }
                    }
                },
                ParsedExtension::CRLDistributionPoints(points) => {
                    for point in points.iter() {
                        if let Some(DistributionPointName::FullName(names)) = &point.distribution_point {
                            for name in names {
                                if let GeneralName::URI(uri) = name {
                                    crl_urls.push(uri.to_string());
                                }
                            }
                        }
                    }
                },
                _ => {},
            }
        }

        let algorithm = cert.signature_algorithm.algorithm.to_id_string();
        let signature_algorithm = ObjectIdentifier::new(&algorithm)
            .map_err(|e| bad(format!("bad signature algorithm {}: {}", algorithm, e)))?;

        Ok(Self {
            der: der.to_vec(),
            fingerprint: fingerprint.clone(),
            subject: cert.subject().to_string(),
            issuer: cert.issuer().to_string(),
            serial: cert.raw_serial().to_vec(),
            not_before: timestamp(cert.validity().not_before.timestamp()),
            not_after: timestamp(cert.validity().not_after.timestamp()),
            is_ca: cert.is_ca(),
            ocsp_urls,
            crl_urls,
            subject_raw: cert.subject().as_raw().to_vec(),
            issuer_raw: cert.issuer().as_raw().to_vec(),
            spki: cert.public_key().raw.to_vec(),
            public_key_bits: cert.public_key().subject_public_key.data.to_vec(),
            tbs: cert.tbs_certificate.as_ref().to_vec(),
            signature_algorithm,
            signature: cert.signature_value.data.to_vec(),
        })
    }

    /// Subject common name, falling back to the full subject.
    pub fn common_name(&self) -> String {
        self.subject
            .split(", ")
            .find_map(|part| part.strip_prefix("CN="))
            .unwrap_or(&self.subject)
            .to_string()
    }

    /// DER SubjectPublicKeyInfo.
    pub fn public_key_info(&self) -> &[u8] {
        &self.spki
    }

    /// Whether `time` lies inside the validity window.
    pub fn is_valid_at(&self, time: DateTime<Utc>) -> bool {
        self.not_before <= time && time <= self.not_after
    }

    /// Whether the certificate names itself as issuer.
    pub fn is_self_issued(&self) -> bool {
        self.subject_raw == self.issuer_raw
    }

    /// Check that `issuer` issued and signed this certificate.
    pub fn verify_issued_by(&self, issuer: &CertificateInfo) -> Result<()> {
        if self.issuer_raw != issuer.subject_raw {
            return Err(Error::Certificate {
                fingerprint: self.fingerprint.clone(),
                reason: format!("issuer {} does not match {}", self.issuer, issuer.subject),
            });
        }
        verify_signature(&issuer.spki, &self.signature_algorithm, None, &self.tbs, &self.signature).map_err(|e| {
            Error::Certificate {
                fingerprint: self.fingerprint.clone(),
                reason: format!("signature by {} does not verify: {}", issuer.subject, e),
            }
        })
    }

    /// Check that this certificate's key signed `message` with `algorithm`.
    pub fn verify_message(&self, algorithm: &ObjectIdentifier, message: &[u8], signature: &[u8]) -> Result<()> {
        verify_signature(&self.spki, algorithm, None, message, signature)
    }
}

/// A pool of trusted root certificates.
#[derive(Debug, Clone, Default)]
pub struct TrustStore {
    roots: Vec<CertificateInfo>,
}

impl TrustStore {
    /// Empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Store holding the given DER certificates.
    pub fn from_der<'a>(certificates: impl IntoIterator<Item = &'a [u8]>) -> Result<Self> {
        let mut store = Self::new();
        for der in certificates {
            store.add_der(der)?;
        }
        Ok(store)
    }

    /// Add one DER certificate.
    pub fn add_der(&mut self, der: &[u8]) -> Result<()> {
        let info = CertificateInfo::parse(der)?;
        self.add(info);
        Ok(())
    }

    /// Add every `CERTIFICATE` block of a PEM bundle, returning how many
    /// were added.
    pub fn add_pem(&mut self, pem: &str) -> Result<usize> {
        let mut added = 0;
        for block in x509_parser::pem::Pem::iter_from_buffer(pem.as_bytes()) {
            let block = block.map_err(|e| Error::Certificate {
                fingerprint: String::new(),
                reason: format!("invalid PEM: {}", e),
            })?;
            if block.label == "CERTIFICATE" {
                self.add_der(&block.contents)?;
                added += 1;
            }
        }
        Ok(added)
    }

    pub(crate) fn add(&mut self, info: CertificateInfo) {
        if !self.contains(&info.fingerprint) {
            self.roots.push(info);
        }
    }

    /// Whether a root with this fingerprint is present.
    pub fn contains(&self, fingerprint: &str) -> bool {
        self.roots.iter().any(|root| root.fingerprint == fingerprint)
    }

    /// Number of roots.
    pub fn len(&self) -> usize {
        self.roots.len()
    }

    /// True when no roots are present.
    pub fn is_empty(&self) -> bool {
        self.roots.is_empty()
    }

    /// Iterate over the roots.
    pub fn iter(&self) -> impl Iterator<Item = &CertificateInfo> {
        self.roots.iter()
    }
}

/// Ordered certificates from a signer to a trusted root.
#[derive(Debug, Clone)]
pub struct TrustChain {
    certificates: Vec<CertificateInfo>,
}

impl TrustChain {
    /// Build the chain from `leaf` to a root in `roots`, using
    /// `intermediates` as candidate issuers.
    ///
    /// Each link must match by name and verify by signature; issuers must be
    /// CA certificates. Fails with [`Error::Certificate`] when no path ends
    /// in `roots`.
    pub fn build(leaf: &[u8], intermediates: &[Vec<u8>], roots: &TrustStore) -> Result<Self> {
        let leaf = CertificateInfo::parse(leaf)?;
        let candidates = intermediates
            .iter()
            .filter_map(|der| match CertificateInfo::parse(der) {
                Ok(info) => Some(info),
                Err(e) => {
                    log::warn!("skipping unparseable chain certificate: {}", e);
                    None
                },
            })
            .collect::<Vec<_>>();

        let mut chain = vec![leaf];
        let mut used = HashSet::new();
        loop {
            let current = &chain[chain.len() - 1];
            if roots.contains(&current.fingerprint) {
                log::debug!("chain of {} ends at trusted root {}", chain.len(), current.subject);
                return Ok(Self { certificates: chain });
            }
            if chain.len() >= MAX_CHAIN_DEPTH {
                return Err(Error::Certificate {
                    fingerprint: chain[0].fingerprint.clone(),
                    reason: format!("chain longer than {} certificates", MAX_CHAIN_DEPTH),
                });
            }

            let issued_by = |issuer: &CertificateInfo| {
                issuer.fingerprint != current.fingerprint
                    && issuer.is_ca
                    && current.verify_issued_by(issuer).is_ok()
            };
            if let Some(root) = roots.iter().find(|root| issued_by(root)) {
                chain.push(root.clone());
                continue;
            }
            match candidates
                .iter()
                .find(|c| !used.contains(&c.fingerprint) && issued_by(c))
            {
                Some(next) => {
                    used.insert(next.fingerprint.clone());
                    chain.push(next.clone());
                },
                None => {
                    return Err(Error::Certificate {
                        fingerprint: current.fingerprint.clone(),
                        reason: format!("no trusted issuer found for {}", current.issuer),
                    })
                },
            }
        }
    }

    /// The signer's certificate.
    pub fn leaf(&self) -> &CertificateInfo {
        &self.certificates[0]
    }

    /// The trusted root.
    pub fn root(&self) -> &CertificateInfo {
        &self.certificates[self.certificates.len() - 1]
    }

    /// Every certificate, signer first.
    pub fn certificates(&self) -> &[CertificateInfo] {
        &self.certificates
    }

    /// DER of every certificate after the signer's, for embedding.
    pub fn issuers_der(&self) -> Vec<Vec<u8>> {
        self.certificates[1..].iter().map(|c| c.der.clone()).collect()
    }

    /// Number of certificates.
    pub fn len(&self) -> usize {
        self.certificates.len()
    }

    /// Always false: a chain holds at least the signer.
    pub fn is_empty(&self) -> bool {
        self.certificates.is_empty()
    }

    /// First certificate whose validity window excludes `time`.
    pub fn invalid_at(&self, time: DateTime<Utc>) -> Option<&CertificateInfo> {
        self.certificates.iter().find(|cert| !cert.is_valid_at(time))
    }

    /// Pairs of (certificate, issuer) for revocation checks; the root is
    /// not checked.
    pub fn links(&self) -> impl Iterator<Item = (&CertificateInfo, &CertificateInfo)> {
        self.certificates.windows(2).map(|pair| (&pair[0], &pair[1]))
    }
}
