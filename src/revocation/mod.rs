//! Revocation evidence: OCSP responses and CRLs.
//!
//! The signer depends only on [`RevocationSource`]. The default
//! implementation, [`RevocationResolver`], fetches over HTTP with OCSP tried
//! first and CRLs as the fallback (configurable), sharing a single-flight
//! [`RevocationCache`] between every call that holds the same resolver.
//! [`StaticRevocationSource`] serves pre-fetched evidence for offline use.

pub mod cache;
pub mod crl;
pub mod ocsp;

pub use cache::{CacheKey, CacheStats, RevocationCache};
pub use crl::Crl;
pub use ocsp::OcspResponseInfo;

use crate::cancel::CancellationToken;
use crate::cms::RevocationArchive;
use crate::config::{RevocationPolicy, RevocationPreference};
use crate::error::{Error, Result};
use crate::net::HttpTransport;
use crate::trust::CertificateInfo;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;

/// Kind of revocation evidence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum EvidenceKind {
    /// OCSP response
    Ocsp,
    /// Certificate revocation list
    Crl,
}

/// One OCSP response or CRL together with its validity window.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RevocationEvidence {
    /// Protocol the evidence came from
    pub kind: EvidenceKind,
    /// DER `OCSPResponse` or `CertificateList`
    pub der: Vec<u8>,
    /// When it was obtained
    pub fetched_at: DateTime<Utc>,
    /// `thisUpdate`
    pub this_update: DateTime<Utc>,
    /// `nextUpdate`, if the producer declared one
    pub next_update: Option<DateTime<Utc>>,
}

/// Revocation status of a certificate at a point in time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RevocationStatus {
    /// Not revoked
    Good,
    /// Revoked at the given time
    Revoked {
        /// Revocation time
        at: DateTime<Utc>,
    },
    /// The responder does not know the certificate
    Unknown,
}

/// Source of revocation evidence for one certificate.
pub trait RevocationSource: Send + Sync {
    /// Evidence about `cert`, issued by `issuer`.
    fn resolve(
        &self,
        cert: &CertificateInfo,
        issuer: &CertificateInfo,
        cancel: &CancellationToken,
    ) -> Result<RevocationEvidence>;
}

/// Status of `cert` at `time` according to `evidence`, after checking that
/// `issuer` vouches for the evidence.
pub fn check_evidence(
    evidence: &RevocationEvidence,
    cert: &CertificateInfo,
    issuer: &CertificateInfo,
    time: DateTime<Utc>,
) -> Result<RevocationStatus> {
    match evidence.kind {
        EvidenceKind::Ocsp => {
            let info = OcspResponseInfo::parse(&evidence.der)?;
            info.verify_signer(issuer)?;
            let single = info
                .find(cert, issuer)
                .ok_or_else(|| Error::Crypto(format!("OCSP response does not cover {}", cert.subject)))?;
            single.status(time)
        },
        EvidenceKind::Crl => {
            let crl = Crl::parse(&evidence.der)?;
            crl.verify_issuer(issuer)?;
            Ok(crl.status_of(cert, time))
        },
    }
}

/// Look through archived evidence for anything about `cert`. OCSP
/// responses are preferred over CRLs.
pub fn check_archive(
    archive: &RevocationArchive,
    cert: &CertificateInfo,
    issuer: &CertificateInfo,
    time: DateTime<Utc>,
) -> Option<(EvidenceKind, RevocationStatus)> {
    for der in &archive.ocsp_responses {
        let Ok(info) = OcspResponseInfo::parse(der) else {
            continue;
        };
        let Some(single) = info.find(cert, issuer) else {
            continue;
        };
        if info.verify_signer(issuer).is_err() {
            log::warn!("archived OCSP response for {} has a bad signature", cert.subject);
            continue;
        }
        match single.status(time) {
            Ok(status) => return Some((EvidenceKind::Ocsp, status)),
            Err(e) => log::warn!("unreadable archived OCSP status: {}", e),
        }
    }
    for der in &archive.crls {
        let Ok(crl) = Crl::parse(der) else {
            continue;
        };
        if !crl.is_from(issuer) {
            continue;
        }
        if crl.verify_issuer(issuer).is_err() {
            log::warn!("archived CRL from {} has a bad signature", issuer.subject);
            continue;
        }
        return Some((EvidenceKind::Crl, crl.status_of(cert, time)));
    }
    None
}

/// Collect evidence into the archive embedded in a container.
impl FromIterator<RevocationEvidence> for RevocationArchive {
    fn from_iter<I: IntoIterator<Item = RevocationEvidence>>(iter: I) -> Self {
        let mut archive = RevocationArchive::default();
        for evidence in iter {
            let target = match evidence.kind {
                EvidenceKind::Ocsp => &mut archive.ocsp_responses,
                EvidenceKind::Crl => &mut archive.crls,
            };
            // one CRL often covers several chain certificates
            if !target.contains(&evidence.der) {
                target.push(evidence.der);
            }
        }
        archive
    }
}

/// Default resolver: OCSP and CRL over HTTP with a shared cache.
pub struct RevocationResolver {
    policy: RevocationPolicy,
    transport: Arc<dyn HttpTransport>,
    cache: Arc<RevocationCache>,
}

impl std::fmt::Debug for RevocationResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RevocationResolver")
            .field("policy", &self.policy)
            .field("cache", &self.cache)
            .finish_non_exhaustive()
    }
}

impl RevocationResolver {
    /// Resolver over a `reqwest` transport using the policy's timeout.
    #[cfg(feature = "http")]
    pub fn new(policy: RevocationPolicy) -> Result<Self> {
        let transport = crate::net::ReqwestTransport::new(policy.timeout)?;
        Ok(Self::with_transport(policy, Arc::new(transport)))
    }

    /// Resolver over a caller-supplied transport.
    pub fn with_transport(policy: RevocationPolicy, transport: Arc<dyn HttpTransport>) -> Self {
        let cache = Arc::new(RevocationCache::new(policy.fallback_ttl));
        Self {
            policy,
            transport,
            cache,
        }
    }

    /// Share an existing cache.
    pub fn with_cache(mut self, cache: Arc<RevocationCache>) -> Self {
        self.cache = cache;
        self
    }

    /// The resolver's cache.
    pub fn cache(&self) -> &Arc<RevocationCache> {
        &self.cache
    }

    fn ocsp(
        &self,
        cert: &CertificateInfo,
        issuer: &CertificateInfo,
        cancel: &CancellationToken,
    ) -> Result<RevocationEvidence> {
        let url = self
            .policy
            .ocsp_responder_override
            .as_deref()
            .or(cert.ocsp_urls.first().map(String::as_str))
            .ok_or_else(|| Error::RevocationUnavailable {
                fingerprint: cert.fingerprint.clone(),
                reason: "certificate names no OCSP responder".to_string(),
            })?;
        let key = CacheKey::Ocsp {
            fingerprint: cert.fingerprint.clone(),
        };
        self.cache.get_or_fetch(&key, || {
            let request = ocsp::build_request(cert, issuer)?;
            let body = self.policy.retry.run("OCSP request", cancel, || {
                self.transport.post(url, ocsp::OCSP_REQUEST, &request, None)
            })?;
            log::info!("fetched OCSP response for {} from {}", cert.subject, url);
            OcspResponseInfo::parse(&body)?.into_evidence(cert, issuer)
        })
    }

    fn crl(
        &self,
        cert: &CertificateInfo,
        issuer: &CertificateInfo,
        cancel: &CancellationToken,
    ) -> Result<RevocationEvidence> {
        let mut failures = Vec::new();
        for url in &cert.crl_urls {
            let key = CacheKey::Crl {
                issuer: issuer.fingerprint.clone(),
                url: url.clone(),
            };
            let fetched = self.cache.get_or_fetch(&key, || {
                let body = self
                    .policy
                    .retry
                    .run("CRL download", cancel, || self.transport.get(url))?;
                let crl = Crl::parse(&body)?;
                crl.verify_issuer(issuer)?;
                log::info!("fetched CRL for {} from {}", issuer.subject, url);
                Ok(crl.into_evidence())
            });
            match fetched {
                Ok(evidence) => return Ok(evidence),
                Err(Error::Cancelled) => return Err(Error::Cancelled),
                Err(e) => failures.push(format!("{}: {}", url, e)),
            }
        }
        Err(Error::RevocationUnavailable {
            fingerprint: cert.fingerprint.clone(),
            reason: if failures.is_empty() {
                "certificate names no CRL distribution point".to_string()
            } else {
                failures.join("; ")
            },
        })
    }
}

impl RevocationSource for RevocationResolver {
    fn resolve(
        &self,
        cert: &CertificateInfo,
        issuer: &CertificateInfo,
        cancel: &CancellationToken,
    ) -> Result<RevocationEvidence> {
        cancel.check()?;
        let (first, second) = match self.policy.preference {
            RevocationPreference::OcspFirst => (self.ocsp(cert, issuer, cancel), EvidenceKind::Crl),
            RevocationPreference::CrlFirst => (self.crl(cert, issuer, cancel), EvidenceKind::Ocsp),
        };
        let first_error = match first {
            Ok(evidence) => return Ok(evidence),
            Err(Error::Cancelled) => return Err(Error::Cancelled),
            Err(e) => e,
        };
        log::debug!("falling back to {:?} for {}: {}", second, cert.subject, first_error);
        cancel.check()?;
        let fallback = match second {
            EvidenceKind::Crl => self.crl(cert, issuer, cancel),
            EvidenceKind::Ocsp => self.ocsp(cert, issuer, cancel),
        };
        fallback.map_err(|second_error| match second_error {
            Error::Cancelled => Error::Cancelled,
            second_error => Error::RevocationUnavailable {
                fingerprint: cert.fingerprint.clone(),
                reason: format!("{}; {}", first_error, second_error),
            },
        })
    }
}

/// Pre-fetched evidence for air-gapped signing or verification.
#[derive(Debug, Clone, Default)]
pub struct StaticRevocationSource {
    crls: Vec<Crl>,
    ocsp: Vec<OcspResponseInfo>,
}

impl StaticRevocationSource {
    /// Empty source.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a DER CRL.
    pub fn add_crl(&mut self, der: &[u8]) -> Result<()> {
        self.crls.push(Crl::parse(der)?);
        Ok(())
    }

    /// Add a DER `OCSPResponse`.
    pub fn add_ocsp_response(&mut self, der: &[u8]) -> Result<()> {
        self.ocsp.push(OcspResponseInfo::parse(der)?);
        Ok(())
    }
}

impl RevocationSource for StaticRevocationSource {
    fn resolve(
        &self,
        cert: &CertificateInfo,
        issuer: &CertificateInfo,
        cancel: &CancellationToken,
    ) -> Result<RevocationEvidence> {
        cancel.check()?;
        if let Some(info) = self.ocsp.iter().find(|info| info.find(cert, issuer).is_some()) {
            return info.clone().into_evidence(cert, issuer);
        }
        if let Some(crl) = self
            .crls
            .iter()
            .find(|crl| crl.is_from(issuer) && crl.verify_issuer(issuer).is_ok())
        {
            return Ok(crl.clone().into_evidence());
        }
        Err(Error::RevocationUnavailable {
            fingerprint: cert.fingerprint.clone(),
            reason: format!("no bundled evidence for {}", cert.subject),
        })
    }
}
