//! Verification results as data.

use super::types::Permission;
use crate::crypto::DigestAlgorithm;
use crate::error::{Error, Result};
use crate::revocation::{EvidenceKind, RevocationStatus};
use crate::trust::CertificateInfo;
use chrono::{DateTime, Utc};
use serde::Serialize;

/// A problem found with one signature.
///
/// Findings are data: a signature with findings still gets a report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Finding {
    /// The signature value does not match the signed bytes
    SignatureMismatch {
        /// What failed
        reason: String,
    },
    /// No path from the signer to a trusted root
    UntrustedChain {
        /// What failed
        reason: String,
    },
    /// A chain certificate was not valid at the signing time
    ExpiredCertificate {
        /// Certificate fingerprint
        fingerprint: String,
        /// Certificate subject
        subject: String,
    },
    /// A chain certificate was revoked before the signing time
    CertificateRevoked {
        /// Certificate fingerprint
        fingerprint: String,
        /// Revocation time
        at: DateTime<Utc>,
    },
    /// The `/ByteRange` is malformed or does not exclude exactly `/Contents`
    InvalidByteRange {
        /// What failed
        reason: String,
    },
    /// The document changed in a way the certification forbids
    PermissionViolation {
        /// What changed
        reason: String,
    },
    /// The embedded timestamp token does not verify
    TimestampInvalid {
        /// What failed
        reason: String,
    },
    /// No usable revocation evidence for a chain certificate
    RevocationUnknown {
        /// Certificate fingerprint
        fingerprint: String,
    },
}

impl Finding {
    /// Findings that leave the signature valid but not fully checked.
    pub fn is_warning(&self) -> bool {
        matches!(self, Finding::RevocationUnknown { .. })
    }

    /// The `kind` tag used in the JSON report.
    pub fn kind(&self) -> &'static str {
        match self {
            Finding::SignatureMismatch { .. } => "signature_mismatch",
            Finding::UntrustedChain { .. } => "untrusted_chain",
            Finding::ExpiredCertificate { .. } => "expired_certificate",
            Finding::CertificateRevoked { .. } => "certificate_revoked",
            Finding::InvalidByteRange { .. } => "invalid_byte_range",
            Finding::PermissionViolation { .. } => "permission_violation",
            Finding::TimestampInvalid { .. } => "timestamp_invalid",
            Finding::RevocationUnknown { .. } => "revocation_unknown",
        }
    }
}

/// Identity of a certificate, for display.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CertificateSummary {
    /// Subject common name, or the full subject
    pub common_name: String,
    /// Subject in RFC 4514 form
    pub subject: String,
    /// Issuer in RFC 4514 form
    pub issuer: String,
    /// Serial number, lowercase hex
    pub serial: String,
    /// SHA-256 fingerprint
    pub fingerprint: String,
    /// Start of validity
    pub not_before: DateTime<Utc>,
    /// End of validity
    pub not_after: DateTime<Utc>,
}

impl From<&CertificateInfo> for CertificateSummary {
    fn from(cert: &CertificateInfo) -> Self {
        Self {
            common_name: cert.common_name(),
            subject: cert.subject.clone(),
            issuer: cert.issuer.clone(),
            serial: hex::encode(&cert.serial),
            fingerprint: cert.fingerprint.clone(),
            not_before: cert.not_before,
            not_after: cert.not_after,
        }
    }
}

/// Which bytes a signature covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct Coverage {
    /// The `/ByteRange`
    pub byte_range: [u64; 4],
    /// End of the signed bytes
    pub signed_len: u64,
    /// Whether the signed bytes reach the end of the file
    pub covers_whole_document: bool,
    /// 1-based revision whose `%%EOF` the signed bytes end at
    pub revision: Option<usize>,
    /// Revisions appended after the signed one
    pub later_revisions: usize,
}

/// Where revocation status came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RevocationOrigin {
    /// Archived inside the container
    Embedded,
    /// Fetched while verifying
    Online,
}

/// Revocation result for one chain certificate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RevocationCheck {
    /// Certificate subject
    pub subject: String,
    /// Certificate fingerprint
    pub fingerprint: String,
    /// Status, `None` when no evidence was found
    pub status: Option<RevocationStatus>,
    /// Protocol of the evidence
    pub kind: Option<EvidenceKind>,
    /// Where the evidence came from
    pub origin: Option<RevocationOrigin>,
}

/// Timestamp token result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TimestampReport {
    /// Time asserted by the authority
    pub time: Option<DateTime<Utc>>,
    /// Token serial number, hex
    pub serial: Option<String>,
    /// Authority certificate
    pub authority: Option<CertificateSummary>,
    /// Whether the token covers the signature and chains to a trusted root
    pub valid: bool,
}

/// Everything checked for one signature field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SignatureReport {
    /// Fully qualified field name
    pub field_name: String,
    /// Signer certificate
    pub signer: Option<CertificateSummary>,
    /// `/Name`
    pub name: Option<String>,
    /// `/Reason`
    pub reason: Option<String>,
    /// `/Location`
    pub location: Option<String>,
    /// `/ContactInfo`
    pub contact_info: Option<String>,
    /// Signing time from the container, falling back to `/M`
    pub signing_time: Option<DateTime<Utc>>,
    /// `/SubFilter`
    pub sub_filter: Option<String>,
    /// Digest algorithm of the container
    pub digest_algorithm: Option<DigestAlgorithm>,
    /// DocMDP level when this is a certification signature
    pub permission: Option<Permission>,
    /// Byte range coverage
    pub coverage: Coverage,
    /// Whether the signature value verifies over the signed bytes
    pub signature_valid: bool,
    /// Subjects from signer to root when the chain is trusted
    pub chain: Vec<String>,
    /// Whether the chain ends in a trusted root
    pub chain_trusted: bool,
    /// Per-link revocation results
    pub revocation: Vec<RevocationCheck>,
    /// Embedded timestamp, if any
    pub timestamp: Option<TimestampReport>,
    /// Problems found
    pub findings: Vec<Finding>,
}

impl SignatureReport {
    pub(crate) fn new(field_name: String) -> Self {
        Self {
            field_name,
            signer: None,
            name: None,
            reason: None,
            location: None,
            contact_info: None,
            signing_time: None,
            sub_filter: None,
            digest_algorithm: None,
            permission: None,
            coverage: Coverage::default(),
            signature_valid: false,
            chain: Vec::new(),
            chain_trusted: false,
            revocation: Vec::new(),
            timestamp: None,
            findings: Vec::new(),
        }
    }

    pub(crate) fn add(&mut self, finding: Finding) {
        log::info!("{}: {:?}", self.field_name, finding);
        self.findings.push(finding);
    }

    /// No findings other than warnings.
    pub fn is_valid(&self) -> bool {
        self.signature_valid && self.findings.iter().all(Finding::is_warning)
    }

    /// Whether a finding of `kind` (as in [`Finding::kind`]) is present.
    pub fn has(&self, kind: &str) -> bool {
        self.findings.iter().any(|f| f.kind() == kind)
    }
}

/// Result of verifying every signature in a document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VerificationReport {
    /// Size of the verified file
    pub document_len: u64,
    /// End offset of every revision
    pub revisions: Vec<u64>,
    /// One entry per signed field, in form order
    pub signatures: Vec<SignatureReport>,
}

impl VerificationReport {
    /// True when there is at least one signature and all are valid.
    pub fn is_valid(&self) -> bool {
        !self.signatures.is_empty() && self.signatures.iter().all(SignatureReport::is_valid)
    }

    /// Whether some signature covers the whole file.
    pub fn is_fully_covered(&self) -> bool {
        self.signatures.iter().any(|s| s.coverage.covers_whole_document)
    }

    /// The report as pretty-printed JSON.
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self).map_err(|e| Error::Encoding(format!("report serialization failed: {}", e)))
    }
}
