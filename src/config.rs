//! Configuration for signing, revocation lookup and verification.

use crate::cancel::CancellationToken;
use crate::cms::CONTAINER_OVERHEAD;
use crate::crypto::DigestAlgorithm;
use crate::revocation::RevocationSource;
use crate::signatures::types::Permission;
use crate::trust::TrustStore;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;

pub use crate::net::RetryPolicy;

/// How much room to reserve for the signature container.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaceholderPolicy {
    /// Reserve exactly this many container bytes (twice as many hex digits)
    Fixed(usize),
    /// Sum of the chain, the revocation evidence, the signature bound, a
    /// timestamp reserve and a fixed overhead
    Estimate {
        /// Fixed CMS overhead in bytes
        overhead: usize,
        /// Minimum bytes reserved for a timestamp token when a TSA is
        /// configured; a larger estimate from the TSA wins
        timestamp_reserve: usize,
    },
}

impl Default for PlaceholderPolicy {
    fn default() -> Self {
        PlaceholderPolicy::Estimate {
            overhead: CONTAINER_OVERHEAD,
            timestamp_reserve: crate::cms::timestamp::DEFAULT_TOKEN_RESERVE,
        }
    }
}

/// What to do when the timestamp authority fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TimestampPolicy {
    /// Sign without a timestamp and report a warning
    #[default]
    ProceedWithWarning,
    /// Fail with `TimestampRequired`
    Required,
    /// Fail for certification signatures, warn for approval signatures
    RequiredForCertification,
}

impl TimestampPolicy {
    /// Whether a failed timestamp aborts a signature with `permission`.
    pub fn is_required(&self, permission: Permission) -> bool {
        match self {
            TimestampPolicy::ProceedWithWarning => false,
            TimestampPolicy::Required => true,
            TimestampPolicy::RequiredForCertification => permission.is_certification(),
        }
    }
}

/// How revocation evidence is gathered while signing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RevocationMode {
    /// Embed no evidence
    Skip,
    /// Embed what can be fetched, warn about the rest
    #[default]
    BestEffort,
    /// Fail with `RevocationUnavailable` if any chain certificate lacks evidence
    Strict,
}

/// Which protocol the default resolver tries first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RevocationPreference {
    /// OCSP, falling back to CRL
    #[default]
    OcspFirst,
    /// CRL, falling back to OCSP
    CrlFirst,
}

/// Settings of the default OCSP/CRL resolver.
#[derive(Debug, Clone, PartialEq)]
pub struct RevocationPolicy {
    /// Protocol order
    pub preference: RevocationPreference,
    /// Cache lifetime for responses without `nextUpdate`
    pub fallback_ttl: Duration,
    /// Retries for network failures
    pub retry: RetryPolicy,
    /// Query this responder instead of the certificate's AIA URL
    pub ocsp_responder_override: Option<String>,
    /// Per-request timeout
    pub timeout: Duration,
}

impl Default for RevocationPolicy {
    fn default() -> Self {
        Self {
            preference: RevocationPreference::OcspFirst,
            fallback_ttl: Duration::from_secs(3600),
            retry: RetryPolicy::default(),
            ocsp_responder_override: None,
            timeout: Duration::from_secs(15),
        }
    }
}

impl RevocationPolicy {
    /// Prefer CRLs over OCSP.
    pub fn crl_first(mut self) -> Self {
        self.preference = RevocationPreference::CrlFirst;
        self
    }

    /// Set the fallback cache lifetime.
    pub fn with_fallback_ttl(mut self, ttl: Duration) -> Self {
        self.fallback_ttl = ttl;
        self
    }

    /// Set the retry policy.
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Always ask `url` for OCSP responses.
    pub fn with_ocsp_responder(mut self, url: impl Into<String>) -> Self {
        self.ocsp_responder_override = Some(url.into());
        self
    }
}

/// Options for one signature.
#[derive(Debug, Clone)]
pub struct SignOptions {
    /// Digest over the byte ranges and the signed attributes
    pub digest_algorithm: DigestAlgorithm,
    /// Signer name written to `/Name`
    pub name: Option<String>,
    /// `/Reason`
    pub reason: Option<String>,
    /// `/Location`
    pub location: Option<String>,
    /// `/ContactInfo`
    pub contact_info: Option<String>,
    /// DocMDP level; anything but `NoRestrictions` certifies the document
    pub permission: Permission,
    /// Signing time, defaults to now
    pub signing_time: Option<DateTime<Utc>>,
    /// Field name, defaults to `Signature<n>`
    pub field_name: Option<String>,
    /// Container reservation
    pub placeholder: PlaceholderPolicy,
    /// Reaction to timestamp failures
    pub timestamp: TimestampPolicy,
    /// Revocation evidence gathering
    pub revocation: RevocationMode,
    /// Cooperative cancellation
    pub cancel: CancellationToken,
}

impl Default for SignOptions {
    fn default() -> Self {
        Self {
            digest_algorithm: DigestAlgorithm::Sha256,
            name: None,
            reason: None,
            location: None,
            contact_info: None,
            permission: Permission::NoRestrictions,
            signing_time: None,
            field_name: None,
            placeholder: PlaceholderPolicy::default(),
            timestamp: TimestampPolicy::default(),
            revocation: RevocationMode::default(),
            cancel: CancellationToken::new(),
        }
    }
}

impl SignOptions {
    /// An approval signature that does not restrict later changes.
    pub fn approval() -> Self {
        Self::default()
    }

    /// A certification signature with the given DocMDP permission.
    pub fn certification(permission: Permission) -> Self {
        Self {
            permission,
            ..Self::default()
        }
    }

    /// Set the digest algorithm.
    pub fn with_digest(mut self, digest: DigestAlgorithm) -> Self {
        self.digest_algorithm = digest;
        self
    }

    /// Set the signer name.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Set the reason for signing.
    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    /// Set the signing location.
    pub fn with_location(mut self, location: impl Into<String>) -> Self {
        self.location = Some(location.into());
        self
    }

    /// Set the contact information.
    pub fn with_contact_info(mut self, contact: impl Into<String>) -> Self {
        self.contact_info = Some(contact.into());
        self
    }

    /// Pin the signing time.
    pub fn with_signing_time(mut self, time: DateTime<Utc>) -> Self {
        self.signing_time = Some(time);
        self
    }

    /// Name the signature field.
    pub fn with_field_name(mut self, name: impl Into<String>) -> Self {
        self.field_name = Some(name.into());
        self
    }

    /// Set the placeholder policy.
    pub fn with_placeholder(mut self, placeholder: PlaceholderPolicy) -> Self {
        self.placeholder = placeholder;
        self
    }

    /// Set the timestamp failure policy.
    pub fn with_timestamp_policy(mut self, policy: TimestampPolicy) -> Self {
        self.timestamp = policy;
        self
    }

    /// Set the revocation mode.
    pub fn with_revocation(mut self, mode: RevocationMode) -> Self {
        self.revocation = mode;
        self
    }

    /// Use `cancel` to abort between network steps.
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }
}

/// Options for verification.
#[derive(Clone)]
pub struct VerifyOptions {
    /// Roots signer chains must end in
    pub trust_roots: TrustStore,
    /// Roots for timestamp authority chains, defaults to `trust_roots`
    pub timestamp_roots: Option<TrustStore>,
    /// Accept self-signed certificates found inside the container as roots
    pub trust_embedded_roots: bool,
    /// Live revocation lookup when the container carries no evidence
    pub revocation_source: Option<Arc<dyn RevocationSource>>,
    /// Cooperative cancellation
    pub cancel: CancellationToken,
}

impl std::fmt::Debug for VerifyOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VerifyOptions")
            .field("trust_roots", &self.trust_roots.len())
            .field("timestamp_roots", &self.timestamp_roots.as_ref().map(TrustStore::len))
            .field("trust_embedded_roots", &self.trust_embedded_roots)
            .field("revocation_source", &self.revocation_source.is_some())
            .finish()
    }
}

impl VerifyOptions {
    /// Verify against `roots` only.
    pub fn new(roots: TrustStore) -> Self {
        Self {
            trust_roots: roots,
            timestamp_roots: None,
            trust_embedded_roots: false,
            revocation_source: None,
            cancel: CancellationToken::new(),
        }
    }

    /// Separate roots for timestamp tokens.
    pub fn with_timestamp_roots(mut self, roots: TrustStore) -> Self {
        self.timestamp_roots = Some(roots);
        self
    }

    /// Trust self-signed certificates embedded in the container.
    pub fn trust_embedded_roots(mut self, trust: bool) -> Self {
        self.trust_embedded_roots = trust;
        self
    }

    /// Query `source` when no evidence is embedded.
    pub fn with_revocation_source(mut self, source: Arc<dyn RevocationSource>) -> Self {
        self.revocation_source = Some(source);
        self
    }

    /// Use `cancel` to abort between signatures.
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sign_options_default() {
        let opts = SignOptions::default();
        assert_eq!(opts.digest_algorithm, DigestAlgorithm::Sha256);
        assert_eq!(opts.permission, Permission::NoRestrictions);
        assert_eq!(opts.revocation, RevocationMode::BestEffort);
        assert_eq!(opts.timestamp, TimestampPolicy::ProceedWithWarning);
        assert!(matches!(opts.placeholder, PlaceholderPolicy::Estimate { .. }));
    }

    #[test]
    fn test_sign_options_builder() {
        let opts = SignOptions::certification(Permission::FillFormsAndSign)
            .with_reason("Approved")
            .with_location("Lisbon")
            .with_field_name("Approval");
        assert_eq!(opts.reason.as_deref(), Some("Approved"));
        assert_eq!(opts.location.as_deref(), Some("Lisbon"));
        assert_eq!(opts.field_name.as_deref(), Some("Approval"));
        assert!(opts.permission.is_certification());
    }

    #[test]
    fn test_timestamp_policy() {
        let policy = TimestampPolicy::RequiredForCertification;
        assert!(policy.is_required(Permission::NoChanges));
        assert!(!policy.is_required(Permission::NoRestrictions));
        assert!(!TimestampPolicy::ProceedWithWarning.is_required(Permission::NoChanges));
        assert!(TimestampPolicy::Required.is_required(Permission::NoRestrictions));
    }

    #[test]
    fn test_revocation_policy_builder() {
        let policy = RevocationPolicy::default()
            .crl_first()
            .with_ocsp_responder("http://ocsp.test")
            .with_retry(RetryPolicy::none());
        assert_eq!(policy.preference, RevocationPreference::CrlFirst);
        assert_eq!(policy.ocsp_responder_override.as_deref(), Some("http://ocsp.test"));
        assert_eq!(policy.retry.max_attempts, 1);
    }
}
