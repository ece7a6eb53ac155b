//! Digital signature types and data structures.

use crate::crypto::keys::{load_pkcs8_pem, SigningKey};
use crate::crypto::DigestAlgorithm;
use crate::error::{Error, Result};
use crate::object::ObjectRef;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;

/// DocMDP permission level of a signature.
///
/// Anything other than [`Permission::NoRestrictions`] makes the signature a
/// certification signature.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Permission {
    /// Approval signature, later changes allowed
    #[default]
    NoRestrictions,
    /// `/P 1`: no changes at all
    NoChanges,
    /// `/P 2`: filling forms and signing
    FillFormsAndSign,
    /// `/P 3`: filling forms, signing and annotating
    FillFormsSignAndAnnotate,
}

impl Permission {
    /// Whether this level produces a certification signature.
    pub fn is_certification(&self) -> bool {
        !matches!(self, Permission::NoRestrictions)
    }

    /// Value of `/P` in the DocMDP transform parameters.
    pub fn docmdp_p(&self) -> Option<i64> {
        match self {
            Permission::NoRestrictions => None,
            Permission::NoChanges => Some(1),
            Permission::FillFormsAndSign => Some(2),
            Permission::FillFormsSignAndAnnotate => Some(3),
        }
    }

    /// Level for a DocMDP `/P` value. Out-of-range values fall back to 2.
    pub fn from_docmdp_p(p: i64) -> Self {
        match p {
            1 => Permission::NoChanges,
            3 => Permission::FillFormsSignAndAnnotate,
            _ => Permission::FillFormsAndSign,
        }
    }
}

/// Signature sub-filter (container format).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub enum SignatureSubFilter {
    /// adbe.pkcs7.detached - PKCS#7 detached signature
    #[default]
    Pkcs7Detached,
    /// adbe.pkcs7.sha1 - PKCS#7 over the SHA-1 digest of the ranges
    Pkcs7Sha1,
    /// ETSI.CAdES.detached - PAdES CAdES signature
    CadesDetached,
}

impl SignatureSubFilter {
    /// Get the PDF name for this sub-filter.
    pub fn as_pdf_name(&self) -> &'static str {
        match self {
            SignatureSubFilter::Pkcs7Detached => "adbe.pkcs7.detached",
            SignatureSubFilter::Pkcs7Sha1 => "adbe.pkcs7.sha1",
            SignatureSubFilter::CadesDetached => "ETSI.CAdES.detached",
        }
    }

    /// Parse a PDF name into a sub-filter type.
    pub fn from_pdf_name(name: &str) -> Option<Self> {
        match name {
            "adbe.pkcs7.detached" => Some(SignatureSubFilter::Pkcs7Detached),
            "adbe.pkcs7.sha1" => Some(SignatureSubFilter::Pkcs7Sha1),
            "ETSI.CAdES.detached" => Some(SignatureSubFilter::CadesDetached),
            _ => None,
        }
    }
}

/// Signer metadata written to the signature dictionary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SignerMetadata {
    /// `/Name`
    pub name: Option<String>,
    /// `/Reason`
    pub reason: Option<String>,
    /// `/Location`
    pub location: Option<String>,
    /// `/ContactInfo`
    pub contact_info: Option<String>,
    /// `/M` and the `signing-time` attribute
    pub signing_time: DateTime<Utc>,
}

/// A signature dictionary written by the builder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignatureField {
    /// Fully qualified field name
    pub name: String,
    /// The widget/field object
    pub field: ObjectRef,
    /// The signature dictionary object
    pub signature: ObjectRef,
    /// `[offset1 length1 offset2 length2]`
    pub byte_range: [u64; 4],
    /// Offset of the `<` opening the `/Contents` hex string
    pub contents_offset: u64,
    /// Container bytes the placeholder can hold
    pub capacity: usize,
    /// DocMDP level
    pub permission: Permission,
    /// What was written to the dictionary
    pub metadata: SignerMetadata,
    /// Digest over the byte ranges
    pub digest_algorithm: DigestAlgorithm,
}

impl SignatureField {
    /// Number of bytes the digest covers.
    pub fn covered_len(&self) -> u64 {
        self.byte_range[1] + self.byte_range[3]
    }

    /// Length of the placeholder including its angle brackets.
    pub fn placeholder_len(&self) -> u64 {
        self.byte_range[2] - self.byte_range[1]
    }
}

/// Certificate, chain and key capability of a signer.
#[derive(Clone)]
pub struct SigningCredentials {
    /// DER-encoded X.509 certificate
    pub certificate: Vec<u8>,
    /// Issuer certificates (DER), leaf excluded
    pub chain: Vec<Vec<u8>>,
    /// Signing capability; the key material never leaves it
    pub key: Arc<dyn SigningKey>,
}

impl SigningCredentials {
    /// Create new signing credentials from raw components.
    pub fn new(certificate: Vec<u8>, key: Arc<dyn SigningKey>) -> Self {
        Self {
            certificate,
            chain: Vec::new(),
            key,
        }
    }

    /// Create credentials with a certificate chain.
    pub fn with_chain(mut self, chain: Vec<Vec<u8>>) -> Self {
        self.chain = chain;
        self
    }

    /// Load credentials from a PEM certificate bundle and a PKCS#8 key.
    ///
    /// The first certificate is the signer's, the rest form the chain.
    pub fn from_pem(cert_pem: &str, key_pem: &str) -> Result<Self> {
        let mut certificates = Vec::new();
        for block in x509_parser::pem::Pem::iter_from_buffer(cert_pem.as_bytes()) {
            let block = block.map_err(|e| Error::Certificate {
                fingerprint: String::new(),
                reason: format!("invalid PEM: {}", e),
            })?;
            if block.label == "CERTIFICATE" {
                certificates.push(block.contents);
            }
        }
        if certificates.is_empty() {
            return Err(Error::InvalidRequest("no CERTIFICATE block in PEM".to_string()));
        }
        let certificate = certificates.remove(0);
        let key: Arc<dyn SigningKey> = Arc::from(load_pkcs8_pem(key_pem)?);
        Ok(Self::new(certificate, key).with_chain(certificates))
    }
}

impl std::fmt::Debug for SigningCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SigningCredentials")
            .field("certificate", &format!("{} bytes", self.certificate.len()))
            .field("chain", &format!("{} certificates", self.chain.len()))
            .field("key", &self.key.algorithm())
            .finish()
    }
}

/// Result of a successful signing call.
#[derive(Debug, Clone)]
pub struct SignOutcome {
    /// The signed document: input bytes followed by the incremental update
    pub bytes: Vec<u8>,
    /// The signature that was written
    pub field: SignatureField,
    /// Steps that degraded without failing the signature
    pub warnings: Vec<String>,
}
