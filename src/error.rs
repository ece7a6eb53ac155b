//! Error types for signing and verification.
//!
//! Structural problems with the input document and failures of the signing
//! pipeline are reported through [`Error`]. Problems found while *verifying*
//! a signature (digest mismatch, untrusted chain, revocation) are not errors:
//! they are collected as findings in the verification report.

use crate::object::ObjectRef;

/// Result type alias for signing and verification operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Error types that can occur while reading, signing or verifying a PDF.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Unparseable or inconsistent PDF structure
    #[error("Malformed document{}: {reason}", fmt_offset(.offset))]
    MalformedDocument {
        /// Byte offset where the problem was detected, when known
        offset: Option<u64>,
        /// What was wrong
        reason: String,
    },

    /// Referenced object not found in the cross-reference table
    #[error("Object not found: {0}")]
    ObjectNotFound(ObjectRef),

    /// The serialized signature container does not fit the reserved placeholder
    #[error("Signature container needs {required} bytes but only {available} were reserved")]
    PlaceholderTooSmall {
        /// Bytes needed by the DER-encoded container
        required: usize,
        /// Bytes reserved in the /Contents placeholder
        available: usize,
    },

    /// No revocation evidence could be obtained for a certificate
    #[error("Revocation evidence unavailable for certificate {fingerprint}: {reason}")]
    RevocationUnavailable {
        /// SHA-256 fingerprint of the certificate (hex)
        fingerprint: String,
        /// Why the lookup failed
        reason: String,
    },

    /// A timestamp was required by policy but could not be obtained
    #[error("Timestamp required: {reason}")]
    TimestampRequired {
        /// Why the timestamp could not be obtained
        reason: String,
    },

    /// Certificate could not be parsed or used
    #[error("Certificate error ({fingerprint}): {reason}")]
    Certificate {
        /// SHA-256 fingerprint of the certificate (hex), or "-" if unparseable
        fingerprint: String,
        /// Reason for the failure
        reason: String,
    },

    /// Key or signature operation failure
    #[error("Cryptographic error: {0}")]
    Crypto(String),

    /// ASN.1 / DER encoding or decoding failure
    #[error("DER encoding error: {0}")]
    Encoding(String),

    /// Stream decoding error
    #[error("Stream decoding error: {0}")]
    Decode(String),

    /// Network transport failure (OCSP, CRL or TSA)
    #[error("Network error for {url}: {reason}")]
    Network {
        /// Endpoint that was contacted
        url: String,
        /// Transport or protocol failure
        reason: String,
    },

    /// The caller asked for something the document cannot accept
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// The operation was cancelled through its cancellation token
    #[error("Operation cancelled")]
    Cancelled,

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

fn fmt_offset(offset: &Option<u64>) -> String {
    match offset {
        Some(offset) => format!(" at byte {}", offset),
        None => String::new(),
    }
}

impl Error {
    /// Shorthand for a [`Error::MalformedDocument`] with a known offset.
    pub fn malformed_at(offset: u64, reason: impl Into<String>) -> Self {
        Error::MalformedDocument {
            offset: Some(offset),
            reason: reason.into(),
        }
    }

    /// Shorthand for a [`Error::MalformedDocument`] without an offset.
    pub fn malformed(reason: impl Into<String>) -> Self {
        Error::MalformedDocument {
            offset: None,
            reason: reason.into(),
        }
    }

    /// Whether retrying the failed step could change the outcome.
    ///
    /// Only transport failures qualify; parsing and cryptography are
    /// deterministic.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::Network { .. } | Error::Io(_))
    }
}

impl From<der::Error> for Error {
    fn from(err: der::Error) -> Self {
        Error::Encoding(err.to_string())
    }
}
