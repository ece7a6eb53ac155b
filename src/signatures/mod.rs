//! PDF digital signatures.
//!
//! Signing appends an incremental update holding a signature dictionary
//! whose `/Contents` placeholder is later filled with a CMS container over
//! the bytes its `/ByteRange` covers. Earlier revisions are never
//! rewritten, so existing signatures stay valid.
//!
//! ## Signature Types Supported
//!
//! - PKCS#7 detached signatures (adbe.pkcs7.detached)
//! - PKCS#7 SHA-1 signatures (adbe.pkcs7.sha1), verification only
//! - PAdES signatures (ETSI.CAdES.detached)
//!
//! ## Example
//!
//! ```ignore
//! use pdf_seal::signatures::{PdfSigner, SigningCredentials};
//! use pdf_seal::{SignOptions, TrustStore, VerifyOptions};
//!
//! let credentials = SigningCredentials::from_pem(&cert_pem, &key_pem)?;
//! let signed = PdfSigner::new(credentials).sign(pdf, &SignOptions::approval())?;
//!
//! let roots = TrustStore::from_der([root_der.as_slice()])?;
//! let report = pdf_seal::signatures::verify(signed.bytes, &VerifyOptions::new(roots))?;
//! assert!(report.is_valid());
//! ```
//!
//! ## PDF Specification Reference
//!
//! - ISO 32000-1:2008 Section 12.8 - Digital Signatures
//! - ETSI EN 319 142 - PAdES

pub mod builder;
pub mod byterange;
pub mod report;
pub mod signer;
pub mod types;
pub mod verifier;

pub use builder::{certification_level, format_pdf_date, parse_pdf_date, SignatureDictionaryBuilder};
pub use byterange::ByteRangeCalculator;
pub use report::{
    CertificateSummary, Coverage, Finding, RevocationCheck, RevocationOrigin, SignatureReport, TimestampReport,
    VerificationReport,
};
pub use signer::PdfSigner;
pub use types::{
    Permission, SignOutcome, SignatureField, SignatureSubFilter, SignerMetadata, SigningCredentials,
};
pub use verifier::{verify, SignatureVerifier};
