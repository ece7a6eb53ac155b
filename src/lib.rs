// Allow some clippy lints that are too pedantic for this project
#![allow(clippy::type_complexity)]
#![allow(clippy::too_many_arguments)]
#![allow(clippy::needless_range_loop)]
#![allow(clippy::should_implement_trait)]
// Allow unused for tests
#![cfg_attr(test, allow(dead_code))]

//! # PDF Seal
//!
//! Digital signatures for PDF documents: incremental signing, CMS
//! containers, revocation evidence and verification.
//!
//! ## Core Features
//!
//! ### Signing
//! - **Incremental Updates**: Signatures are appended as a new revision; earlier bytes never change
//! - **Approval and Certification**: DocMDP permissions for the first signature, approval for the rest
//! - **CMS Containers**: Detached `SignedData` with RSA, ECDSA P-256 and P-384 keys
//! - **Long-Term Validation**: OCSP responses and CRLs archived inside the signed attributes
//! - **Timestamps**: RFC 3161 tokens embedded as unsigned attributes
//! - **Bulk Signing**: Independent documents signed in parallel with a shared revocation cache
//!
//! ### Verification
//! - **Per-Signature Reports**: ByteRange coverage, signature value, chain, revocation, timestamp
//! - **Findings as Data**: Problems are reported, not raised; only malformed files fail
//! - **Revision Tracking**: Which revision each signature covers and what was appended later
//!
//! ## Quick Start
//!
//! ```ignore
//! use pdf_seal::{PdfSigner, SignOptions, SigningCredentials, TrustStore, VerifyOptions};
//!
//! # fn main() -> pdf_seal::Result<()> {
//! let credentials = SigningCredentials::from_pem(&cert_pem, &key_pem)?;
//! let signer = PdfSigner::new(credentials);
//!
//! let outcome = signer.sign(std::fs::read("contract.pdf")?, &SignOptions::approval().with_reason("Approved"))?;
//! std::fs::write("contract-signed.pdf", &outcome.bytes)?;
//!
//! let roots = TrustStore::from_der([root_der.as_slice()])?;
//! let report = pdf_seal::verify(outcome.bytes, &VerifyOptions::new(roots))?;
//! println!("{}", report.to_json()?);
//! # Ok(())
//! # }
//! ```
//!
//! ## License
//!
//! Licensed under either of:
//!
//! * Apache License, Version 2.0 ([LICENSE-APACHE](LICENSE-APACHE) or <http://www.apache.org/licenses/LICENSE-2.0>)
//! * MIT license ([LICENSE-MIT](LICENSE-MIT) or <http://opensource.org/licenses/MIT>)
//!
//! at your option.

#![warn(missing_docs)]
#![cfg_attr(docsrs, feature(doc_cfg))]

// Error handling
pub mod error;

// Core PDF parsing
pub mod document;
pub mod filters;
pub mod lexer;
pub mod object;
pub mod objstm;
pub mod parser;
pub mod xref;

// Incremental writing
pub mod writer;

// Configuration and cancellation
pub mod cancel;
pub mod config;

// Cryptography
pub mod cms;
pub mod crypto;
pub mod trust;

// Revocation and timestamp transport
pub mod net;
pub mod revocation;

// Signing and verification
pub mod signatures;

pub use cancel::CancellationToken;
pub use cms::timestamp::{HttpTimestampClient, TimestampAuthority};
pub use config::{
    PlaceholderPolicy, RevocationMode, RevocationPolicy, RevocationPreference, SignOptions, TimestampPolicy,
    VerifyOptions,
};
pub use crypto::DigestAlgorithm;
pub use document::Document;
pub use error::{Error, Result};
pub use revocation::{RevocationResolver, RevocationSource, StaticRevocationSource};
pub use signatures::{
    verify, Finding, Permission, PdfSigner, SignOutcome, SignatureReport, SignatureVerifier, SigningCredentials,
    VerificationReport,
};
pub use trust::{CertificateInfo, TrustChain, TrustStore};

// Version info
/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name
pub const NAME: &str = env!("CARGO_PKG_NAME");
