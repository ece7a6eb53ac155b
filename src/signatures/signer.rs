//! PDF signing implementation.
//!
//! [`PdfSigner::sign`] runs the whole pipeline for one document:
//!
//! ```text
//! chain assembly → revocation evidence → placeholder sizing
//!     → signature dictionary (incremental update) → ByteRange digest
//!     → CMS container → optional timestamp → hex into the placeholder
//! ```
//!
//! The input bytes are never modified; the output is the input followed by
//! one incremental update.

use super::builder::{certification_level, SignatureDictionaryBuilder};
use super::byterange::ByteRangeCalculator;
use super::types::{Permission, SignOutcome, SignerMetadata, SigningCredentials};
use crate::cms::timestamp::{TimestampAuthority, TimestampToken};
use crate::cms::{estimate_size, ContainerBuilder, RevocationArchive};
use crate::config::{PlaceholderPolicy, RevocationMode, SignOptions};
use crate::crypto::DigestAlgorithm;
use crate::document::Document;
use crate::error::{Error, Result};
use crate::revocation::{check_evidence, RevocationSource, RevocationStatus};
use crate::trust::{CertificateInfo, TrustChain, TrustStore};
use bytes::Bytes;
use chrono::Utc;
use rayon::prelude::*;
use std::sync::Arc;

/// PDF signer that creates digital signatures.
///
/// A signer is cheap to share: every collaborator sits behind an `Arc`, so
/// one signer (and one revocation cache) serves a whole batch.
#[derive(Clone)]
pub struct PdfSigner {
    credentials: SigningCredentials,
    trust_roots: Option<TrustStore>,
    revocation: Option<Arc<dyn RevocationSource>>,
    timestamp: Option<Arc<dyn TimestampAuthority>>,
}

impl std::fmt::Debug for PdfSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PdfSigner")
            .field("credentials", &self.credentials)
            .field("trust_roots", &self.trust_roots.as_ref().map(TrustStore::len))
            .field("revocation", &self.revocation.is_some())
            .field("timestamp", &self.timestamp.is_some())
            .finish()
    }
}

impl PdfSigner {
    /// Create a new PDF signer with the given credentials.
    pub fn new(credentials: SigningCredentials) -> Self {
        Self {
            credentials,
            trust_roots: None,
            revocation: None,
            timestamp: None,
        }
    }

    /// Assemble the embedded chain by building a path to `roots`.
    ///
    /// Without roots the credentials' chain is embedded in the order given.
    pub fn with_trust_roots(mut self, roots: TrustStore) -> Self {
        self.trust_roots = Some(roots);
        self
    }

    /// Where revocation evidence comes from.
    pub fn with_revocation_source(mut self, source: Arc<dyn RevocationSource>) -> Self {
        self.revocation = Some(source);
        self
    }

    /// Timestamp every signature with `authority`.
    pub fn with_timestamp_authority(mut self, authority: Arc<dyn TimestampAuthority>) -> Self {
        self.timestamp = Some(authority);
        self
    }

    /// Get the signing credentials.
    pub fn credentials(&self) -> &SigningCredentials {
        &self.credentials
    }

    fn chain(&self) -> Result<Vec<CertificateInfo>> {
        match &self.trust_roots {
            Some(roots) => {
                let chain = TrustChain::build(&self.credentials.certificate, &self.credentials.chain, roots)?;
                Ok(chain.certificates().to_vec())
            },
            None => std::iter::once(&self.credentials.certificate)
                .chain(&self.credentials.chain)
                .map(|der| CertificateInfo::parse(der))
                .collect(),
        }
    }

    fn gather_revocation(
        &self,
        chain: &[CertificateInfo],
        options: &SignOptions,
        warnings: &mut Vec<String>,
    ) -> Result<RevocationArchive> {
        if options.revocation == RevocationMode::Skip {
            return Ok(RevocationArchive::default());
        }
        let strict = options.revocation == RevocationMode::Strict;
        let Some(source) = &self.revocation else {
            if strict {
                return Err(Error::RevocationUnavailable {
                    fingerprint: chain[0].fingerprint.clone(),
                    reason: "no revocation source configured".to_string(),
                });
            }
            log::debug!("no revocation source configured, embedding no evidence");
            return Ok(RevocationArchive::default());
        };

        let signing_time = options.signing_time.unwrap_or_else(Utc::now);
        let mut evidence = Vec::new();
        for pair in chain.windows(2) {
            let (cert, issuer) = (&pair[0], &pair[1]);
            options.cancel.check()?;
            match source.resolve(cert, issuer, &options.cancel) {
                Ok(found) => {
                    if let Ok(RevocationStatus::Revoked { at }) = check_evidence(&found, cert, issuer, signing_time) {
                        warnings.push(format!("{} was revoked at {}", cert.subject, at.to_rfc3339()));
                    }
                    evidence.push(found);
                },
                Err(Error::Cancelled) => return Err(Error::Cancelled),
                Err(e) if strict => {
                    return Err(match e {
                        e @ Error::RevocationUnavailable { .. } => e,
                        other => Error::RevocationUnavailable {
                            fingerprint: cert.fingerprint.clone(),
                            reason: other.to_string(),
                        },
                    })
                },
                Err(e) => {
                    log::warn!("no revocation evidence for {}: {}", cert.subject, e);
                    warnings.push(format!("no revocation evidence for {}: {}", cert.subject, e));
                },
            }
        }
        Ok(evidence.into_iter().collect())
    }

    fn capacity(&self, chain: &[CertificateInfo], archive: &RevocationArchive, options: &SignOptions) -> usize {
        match options.placeholder {
            PlaceholderPolicy::Fixed(bytes) => bytes,
            PlaceholderPolicy::Estimate {
                overhead,
                timestamp_reserve,
            } => {
                let ts_reserve = self
                    .timestamp
                    .as_ref()
                    .map_or(0, |tsa| tsa.estimated_token_size().max(timestamp_reserve));
                let certificates: Vec<Vec<u8>> = chain.iter().map(|c| c.der.clone()).collect();
                estimate_size(&certificates, archive, self.credentials.key.algorithm(), ts_reserve, overhead)
            },
        }
    }

    /// Sign one document.
    ///
    /// # Errors
    ///
    /// - [`Error::MalformedDocument`] if the input cannot be parsed
    /// - [`Error::InvalidRequest`] for SHA-1, a certification signature on
    ///   an already signed document, or a taken field name
    /// - [`Error::RevocationUnavailable`] in strict revocation mode
    /// - [`Error::TimestampRequired`] if the timestamp policy demands one
    /// - [`Error::PlaceholderTooSmall`] if the container outgrew the
    ///   reservation; no bytes are produced
    /// - [`Error::Cancelled`] if `options.cancel` fired between steps
    pub fn sign(&self, pdf: impl Into<Bytes>, options: &SignOptions) -> Result<SignOutcome> {
        options.cancel.check()?;
        if options.digest_algorithm == DigestAlgorithm::Sha1 {
            return Err(Error::InvalidRequest("SHA-1 is not accepted for new signatures".to_string()));
        }
        let mut doc = Document::open(pdf)?;
        let mut warnings = Vec::new();
        let signing_time = options.signing_time.unwrap_or_else(Utc::now);

        let chain = self.chain()?;
        let leaf = &chain[0];
        if !leaf.is_valid_at(signing_time) {
            warnings.push(format!(
                "certificate {} is not valid at {} (valid {} to {})",
                leaf.subject,
                signing_time.to_rfc3339(),
                leaf.not_before.to_rfc3339(),
                leaf.not_after.to_rfc3339()
            ));
        }
        for entry in doc.signature_fields()? {
            if let Some(dict) = &entry.dictionary {
                if certification_level(&doc, dict)? == Some(Permission::NoChanges) {
                    warnings.push(format!("{} certifies the document with no changes allowed", entry.name));
                }
            }
        }

        let archive = self.gather_revocation(&chain, options, &mut warnings)?;
        let capacity = self.capacity(&chain, &archive, options);

        options.cancel.check()?;
        let metadata = SignerMetadata {
            name: options.name.clone().or_else(|| Some(leaf.common_name())),
            reason: options.reason.clone(),
            location: options.location.clone(),
            contact_info: options.contact_info.clone(),
            signing_time,
        };
        let builder = SignatureDictionaryBuilder::new(metadata, capacity)
            .with_permission(options.permission)
            .with_field_name(options.field_name.clone())
            .with_digest(options.digest_algorithm);
        let field = builder.prepare(&mut doc)?;
        let digest = ByteRangeCalculator::digest(&doc, &field.byte_range, options.digest_algorithm)?;

        let issuers: Vec<Vec<u8>> = chain[1..].iter().map(|c| c.der.clone()).collect();
        let mut prepared = ContainerBuilder::new(options.digest_algorithm, &self.credentials.certificate)
            .chain(&issuers)
            .revocation(archive)
            .signing_time(signing_time)
            .sign(&digest, self.credentials.key.as_ref())?;

        if let Some(tsa) = &self.timestamp {
            options.cancel.check()?;
            let algorithm = tsa.imprint_algorithm(options.digest_algorithm);
            let imprint = algorithm.digest(prepared.signature_value());
            let stamped = tsa.timestamp(&imprint, algorithm, &options.cancel).and_then(|token| {
                TimestampToken::parse(&token)?;
                prepared.add_timestamp_token(&token)
            });
            match stamped {
                Ok(()) => {},
                Err(Error::Cancelled) => return Err(Error::Cancelled),
                Err(e) if options.timestamp.is_required(options.permission) => {
                    return Err(Error::TimestampRequired { reason: e.to_string() })
                },
                Err(e) => {
                    log::warn!("signing without timestamp: {}", e);
                    warnings.push(format!("timestamp skipped: {}", e));
                },
            }
        }

        let container = prepared.to_der()?;
        builder
            .calculator()
            .insert_signature(&mut doc, field.contents_offset, &container)?;
        log::info!(
            "signed {} as {} ({} byte container, {} reserved, {} warnings)",
            leaf.subject,
            field.name,
            container.len(),
            field.capacity,
            warnings.len()
        );
        Ok(SignOutcome {
            bytes: doc.into_bytes(),
            field,
            warnings,
        })
    }

    /// Sign many documents in parallel with the same options.
    ///
    /// Results keep the input order. Revocation lookups go through the
    /// shared source, so a caching resolver fetches each issuer's evidence
    /// once for the whole batch.
    pub fn sign_batch(&self, documents: Vec<Vec<u8>>, options: &SignOptions) -> Vec<Result<SignOutcome>> {
        documents
            .into_par_iter()
            .map(|pdf| self.sign(pdf, options))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cms::SignedContainer;
    use crate::crypto::keys::EcdsaP256Key;
    use crate::object::Object;
    use pkcs8::DecodePrivateKey;

    fn pdf() -> Vec<u8> {
        let mut pdf = b"%PDF-1.4\n".to_vec();
        let mut offsets = Vec::new();
        for body in [
            "<< /Type /Catalog /Pages 2 0 R >>",
            "<< /Type /Pages /Kids [3 0 R] /Count 1 >>",
            "<< /Type /Page /Parent 2 0 R /MediaBox [0 0 612 792] >>",
        ] {
            offsets.push(pdf.len());
            pdf.extend_from_slice(format!("{} 0 obj\n{}\nendobj\n", offsets.len(), body).as_bytes());
        }
        let xref = pdf.len();
        pdf.extend_from_slice(b"xref\n0 4\n0000000000 65535 f \n");
        for offset in offsets {
            pdf.extend_from_slice(format!("{:010} 00000 n \n", offset).as_bytes());
        }
        pdf.extend_from_slice(format!("trailer\n<< /Size 4 /Root 1 0 R >>\nstartxref\n{}\n%%EOF\n", xref).as_bytes());
        pdf
    }

    fn signer() -> PdfSigner {
        let key = rcgen::KeyPair::generate().unwrap();
        let mut params = rcgen::CertificateParams::new(vec!["signer.test".to_string()]).unwrap();
        params.distinguished_name.push(rcgen::DnType::CommonName, "Test Signer");
        let cert = params.self_signed(&key).unwrap();
        let signing_key = p256::ecdsa::SigningKey::from_pkcs8_der(&key.serialize_der()).unwrap();
        PdfSigner::new(SigningCredentials::new(
            cert.der().to_vec(),
            Arc::new(EcdsaP256Key::new(signing_key)),
        ))
    }

    #[test]
    fn test_sign_fills_placeholder() {
        let input = pdf();
        let outcome = signer().sign(input.clone(), &SignOptions::approval()).unwrap();
        assert!(outcome.bytes.starts_with(&input));
        assert!(outcome.warnings.is_empty());

        let doc = Document::open(outcome.bytes.clone()).unwrap();
        let entry = &doc.signature_fields().unwrap()[0];
        let dict = entry.dictionary.as_ref().unwrap();
        assert_eq!(dict.get("Name"), Some(&Object::String(b"Test Signer".to_vec())));
        let contents = dict["Contents"].as_string().unwrap();
        assert_eq!(contents.len(), outcome.field.capacity);

        let container = SignedContainer::parse(contents).unwrap();
        let digest = ByteRangeCalculator::digest(&doc, &outcome.field.byte_range, DigestAlgorithm::Sha256).unwrap();
        container.verify(&digest).unwrap();
    }

    #[test]
    fn test_fixed_placeholder_too_small() {
        let options = SignOptions::approval().with_placeholder(PlaceholderPolicy::Fixed(64));
        let err = signer().sign(pdf(), &options).unwrap_err();
        assert!(matches!(err, Error::PlaceholderTooSmall { available: 64, .. }));
    }

    #[test]
    fn test_sha1_rejected() {
        let options = SignOptions::approval().with_digest(DigestAlgorithm::Sha1);
        assert!(matches!(signer().sign(pdf(), &options), Err(Error::InvalidRequest(_))));
    }

    #[test]
    fn test_strict_revocation_without_source() {
        let options = SignOptions::approval().with_revocation(RevocationMode::Strict);
        let err = signer().sign(pdf(), &options).unwrap_err();
        assert!(matches!(err, Error::RevocationUnavailable { .. }));
    }

    #[test]
    fn test_cancelled_before_start() {
        let options = SignOptions::approval();
        options.cancel.cancel();
        assert!(matches!(signer().sign(pdf(), &options), Err(Error::Cancelled)));
    }

    #[test]
    fn test_batch_keeps_order() {
        let inputs = vec![pdf(), b"not a pdf".to_vec(), pdf()];
        let results = signer().sign_batch(inputs, &SignOptions::approval());
        assert_eq!(results.len(), 3);
        assert!(results[0].is_ok());
        assert!(matches!(results[1], Err(Error::MalformedDocument { .. })));
        assert!(results[2].is_ok());
    }
}
