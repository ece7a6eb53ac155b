//! PDF signature verification.
//!
//! Every signed field is checked independently against the bytes its
//! `/ByteRange` covers. Problems with a signature are reported as
//! [`Finding`]s; only a document that cannot be parsed fails verification.

use super::builder::{certification_level, parse_pdf_date};
use super::byterange::ByteRangeCalculator;
use super::report::{
    CertificateSummary, Coverage, Finding, RevocationCheck, RevocationOrigin, SignatureReport, TimestampReport,
    VerificationReport,
};
use super::types::{Permission, SignatureSubFilter};
use crate::cms::timestamp::TimestampToken;
use crate::cms::SignedContainer;
use crate::config::VerifyOptions;
use crate::crypto::DigestAlgorithm;
use crate::document::{Document, SignatureFieldEntry};
use crate::error::{Error, Result};
use crate::object::{Dictionary, Object};
use crate::revocation::{check_archive, check_evidence, RevocationStatus};
use crate::trust::{CertificateInfo, TrustChain, TrustStore};
use bytes::Bytes;
use chrono::{DateTime, Utc};

/// Verifier for PDF digital signatures.
#[derive(Debug, Clone)]
pub struct SignatureVerifier {
    options: VerifyOptions,
}

/// Verify every signature in `pdf`.
pub fn verify(pdf: impl Into<Bytes>, options: &VerifyOptions) -> Result<VerificationReport> {
    SignatureVerifier::new(options.clone()).verify(pdf)
}

impl SignatureVerifier {
    /// Create a new signature verifier.
    pub fn new(options: VerifyOptions) -> Self {
        Self { options }
    }

    /// The options in use.
    pub fn options(&self) -> &VerifyOptions {
        &self.options
    }

    /// Verify every signed field of `pdf`.
    ///
    /// # Errors
    ///
    /// [`Error::MalformedDocument`] if the document cannot be parsed,
    /// [`Error::Cancelled`] if the cancellation token fired.
    pub fn verify(&self, pdf: impl Into<Bytes>) -> Result<VerificationReport> {
        self.options.cancel.check()?;
        let doc = Document::open(pdf)?;
        let revisions = doc.revisions();
        let mut signatures = Vec::new();
        for entry in doc.signature_fields()? {
            let Some(dict) = &entry.dictionary else {
                log::debug!("field {} is not signed", entry.name);
                continue;
            };
            self.options.cancel.check()?;
            signatures.push(self.verify_field(&doc, &entry, dict, &revisions)?);
        }
        log::info!(
            "verified {} signatures over {} revisions",
            signatures.len(),
            revisions.len()
        );
        Ok(VerificationReport {
            document_len: doc.len(),
            revisions,
            signatures,
        })
    }

    fn verify_field(
        &self,
        doc: &Document,
        entry: &SignatureFieldEntry,
        dict: &Dictionary,
        revisions: &[u64],
    ) -> Result<SignatureReport> {
        let mut report = SignatureReport::new(entry.name.clone());
        extract_signature_info(dict, &mut report);
        report.permission = certification_level(doc, dict)?;

        let byte_range = match byte_range_of(doc, dict) {
            Ok(range) => range,
            Err(e) => {
                report.add(Finding::InvalidByteRange { reason: e.to_string() });
                return Ok(report);
            },
        };
        report.coverage = coverage(doc, byte_range, revisions);
        if report.permission == Some(Permission::NoChanges) && !report.coverage.covers_whole_document {
            report.add(Finding::PermissionViolation {
                reason: format!(
                    "{} revisions appended after a no-changes certification",
                    report.coverage.later_revisions.max(1)
                ),
            });
        }

        let contents = match dict.get("Contents").map(|c| doc.resolve(c)).transpose()? {
            Some(Object::String(bytes)) => bytes,
            _ => {
                report.add(Finding::SignatureMismatch {
                    reason: "signature dictionary has no /Contents string".to_string(),
                });
                return Ok(report);
            },
        };
        let container = match SignedContainer::parse(&contents) {
            Ok(container) => container,
            Err(e) => {
                report.add(Finding::SignatureMismatch {
                    reason: format!("unreadable container: {}", e),
                });
                return Ok(report);
            },
        };
        report.digest_algorithm = Some(container.digest_algorithm);
        if container.signing_time.is_some() {
            report.signing_time = container.signing_time;
        }

        match self.check_signature(doc, &byte_range, &container, report.sub_filter.as_deref()) {
            Ok(()) => report.signature_valid = true,
            Err(e) => report.add(Finding::SignatureMismatch { reason: e.to_string() }),
        }

        let signer = match container.signer_certificate().map(CertificateInfo::parse) {
            Some(Ok(signer)) => signer,
            Some(Err(e)) => {
                report.add(Finding::UntrustedChain {
                    reason: format!("unreadable signer certificate: {}", e),
                });
                return Ok(report);
            },
            None => {
                report.add(Finding::UntrustedChain {
                    reason: "signer certificate is not embedded".to_string(),
                });
                return Ok(report);
            },
        };
        report.signer = Some(CertificateSummary::from(&signer));

        let timestamp_time = match &container.timestamp_token {
            Some(token) => {
                let (timestamp, finding) = self.check_timestamp(token, &container.signature);
                if let Some(finding) = finding {
                    report.add(finding);
                }
                let time = timestamp.time.filter(|_| timestamp.valid);
                report.timestamp = Some(timestamp);
                time
            },
            None => None,
        };
        // A trusted timestamp proves the signature existed at that time
        let check_time = timestamp_time.or(report.signing_time).unwrap_or_else(Utc::now);

        let roots = self.roots(&self.options.trust_roots, &container.certificates);
        let others = other_certificates(&container);
        match TrustChain::build(&signer.der, &others, &roots) {
            Ok(chain) => {
                report.chain_trusted = true;
                report.chain = chain.certificates().iter().map(|c| c.subject.clone()).collect();
                if let Some(cert) = chain.invalid_at(check_time) {
                    report.add(Finding::ExpiredCertificate {
                        fingerprint: cert.fingerprint.clone(),
                        subject: cert.subject.clone(),
                    });
                }
                for (cert, issuer) in chain.links() {
                    self.options.cancel.check()?;
                    let check = self.check_revocation(&container, cert, issuer, check_time)?;
                    match check.status {
                        Some(RevocationStatus::Revoked { at }) => report.add(Finding::CertificateRevoked {
                            fingerprint: cert.fingerprint.clone(),
                            at,
                        }),
                        Some(RevocationStatus::Good) => {},
                        Some(RevocationStatus::Unknown) | None => report.add(Finding::RevocationUnknown {
                            fingerprint: cert.fingerprint.clone(),
                        }),
                    }
                    report.revocation.push(check);
                }
            },
            Err(e) => {
                report.add(Finding::UntrustedChain { reason: e.to_string() });
                if !signer.is_valid_at(check_time) {
                    report.add(Finding::ExpiredCertificate {
                        fingerprint: signer.fingerprint.clone(),
                        subject: signer.subject.clone(),
                    });
                }
            },
        }
        Ok(report)
    }

    fn check_signature(
        &self,
        doc: &Document,
        byte_range: &[u64; 4],
        container: &SignedContainer,
        sub_filter: Option<&str>,
    ) -> Result<()> {
        match sub_filter.and_then(SignatureSubFilter::from_pdf_name) {
            Some(SignatureSubFilter::Pkcs7Sha1) => {
                // The container signs the SHA-1 digest of the ranges as its content
                let ranges_digest = ByteRangeCalculator::digest(doc, byte_range, DigestAlgorithm::Sha1)?;
                let content = container
                    .encapsulated_content
                    .as_deref()
                    .ok_or_else(|| Error::Crypto("adbe.pkcs7.sha1 container has no content".to_string()))?;
                if content != ranges_digest.as_slice() {
                    return Err(Error::Crypto("encapsulated digest does not match the byte ranges".to_string()));
                }
                container.verify(&container.digest_algorithm.digest(content))
            },
            _ => {
                let digest = ByteRangeCalculator::digest(doc, byte_range, container.digest_algorithm)?;
                container.verify(&digest)
            },
        }
    }

    fn check_timestamp(&self, token_der: &[u8], signature: &[u8]) -> (TimestampReport, Option<Finding>) {
        let mut report = TimestampReport {
            time: None,
            serial: None,
            authority: None,
            valid: false,
        };
        let token = match TimestampToken::parse(token_der) {
            Ok(token) => token,
            Err(e) => {
                return (
                    report,
                    Some(Finding::TimestampInvalid {
                        reason: format!("unreadable token: {}", e),
                    }),
                )
            },
        };
        report.time = token.gen_time().ok();
        report.serial = Some(token.serial());
        if let Err(e) = token.verify(signature) {
            return (report, Some(Finding::TimestampInvalid { reason: e.to_string() }));
        }
        let Some(tsa_der) = token.container.signer_certificate() else {
            return (
                report,
                Some(Finding::TimestampInvalid {
                    reason: "authority certificate is not embedded".to_string(),
                }),
            );
        };
        if let Ok(tsa) = CertificateInfo::parse(tsa_der) {
            report.authority = Some(CertificateSummary::from(&tsa));
        }
        let base = self
            .options
            .timestamp_roots
            .as_ref()
            .unwrap_or(&self.options.trust_roots);
        let roots = self.roots(base, &token.container.certificates);
        if let Err(e) = TrustChain::build(tsa_der, &other_certificates(&token.container), &roots) {
            return (
                report,
                Some(Finding::TimestampInvalid {
                    reason: format!("untrusted authority: {}", e),
                }),
            );
        }
        report.valid = true;
        (report, None)
    }

    fn check_revocation(
        &self,
        container: &SignedContainer,
        cert: &CertificateInfo,
        issuer: &CertificateInfo,
        time: DateTime<Utc>,
    ) -> Result<RevocationCheck> {
        let mut check = RevocationCheck {
            subject: cert.subject.clone(),
            fingerprint: cert.fingerprint.clone(),
            status: None,
            kind: None,
            origin: None,
        };
        if let Some((kind, status)) = check_archive(&container.revocation, cert, issuer, time) {
            check.status = Some(status);
            check.kind = Some(kind);
            check.origin = Some(RevocationOrigin::Embedded);
            return Ok(check);
        }
        let Some(source) = &self.options.revocation_source else {
            return Ok(check);
        };
        match source.resolve(cert, issuer, &self.options.cancel) {
            Ok(evidence) => match check_evidence(&evidence, cert, issuer, time) {
                Ok(status) => {
                    check.status = Some(status);
                    check.kind = Some(evidence.kind);
                    check.origin = Some(RevocationOrigin::Online);
                },
                Err(e) => log::warn!("fetched revocation evidence for {} is unusable: {}", cert.subject, e),
            },
            Err(Error::Cancelled) => return Err(Error::Cancelled),
            Err(e) => log::warn!("revocation lookup for {} failed: {}", cert.subject, e),
        }
        Ok(check)
    }

    fn roots(&self, base: &TrustStore, embedded: &[Vec<u8>]) -> TrustStore {
        let mut roots = base.clone();
        if self.options.trust_embedded_roots {
            for cert in embedded.iter().filter_map(|der| CertificateInfo::parse(der).ok()) {
                if cert.is_self_issued() {
                    roots.add(cert);
                }
            }
        }
        roots
    }
}

/// Extract signer metadata from a signature dictionary.
fn extract_signature_info(dict: &Dictionary, report: &mut SignatureReport) {
    let text = |key: &str| dict.get(key).and_then(Object::as_text);
    report.name = text("Name");
    report.reason = text("Reason");
    report.location = text("Location");
    report.contact_info = text("ContactInfo");
    report.signing_time = text("M").as_deref().and_then(parse_pdf_date);
    report.sub_filter = dict.get("SubFilter").and_then(Object::as_name).map(str::to_string);
}

fn byte_range_of(doc: &Document, dict: &Dictionary) -> Result<[u64; 4]> {
    let raw = match dict.get("ByteRange").map(|r| doc.resolve(r)).transpose()? {
        Some(Object::Array(items)) => items
            .iter()
            .map(|item| {
                item.as_integer()
                    .ok_or_else(|| Error::malformed(format!("/ByteRange entry is a {}", item.type_name())))
            })
            .collect::<Result<Vec<i64>>>()?,
        _ => return Err(Error::malformed("signature dictionary has no /ByteRange array")),
    };
    let range = ByteRangeCalculator::validate_byte_range(&raw, doc.len())?;

    // The gap must be exactly the /Contents hex string
    let gap: Vec<u8> = doc.range(range[1], range[2] - range[1])?.concat();
    let is_hex_string = gap.len() >= 2
        && gap[0] == b'<'
        && gap[gap.len() - 1] == b'>'
        && gap[1..gap.len() - 1].iter().all(u8::is_ascii_hexdigit);
    if !is_hex_string {
        return Err(Error::malformed(format!(
            "/ByteRange gap {}..{} is not the /Contents hex string",
            range[1], range[2]
        )));
    }
    Ok(range)
}

fn coverage(doc: &Document, byte_range: [u64; 4], revisions: &[u64]) -> Coverage {
    let signed_len = byte_range[2] + byte_range[3];
    let revision = revisions.iter().position(|&end| end == signed_len);
    let later_revisions = revisions.iter().filter(|&&end| end > signed_len).count();
    Coverage {
        byte_range,
        signed_len,
        covers_whole_document: signed_len == doc.len(),
        revision: revision.map(|i| i + 1),
        later_revisions,
    }
}

fn other_certificates(container: &SignedContainer) -> Vec<Vec<u8>> {
    container
        .certificates
        .iter()
        .enumerate()
        .filter(|(i, _)| Some(*i) != container.signer_index)
        .map(|(_, der)| der.clone())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SignOptions;
    use crate::crypto::keys::EcdsaP256Key;
    use crate::signatures::signer::PdfSigner;
    use crate::signatures::types::SigningCredentials;
    use pkcs8::DecodePrivateKey;
    use std::sync::Arc;

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

    fn self_signed() -> (Vec<u8>, PdfSigner) {
        let key = rcgen::KeyPair::generate().unwrap();
        let params = rcgen::CertificateParams::new(vec!["signer.test".to_string()]).unwrap();
        let cert = params.self_signed(&key).unwrap();
        let signing_key = p256::ecdsa::SigningKey::from_pkcs8_der(&key.serialize_der()).unwrap();
        let signer = PdfSigner::new(SigningCredentials::new(
            cert.der().to_vec(),
            Arc::new(EcdsaP256Key::new(signing_key)),
        ));
        (cert.der().to_vec(), signer)
    }

    #[test]
    fn test_unsigned_document_has_no_signatures() {
        let report = verify(pdf(), &VerifyOptions::new(TrustStore::new())).unwrap();
        assert!(report.signatures.is_empty());
        assert!(!report.is_valid());
        assert_eq!(report.revisions, vec![report.document_len]);
    }

    #[test]
    fn test_round_trip_against_explicit_root() {
        let (root, signer) = self_signed();
        let signed = signer.sign(pdf(), &SignOptions::approval()).unwrap();
        let roots = TrustStore::from_der([root.as_slice()]).unwrap();
        let report = verify(signed.bytes.clone(), &VerifyOptions::new(roots)).unwrap();

        assert_eq!(report.signatures.len(), 1);
        let signature = &report.signatures[0];
        assert!(signature.signature_valid);
        assert!(signature.chain_trusted);
        assert!(signature.coverage.covers_whole_document);
        assert_eq!(signature.coverage.revision, Some(2));
        assert_eq!(signature.coverage.signed_len, signed.bytes.len() as u64);
        // a self-signed signer has no chain links to check
        assert!(signature.revocation.is_empty());
        assert!(signature.is_valid(), "{:?}", signature.findings);
    }

    #[test]
    fn test_unknown_root_is_untrusted() {
        let (_, signer) = self_signed();
        let signed = signer.sign(pdf(), &SignOptions::approval()).unwrap();
        let report = verify(signed.bytes, &VerifyOptions::new(TrustStore::new())).unwrap();
        let signature = &report.signatures[0];
        assert!(signature.signature_valid);
        assert!(signature.has("untrusted_chain"));

        // embedded roots are opt-in
        let (_, signer) = self_signed();
        let signed = signer.sign(pdf(), &SignOptions::approval()).unwrap();
        let options = VerifyOptions::new(TrustStore::new()).trust_embedded_roots(true);
        assert!(verify(signed.bytes, &options).unwrap().is_valid());
    }

    #[test]
    fn test_gap_must_be_contents() {
        let (root, signer) = self_signed();
        let signed = signer.sign(pdf(), &SignOptions::approval()).unwrap();
        let mut bytes = signed.bytes;
        // shift the gap one byte left so it no longer starts at '<'
        let [a, b, c, d] = signed.field.byte_range;
        let shifted = ByteRangeCalculator::format_byte_range(&[a, b - 1, c, d]).unwrap();
        let at = bytes.windows(11).rposition(|w| w == b"/ByteRange ").unwrap() + 11;
        bytes[at..at + shifted.len()].copy_from_slice(shifted.as_bytes());
        let roots = TrustStore::from_der([root.as_slice()]).unwrap();
        let report = verify(bytes, &VerifyOptions::new(roots)).unwrap();
        assert!(report.signatures[0].has("invalid_byte_range"));
    }

    #[test]
    fn test_cancelled_verification() {
        let options = VerifyOptions::new(TrustStore::new());
        options.cancel.cancel();
        assert!(matches!(verify(pdf(), &options), Err(Error::Cancelled)));
    }
}
