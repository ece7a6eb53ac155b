//! End-to-end signing and verification.

mod common;

use common::{find, leaf, root_ca, self_signed, self_signer, signer, single_page_pdf, trust_store, LeafSpec};
use pdf_seal::document::Document;
use pdf_seal::{Error, Permission, PlaceholderPolicy, SignOptions, VerifyOptions};
use tempfile::tempdir;

#[test]
fn test_certified_ten_kilobyte_document() {
    common::init_logging();
    let pdf = single_page_pdf(10 * 1024);
    assert!((10 * 1024..11 * 1024).contains(&pdf.len()), "fixture is {} bytes", pdf.len());

    let root = self_signed("Self-Signed Root");
    let outcome = self_signer(&root)
        .sign(pdf.clone(), &SignOptions::certification(Permission::NoChanges))
        .unwrap();
    assert!(outcome.warnings.is_empty(), "{:?}", outcome.warnings);
    assert_eq!(&outcome.bytes[..pdf.len()], pdf.as_slice());
    let field = &outcome.field;
    assert_eq!(field.covered_len() + field.placeholder_len(), outcome.bytes.len() as u64);

    let dir = tempdir().unwrap();
    let path = dir.path().join("certified.pdf");
    std::fs::write(&path, &outcome.bytes).unwrap();
    let on_disk = std::fs::read(&path).unwrap();

    let report = pdf_seal::verify(on_disk, &VerifyOptions::new(trust_store(&[&root]))).unwrap();
    assert_eq!(report.signatures.len(), 1);
    let signature = &report.signatures[0];
    assert_eq!(signature.signer.as_ref().unwrap().common_name, "Self-Signed Root");
    assert!(signature.chain_trusted);
    assert!(signature.signature_valid);
    assert_eq!(signature.permission, Some(Permission::NoChanges));
    assert!(signature.coverage.covers_whole_document);
    assert_eq!(signature.coverage.signed_len, outcome.bytes.len() as u64);
    assert!(signature.timestamp.is_none());
    assert!(signature.findings.is_empty(), "{:?}", signature.findings);
    assert!(report.is_valid());
}

#[test]
fn test_round_trip_with_issued_certificate() {
    let root = root_ca("Test Root CA");
    let signer_cert = leaf("Alice Example", &root, LeafSpec::default());
    let options = SignOptions::approval()
        .with_reason("Approved")
        .with_location("Berlin")
        .with_contact_info("alice@example.test");
    let outcome = signer(&signer_cert, &root).sign(single_page_pdf(4096), &options).unwrap();
    assert_eq!(outcome.field.name, "Signature1");

    let report = pdf_seal::verify(outcome.bytes, &VerifyOptions::new(trust_store(&[&root]))).unwrap();
    let signature = &report.signatures[0];
    assert_eq!(signature.field_name, "Signature1");
    assert_eq!(signature.name.as_deref(), Some("Alice Example"));
    assert_eq!(signature.reason.as_deref(), Some("Approved"));
    assert_eq!(signature.location.as_deref(), Some("Berlin"));
    assert_eq!(signature.contact_info.as_deref(), Some("alice@example.test"));
    assert_eq!(signature.chain.len(), 2);
    assert!(signature.chain[1].contains("Test Root CA"));
    assert!(signature.permission.is_none());
    // the leaf names no CRL or OCSP endpoint and no source was configured
    assert!(signature.has("revocation_unknown"));
    assert!(signature.is_valid());
}

#[test]
fn test_co_signing_keeps_first_signature_intact() {
    let root = root_ca("Test Root CA");
    let alice = leaf("Alice", &root, LeafSpec::default());
    let bob = leaf("Bob", &root, LeafSpec::default());

    let first = signer(&alice, &root)
        .sign(single_page_pdf(4096), &SignOptions::approval())
        .unwrap();
    let second = signer(&bob, &root).sign(first.bytes.clone(), &SignOptions::approval()).unwrap();
    assert_eq!(second.field.name, "Signature2");
    assert_eq!(&second.bytes[..first.bytes.len()], first.bytes.as_slice());

    let report = pdf_seal::verify(second.bytes.clone(), &VerifyOptions::new(trust_store(&[&root]))).unwrap();
    assert_eq!(report.revisions.len(), 3);
    assert_eq!(report.signatures.len(), 2);

    let (a, b) = (&report.signatures[0], &report.signatures[1]);
    assert!(a.signature_valid && b.signature_valid);
    assert_eq!(a.coverage.signed_len, first.bytes.len() as u64);
    assert_eq!(b.coverage.signed_len, second.bytes.len() as u64);
    assert!(a.coverage.signed_len < b.coverage.signed_len);
    assert_eq!((a.coverage.revision, a.coverage.later_revisions), (Some(2), 1));
    assert_eq!((b.coverage.revision, b.coverage.later_revisions), (Some(3), 0));
    assert!(!a.coverage.covers_whole_document);
    assert!(report.is_fully_covered());
    assert!(report.is_valid());
}

#[test]
fn test_changes_after_no_changes_certification() {
    let root = self_signed("Certifier");
    let certified = self_signer(&root)
        .sign(single_page_pdf(2048), &SignOptions::certification(Permission::NoChanges))
        .unwrap();

    let approval = self_signer(&root).sign(certified.bytes, &SignOptions::approval()).unwrap();
    assert!(!approval.warnings.is_empty());

    let report = pdf_seal::verify(approval.bytes, &VerifyOptions::new(trust_store(&[&root]))).unwrap();
    assert!(report.signatures[0].has("permission_violation"));
    assert!(report.signatures[1].is_valid());
    assert!(!report.is_valid());
}

#[test]
fn test_certification_must_come_first() {
    let root = self_signed("Signer");
    let signed = self_signer(&root)
        .sign(single_page_pdf(2048), &SignOptions::approval())
        .unwrap();
    let result = self_signer(&root).sign(
        signed.bytes,
        &SignOptions::certification(Permission::FillFormsAndSign),
    );
    assert!(matches!(result, Err(Error::InvalidRequest(_))));
}

#[test]
fn test_placeholder_too_small_writes_nothing() {
    let root = self_signed("Signer");
    let options = SignOptions::approval().with_placeholder(PlaceholderPolicy::Fixed(128));
    match self_signer(&root).sign(single_page_pdf(2048), &options) {
        Err(Error::PlaceholderTooSmall { required, available }) => {
            assert_eq!(available, 128);
            assert!(required > available);
        },
        other => panic!("expected PlaceholderTooSmall, got {:?}", other.map(|o| o.bytes.len())),
    }
}

#[test]
fn test_expired_certificate_is_reported() {
    let root = root_ca("Test Root CA");
    let expired = leaf(
        "Expired Signer",
        &root,
        LeafSpec {
            validity: Some(((2019, 1, 1), (2020, 1, 1))),
            ..LeafSpec::default()
        },
    );
    let outcome = signer(&expired, &root)
        .sign(single_page_pdf(2048), &SignOptions::approval())
        .unwrap();
    assert!(outcome.warnings.iter().any(|w| w.contains("not valid")), "{:?}", outcome.warnings);

    let report = pdf_seal::verify(outcome.bytes, &VerifyOptions::new(trust_store(&[&root]))).unwrap();
    let signature = &report.signatures[0];
    assert!(signature.signature_valid);
    assert!(signature.has("expired_certificate"));
    assert!(!signature.is_valid());
}

#[test]
fn test_xref_stream_document() {
    let pdf = common::xref_stream_pdf();
    let doc = Document::open(pdf.clone()).unwrap();
    assert_eq!(doc.revisions(), vec![pdf.len() as u64]);
    doc.first_page().unwrap();

    let root = self_signed("Signer");
    let outcome = self_signer(&root).sign(pdf, &SignOptions::approval()).unwrap();
    // the update is indexed the same way as the original
    let update = &outcome.bytes[doc.len() as usize..];
    assert!(find(update, b"/Type /XRef").is_some());
    assert!(find(update, b"\nxref\n").is_none());

    let report = pdf_seal::verify(outcome.bytes, &VerifyOptions::new(trust_store(&[&root]))).unwrap();
    assert!(report.is_valid(), "{:?}", report.signatures[0].findings);
}

#[test]
fn test_report_serializes_as_data() {
    let root = self_signed("Signer");
    let outcome = self_signer(&root)
        .sign(single_page_pdf(2048), &SignOptions::approval())
        .unwrap();
    let report = pdf_seal::verify(outcome.bytes, &VerifyOptions::new(pdf_seal::TrustStore::new())).unwrap();

    let json: serde_json::Value = serde_json::from_str(&report.to_json().unwrap()).unwrap();
    let signature = &json["signatures"][0];
    assert_eq!(signature["signature_valid"], true);
    assert_eq!(signature["chain_trusted"], false);
    assert_eq!(signature["findings"][0]["kind"], "untrusted_chain");
    assert_eq!(signature["coverage"]["covers_whole_document"], true);
}

#[test]
fn test_garbage_is_malformed() {
    let result = pdf_seal::verify(b"not a pdf at all".to_vec(), &VerifyOptions::new(pdf_seal::TrustStore::new()));
    assert!(matches!(result, Err(Error::MalformedDocument { .. })));
}
