//! Revocation evidence: embedding, caching across a batch, revoked signers.

mod common;

use chrono::TimeZone;
use common::{
    crl, leaf, root_ca, signer, single_page_pdf, trust_store, CrlServer, LeafSpec, OcspResponder, CRL_URL, OCSP_URL,
};
use pdf_seal::config::RetryPolicy;
use pdf_seal::net::HttpTransport;
use pdf_seal::revocation::{EvidenceKind, RevocationStatus};
use pdf_seal::signatures::RevocationOrigin;
use pdf_seal::{Error, RevocationMode, RevocationPolicy, RevocationResolver, SignOptions, VerifyOptions};
use std::sync::Arc;

fn resolver(server: Arc<CrlServer>) -> Arc<RevocationResolver> {
    let policy = RevocationPolicy::default().with_retry(RetryPolicy::none());
    Arc::new(RevocationResolver::with_transport(policy, server))
}

fn ocsp_resolver(transport: Arc<dyn HttpTransport>) -> Arc<RevocationResolver> {
    let policy = RevocationPolicy::default()
        .with_ocsp_responder(OCSP_URL)
        .with_retry(RetryPolicy::none());
    Arc::new(RevocationResolver::with_transport(policy, transport))
}

#[test]
fn test_batch_fetches_each_crl_once() {
    common::init_logging();
    let root = root_ca("Batch Root");
    let signer_cert = leaf(
        "Batch Signer",
        &root,
        LeafSpec {
            crl_url: Some(CRL_URL),
            ..LeafSpec::default()
        },
    );
    let server = Arc::new(CrlServer::new(CRL_URL, crl(&root, &[])));
    let resolver = resolver(server.clone());
    let signer = signer(&signer_cert, &root).with_revocation_source(resolver.clone());

    let documents: Vec<Vec<u8>> = (0..8).map(|i| single_page_pdf(2048 + i * 64)).collect();
    let lengths: Vec<usize> = documents.iter().map(Vec::len).collect();
    let results = signer.sign_batch(documents, &SignOptions::approval());

    assert_eq!(results.len(), 8);
    for (result, len) in results.iter().zip(lengths) {
        let outcome = result.as_ref().unwrap();
        assert!(outcome.warnings.is_empty(), "{:?}", outcome.warnings);
        assert!(outcome.bytes.len() > len);
    }
    assert_eq!(server.gets(), 1);
    let stats = resolver.cache().stats();
    assert_eq!(stats.misses, 1);
    assert_eq!(stats.hits, 7);

    // the evidence travels inside the container; verification needs no network
    let outcome = results.into_iter().next().unwrap().unwrap();
    let report = pdf_seal::verify(outcome.bytes, &VerifyOptions::new(trust_store(&[&root]))).unwrap();
    let signature = &report.signatures[0];
    assert_eq!(signature.revocation.len(), 1);
    assert_eq!(signature.revocation[0].status, Some(RevocationStatus::Good));
    assert_eq!(signature.revocation[0].origin, Some(RevocationOrigin::Embedded));
    assert!(signature.findings.is_empty(), "{:?}", signature.findings);
    assert_eq!(server.gets(), 1);
}

#[test]
fn test_revoked_signer_is_reported() {
    let root = root_ca("Revoking Root");
    let signer_cert = leaf(
        "Revoked Signer",
        &root,
        LeafSpec {
            serial: Some(0x1234),
            crl_url: Some(CRL_URL),
            ..LeafSpec::default()
        },
    );
    let server = Arc::new(CrlServer::new(CRL_URL, crl(&root, &[0x1234])));
    let outcome = signer(&signer_cert, &root)
        .with_revocation_source(resolver(server))
        .sign(single_page_pdf(2048), &SignOptions::approval())
        .unwrap();
    assert!(outcome.warnings.iter().any(|w| w.contains("revoked")), "{:?}", outcome.warnings);

    let report = pdf_seal::verify(outcome.bytes, &VerifyOptions::new(trust_store(&[&root]))).unwrap();
    let signature = &report.signatures[0];
    assert!(signature.signature_valid);
    assert!(signature.has("certificate_revoked"));
    assert!(!report.is_valid());
}

#[test]
fn test_strict_mode_without_evidence_fails() {
    let root = root_ca("Strict Root");
    let signer_cert = leaf(
        "Strict Signer",
        &root,
        LeafSpec {
            crl_url: Some("http://crl.test/missing.crl"),
            ..LeafSpec::default()
        },
    );
    let server = Arc::new(CrlServer::new(CRL_URL, crl(&root, &[])));
    let signer = signer(&signer_cert, &root).with_revocation_source(resolver(server.clone()));

    let strict = SignOptions::approval().with_revocation(RevocationMode::Strict);
    let result = signer.sign(single_page_pdf(2048), &strict);
    assert!(matches!(result, Err(Error::RevocationUnavailable { .. })));

    // best effort degrades to a warning and still signs
    let outcome = signer.sign(single_page_pdf(2048), &SignOptions::approval()).unwrap();
    assert!(outcome.warnings.iter().any(|w| w.contains("no revocation evidence")));
}

#[test]
fn test_online_lookup_during_verification() {
    let root = root_ca("Online Root");
    let signer_cert = leaf(
        "Online Signer",
        &root,
        LeafSpec {
            crl_url: Some(CRL_URL),
            ..LeafSpec::default()
        },
    );
    // signed without a revocation source, so nothing is embedded
    let outcome = signer(&signer_cert, &root)
        .sign(single_page_pdf(2048), &SignOptions::approval())
        .unwrap();

    let server = Arc::new(CrlServer::new(CRL_URL, crl(&root, &[])));
    let options = VerifyOptions::new(trust_store(&[&root])).with_revocation_source(resolver(server.clone()));
    let report = pdf_seal::verify(outcome.bytes, &options).unwrap();
    let check = &report.signatures[0].revocation[0];
    assert_eq!(check.status, Some(RevocationStatus::Good));
    assert_eq!(check.origin, Some(RevocationOrigin::Online));
    assert_eq!(server.gets(), 1);
    assert!(report.is_valid());
}

#[test]
fn test_ocsp_evidence_is_embedded_and_checked() {
    let root = root_ca("OCSP Root");
    let signer_cert = leaf("OCSP Signer", &root, LeafSpec::default());
    let responder = Arc::new(OcspResponder::new(&signer_cert, &root, RevocationStatus::Good));
    let resolver = ocsp_resolver(responder.clone());
    let signer = signer(&signer_cert, &root).with_revocation_source(resolver.clone());

    let documents: Vec<Vec<u8>> = (0..4).map(|i| single_page_pdf(2048 + i * 64)).collect();
    let results = signer.sign_batch(documents, &SignOptions::approval());
    assert_eq!(responder.posts(), 1);
    assert_eq!(resolver.cache().stats().misses, 1);
    assert_eq!(resolver.cache().stats().hits, 3);

    for result in results {
        let outcome = result.unwrap();
        assert!(outcome.warnings.is_empty(), "{:?}", outcome.warnings);
        let report = pdf_seal::verify(outcome.bytes, &VerifyOptions::new(trust_store(&[&root]))).unwrap();
        let check = &report.signatures[0].revocation[0];
        assert_eq!(check.kind, Some(EvidenceKind::Ocsp));
        assert_eq!(check.status, Some(RevocationStatus::Good));
        assert_eq!(check.origin, Some(RevocationOrigin::Embedded));
        assert!(report.is_valid(), "{:?}", report.signatures[0].findings);
    }
}

#[test]
fn test_ocsp_revoked_signer_is_reported() {
    let root = root_ca("OCSP Root");
    let signer_cert = leaf("Revoked OCSP Signer", &root, LeafSpec::default());
    let revoked_at = chrono::Utc.with_ymd_and_hms(2020, 1, 1, 0, 0, 0).unwrap();
    let responder = Arc::new(OcspResponder::new(
        &signer_cert,
        &root,
        RevocationStatus::Revoked { at: revoked_at },
    ));
    let outcome = signer(&signer_cert, &root)
        .with_revocation_source(ocsp_resolver(responder))
        .sign(single_page_pdf(2048), &SignOptions::approval())
        .unwrap();

    let report = pdf_seal::verify(outcome.bytes, &VerifyOptions::new(trust_store(&[&root]))).unwrap();
    let signature = &report.signatures[0];
    assert_eq!(signature.revocation[0].kind, Some(EvidenceKind::Ocsp));
    assert!(signature.has("certificate_revoked"));
    assert!(!report.is_valid());
}

#[test]
fn test_failed_ocsp_falls_back_to_crl() {
    let root = root_ca("Fallback Root");
    let signer_cert = leaf(
        "Fallback Signer",
        &root,
        LeafSpec {
            crl_url: Some(CRL_URL),
            ..LeafSpec::default()
        },
    );
    // the server refuses every OCSP request
    let server = Arc::new(CrlServer::new(CRL_URL, crl(&root, &[])));
    let outcome = signer(&signer_cert, &root)
        .with_revocation_source(ocsp_resolver(server.clone()))
        .sign(single_page_pdf(2048), &SignOptions::approval())
        .unwrap();
    assert!(outcome.warnings.is_empty(), "{:?}", outcome.warnings);
    assert_eq!(server.posts(), 1);
    assert_eq!(server.gets(), 1);

    let report = pdf_seal::verify(outcome.bytes, &VerifyOptions::new(trust_store(&[&root]))).unwrap();
    let check = &report.signatures[0].revocation[0];
    assert_eq!(check.kind, Some(EvidenceKind::Crl));
    assert_eq!(check.status, Some(RevocationStatus::Good));
    assert!(report.is_valid());
}
