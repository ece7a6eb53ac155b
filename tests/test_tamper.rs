//! Tamper detection: any change to signed bytes invalidates the signature.

mod common;

use common::{find, self_signed, self_signer, single_page_pdf, trust_store};
use pdf_seal::{SignOptions, TrustStore, VerifyOptions};
use proptest::prelude::*;
use std::sync::OnceLock;

struct Signed {
    bytes: Vec<u8>,
    byte_range: [u64; 4],
    roots: TrustStore,
}

fn signed() -> &'static Signed {
    static SIGNED: OnceLock<Signed> = OnceLock::new();
    SIGNED.get_or_init(|| {
        let root = self_signed("Tamper Test");
        let outcome = self_signer(&root)
            .sign(single_page_pdf(4096), &SignOptions::approval())
            .unwrap();
        Signed {
            bytes: outcome.bytes,
            byte_range: outcome.field.byte_range,
            roots: trust_store(&[&root]),
        }
    })
}

/// Offsets of the page content stream's data.
fn content_offsets() -> std::ops::Range<usize> {
    let bytes = &signed().bytes;
    let start = find(bytes, b"stream\n").unwrap() + b"stream\n".len();
    let end = find(bytes, b"\nendstream").unwrap();
    start..end
}

#[test]
fn test_untampered_is_valid() {
    let signed = signed();
    let report = pdf_seal::verify(signed.bytes.clone(), &VerifyOptions::new(signed.roots.clone())).unwrap();
    assert!(report.is_valid(), "{:?}", report.signatures[0].findings);
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]

    /// Property: changing page content reports a signature mismatch
    #[test]
    fn content_change_is_a_mismatch(index in content_offsets(), mask in 1u8..=0x7F) {
        let signed = signed();
        let mut bytes = signed.bytes.clone();
        bytes[index] ^= mask;

        let report = pdf_seal::verify(bytes, &VerifyOptions::new(signed.roots.clone())).unwrap();
        prop_assert_eq!(report.signatures.len(), 1);
        prop_assert!(!report.signatures[0].signature_valid);
        prop_assert!(report.signatures[0].has("signature_mismatch"));
    }

    /// Property: flipping any byte outside the placeholder never verifies
    #[test]
    fn any_change_outside_placeholder_is_detected(position in any::<prop::sample::Index>(), mask in 1u8..=0xFF) {
        let signed = signed();
        let [_, gap_start, gap_end, _] = signed.byte_range;
        let outside = signed.bytes.len() - (gap_end - gap_start) as usize;
        let mut index = position.index(outside);
        if index >= gap_start as usize {
            index += (gap_end - gap_start) as usize;
        }
        let mut bytes = signed.bytes.clone();
        bytes[index] ^= mask;

        // a damaged structure may stop the file from parsing at all
        if let Ok(report) = pdf_seal::verify(bytes, &VerifyOptions::new(signed.roots.clone())) {
            prop_assert!(!report.is_valid(), "flip at {} went unnoticed", index);
        }
    }
}
