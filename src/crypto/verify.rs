//! Signature verification for certificates, CMS signer infos, OCSP
//! responses and CRLs.

use super::{oids, DigestAlgorithm};
use crate::error::{Error, Result};
use der::asn1::ObjectIdentifier;
use rsa::{Pkcs1v15Sign, RsaPublicKey};
use sha1::Sha1;
use sha2::{Sha256, Sha384, Sha512};
use signature::hazmat::PrehashVerifier;
use spki::{DecodePublicKey, SubjectPublicKeyInfoRef};

#[derive(Clone, Copy)]
enum Scheme {
    Rsa,
    Ecdsa,
}

/// Signature algorithms with a fixed digest.
const SIGNATURE_ALGORITHMS: &[(ObjectIdentifier, Scheme, DigestAlgorithm)] = &[
    (oids::SHA1_WITH_RSA, Scheme::Rsa, DigestAlgorithm::Sha1),
    (oids::SHA256_WITH_RSA, Scheme::Rsa, DigestAlgorithm::Sha256),
    (oids::SHA384_WITH_RSA, Scheme::Rsa, DigestAlgorithm::Sha384),
    (oids::SHA512_WITH_RSA, Scheme::Rsa, DigestAlgorithm::Sha512),
    (oids::ECDSA_WITH_SHA256, Scheme::Ecdsa, DigestAlgorithm::Sha256),
    (oids::ECDSA_WITH_SHA384, Scheme::Ecdsa, DigestAlgorithm::Sha384),
    (oids::ECDSA_WITH_SHA512, Scheme::Ecdsa, DigestAlgorithm::Sha512),
];

fn classify(algorithm: &ObjectIdentifier, digest: Option<DigestAlgorithm>) -> Result<(Scheme, DigestAlgorithm)> {
    if let Some((_, scheme, digest)) = SIGNATURE_ALGORITHMS.iter().find(|(oid, _, _)| oid == algorithm) {
        return Ok((*scheme, *digest));
    }
    let scheme = if *algorithm == oids::RSA_ENCRYPTION {
        Scheme::Rsa
    } else if *algorithm == oids::EC_PUBLIC_KEY {
        Scheme::Ecdsa
    } else {
        return Err(Error::Crypto(format!("unsupported signature algorithm {}", algorithm)));
    };
    let digest =
        digest.ok_or_else(|| Error::Crypto(format!("algorithm {} needs an explicit digest", algorithm)))?;
    Ok((scheme, digest))
}

/// Verify `signature` over `message` with the key in `spki_der`.
///
/// `algorithm` is a signature algorithm OID. Bare key OIDs
/// (`rsaEncryption`, `id-ecPublicKey`), which CMS signer infos sometimes
/// use, additionally need `digest`.
pub fn verify_signature(
    spki_der: &[u8],
    algorithm: &ObjectIdentifier,
    digest: Option<DigestAlgorithm>,
    message: &[u8],
    signature: &[u8],
) -> Result<()> {
    let (_, digest) = classify(algorithm, digest)?;
    verify_digest(spki_der, algorithm, Some(digest), &digest.digest(message), signature)
}

/// Verify `signature` over an already computed digest.
pub fn verify_digest(
    spki_der: &[u8],
    algorithm: &ObjectIdentifier,
    digest: Option<DigestAlgorithm>,
    hashed: &[u8],
    signature: &[u8],
) -> Result<()> {
    let (scheme, digest) = classify(algorithm, digest)?;
    if hashed.len() != digest.output_len() {
        return Err(Error::Crypto(format!(
            "{} digest has {} bytes, expected {}",
            digest,
            hashed.len(),
            digest.output_len()
        )));
    }
    match scheme {
        Scheme::Rsa => {
            let key = RsaPublicKey::from_public_key_der(spki_der)
                .map_err(|e| Error::Crypto(format!("invalid RSA public key: {}", e)))?;
            let padding = match digest {
                DigestAlgorithm::Sha1 => Pkcs1v15Sign::new::<Sha1>(),
                DigestAlgorithm::Sha256 => Pkcs1v15Sign::new::<Sha256>(),
                DigestAlgorithm::Sha384 => Pkcs1v15Sign::new::<Sha384>(),
                DigestAlgorithm::Sha512 => Pkcs1v15Sign::new::<Sha512>(),
            };
            key.verify(padding, hashed, signature)
                .map_err(|_| Error::Crypto("RSA signature does not verify".to_string()))
        },
        Scheme::Ecdsa => {
            let info = SubjectPublicKeyInfoRef::try_from(spki_der)
                .map_err(|e| Error::Crypto(format!("invalid public key info: {}", e)))?;
            let curve = info
                .algorithm
                .parameters_oid()
                .map_err(|e| Error::Crypto(format!("EC key without named curve: {}", e)))?;
            let bad = |e: signature::Error| Error::Crypto(format!("ECDSA signature does not verify: {}", e));
            if curve == oids::CURVE_P256 {
                let key = p256::ecdsa::VerifyingKey::from_public_key_der(spki_der)
                    .map_err(|e| Error::Crypto(format!("invalid P-256 key: {}", e)))?;
                let sig = p256::ecdsa::Signature::from_der(signature).map_err(bad)?;
                key.verify_prehash(hashed, &sig).map_err(bad)
            } else if curve == oids::CURVE_P384 {
                let key = p384::ecdsa::VerifyingKey::from_public_key_der(spki_der)
                    .map_err(|e| Error::Crypto(format!("invalid P-384 key: {}", e)))?;
                let sig = p384::ecdsa::Signature::from_der(signature).map_err(bad)?;
                key.verify_prehash(hashed, &sig).map_err(bad)
            } else {
                Err(Error::Crypto(format!("unsupported EC curve {}", curve)))
            }
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_algorithm() {
        let oid = ObjectIdentifier::new_unwrap("1.2.3.4");
        let err = verify_signature(b"", &oid, None, b"m", b"s").unwrap_err();
        assert!(err.to_string().contains("unsupported signature algorithm"));
    }

    #[test]
    fn test_bare_key_oid_requires_digest() {
        let err = verify_signature(b"", &oids::RSA_ENCRYPTION, None, b"m", b"s").unwrap_err();
        assert!(err.to_string().contains("explicit digest"));
    }

    #[test]
    fn test_garbage_key_is_crypto_error() {
        let result = verify_signature(b"\x30\x00", &oids::ECDSA_WITH_SHA256, None, b"m", b"s");
        assert!(matches!(result, Err(Error::Crypto(_))));
    }
}
