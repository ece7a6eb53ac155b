//! Signing keys.
//!
//! The engine never sees private key material. It only needs something that
//! implements [`SigningKey`]: a hardware token, a remote KMS or one of the
//! in-memory keys below.

use super::{oids, DigestAlgorithm};
use crate::error::{Error, Result};
use der::asn1::ObjectIdentifier;
use pkcs8::{DecodePrivateKey, PrivateKeyInfo, SecretDocument};
use rsa::traits::PublicKeyParts;
use rsa::{Pkcs1v15Sign, RsaPrivateKey};
use sha2::{Sha256, Sha384, Sha512};
use signature::hazmat::PrehashSigner;

/// Public-key algorithm of a signing key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyAlgorithm {
    /// RSA PKCS#1 v1.5 with a modulus of the given size
    Rsa {
        /// Modulus size in bits
        modulus_bits: usize,
    },
    /// ECDSA over NIST P-256
    EcdsaP256,
    /// ECDSA over NIST P-384
    EcdsaP384,
}

impl KeyAlgorithm {
    /// Signature algorithm OID for this key combined with `digest`.
    pub fn signature_oid(&self, digest: DigestAlgorithm) -> ObjectIdentifier {
        match (self, digest) {
            (KeyAlgorithm::Rsa { .. }, DigestAlgorithm::Sha1) => oids::SHA1_WITH_RSA,
            (KeyAlgorithm::Rsa { .. }, DigestAlgorithm::Sha256) => oids::SHA256_WITH_RSA,
            (KeyAlgorithm::Rsa { .. }, DigestAlgorithm::Sha384) => oids::SHA384_WITH_RSA,
            (KeyAlgorithm::Rsa { .. }, DigestAlgorithm::Sha512) => oids::SHA512_WITH_RSA,
            (_, DigestAlgorithm::Sha384) => oids::ECDSA_WITH_SHA384,
            (_, DigestAlgorithm::Sha512) => oids::ECDSA_WITH_SHA512,
            (_, _) => oids::ECDSA_WITH_SHA256,
        }
    }

    /// Whether the signature AlgorithmIdentifier carries explicit NULL
    /// parameters (RSA) or none at all (ECDSA).
    pub fn has_null_parameters(&self) -> bool {
        matches!(self, KeyAlgorithm::Rsa { .. })
    }

    /// Upper bound on the encoded signature value.
    pub fn max_signature_len(&self) -> usize {
        match self {
            KeyAlgorithm::Rsa { modulus_bits } => modulus_bits.div_ceil(8),
            // DER SEQUENCE of two INTEGERs, each possibly with a leading zero
            KeyAlgorithm::EcdsaP256 => 72,
            KeyAlgorithm::EcdsaP384 => 104,
        }
    }
}

/// Capability to produce signatures.
///
/// `sign` receives the message (the DER-encoded signed attributes) and the
/// digest algorithm to hash it with.
pub trait SigningKey: Send + Sync {
    /// Algorithm of the key.
    fn algorithm(&self) -> KeyAlgorithm;

    /// Sign `message`, hashing it with `digest`.
    fn sign(&self, message: &[u8], digest: DigestAlgorithm) -> Result<Vec<u8>>;
}

/// RSA private key held in memory.
pub struct RsaKey {
    key: RsaPrivateKey,
}

impl RsaKey {
    /// Wrap an existing key.
    pub fn new(key: RsaPrivateKey) -> Self {
        Self { key }
    }

    /// Load from PKCS#8 DER.
    pub fn from_pkcs8_der(der: &[u8]) -> Result<Self> {
        RsaPrivateKey::from_pkcs8_der(der)
            .map(Self::new)
            .map_err(|e| Error::Crypto(format!("invalid RSA PKCS#8 key: {}", e)))
    }
}

impl std::fmt::Debug for RsaKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RsaKey")
            .field("modulus_bits", &(self.key.size() * 8))
            .field("private_key", &"[REDACTED]")
            .finish()
    }
}

impl SigningKey for RsaKey {
    fn algorithm(&self) -> KeyAlgorithm {
        KeyAlgorithm::Rsa {
            modulus_bits: self.key.size() * 8,
        }
    }

    fn sign(&self, message: &[u8], digest: DigestAlgorithm) -> Result<Vec<u8>> {
        let hashed = digest.digest(message);
        let padding = match digest {
            DigestAlgorithm::Sha256 => Pkcs1v15Sign::new::<Sha256>(),
            DigestAlgorithm::Sha384 => Pkcs1v15Sign::new::<Sha384>(),
            DigestAlgorithm::Sha512 => Pkcs1v15Sign::new::<Sha512>(),
            DigestAlgorithm::Sha1 => {
                return Err(Error::Crypto("SHA-1 is not allowed for new signatures".to_string()))
            },
        };
        self.key
            .sign(padding, &hashed)
            .map_err(|e| Error::Crypto(format!("RSA signing failed: {}", e)))
    }
}

macro_rules! ecdsa_key {
    ($name:ident, $curve:ident, $alg:expr, $label:literal) => {
        #[doc = concat!("ECDSA ", $label, " private key held in memory.")]
        pub struct $name {
            key: $curve::ecdsa::SigningKey,
        }

        impl $name {
            /// Wrap an existing key.
            pub fn new(key: $curve::ecdsa::SigningKey) -> Self {
                Self { key }
            }

            /// Load from PKCS#8 DER.
            pub fn from_pkcs8_der(der: &[u8]) -> Result<Self> {
                $curve::ecdsa::SigningKey::from_pkcs8_der(der)
                    .map(Self::new)
                    .map_err(|e| Error::Crypto(format!(concat!("invalid ", $label, " PKCS#8 key: {}"), e)))
            }
        }

        impl std::fmt::Debug for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.debug_struct(stringify!($name))
                    .field("private_key", &"[REDACTED]")
                    .finish()
            }
        }

        impl SigningKey for $name {
            fn algorithm(&self) -> KeyAlgorithm {
                $alg
            }

            fn sign(&self, message: &[u8], digest: DigestAlgorithm) -> Result<Vec<u8>> {
                if digest == DigestAlgorithm::Sha1 {
                    return Err(Error::Crypto("SHA-1 is not allowed for new signatures".to_string()));
                }
                let prehash = digest.digest(message);
                let signature: $curve::ecdsa::Signature = self
                    .key
                    .sign_prehash(&prehash)
                    .map_err(|e| Error::Crypto(format!(concat!($label, " signing failed: {}"), e)))?;
                Ok(signature.to_der().as_bytes().to_vec())
            }
        }
    };
}

ecdsa_key!(EcdsaP256Key, p256, KeyAlgorithm::EcdsaP256, "P-256");
ecdsa_key!(EcdsaP384Key, p384, KeyAlgorithm::EcdsaP384, "P-384");

/// Load any supported key from PKCS#8 DER, dispatching on its algorithm.
pub fn load_pkcs8_der(der: &[u8]) -> Result<Box<dyn SigningKey>> {
    let info = PrivateKeyInfo::try_from(der).map_err(|e| Error::Crypto(format!("invalid PKCS#8: {}", e)))?;
    let algorithm = info.algorithm.oid;
    if algorithm == oids::RSA_ENCRYPTION {
        return Ok(Box::new(RsaKey::from_pkcs8_der(der)?));
    }
    if algorithm == oids::EC_PUBLIC_KEY {
        let curve = info
            .algorithm
            .parameters_oid()
            .map_err(|e| Error::Crypto(format!("EC key without named curve: {}", e)))?;
        if curve == oids::CURVE_P256 {
            return Ok(Box::new(EcdsaP256Key::from_pkcs8_der(der)?));
        }
        if curve == oids::CURVE_P384 {
            return Ok(Box::new(EcdsaP384Key::from_pkcs8_der(der)?));
        }
        return Err(Error::Crypto(format!("unsupported EC curve {}", curve)));
    }
    Err(Error::Crypto(format!("unsupported key algorithm {}", algorithm)))
}

/// Load any supported key from a PKCS#8 PEM document.
pub fn load_pkcs8_pem(pem: &str) -> Result<Box<dyn SigningKey>> {
    let (label, doc) =
        SecretDocument::from_pem(pem).map_err(|e| Error::Crypto(format!("invalid PEM: {}", e)))?;
    if label != "PRIVATE KEY" {
        return Err(Error::Crypto(format!("expected PRIVATE KEY PEM, found {}", label)));
    }
    load_pkcs8_der(doc.as_bytes())
}
