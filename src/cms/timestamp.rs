//! RFC 3161 timestamps.
//!
//! The signer asks a [`TimestampAuthority`] for a token over the CMS
//! signature value and stores it as the `id-aa-timeStampToken` unsigned
//! attribute. The verifier parses it back with [`TimestampToken`].

use super::{parse_generalized_time, SignedContainer};
use crate::cancel::CancellationToken;
use crate::crypto::{oids, DigestAlgorithm};
use crate::error::{Error, Result};
use crate::net::{Credentials, HttpTransport, RetryPolicy};
use chrono::{DateTime, Utc};
use der::asn1::{Any, BitString, Int, ObjectIdentifier, OctetString};
use der::{Decode, Encode, Sequence};
use spki::AlgorithmIdentifierOwned;
use std::sync::Arc;

/// Reserve used when a TSA does not know its own token size.
pub const DEFAULT_TOKEN_RESERVE: usize = 6 * 1024;

const TIMESTAMP_QUERY: &str = "application/timestamp-query";

/// ```text
/// MessageImprint ::= SEQUENCE {
///   hashAlgorithm AlgorithmIdentifier,
///   hashedMessage OCTET STRING }
/// ```
#[derive(Clone, Debug, Eq, PartialEq, Sequence)]
pub struct MessageImprint {
    pub hash_algorithm: AlgorithmIdentifierOwned,
    pub hashed_message: OctetString,
}

impl MessageImprint {
    /// Imprint of `digest`, computed with `algorithm`.
    pub fn new(digest: &[u8], algorithm: DigestAlgorithm) -> Result<Self> {
        Ok(Self {
            hash_algorithm: AlgorithmIdentifierOwned {
                oid: algorithm.oid(),
                parameters: None,
            },
            hashed_message: OctetString::new(digest)?,
        })
    }
}

/// `TimeStampReq` without extensions.
#[derive(Clone, Debug, Eq, PartialEq, Sequence)]
pub struct TimeStampReq {
    pub version: u8,
    pub message_imprint: MessageImprint,
    #[asn1(optional = "true")]
    pub req_policy: Option<ObjectIdentifier>,
    #[asn1(optional = "true")]
    pub nonce: Option<Int>,
    #[asn1(optional = "true")]
    pub cert_req: Option<bool>,
}

#[derive(Clone, Debug, Eq, PartialEq, Sequence)]
pub struct PkiStatusInfo {
    pub status: u32,
    #[asn1(optional = "true")]
    pub status_string: Option<Vec<Any>>,
    #[asn1(optional = "true")]
    pub fail_info: Option<BitString>,
}

#[derive(Clone, Debug, Eq, PartialEq, Sequence)]
pub struct TimeStampResp {
    pub status: PkiStatusInfo,
    #[asn1(optional = "true")]
    pub time_stamp_token: Option<Any>,
}

#[derive(Clone, Debug, Eq, PartialEq, Sequence)]
pub struct Accuracy {
    #[asn1(optional = "true")]
    pub seconds: Option<u32>,
    #[asn1(context_specific = "0", tag_mode = "IMPLICIT", optional = "true")]
    pub millis: Option<u16>,
    #[asn1(context_specific = "1", tag_mode = "IMPLICIT", optional = "true")]
    pub micros: Option<u16>,
}

/// `TSTInfo`, the content a TSA signs.
///
/// `gen_time` stays an `Any` because TSAs commonly emit fractional seconds,
/// which strict DER GeneralizedTime decoding refuses.
#[derive(Clone, Debug, Eq, PartialEq, Sequence)]
pub struct TstInfo {
    pub version: u8,
    pub policy: ObjectIdentifier,
    pub message_imprint: MessageImprint,
    pub serial_number: Int,
    pub gen_time: Any,
    #[asn1(optional = "true")]
    pub accuracy: Option<Accuracy>,
    #[asn1(optional = "true")]
    pub ordering: Option<bool>,
    #[asn1(optional = "true")]
    pub nonce: Option<Int>,
    #[asn1(context_specific = "0", tag_mode = "EXPLICIT", optional = "true")]
    pub tsa: Option<Any>,
    #[asn1(context_specific = "1", tag_mode = "IMPLICIT", constructed = "true", optional = "true")]
    pub extensions: Option<Vec<x509_cert::ext::Extension>>,
}

impl TstInfo {
    /// Generation time, whole seconds.
    pub fn gen_time(&self) -> Result<DateTime<Utc>> {
        parse_generalized_time(&self.gen_time)
    }
}

/// Source of RFC 3161 timestamp tokens.
pub trait TimestampAuthority: Send + Sync {
    /// Return a DER `TimeStampToken` over `digest`, computed with `algorithm`.
    fn timestamp(
        &self,
        digest: &[u8],
        algorithm: DigestAlgorithm,
        cancel: &CancellationToken,
    ) -> Result<Vec<u8>>;

    /// Bytes to reserve in the placeholder for one token.
    fn estimated_token_size(&self) -> usize {
        DEFAULT_TOKEN_RESERVE
    }

    /// Digest used for the imprint of a signature made with `signing_digest`.
    fn imprint_algorithm(&self, signing_digest: DigestAlgorithm) -> DigestAlgorithm {
        signing_digest
    }
}

/// Encode a `TimeStampReq` asking for the TSA certificate.
pub fn build_request(
    digest: &[u8],
    algorithm: DigestAlgorithm,
    nonce: Option<&[u8]>,
    policy: Option<ObjectIdentifier>,
) -> Result<Vec<u8>> {
    let request = TimeStampReq {
        version: 1,
        message_imprint: MessageImprint::new(digest, algorithm)?,
        req_policy: policy,
        nonce: nonce.map(Int::new).transpose()?,
        cert_req: Some(true),
    };
    Ok(request.to_der()?)
}

/// Extract the token from a `TimeStampResp`, rejecting anything but
/// granted (0) or grantedWithMods (1).
pub fn parse_response(bytes: &[u8]) -> Result<Vec<u8>> {
    let response = TimeStampResp::from_der(bytes)?;
    let status = response.status.status;
    if status > 1 {
        let text = response
            .status
            .status_string
            .iter()
            .flatten()
            .filter_map(|s| s.decode_as::<der::asn1::Utf8StringRef<'_>>().ok())
            .map(|s| s.as_str().to_string())
            .collect::<Vec<_>>()
            .join("; ");
        return Err(Error::Crypto(format!(
            "timestamp authority rejected the request (status {}): {}",
            status, text
        )));
    }
    let token = response
        .time_stamp_token
        .ok_or_else(|| Error::Crypto("timestamp response carries no token".to_string()))?;
    Ok(token.to_der()?)
}

/// Eight positive nonce bytes derived from the request digest and the clock.
fn nonce_for(digest: &[u8]) -> Vec<u8> {
    let mut seed = digest.to_vec();
    let nanos = Utc::now().timestamp_nanos_opt().unwrap_or_default();
    seed.extend_from_slice(&nanos.to_be_bytes());
    let mut nonce = DigestAlgorithm::Sha256.digest(&seed);
    nonce.truncate(8);
    nonce[0] = (nonce[0] & 0x7F) | 0x01;
    nonce
}

/// [`TimestampAuthority`] speaking RFC 3161 over HTTP.
pub struct HttpTimestampClient {
    url: String,
    credentials: Option<Credentials>,
    transport: Arc<dyn HttpTransport>,
    retry: RetryPolicy,
    policy: Option<ObjectIdentifier>,
    digest: Option<DigestAlgorithm>,
    token_reserve: usize,
}

impl std::fmt::Debug for HttpTimestampClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpTimestampClient")
            .field("url", &self.url)
            .field("credentials", &self.credentials)
            .field("retry", &self.retry)
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}

impl HttpTimestampClient {
    /// Client for `url` using a `reqwest` transport with a 30 second timeout.
    #[cfg(feature = "http")]
    pub fn new(url: impl Into<String>) -> Result<Self> {
        let transport = crate::net::ReqwestTransport::new(std::time::Duration::from_secs(30))?;
        Ok(Self::with_transport(url, Arc::new(transport)))
    }

    /// Client for `url` over a caller-supplied transport.
    pub fn with_transport(url: impl Into<String>, transport: Arc<dyn HttpTransport>) -> Self {
        Self {
            url: url.into(),
            credentials: None,
            transport,
            retry: RetryPolicy::default(),
            policy: None,
            digest: None,
            token_reserve: DEFAULT_TOKEN_RESERVE,
        }
    }

    /// Send HTTP basic-auth credentials.
    pub fn credentials(mut self, credentials: Credentials) -> Self {
        self.credentials = Some(credentials);
        self
    }

    /// Retry policy for transport failures.
    pub fn retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Request a specific TSA policy.
    pub fn policy(mut self, policy: ObjectIdentifier) -> Self {
        self.policy = Some(policy);
        self
    }

    /// Hash the signature value with `digest` instead of the signing digest.
    pub fn imprint_digest(mut self, digest: DigestAlgorithm) -> Self {
        self.digest = Some(digest);
        self
    }

    /// Placeholder reserve for this TSA's tokens.
    pub fn token_reserve(mut self, bytes: usize) -> Self {
        self.token_reserve = bytes;
        self
    }

    /// URL of the authority.
    pub fn url(&self) -> &str {
        &self.url
    }
}

impl TimestampAuthority for HttpTimestampClient {
    fn timestamp(
        &self,
        digest: &[u8],
        algorithm: DigestAlgorithm,
        cancel: &CancellationToken,
    ) -> Result<Vec<u8>> {
        let nonce = nonce_for(digest);
        let request = build_request(digest, algorithm, Some(&nonce), self.policy)?;
        let body = self.retry.run("timestamp request", cancel, || {
            self.transport
                .post(&self.url, TIMESTAMP_QUERY, &request, self.credentials.as_ref())
        })?;
        let token_der = parse_response(&body)?;

        let token = TimestampToken::parse(&token_der)?;
        token.check_imprint(digest, algorithm)?;
        let echoed = token.info.nonce.as_ref().map(|n| n.as_bytes());
        if echoed != Some(nonce.as_slice()) {
            return Err(Error::Crypto(format!("timestamp from {} does not echo the request nonce", self.url)));
        }
        log::debug!(
            "timestamp from {} at {}",
            self.url,
            token.gen_time().map(|t| t.to_rfc3339()).unwrap_or_default()
        );
        Ok(token_der)
    }

    fn estimated_token_size(&self) -> usize {
        self.token_reserve
    }

    fn imprint_algorithm(&self, signing_digest: DigestAlgorithm) -> DigestAlgorithm {
        self.digest.unwrap_or(signing_digest)
    }
}

/// A parsed `TimeStampToken`.
#[derive(Debug, Clone)]
pub struct TimestampToken {
    /// The token's own CMS container
    pub container: SignedContainer,
    /// Its decoded `TSTInfo`
    pub info: TstInfo,
}

impl TimestampToken {
    /// Parse a DER `TimeStampToken`.
    pub fn parse(der: &[u8]) -> Result<Self> {
        let container = SignedContainer::parse(der)?;
        if container.content_type != oids::ID_CT_TST_INFO {
            return Err(Error::Encoding(format!(
                "timestamp token content type is {}, not TSTInfo",
                container.content_type
            )));
        }
        let content = container
            .encapsulated_content
            .as_deref()
            .ok_or_else(|| Error::Encoding("timestamp token has no TSTInfo".to_string()))?;
        let info = TstInfo::from_der(content)?;
        Ok(Self { container, info })
    }

    /// When the authority issued the token.
    pub fn gen_time(&self) -> Result<DateTime<Utc>> {
        self.info.gen_time()
    }

    /// Digest algorithm of the message imprint.
    pub fn imprint_algorithm(&self) -> Result<DigestAlgorithm> {
        let oid = self.info.message_imprint.hash_algorithm.oid;
        DigestAlgorithm::from_oid(&oid)
            .ok_or_else(|| Error::Encoding(format!("unsupported imprint algorithm {}", oid)))
    }

    /// Hex serial number assigned by the authority.
    pub fn serial(&self) -> String {
        hex::encode(self.info.serial_number.as_bytes())
    }

    fn check_imprint(&self, digest: &[u8], algorithm: DigestAlgorithm) -> Result<()> {
        if self.imprint_algorithm()? != algorithm || self.info.message_imprint.hashed_message.as_bytes() != digest {
            return Err(Error::Crypto("timestamp imprint does not match the request".to_string()));
        }
        Ok(())
    }

    /// Check that the token covers `signature_value` and that the TSA's
    /// signature over the `TSTInfo` verifies. Chain trust is left to the
    /// caller.
    pub fn verify(&self, signature_value: &[u8]) -> Result<()> {
        let algorithm = self.imprint_algorithm()?;
        self.check_imprint(&algorithm.digest(signature_value), algorithm)?;
        let content = self.container.encapsulated_content.as_deref().unwrap_or_default();
        self.container.verify(&self.container.digest_algorithm.digest(content))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cms::{generalized_time, ContainerBuilder};
    use crate::crypto::keys::EcdsaP256Key;
    use chrono::TimeZone;
    use pkcs8::DecodePrivateKey;
    use std::sync::Mutex;

    struct Tsa {
        cert: Vec<u8>,
        key: EcdsaP256Key,
    }

    impl Tsa {
        fn new() -> Self {
            let key_pair = rcgen::KeyPair::generate_for(&rcgen::PKCS_ECDSA_P256_SHA256).unwrap();
            let params = rcgen::CertificateParams::new(vec!["tsa.test".to_string()]).unwrap();
            let cert = params.self_signed(&key_pair).unwrap();
            let secret = p256::ecdsa::SigningKey::from_pkcs8_der(&key_pair.serialize_der()).unwrap();
            Self {
                cert: cert.der().to_vec(),
                key: EcdsaP256Key::new(secret),
            }
        }

        fn respond(&self, request: &[u8], status: u32) -> Vec<u8> {
            let request = TimeStampReq::from_der(request).unwrap();
            let info = TstInfo {
                version: 1,
                policy: ObjectIdentifier::new_unwrap("1.2.3.4.1"),
                message_imprint: request.message_imprint,
                serial_number: Int::new(&[0x2A]).unwrap(),
                gen_time: generalized_time(Utc.with_ymd_and_hms(2026, 5, 4, 3, 2, 1).unwrap()).unwrap(),
                accuracy: None,
                ordering: None,
                nonce: request.nonce,
                tsa: None,
                extensions: None,
            };
            let content = info.to_der().unwrap();
            let token = ContainerBuilder::new(DigestAlgorithm::Sha256, &self.cert)
                .encapsulate(oids::ID_CT_TST_INFO, content.clone())
                .sign(&DigestAlgorithm::Sha256.digest(&content), &self.key)
                .unwrap()
                .to_der()
                .unwrap();
            let response = TimeStampResp {
                status: PkiStatusInfo {
                    status,
                    status_string: None,
                    fail_info: None,
                },
                time_stamp_token: if status <= 1 {
                    Some(Any::from_der(&token).unwrap())
                } else {
                    None
                },
            };
            response.to_der().unwrap()
        }
    }

    struct LoopbackTransport {
        tsa: Tsa,
        status: u32,
        seen: Mutex<Vec<(String, Option<Credentials>)>>,
    }

    impl HttpTransport for LoopbackTransport {
        fn post(&self, _url: &str, content_type: &str, body: &[u8], credentials: Option<&Credentials>) -> Result<Vec<u8>> {
            self.seen
                .lock()
                .unwrap()
                .push((content_type.to_string(), credentials.cloned()));
            Ok(self.tsa.respond(body, self.status))
        }

        fn get(&self, url: &str) -> Result<Vec<u8>> {
            Err(Error::Network {
                url: url.to_string(),
                reason: "unused".to_string(),
            })
        }
    }

    fn client(status: u32) -> (HttpTimestampClient, Arc<LoopbackTransport>) {
        let transport = Arc::new(LoopbackTransport {
            tsa: Tsa::new(),
            status,
            seen: Mutex::new(Vec::new()),
        });
        let client = HttpTimestampClient::with_transport("http://tsa.test", transport.clone())
            .credentials(Credentials::new("user", "pw"))
            .retry(RetryPolicy::none());
        (client, transport)
    }

    #[test]
    fn test_token_round_trip() {
        let (client, transport) = client(0);
        let signature_value = b"signature value bytes";
        let digest = DigestAlgorithm::Sha256.digest(signature_value);
        let der = client
            .timestamp(&digest, DigestAlgorithm::Sha256, &CancellationToken::new())
            .unwrap();

        let seen = transport.seen.lock().unwrap();
        assert_eq!(seen[0].0, TIMESTAMP_QUERY);
        assert_eq!(seen[0].1.as_ref().map(|c| c.username.as_str()), Some("user"));

        let token = TimestampToken::parse(&der).unwrap();
        assert_eq!(token.gen_time().unwrap(), Utc.with_ymd_and_hms(2026, 5, 4, 3, 2, 1).unwrap());
        assert_eq!(token.serial(), "2a");
        token.verify(signature_value).unwrap();
        assert!(token.verify(b"another signature").is_err());
    }

    #[test]
    fn test_rejection_status() {
        let (client, _) = client(2);
        let err = client
            .timestamp(&[0u8; 32], DigestAlgorithm::Sha256, &CancellationToken::new())
            .unwrap_err();
        assert!(err.to_string().contains("status 2"));
    }

    #[test]
    fn test_request_encoding() {
        let der = build_request(&[1u8; 32], DigestAlgorithm::Sha256, Some(&[0x11, 0x22]), None).unwrap();
        let request = TimeStampReq::from_der(&der).unwrap();
        assert_eq!(request.version, 1);
        assert_eq!(request.cert_req, Some(true));
        assert_eq!(request.message_imprint.hash_algorithm.oid, oids::SHA256);
        assert_eq!(request.nonce.unwrap().as_bytes(), &[0x11, 0x22]);
    }

    #[test]
    fn test_nonce_is_positive() {
        for seed in 0u8..16 {
            let nonce = nonce_for(&[seed; 32]);
            assert_eq!(nonce.len(), 8);
            assert!(nonce[0] & 0x80 == 0 && nonce[0] != 0);
        }
    }
}
