//! OCSP requests and responses (RFC 6960).
//!
//! Only the basic response type is understood. Responses may be signed by
//! the issuer itself or by a delegated responder whose certificate the
//! issuer signed and which is included in the response.

use super::{EvidenceKind, RevocationEvidence, RevocationStatus};
use crate::cms::{generalized_time, parse_generalized_time};
use crate::crypto::keys::SigningKey;
use crate::crypto::{oids, DigestAlgorithm};
use crate::error::{Error, Result};
use crate::trust::CertificateInfo;
use chrono::{DateTime, Utc};
use der::asn1::{Any, BitString, Int, Null, ObjectIdentifier, OctetString};
use der::{Decode, Encode, Enumerated, Sequence, Tag, Tagged};
use spki::AlgorithmIdentifierOwned;

/// Media type of OCSP requests.
pub const OCSP_REQUEST: &str = "application/ocsp-request";

#[derive(Clone, Debug, Eq, PartialEq, Sequence)]
pub struct CertId {
    pub hash_algorithm: AlgorithmIdentifierOwned,
    pub issuer_name_hash: OctetString,
    pub issuer_key_hash: OctetString,
    pub serial_number: Int,
}

impl CertId {
    /// Identify `cert` by its issuer's name and key hashed with `digest`.
    pub fn new(cert: &CertificateInfo, issuer: &CertificateInfo, digest: DigestAlgorithm) -> Result<Self> {
        Ok(Self {
            hash_algorithm: AlgorithmIdentifierOwned {
                oid: digest.oid(),
                parameters: Some(Any::encode_from(&Null)?),
            },
            issuer_name_hash: OctetString::new(digest.digest(&issuer.subject_raw))?,
            issuer_key_hash: OctetString::new(digest.digest(&issuer.public_key_bits))?,
            serial_number: Int::new(&cert.serial)?,
        })
    }

    fn matches(&self, cert: &CertificateInfo, issuer: &CertificateInfo) -> bool {
        let Some(digest) = DigestAlgorithm::from_oid(&self.hash_algorithm.oid) else {
            return false;
        };
        strip_zeros(self.serial_number.as_bytes()) == strip_zeros(&cert.serial)
            && self.issuer_name_hash.as_bytes() == digest.digest(&issuer.subject_raw).as_slice()
            && self.issuer_key_hash.as_bytes() == digest.digest(&issuer.public_key_bits).as_slice()
    }
}

fn strip_zeros(bytes: &[u8]) -> &[u8] {
    let start = bytes.iter().position(|&b| b != 0).unwrap_or(bytes.len());
    &bytes[start..]
}

#[derive(Clone, Debug, Eq, PartialEq, Sequence)]
pub struct Request {
    pub req_cert: CertId,
}

#[derive(Clone, Debug, Eq, PartialEq, Sequence)]
pub struct TbsRequest {
    pub request_list: Vec<Request>,
}

#[derive(Clone, Debug, Eq, PartialEq, Sequence)]
pub struct OcspRequest {
    pub tbs_request: TbsRequest,
}

/// Encode an unsigned request for one certificate, SHA-1 CertID.
pub fn build_request(cert: &CertificateInfo, issuer: &CertificateInfo) -> Result<Vec<u8>> {
    let request = OcspRequest {
        tbs_request: TbsRequest {
            request_list: vec![Request {
                req_cert: CertId::new(cert, issuer, DigestAlgorithm::Sha1)?,
            }],
        },
    };
    Ok(request.to_der()?)
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Enumerated)]
#[repr(u32)]
pub enum OcspResponseStatus {
    Successful = 0,
    MalformedRequest = 1,
    InternalError = 2,
    TryLater = 3,
    SigRequired = 5,
    Unauthorized = 6,
}

#[derive(Clone, Debug, Eq, PartialEq, Sequence)]
pub struct ResponseBytes {
    pub response_type: ObjectIdentifier,
    pub response: OctetString,
}

#[derive(Clone, Debug, Eq, PartialEq, Sequence)]
pub struct OcspResponse {
    pub response_status: OcspResponseStatus,
    #[asn1(context_specific = "0", tag_mode = "EXPLICIT", optional = "true")]
    pub response_bytes: Option<ResponseBytes>,
}

/// `SingleResponse`; the `certStatus` CHOICE is kept as an `Any` and read
/// by [`SingleResponse::status`].
#[derive(Clone, Debug, Eq, PartialEq, Sequence)]
pub struct SingleResponse {
    pub cert_id: CertId,
    pub cert_status: Any,
    pub this_update: Any,
    #[asn1(context_specific = "0", tag_mode = "EXPLICIT", optional = "true")]
    pub next_update: Option<Any>,
    #[asn1(context_specific = "1", tag_mode = "EXPLICIT", optional = "true")]
    pub single_extensions: Option<Any>,
}

impl SingleResponse {
    /// Status at `time`; a revocation after `time` does not count.
    pub fn status(&self, time: DateTime<Utc>) -> Result<RevocationStatus> {
        match self.cert_status.tag() {
            Tag::ContextSpecific { number, .. } if number.value() == 0 => Ok(RevocationStatus::Good),
            Tag::ContextSpecific { number, .. } if number.value() == 1 => {
                // RevokedInfo contents start with revocationTime
                let at = parse_generalized_time(&Any::from_der(self.cert_status.value())?)?;
                if at <= time {
                    Ok(RevocationStatus::Revoked { at })
                } else {
                    Ok(RevocationStatus::Good)
                }
            },
            Tag::ContextSpecific { number, .. } if number.value() == 2 => Ok(RevocationStatus::Unknown),
            other => Err(Error::Encoding(format!("unexpected OCSP certStatus tag {}", other))),
        }
    }
}

#[derive(Clone, Debug, Eq, PartialEq, Sequence)]
pub struct ResponseData {
    #[asn1(context_specific = "0", tag_mode = "EXPLICIT", optional = "true")]
    pub version: Option<u8>,
    pub responder_id: Any,
    pub produced_at: Any,
    pub responses: Vec<SingleResponse>,
    #[asn1(context_specific = "1", tag_mode = "EXPLICIT", optional = "true")]
    pub response_extensions: Option<Any>,
}

#[derive(Clone, Debug, Eq, PartialEq, Sequence)]
pub struct BasicOcspResponse {
    pub tbs_response_data: ResponseData,
    pub signature_algorithm: AlgorithmIdentifierOwned,
    pub signature: BitString,
    #[asn1(context_specific = "0", tag_mode = "EXPLICIT", optional = "true")]
    pub certs: Option<Vec<Any>>,
}

/// A successful, basic OCSP response.
#[derive(Debug, Clone)]
pub struct OcspResponseInfo {
    /// Complete DER `OCSPResponse`
    pub der: Vec<u8>,
    /// Decoded basic response
    pub basic: BasicOcspResponse,
}

impl OcspResponseInfo {
    /// Parse an `OCSPResponse`, rejecting unsuccessful statuses.
    pub fn parse(der: &[u8]) -> Result<Self> {
        let response = OcspResponse::from_der(der)?;
        if response.response_status != OcspResponseStatus::Successful {
            return Err(Error::Crypto(format!(
                "OCSP responder answered {:?}",
                response.response_status
            )));
        }
        let bytes = response
            .response_bytes
            .ok_or_else(|| Error::Encoding("successful OCSP response without body".to_string()))?;
        if bytes.response_type != oids::OCSP_BASIC {
            return Err(Error::Encoding(format!(
                "unsupported OCSP response type {}",
                bytes.response_type
            )));
        }
        let basic = BasicOcspResponse::from_der(bytes.response.as_bytes())?;
        Ok(Self {
            der: der.to_vec(),
            basic,
        })
    }

    /// The single response about `cert`, if the responder answered for it.
    pub fn find(&self, cert: &CertificateInfo, issuer: &CertificateInfo) -> Option<&SingleResponse> {
        self.basic
            .tbs_response_data
            .responses
            .iter()
            .find(|single| single.cert_id.matches(cert, issuer))
    }

    /// Check that `issuer`, or a responder certificate it issued, signed the
    /// response.
    pub fn verify_signer(&self, issuer: &CertificateInfo) -> Result<()> {
        let tbs = self.basic.tbs_response_data.to_der()?;
        let signature = self.basic.signature.raw_bytes();
        let algorithm = &self.basic.signature_algorithm.oid;
        if issuer.verify_message(algorithm, &tbs, signature).is_ok() {
            return Ok(());
        }
        for cert in self.basic.certs.iter().flatten() {
            let responder = CertificateInfo::parse(&cert.to_der()?)?;
            if responder.verify_issued_by(issuer).is_ok()
                && responder.verify_message(algorithm, &tbs, signature).is_ok()
            {
                log::debug!("OCSP response signed by delegated responder {}", responder.subject);
                return Ok(());
            }
        }
        Err(Error::Crypto(format!(
            "OCSP response is not signed by {} or a responder it authorized",
            issuer.subject
        )))
    }

    /// Validate the response for `cert` and wrap it as evidence.
    pub fn into_evidence(self, cert: &CertificateInfo, issuer: &CertificateInfo) -> Result<RevocationEvidence> {
        self.verify_signer(issuer)?;
        let single = self
            .find(cert, issuer)
            .ok_or_else(|| Error::Crypto(format!("OCSP response does not cover {}", cert.subject)))?;
        let this_update = parse_generalized_time(&single.this_update)?;
        let next_update = single.next_update.as_ref().map(parse_generalized_time).transpose()?;
        Ok(RevocationEvidence {
            kind: EvidenceKind::Ocsp,
            der: self.der,
            fetched_at: Utc::now(),
            this_update,
            next_update,
        })
    }
}

/// Issue a basic OCSP response signed by `key`, the issuer's key.
///
/// Offline responder: an issuer that holds its own key can answer for the
/// certificates it issued without running a service. The result feeds
/// [`StaticRevocationSource::add_ocsp_response`](super::StaticRevocationSource::add_ocsp_response)
/// for air-gapped signing, or an [`HttpTransport`](crate::net::HttpTransport)
/// that serves it.
pub fn issue_response(
    cert: &CertificateInfo,
    issuer: &CertificateInfo,
    key: &dyn SigningKey,
    status: RevocationStatus,
    this_update: DateTime<Utc>,
    next_update: Option<DateTime<Utc>>,
) -> Result<Vec<u8>> {
    let context = |number: u8, constructed: bool, value: Vec<u8>| -> Result<Any> {
        let tag = Tag::ContextSpecific {
            constructed,
            number: der::TagNumber::new(number),
        };
        Ok(Any::new(tag, value)?)
    };
    let cert_status = match status {
        RevocationStatus::Good => context(0, false, Vec::new())?,
        RevocationStatus::Revoked { at } => context(1, true, generalized_time(at)?.to_der()?)?,
        RevocationStatus::Unknown => context(2, false, Vec::new())?,
    };
    let data = ResponseData {
        version: None,
        // byName [1] EXPLICIT Name
        responder_id: context(1, true, issuer.subject_raw.clone())?,
        produced_at: generalized_time(this_update)?,
        responses: vec![SingleResponse {
            cert_id: CertId::new(cert, issuer, DigestAlgorithm::Sha1)?,
            cert_status,
            this_update: generalized_time(this_update)?,
            next_update: next_update.map(generalized_time).transpose()?,
            single_extensions: None,
        }],
        response_extensions: None,
    };
    let digest = DigestAlgorithm::Sha256;
    let algorithm = key.algorithm();
    let signature = key.sign(&data.to_der()?, digest)?;
    let basic = BasicOcspResponse {
        tbs_response_data: data,
        signature_algorithm: AlgorithmIdentifierOwned {
            oid: algorithm.signature_oid(digest),
            parameters: if algorithm.has_null_parameters() {
                Some(Any::encode_from(&Null)?)
            } else {
                None
            },
        },
        signature: BitString::from_bytes(&signature)?,
        certs: None,
    };
    let response = OcspResponse {
        response_status: OcspResponseStatus::Successful,
        response_bytes: Some(ResponseBytes {
            response_type: oids::OCSP_BASIC,
            response: OctetString::new(basic.to_der()?)?,
        }),
    };
    Ok(response.to_der()?)
}
