//! CMS signature containers (PKCS#7 `SignedData`, detached).
//!
//! A container carries the signer's certificate and chain, the signed
//! attributes (content type, message digest, signing time and, when
//! available, archived revocation evidence), the signature value over those
//! attributes and optionally an RFC 3161 timestamp token as an unsigned
//! attribute.
//!
//! ```text
//! ContentInfo (signedData)
//!   SignedData
//!     certificates      signer + chain
//!     SignerInfo
//!       signedAttrs     contentType, messageDigest, signingTime,
//!                       adbe-revocationInfoArchival
//!       signature       sign(DER(signedAttrs))
//!       unsignedAttrs   id-aa-timeStampToken
//! ```

pub mod timestamp;

use crate::crypto::keys::{KeyAlgorithm, SigningKey};
use crate::crypto::verify::{verify_digest, verify_signature};
use crate::crypto::{oids, DigestAlgorithm};
use crate::error::{Error, Result};
use chrono::{DateTime, Datelike, TimeZone, Utc};
use cms::cert::{CertificateChoices, IssuerAndSerialNumber};
use cms::content_info::{CmsVersion, ContentInfo};
use cms::signed_data::{
    CertificateSet, EncapsulatedContentInfo, SignedData, SignerIdentifier, SignerInfo, SignerInfos,
};
use der::asn1::{Any, ObjectIdentifier, OctetString, SetOfVec};
use der::{Decode, Encode, Reader, Sequence, SliceReader, Tag, Tagged};
use spki::AlgorithmIdentifierOwned;
use x509_cert::attr::Attribute;
use x509_cert::time::Time;
use x509_cert::Certificate;

/// DER overhead of a `SignedData` beyond certificates, evidence, signature
/// value and timestamp token.
pub const CONTAINER_OVERHEAD: usize = 2048;

/// `adbe-revocationInfoArchival` value.
///
/// ```text
/// RevocationInfoArchival ::= SEQUENCE {
///   crl   [0] EXPLICIT SEQUENCE OF CRLs OPTIONAL,
///   ocsp  [1] EXPLICIT SEQUENCE OF OCSPResponse OPTIONAL,
///   otherRevInfo [2] EXPLICIT SEQUENCE OF OtherRevInfo OPTIONAL }
/// ```
#[derive(Clone, Debug, Eq, PartialEq, Sequence)]
pub struct RevocationInfoArchival {
    /// DER CRLs
    #[asn1(context_specific = "0", tag_mode = "EXPLICIT", optional = "true")]
    pub crl: Option<Vec<Any>>,
    /// DER OCSP responses
    #[asn1(context_specific = "1", tag_mode = "EXPLICIT", optional = "true")]
    pub ocsp: Option<Vec<Any>>,
}

/// Revocation evidence embedded in (or extracted from) a container.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RevocationArchive {
    /// DER-encoded CRLs
    pub crls: Vec<Vec<u8>>,
    /// DER-encoded OCSP responses
    pub ocsp_responses: Vec<Vec<u8>>,
}

impl RevocationArchive {
    /// True when there is no evidence at all.
    pub fn is_empty(&self) -> bool {
        self.crls.is_empty() && self.ocsp_responses.is_empty()
    }

    /// Total DER size of the evidence.
    pub fn encoded_len(&self) -> usize {
        self.crls.iter().chain(&self.ocsp_responses).map(Vec::len).sum()
    }

    fn to_attribute_value(&self) -> Result<Any> {
        let wrap = |items: &[Vec<u8>]| -> Result<Option<Vec<Any>>> {
            if items.is_empty() {
                return Ok(None);
            }
            items.iter().map(|der| Ok(Any::from_der(der)?)).collect::<Result<Vec<_>>>().map(Some)
        };
        let archival = RevocationInfoArchival {
            crl: wrap(&self.crls)?,
            ocsp: wrap(&self.ocsp_responses)?,
        };
        Ok(Any::encode_from(&archival)?)
    }

    fn from_attribute_value(value: &Any) -> Result<Self> {
        let archival: RevocationInfoArchival = value.decode_as()?;
        let unwrap = |items: Option<Vec<Any>>| -> Result<Vec<Vec<u8>>> {
            items.unwrap_or_default().iter().map(|any| Ok(any.to_der()?)).collect()
        };
        Ok(Self {
            crls: unwrap(archival.crl)?,
            ocsp_responses: unwrap(archival.ocsp)?,
        })
    }
}

/// Convert to an ASN.1 `Time`, UTCTime before 2050 and GeneralizedTime after.
pub fn to_asn1_time(time: DateTime<Utc>) -> Result<Time> {
    let secs = u64::try_from(time.timestamp())
        .map_err(|_| Error::Encoding(format!("time {} predates the Unix epoch", time)))?;
    let duration = std::time::Duration::from_secs(secs);
    if time.year() < 2050 {
        Ok(Time::UtcTime(der::asn1::UtcTime::from_unix_duration(duration)?))
    } else {
        Ok(Time::GeneralTime(der::asn1::GeneralizedTime::from_unix_duration(duration)?))
    }
}

/// Convert an ASN.1 `Time` to chrono.
pub fn from_asn1_time(time: &Time) -> Result<DateTime<Utc>> {
    let secs = time.to_unix_duration().as_secs() as i64;
    Utc.timestamp_opt(secs, 0)
        .single()
        .ok_or_else(|| Error::Encoding(format!("time out of range: {}", secs)))
}

/// Parse a GeneralizedTime held in an `Any`, tolerating fractional seconds.
pub fn parse_generalized_time(value: &Any) -> Result<DateTime<Utc>> {
    if value.tag() != Tag::GeneralizedTime {
        return Err(Error::Encoding(format!("expected GeneralizedTime, found {}", value.tag())));
    }
    let text = std::str::from_utf8(value.value())
        .map_err(|_| Error::Encoding("GeneralizedTime is not ASCII".to_string()))?;
    let text = text.strip_suffix('Z').unwrap_or(text);
    let whole = text.split('.').next().unwrap_or(text);
    chrono::NaiveDateTime::parse_from_str(whole, "%Y%m%d%H%M%S")
        .map(|naive| naive.and_utc())
        .map_err(|e| Error::Encoding(format!("invalid GeneralizedTime {:?}: {}", text, e)))
}

/// Encode a GeneralizedTime as an `Any` (whole seconds).
pub fn generalized_time(time: DateTime<Utc>) -> Result<Any> {
    let secs = u64::try_from(time.timestamp())
        .map_err(|_| Error::Encoding(format!("time {} predates the Unix epoch", time)))?;
    let gt = der::asn1::GeneralizedTime::from_unix_duration(std::time::Duration::from_secs(secs))?;
    Ok(Any::encode_from(&gt)?)
}

fn attribute(oid: ObjectIdentifier, value: Any) -> Result<Attribute> {
    Ok(Attribute {
        oid,
        values: SetOfVec::try_from(vec![value])?,
    })
}

fn first_value<'a>(attrs: &'a SetOfVec<Attribute>, oid: &ObjectIdentifier) -> Option<&'a Any> {
    attrs
        .iter()
        .find(|attr| attr.oid == *oid)
        .and_then(|attr| attr.values.iter().next())
}

/// Assembles a `SignedData` for one signer.
#[derive(Debug, Clone)]
pub struct ContainerBuilder {
    digest: DigestAlgorithm,
    signer: Vec<u8>,
    chain: Vec<Vec<u8>>,
    revocation: RevocationArchive,
    signing_time: Option<DateTime<Utc>>,
    content_type: ObjectIdentifier,
    encapsulated: Option<Vec<u8>>,
}

impl ContainerBuilder {
    /// Start a detached `id-data` container for the DER certificate `signer`.
    pub fn new(digest: DigestAlgorithm, signer: &[u8]) -> Self {
        Self {
            digest,
            signer: signer.to_vec(),
            chain: Vec::new(),
            revocation: RevocationArchive::default(),
            signing_time: None,
            content_type: oids::ID_DATA,
            encapsulated: None,
        }
    }

    /// Certificates to embed after the signer's, DER encoded.
    pub fn chain(mut self, chain: &[Vec<u8>]) -> Self {
        self.chain = chain.to_vec();
        self
    }

    /// Revocation evidence to archive in the signed attributes.
    pub fn revocation(mut self, revocation: RevocationArchive) -> Self {
        self.revocation = revocation;
        self
    }

    /// Signing-time attribute value.
    pub fn signing_time(mut self, time: DateTime<Utc>) -> Self {
        self.signing_time = Some(time);
        self
    }

    /// Embed content instead of producing a detached signature.
    pub fn encapsulate(mut self, content_type: ObjectIdentifier, content: Vec<u8>) -> Self {
        self.content_type = content_type;
        self.encapsulated = Some(content);
        self
    }

    /// Build the signed attributes for `content_digest` and sign them.
    pub fn sign(&self, content_digest: &[u8], key: &dyn SigningKey) -> Result<PreparedContainer> {
        if content_digest.len() != self.digest.output_len() {
            return Err(Error::InvalidRequest(format!(
                "{} digest must be {} bytes, got {}",
                self.digest,
                self.digest.output_len(),
                content_digest.len()
            )));
        }
        let signer = Certificate::from_der(&self.signer)?;

        let mut attrs = vec![
            attribute(oids::CONTENT_TYPE, Any::encode_from(&self.content_type)?)?,
            attribute(
                oids::MESSAGE_DIGEST,
                Any::encode_from(&OctetString::new(content_digest)?)?,
            )?,
        ];
        if let Some(time) = self.signing_time {
            attrs.push(attribute(oids::SIGNING_TIME, Any::encode_from(&to_asn1_time(time)?)?)?);
        }
        if !self.revocation.is_empty() {
            attrs.push(attribute(
                oids::ADBE_REVOCATION_ARCHIVAL,
                self.revocation.to_attribute_value()?,
            )?);
        }
        let signed_attrs = SetOfVec::try_from(attrs)?;
        let algorithm = key.algorithm();
        let signature = key.sign(&signed_attrs.to_der()?, self.digest)?;

        let signer_info = SignerInfo {
            version: CmsVersion::V1,
            sid: SignerIdentifier::IssuerAndSerialNumber(IssuerAndSerialNumber {
                issuer: signer.tbs_certificate.issuer.clone(),
                serial_number: signer.tbs_certificate.serial_number.clone(),
            }),
            digest_alg: digest_identifier(self.digest),
            signed_attrs: Some(signed_attrs),
            signature_algorithm: signature_identifier(algorithm, self.digest)?,
            signature: OctetString::new(signature)?,
            unsigned_attrs: None,
        };

        let mut certificates = vec![CertificateChoices::Certificate(signer)];
        for der in &self.chain {
            certificates.push(CertificateChoices::Certificate(Certificate::from_der(der)?));
        }

        Ok(PreparedContainer {
            digest: self.digest,
            certificates,
            signer_info,
            content_type: self.content_type,
            encapsulated: self.encapsulated.clone(),
        })
    }
}

fn digest_identifier(digest: DigestAlgorithm) -> AlgorithmIdentifierOwned {
    AlgorithmIdentifierOwned {
        oid: digest.oid(),
        parameters: None,
    }
}

fn signature_identifier(algorithm: KeyAlgorithm, digest: DigestAlgorithm) -> Result<AlgorithmIdentifierOwned> {
    let parameters = if algorithm.has_null_parameters() {
        Some(Any::encode_from(&der::asn1::Null)?)
    } else {
        None
    };
    Ok(AlgorithmIdentifierOwned {
        oid: algorithm.signature_oid(digest),
        parameters,
    })
}

/// A signed container that can still receive unsigned attributes.
#[derive(Debug, Clone)]
pub struct PreparedContainer {
    digest: DigestAlgorithm,
    certificates: Vec<CertificateChoices>,
    signer_info: SignerInfo,
    content_type: ObjectIdentifier,
    encapsulated: Option<Vec<u8>>,
}

impl PreparedContainer {
    /// The raw signature value (what a timestamp is requested over).
    pub fn signature_value(&self) -> &[u8] {
        self.signer_info.signature.as_bytes()
    }

    /// Attach an RFC 3161 timestamp token as `id-aa-timeStampToken`.
    pub fn add_timestamp_token(&mut self, token_der: &[u8]) -> Result<()> {
        let attr = attribute(oids::TIMESTAMP_TOKEN, Any::from_der(token_der)?)?;
        self.signer_info.unsigned_attrs = Some(SetOfVec::try_from(vec![attr])?);
        Ok(())
    }

    /// Encode the `ContentInfo`.
    pub fn to_der(&self) -> Result<Vec<u8>> {
        let econtent = match &self.encapsulated {
            Some(content) => Some(Any::encode_from(&OctetString::new(content.clone())?)?),
            None => None,
        };
        let signed_data = SignedData {
            // v3 when the encapsulated content is not id-data
            version: if self.content_type == oids::ID_DATA {
                CmsVersion::V1
            } else {
                CmsVersion::V3
            },
            digest_algorithms: SetOfVec::try_from(vec![digest_identifier(self.digest)])?,
            encap_content_info: EncapsulatedContentInfo {
                econtent_type: self.content_type,
                econtent,
            },
            certificates: Some(CertificateSet(SetOfVec::try_from(self.certificates.clone())?)),
            crls: None,
            signer_infos: SignerInfos(SetOfVec::try_from(vec![self.signer_info.clone()])?),
        };
        let content_info = ContentInfo {
            content_type: oids::ID_SIGNED_DATA,
            content: Any::encode_from(&signed_data)?,
        };
        Ok(content_info.to_der()?)
    }
}

/// A parsed container with its single signer's details extracted.
#[derive(Debug, Clone)]
pub struct SignedContainer {
    /// Every embedded certificate, DER encoded
    pub certificates: Vec<Vec<u8>>,
    /// Index of the signer's certificate in `certificates`
    pub signer_index: Option<usize>,
    /// Digest algorithm of the signer info
    pub digest_algorithm: DigestAlgorithm,
    /// Signature algorithm OID of the signer info
    pub signature_algorithm: ObjectIdentifier,
    /// Signature value
    pub signature: Vec<u8>,
    /// DER of the signed attributes as a SET, if present
    pub signed_attributes: Option<Vec<u8>>,
    /// `message-digest` attribute
    pub message_digest: Option<Vec<u8>>,
    /// `signing-time` attribute
    pub signing_time: Option<DateTime<Utc>>,
    /// Evidence from `adbe-revocationInfoArchival`
    pub revocation: RevocationArchive,
    /// DER `TimeStampToken` from the unsigned attributes
    pub timestamp_token: Option<Vec<u8>>,
    /// Encapsulated content type
    pub content_type: ObjectIdentifier,
    /// Encapsulated content, for non-detached containers
    pub encapsulated_content: Option<Vec<u8>>,
    /// Length of the DER encoding without trailing padding
    pub encoded_len: usize,
}

impl SignedContainer {
    /// Parse a DER `ContentInfo`; trailing zero padding is ignored.
    pub fn parse(bytes: &[u8]) -> Result<Self> {
        let mut reader = SliceReader::new(bytes)?;
        let content_info = ContentInfo::decode(&mut reader)?;
        let encoded_len = u32::from(reader.position()) as usize;
        if content_info.content_type != oids::ID_SIGNED_DATA {
            return Err(Error::Encoding(format!(
                "container content type is {}, not signedData",
                content_info.content_type
            )));
        }
        let signed_data: SignedData = content_info.content.decode_as()?;

        let mut certificates = Vec::new();
        let mut parsed = Vec::new();
        if let Some(set) = &signed_data.certificates {
            for choice in set.0.iter() {
                if let CertificateChoices::Certificate(cert) = choice {
                    certificates.push(cert.to_der()?);
                    parsed.push(cert.clone());
                }
            }
        }

        let mut signers = signed_data.signer_infos.0.iter();
        let signer = signers
            .next()
            .ok_or_else(|| Error::Encoding("container has no signer info".to_string()))?;
        if signers.next().is_some() {
            log::warn!("container has several signer infos, only the first is checked");
        }

        let signer_index = match &signer.sid {
            SignerIdentifier::IssuerAndSerialNumber(id) => parsed.iter().position(|cert| {
                cert.tbs_certificate.issuer == id.issuer && cert.tbs_certificate.serial_number == id.serial_number
            }),
            SignerIdentifier::SubjectKeyIdentifier(ski) => parsed.iter().position(|cert| {
                subject_key_identifier(cert).as_deref() == Some(ski.0.as_bytes())
            }),
        };

        let digest_algorithm = DigestAlgorithm::from_oid(&signer.digest_alg.oid).ok_or_else(|| {
            Error::Encoding(format!("unsupported digest algorithm {}", signer.digest_alg.oid))
        })?;

        let mut message_digest = None;
        let mut signing_time = None;
        let mut revocation = RevocationArchive::default();
        let mut signed_attributes = None;
        if let Some(attrs) = &signer.signed_attrs {
            signed_attributes = Some(attrs.to_der()?);
            if let Some(value) = first_value(attrs, &oids::MESSAGE_DIGEST) {
                message_digest = Some(value.decode_as::<OctetString>()?.as_bytes().to_vec());
            }
            if let Some(value) = first_value(attrs, &oids::SIGNING_TIME) {
                signing_time = Some(from_asn1_time(&Time::from_der(&value.to_der()?)?)?);
            }
            if let Some(value) = first_value(attrs, &oids::ADBE_REVOCATION_ARCHIVAL) {
                revocation = RevocationArchive::from_attribute_value(value)?;
            }
        }
        let timestamp_token = match &signer.unsigned_attrs {
            Some(attrs) => first_value(attrs, &oids::TIMESTAMP_TOKEN).map(|v| v.to_der()).transpose()?,
            None => None,
        };
        let encapsulated_content = match &signed_data.encap_content_info.econtent {
            Some(any) => Some(any.decode_as::<OctetString>()?.as_bytes().to_vec()),
            None => None,
        };

        Ok(Self {
            certificates,
            signer_index,
            digest_algorithm,
            signature_algorithm: signer.signature_algorithm.oid,
            signature: signer.signature.as_bytes().to_vec(),
            signed_attributes,
            message_digest,
            signing_time,
            revocation,
            timestamp_token,
            content_type: signed_data.encap_content_info.econtent_type,
            encapsulated_content,
            encoded_len,
        })
    }

    /// DER of the signer's certificate, if it was embedded.
    pub fn signer_certificate(&self) -> Option<&[u8]> {
        self.signer_index.map(|i| self.certificates[i].as_slice())
    }

    /// Check that the signer signed `content_digest` and that the signature
    /// verifies with the signer's certificate.
    pub fn verify(&self, content_digest: &[u8]) -> Result<()> {
        let cert_der = self
            .signer_certificate()
            .ok_or_else(|| Error::Crypto("signer certificate is not embedded".to_string()))?;
        let (_, cert) = x509_parser::parse_x509_certificate(cert_der)
            .map_err(|e| Error::Crypto(format!("invalid signer certificate: {}", e)))?;
        let spki = cert.public_key().raw;

        match &self.signed_attributes {
            Some(attrs) => {
                let embedded = self
                    .message_digest
                    .as_deref()
                    .ok_or_else(|| Error::Crypto("signed attributes lack message-digest".to_string()))?;
                if embedded != content_digest {
                    return Err(Error::Crypto("message-digest does not match the signed content".to_string()));
                }
                verify_signature(
                    spki,
                    &self.signature_algorithm,
                    Some(self.digest_algorithm),
                    attrs,
                    &self.signature,
                )
            },
            None => verify_digest(
                spki,
                &self.signature_algorithm,
                Some(self.digest_algorithm),
                content_digest,
                &self.signature,
            ),
        }
    }
}

fn subject_key_identifier(cert: &Certificate) -> Option<Vec<u8>> {
    let der = cert.to_der().ok()?;
    let (_, parsed) = x509_parser::parse_x509_certificate(&der).ok()?;
    parsed.extensions().iter().find_map(|ext| match ext.parsed_extension() {
        x509_parser::extensions::ParsedExtension::SubjectKeyIdentifier(id) => Some(id.0.to_vec()),
        _ => None,
    })
}

/// Upper bound on the DER size of a container for the given inputs.
pub fn estimate_size(
    certificates: &[Vec<u8>],
    revocation: &RevocationArchive,
    algorithm: KeyAlgorithm,
    timestamp_reserve: usize,
    overhead: usize,
) -> usize {
    let certs: usize = certificates.iter().map(Vec::len).sum();
    certs + revocation.encoded_len() + algorithm.max_signature_len() + timestamp_reserve + overhead
}
