//! Certificate revocation lists.

use super::{EvidenceKind, RevocationEvidence, RevocationStatus};
use crate::error::{Error, Result};
use crate::trust::CertificateInfo;
use chrono::{DateTime, TimeZone, Utc};
use der::asn1::ObjectIdentifier;
use x509_parser::revocation_list::CertificateRevocationList;

fn to_utc(secs: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(secs, 0).single().unwrap_or_default()
}

fn strip_zeros(serial: &[u8]) -> &[u8] {
    let start = serial.iter().position(|&b| b != 0).unwrap_or(serial.len());
    &serial[start..]
}

/// A parsed CRL, checked against its issuer.
#[derive(Debug, Clone)]
pub struct Crl {
    /// DER encoding
    pub der: Vec<u8>,
    /// `thisUpdate`
    pub this_update: DateTime<Utc>,
    /// `nextUpdate`, if present
    pub next_update: Option<DateTime<Utc>>,
    issuer_raw: Vec<u8>,
    revoked: Vec<(Vec<u8>, DateTime<Utc>)>,
    tbs: Vec<u8>,
    signature_algorithm: ObjectIdentifier,
    signature: Vec<u8>,
}

impl Crl {
    /// Parse a DER CRL.
    pub fn parse(der: &[u8]) -> Result<Self> {
        let (_, crl) = x509_parser::parse_x509_crl(der)
            .map_err(|e| Error::Encoding(format!("invalid CRL: {}", e)))?;
        Self::from_parsed(der, &crl)
    }

    fn from_parsed(der: &[u8], crl: &CertificateRevocationList<'_>) -> Result<Self> {
        let algorithm = crl.signature_algorithm.algorithm.to_id_string();
        let signature_algorithm = ObjectIdentifier::new(&algorithm)
            .map_err(|e| Error::Encoding(format!("bad CRL signature algorithm {}: {}", algorithm, e)))?;
        let revoked = crl
            .iter_revoked_certificates()
            .map(|entry| {
                (
                    strip_zeros(entry.raw_serial()).to_vec(),
                    to_utc(entry.revocation_date.timestamp()),
                )
            })
            .collect();
        Ok(Self {
            der: der.to_vec(),
            this_update: to_utc(crl.last_update().timestamp()),
            next_update: crl.next_update().map(|t| to_utc(t.timestamp())),
            issuer_raw: crl.issuer().as_raw().to_vec(),
            revoked,
            tbs: crl.tbs_cert_list.as_ref().to_vec(),
            signature_algorithm,
            signature: crl.signature_value.data.to_vec(),
        })
    }

    /// Whether `issuer` issued and signed this CRL.
    pub fn verify_issuer(&self, issuer: &CertificateInfo) -> Result<()> {
        if self.issuer_raw != issuer.subject_raw {
            return Err(Error::Crypto(format!("CRL was not issued by {}", issuer.subject)));
        }
        issuer
            .verify_message(&self.signature_algorithm, &self.tbs, &self.signature)
            .map_err(|e| Error::Crypto(format!("CRL signature does not verify: {}", e)))
    }

    /// Whether this CRL names `issuer` as its issuer, without checking the
    /// signature.
    pub fn is_from(&self, issuer: &CertificateInfo) -> bool {
        self.issuer_raw == issuer.subject_raw
    }

    /// Revocation status of `cert` at `time`.
    pub fn status_of(&self, cert: &CertificateInfo, time: DateTime<Utc>) -> RevocationStatus {
        let serial = strip_zeros(&cert.serial);
        match self.revoked.iter().find(|(s, _)| s.as_slice() == serial) {
            Some((_, at)) if *at <= time => RevocationStatus::Revoked { at: *at },
            _ => RevocationStatus::Good,
        }
    }

    /// Wrap as cacheable evidence fetched now.
    pub fn into_evidence(self) -> RevocationEvidence {
        RevocationEvidence {
            kind: EvidenceKind::Crl,
            fetched_at: Utc::now(),
            this_update: self.this_update,
            next_update: self.next_update,
            der: self.der,
        }
    }
}
