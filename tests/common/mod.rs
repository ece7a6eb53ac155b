//! Shared fixtures: generated PDFs, an rcgen PKI, counting CRL and OCSP
//! servers and an in-process timestamp authority.

#![allow(dead_code)]

use chrono::{DateTime, TimeZone, Utc};
use der::asn1::{Int, ObjectIdentifier};
use der::Encode;
use flate2::write::ZlibEncoder;
use flate2::Compression;
use pdf_seal::cancel::CancellationToken;
use pdf_seal::cms::timestamp::{MessageImprint, TimestampAuthority, TstInfo};
use pdf_seal::cms::{generalized_time, ContainerBuilder};
use pdf_seal::crypto::keys::{load_pkcs8_der, SigningKey};
use pdf_seal::crypto::{oids, DigestAlgorithm};
use pdf_seal::net::{Credentials, HttpTransport};
use pdf_seal::revocation::ocsp::issue_response;
use pdf_seal::revocation::RevocationStatus;
use pdf_seal::signatures::{PdfSigner, SigningCredentials};
use pdf_seal::trust::CertificateInfo;
use pdf_seal::{Error, Result, TrustStore};
use rcgen::{
    BasicConstraints, CertificateParams, CertificateRevocationListParams, CrlDistributionPoint, DnType, IsCa,
    KeyIdMethod, KeyPair, RevokedCertParams, SerialNumber,
};
use std::collections::HashMap;
use std::io::Write;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

pub const CRL_URL: &str = "http://crl.test/root.crl";
pub const OCSP_URL: &str = "http://ocsp.test";

/// Route `log` output through the test harness; `RUST_LOG=debug` to see it.
pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Position of the first `needle` in `haystack`.
pub fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}

fn content_stream(target_len: usize) -> Vec<u8> {
    let mut content = b"BT\n/F1 11 Tf\n72 760 Td\n14 TL\n".to_vec();
    let mut line = 1;
    while content.len() < target_len {
        content.extend_from_slice(format!("(Line {:04} of the sample agreement.) '\n", line).as_bytes());
        line += 1;
    }
    content.extend_from_slice(b"ET\n");
    content
}

/// A single-page PDF of at least `target_len` bytes, and less than a line
/// of text more, with a classic xref table.
pub fn single_page_pdf(target_len: usize) -> Vec<u8> {
    let overhead = classic_pdf(&content_stream(0)).len() - content_stream(0).len();
    classic_pdf(&content_stream(target_len.saturating_sub(overhead)))
}

fn classic_pdf(content: &[u8]) -> Vec<u8> {
    let mut pdf = b"%PDF-1.7\n%\xE2\xE3\xCF\xD3\n".to_vec();
    let mut offsets = Vec::new();
    let mut object = |pdf: &mut Vec<u8>, body: &[u8]| {
        offsets.push(pdf.len());
        pdf.extend_from_slice(format!("{} 0 obj\n", offsets.len()).as_bytes());
        pdf.extend_from_slice(body);
        pdf.extend_from_slice(b"\nendobj\n");
    };
    object(&mut pdf, b"<< /Type /Catalog /Pages 2 0 R >>");
    object(&mut pdf, b"<< /Type /Pages /Kids [3 0 R] /Count 1 >>");
    object(
        &mut pdf,
        b"<< /Type /Page /Parent 2 0 R /MediaBox [0 0 612 792] /Contents 4 0 R /Resources << /Font << /F1 5 0 R >> >> >>",
    );
    let mut stream = format!("<< /Length {} >>\nstream\n", content.len()).into_bytes();
    stream.extend_from_slice(content);
    stream.extend_from_slice(b"\nendstream");
    object(&mut pdf, &stream);
    object(&mut pdf, b"<< /Type /Font /Subtype /Type1 /BaseFont /Helvetica >>");

    let xref = pdf.len();
    pdf.extend_from_slice(format!("xref\n0 {}\n0000000000 65535 f \n", offsets.len() + 1).as_bytes());
    for offset in &offsets {
        pdf.extend_from_slice(format!("{:010} 00000 n \n", offset).as_bytes());
    }
    pdf.extend_from_slice(
        format!(
            "trailer\n<< /Size {} /Root 1 0 R /ID [<0123456789ABCDEF0123456789ABCDEF> <0123456789ABCDEF0123456789ABCDEF>] >>\nstartxref\n{}\n%%EOF\n",
            offsets.len() + 1,
            xref
        )
        .as_bytes(),
    );
    pdf
}

/// A single-page PDF whose page tree lives in a compressed object stream,
/// indexed by a cross-reference stream.
pub fn xref_stream_pdf() -> Vec<u8> {
    let mut pdf = b"%PDF-1.5\n%\xE2\xE3\xCF\xD3\n".to_vec();
    let mut offsets = HashMap::new();

    offsets.insert(1u32, pdf.len());
    pdf.extend_from_slice(b"1 0 obj\n<< /Type /Catalog /Pages 2 0 R >>\nendobj\n");

    let content = content_stream(400);
    offsets.insert(4, pdf.len());
    pdf.extend_from_slice(format!("4 0 obj\n<< /Length {} >>\nstream\n", content.len()).as_bytes());
    pdf.extend_from_slice(&content);
    pdf.extend_from_slice(b"\nendstream\nendobj\n");

    let pages = "<< /Type /Pages /Kids [3 0 R] /Count 1 >>";
    let page = "<< /Type /Page /Parent 2 0 R /MediaBox [0 0 612 792] /Contents 4 0 R >>";
    let header = format!("2 0 3 {} ", pages.len() + 1);
    let body = format!("{}{} {}", header, pages, page);
    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(body.as_bytes()).unwrap();
    let packed = encoder.finish().unwrap();
    offsets.insert(5, pdf.len());
    pdf.extend_from_slice(
        format!(
            "5 0 obj\n<< /Type /ObjStm /N 2 /First {} /Filter /FlateDecode /Length {} >>\nstream\n",
            header.len(),
            packed.len()
        )
        .as_bytes(),
    );
    pdf.extend_from_slice(&packed);
    pdf.extend_from_slice(b"\nendstream\nendobj\n");

    let xref = pdf.len();
    offsets.insert(6, xref);
    let mut rows = Vec::new();
    let mut row = |kind: u8, field: u32, index: u16| {
        rows.push(kind);
        rows.extend_from_slice(&field.to_be_bytes());
        rows.extend_from_slice(&index.to_be_bytes());
    };
    row(0, 0, 0xFFFF);
    row(1, offsets[&1] as u32, 0);
    row(2, 5, 0);
    row(2, 5, 1);
    row(1, offsets[&4] as u32, 0);
    row(1, offsets[&5] as u32, 0);
    row(1, offsets[&6] as u32, 0);
    pdf.extend_from_slice(
        format!(
            "6 0 obj\n<< /Type /XRef /Size 7 /W [1 4 2] /Root 1 0 R /Length {} >>\nstream\n",
            rows.len()
        )
        .as_bytes(),
    );
    pdf.extend_from_slice(&rows);
    pdf.extend_from_slice(format!("\nendstream\nendobj\nstartxref\n{}\n%%EOF\n", xref).as_bytes());
    pdf
}

/// A generated certificate and its key.
pub struct Issued {
    pub cert: rcgen::Certificate,
    pub key: KeyPair,
}

impl Issued {
    pub fn der(&self) -> Vec<u8> {
        self.cert.der().to_vec()
    }

    pub fn signing_key(&self) -> Arc<dyn SigningKey> {
        Arc::from(load_pkcs8_der(&self.key.serialize_der()).unwrap())
    }
}

/// Self-signed CA.
pub fn root_ca(name: &str) -> Issued {
    let key = KeyPair::generate().unwrap();
    let mut params = CertificateParams::new(Vec::<String>::new()).unwrap();
    params.distinguished_name.push(DnType::CommonName, name);
    params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
    let cert = params.self_signed(&key).unwrap();
    Issued { cert, key }
}

/// Self-signed end-entity certificate that is its own trust anchor.
pub fn self_signed(name: &str) -> Issued {
    let key = KeyPair::generate().unwrap();
    let mut params = CertificateParams::new(vec!["signer.test".to_string()]).unwrap();
    params.distinguished_name.push(DnType::CommonName, name);
    let cert = params.self_signed(&key).unwrap();
    Issued { cert, key }
}

/// Options for issuing a leaf.
#[derive(Default)]
pub struct LeafSpec {
    pub serial: Option<u64>,
    pub crl_url: Option<&'static str>,
    pub validity: Option<((i32, u8, u8), (i32, u8, u8))>,
}

/// End-entity certificate issued by `issuer`.
pub fn leaf(name: &str, issuer: &Issued, spec: LeafSpec) -> Issued {
    let key = KeyPair::generate().unwrap();
    let mut params = CertificateParams::new(vec!["signer.test".to_string()]).unwrap();
    params.distinguished_name.push(DnType::CommonName, name);
    if let Some(serial) = spec.serial {
        params.serial_number = Some(SerialNumber::from(serial));
    }
    if let Some(url) = spec.crl_url {
        params.crl_distribution_points = vec![CrlDistributionPoint {
            uris: vec![url.to_string()],
        }];
    }
    if let Some(((y1, m1, d1), (y2, m2, d2))) = spec.validity {
        params.not_before = rcgen::date_time_ymd(y1, m1, d1);
        params.not_after = rcgen::date_time_ymd(y2, m2, d2);
    }
    let cert = params.signed_by(&key, &issuer.cert, &issuer.key).unwrap();
    Issued { cert, key }
}

/// CRL from `issuer` listing `revoked` serials, all revoked on 2020-01-01.
pub fn crl(issuer: &Issued, revoked: &[u64]) -> Vec<u8> {
    CertificateRevocationListParams {
        this_update: rcgen::date_time_ymd(2026, 1, 1),
        next_update: rcgen::date_time_ymd(2099, 1, 1),
        crl_number: SerialNumber::from(1u64),
        issuing_distribution_point: None,
        revoked_certs: revoked
            .iter()
            .map(|serial| RevokedCertParams {
                serial_number: SerialNumber::from(*serial),
                revocation_time: rcgen::date_time_ymd(2020, 1, 1),
                reason_code: None,
                invalidity_date: None,
            })
            .collect(),
        key_identifier_method: KeyIdMethod::Sha256,
    }
    .signed_by(&issuer.cert, &issuer.key)
    .unwrap()
    .der()
    .to_vec()
}

/// Signer for `leaf` whose chain ends at `root`.
pub fn signer(leaf: &Issued, root: &Issued) -> PdfSigner {
    let credentials = SigningCredentials::new(leaf.der(), leaf.signing_key()).with_chain(vec![root.der()]);
    PdfSigner::new(credentials).with_trust_roots(trust_store(&[root]))
}

/// Signer whose certificate is self-signed.
pub fn self_signer(issued: &Issued) -> PdfSigner {
    PdfSigner::new(SigningCredentials::new(issued.der(), issued.signing_key()))
}

pub fn trust_store(roots: &[&Issued]) -> TrustStore {
    let ders: Vec<Vec<u8>> = roots.iter().map(|r| r.der()).collect();
    TrustStore::from_der(ders.iter().map(Vec::as_slice)).unwrap()
}

/// Serves CRLs by URL, counts requests and refuses OCSP.
pub struct CrlServer {
    crls: HashMap<String, Vec<u8>>,
    latency: Duration,
    pub gets: AtomicUsize,
    pub posts: AtomicUsize,
}

impl CrlServer {
    pub fn new(url: &str, crl: Vec<u8>) -> Self {
        Self {
            crls: HashMap::from([(url.to_string(), crl)]),
            latency: Duration::from_millis(50),
            gets: AtomicUsize::new(0),
            posts: AtomicUsize::new(0),
        }
    }

    pub fn gets(&self) -> usize {
        self.gets.load(Ordering::SeqCst)
    }

    pub fn posts(&self) -> usize {
        self.posts.load(Ordering::SeqCst)
    }
}

impl HttpTransport for CrlServer {
    fn post(&self, url: &str, _: &str, _: &[u8], _: Option<&Credentials>) -> Result<Vec<u8>> {
        self.posts.fetch_add(1, Ordering::SeqCst);
        Err(Error::Network {
            url: url.to_string(),
            reason: "connection refused".to_string(),
        })
    }

    fn get(&self, url: &str) -> Result<Vec<u8>> {
        self.gets.fetch_add(1, Ordering::SeqCst);
        std::thread::sleep(self.latency);
        self.crls.get(url).cloned().ok_or_else(|| Error::Network {
            url: url.to_string(),
            reason: "404".to_string(),
        })
    }
}

/// OCSP responder answering every request with one response the issuer
/// signed up front. CRL downloads are refused.
pub struct OcspResponder {
    response: Vec<u8>,
    latency: Duration,
    pub posts: AtomicUsize,
}

impl OcspResponder {
    pub fn new(leaf: &Issued, issuer: &Issued, status: RevocationStatus) -> Self {
        let cert = CertificateInfo::parse(&leaf.der()).unwrap();
        let issuer_info = CertificateInfo::parse(&issuer.der()).unwrap();
        let now = Utc::now();
        let response = issue_response(
            &cert,
            &issuer_info,
            issuer.signing_key().as_ref(),
            status,
            now - chrono::Duration::minutes(1),
            Some(now + chrono::Duration::hours(1)),
        )
        .unwrap();
        Self {
            response,
            latency: Duration::from_millis(50),
            posts: AtomicUsize::new(0),
        }
    }

    pub fn posts(&self) -> usize {
        self.posts.load(Ordering::SeqCst)
    }
}

impl HttpTransport for OcspResponder {
    fn post(&self, url: &str, _: &str, _: &[u8], _: Option<&Credentials>) -> Result<Vec<u8>> {
        assert_eq!(url, OCSP_URL);
        self.posts.fetch_add(1, Ordering::SeqCst);
        std::thread::sleep(self.latency);
        Ok(self.response.clone())
    }

    fn get(&self, url: &str) -> Result<Vec<u8>> {
        Err(Error::Network {
            url: url.to_string(),
            reason: "404".to_string(),
        })
    }
}

/// Timestamp authority answering in-process with a fixed time.
pub struct LocalTsa {
    pub identity: Issued,
    pub time: DateTime<Utc>,
    pub calls: AtomicUsize,
    pub fail: bool,
    pub garbled: bool,
}

impl LocalTsa {
    pub fn new() -> Self {
        Self {
            identity: self_signed("Local TSA"),
            time: Utc.with_ymd_and_hms(2026, 5, 4, 3, 2, 1).unwrap(),
            calls: AtomicUsize::new(0),
            fail: false,
            garbled: false,
        }
    }

    pub fn failing() -> Self {
        Self { fail: true, ..Self::new() }
    }

    /// Answers with well-formed DER that is not a timestamp token.
    pub fn garbled() -> Self {
        Self {
            garbled: true,
            ..Self::new()
        }
    }
}

impl TimestampAuthority for LocalTsa {
    fn timestamp(&self, digest: &[u8], algorithm: DigestAlgorithm, cancel: &CancellationToken) -> Result<Vec<u8>> {
        cancel.check()?;
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(Error::Network {
                url: "http://tsa.test".to_string(),
                reason: "503".to_string(),
            });
        }
        if self.garbled {
            return Ok(vec![0x30, 0x03, 0x02, 0x01, 0x01]);
        }
        let info = TstInfo {
            version: 1,
            policy: ObjectIdentifier::new_unwrap("1.2.3.4.1"),
            message_imprint: MessageImprint::new(digest, algorithm)?,
            serial_number: Int::new(&[0x2A])?,
            gen_time: generalized_time(self.time)?,
            accuracy: None,
            ordering: None,
            nonce: None,
            tsa: None,
            extensions: None,
        };
        let content = info.to_der()?;
        let key = self.identity.signing_key();
        ContainerBuilder::new(DigestAlgorithm::Sha256, &self.identity.der())
            .encapsulate(oids::ID_CT_TST_INFO, content.clone())
            .sign(&DigestAlgorithm::Sha256.digest(&content), key.as_ref())?
            .to_der()
    }

    fn estimated_token_size(&self) -> usize {
        2048
    }
}
