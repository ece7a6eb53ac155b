//! Signature dictionary, widget and form updates.
//!
//! The builder appends one incremental update holding the signature
//! dictionary (with a zero-filled `/Contents` placeholder), an invisible
//! widget on the first page, the merged AcroForm and, for certification
//! signatures, the catalog's `/Perms`. The `/ByteRange` is written as a
//! fixed-width placeholder and patched once the update's offsets are known.

use super::byterange::ByteRangeCalculator;
use super::types::{Permission, SignatureField, SignatureSubFilter, SignerMetadata};
use crate::crypto::DigestAlgorithm;
use crate::document::{Document, SignatureFieldEntry};
use crate::error::{Error, Result};
use crate::object::{name, text, Dictionary, Object};
use crate::writer::{AcroFormBuilder, IncrementalUpdate, ObjectSerializer};
use chrono::{DateTime, Utc};
use std::collections::HashSet;

/// Annotation flags of the widget: Print and Locked.
const WIDGET_FLAGS: i64 = 132;

/// Format a time as a PDF date string, `D:YYYYMMDDHHmmSS+00'00'`.
pub fn format_pdf_date(time: DateTime<Utc>) -> String {
    time.format("D:%Y%m%d%H%M%S+00'00'").to_string()
}

/// Parse a PDF date string. The time zone suffix is honored when present.
///
/// Fields after the year are optional but must be two digits each; missing
/// ones default to January 1st, midnight.
pub fn parse_pdf_date(value: &str) -> Option<DateTime<Utc>> {
    let value = value.strip_prefix("D:").unwrap_or(value);
    let digits: &str = &value[..value.find(|c: char| !c.is_ascii_digit()).unwrap_or(value.len())];
    if digits.len() < 4 || digits.len() > 14 || digits.len() % 2 != 0 {
        return None;
    }
    let year: i32 = digits[..4].parse().ok()?;
    let mut fields = [1u32, 1, 0, 0, 0];
    for (i, field) in fields.iter_mut().enumerate() {
        if let Some(two) = digits.get(4 + i * 2..6 + i * 2) {
            *field = two.parse().ok()?;
        }
    }
    let [month, day, hour, minute, second] = fields;
    let naive = chrono::NaiveDate::from_ymd_opt(year, month, day)?.and_hms_opt(hour, minute, second)?;
    let rest = &value[digits.len()..];
    let offset_minutes = match rest.chars().next() {
        Some(sign @ ('+' | '-')) => {
            let tz: String = rest[1..].chars().filter(char::is_ascii_digit).collect();
            let hours: i64 = tz.get(..2).and_then(|h| h.parse().ok()).unwrap_or(0);
            let minutes: i64 = tz.get(2..4).and_then(|m| m.parse().ok()).unwrap_or(0);
            let total = hours * 60 + minutes;
            if sign == '-' {
                -total
            } else {
                total
            }
        },
        _ => 0,
    };
    Some(naive.and_utc() - chrono::Duration::minutes(offset_minutes))
}

/// DocMDP level of a signature dictionary, if it certifies the document.
pub fn certification_level(doc: &Document, signature: &Dictionary) -> Result<Option<Permission>> {
    let references = match signature.get("Reference") {
        Some(r) => doc.resolve(r)?,
        None => return Ok(None),
    };
    for reference in references.as_array().into_iter().flatten() {
        let reference = doc.resolve_dict(reference)?;
        if reference.get("TransformMethod").and_then(Object::as_name) != Some("DocMDP") {
            continue;
        }
        let p = match reference.get("TransformParams") {
            Some(params) => doc.resolve_dict(params)?.get("P").and_then(Object::as_integer),
            None => None,
        };
        return Ok(Some(Permission::from_docmdp_p(p.unwrap_or(2))));
    }
    Ok(None)
}

/// Builder for one signature in an incremental update.
#[derive(Debug, Clone)]
pub struct SignatureDictionaryBuilder {
    metadata: SignerMetadata,
    permission: Permission,
    field_name: Option<String>,
    sub_filter: SignatureSubFilter,
    digest_algorithm: DigestAlgorithm,
    calculator: ByteRangeCalculator,
}

impl SignatureDictionaryBuilder {
    /// Builder reserving room for a container of `capacity` bytes.
    pub fn new(metadata: SignerMetadata, capacity: usize) -> Self {
        Self {
            metadata,
            permission: Permission::NoRestrictions,
            field_name: None,
            sub_filter: SignatureSubFilter::Pkcs7Detached,
            digest_algorithm: DigestAlgorithm::Sha256,
            calculator: ByteRangeCalculator::new(capacity),
        }
    }

    /// DocMDP level.
    pub fn with_permission(mut self, permission: Permission) -> Self {
        self.permission = permission;
        self
    }

    /// Explicit field name instead of `Signature<n>`.
    pub fn with_field_name(mut self, name: Option<String>) -> Self {
        self.field_name = name;
        self
    }

    /// Digest recorded in the returned field.
    pub fn with_digest(mut self, digest: DigestAlgorithm) -> Self {
        self.digest_algorithm = digest;
        self
    }

    /// Body of the signature dictionary, with the offsets of the
    /// `/ByteRange` value and of the `/Contents` placeholder inside it.
    pub fn dictionary_text(&self) -> (String, usize, usize) {
        let serializer = ObjectSerializer::new();
        let string = |value: &str| serializer.serialize_to_string(&text(value));

        let mut dict = String::from("<<\n");
        dict.push_str("/Type /Sig\n");
        dict.push_str("/Filter /Adobe.PPKLite\n");
        dict.push_str(&format!("/SubFilter /{}\n", self.sub_filter.as_pdf_name()));
        dict.push_str("/ByteRange ");
        let byte_range_pos = dict.len();
        dict.push_str(&ByteRangeCalculator::byte_range_placeholder());
        dict.push_str("\n/Contents ");
        let contents_pos = dict.len();
        dict.push_str(&self.calculator.generate_placeholder());
        dict.push('\n');

        dict.push_str(&format!("/M {}\n", string(&format_pdf_date(self.metadata.signing_time))));
        let optional = [
            ("Name", &self.metadata.name),
            ("Reason", &self.metadata.reason),
            ("Location", &self.metadata.location),
            ("ContactInfo", &self.metadata.contact_info),
        ];
        for (key, value) in optional {
            if let Some(value) = value {
                dict.push_str(&format!("/{} {}\n", key, string(value)));
            }
        }

        if let Some(p) = self.permission.docmdp_p() {
            dict.push_str(&format!(
                "/Reference [<< /Type /SigRef /TransformMethod /DocMDP \
                 /TransformParams << /Type /TransformParams /P {} /V /1.2 >> >>]\n",
                p
            ));
        }
        dict.push_str(">>");
        (dict, byte_range_pos, contents_pos)
    }

    fn field_name(&self, existing: &[SignatureFieldEntry]) -> Result<String> {
        let taken: HashSet<&str> = existing.iter().map(|e| e.name.as_str()).collect();
        if let Some(name) = &self.field_name {
            if taken.contains(name.as_str()) {
                return Err(Error::InvalidRequest(format!("field {} already exists", name)));
            }
            return Ok(name.clone());
        }
        let mut n = existing.len() + 1;
        loop {
            let candidate = format!("Signature{}", n);
            if !taken.contains(candidate.as_str()) {
                return Ok(candidate);
            }
            n += 1;
        }
    }

    /// Append the signature objects to `doc` and patch the `/ByteRange`.
    ///
    /// The `/Contents` placeholder is left zero-filled.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidRequest`] for a certification signature on a document
    /// that is already signed, or for a field name that is taken.
    pub fn prepare(&self, doc: &mut Document) -> Result<SignatureField> {
        let existing = doc.signature_fields()?;
        let signed = existing.iter().filter(|e| e.dictionary.is_some()).count();
        if self.permission.is_certification() && signed > 0 {
            return Err(Error::InvalidRequest(format!(
                "a certification signature must be the first signature, found {}",
                signed
            )));
        }
        let field_name = self.field_name(&existing)?;

        let mut update = IncrementalUpdate::new(doc)?;
        let sig_ref = update.allocate()?;
        let widget_ref = update.allocate()?;
        let page_ref = doc.first_page()?;

        let (body, byte_range_pos, contents_pos) = self.dictionary_text();
        update.set_raw(sig_ref, body.into_bytes());

        let mut widget = Dictionary::new();
        widget.insert("Type".to_string(), name("Annot"));
        widget.insert("Subtype".to_string(), name("Widget"));
        widget.insert("FT".to_string(), name("Sig"));
        widget.insert("Rect".to_string(), Object::Array(vec![Object::Integer(0); 4]));
        widget.insert("F".to_string(), Object::Integer(WIDGET_FLAGS));
        widget.insert("T".to_string(), text(&field_name));
        widget.insert("V".to_string(), Object::Reference(sig_ref));
        widget.insert("P".to_string(), Object::Reference(page_ref));
        update.set(widget_ref, &Object::Dictionary(widget));

        let mut page = doc.resolve_dict(&Object::Reference(page_ref))?;
        let mut annots = match page.get("Annots") {
            Some(annots) => doc.resolve(annots)?.as_array().cloned().unwrap_or_default(),
            None => Vec::new(),
        };
        annots.push(Object::Reference(widget_ref));
        page.insert("Annots".to_string(), Object::Array(annots));
        update.set(page_ref, &Object::Dictionary(page));

        let mut catalog = doc.catalog()?;
        let mut catalog_changed = false;
        let (form, form_ref) = match catalog.get("AcroForm") {
            Some(Object::Reference(r)) => (doc.resolve_dict(&Object::Reference(*r))?, Some(*r)),
            Some(form) => (doc.resolve_dict(form)?, None),
            None => (Dictionary::new(), None),
        };
        let existing_fields = match form.get("Fields") {
            Some(fields) => doc.resolve(fields)?.as_array().cloned().unwrap_or_default(),
            None => Vec::new(),
        };
        let mut acroform = AcroFormBuilder::new().signatures_exist().append_only();
        acroform.add_field(widget_ref);
        let form = acroform.merge(form, existing_fields);
        match form_ref {
            Some(r) => update.set(r, &Object::Dictionary(form)),
            None => {
                catalog.insert("AcroForm".to_string(), Object::Dictionary(form));
                catalog_changed = true;
            },
        }

        if self.permission.is_certification() {
            let mut perms = match catalog.get("Perms") {
                Some(perms) => doc.resolve_dict(perms)?,
                None => Dictionary::new(),
            };
            perms.insert("DocMDP".to_string(), Object::Reference(sig_ref));
            catalog.insert("Perms".to_string(), Object::Dictionary(perms));
            catalog_changed = true;
        }
        if catalog_changed {
            update.set(doc.root(), &Object::Dictionary(catalog));
        }

        let written = update.write_to(doc)?;
        let body_offset = written
            .body_offset(sig_ref)
            .ok_or(Error::ObjectNotFound(sig_ref))?;
        let contents_offset = body_offset + contents_pos as u64;
        let byte_range = self.calculator.calculate_byte_range(doc.len(), contents_offset);
        let formatted = ByteRangeCalculator::format_byte_range(&byte_range)?;
        doc.patch(body_offset + byte_range_pos as u64, formatted.as_bytes())?;
        log::debug!(
            "prepared {} ({}) with ByteRange {:?}, {} byte placeholder",
            field_name,
            sig_ref,
            byte_range,
            self.calculator.placeholder_size()
        );

        Ok(SignatureField {
            name: field_name,
            field: widget_ref,
            signature: sig_ref,
            byte_range,
            contents_offset,
            capacity: self.calculator.capacity(),
            permission: self.permission,
            metadata: self.metadata.clone(),
            digest_algorithm: self.digest_algorithm,
        })
    }

    /// The placeholder geometry.
    pub fn calculator(&self) -> ByteRangeCalculator {
        self.calculator
    }
}
