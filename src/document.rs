//! PDF document model.
//!
//! A [`Document`] is an immutable view over the original bytes plus an
//! append-only overlay. Objects are located through the cross-reference
//! structure; new objects are appended as an incremental update and nothing
//! in the original bytes is ever rewritten.

use crate::error::{Error, Result};
use crate::object::{Dictionary, Object, ObjectRef};
use crate::objstm::ObjectStream;
use crate::parser::{find_keyword, parse_indirect_object};
use crate::xref::{self, CrossRefTable, XRefEntry, XRefKind};
use bytes::Bytes;
use std::cell::RefCell;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

/// Maximum number of references followed by [`Document::resolve`].
const MAX_RESOLVE_DEPTH: usize = 32;

/// Maximum depth of page and field trees.
const MAX_TREE_DEPTH: usize = 64;

/// How far into the file the `%PDF-` header may start.
const HEADER_WINDOW: usize = 1024;

/// A signature field found in the document's form tree.
#[derive(Debug, Clone)]
pub struct SignatureFieldEntry {
    /// Fully qualified field name (`/T` of every ancestor joined with `.`)
    pub name: String,
    /// The field (widget) object, when the field is an indirect object
    pub field: Option<ObjectRef>,
    /// The signature dictionary referenced by `/V`, when indirect
    pub signature: Option<ObjectRef>,
    /// The resolved signature dictionary; `None` for unsigned fields
    pub dictionary: Option<Dictionary>,
}

/// An open PDF document.
///
/// ```
/// use pdf_seal::document::Document;
///
/// let pdf = b"%PDF-1.4\n1 0 obj\n<< /Type /Catalog /Pages 2 0 R >>\nendobj\n\
/// 2 0 obj\n<< /Type /Pages /Kids [] /Count 0 >>\nendobj\n\
/// xref\n0 3\n0000000000 65535 f \n0000000009 00000 n \n0000000058 00000 n \n\
/// trailer\n<< /Size 3 /Root 1 0 R >>\nstartxref\n110\n%%EOF\n";
/// let doc = Document::open(pdf.to_vec())?;
/// assert_eq!(doc.version(), (1, 4));
/// assert_eq!(doc.next_object_number()?, 3);
/// # Ok::<(), pdf_seal::Error>(())
/// ```
pub struct Document {
    original: Bytes,
    overlay: Vec<u8>,
    version: (u8, u8),
    xref: CrossRefTable,
    root: ObjectRef,
    object_streams: RefCell<HashMap<u32, Arc<ObjectStream>>>,
}

impl std::fmt::Debug for Document {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Document")
            .field("version", &self.version)
            .field("original_len", &self.original.len())
            .field("overlay_len", &self.overlay.len())
            .field("root", &self.root)
            .finish_non_exhaustive()
    }
}

impl Clone for Document {
    fn clone(&self) -> Self {
        Self {
            original: self.original.clone(),
            overlay: self.overlay.clone(),
            version: self.version,
            xref: self.xref.clone(),
            root: self.root,
            object_streams: RefCell::new(HashMap::new()),
        }
    }
}

impl Document {
    /// Open a document from its bytes.
    ///
    /// # Errors
    ///
    /// [`Error::MalformedDocument`] if the header, cross-reference chain,
    /// trailer or root object is missing or inconsistent, or if the file is
    /// encrypted.
    pub fn open(data: impl Into<Bytes>) -> Result<Self> {
        let original: Bytes = data.into();
        let version = parse_header(&original)?;
        let startxref = xref::find_startxref(&original)?;
        let xref = xref::load(&original, startxref)?;

        let trailer = xref.trailer();
        if trailer.contains_key("Encrypt") {
            return Err(Error::malformed("encrypted documents are not supported"));
        }
        let root = trailer
            .get("Root")
            .and_then(Object::as_reference)
            .ok_or_else(|| Error::malformed("trailer has no /Root reference"))?;

        let doc = Self {
            original,
            overlay: Vec::new(),
            version,
            xref,
            root,
            object_streams: RefCell::new(HashMap::new()),
        };
        match doc.object_at(root) {
            Ok(Object::Dictionary(_)) => {},
            Ok(other) => {
                return Err(Error::malformed(format!("/Root {} is a {}", root, other.type_name())))
            },
            Err(Error::ObjectNotFound(_)) => {
                return Err(Error::malformed(format!("/Root {} is not in the cross-reference", root)))
            },
            Err(e) => return Err(e),
        }
        log::debug!(
            "opened PDF {}.{}: {} bytes, root {}, newest xref {:?}",
            version.0,
            version.1,
            doc.original.len(),
            root,
            doc.xref.newest_kind()
        );
        Ok(doc)
    }

    /// PDF version from the header.
    pub fn version(&self) -> (u8, u8) {
        self.version
    }

    /// Total length: original bytes plus the overlay.
    pub fn len(&self) -> u64 {
        (self.original.len() + self.overlay.len()) as u64
    }

    /// True when the document has no bytes at all.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Length of the original, immutable bytes.
    pub fn original_len(&self) -> u64 {
        self.original.len() as u64
    }

    /// The original bytes.
    pub fn original(&self) -> &Bytes {
        &self.original
    }

    /// Merged trailer dictionary of the original file.
    pub fn trailer(&self) -> &Dictionary {
        self.xref.trailer()
    }

    /// Reference of the document catalog.
    pub fn root(&self) -> ObjectRef {
        self.root
    }

    /// Offset of the newest cross-reference section.
    pub fn startxref(&self) -> u64 {
        self.xref.startxref()
    }

    /// Cross-reference syntax used by the newest revision.
    pub fn xref_kind(&self) -> XRefKind {
        self.xref.newest_kind()
    }

    /// First object number free for new objects.
    ///
    /// Fails with [`Error::MalformedDocument`] when `/Size` or the highest
    /// object number leaves no room for another object.
    pub fn next_object_number(&self) -> Result<u32> {
        let size = match self.trailer().get("Size").and_then(Object::as_integer) {
            Some(size) => u32::try_from(size.max(0))
                .map_err(|_| Error::malformed(format!("trailer /Size {} out of range", size)))?,
            None => 0,
        };
        let past_max = self
            .xref
            .max_object_number()
            .checked_add(1)
            .ok_or_else(|| Error::malformed("object number space exhausted"))?;
        Ok(size.max(past_max))
    }

    /// Load an object from the original bytes.
    pub fn object_at(&self, obj_ref: ObjectRef) -> Result<Object> {
        match self.xref.get(obj_ref.id) {
            Some(XRefEntry::InUse { offset, gen }) => {
                if gen != obj_ref.gen {
                    log::debug!("{} requested but xref has generation {}", obj_ref, gen);
                    return Err(Error::ObjectNotFound(obj_ref));
                }
                self.load_uncompressed(obj_ref, offset)
            },
            Some(XRefEntry::Compressed { stream, index }) => {
                self.load_compressed(obj_ref, stream, index as usize)
            },
            Some(XRefEntry::Free) | None => Err(Error::ObjectNotFound(obj_ref)),
        }
    }

    /// Byte offset of an uncompressed object, if it has one.
    pub fn object_offset(&self, obj_ref: ObjectRef) -> Option<u64> {
        match self.xref.get(obj_ref.id) {
            Some(XRefEntry::InUse { offset, .. }) => Some(offset),
            _ => None,
        }
    }

    fn load_uncompressed(&self, obj_ref: ObjectRef, offset: u64) -> Result<Object> {
        let start = usize::try_from(offset)
            .ok()
            .filter(|&o| o < self.original.len())
            .ok_or_else(|| Error::malformed_at(offset, format!("{} points past end of file", obj_ref)))?;
        let (_, (found, object)) = parse_indirect_object(&self.original[start..])
            .map_err(|_| Error::malformed_at(offset, format!("no object header for {}", obj_ref)))?;
        if found != obj_ref {
            return Err(Error::malformed_at(
                offset,
                format!("xref entry for {} points at {}", obj_ref, found),
            ));
        }
        Ok(object)
    }

    fn load_compressed(&self, obj_ref: ObjectRef, stream_id: u32, index: usize) -> Result<Object> {
        let cached = self.object_streams.borrow().get(&stream_id).cloned();
        let objstm = match cached {
            Some(objstm) => objstm,
            None => {
                let offset = match self.xref.get(stream_id) {
                    Some(XRefEntry::InUse { offset, .. }) => offset,
                    _ => {
                        return Err(Error::malformed(format!(
                            "object stream {} holding {} is not an uncompressed object",
                            stream_id, obj_ref
                        )))
                    },
                };
                let stream = self.load_uncompressed(ObjectRef::new(stream_id, 0), offset)?;
                let parsed = Arc::new(ObjectStream::parse(&stream)?);
                self.object_streams.borrow_mut().insert(stream_id, Arc::clone(&parsed));
                parsed
            },
        };
        objstm.get(index, obj_ref.id)
    }

    /// Follow references until a direct object is reached.
    pub fn resolve(&self, obj: &Object) -> Result<Object> {
        let mut current = obj.clone();
        for _ in 0..MAX_RESOLVE_DEPTH {
            match current {
                Object::Reference(r) => current = self.object_at(r)?,
                other => return Ok(other),
            }
        }
        Err(Error::malformed("reference chain too deep"))
    }

    /// Resolve `obj` and require a dictionary (streams yield their dictionary).
    pub fn resolve_dict(&self, obj: &Object) -> Result<Dictionary> {
        match self.resolve(obj)? {
            Object::Dictionary(dict) => Ok(dict),
            Object::Stream { dict, .. } => Ok(dict),
            other => Err(Error::malformed(format!("expected dictionary, found {}", other.type_name()))),
        }
    }

    /// The document catalog.
    pub fn catalog(&self) -> Result<Dictionary> {
        self.resolve_dict(&Object::Reference(self.root))
    }

    /// Reference to the first leaf of the page tree.
    pub fn first_page(&self) -> Result<ObjectRef> {
        let catalog = self.catalog()?;
        let mut node = catalog
            .get("Pages")
            .and_then(Object::as_reference)
            .ok_or_else(|| Error::malformed("catalog has no /Pages reference"))?;
        for _ in 0..MAX_TREE_DEPTH {
            let dict = self.resolve_dict(&Object::Reference(node))?;
            match dict.get("Type").and_then(Object::as_name) {
                Some("Page") => return Ok(node),
                _ => {
                    let kids = dict.get("Kids").map(|k| self.resolve(k)).transpose()?;
                    node = kids
                        .as_ref()
                        .and_then(Object::as_array)
                        .and_then(|kids| kids.first())
                        .and_then(Object::as_reference)
                        .ok_or_else(|| Error::malformed(format!("page tree node {} has no kids", node)))?;
                },
            }
        }
        Err(Error::malformed("page tree too deep"))
    }

    /// End offsets of every revision, i.e. just past each `%%EOF` marker.
    ///
    /// The last entry equals the document length for a well-formed file.
    pub fn revisions(&self) -> Vec<u64> {
        revision_ends(&self.original)
    }

    /// Signature fields reachable from `/AcroForm /Fields`.
    ///
    /// Documents without a form tree are scanned for signature dictionaries
    /// instead, so signatures in broken forms are still found.
    pub fn signature_fields(&self) -> Result<Vec<SignatureFieldEntry>> {
        let catalog = self.catalog()?;
        let fields = match catalog.get("AcroForm") {
            Some(form) => {
                let form = self.resolve_dict(form)?;
                match form.get("Fields") {
                    Some(fields) => self.resolve(fields)?.as_array().cloned().unwrap_or_default(),
                    None => Vec::new(),
                }
            },
            None => Vec::new(),
        };

        let mut found = Vec::new();
        let mut visited = HashSet::new();
        for field in &fields {
            self.collect_fields(field, None, None, 0, &mut visited, &mut found)?;
        }
        if found.is_empty() {
            found = self.scan_signature_dictionaries();
        }
        Ok(found)
    }

    fn collect_fields(
        &self,
        node: &Object,
        parent_name: Option<&str>,
        inherited_ft: Option<&str>,
        depth: usize,
        visited: &mut HashSet<ObjectRef>,
        out: &mut Vec<SignatureFieldEntry>,
    ) -> Result<()> {
        if depth > MAX_TREE_DEPTH {
            return Err(Error::malformed("form field tree too deep"));
        }
        let field_ref = node.as_reference();
        if let Some(r) = field_ref {
            if !visited.insert(r) {
                log::warn!("form field {} visited twice, skipping", r);
                return Ok(());
            }
        }
        let dict = self.resolve_dict(node)?;
        let partial = dict.get("T").and_then(Object::as_text);
        let name = match (parent_name, partial.as_deref()) {
            (Some(parent), Some(t)) => format!("{}.{}", parent, t),
            (None, Some(t)) => t.to_string(),
            (Some(parent), None) => parent.to_string(),
            (None, None) => String::new(),
        };
        let ft = dict.get("FT").and_then(Object::as_name).or(inherited_ft);

        if let Some(kids) = dict.get("Kids") {
            let kids = self.resolve(kids)?;
            // Widget-only kids carry no /T; the field itself is the leaf
            let has_field_kids = kids.as_array().is_some_and(|kids| {
                kids.iter()
                    .filter_map(|k| self.resolve_dict(k).ok())
                    .any(|k| k.contains_key("T"))
            });
            if has_field_kids {
                for kid in kids.as_array().into_iter().flatten() {
                    self.collect_fields(kid, Some(&name), ft, depth + 1, visited, out)?;
                }
                return Ok(());
            }
        }

        if ft == Some("Sig") {
            let signature = dict.get("V").and_then(Object::as_reference);
            let dictionary = match dict.get("V") {
                Some(v) => Some(self.resolve_dict(v)?),
                None => None,
            };
            out.push(SignatureFieldEntry {
                name,
                field: field_ref,
                signature,
                dictionary,
            });
        }
        Ok(())
    }

    fn scan_signature_dictionaries(&self) -> Vec<SignatureFieldEntry> {
        let mut refs: Vec<ObjectRef> = self.xref.in_use().collect();
        refs.sort();
        refs.into_iter()
            .filter_map(|r| match self.object_at(r) {
                Ok(Object::Dictionary(dict))
                    if dict.contains_key("ByteRange") && dict.contains_key("Contents") =>
                {
                    Some(SignatureFieldEntry {
                        name: format!("Signature{}", r.id),
                        field: None,
                        signature: Some(r),
                        dictionary: Some(dict),
                    })
                },
                _ => None,
            })
            .collect()
    }

    /// Append bytes to the overlay, returning the offset they start at.
    pub fn append(&mut self, bytes: &[u8]) -> u64 {
        let offset = self.len();
        self.overlay.extend_from_slice(bytes);
        offset
    }

    /// Overwrite bytes previously appended to the overlay.
    ///
    /// The original bytes are immutable; patching them is an
    /// [`Error::InvalidRequest`].
    pub fn patch(&mut self, offset: u64, bytes: &[u8]) -> Result<()> {
        let base = self.original_len();
        let end = offset.checked_add(bytes.len() as u64);
        if offset < base || end.map_or(true, |end| end > self.len()) {
            return Err(Error::InvalidRequest(format!(
                "patch of {} bytes at {} is outside the appended region {}..{}",
                bytes.len(),
                offset,
                base,
                self.len()
            )));
        }
        let start = (offset - base) as usize;
        self.overlay[start..start + bytes.len()].copy_from_slice(bytes);
        Ok(())
    }

    /// Slices covering `len` bytes starting at `offset`, across the
    /// original/overlay boundary.
    pub fn range(&self, offset: u64, len: u64) -> Result<Vec<&[u8]>> {
        let end = offset
            .checked_add(len)
            .filter(|&end| end <= self.len())
            .ok_or_else(|| {
                Error::InvalidRequest(format!(
                    "range {}+{} exceeds document length {}",
                    offset,
                    len,
                    self.len()
                ))
            })?;
        let base = self.original_len();
        let mut parts = Vec::with_capacity(2);
        if offset < base {
            parts.push(&self.original[offset as usize..end.min(base) as usize]);
        }
        if end > base {
            let from = offset.max(base) - base;
            parts.push(&self.overlay[from as usize..(end - base) as usize]);
        }
        Ok(parts)
    }

    /// True if the last byte written so far is an end-of-line marker.
    pub fn ends_with_eol(&self) -> bool {
        let last = self.overlay.last().or(self.original.last());
        matches!(last, Some(b'\n') | Some(b'\r'))
    }

    /// Consume the document, returning original plus overlay bytes.
    pub fn into_bytes(self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.original.len() + self.overlay.len());
        out.extend_from_slice(&self.original);
        out.extend_from_slice(&self.overlay);
        out
    }
}

fn parse_header(data: &[u8]) -> Result<(u8, u8)> {
    let window = &data[..data.len().min(HEADER_WINDOW)];
    let pos = find_keyword(window, b"%PDF-").ok_or_else(|| Error::malformed_at(0, "missing %PDF- header"))?;
    match &data[pos + 5..] {
        [major, b'.', minor, ..] if major.is_ascii_digit() && minor.is_ascii_digit() => {
            Ok((major - b'0', minor - b'0'))
        },
        _ => Err(Error::malformed_at(pos as u64, "invalid version in %PDF- header")),
    }
}

/// Offsets just past every `%%EOF` marker, including its end-of-line.
pub fn revision_ends(data: &[u8]) -> Vec<u64> {
    let mut ends = Vec::new();
    let mut pos = 0;
    while let Some(found) = find_keyword(&data[pos..], b"%%EOF") {
        let mut end = pos + found + b"%%EOF".len();
        if data.get(end) == Some(&b'\r') {
            end += 1;
        }
        if data.get(end) == Some(&b'\n') {
            end += 1;
        }
        ends.push(end as u64);
        pos = end;
    }
    ends
}
