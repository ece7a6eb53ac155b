//! Incremental updates.
//!
//! New and replaced objects are appended after the original `%%EOF`,
//! followed by a cross-reference section of the same kind as the previous
//! one and a trailer whose `/Prev` points at the previous section.

use super::object_serializer::{indirect_header, wrap_indirect, ObjectSerializer};
use crate::document::Document;
use crate::error::{Error, Result};
use crate::object::{name, Dictionary, Object, ObjectRef};
use crate::xref::XRefKind;
use flate2::write::ZlibEncoder;
use flate2::Compression;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::io::Write;

/// Objects waiting to be appended to a document.
#[derive(Debug)]
pub struct IncrementalUpdate {
    next_id: u32,
    objects: BTreeMap<ObjectRef, Vec<u8>>,
    serializer: ObjectSerializer,
}

/// Where an applied update put its objects.
#[derive(Debug, Clone)]
pub struct WrittenUpdate {
    /// Offset of each object's `id gen obj` line
    pub offsets: BTreeMap<ObjectRef, u64>,
    /// Offset of the new cross-reference section
    pub xref_offset: u64,
}

impl WrittenUpdate {
    /// Offset of the first byte after an object's `id gen obj` line.
    pub fn body_offset(&self, obj_ref: ObjectRef) -> Option<u64> {
        self.offsets
            .get(&obj_ref)
            .map(|offset| offset + indirect_header(obj_ref).len() as u64)
    }
}

impl IncrementalUpdate {
    /// Start an update on top of `doc`.
    pub fn new(doc: &Document) -> Result<Self> {
        Ok(Self {
            next_id: doc.next_object_number()?,
            objects: BTreeMap::new(),
            serializer: ObjectSerializer::new(),
        })
    }

    /// Reserve a fresh object number.
    pub fn allocate(&mut self) -> Result<ObjectRef> {
        let r = ObjectRef::new(self.next_id, 0);
        self.next_id = self
            .next_id
            .checked_add(1)
            .ok_or_else(|| Error::malformed("object number space exhausted"))?;
        Ok(r)
    }

    /// Add or replace an object.
    pub fn set(&mut self, obj_ref: ObjectRef, obj: &Object) {
        self.objects.insert(obj_ref, self.serializer.serialize(obj));
    }

    /// Add an object whose body was serialized by the caller.
    pub fn set_raw(&mut self, obj_ref: ObjectRef, body: Vec<u8>) {
        self.objects.insert(obj_ref, body);
    }

    /// Number of objects in the update.
    pub fn len(&self) -> usize {
        self.objects.len()
    }

    /// True if nothing has been added.
    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    /// Append the objects, cross-reference section and trailer to `doc`.
    pub fn write_to(mut self, doc: &mut Document) -> Result<WrittenUpdate> {
        if self.objects.is_empty() {
            return Err(Error::InvalidRequest("incremental update without objects".to_string()));
        }
        let kind = doc.xref_kind();
        let xref_stream_ref = match kind {
            XRefKind::Stream => Some(self.allocate()?),
            XRefKind::Table => None,
        };

        if !doc.ends_with_eol() {
            doc.append(b"\n");
        }
        let mut offsets = BTreeMap::new();
        for (obj_ref, body) in &self.objects {
            let offset = doc.append(&wrap_indirect(*obj_ref, body));
            offsets.insert(*obj_ref, offset);
        }

        let trailer = self.trailer(doc);
        let xref_offset = match xref_stream_ref {
            Some(stream_ref) => {
                let offset = doc.len();
                offsets.insert(stream_ref, offset);
                let stream = xref_stream(&offsets, trailer, self.next_id)?;
                doc.append(&self.serializer.serialize_indirect(stream_ref, &stream));
                offset
            },
            None => {
                let offset = doc.append(&xref_table(&offsets));
                doc.append(b"trailer\n");
                doc.append(&self.serializer.serialize(&Object::Dictionary(trailer)));
                doc.append(b"\n");
                offset
            },
        };
        doc.append(format!("startxref\n{}\n%%EOF\n", xref_offset).as_bytes());
        log::debug!(
            "appended {} objects with {:?} cross-reference at {}",
            offsets.len(),
            kind,
            xref_offset
        );
        Ok(WrittenUpdate { offsets, xref_offset })
    }

    fn trailer(&self, doc: &Document) -> Dictionary {
        let previous = doc.trailer();
        let mut trailer = Dictionary::new();
        trailer.insert("Size".to_string(), Object::Integer(self.next_id as i64));
        trailer.insert("Root".to_string(), Object::Reference(doc.root()));
        trailer.insert("Prev".to_string(), Object::Integer(doc.startxref() as i64));
        if let Some(info) = previous.get("Info") {
            trailer.insert("Info".to_string(), info.clone());
        }

        let mut hasher = Sha256::new();
        hasher.update(doc.original_len().to_be_bytes());
        for body in self.objects.values() {
            hasher.update(body);
        }
        let changing = hasher.finalize()[..16].to_vec();
        let permanent = previous
            .get("ID")
            .and_then(Object::as_array)
            .and_then(|id| id.first())
            .and_then(Object::as_string)
            .map(<[u8]>::to_vec)
            .unwrap_or_else(|| changing.clone());
        trailer.insert(
            "ID".to_string(),
            Object::Array(vec![Object::String(permanent), Object::String(changing)]),
        );
        trailer
    }
}

/// Contiguous runs of object numbers.
fn subsections(offsets: &BTreeMap<ObjectRef, u64>) -> Vec<Vec<(ObjectRef, u64)>> {
    let mut runs: Vec<Vec<(ObjectRef, u64)>> = Vec::new();
    for (&r, &offset) in offsets {
        match runs.last_mut() {
            Some(run) if run.last().is_some_and(|(last, _)| last.id + 1 == r.id) => run.push((r, offset)),
            _ => runs.push(vec![(r, offset)]),
        }
    }
    runs
}

fn xref_table(offsets: &BTreeMap<ObjectRef, u64>) -> Vec<u8> {
    let mut out = b"xref\n".to_vec();
    for run in subsections(offsets) {
        out.extend_from_slice(format!("{} {}\n", run[0].0.id, run.len()).as_bytes());
        for (r, offset) in run {
            // Each entry is exactly 20 bytes
            out.extend_from_slice(format!("{:010} {:05} n \n", offset, r.gen).as_bytes());
        }
    }
    out
}

fn xref_stream(offsets: &BTreeMap<ObjectRef, u64>, mut dict: Dictionary, size: u32) -> Result<Object> {
    let max_offset = offsets.values().copied().max().unwrap_or(0);
    let offset_width = (((64 - max_offset.leading_zeros()) as usize).div_ceil(8)).max(1);

    let mut index = Vec::new();
    let mut rows = Vec::new();
    for run in subsections(offsets) {
        index.push(Object::Integer(run[0].0.id as i64));
        index.push(Object::Integer(run.len() as i64));
        for (r, offset) in run {
            rows.push(1u8);
            rows.extend_from_slice(&offset.to_be_bytes()[8 - offset_width..]);
            rows.extend_from_slice(&r.gen.to_be_bytes());
        }
    }
    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(&rows)?;
    let data = encoder.finish()?;

    dict.insert("Type".to_string(), name("XRef"));
    dict.insert("Size".to_string(), Object::Integer(size as i64));
    dict.insert("Index".to_string(), Object::Array(index));
    dict.insert(
        "W".to_string(),
        Object::Array(vec![
            Object::Integer(1),
            Object::Integer(offset_width as i64),
            Object::Integer(2),
        ]),
    );
    dict.insert("Filter".to_string(), name("FlateDecode"));
    Ok(Object::Stream {
        dict,
        data: bytes::Bytes::from(data),
    })
}
