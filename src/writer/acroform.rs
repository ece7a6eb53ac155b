//! AcroForm updates for signature fields.
//!
//! The document-level AcroForm dictionary lives in the catalog and lists
//! every form field. Signing adds one field and sets `/SigFlags`; every
//! other entry of an existing form is carried over unchanged.

use crate::object::{Dictionary, Object, ObjectRef};

/// SignaturesExist
pub const SIG_FLAG_SIGNATURES_EXIST: i64 = 1;
/// AppendOnly
pub const SIG_FLAG_APPEND_ONLY: i64 = 2;

/// Builder for the document-level AcroForm dictionary.
#[derive(Debug, Clone, Default)]
pub struct AcroFormBuilder {
    fields: Vec<ObjectRef>,
    sig_flags: i64,
}

impl AcroFormBuilder {
    /// Create a new AcroForm builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a field reference.
    pub fn add_field(&mut self, field_ref: ObjectRef) {
        self.fields.push(field_ref);
    }

    /// Mark document as containing signatures.
    pub fn signatures_exist(mut self) -> Self {
        self.sig_flags |= SIG_FLAG_SIGNATURES_EXIST;
        self
    }

    /// Mark document as append-only (for signed documents).
    pub fn append_only(mut self) -> Self {
        self.sig_flags |= SIG_FLAG_APPEND_ONLY;
        self
    }

    /// Check if this form has any fields.
    pub fn has_fields(&self) -> bool {
        !self.fields.is_empty()
    }

    /// Get the number of fields.
    pub fn field_count(&self) -> usize {
        self.fields.len()
    }

    /// Merge into an existing form dictionary.
    ///
    /// `existing_fields` is the resolved `/Fields` array of `form`; the
    /// merged dictionary carries it inline with the new fields appended.
    /// Flags are OR-ed into any existing `/SigFlags`.
    pub fn merge(&self, mut form: Dictionary, existing_fields: Vec<Object>) -> Dictionary {
        let mut fields = existing_fields;
        for field in &self.fields {
            let entry = Object::Reference(*field);
            if !fields.contains(&entry) {
                fields.push(entry);
            }
        }
        form.insert("Fields".to_string(), Object::Array(fields));

        let flags = form.get("SigFlags").and_then(Object::as_integer).unwrap_or(0) | self.sig_flags;
        if flags != 0 {
            form.insert("SigFlags".to_string(), Object::Integer(flags));
        }
        form
    }

    /// Build a fresh AcroForm dictionary.
    pub fn build(&self) -> Dictionary {
        self.merge(Dictionary::new(), Vec::new())
    }
}
