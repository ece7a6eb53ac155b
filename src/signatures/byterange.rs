//! ByteRange calculation for PDF signatures.
//!
//! PDF digital signatures use a ByteRange array to specify which portions
//! of the document are covered by the signature. The signature itself is
//! stored in a placeholder that is excluded from the signed bytes.
//!
//! ## ByteRange Format
//!
//! The ByteRange is an array of four integers:
//! `[offset1, length1, offset2, length2]`
//!
//! Where:
//! - `offset1` = 0 (start of file)
//! - `length1` = byte offset of the `<` opening the signature value
//! - `offset2` = byte offset just past the closing `>`
//! - `length2` = remaining bytes to end of file
//!
//! The array is first written as a fixed-width placeholder and patched in
//! place once the final offsets are known, so nothing moves.

use crate::crypto::DigestAlgorithm;
use crate::document::Document;
use crate::error::{Error, Result};

/// Digits reserved for each patched ByteRange number.
pub const BYTE_RANGE_DIGITS: usize = 10;

/// Calculator for PDF signature byte ranges.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ByteRangeCalculator {
    /// Size of the placeholder for the signature value (hex digits + 2 for angle brackets)
    placeholder_size: usize,
}

impl ByteRangeCalculator {
    /// Calculator reserving room for a container of `capacity` bytes.
    ///
    /// The placeholder size is `capacity * 2 + 2`: the container is
    /// hex-encoded and enclosed in angle brackets.
    pub fn new(capacity: usize) -> Self {
        Self {
            placeholder_size: capacity * 2 + 2,
        }
    }

    /// Get the placeholder size (for the /Contents value).
    pub fn placeholder_size(&self) -> usize {
        self.placeholder_size
    }

    /// Container bytes the placeholder holds.
    pub fn capacity(&self) -> usize {
        (self.placeholder_size - 2) / 2
    }

    /// `<000...0>` sized to the placeholder.
    pub fn generate_placeholder(&self) -> String {
        format!("<{}>", "0".repeat(self.placeholder_size - 2))
    }

    /// Fixed-width `/ByteRange` value written before the offsets are known.
    pub fn byte_range_placeholder() -> String {
        let stars = "*".repeat(BYTE_RANGE_DIGITS);
        format!("[0 {} {} {}]", stars, stars, stars)
    }

    /// The ByteRange for a placeholder starting at `contents_offset` in a
    /// file of `file_size` bytes.
    pub fn calculate_byte_range(&self, file_size: u64, contents_offset: u64) -> [u64; 4] {
        let after = contents_offset + self.placeholder_size as u64;
        [0, contents_offset, after, file_size.saturating_sub(after)]
    }

    /// Format a ByteRange as a PDF array, space-padded to the width of
    /// [`Self::byte_range_placeholder`].
    pub fn format_byte_range(byte_range: &[u64; 4]) -> Result<String> {
        let width = Self::byte_range_placeholder().len();
        let formatted = format!("[{} {} {} {}]", byte_range[0], byte_range[1], byte_range[2], byte_range[3]);
        if formatted.len() > width {
            return Err(Error::InvalidRequest(format!(
                "byte range {} does not fit the {} byte placeholder",
                formatted, width
            )));
        }
        Ok(format!("{:<width$}", formatted, width = width))
    }

    /// Check a ByteRange read back from a document of `file_size` bytes.
    ///
    /// A valid ByteRange:
    /// - starts at 0
    /// - has the first range end before the second starts
    /// - ends within the file
    ///
    /// A range ending before the file does is valid: later revisions were
    /// appended after signing.
    pub fn validate_byte_range(byte_range: &[i64], file_size: u64) -> Result<[u64; 4]> {
        let invalid = |reason: String| Error::malformed(format!("invalid /ByteRange: {}", reason));
        let [offset1, length1, offset2, length2] = match byte_range {
            [a, b, c, d] => [*a, *b, *c, *d],
            _ => return Err(invalid(format!("{} entries instead of 4", byte_range.len()))),
        };
        if [offset1, length1, offset2, length2].iter().any(|&v| v < 0) {
            return Err(invalid("negative entry".to_string()));
        }
        let range = [offset1 as u64, length1 as u64, offset2 as u64, length2 as u64];
        if range[0] != 0 {
            return Err(invalid(format!("must start at 0, got {}", range[0])));
        }
        if range[1] > range[2] {
            return Err(invalid(format!(
                "first range ({}) overlaps with second range start ({})",
                range[1], range[2]
            )));
        }
        let end = range[2]
            .checked_add(range[3])
            .ok_or_else(|| invalid("end overflows".to_string()))?;
        if end > file_size {
            return Err(invalid(format!("ends at {} beyond file size {}", end, file_size)));
        }
        Ok(range)
    }

    /// The slices of `doc` a ByteRange covers.
    pub fn signed_ranges<'a>(doc: &'a Document, byte_range: &[u64; 4]) -> Result<Vec<&'a [u8]>> {
        let mut parts = doc.range(byte_range[0], byte_range[1])?;
        parts.extend(doc.range(byte_range[2], byte_range[3])?);
        Ok(parts)
    }

    /// Digest of the bytes a ByteRange covers.
    pub fn digest(doc: &Document, byte_range: &[u64; 4], algorithm: DigestAlgorithm) -> Result<Vec<u8>> {
        let mut hasher = algorithm.hasher();
        for part in Self::signed_ranges(doc, byte_range)? {
            hasher.update(part);
        }
        Ok(hasher.finalize().into_vec())
    }

    /// Find the /Contents value position in a signature dictionary.
    ///
    /// This searches for the pattern `/Contents <` and returns the offset
    /// of the opening angle bracket.
    pub fn find_contents_offset(data: &[u8], sig_dict_offset: usize) -> Option<usize> {
        let window = data.get(sig_dict_offset..)?;
        let pattern = b"/Contents";
        let start = window.windows(pattern.len()).position(|w| w == pattern)? + pattern.len();
        let skipped = window[start..]
            .iter()
            .position(|b| !matches!(b, b' ' | b'\t' | b'\n' | b'\r'))?;
        match window.get(start + skipped) {
            Some(b'<') => Some(sig_dict_offset + start + skipped),
            _ => None,
        }
    }

    /// Write `container` as uppercase hex into the placeholder at
    /// `contents_offset`, zero-padded to the full width.
    ///
    /// The whole placeholder is written in one patch; on error nothing is
    /// written.
    pub fn insert_signature(&self, doc: &mut Document, contents_offset: u64, container: &[u8]) -> Result<()> {
        if container.len() > self.capacity() {
            return Err(Error::PlaceholderTooSmall {
                required: container.len(),
                available: self.capacity(),
            });
        }
        let mut value = Vec::with_capacity(self.placeholder_size);
        value.push(b'<');
        value.extend_from_slice(hex::encode_upper(container).as_bytes());
        value.resize(self.placeholder_size - 1, b'0');
        value.push(b'>');
        doc.patch(contents_offset, &value)
    }
}
