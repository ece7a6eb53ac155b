//! Cross-reference parsing.
//!
//! Maps object numbers to byte offsets (or object-stream slots). Handles
//! classic `xref` tables, cross-reference streams (PDF 1.5+), hybrid files
//! with `/XRefStm`, and the `/Prev` chain left by incremental updates.

use crate::error::{Error, Result};
use crate::lexer::{skip_ws, token, Token};
use crate::object::{Dictionary, Object, ObjectRef};
use crate::parser::{parse_indirect_object, parse_object};
use std::collections::hash_map::Entry;
use std::collections::{HashMap, HashSet};

/// How far from the end of the file `startxref` is searched for.
const STARTXREF_WINDOW: usize = 2048;

/// Location of one object.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum XRefEntry {
    /// Object number is not in use
    Free,
    /// Uncompressed object at a byte offset
    InUse {
        /// Byte offset of `id gen obj`
        offset: u64,
        /// Generation number
        gen: u16,
    },
    /// Object stored inside an object stream
    Compressed {
        /// Object number of the `/ObjStm`
        stream: u32,
        /// Index within the object stream
        index: u32,
    },
}

/// Syntax of a cross-reference section.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum XRefKind {
    /// Classic `xref` table followed by `trailer`
    Table,
    /// `/Type /XRef` stream
    Stream,
}

/// One parsed section (one revision's worth of entries).
#[derive(Debug, Clone)]
struct XRefSection {
    kind: XRefKind,
    entries: Vec<(u32, XRefEntry)>,
    trailer: Dictionary,
}

/// Merged view over every section reachable from `startxref`.
#[derive(Debug, Clone)]
pub struct CrossRefTable {
    entries: HashMap<u32, XRefEntry>,
    trailer: Dictionary,
    newest_kind: XRefKind,
    startxref: u64,
    section_offsets: Vec<u64>,
}

impl CrossRefTable {
    /// Look up an object number.
    pub fn get(&self, id: u32) -> Option<XRefEntry> {
        self.entries.get(&id).copied()
    }

    /// Merged trailer; newer revisions win key by key.
    pub fn trailer(&self) -> &Dictionary {
        &self.trailer
    }

    /// Syntax used by the newest section; incremental updates reuse it.
    pub fn newest_kind(&self) -> XRefKind {
        self.newest_kind
    }

    /// Offset of the newest section, i.e. the value after `startxref`.
    pub fn startxref(&self) -> u64 {
        self.startxref
    }

    /// Offsets of every section, newest first.
    pub fn section_offsets(&self) -> &[u64] {
        &self.section_offsets
    }

    /// Largest object number known to any section.
    pub fn max_object_number(&self) -> u32 {
        self.entries.keys().copied().max().unwrap_or(0)
    }

    /// Object numbers of all in-use entries.
    pub fn in_use(&self) -> impl Iterator<Item = ObjectRef> + '_ {
        self.entries.iter().filter_map(|(&id, entry)| match entry {
            XRefEntry::InUse { gen, .. } => Some(ObjectRef::new(id, *gen)),
            XRefEntry::Compressed { .. } => Some(ObjectRef::new(id, 0)),
            XRefEntry::Free => None,
        })
    }
}

/// Find the offset recorded after the last `startxref` keyword.
pub fn find_startxref(data: &[u8]) -> Result<u64> {
    let window_start = data.len().saturating_sub(STARTXREF_WINDOW);
    let window = &data[window_start..];
    let pos = window
        .windows(b"startxref".len())
        .rposition(|w| w == b"startxref")
        .ok_or_else(|| Error::malformed("startxref not found near end of file"))?;
    let after = &window[pos + b"startxref".len()..];
    match token(after) {
        Ok((_, Token::Integer(offset))) if offset >= 0 => Ok(offset as u64),
        _ => Err(Error::malformed_at(
            (window_start + pos) as u64,
            "startxref is not followed by an offset",
        )),
    }
}

/// Load and merge every cross-reference section reachable from `startxref`.
pub fn load(data: &[u8], startxref: u64) -> Result<CrossRefTable> {
    let mut entries = HashMap::new();
    let mut trailer = Dictionary::new();
    let mut visited = HashSet::new();
    let mut section_offsets = Vec::new();
    let mut newest_kind = None;
    let mut next = Some(startxref);

    while let Some(offset) = next.take() {
        if !visited.insert(offset) {
            return Err(Error::malformed_at(offset, "cyclic /Prev chain in cross-reference"));
        }
        let section = parse_section(data, offset)?;
        log::debug!(
            "xref section at {}: {:?} with {} entries",
            offset,
            section.kind,
            section.entries.len()
        );
        newest_kind.get_or_insert(section.kind);
        section_offsets.push(offset);

        // Ids this table lists as free; a hybrid stream may fill them in
        let mut own_free = HashSet::new();
        for (id, entry) in section.entries {
            if let Entry::Vacant(slot) = entries.entry(id) {
                if entry == XRefEntry::Free {
                    own_free.insert(id);
                }
                slot.insert(entry);
            }
        }

        // Hybrid file: the referenced stream supplements this table only
        if let Some(stm) = section.trailer.get("XRefStm").and_then(Object::as_integer) {
            if visited.insert(stm as u64) {
                match parse_section(data, stm as u64) {
                    Ok(hybrid) => {
                        for (id, entry) in hybrid.entries {
                            match entries.entry(id) {
                                Entry::Vacant(slot) => {
                                    slot.insert(entry);
                                },
                                Entry::Occupied(mut slot) if own_free.contains(&id) => {
                                    slot.insert(entry);
                                },
                                Entry::Occupied(_) => {},
                            }
                        }
                    },
                    Err(e) => log::warn!("ignoring unreadable /XRefStm at {}: {}", stm, e),
                }
            }
        }
        next = section
            .trailer
            .get("Prev")
            .and_then(Object::as_integer)
            .map(|prev| prev as u64);
        for (key, value) in section.trailer {
            trailer.entry(key).or_insert(value);
        }
    }

    Ok(CrossRefTable {
        entries,
        trailer,
        newest_kind: newest_kind.unwrap_or(XRefKind::Table),
        startxref,
        section_offsets,
    })
}

fn parse_section(data: &[u8], offset: u64) -> Result<XRefSection> {
    let start = usize::try_from(offset)
        .ok()
        .filter(|&o| o < data.len())
        .ok_or_else(|| Error::malformed_at(offset, "cross-reference offset beyond end of file"))?;
    let input = skip_ws(&data[start..]);
    if input.starts_with(b"xref") {
        parse_table(data, offset, &input[4..])
    } else {
        parse_stream(offset, input)
    }
}

/// Next whitespace-delimited word.
fn next_word(input: &[u8]) -> (&[u8], &[u8]) {
    let input = skip_ws(input);
    let end = input
        .iter()
        .position(|&c| crate::lexer::is_whitespace(c))
        .unwrap_or(input.len());
    (&input[..end], &input[end..])
}

fn parse_number<T: std::str::FromStr>(word: &[u8], offset: u64, what: &str) -> Result<T> {
    std::str::from_utf8(word)
        .ok()
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| {
            Error::malformed_at(
                offset,
                format!("invalid {} {:?} in xref table", what, String::from_utf8_lossy(word)),
            )
        })
}

fn parse_table(data: &[u8], offset: u64, body: &[u8]) -> Result<XRefSection> {
    let mut entries = Vec::new();
    let mut rest = body;
    loop {
        let trimmed = skip_ws(rest);
        if trimmed.starts_with(b"trailer") {
            rest = &trimmed[b"trailer".len()..];
            break;
        }
        if trimmed.is_empty() {
            return Err(Error::malformed_at(offset, "xref table without trailer"));
        }
        let (first, r) = next_word(trimmed);
        let (count, r) = next_word(r);
        let first: u32 = parse_number(first, offset, "subsection start")?;
        let count: u32 = parse_number(count, offset, "subsection count")?;
        if count as usize > data.len() / 18 + 1 {
            return Err(Error::malformed_at(offset, "xref subsection larger than file"));
        }
        rest = r;
        for i in 0..count {
            let (field1, r) = next_word(rest);
            let (field2, r) = next_word(r);
            let (kind, r) = next_word(r);
            rest = r;
            let entry_offset: u64 = parse_number(field1, offset, "entry offset")?;
            let gen: u16 = parse_number(field2, offset, "generation")?;
            let entry = match kind {
                b"n" => XRefEntry::InUse {
                    offset: entry_offset,
                    gen,
                },
                b"f" => XRefEntry::Free,
                other => {
                    return Err(Error::malformed_at(
                        offset,
                        format!("xref entry type {:?}", String::from_utf8_lossy(other)),
                    ))
                },
            };
            let id = first.checked_add(i).ok_or_else(|| {
                Error::malformed_at(offset, format!("xref subsection {} {} overflows object numbers", first, count))
            })?;
            entries.push((id, entry));
        }
    }

    let trailer = match parse_object(rest) {
        Ok((_, Object::Dictionary(dict))) => dict,
        _ => return Err(Error::malformed_at(offset, "trailer is not a dictionary")),
    };
    Ok(XRefSection {
        kind: XRefKind::Table,
        entries,
        trailer,
    })
}

fn parse_stream(offset: u64, input: &[u8]) -> Result<XRefSection> {
    let stream = match parse_indirect_object(input) {
        Ok((_, (_, stream @ Object::Stream { .. }))) => stream,
        _ => return Err(Error::malformed_at(offset, "expected xref table or xref stream")),
    };
    let dict = stream.as_dict().cloned().unwrap_or_default();
    if dict.get("Type").and_then(Object::as_name) != Some("XRef") {
        return Err(Error::malformed_at(offset, "stream at startxref is not /Type /XRef"));
    }

    let widths: Vec<usize> = dict
        .get("W")
        .and_then(Object::as_array)
        .map(|w| w.iter().filter_map(Object::as_integer).map(|v| v.max(0) as usize).collect())
        .unwrap_or_default();
    if widths.len() != 3 || widths.iter().any(|&w| w > 8) {
        return Err(Error::malformed_at(offset, "invalid /W in xref stream"));
    }
    let size = dict
        .get("Size")
        .and_then(Object::as_integer)
        .ok_or_else(|| Error::malformed_at(offset, "xref stream without /Size"))?;
    let ranges: Vec<(u32, u32)> = match dict.get("Index").and_then(Object::as_array) {
        Some(index) => index
            .chunks(2)
            .filter_map(|pair| match pair {
                [start, count] => Some((start.as_integer()? as u32, count.as_integer()? as u32)),
                _ => None,
            })
            .collect(),
        None => vec![(0, size as u32)],
    };

    let decoded = stream.decode_stream_data()?;
    let row = widths.iter().sum::<usize>();
    let mut rows = decoded.chunks_exact(row.max(1));
    let mut entries = Vec::new();
    for (start, count) in ranges {
        for id in start..start.saturating_add(count) {
            let Some(row) = rows.next() else {
                return Err(Error::malformed_at(offset, "xref stream data shorter than /Index"));
            };
            let (f1, rest) = row.split_at(widths[0]);
            let (f2, f3) = rest.split_at(widths[1]);
            // A zero-width type field defaults to type 1
            let kind = if widths[0] == 0 { 1 } else { read_be(f1) };
            let entry = match kind {
                0 => XRefEntry::Free,
                1 => XRefEntry::InUse {
                    offset: read_be(f2),
                    gen: read_be(f3) as u16,
                },
                2 => XRefEntry::Compressed {
                    stream: read_be(f2) as u32,
                    index: read_be(f3) as u32,
                },
                other => {
                    log::warn!("xref stream entry {} has unknown type {}, treating as free", id, other);
                    XRefEntry::Free
                },
            };
            entries.push((id, entry));
        }
    }

    Ok(XRefSection {
        kind: XRefKind::Stream,
        entries,
        trailer: dict,
    })
}

fn read_be(bytes: &[u8]) -> u64 {
    bytes.iter().fold(0u64, |acc, &b| (acc << 8) | b as u64)
}
