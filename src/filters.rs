//! Stream filters needed to read document structure.
//!
//! Cross-reference streams and object streams are FlateDecode-compressed,
//! usually with a PNG predictor. Content streams are never decoded here, so
//! the image and text filters are not supported.

use crate::error::{Error, Result};
use crate::object::{Dictionary, Object};
use flate2::read::ZlibDecoder;
use std::io::Read;

/// Upper bound on a decoded structural stream.
const MAX_DECODED_SIZE: u64 = 256 * 1024 * 1024;

/// Predictor parameters from a `/DecodeParms` dictionary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DecodeParams {
    /// Predictor algorithm (1 = none, 2 = TIFF, 10-15 = PNG)
    pub predictor: i64,
    /// Samples per row
    pub columns: usize,
    /// Color components per sample
    pub colors: usize,
    /// Bits per component
    pub bits_per_component: usize,
}

impl Default for DecodeParams {
    fn default() -> Self {
        Self {
            predictor: 1,
            columns: 1,
            colors: 1,
            bits_per_component: 8,
        }
    }
}

impl DecodeParams {
    fn from_dict(dict: &Dictionary) -> Self {
        let int = |key: &str, default: i64| dict.get(key).and_then(Object::as_integer).unwrap_or(default);
        Self {
            predictor: int("Predictor", 1),
            columns: int("Columns", 1).max(1) as usize,
            colors: int("Colors", 1).max(1) as usize,
            bits_per_component: int("BitsPerComponent", 8).max(1) as usize,
        }
    }

    fn row_bytes(&self) -> usize {
        (self.columns * self.colors * self.bits_per_component).div_ceil(8)
    }

    fn pixel_bytes(&self) -> usize {
        (self.colors * self.bits_per_component).div_ceil(8).max(1)
    }
}

/// Decode stream data according to its `/Filter` and `/DecodeParms`.
pub fn decode_stream(dict: &Dictionary, data: &[u8]) -> Result<Vec<u8>> {
    let filters: Vec<&str> = match dict.get("Filter") {
        None => Vec::new(),
        Some(Object::Name(n)) => vec![n.as_str()],
        Some(Object::Array(arr)) => arr.iter().filter_map(Object::as_name).collect(),
        Some(other) => {
            return Err(Error::Decode(format!("invalid /Filter of type {}", other.type_name())))
        },
    };
    let params: Vec<Option<DecodeParams>> = match dict.get("DecodeParms") {
        Some(Object::Dictionary(d)) => vec![Some(DecodeParams::from_dict(d))],
        Some(Object::Array(arr)) => arr.iter().map(|o| o.as_dict().map(DecodeParams::from_dict)).collect(),
        _ => Vec::new(),
    };

    let mut current = data.to_vec();
    for (i, filter) in filters.iter().enumerate() {
        current = match *filter {
            "FlateDecode" | "Fl" => inflate(&current)?,
            other => return Err(Error::Decode(format!("unsupported filter /{}", other))),
        };
        if let Some(Some(p)) = params.get(i) {
            current = decode_predictor(&current, p)?;
        }
    }
    Ok(current)
}

/// Zlib-inflate `input`.
pub fn inflate(input: &[u8]) -> Result<Vec<u8>> {
    let mut output = Vec::new();
    ZlibDecoder::new(input)
        .take(MAX_DECODED_SIZE)
        .read_to_end(&mut output)
        .map_err(|e| Error::Decode(format!("FlateDecode failed: {}", e)))?;
    Ok(output)
}

/// Reverse a TIFF or PNG predictor.
pub fn decode_predictor(data: &[u8], params: &DecodeParams) -> Result<Vec<u8>> {
    match params.predictor {
        1 => Ok(data.to_vec()),
        2 => decode_tiff(data, params),
        10..=15 => decode_png(data, params),
        other => Err(Error::Decode(format!("unsupported predictor {}", other))),
    }
}

fn decode_tiff(data: &[u8], params: &DecodeParams) -> Result<Vec<u8>> {
    let row = params.row_bytes();
    let bpp = params.pixel_bytes();
    let mut out = data.to_vec();
    for line in out.chunks_mut(row) {
        for i in bpp..line.len() {
            line[i] = line[i].wrapping_add(line[i - bpp]);
        }
    }
    Ok(out)
}

fn decode_png(data: &[u8], params: &DecodeParams) -> Result<Vec<u8>> {
    let row = params.row_bytes();
    let bpp = params.pixel_bytes();
    if data.len() % (row + 1) != 0 {
        return Err(Error::Decode(format!(
            "predicted data length {} is not a multiple of row size {}",
            data.len(),
            row + 1
        )));
    }

    let mut out: Vec<u8> = Vec::with_capacity(data.len() / (row + 1) * row);
    let mut prev = vec![0u8; row];
    for encoded in data.chunks(row + 1) {
        let tag = encoded[0];
        let mut line = encoded[1..].to_vec();
        for i in 0..row {
            let left = if i >= bpp { line[i - bpp] } else { 0 };
            let up = prev[i];
            let up_left = if i >= bpp { prev[i - bpp] } else { 0 };
            let predicted = match tag {
                0 => 0,
                1 => left,
                2 => up,
                3 => ((left as u16 + up as u16) / 2) as u8,
                4 => paeth(left, up, up_left),
                other => return Err(Error::Decode(format!("invalid PNG row filter {}", other))),
            };
            line[i] = line[i].wrapping_add(predicted);
        }
        out.extend_from_slice(&line);
        prev = line;
    }
    Ok(out)
}

fn paeth(a: u8, b: u8, c: u8) -> u8 {
    let p = a as i16 + b as i16 - c as i16;
    let pa = (p - a as i16).abs();
    let pb = (p - b as i16).abs();
    let pc = (p - c as i16).abs();
    if pa <= pb && pa <= pc {
        a
    } else if pb <= pc {
        b
    } else {
        c
    }
}
