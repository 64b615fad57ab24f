//! Default renderings of value types and data, shared by every provider that
//! does not override the [`KeyStore`](super::KeyStore) formatting hooks.

use chrono::{DateTime, Utc};
use std::fmt::Write;

use super::types::{DataClass, ValueType};

/// Number of bytes shown by the binary display preview.
pub const PREVIEW_BYTES: usize = 32;

const KIB: u64 = 1024;
const MIB: u64 = 1024 * KIB;

/// Decodes little-endian UTF-16, replacing unpaired surrogates. A trailing
/// odd byte is ignored.
pub fn decode_utf16le(bytes: &[u8]) -> String {
    let units = bytes
        .chunks_exact(2)
        .map(|pair| u16::from_le_bytes([pair[0], pair[1]]));
    char::decode_utf16(units)
        .map(|r| r.unwrap_or(char::REPLACEMENT_CHARACTER))
        .collect()
}

/// Decodes bytes one-to-one as 8-bit characters.
pub fn decode_latin1(bytes: &[u8]) -> String {
    bytes.iter().map(|&b| b as char).collect()
}

/// Text of a string value: UTF-16 with trailing NUL padding stripped.
/// Interior NULs (multi-string separators) become single spaces.
pub fn string_text(bytes: &[u8]) -> String {
    let decoded = decode_utf16le(bytes);
    decoded.trim_end_matches('\0').replace('\0', " ")
}

/// Uppercase hex pairs separated by single spaces, e.g. `AB CD EF`.
pub fn hex_text(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 3);
    for (i, b) in bytes.iter().enumerate() {
        if i > 0 {
            out.push(' ');
        }
        let _ = write!(out, "{:02X}", b);
    }
    out
}

/// [`hex_text`] over the first [`PREVIEW_BYTES`] bytes, with `...` appended
/// when the data is longer.
pub fn hex_preview(bytes: &[u8]) -> String {
    if bytes.len() <= PREVIEW_BYTES {
        return hex_text(bytes);
    }
    let mut out = hex_text(&bytes[..PREVIEW_BYTES]);
    out.push_str(" ...");
    out
}

fn dword_text(value: u32) -> String {
    format!("0x{:08x} ({})", value, value)
}

fn qword_text(value: u64) -> String {
    format!("0x{:016x} ({})", value, value)
}

/// Label for a value type: its `REG_*` name, or the numeric code.
pub fn type_label(ty: ValueType) -> String {
    match ty.name() {
        Some(name) => name.to_string(),
        None => format!("REG_0x{:x}", ty.code()),
    }
}

/// Full rendering of a value's data.
pub fn value_data(ty: ValueType, bytes: &[u8]) -> String {
    match ty.class() {
        DataClass::Text => string_text(bytes),
        DataClass::Other => numeric_text(ty, bytes),
        DataClass::Binary => hex_text(bytes),
    }
}

/// Display rendering: like [`value_data`], but binary data is previewed.
pub fn value_data_preview(ty: ValueType, bytes: &[u8]) -> String {
    match ty.class() {
        DataClass::Binary => hex_preview(bytes),
        _ => value_data(ty, bytes),
    }
}

fn numeric_text(ty: ValueType, bytes: &[u8]) -> String {
    match (ty, bytes.len()) {
        (ValueType::DWORD, 4) => {
            dword_text(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
        }
        (ValueType::QWORD, 8) => {
            let mut raw = [0u8; 8];
            raw.copy_from_slice(bytes);
            qword_text(u64::from_le_bytes(raw))
        }
        // Malformed numeric data is shown as bytes.
        _ => hex_preview(bytes),
    }
}

/// Human-readable data size.
pub fn size_text(size: u64) -> String {
    if size < KIB {
        format!("{} bytes", size)
    } else if size < MIB {
        format!("{:.1} KB", size as f64 / KIB as f64)
    } else {
        format!("{:.1} MB", size as f64 / MIB as f64)
    }
}

pub fn time_text(time: &DateTime<Utc>) -> String {
    time.format("%Y-%m-%d %H:%M:%S").to_string()
}

/// Encodes text as NUL-terminated UTF-16LE.
pub fn encode_string(text: &str) -> Vec<u8> {
    let mut out: Vec<u8> = text.encode_utf16().flat_map(u16::to_le_bytes).collect();
    out.extend_from_slice(&[0, 0]);
    out
}

/// Encodes strings as a double-NUL-terminated UTF-16LE multi-string.
pub fn encode_multi_string<S: AsRef<str>>(items: &[S]) -> Vec<u8> {
    let mut out = Vec::new();
    for item in items {
        out.extend(encode_string(item.as_ref()));
    }
    out.extend_from_slice(&[0, 0]);
    out
}
