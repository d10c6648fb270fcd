//! Atomic file writes and the text index format: build/save/load are
//! atomic at the file level. The write-temp-then-rename pattern is lifted
//! directly from `utils::persistence::Persistence::run`'s
//! snapshot writer: `tempfile::NamedTempFile::new_in(parent)`, write, then
//! `std::fs::rename` over the destination.

use std::io::Write;
use std::path::Path;

use crate::error::{Error, Result};

/// Writes `body`'s output to a temp file alongside `path`, then renames it
/// over `path`. A reader never observes a partially-written file.
pub fn atomic_write(path: &Path, body: impl FnOnce(&mut dyn Write) -> std::io::Result<()>) -> Result<()> {
    let parent = path.parent().filter(|p| !p.as_os_str().is_empty()).unwrap_or_else(|| Path::new("."));
    let mut tmp = tempfile::NamedTempFile::new_in(parent)?;
    body(tmp.as_file_mut())?;
    tmp.as_file_mut().flush()?;
    tmp.persist(path)
        .map_err(|e| Error::Io(e.error))?;
    Ok(())
}

/// Text-format header: the same fields as the binary header, space
/// separated, as the format's first line.
pub fn format_header_line(fields: &[u32]) -> String {
    fields
        .iter()
        .map(|f| f.to_string())
        .collect::<Vec<_>>()
        .join(" ")
}

pub fn parse_header_line(line: &str) -> Result<Vec<u32>> {
    line.split_whitespace()
        .map(|tok| {
            tok.parse::<u32>()
                .map_err(|e| Error::CorruptIndex(format!("bad header field `{tok}`: {e}")))
        })
        .collect()
}

/// Encodes bytes as lowercase hex; used wherever a value must land in the
/// text format as a single whitespace-free token.
pub fn hex_encode(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

pub fn hex_decode(hex: &str) -> Result<Vec<u8>> {
    if hex.len() % 2 != 0 {
        return Err(Error::CorruptIndex(format!("odd-length hex string `{hex}`")));
    }
    (0..hex.len())
        .step_by(2)
        .map(|i| {
            u8::from_str_radix(&hex[i..i + 2], 16)
                .map_err(|e| Error::CorruptIndex(format!("bad hex byte in `{hex}`: {e}")))
        })
        .collect()
}

/// Encodes a node's label as a single token for the text format's per-node
/// line: `n` for `None`, `h` followed by the hex-encoded UTF-8 bytes
/// otherwise. A plain length-zero token can't distinguish `None` from
/// `Some(String::new())`, so the tag is part of the token itself rather
/// than a separate field.
pub fn encode_label_token(label: Option<&str>) -> String {
    match label {
        None => "n".to_string(),
        Some(s) => format!("h{}", hex_encode(s.as_bytes())),
    }
}

pub fn decode_label_token(token: &str) -> Result<Option<String>> {
    if token == "n" {
        return Ok(None);
    }
    let hex = token
        .strip_prefix('h')
        .ok_or_else(|| Error::CorruptIndex(format!("bad label token `{token}`")))?;
    let bytes = hex_decode(hex)?;
    String::from_utf8(bytes)
        .map(Some)
        .map_err(|e| Error::CorruptIndex(format!("label is not valid utf-8: {e}")))
}
