//! Contiguous packed byte layout for the on-disk binary index format
//! ("OptimizedStore"). Pure byte-level serialization: it knows nothing
//! about `Space` or the distance type, only
//! about headers, neighbor arrays and raw object bytes, the same separation
//! `velesdb`'s `persistence.rs` draws between "save the graph shape" and
//! "the caller supplies the metric".

use std::io::{self, Read, Write};

use crate::error::{Error, Result};

pub const MAGIC: u32 = u32::from_le_bytes(*b"HNSW");
pub const FORMAT_VERSION: u32 = 1;

/// Label-length sentinel meaning "no label" (`None`), distinct from a
/// present-but-empty label (length 0).
const NO_LABEL_MARKER: u32 = u32::MAX;

/// The fixed-size binary header, little-endian throughout.
#[derive(Debug, Clone, Copy)]
pub struct StoreHeader {
    pub version: u32,
    pub m: u32,
    pub m0: u32,
    pub ef_construction: u32,
    pub entry_point: u32,
    pub top_level: u32,
    pub node_count: u32,
    pub dist_func_type: u32,
    pub offset_levels: u32,
    pub offset_data: u32,
}

impl StoreHeader {
    const FIELD_COUNT: usize = 10;
    const BYTES: usize = 4 * (Self::FIELD_COUNT + 1); // + magic

    fn write(&self, w: &mut impl Write) -> io::Result<()> {
        for field in [
            MAGIC,
            self.version,
            self.m,
            self.m0,
            self.ef_construction,
            self.entry_point,
            self.top_level,
            self.node_count,
            self.dist_func_type,
            self.offset_levels,
            self.offset_data,
        ] {
            w.write_all(&field.to_le_bytes())?;
        }
        Ok(())
    }

    fn read(r: &mut impl Read) -> Result<Self> {
        let mut buf = [0u8; 4];
        let mut next_u32 = |r: &mut dyn Read| -> Result<u32> {
            r.read_exact(&mut buf)?;
            Ok(u32::from_le_bytes(buf))
        };
        let magic = next_u32(r)?;
        if magic != MAGIC {
            return Err(Error::CorruptIndex(format!(
                "bad magic: expected {MAGIC:#x}, found {magic:#x}"
            )));
        }
        let version = next_u32(r)?;
        if version != FORMAT_VERSION {
            return Err(Error::CorruptIndex(format!(
                "unsupported format version {version}"
            )));
        }
        Ok(Self {
            version,
            m: next_u32(r)?,
            m0: next_u32(r)?,
            ef_construction: next_u32(r)?,
            entry_point: next_u32(r)?,
            top_level: next_u32(r)?,
            node_count: next_u32(r)?,
            dist_func_type: next_u32(r)?,
            offset_levels: next_u32(r)?,
            offset_data: next_u32(r)?,
        })
    }
}

/// One node's record in the layer-0 block: `[max_level][neighbor_count]
/// [neighbor_id * m0, zero-padded][object id][object label][object bytes]`.
/// The id/label/byte-length fields go beyond the literal "object_bytes:
/// raw" of the original format note, because a lossless round trip
/// requires knowing where one node's record ends and the next begins; see
/// DESIGN.md.
pub struct NodeRecord {
    pub max_level: u32,
    pub neighbor_ids: Vec<u32>,
    pub object_id: i64,
    pub object_label: Option<String>,
    pub object_bytes: Vec<u8>,
    /// `neighbor_ids` for layers 1..=max_level, one Vec per layer.
    pub higher_neighbor_ids: Vec<Vec<u32>>,
}

fn write_u32(w: &mut impl Write, v: u32) -> io::Result<()> {
    w.write_all(&v.to_le_bytes())
}

fn read_u32(r: &mut impl Read) -> io::Result<u32> {
    let mut buf = [0u8; 4];
    r.read_exact(&mut buf)?;
    Ok(u32::from_le_bytes(buf))
}

fn write_padded_neighbors(w: &mut impl Write, ids: &[u32], capacity: u32) -> io::Result<()> {
    for &id in ids {
        write_u32(w, id)?;
    }
    for _ in ids.len()..capacity as usize {
        write_u32(w, u32::MAX)?;
    }
    Ok(())
}

fn read_padded_neighbors(r: &mut impl Read, count: u32, capacity: u32) -> Result<Vec<u32>> {
    let mut ids = Vec::with_capacity(count as usize);
    for i in 0..capacity {
        let v = read_u32(r)?;
        if i < count {
            ids.push(v);
        }
    }
    Ok(ids)
}

pub fn write_layer0_record(w: &mut impl Write, record: &NodeRecord, m0: u32) -> io::Result<()> {
    write_u32(w, record.max_level)?;
    write_u32(w, record.neighbor_ids.len() as u32)?;
    write_padded_neighbors(w, &record.neighbor_ids, m0)?;
    w.write_all(&record.object_id.to_le_bytes())?;
    match &record.object_label {
        None => write_u32(w, NO_LABEL_MARKER)?,
        Some(label) => {
            let label_bytes = label.as_bytes();
            write_u32(w, label_bytes.len() as u32)?;
            w.write_all(label_bytes)?;
        }
    }
    write_u32(w, record.object_bytes.len() as u32)?;
    w.write_all(&record.object_bytes)?;
    Ok(())
}

pub fn read_layer0_record(r: &mut impl Read, m0: u32) -> Result<(u32, Vec<u32>, i64, Option<String>, Vec<u8>)> {
    let max_level = read_u32(r)?;
    let neighbor_count = read_u32(r)?;
    let neighbor_ids = read_padded_neighbors(r, neighbor_count, m0)?;
    let mut id_buf = [0u8; 8];
    r.read_exact(&mut id_buf)?;
    let object_id = i64::from_le_bytes(id_buf);
    let label_marker = read_u32(r)?;
    let label = if label_marker == NO_LABEL_MARKER {
        None
    } else {
        let mut label_buf = vec![0u8; label_marker as usize];
        r.read_exact(&mut label_buf)?;
        Some(String::from_utf8(label_buf).map_err(|e| Error::CorruptIndex(e.to_string()))?)
    };
    let byte_len = read_u32(r)? as usize;
    let mut object_bytes = vec![0u8; byte_len];
    r.read_exact(&mut object_bytes)?;
    Ok((max_level, neighbor_ids, object_id, label, object_bytes))
}

pub fn write_higher_layer(w: &mut impl Write, ids: &[u32], m: u32) -> io::Result<()> {
    write_u32(w, ids.len() as u32)?;
    write_padded_neighbors(w, ids, m)
}

pub fn read_higher_layer(r: &mut impl Read, m: u32) -> Result<Vec<u32>> {
    let count = read_u32(r)?;
    read_padded_neighbors(r, count, m)
}

impl StoreHeader {
    pub fn write_header(&self, w: &mut impl Write) -> io::Result<()> {
        self.write(w)
    }

    pub fn read_header(r: &mut impl Read) -> Result<Self> {
        Self::read(r)
    }

    pub const BYTE_LEN: usize = Self::BYTES;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip(label: Option<String>) -> Option<String> {
        let record = NodeRecord {
            max_level: 0,
            neighbor_ids: vec![1, 2],
            object_id: 7,
            object_label: label,
            object_bytes: vec![9, 9],
            higher_neighbor_ids: vec![],
        };
        let mut buf = Vec::new();
        write_layer0_record(&mut buf, &record, 4).unwrap();
        let (_, _, _, label, _) = read_layer0_record(&mut std::io::Cursor::new(&buf), 4).unwrap();
        label
    }

    #[test]
    fn empty_label_round_trips_distinct_from_no_label() {
        assert_eq!(roundtrip(Some(String::new())), Some(String::new()));
        assert_eq!(roundtrip(None), None);
        assert_eq!(roundtrip(Some("tag".to_string())), Some("tag".to_string()));
    }
}
