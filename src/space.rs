//! Distance-space interface and the concrete spaces shipped with the crate.
//!
//! The HNSW core (`index`, `node`, `queue`) only ever talks to objects
//! through `Space<D>`; it never assumes a concrete encoding. Concrete spaces
//! below are conveniences, grounded on the distance functions
//! `ahnlich_similarity::distance` supplies (euclidean, cosine, dot product),
//! generalized from `&[f32]` to the opaque `Object` byte payload.

use crate::error::{Error, Result};
use crate::io;
use crate::object::Object;
use crate::queue::DistanceValue;

/// Minimal interface HNSW requires from a concrete object type.
///
/// `distance` need not be symmetric and need not satisfy the triangle
/// inequality; it must never return NaN. `proxy_distance` defaults to
/// `distance` and may be overridden with a cheaper, order-preserving
/// surrogate used only during construction when `use_proxy_dist` is set.
pub trait Space<D: DistanceValue>: Send + Sync {
    fn distance(&self, a: &Object, b: &Object) -> D;

    fn proxy_distance(&self, a: &Object, b: &Object) -> D {
        self.distance(a, b)
    }

    /// Whether `distance(a, b) == distance(b, a)` for all a, b. Purely
    /// informational; the core never relies on it for correctness.
    fn is_symmetric(&self) -> bool {
        true
    }

    fn parse_object(&self, id: i64, label: Option<String>, bytes: &[u8]) -> Result<Object>;

    /// Round-trippable text form used by the text index format and dataset
    /// ingestion; the inverse of `parse_object`.
    fn serialize_object(&self, object: &Object) -> String;

    /// The inverse of `serialize_object`: parses the text form `load_text`
    /// hands back per node.
    fn parse_text(&self, id: i64, label: Option<String>, text: &str) -> Result<Object>;

    /// Discriminant persisted as `dist_func_type` in the binary header;
    /// checked against the space supplied to `load_binary` since the
    /// on-disk format cannot embed an executable distance function.
    fn type_code(&self) -> u32 {
        0
    }
}

fn decode_f32s(bytes: &[u8]) -> Result<Vec<f32>> {
    if bytes.len() % 4 != 0 {
        return Err(Error::InvalidObject(format!(
            "byte payload length {} is not a multiple of 4",
            bytes.len()
        )));
    }
    Ok(bytes
        .chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect())
}

fn encode_f32s(values: &[f32]) -> Vec<u8> {
    let mut out = Vec::with_capacity(values.len() * 4);
    for v in values {
        out.extend_from_slice(&v.to_le_bytes());
    }
    out
}

fn parse_text_vector(text: &str) -> Result<Vec<f32>> {
    text.split_whitespace()
        .map(|tok| {
            tok.parse::<f32>()
                .map_err(|e| Error::InvalidObject(format!("bad float token `{tok}`: {e}")))
        })
        .collect()
}

/// Squared (or plain) Euclidean distance over equal-length `f32` vectors.
pub struct L2Space {
    pub dim: usize,
    pub squared: bool,
}

impl L2Space {
    pub fn new(dim: usize) -> Self {
        Self {
            dim,
            squared: false,
        }
    }
}

impl Space<f32> for L2Space {
    fn type_code(&self) -> u32 {
        1
    }

    fn distance(&self, a: &Object, b: &Object) -> f32 {
        let av = decode_f32s(a.bytes()).expect("object bytes already validated at insertion");
        let bv = decode_f32s(b.bytes()).expect("object bytes already validated at insertion");
        let sum: f32 = av
            .iter()
            .zip(bv.iter())
            .map(|(x, y)| (x - y) * (x - y))
            .sum();
        if self.squared { sum } else { sum.sqrt() }
    }

    fn parse_object(&self, id: i64, label: Option<String>, bytes: &[u8]) -> Result<Object> {
        let values = decode_f32s(bytes)?;
        if values.len() != self.dim {
            return Err(Error::InvalidObject(format!(
                "expected {} dimensions, found {}",
                self.dim,
                values.len()
            )));
        }
        Ok(Object::new(id, label, bytes.to_vec()))
    }

    fn serialize_object(&self, object: &Object) -> String {
        let values = decode_f32s(object.bytes()).expect("object bytes already validated");
        values
            .iter()
            .map(|v| v.to_string())
            .collect::<Vec<_>>()
            .join(" ")
    }

    fn parse_text(&self, id: i64, label: Option<String>, text: &str) -> Result<Object> {
        let values = parse_text_vector(text)?;
        if values.len() != self.dim {
            return Err(Error::InvalidObject(format!(
                "expected {} dimensions, found {}",
                self.dim,
                values.len()
            )));
        }
        Ok(Object::new(id, label, encode_f32s(&values)))
    }
}

impl L2Space {
    /// Build an `Object` directly from a float vector, bypassing the text
    /// round-trip; used throughout the test suite and by callers building
    /// an index in-process rather than from a data file.
    pub fn object_from_vec(id: i64, values: &[f32]) -> Object {
        Object::with_bytes(id, encode_f32s(values))
    }
}

/// `1 - cosine_similarity`, over equal-length `f32` vectors. Not a metric
/// (the value at distance 0 only signals parallel, not identical, vectors)
/// which is exactly the kind of non-metric space §3 allows.
pub struct CosineSpace {
    pub dim: usize,
}

impl CosineSpace {
    pub fn new(dim: usize) -> Self {
        Self { dim }
    }
}

impl Space<f32> for CosineSpace {
    fn type_code(&self) -> u32 {
        2
    }

    fn distance(&self, a: &Object, b: &Object) -> f32 {
        let av = decode_f32s(a.bytes()).expect("object bytes already validated at insertion");
        let bv = decode_f32s(b.bytes()).expect("object bytes already validated at insertion");
        let dot: f32 = av.iter().zip(bv.iter()).map(|(x, y)| x * y).sum();
        let na: f32 = av.iter().map(|x| x * x).sum::<f32>().sqrt();
        let nb: f32 = bv.iter().map(|x| x * x).sum::<f32>().sqrt();
        if na == 0.0 || nb == 0.0 {
            1.0
        } else {
            1.0 - dot / (na * nb)
        }
    }

    fn parse_object(&self, id: i64, label: Option<String>, bytes: &[u8]) -> Result<Object> {
        let values = decode_f32s(bytes)?;
        if values.len() != self.dim {
            return Err(Error::InvalidObject(format!(
                "expected {} dimensions, found {}",
                self.dim,
                values.len()
            )));
        }
        Ok(Object::new(id, label, bytes.to_vec()))
    }

    fn serialize_object(&self, object: &Object) -> String {
        let values = decode_f32s(object.bytes()).expect("object bytes already validated");
        values
            .iter()
            .map(|v| v.to_string())
            .collect::<Vec<_>>()
            .join(" ")
    }

    fn parse_text(&self, id: i64, label: Option<String>, text: &str) -> Result<Object> {
        let values = parse_text_vector(text)?;
        if values.len() != self.dim {
            return Err(Error::InvalidObject(format!(
                "expected {} dimensions, found {}",
                self.dim,
                values.len()
            )));
        }
        Ok(Object::new(id, label, encode_f32s(&values)))
    }
}

impl CosineSpace {
    pub fn object_from_vec(id: i64, values: &[f32]) -> Object {
        Object::with_bytes(id, encode_f32s(values))
    }
}

/// Bitwise Hamming distance over equal-length byte strings; covers the
/// non-floating-point case the "arbitrary distance" scope in §3 implies.
pub struct HammingSpace {
    pub len_bytes: usize,
}

impl HammingSpace {
    pub fn new(len_bytes: usize) -> Self {
        Self { len_bytes }
    }

    pub fn object_from_bytes(id: i64, bytes: &[u8]) -> Object {
        Object::with_bytes(id, bytes.to_vec())
    }
}

impl Space<u32> for HammingSpace {
    fn type_code(&self) -> u32 {
        3
    }

    fn distance(&self, a: &Object, b: &Object) -> u32 {
        a.bytes()
            .iter()
            .zip(b.bytes().iter())
            .map(|(x, y)| (x ^ y).count_ones())
            .sum()
    }

    fn parse_object(&self, id: i64, label: Option<String>, bytes: &[u8]) -> Result<Object> {
        if bytes.len() != self.len_bytes {
            return Err(Error::InvalidObject(format!(
                "expected {} bytes, found {}",
                self.len_bytes,
                bytes.len()
            )));
        }
        Ok(Object::new(id, label, bytes.to_vec()))
    }

    fn serialize_object(&self, object: &Object) -> String {
        object
            .bytes()
            .iter()
            .map(|b| format!("{b:02x}"))
            .collect()
    }

    fn parse_text(&self, id: i64, label: Option<String>, text: &str) -> Result<Object> {
        let bytes = io::hex_decode(text).map_err(|e| Error::InvalidObject(e.to_string()))?;
        if bytes.len() != self.len_bytes {
            return Err(Error::InvalidObject(format!(
                "expected {} bytes, found {}",
                self.len_bytes,
                bytes.len()
            )));
        }
        Ok(Object::new(id, label, bytes))
    }
}
