use std::sync::Arc;

/// Opaque, tagged payload stored by the index.
///
/// Cloning an `Object` is cheap: the byte payload is reference-counted, the
/// same currency-type trick `ahnlich_similarity::EmbeddingKey` uses for its
/// `Arc<Vec<f32>>` wrapper, except here the payload is untyped bytes since
/// the index treats objects opaquely (the concrete `Space` is the only thing
/// that knows how to interpret them).
#[derive(Debug, Clone)]
pub struct Object {
    id: i64,
    label: Option<Arc<str>>,
    bytes: Arc<[u8]>,
}

impl Object {
    pub fn new(id: i64, label: Option<String>, bytes: Vec<u8>) -> Self {
        Self {
            id,
            label: label.map(|l| l.into()),
            bytes: bytes.into(),
        }
    }

    pub fn with_bytes(id: i64, bytes: impl Into<Arc<[u8]>>) -> Self {
        Self {
            id,
            label: None,
            bytes: bytes.into(),
        }
    }

    pub fn id(&self) -> i64 {
        self.id
    }

    pub fn label(&self) -> Option<&str> {
        self.label.as_deref()
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }
}

impl PartialEq for Object {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}
impl Eq for Object {}
