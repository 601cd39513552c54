use serde::Serialize;
use serde_json::{Map, Value};

pub const DEFAULT_MAX_ENTRIES: usize = 10;
pub const DEFAULT_MAX_BYTES: usize = 1000;

/// Bounds for one chunk. A `None` bound is not enforced; with both `None` the whole document is one
/// chunk.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ChunkPolicy {
    pub max_entries: Option<usize>,
    /// Soft byte bound: triggers a boundary but never splits or drops an entry.
    pub max_bytes: Option<usize>,
}

impl Default for ChunkPolicy {
    fn default() -> Self {
        Self {
            max_entries: Some(DEFAULT_MAX_ENTRIES),
            max_bytes: Some(DEFAULT_MAX_BYTES),
        }
    }
}

impl ChunkPolicy {
    #[must_use]
    pub fn entries(n: usize) -> Self {
        Self {
            max_entries: Some(n.max(1)),
            max_bytes: None,
        }
    }

    #[must_use]
    pub fn bytes(n: usize) -> Self {
        Self {
            max_entries: None,
            max_bytes: Some(n),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Chunk {
    pub index: usize,
    pub entries: Map<String, Value>,
}

impl Chunk {
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    /// Compact JSON sent to the model.
    pub fn to_json(&self) -> String {
        serde_json::to_string(&self.entries).unwrap_or_else(|_| "{}".to_string())
    }
}

/// Size of one entry as the compact serialization of `[key, value]`.
pub fn entry_size(key: &str, value: &Value) -> usize {
    serde_json::to_string(&(key, value))
        .map(|s| s.len())
        .unwrap_or(0)
}

/// Split a document into ordered chunks. Deterministic; never mutates `document`.
pub fn chunk_document(document: &Map<String, Value>, policy: &ChunkPolicy) -> Vec<Chunk> {
    let mut chunks: Vec<Chunk> = Vec::new();
    let mut current: Map<String, Value> = Map::new();
    let mut used = 0usize;

    for (key, value) in document {
        let add = entry_size(key, value);
        if !current.is_empty() {
            let over_count = policy.max_entries.is_some_and(|n| current.len() >= n);
            let over_bytes = policy.max_bytes.is_some_and(|n| used + add > n);
            if over_count || over_bytes {
                chunks.push(Chunk {
                    index: chunks.len(),
                    entries: std::mem::take(&mut current),
                });
                used = 0;
            }
        }
        used += add;
        current.insert(key.clone(), value.clone());
    }

    if !current.is_empty() {
        chunks.push(Chunk {
            index: chunks.len(),
            entries: current,
        });
    }
    chunks
}
