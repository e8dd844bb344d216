use chrono::NaiveDateTime;

/// A stored result set. `payload` is the JSON-encoded item list; it is a
/// process-local format with no compatibility promise across versions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Snapshot {
    pub id: i64,
    pub endpoint: String,
    pub taken_at: NaiveDateTime,
    pub item_count: i64,
    pub payload: Vec<u8>,
}

impl Snapshot {
    pub fn items<T: serde::de::DeserializeOwned>(&self) -> serde_json::Result<Vec<T>> {
        serde_json::from_slice(&self.payload)
    }
}
