use std::time::{SystemTime, UNIX_EPOCH};

/// Key under which the conversation history snapshot is cached.
pub const HISTORY_CACHE_KEY: &str = "vqa_messages";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntry {
    pub key: String,
    pub value: String,
    pub updated_at_unix_seconds: u64,
}

impl CacheEntry {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
            updated_at_unix_seconds: unix_timestamp_seconds(),
        }
    }
}

pub(crate) fn unix_timestamp_seconds() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |duration| duration.as_secs())
}
