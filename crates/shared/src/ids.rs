use std::sync::atomic::{AtomicU64, Ordering};

use chrono::Utc;

/// Prefix of conversation ids created on the client before the server confirms them.
pub const TEMP_PREFIX: &str = "temp-";

/// Prefix of message ids generated locally (optimistic user messages, streamed replies).
pub const LOCAL_PREFIX: &str = "local-";

static TEMP_SEQUENCE: AtomicU64 = AtomicU64::new(0);

/// `temp-<millis>-<n>`; the sequence keeps two creations in the same millisecond apart.
pub fn generate_temp_id() -> String {
    let seq = TEMP_SEQUENCE.fetch_add(1, Ordering::Relaxed);
    format!("{}{}-{}", TEMP_PREFIX, Utc::now().timestamp_millis(), seq)
}

pub fn is_temp_id(id: &str) -> bool {
    id.starts_with(TEMP_PREFIX)
}

pub fn generate_local_id() -> String {
    format!("{}{}", LOCAL_PREFIX, uuid::Uuid::new_v4())
}

pub fn is_local_id(id: &str) -> bool {
    id.starts_with(LOCAL_PREFIX)
}
