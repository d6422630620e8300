//! Session safety limits.

use serde::{Deserialize, Serialize};

/// Hard bounds enforced by the session manager and the wire codec.
///
/// Values are explicit about their units.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Limits {
    /// Inbound events held (undelivered) per session before it fails.
    pub max_buffered_events: usize,
    pub max_data_bytes: usize,
    pub max_error_message_bytes: usize,

    pub max_cbor_depth: usize,
    pub max_cbor_map_entries: usize,
    pub max_cbor_array_entries: usize,
    pub max_cbor_bytes_string_len: usize,
    pub max_cbor_text_string_len: usize,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            max_buffered_events: 10_000,
            max_data_bytes: 8 * 1024 * 1024,
            max_error_message_bytes: 4 * 1024,

            max_cbor_depth: 8,
            max_cbor_map_entries: 64,
            max_cbor_array_entries: 10_000,
            max_cbor_bytes_string_len: 8 * 1024 * 1024,
            max_cbor_text_string_len: 16 * 1024,
        }
    }
}
