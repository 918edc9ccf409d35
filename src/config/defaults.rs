//! Default value functions for configuration.
//!
//! Separated into its own module for clarity and reuse.

/// Returns `true` (for serde defaults).
pub fn default_true() -> bool {
    true
}

// =============================================================================
// Link Defaults
// =============================================================================

pub fn default_handshake_timeout_secs() -> u64 {
    15
}

pub fn default_flood_window_secs() -> u64 {
    10
}

pub fn default_flood_max_lines() -> usize {
    200
}

pub fn default_dedup_ttl_secs() -> u64 {
    120
}

pub fn default_dedup_max_entries() -> usize {
    100_000
}

pub fn default_send_queue() -> usize {
    512
}

pub fn default_reconnect_delay_secs() -> u64 {
    5
}
