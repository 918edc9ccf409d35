//! Minting identifiers for users connected to this server.

use slirc_link_proto::ServerId;
use std::sync::atomic::{AtomicU64, Ordering};

/// Generates user identifiers: SID (3 chars) + 6 base36 chars.
///
/// Example: `001AAAAAB`. Remote servers mint under their own SID, so
/// identifiers from this generator never clash with learned users unless
/// a peer misbehaves.
pub struct UidGenerator {
    sid: ServerId,
    counter: AtomicU64,
}

impl UidGenerator {
    pub fn new(sid: ServerId) -> Self {
        Self {
            sid,
            counter: AtomicU64::new(0),
        }
    }

    pub fn next(&self) -> String {
        let n = self.counter.fetch_add(1, Ordering::Relaxed);
        format!("{}{}", self.sid, base36_encode_6(n))
    }
}

/// Encode a number as a 6-character base36 string, wrapping past 36^6.
fn base36_encode_6(mut n: u64) -> String {
    const CHARS: &[u8; 36] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";
    let mut out = [b'A'; 6];
    for slot in out.iter_mut().rev() {
        *slot = CHARS[(n % 36) as usize];
        n /= 36;
    }
    out.iter().map(|&b| b as char).collect()
}
