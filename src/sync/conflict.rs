//! Deterministic arbitration of concurrent claims.
//!
//! Both rules depend only on their arguments, so every server reaches the
//! same verdict no matter which claim it saw first.

use slirc_link_proto::ServerId;
use std::cmp::Ordering;

/// One side of a nick collision.
#[derive(Debug, Clone, Copy)]
pub struct NickClaim<'a> {
    pub uid: &'a str,
    pub nick_ts: i64,
    /// Server owning the user.
    pub sid: &'a ServerId,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Winner {
    Incoming,
    Existing,
}

/// Lower timestamp wins; ties go to the lexicographically smaller SID,
/// then the smaller uid.
pub fn resolve_nick(incoming: &NickClaim<'_>, existing: &NickClaim<'_>) -> Winner {
    let order = incoming
        .nick_ts
        .cmp(&existing.nick_ts)
        .then_with(|| incoming.sid.cmp(existing.sid))
        .then_with(|| incoming.uid.cmp(existing.uid));
    match order {
        Ordering::Less => Winner::Incoming,
        _ => Winner::Existing,
    }
}

/// Nick forced onto the loser of a collision: its uid.
///
/// Uids start with a digit (see [`ServerId`]) and [`nick_is_claimable`]
/// keeps digit-led nicks for their own uid, so this nick is never held by
/// anyone else.
pub fn collision_nick(uid: &str) -> String {
    uid.to_string()
}

/// Whether the user `uid` may hold `nick`. A leading digit is reserved for
/// collision nicks.
pub fn nick_is_claimable(uid: &str, nick: &str) -> bool {
    !nick.starts_with(|c: char| c.is_ascii_digit()) || nick == uid
}

/// What to do with a channel record given both creation times.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TsVerdict {
    /// Incoming is newer: ignore its payload (membership still counts).
    KeepLocal,
    /// Incoming is older: wipe local state, adopt its time, then apply.
    ResetLocal,
    /// Same creation: apply normally.
    Apply,
}

pub fn channel_ts_verdict(local: i64, incoming: i64) -> TsVerdict {
    match incoming.cmp(&local) {
        Ordering::Greater => TsVerdict::KeepLocal,
        Ordering::Less => TsVerdict::ResetLocal,
        Ordering::Equal => TsVerdict::Apply,
    }
}
