//! Network-wide view of a user.

use slirc_link_proto::ServerId;
use std::collections::HashSet;

/// Unique user identifier (SID + 6 characters).
pub type Uid = String;

/// A user known to this server, local or learned over a link.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct User {
    pub uid: Uid,
    pub nick: String,
    /// Logical time of the most recent successful nick claim.
    pub nick_ts: i64,
    pub ident: String,
    pub host: String,
    pub realname: String,
    /// Connected over TLS to its home server.
    pub secure: bool,
    /// User mode `+i`.
    pub invisible: bool,
    /// Owning server. `None` for users connected directly here.
    pub remote_sid: Option<ServerId>,
    /// Folded names of joined channels.
    pub channels: HashSet<String>,
}

impl User {
    pub fn is_remote(&self) -> bool {
        self.remote_sid.is_some()
    }

    /// The server that owns this user, resolving local users to `local`.
    pub fn owner<'a>(&'a self, local: &'a ServerId) -> &'a ServerId {
        self.remote_sid.as_ref().unwrap_or(local)
    }

    /// User modes as sent in `USER` records.
    pub fn mode_string(&self) -> String {
        if self.invisible { "+i".to_string() } else { "+".to_string() }
    }

    /// Apply a `+i` / `-i` delta. Unknown letters are ignored.
    ///
    /// Returns true if anything changed.
    pub fn apply_umode(&mut self, delta: &str) -> bool {
        let mut adding = true;
        let mut changed = false;
        for c in delta.chars() {
            match c {
                '+' => adding = true,
                '-' => adding = false,
                'i' if self.invisible != adding => {
                    self.invisible = adding;
                    changed = true;
                }
                _ => {}
            }
        }
        changed
    }
}
