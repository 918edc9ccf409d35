//! Channel state replicated between servers.

use super::user::Uid;
use std::collections::{BTreeSet, HashMap};

/// Modes that take a parameter or address a member; never part of the
/// simple flag set.
const PARAM_MODES: &str = "beIklovhaq";

/// A member's privilege level, lowest first.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Privilege {
    #[default]
    None,
    Voice,
    HalfOp,
    Op,
    Admin,
    Owner,
}

impl Privilege {
    /// Wire token used by `MEMBER`.
    pub fn token(self) -> char {
        match self {
            Self::None => '-',
            Self::Voice => '+',
            Self::HalfOp => '%',
            Self::Op => '@',
            Self::Admin => '&',
            Self::Owner => '~',
        }
    }

    pub fn from_token(token: &str) -> Option<Self> {
        match token {
            "-" => Some(Self::None),
            "+" => Some(Self::Voice),
            "%" => Some(Self::HalfOp),
            "@" => Some(Self::Op),
            "&" => Some(Self::Admin),
            "~" => Some(Self::Owner),
            _ => None,
        }
    }
}

/// Which mask list a `BAN`/`BANDEL` record addresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ListKind {
    Ban,
    Except,
}

impl ListKind {
    pub fn token(self) -> &'static str {
        match self {
            Self::Ban => "b",
            Self::Except => "e",
        }
    }

    pub fn from_token(token: &str) -> Option<Self> {
        match token {
            "b" => Some(Self::Ban),
            "e" => Some(Self::Except),
            _ => None,
        }
    }
}

/// A ban or exception entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListEntry {
    pub mask: String,
    pub set_by: String,
    pub set_at: i64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Topic {
    pub text: String,
    pub set_by: String,
    pub set_at: i64,
}

/// A channel as seen network-wide.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Channel {
    /// Display name (case preserved from first sighting).
    pub name: String,
    /// Earliest creation time observed anywhere on the network.
    pub created_ts: i64,
    pub members: HashMap<Uid, Privilege>,
    /// Simple flag modes (`n`, `t`, `m`, ...).
    pub modes: BTreeSet<char>,
    pub key: Option<String>,
    pub limit: Option<u32>,
    pub topic: Option<Topic>,
    pub bans: Vec<ListEntry>,
    pub excepts: Vec<ListEntry>,
}

impl Channel {
    pub fn new(name: &str, created_ts: i64) -> Self {
        Self {
            name: name.to_string(),
            created_ts,
            members: HashMap::new(),
            modes: BTreeSet::new(),
            key: None,
            limit: None,
            topic: None,
            bans: Vec::new(),
            excepts: Vec::new(),
        }
    }

    /// Adopt an older creation time, discarding everything the newer
    /// creation had accumulated. Membership survives; privileges do not.
    pub fn reset_to(&mut self, created_ts: i64) {
        self.created_ts = created_ts;
        self.modes.clear();
        self.key = None;
        self.limit = None;
        self.topic = None;
        self.bans.clear();
        self.excepts.clear();
        for privilege in self.members.values_mut() {
            *privilege = Privilege::None;
        }
    }

    /// `+` followed by the simple flags, e.g. `+nt`.
    pub fn mode_string(&self) -> String {
        std::iter::once('+').chain(self.modes.iter().copied()).collect()
    }

    /// Apply a flag delta such as `+nt-m`. Parameter modes are skipped.
    ///
    /// Returns true if the flag set changed.
    pub fn apply_mode_delta(&mut self, delta: &str) -> bool {
        let mut adding = true;
        let mut changed = false;
        for c in delta.chars() {
            match c {
                '+' => adding = true,
                '-' => adding = false,
                c if c.is_ascii_alphabetic() && !PARAM_MODES.contains(c) => {
                    changed |= if adding {
                        self.modes.insert(c)
                    } else {
                        self.modes.remove(&c)
                    };
                }
                _ => {}
            }
        }
        changed
    }

    pub fn list(&self, kind: ListKind) -> &[ListEntry] {
        match kind {
            ListKind::Ban => &self.bans,
            ListKind::Except => &self.excepts,
        }
    }

    fn list_mut(&mut self, kind: ListKind) -> &mut Vec<ListEntry> {
        match kind {
            ListKind::Ban => &mut self.bans,
            ListKind::Except => &mut self.excepts,
        }
    }

    /// Add a mask unless it is already listed (case-insensitive).
    pub fn add_list_entry(&mut self, kind: ListKind, entry: ListEntry) -> bool {
        let list = self.list_mut(kind);
        if list.iter().any(|e| e.mask.eq_ignore_ascii_case(&entry.mask)) {
            return false;
        }
        list.push(entry);
        true
    }

    pub fn remove_list_entry(&mut self, kind: ListKind, mask: &str) -> bool {
        let list = self.list_mut(kind);
        let before = list.len();
        list.retain(|e| !e.mask.eq_ignore_ascii_case(mask));
        list.len() != before
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }
}
