//! The Matrix - network-wide users and channels.
//!
//! Every table is a `DashMap` so link tasks can read and mutate state
//! concurrently. Lock order when guards nest: `channels` before `users`
//! before `nicks`. Nothing here holds a guard across an await.

use super::channel::{Channel, Privilege};
use super::uid::UidGenerator;
use super::user::{Uid, User};
use crate::sync::conflict::{TsVerdict, channel_ts_verdict};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use slirc_link_proto::{ServerId, irc_to_lower};
use std::collections::HashSet;

/// This server's identity.
#[derive(Debug, Clone)]
pub struct ServerIdentity {
    pub sid: ServerId,
    pub name: String,
    pub description: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InsertError {
    /// The uid is already registered.
    UidExists(Uid),
    /// The nick is held by the given uid.
    NickInUse(Uid),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RenameError {
    NoSuchUser,
    NickInUse(Uid),
}

/// What a join did to the channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JoinOutcome {
    pub created: bool,
    /// An older creation time replaced the local one.
    pub reset: bool,
    /// False if the user was already a member.
    pub newly_joined: bool,
    /// Creation time after the join.
    pub created_ts: i64,
}

pub struct Matrix {
    pub me: ServerIdentity,
    /// All known users, indexed by uid.
    pub users: DashMap<Uid, User>,
    /// Folded nick to uid.
    pub nicks: DashMap<String, Uid>,
    /// All channels, indexed by folded name.
    pub channels: DashMap<String, Channel>,
    pub uid_gen: UidGenerator,
}

impl Matrix {
    pub fn new(me: ServerIdentity) -> Self {
        Self {
            uid_gen: UidGenerator::new(me.sid.clone()),
            me,
            users: DashMap::new(),
            nicks: DashMap::new(),
            channels: DashMap::new(),
        }
    }

    pub fn local_sid(&self) -> &ServerId {
        &self.me.sid
    }

    // ------------------------------------------------------------------
    // Users
    // ------------------------------------------------------------------

    /// Register a user under its uid and nick.
    ///
    /// Fails without side effects if either is taken.
    pub fn insert_user(&self, mut user: User) -> Result<(), InsertError> {
        user.channels.clear();
        let folded = irc_to_lower(&user.nick);
        match self.users.entry(user.uid.clone()) {
            Entry::Occupied(e) => Err(InsertError::UidExists(e.key().clone())),
            Entry::Vacant(slot) => {
                match self.nicks.entry(folded) {
                    Entry::Occupied(e) => return Err(InsertError::NickInUse(e.get().clone())),
                    Entry::Vacant(n) => {
                        n.insert(user.uid.clone());
                    }
                }
                slot.insert(user);
                Ok(())
            }
        }
    }

    /// Change a user's nick and nick timestamp. Returns the old nick.
    pub fn rename_user(&self, uid: &str, new_nick: &str, nick_ts: i64) -> Result<String, RenameError> {
        let mut user = self.users.get_mut(uid).ok_or(RenameError::NoSuchUser)?;
        let old_folded = irc_to_lower(&user.nick);
        let new_folded = irc_to_lower(new_nick);
        if old_folded != new_folded {
            match self.nicks.entry(new_folded) {
                Entry::Occupied(e) if e.get() != uid => {
                    return Err(RenameError::NickInUse(e.get().clone()));
                }
                Entry::Occupied(_) => {}
                Entry::Vacant(slot) => {
                    slot.insert(uid.to_string());
                }
            }
            self.nicks.remove_if(&old_folded, |_, holder| holder == uid);
        }
        user.nick_ts = nick_ts;
        Ok(std::mem::replace(&mut user.nick, new_nick.to_string()))
    }

    /// Remove a user from every table. The returned record still lists
    /// the channels it was in.
    pub fn remove_user(&self, uid: &str) -> Option<User> {
        let (_, user) = self.users.remove(uid)?;
        self.nicks
            .remove_if(&irc_to_lower(&user.nick), |_, holder| holder == uid);
        for folded in &user.channels {
            self.drop_member(folded, uid);
        }
        Some(user)
    }

    pub fn user(&self, uid: &str) -> Option<User> {
        self.users.get(uid).map(|u| u.clone())
    }

    pub fn uid_for_nick(&self, nick: &str) -> Option<Uid> {
        self.nicks.get(&irc_to_lower(nick)).map(|u| u.clone())
    }

    pub fn with_user_mut<R>(&self, uid: &str, f: impl FnOnce(&mut User) -> R) -> Option<R> {
        self.users.get_mut(uid).map(|mut u| f(&mut u))
    }

    /// Uids of users owned by any of `sids`.
    pub fn users_owned_by(&self, sids: &HashSet<ServerId>) -> Vec<Uid> {
        self.users
            .iter()
            .filter(|u| u.remote_sid.as_ref().is_some_and(|s| sids.contains(s)))
            .map(|u| u.uid.clone())
            .collect()
    }

    pub fn snapshot_users(&self) -> Vec<User> {
        self.users.iter().map(|u| u.clone()).collect()
    }

    pub fn user_count(&self) -> usize {
        self.users.len()
    }

    // ------------------------------------------------------------------
    // Channels
    // ------------------------------------------------------------------

    /// Create the channel if needed and reconcile its creation time.
    ///
    /// Returns `(created, reset)`.
    pub fn ensure_channel(&self, name: &str, ts: i64) -> (bool, bool) {
        let mut created = false;
        let mut chan = self.channels.entry(irc_to_lower(name)).or_insert_with(|| {
            created = true;
            Channel::new(name, ts)
        });
        let reset = !created && channel_ts_verdict(chan.created_ts, ts) == TsVerdict::ResetLocal;
        if reset {
            chan.reset_to(ts);
        }
        (created, reset)
    }

    /// Add `uid` to a channel, creating it with `ts` if it does not exist.
    ///
    /// Membership is always honored regardless of how the timestamps
    /// compare. Returns `None` if the user is unknown.
    pub fn join(&self, name: &str, uid: &str, ts: i64) -> Option<JoinOutcome> {
        if !self.users.contains_key(uid) {
            return None;
        }
        let folded = irc_to_lower(name);
        let (created, reset) = self.ensure_channel(name, ts);
        let outcome = {
            let mut chan = self.channels.get_mut(&folded)?;
            let newly_joined = !chan.members.contains_key(uid);
            chan.members.entry(uid.to_string()).or_insert(Privilege::None);
            JoinOutcome {
                created,
                reset,
                newly_joined,
                created_ts: chan.created_ts,
            }
        };
        let tracked = self
            .with_user_mut(uid, |u| {
                u.channels.insert(folded.clone());
            })
            .is_some();
        if !tracked {
            // The user quit while we were joining it.
            self.drop_member(&folded, uid);
            return None;
        }
        Some(outcome)
    }

    /// Remove `uid` from a channel. Returns false if it was not a member.
    pub fn part(&self, name: &str, uid: &str) -> bool {
        let folded = irc_to_lower(name);
        let was_member = self.drop_member(&folded, uid);
        self.with_user_mut(uid, |u| {
            u.channels.remove(&folded);
        });
        was_member
    }

    fn drop_member(&self, folded: &str, uid: &str) -> bool {
        let (was_member, empty) = match self.channels.get_mut(folded) {
            Some(mut chan) => (chan.members.remove(uid).is_some(), chan.is_empty()),
            None => (false, false),
        };
        if empty {
            self.channels.remove_if(folded, |_, chan| chan.is_empty());
        }
        was_member
    }

    pub fn channel(&self, name: &str) -> Option<Channel> {
        self.channels.get(&irc_to_lower(name)).map(|c| c.clone())
    }

    pub fn with_channel_mut<R>(&self, name: &str, f: impl FnOnce(&mut Channel) -> R) -> Option<R> {
        self.channels
            .get_mut(&irc_to_lower(name))
            .map(|mut c| f(&mut c))
    }

    pub fn snapshot_channels(&self) -> Vec<Channel> {
        self.channels.iter().map(|c| c.clone()).collect()
    }

    /// Members of `name` connected to this server.
    pub fn local_members(&self, name: &str) -> Vec<Uid> {
        let members: Vec<Uid> = match self.channels.get(&irc_to_lower(name)) {
            Some(chan) => chan.members.keys().cloned().collect(),
            None => return Vec::new(),
        };
        members
            .into_iter()
            .filter(|uid| self.users.get(uid).is_some_and(|u| !u.is_remote()))
            .collect()
    }

    pub fn is_member(&self, name: &str, uid: &str) -> bool {
        self.channels
            .get(&irc_to_lower(name))
            .is_some_and(|c| c.members.contains_key(uid))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn matrix() -> Matrix {
        Matrix::new(ServerIdentity {
            sid: ServerId::parse("001").unwrap(),
            name: "a.test".to_string(),
            description: "A".to_string(),
        })
    }

    fn user(uid: &str, nick: &str, remote: Option<&str>) -> User {
        User {
            uid: uid.to_string(),
            nick: nick.to_string(),
            nick_ts: 100,
            ident: "u".to_string(),
            host: "h".to_string(),
            realname: "R".to_string(),
            secure: false,
            invisible: false,
            remote_sid: remote.map(|s| ServerId::parse(s).unwrap()),
            channels: HashSet::new(),
        }
    }

    #[test]
    fn insert_rejects_taken_uid_and_nick() {
        let m = matrix();
        m.insert_user(user("001AAAAAA", "Bob", None)).unwrap();
        assert_eq!(
            m.insert_user(user("001AAAAAA", "other", None)),
            Err(InsertError::UidExists("001AAAAAA".to_string()))
        );
        assert_eq!(
            m.insert_user(user("002AAAAAA", "BOB", Some("002"))),
            Err(InsertError::NickInUse("001AAAAAA".to_string()))
        );
        assert_eq!(m.user_count(), 1);
        assert_eq!(m.uid_for_nick("bob").as_deref(), Some("001AAAAAA"));
    }

    #[test]
    fn rename_moves_the_nick_index() {
        let m = matrix();
        m.insert_user(user("001AAAAAA", "bob", None)).unwrap();
        m.insert_user(user("001AAAAAB", "carol", None)).unwrap();

        assert_eq!(m.rename_user("001AAAAAA", "robert", 200).unwrap(), "bob");
        assert!(m.uid_for_nick("bob").is_none());
        assert_eq!(m.user("001AAAAAA").unwrap().nick_ts, 200);

        assert_eq!(
            m.rename_user("001AAAAAA", "Carol", 300),
            Err(RenameError::NickInUse("001AAAAAB".to_string()))
        );
        // Case-only change keeps the index entry.
        m.rename_user("001AAAAAA", "Robert", 400).unwrap();
        assert_eq!(m.uid_for_nick("ROBERT").as_deref(), Some("001AAAAAA"));
    }

    #[test]
    fn join_creates_and_part_removes_empty_channels() {
        let m = matrix();
        m.insert_user(user("001AAAAAA", "bob", None)).unwrap();

        let outcome = m.join("#Rust", "001AAAAAA", 50).unwrap();
        assert!(outcome.created && outcome.newly_joined);
        assert!(!m.join("#rust", "001AAAAAA", 50).unwrap().newly_joined);
        assert!(m.user("001AAAAAA").unwrap().channels.contains("#rust"));

        assert!(m.part("#RUST", "001AAAAAA"));
        assert!(m.channel("#rust").is_none());
        assert!(!m.part("#rust", "001AAAAAA"));
    }

    #[test]
    fn older_join_resets_channel_newer_join_keeps_it() {
        let m = matrix();
        m.insert_user(user("001AAAAAA", "bob", None)).unwrap();
        m.insert_user(user("002AAAAAA", "eve", Some("002"))).unwrap();
        m.join("#a", "001AAAAAA", 100).unwrap();
        m.with_channel_mut("#a", |c| {
            c.apply_mode_delta("+nt");
            c.members.insert("001AAAAAA".to_string(), Privilege::Op);
        });

        let newer = m.join("#a", "002AAAAAA", 150).unwrap();
        assert!(!newer.reset);
        assert_eq!(newer.created_ts, 100);

        let older = m.join("#a", "002AAAAAA", 90).unwrap();
        assert!(older.reset);
        let chan = m.channel("#a").unwrap();
        assert_eq!(chan.created_ts, 90);
        assert_eq!(chan.mode_string(), "+");
        assert_eq!(chan.members.get("001AAAAAA"), Some(&Privilege::None));
    }

    #[test]
    fn remove_user_cleans_membership() {
        let m = matrix();
        m.insert_user(user("002AAAAAA", "eve", Some("002"))).unwrap();
        m.insert_user(user("001AAAAAA", "bob", None)).unwrap();
        m.join("#a", "002AAAAAA", 1).unwrap();
        m.join("#a", "001AAAAAA", 1).unwrap();
        m.join("#b", "002AAAAAA", 1).unwrap();

        let gone = m.remove_user("002AAAAAA").unwrap();
        assert_eq!(gone.channels.len(), 2);
        assert!(m.channel("#b").is_none());
        assert_eq!(m.local_members("#a"), vec!["001AAAAAA".to_string()]);
        assert!(m.uid_for_nick("eve").is_none());
    }

    #[test]
    fn users_owned_by_filters_remote_sids() {
        let m = matrix();
        m.insert_user(user("001AAAAAA", "bob", None)).unwrap();
        m.insert_user(user("002AAAAAA", "eve", Some("002"))).unwrap();
        m.insert_user(user("003AAAAAA", "mal", Some("003"))).unwrap();
        let sids: HashSet<ServerId> = [ServerId::parse("003").unwrap()].into();
        assert_eq!(m.users_owned_by(&sids), vec!["003AAAAAA".to_string()]);
    }

    #[test]
    fn unknown_user_cannot_join() {
        let m = matrix();
        assert!(m.join("#a", "009AAAAAA", 1).is_none());
        assert!(m.channel("#a").is_none());
    }
}
