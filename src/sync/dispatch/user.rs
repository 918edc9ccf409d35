//! User records: USER, NICK, SVSNICK, UMODE, QUIT, KILL.

use super::{Outbound, malformed, ts_arg};
use crate::error::LinkError;
use crate::metrics;
use crate::state::{InsertError, RenameError, User};
use crate::sync::conflict::{NickClaim, Winner, collision_nick, nick_is_claimable, resolve_nick};
use crate::sync::link::ConnId;
use crate::sync::manager::SyncManager;
use slirc_link_proto::command::{NICK, QUIT};
use slirc_link_proto::{Line, ServerId};
use std::collections::HashSet;
use tracing::{debug, info, warn};

/// Bound on re-resolving a nick that keeps being re-taken concurrently.
const MAX_COLLISION_ROUNDS: usize = 4;

impl SyncManager {
    /// `USER <uid> <nick> <nickts> <ident> <host> <secure> <+modes> :<realname>`
    pub(super) fn handle_user(&self, conn: ConnId, line: &Line) -> Result<Vec<Outbound>, LinkError> {
        let (Some(uid), Some(nick), Some(nick_ts), Some(ident), Some(host), Some(secure), Some(modes)) = (
            line.arg(0),
            line.arg(1),
            ts_arg(line, 2),
            line.arg(3),
            line.arg(4),
            line.arg(5),
            line.arg(6),
        ) else {
            return Ok(malformed(line));
        };
        let Some(owner) = ServerId::owner_of(uid) else {
            return Ok(malformed(line));
        };
        if &owner == self.local_sid() {
            return Err(LinkError::UidCollision(uid.to_string()));
        }
        if self.is_repeated_user(conn, uid, &owner) {
            debug!(%conn, uid = %uid, "Repeated USER from the same link; ignoring");
            return Ok(Vec::new());
        }

        let mut user = User {
            uid: uid.to_string(),
            nick: nick.to_string(),
            nick_ts,
            ident: ident.to_string(),
            host: host.to_string(),
            realname: line.text(7).unwrap_or_default().to_string(),
            secure: secure == "1",
            invisible: false,
            remote_sid: Some(owner),
            channels: HashSet::new(),
        };
        user.apply_umode(modes);

        let mut renames = Vec::new();
        if !nick_is_claimable(uid, nick) {
            warn!(%conn, uid = %uid, nick = %nick, "USER with a reserved nick; using the collision nick");
            user.nick = collision_nick(uid);
            renames.push(Outbound::user_event(self.nick_line(uid, &user.nick, nick_ts)));
        }
        let Some(user) = self.insert_remote_user(user, &mut renames)? else {
            return Ok(Vec::new());
        };
        debug!(%conn, uid = %user.uid, nick = %user.nick, "User introduced");
        self.observer.user_logon(&user);

        let mut outs = vec![Outbound::relay(line, conn)];
        outs.extend(renames);
        Ok(outs)
    }

    /// A user announced twice over the link it is routed through.
    ///
    /// A link registered while a user was being introduced elsewhere gets
    /// that user in its burst and again from its queue. The same uid from
    /// another owner or another link is a real collision.
    fn is_repeated_user(&self, conn: ConnId, uid: &str, owner: &ServerId) -> bool {
        self.matrix
            .user(uid)
            .is_some_and(|existing| existing.remote_sid.as_ref() == Some(owner))
            && self.routing.route(owner) == Some(conn)
    }

    fn insert_remote_user(&self, mut user: User, outs: &mut Vec<Outbound>) -> Result<Option<User>, LinkError> {
        for _ in 0..MAX_COLLISION_ROUNDS {
            let holder = match self.matrix.insert_user(user.clone()) {
                Ok(()) => return Ok(Some(user)),
                Err(InsertError::UidExists(uid)) => return Err(LinkError::UidCollision(uid)),
                Err(InsertError::NickInUse(holder)) => holder,
            };
            let sid = user.owner(self.local_sid()).clone();
            let claim = NickClaim {
                uid: &user.uid,
                nick_ts: user.nick_ts,
                sid: &sid,
            };
            if self.settle_collision(&claim, &user.nick, &holder, outs) == Winner::Existing {
                user.nick = collision_nick(&user.uid);
                outs.push(Outbound::user_event(self.nick_line(&user.uid, &user.nick, user.nick_ts)));
            }
        }
        warn!(uid = %user.uid, nick = %user.nick, "Nick kept colliding; dropping user record");
        Ok(None)
    }

    /// Arbitrate `claim` on `nick` against its current `holder`.
    ///
    /// When the claim wins the holder is moved to its collision nick here
    /// and the rename is queued in `outs`.
    fn settle_collision(&self, claim: &NickClaim<'_>, nick: &str, holder: &str, outs: &mut Vec<Outbound>) -> Winner {
        let Some(existing) = self.matrix.user(holder) else {
            // Holder vanished in the meantime; just retry.
            return Winner::Incoming;
        };
        let existing_claim = NickClaim {
            uid: &existing.uid,
            nick_ts: existing.nick_ts,
            sid: existing.owner(self.local_sid()),
        };
        let winner = resolve_nick(claim, &existing_claim);
        info!(
            nick = %nick,
            incoming = %claim.uid,
            existing = %existing.uid,
            winner = ?winner,
            "Nick collision"
        );
        match winner {
            Winner::Incoming => {
                metrics::record_collision("nick", "incoming_wins");
                self.force_rename(&existing.uid, &collision_nick(&existing.uid), existing.nick_ts, outs);
            }
            Winner::Existing => metrics::record_collision("nick", "existing_wins"),
        }
        winner
    }

    /// Move `uid` to `nick` and queue the `NICK` to every user-sync link.
    /// Returns whether the rename took place.
    pub(crate) fn force_rename(&self, uid: &str, nick: &str, nick_ts: i64, outs: &mut Vec<Outbound>) -> bool {
        match self.matrix.rename_user(uid, nick, nick_ts) {
            Ok(old) => {
                self.notify_rename(uid, &old, nick);
                outs.push(Outbound::user_event(self.nick_line(uid, nick, nick_ts)));
                true
            }
            Err(e) => {
                warn!(uid = %uid, nick = %nick, error = ?e, "Forced rename failed");
                false
            }
        }
    }

    /// Watchers see the old nick log off and the new one log on.
    pub(crate) fn notify_rename(&self, uid: &str, old: &str, new: &str) {
        let Some(user) = self.matrix.user(uid) else {
            return;
        };
        let mut before = user.clone();
        before.nick = old.to_string();
        self.observer.user_logoff(&before);
        self.observer.nick_changed(uid, old, new);
        self.observer.user_logon(&user);
    }

    pub(crate) fn nick_line(&self, uid: &str, nick: &str, nick_ts: i64) -> Line {
        self.originate(NICK)
            .with_arg(uid)
            .with_arg(nick)
            .with_arg(nick_ts.to_string())
    }

    /// `NICK <id> <origin> <uid> <nick> <nickts>`
    pub(super) fn handle_nick(&self, conn: ConnId, line: &Line) -> Result<Vec<Outbound>, LinkError> {
        let (Some(uid), Some(nick), Some(nick_ts)) = (line.arg(2), line.arg(3), ts_arg(line, 4)) else {
            return Ok(malformed(line));
        };
        let Some(user) = self.matrix.user(uid) else {
            debug!(%conn, uid = %uid, "NICK for unknown user");
            return Ok(Vec::new());
        };

        if !user.is_remote() {
            // Peers only ever move our users onto their collision nick.
            if nick != user.uid {
                warn!(%conn, uid = %uid, nick = %nick, "Peer sent NICK for a local user; ignoring");
                return Ok(Vec::new());
            }
            if user.nick == nick {
                return Ok(Vec::new());
            }
            let mut outs = Vec::new();
            self.force_rename(uid, nick, nick_ts, &mut outs);
            return Ok(outs);
        }

        if !nick_is_claimable(uid, nick) {
            warn!(%conn, uid = %uid, nick = %nick, "NICK to a reserved nick; using the collision nick");
            let mut outs = Vec::new();
            self.force_rename(uid, &collision_nick(uid), nick_ts, &mut outs);
            return Ok(outs);
        }

        let mut renames = Vec::new();
        if !self.apply_nick(&user, nick, nick_ts, &mut renames) {
            return Ok(renames);
        }
        let mut outs = vec![Outbound::relay(line, conn)];
        outs.extend(renames);
        Ok(outs)
    }

    /// Rename `user` to `nick`, resolving a collision if it is taken.
    ///
    /// Returns whether `user` now holds `nick`. When it lost, it has been
    /// moved to its collision nick and the rename is queued in `outs`.
    pub(crate) fn apply_nick(&self, user: &User, nick: &str, nick_ts: i64, outs: &mut Vec<Outbound>) -> bool {
        let sid = user.owner(self.local_sid()).clone();
        for _ in 0..MAX_COLLISION_ROUNDS {
            let holder = match self.matrix.rename_user(&user.uid, nick, nick_ts) {
                Ok(old) => {
                    self.notify_rename(&user.uid, &old, nick);
                    return true;
                }
                Err(RenameError::NoSuchUser) => return false,
                Err(RenameError::NickInUse(holder)) => holder,
            };
            let claim = NickClaim {
                uid: &user.uid,
                nick_ts,
                sid: &sid,
            };
            if self.settle_collision(&claim, nick, &holder, outs) == Winner::Existing {
                self.force_rename(&user.uid, &collision_nick(&user.uid), nick_ts, outs);
                return false;
            }
        }
        warn!(uid = %user.uid, nick = %nick, "Nick kept colliding; leaving user unrenamed");
        false
    }

    /// `SVSNICK <id> <origin> <uid> <nick>`
    pub(super) fn handle_svsnick(&self, conn: ConnId, line: &Line) -> Result<Vec<Outbound>, LinkError> {
        let (Some(uid), Some(nick)) = (line.arg(2), line.arg(3)) else {
            return Ok(malformed(line));
        };
        let Some(user) = self.matrix.user(uid) else {
            warn!(%conn, uid = %uid, "SVSNICK for unknown user; dropping");
            return Ok(Vec::new());
        };
        match &user.remote_sid {
            Some(owner) => Ok(self.forward_directed(conn, line, owner)),
            None => Ok(self.apply_svsnick(&user.uid, nick)),
        }
    }

    /// Force a local user onto `nick` and announce it. A taken or reserved
    /// nick falls back to the collision nick.
    pub(crate) fn apply_svsnick(&self, uid: &str, nick: &str) -> Vec<Outbound> {
        let nick_ts = Self::now();
        let nick = if nick_is_claimable(uid, nick) { nick } else { uid };
        let target = match self.matrix.rename_user(uid, nick, nick_ts) {
            Ok(old) => {
                self.notify_rename(uid, &old, nick);
                nick.to_string()
            }
            Err(RenameError::NickInUse(_)) => {
                let fallback = collision_nick(uid);
                match self.matrix.rename_user(uid, &fallback, nick_ts) {
                    Ok(old) => {
                        self.notify_rename(uid, &old, &fallback);
                        fallback
                    }
                    Err(_) => return Vec::new(),
                }
            }
            Err(RenameError::NoSuchUser) => return Vec::new(),
        };
        vec![Outbound::user_event(self.nick_line(uid, &target, nick_ts))]
    }

    /// `UMODE <id> <origin> <uid> <delta>`
    pub(super) fn handle_umode(&self, conn: ConnId, line: &Line) -> Result<Vec<Outbound>, LinkError> {
        let (Some(uid), Some(delta)) = (line.arg(2), line.arg(3)) else {
            return Ok(malformed(line));
        };
        match self.matrix.user(uid) {
            None => {
                debug!(%conn, uid = %uid, "UMODE for unknown user");
                return Ok(Vec::new());
            }
            Some(user) if !user.is_remote() => {
                warn!(%conn, uid = %uid, "Peer sent UMODE for a local user; ignoring");
                return Ok(Vec::new());
            }
            Some(_) => {}
        }
        if self.matrix.with_user_mut(uid, |u| u.apply_umode(delta)).is_none() {
            return Ok(Vec::new());
        }
        Ok(vec![Outbound::relay(line, conn)])
    }

    /// `QUIT <id> <origin> <uid> :<reason>`
    pub(super) fn handle_quit(&self, conn: ConnId, line: &Line) -> Result<Vec<Outbound>, LinkError> {
        let Some(uid) = line.arg(2) else {
            return Ok(malformed(line));
        };
        let reason = line.text(3).unwrap_or_default();
        match self.matrix.user(uid) {
            None => {
                debug!(%conn, uid = %uid, "QUIT for unknown user");
                return Ok(Vec::new());
            }
            Some(user) if !user.is_remote() => {
                warn!(%conn, uid = %uid, "Peer sent QUIT for a local user; ignoring");
                return Ok(Vec::new());
            }
            Some(_) => {}
        }
        self.remove_and_notify(uid, reason);
        Ok(vec![Outbound::relay(line, conn)])
    }

    /// `KILL <id> <origin> <uid> :<reason>`
    pub(super) fn handle_kill(&self, conn: ConnId, line: &Line) -> Result<Vec<Outbound>, LinkError> {
        let Some(uid) = line.arg(2) else {
            return Ok(malformed(line));
        };
        let reason = line.text(3).unwrap_or_default();
        let Some(user) = self.matrix.user(uid) else {
            warn!(%conn, uid = %uid, "KILL for unknown user; dropping");
            return Ok(Vec::new());
        };
        match &user.remote_sid {
            Some(owner) => Ok(self.forward_directed(conn, line, owner)),
            None => Ok(self.apply_kill(uid, reason)),
        }
    }

    /// Disconnect a local user and announce its departure.
    pub(crate) fn apply_kill(&self, uid: &str, reason: &str) -> Vec<Outbound> {
        let quit_reason = format!("Killed ({reason})");
        self.observer.disconnect_local(uid, &quit_reason);
        match self.remove_and_notify(uid, &quit_reason) {
            Some(_) => vec![Outbound::user_event(
                self.originate(QUIT).with_arg(uid).with_trailing(quit_reason),
            )],
            None => Vec::new(),
        }
    }

    /// Remove a user and tell watchers and co-members.
    pub(crate) fn remove_and_notify(&self, uid: &str, reason: &str) -> Option<User> {
        let user = self.matrix.remove_user(uid)?;
        self.observer.user_logoff(&user);
        self.observer.user_quit(&user, reason);
        Some(user)
    }
}
