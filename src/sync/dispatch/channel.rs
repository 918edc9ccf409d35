//! Channel records: JOIN, PART, their forced variants, and the
//! TS-gated CHAN / MODECH / CHANMETA / BAN / MEMBER / TOPIC family.

use super::{Outbound, is_channel_name, malformed, ts_arg};
use crate::error::LinkError;
use crate::metrics;
use crate::state::{Channel, ListEntry, ListKind, Privilege, Topic};
use crate::sync::conflict::{TsVerdict, channel_ts_verdict};
use crate::sync::link::ConnId;
use crate::sync::manager::SyncManager;
use slirc_link_proto::Line;
use slirc_link_proto::command::{BANDEL, JOIN, PART};
use tracing::{debug, info, warn};

impl SyncManager {
    /// Join `uid` to `name` and tell observers. Returns false if the
    /// user is unknown.
    pub(crate) fn apply_join(&self, name: &str, uid: &str, ts: i64) -> bool {
        let Some(outcome) = self.matrix.join(name, uid, ts) else {
            return false;
        };
        if outcome.reset {
            self.note_channel_reset(name, outcome.created_ts);
        }
        if outcome.newly_joined {
            self.observer.user_joined(name, uid);
        }
        true
    }

    fn note_channel_reset(&self, name: &str, created_ts: i64) {
        info!(channel = %name, created_ts, "Older channel creation won; local state reset");
        metrics::record_collision("channel", "reset");
        self.observer.channel_reset(name, created_ts);
    }

    /// Run `f` on the channel if a record stamped `ts` may change it.
    ///
    /// A newer `ts` leaves the channel untouched and yields `None`; an
    /// older one resets the channel first.
    fn with_channel_ts<R>(&self, name: &str, ts: i64, f: impl FnOnce(&mut Channel) -> R) -> Option<R> {
        let (verdict, result) = self.matrix.with_channel_mut(name, |chan| {
            let verdict = channel_ts_verdict(chan.created_ts, ts);
            match verdict {
                TsVerdict::KeepLocal => (verdict, None),
                TsVerdict::ResetLocal => {
                    chan.reset_to(ts);
                    (verdict, Some(f(chan)))
                }
                TsVerdict::Apply => (verdict, Some(f(chan))),
            }
        })?;
        match verdict {
            TsVerdict::KeepLocal => debug!(channel = %name, ts, "Ignoring record from a newer channel creation"),
            TsVerdict::ResetLocal => self.note_channel_reset(name, ts),
            TsVerdict::Apply => {}
        }
        result
    }

    /// `JOIN <id> <origin> <uid> <channel> <chants>`
    pub(super) fn handle_join(&self, conn: ConnId, line: &Line) -> Result<Vec<Outbound>, LinkError> {
        let (Some(uid), Some(name), Some(ts)) = (line.arg(2), line.arg(3), ts_arg(line, 4)) else {
            return Ok(malformed(line));
        };
        if !is_channel_name(name) {
            return Ok(malformed(line));
        }
        if !self.apply_join(name, uid, ts) {
            debug!(%conn, uid = %uid, channel = %name, "JOIN for unknown user");
            return Ok(Vec::new());
        }
        Ok(vec![Outbound::relay(line, conn)])
    }

    /// `SVSJOIN <id> <origin> <uid> <channel>`
    pub(super) fn handle_svsjoin(&self, conn: ConnId, line: &Line) -> Result<Vec<Outbound>, LinkError> {
        let (Some(uid), Some(name)) = (line.arg(2), line.arg(3)) else {
            return Ok(malformed(line));
        };
        let Some(user) = self.matrix.user(uid) else {
            warn!(%conn, uid = %uid, "SVSJOIN for unknown user; dropping");
            return Ok(Vec::new());
        };
        match &user.remote_sid {
            Some(owner) => Ok(self.forward_directed(conn, line, owner)),
            None => Ok(self.apply_svsjoin(uid, name)),
        }
    }

    /// Join a local user and announce it with an ordinary `JOIN`.
    pub(crate) fn apply_svsjoin(&self, uid: &str, name: &str) -> Vec<Outbound> {
        if !is_channel_name(name) {
            return Vec::new();
        }
        let ts = self.matrix.channel(name).map_or_else(Self::now, |c| c.created_ts);
        if !self.apply_join(name, uid, ts) {
            return Vec::new();
        }
        let ts = self.matrix.channel(name).map_or(ts, |c| c.created_ts);
        vec![Outbound::user_event(self.join_line(uid, name, ts))]
    }

    pub(crate) fn join_line(&self, uid: &str, name: &str, ts: i64) -> Line {
        self.originate(JOIN)
            .with_arg(uid)
            .with_arg(name)
            .with_arg(ts.to_string())
    }

    pub(crate) fn part_line(&self, uid: &str, name: &str, reason: &str) -> Line {
        self.originate(PART)
            .with_arg(uid)
            .with_arg(name)
            .with_trailing(reason)
    }

    /// Remove `uid` from `name` and tell observers if it was there.
    pub(crate) fn apply_part(&self, name: &str, uid: &str, reason: &str) -> bool {
        let was_member = self.matrix.part(name, uid);
        if was_member {
            self.observer.user_parted(name, uid, reason);
        }
        was_member
    }

    /// `PART <id> <origin> <uid> <channel> :<reason>`
    pub(super) fn handle_part(&self, conn: ConnId, line: &Line) -> Result<Vec<Outbound>, LinkError> {
        let (Some(uid), Some(name)) = (line.arg(2), line.arg(3)) else {
            return Ok(malformed(line));
        };
        let reason = line.text(4).unwrap_or_default();
        if !self.apply_part(name, uid, reason) {
            debug!(%conn, uid = %uid, channel = %name, "PART for a non-member");
        }
        Ok(vec![Outbound::relay(line, conn)])
    }

    /// `SVSPART <id> <origin> <uid> <channel> :<reason>`
    pub(super) fn handle_svspart(&self, conn: ConnId, line: &Line) -> Result<Vec<Outbound>, LinkError> {
        let (Some(uid), Some(name)) = (line.arg(2), line.arg(3)) else {
            return Ok(malformed(line));
        };
        let reason = line.text(4).unwrap_or_default();
        let Some(user) = self.matrix.user(uid) else {
            warn!(%conn, uid = %uid, "SVSPART for unknown user; dropping");
            return Ok(Vec::new());
        };
        match &user.remote_sid {
            Some(owner) => Ok(self.forward_directed(conn, line, owner)),
            None => Ok(self.apply_svspart(uid, name, reason)),
        }
    }

    /// Part a local user and announce it with an ordinary `PART`.
    pub(crate) fn apply_svspart(&self, uid: &str, name: &str, reason: &str) -> Vec<Outbound> {
        if !self.apply_part(name, uid, reason) {
            return Vec::new();
        }
        vec![Outbound::user_event(self.part_line(uid, name, reason))]
    }

    /// `CHAN <channel> <chants> :<uid> <uid> ...`
    ///
    /// Membership is honored whatever the timestamps say.
    pub(super) fn handle_chan(&self, conn: ConnId, line: &Line) -> Result<Vec<Outbound>, LinkError> {
        let (Some(name), Some(ts)) = (line.arg(0), ts_arg(line, 1)) else {
            return Ok(malformed(line));
        };
        if !is_channel_name(name) {
            return Ok(malformed(line));
        }
        let members: Vec<&str> = match &line.trailing {
            Some(text) => text.split(' ').filter(|s| !s.is_empty()).collect(),
            None => line.args[2..].iter().map(String::as_str).collect(),
        };

        let mut joined = 0usize;
        for uid in &members {
            if self.apply_join(name, uid, ts) {
                joined += 1;
            } else {
                debug!(%conn, uid = %uid, channel = %name, "CHAN lists an unknown user");
            }
        }
        if joined == 0 {
            if self.matrix.channel(name).is_none() {
                return Ok(Vec::new());
            }
            let (_, reset) = self.matrix.ensure_channel(name, ts);
            if reset {
                self.note_channel_reset(name, ts);
            }
        }
        Ok(vec![Outbound::relay(line, conn)])
    }

    /// `MODECH <channel> <chants> <+flags>`
    pub(super) fn handle_modech(&self, conn: ConnId, line: &Line) -> Result<Vec<Outbound>, LinkError> {
        let (Some(name), Some(ts), Some(delta)) = (line.arg(0), ts_arg(line, 1), line.arg(2)) else {
            return Ok(malformed(line));
        };
        match self.with_channel_ts(name, ts, |chan| chan.apply_mode_delta(delta)) {
            Some(_) => Ok(vec![Outbound::relay(line, conn)]),
            None => Ok(Vec::new()),
        }
    }

    /// `CHANMETA <channel> <chants> <key|*> <limit|0>`
    pub(super) fn handle_chanmeta(&self, conn: ConnId, line: &Line) -> Result<Vec<Outbound>, LinkError> {
        let (Some(name), Some(ts), Some(key), Some(limit)) =
            (line.arg(0), ts_arg(line, 1), line.arg(2), line.arg(3))
        else {
            return Ok(malformed(line));
        };
        let Ok(limit) = limit.parse::<u32>() else {
            return Ok(malformed(line));
        };
        let applied = self.with_channel_ts(name, ts, |chan| {
            chan.key = (key != "*").then(|| key.to_string());
            chan.limit = (limit != 0).then_some(limit);
        });
        match applied {
            Some(()) => Ok(vec![Outbound::relay(line, conn)]),
            None => Ok(Vec::new()),
        }
    }

    /// `BAN <channel> <chants> <b|e> <mask> <setter> <setts>` and
    /// `BANDEL <channel> <chants> <b|e> <mask>`
    pub(super) fn handle_ban(&self, conn: ConnId, line: &Line) -> Result<Vec<Outbound>, LinkError> {
        let (Some(name), Some(ts), Some(kind), Some(mask)) =
            (line.arg(0), ts_arg(line, 1), line.arg(2), line.arg(3))
        else {
            return Ok(malformed(line));
        };
        let Some(kind) = ListKind::from_token(kind) else {
            return Ok(malformed(line));
        };

        let changed = if line.command == BANDEL {
            self.with_channel_ts(name, ts, |chan| chan.remove_list_entry(kind, mask))
        } else {
            let entry = ListEntry {
                mask: mask.to_string(),
                set_by: line.arg(4).unwrap_or("*").to_string(),
                set_at: ts_arg(line, 5).unwrap_or(0),
            };
            self.with_channel_ts(name, ts, |chan| chan.add_list_entry(kind, entry))
        };
        match changed {
            Some(_) => Ok(vec![Outbound::relay(line, conn)]),
            None => Ok(Vec::new()),
        }
    }

    /// `MEMBER <channel> <chants> <uid> <privilege>`
    pub(super) fn handle_member(&self, conn: ConnId, line: &Line) -> Result<Vec<Outbound>, LinkError> {
        let (Some(name), Some(ts), Some(uid), Some(token)) =
            (line.arg(0), ts_arg(line, 1), line.arg(2), line.arg(3))
        else {
            return Ok(malformed(line));
        };
        let Some(privilege) = Privilege::from_token(token) else {
            return Ok(malformed(line));
        };
        let applied = self.with_channel_ts(name, ts, |chan| match chan.members.get_mut(uid) {
            Some(slot) => {
                *slot = privilege;
                true
            }
            None => false,
        });
        match applied {
            Some(true) => Ok(vec![Outbound::relay(line, conn)]),
            Some(false) => {
                debug!(%conn, uid = %uid, channel = %name, "MEMBER for a non-member");
                Ok(Vec::new())
            }
            None => Ok(Vec::new()),
        }
    }

    /// `TOPIC <id> <origin> <channel> <chants> <topicts> <setter> :<text>`
    pub(super) fn handle_topic(&self, conn: ConnId, line: &Line) -> Result<Vec<Outbound>, LinkError> {
        Ok(self.topic_record(conn, line, 2))
    }

    /// `TOPICSET <channel> <chants> <topicts> <setter> :<text>`
    pub(super) fn handle_topicset(&self, conn: ConnId, line: &Line) -> Result<Vec<Outbound>, LinkError> {
        Ok(self.topic_record(conn, line, 0))
    }

    /// Shared body of TOPIC and TOPICSET; `at` is the index of the channel
    /// argument.
    fn topic_record(&self, conn: ConnId, line: &Line, at: usize) -> Vec<Outbound> {
        let (Some(name), Some(ts), Some(topic_ts), Some(setter)) =
            (line.arg(at), ts_arg(line, at + 1), ts_arg(line, at + 2), line.arg(at + 3))
        else {
            return malformed(line);
        };
        let topic = Topic {
            text: line.text(at + 4).unwrap_or_default().to_string(),
            set_by: setter.to_string(),
            set_at: topic_ts,
        };
        if !self.apply_topic(name, ts, topic) {
            return Vec::new();
        }
        vec![Outbound::relay(line, conn)]
    }

    /// Store `topic` if it is at least as recent as the local one. Empty
    /// text clears the topic.
    pub(crate) fn apply_topic(&self, name: &str, ts: i64, topic: Topic) -> bool {
        let applied = self.with_channel_ts(name, ts, |chan| {
            if chan.topic.as_ref().is_some_and(|t| t.set_at > topic.set_at) {
                return None;
            }
            chan.topic = (!topic.text.is_empty()).then(|| topic.clone());
            Some(topic)
        });
        match applied.flatten() {
            Some(topic) => {
                self.observer.topic_changed(name, &topic);
                true
            }
            None => false,
        }
    }
}
