//! State burst generation.
//!
//! When a link authenticates, each side sends the other its whole view of
//! the network, then `ENDBURST`. The burst is made of the same records live
//! traffic uses, so the receiver applies it through the ordinary dispatcher:
//! - `SERVERLIST` for this server, then every remote server not behind the peer
//! - `USER` for every user not behind the peer (user-sync links only)
//! - per channel: `CHAN`, `MODECH`, `CHANMETA`, `BAN`, `MEMBER`, `TOPICSET`

use crate::state::{Channel, ListEntry, ListKind, Privilege, Topic, User};
use crate::sync::link::ConnId;
use crate::sync::manager::SyncManager;
use slirc_link_proto::Line;
use slirc_link_proto::command::{BAN, CHAN, CHANMETA, ENDBURST, MEMBER, MODECH, SERVERLIST, TOPICSET, USER};
use tracing::debug;

/// Uids per `CHAN` line; keeps lines well under the framing limit.
const CHAN_CHUNK: usize = 40;

pub fn serverlist_line(sid: &str, name: &str, parent: &str, description: &str) -> Line {
    Line::new(SERVERLIST)
        .with_arg(sid)
        .with_arg(name)
        .with_arg(parent)
        .with_trailing(description)
}

pub fn user_line(user: &User) -> Line {
    Line::new(USER)
        .with_arg(user.uid.as_str())
        .with_arg(user.nick.as_str())
        .with_arg(user.nick_ts.to_string())
        .with_arg(user.ident.as_str())
        .with_arg(user.host.as_str())
        .with_arg(if user.secure { "1" } else { "0" })
        .with_arg(user.mode_string())
        .with_trailing(user.realname.as_str())
}

pub fn chan_lines(name: &str, created_ts: i64, uids: &[&str]) -> Vec<Line> {
    uids.chunks(CHAN_CHUNK)
        .map(|chunk| {
            Line::new(CHAN)
                .with_arg(name)
                .with_arg(created_ts.to_string())
                .with_trailing(chunk.join(" "))
        })
        .collect()
}

pub fn ban_line(name: &str, created_ts: i64, kind: ListKind, entry: &ListEntry) -> Line {
    Line::new(BAN)
        .with_arg(name)
        .with_arg(created_ts.to_string())
        .with_arg(kind.token())
        .with_arg(entry.mask.as_str())
        .with_arg(entry.set_by.as_str())
        .with_arg(entry.set_at.to_string())
}

pub fn member_line(name: &str, created_ts: i64, uid: &str, privilege: Privilege) -> Line {
    Line::new(MEMBER)
        .with_arg(name)
        .with_arg(created_ts.to_string())
        .with_arg(uid)
        .with_arg(privilege.token().to_string())
}

pub fn topicset_line(name: &str, created_ts: i64, topic: &Topic) -> Line {
    Line::new(TOPICSET)
        .with_arg(name)
        .with_arg(created_ts.to_string())
        .with_arg(topic.set_at.to_string())
        .with_arg(topic.set_by.as_str())
        .with_trailing(topic.text.as_str())
}

/// Every record describing `chan`, restricted to members in `include`.
///
/// Returns nothing if no member passes the filter: the peer side already
/// knows a channel made only of its own users.
fn channel_records(chan: &Channel, include: impl Fn(&str) -> bool) -> Vec<Line> {
    let mut uids: Vec<&str> = chan
        .members
        .keys()
        .map(String::as_str)
        .filter(|uid| include(uid))
        .collect();
    if uids.is_empty() {
        return Vec::new();
    }
    uids.sort_unstable();

    let name = chan.name.as_str();
    let ts = chan.created_ts;
    let mut lines = chan_lines(name, ts, &uids);

    if !chan.modes.is_empty() {
        lines.push(
            Line::new(MODECH)
                .with_arg(name)
                .with_arg(ts.to_string())
                .with_arg(chan.mode_string()),
        );
    }
    if chan.key.is_some() || chan.limit.is_some() {
        lines.push(
            Line::new(CHANMETA)
                .with_arg(name)
                .with_arg(ts.to_string())
                .with_arg(chan.key.as_deref().unwrap_or("*"))
                .with_arg(chan.limit.unwrap_or(0).to_string()),
        );
    }
    for kind in [ListKind::Ban, ListKind::Except] {
        for entry in chan.list(kind) {
            lines.push(ban_line(name, ts, kind, entry));
        }
    }
    for uid in &uids {
        if let Some(privilege) = chan.members.get(*uid).copied()
            && privilege != Privilege::None
        {
            lines.push(member_line(name, ts, uid, privilege));
        }
    }
    if let Some(topic) = &chan.topic {
        lines.push(topicset_line(name, ts, topic));
    }
    lines
}

impl SyncManager {
    /// Snapshot of the network for the peer on `conn`.
    ///
    /// Anything learned through `conn` is left out; the peer told us.
    pub fn generate_burst(&self, conn: ConnId, user_sync: bool) -> Vec<Line> {
        let me = &self.matrix.me;
        let mut lines = vec![serverlist_line(me.sid.as_str(), &me.name, "*", &me.description)];

        for server in self.topology.remote_servers() {
            if server.learned_via == conn {
                continue;
            }
            lines.push(serverlist_line(
                server.sid.as_str(),
                &server.name,
                server.parent.as_str(),
                &server.description,
            ));
        }

        if user_sync {
            let behind_peer = |user: &User| {
                user.remote_sid
                    .as_ref()
                    .is_some_and(|sid| self.routing.route(sid) == Some(conn))
            };

            let mut users: Vec<User> = self
                .matrix
                .snapshot_users()
                .into_iter()
                .filter(|u| !behind_peer(u))
                .collect();
            users.sort_by(|a, b| a.uid.cmp(&b.uid));
            let sent: std::collections::HashSet<String> = users.iter().map(|u| u.uid.clone()).collect();
            lines.extend(users.iter().map(user_line));

            let mut channels = self.matrix.snapshot_channels();
            channels.sort_by(|a, b| a.name.cmp(&b.name));
            for chan in &channels {
                lines.extend(channel_records(chan, |uid| sent.contains(uid)));
            }
        }

        lines.push(Line::new(ENDBURST));
        debug!(%conn, lines = lines.len(), user_sync, "Burst generated");
        lines
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn chan_lines_are_chunked() {
        let uids: Vec<String> = (0..95).map(|i| format!("001AAA{i:03}")).collect();
        let refs: Vec<&str> = uids.iter().map(String::as_str).collect();
        let lines = chan_lines("#big", 10, &refs);
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0].to_string().split(' ').count(), 3 + CHAN_CHUNK);
        assert!(lines.iter().all(|l| l.arg(0) == Some("#big") && l.arg(1) == Some("10")));
    }

    #[test]
    fn channel_records_in_wire_order() {
        let mut chan = Channel::new("#Rust", 100);
        chan.members.insert("001AAAAAA".to_string(), Privilege::Op);
        chan.members.insert("001AAAAAB".to_string(), Privilege::None);
        chan.apply_mode_delta("+nt");
        chan.key = Some("sekrit".to_string());
        chan.add_list_entry(
            ListKind::Ban,
            ListEntry {
                mask: "*!*@bad".to_string(),
                set_by: "op".to_string(),
                set_at: 5,
            },
        );
        chan.topic = Some(Topic {
            text: "hello world".to_string(),
            set_by: "op".to_string(),
            set_at: 7,
        });

        let rendered: Vec<String> = channel_records(&chan, |_| true)
            .iter()
            .map(ToString::to_string)
            .collect();
        assert_eq!(
            rendered,
            vec![
                "CHAN #Rust 100 :001AAAAAA 001AAAAAB",
                "MODECH #Rust 100 +nt",
                "CHANMETA #Rust 100 sekrit 0",
                "BAN #Rust 100 b *!*@bad op 5",
                "MEMBER #Rust 100 001AAAAAA @",
                "TOPICSET #Rust 100 7 op :hello world",
            ]
        );
    }

    #[test]
    fn channel_of_only_excluded_members_is_skipped() {
        let mut chan = Channel::new("#peer", 1);
        chan.members.insert("002AAAAAA".to_string(), Privilege::Op);
        let allowed: HashSet<&str> = HashSet::new();
        assert!(channel_records(&chan, |uid| allowed.contains(uid)).is_empty());
    }

    #[test]
    fn user_line_carries_modes_and_realname() {
        let user = User {
            uid: "001AAAAAA".to_string(),
            nick: "bob".to_string(),
            nick_ts: 42,
            ident: "bob".to_string(),
            host: "example.org".to_string(),
            realname: "Bob Example".to_string(),
            secure: true,
            invisible: true,
            remote_sid: None,
            channels: HashSet::new(),
        };
        assert_eq!(
            user_line(&user).to_string(),
            "USER 001AAAAAA bob 42 bob example.org 1 +i :Bob Example"
        );
    }
}
