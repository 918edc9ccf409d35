//! Link protocol dispatcher.
//!
//! Applies one inbound line to shared state and returns what must be sent
//! as a result. Handlers never await: state is mutated and observers are
//! notified before the caller starts queueing lines to other links.

mod channel;
mod message;
mod server;
mod user;

use super::link::{ConnId, LinkHandle};
use super::manager::SyncManager;
use crate::error::LinkError;
use crate::metrics;
use slirc_link_proto::command::{self, CAPAB, ENDBURST, ERROR, PASS, PING, PONG, SERVER, SERVERLIST, SQUIT};
use slirc_link_proto::{Line, ServerId};
use tracing::{debug, info, warn};

/// Which links a broadcast reaches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scope {
    /// Every authenticated link (server tree records).
    All,
    /// Only links with user sync enabled.
    UserSync,
}

impl Scope {
    pub fn admits(self, link: &LinkHandle) -> bool {
        match self {
            Self::All => true,
            Self::UserSync => link.user_sync,
        }
    }
}

/// A line produced by applying an event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    /// To every link in `scope` other than `except`.
    Broadcast {
        line: Line,
        except: Option<ConnId>,
        scope: Scope,
    },
    /// To one link.
    Direct { conn: ConnId, line: Line },
}

impl Outbound {
    /// Re-propagate a user-state line everywhere but where it came from.
    pub fn relay(line: &Line, from: ConnId) -> Self {
        Self::Broadcast {
            line: line.clone(),
            except: Some(from),
            scope: Scope::UserSync,
        }
    }

    /// A user-state line originated here, for every user-sync link.
    pub fn user_event(line: Line) -> Self {
        Self::Broadcast {
            line,
            except: None,
            scope: Scope::UserSync,
        }
    }

    pub fn line(&self) -> &Line {
        match self {
            Self::Broadcast { line, .. } | Self::Direct { line, .. } => line,
        }
    }
}

/// Commands that only make sense on links replicating user state.
fn is_user_state(cmd: &str) -> bool {
    !matches!(
        cmd,
        CAPAB | PASS | SERVER | ERROR | PING | PONG | SERVERLIST | SQUIT | ENDBURST
    )
}

/// Parse a timestamp argument.
pub(crate) fn ts_arg(line: &Line, idx: usize) -> Option<i64> {
    line.arg(idx).and_then(|s| s.parse().ok())
}

/// Log and skip a record with missing or unparsable arguments.
pub(crate) fn malformed(line: &Line) -> Vec<Outbound> {
    warn!(command = %line.command, params = line.param_count(), "Skipping malformed record");
    Vec::new()
}

pub(crate) fn is_channel_name(target: &str) -> bool {
    target.starts_with(['#', '&', '+', '!'])
}

impl SyncManager {
    /// Apply one line received on `conn`.
    ///
    /// `Err` is fatal to the link. Malformed or inapplicable records are
    /// logged and skipped.
    pub fn dispatch(&self, conn: ConnId, line: &Line) -> Result<Vec<Outbound>, LinkError> {
        let cmd = line.command.as_str();
        metrics::record_command(cmd);

        if is_user_state(cmd) && command::is_known(cmd) {
            let user_sync = self.links.get(&conn).is_some_and(|l| l.user_sync);
            if !user_sync {
                debug!(%conn, command = %cmd, "Ignoring user state on topology-only link");
                return Ok(Vec::new());
            }
        }

        if command::has_envelope(cmd) {
            let (Some(id), Some(origin)) = (line.arg(0), line.arg(1)) else {
                return Ok(malformed(line));
            };
            if origin == self.local_sid().as_str() {
                debug!(%conn, command = %cmd, msgid = %id, "Dropping echo of our own event");
                return Ok(Vec::new());
            }
            if !self.dedup.check_and_insert(id) {
                metrics::record_dedup_drop();
                debug!(%conn, command = %cmd, msgid = %id, "Dropping duplicate");
                return Ok(Vec::new());
            }
        }

        match cmd {
            PING => Ok(vec![Outbound::Direct {
                conn,
                line: Line::new(PONG).with_trailing(line.text(0).unwrap_or_default()),
            }]),
            PONG | CAPAB => Ok(Vec::new()),
            ERROR => Err(LinkError::Remote(line.text(0).unwrap_or_default().to_string())),
            ENDBURST => {
                if let Some(link) = self.links.get(&conn) {
                    info!(%conn, sid = %link.sid, peer = %link.name, "Burst received");
                }
                Ok(Vec::new())
            }
            SERVERLIST => self.handle_serverlist(conn, line),
            SQUIT => self.handle_squit(conn, line),
            command::USER => self.handle_user(conn, line),
            command::NICK => self.handle_nick(conn, line),
            command::SVSNICK => self.handle_svsnick(conn, line),
            command::UMODE => self.handle_umode(conn, line),
            command::QUIT => self.handle_quit(conn, line),
            command::KILL => self.handle_kill(conn, line),
            command::JOIN => self.handle_join(conn, line),
            command::SVSJOIN => self.handle_svsjoin(conn, line),
            command::PART => self.handle_part(conn, line),
            command::SVSPART => self.handle_svspart(conn, line),
            command::CHAN => self.handle_chan(conn, line),
            command::MODECH => self.handle_modech(conn, line),
            command::CHANMETA => self.handle_chanmeta(conn, line),
            command::BAN | command::BANDEL => self.handle_ban(conn, line),
            command::MEMBER => self.handle_member(conn, line),
            command::TOPIC => self.handle_topic(conn, line),
            command::TOPICSET => self.handle_topicset(conn, line),
            command::PRIVMSG | command::NOTICE => self.handle_message(conn, line),
            PASS | SERVER => {
                warn!(%conn, command = %cmd, "Ignoring handshake command on established link");
                Ok(Vec::new())
            }
            _ => {
                debug!(%conn, command = %cmd, "Ignoring unknown command");
                Ok(Vec::new())
            }
        }
    }

    /// Send a directed command one hop closer to the server owning `uid`.
    pub(crate) fn forward_directed(&self, from: ConnId, line: &Line, owner: &ServerId) -> Vec<Outbound> {
        match self.routing.route(owner) {
            Some(next) if next != from => vec![Outbound::Direct {
                conn: next,
                line: line.clone(),
            }],
            Some(_) => {
                warn!(conn = %from, command = %line.command, sid = %owner, "Directed command would bounce back; dropping");
                Vec::new()
            }
            None => {
                warn!(conn = %from, command = %line.command, sid = %owner, "No route for directed command; dropping");
                Vec::new()
            }
        }
    }
}
