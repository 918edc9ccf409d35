//! Hooks from the link layer into the local client layer.
//!
//! The link layer owns the network-state store; everything that must reach
//! a locally connected client (numerics, channel fan-out, watch lists)
//! goes through [`NetworkObserver`]. Hooks run synchronously after the
//! store has been updated, so implementations can read the new state.

use super::channel::Topic;
use super::user::{Uid, User};

/// `PRIVMSG` or `NOTICE`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    Privmsg,
    Notice,
}

impl MessageKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Privmsg => "PRIVMSG",
            Self::Notice => "NOTICE",
        }
    }

    pub fn from_command(command: &str) -> Option<Self> {
        match command {
            "PRIVMSG" => Some(Self::Privmsg),
            "NOTICE" => Some(Self::Notice),
            _ => None,
        }
    }
}

/// Events the local client layer reacts to. Every method defaults to a
/// no-op.
pub trait NetworkObserver: Send + Sync {
    /// A user became visible under `user.nick` (watch/monitor logon).
    fn user_logon(&self, _user: &User) {}

    /// A user stopped being visible under `user.nick`.
    fn user_logoff(&self, _user: &User) {}

    /// A nick changed. Local clients sharing a channel see `old` become `new`.
    fn nick_changed(&self, _uid: &str, _old: &str, _new: &str) {}

    /// A user left the network. `user.channels` still lists where it was.
    fn user_quit(&self, _user: &User, _reason: &str) {}

    fn user_joined(&self, _channel: &str, _uid: &str) {}

    fn user_parted(&self, _channel: &str, _uid: &str, _reason: &str) {}

    fn topic_changed(&self, _channel: &str, _topic: &Topic) {}

    /// An older creation time arrived and wiped local modes and privileges.
    fn channel_reset(&self, _channel: &str, _created_ts: i64) {}

    /// Deliver a message to the given local recipients.
    fn deliver(
        &self,
        _kind: MessageKind,
        _from: &User,
        _target: &str,
        _text: &str,
        _recipients: &[Uid],
    ) {
    }

    /// Drop a locally connected client (remote KILL).
    fn disconnect_local(&self, _uid: &str, _reason: &str) {}

    /// A server appeared behind one of our links.
    fn server_linked(&self, _sid: &str, _name: &str) {}

    /// A server left the network.
    fn server_split(&self, _sid: &str, _name: &str) {}
}

/// Observer for deployments with no local client layer attached.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullObserver;

impl NetworkObserver for NullObserver {}
