//! Unified error handling for slircd-link.
//!
//! Link errors are always fatal to the one link they occur on. Malformed
//! lines are not errors at all; the reader skips them.

use crate::sync::handshake::HandshakeError;
use thiserror::Error;

// ============================================================================
// Link Errors (fatal to a single link)
// ============================================================================

/// Reasons a server link is torn down.
#[derive(Debug, Error)]
pub enum LinkError {
    /// Authentication or negotiation failed before the link was registered.
    #[error(transparent)]
    Handshake(#[from] HandshakeError),

    #[error("UID collision on {0}")]
    UidCollision(String),

    #[error("Invalid SID {0}")]
    InvalidSid(String),

    #[error("SID {0} collides with this server")]
    SelfCollision(String),

    #[error("Server {0} already exists")]
    DuplicateServer(String),

    #[error("Excess Flood")]
    ExcessFlood,

    /// The peer sent `ERROR`; nothing is sent back.
    #[error("remote error: {0}")]
    Remote(String),

    /// Read failure, peer close or cancellation.
    #[error("transport closed: {0}")]
    Transport(String),
}

impl LinkError {
    /// Get a static error code string for metrics labeling.
    #[inline]
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::Handshake(e) => e.error_code(),
            Self::UidCollision(_) => "uid_collision",
            Self::InvalidSid(_) => "invalid_sid",
            Self::SelfCollision(_) => "self_collision",
            Self::DuplicateServer(_) => "duplicate_server",
            Self::ExcessFlood => "excess_flood",
            Self::Remote(_) => "remote_error",
            Self::Transport(_) => "transport",
        }
    }

    /// Whether the peer should be sent `ERROR :<reason>` before the close.
    ///
    /// A peer that errored out itself, or whose transport is gone, gets nothing.
    pub fn is_reportable(&self) -> bool {
        match self {
            Self::Handshake(e) => e.is_reportable(),
            Self::Remote(_) | Self::Transport(_) => false,
            _ => true,
        }
    }
}

// ============================================================================
// Route Errors (directed operator actions)
// ============================================================================

/// Failures reported back to the issuer of a directed action
/// (KILL, SVSNICK, SVSJOIN, SVSPART).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RouteError {
    #[error("no such user: {0}")]
    NoSuchUser(String),

    #[error("no route to server {0}")]
    NoRoute(String),

    #[error("no such channel: {0}")]
    NoSuchChannel(String),

    #[error("uid already registered: {0}")]
    UidInUse(String),

    #[error("nickname in use: {0}")]
    NicknameInUse(String),

    /// Digit-led nicks are reserved for collision renames.
    #[error("erroneous nickname: {0}")]
    ErroneousNickname(String),
}
