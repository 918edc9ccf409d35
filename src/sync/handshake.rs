//! S2S handshake state machine.
//!
//! Drives a fresh session from its first line to an authenticated peer
//! identity. The machine does no I/O; the link task feeds it lines and
//! sends whatever it returns.

use crate::config::{LinkBlock, LinkDirection};
use crate::state::ServerIdentity;
use slirc_link_proto::command::{CAPAB, ERROR, PASS, SERVER};
use slirc_link_proto::{Line, PROTOCOL_VERSION, ServerId, irc_eq};
use std::net::IpAddr;
use subtle::ConstantTimeEq;
use thiserror::Error;

/// Capability tokens announced in `CAPAB`.
const CAPABILITIES: &str = "DEDUP SVS USERSYNC";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeState {
    /// Waiting for `PASS` (`CAPAB` may come first).
    AwaitingPass,
    /// `PASS` accepted, waiting for `SERVER`.
    AwaitingServer,
    /// Peer authenticated.
    Complete,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HandshakeError {
    #[error("Invalid SID {0}")]
    InvalidSid(String),

    #[error("SID {0} collides with this server")]
    SelfCollision(String),

    #[error("No link block for {0}")]
    UnknownServer(String),

    #[error("Connection from {0} not permitted")]
    AddressNotAllowed(String),

    #[error("Bad password")]
    BadPassword,

    #[error("SID mismatch for {name}: expected {expected}, got {got}")]
    SidMismatch {
        name: String,
        expected: String,
        got: String,
    },

    #[error("Server name mismatch: expected {expected}, got {got}")]
    NameMismatch { expected: String, got: String },

    #[error("Unsupported protocol version {0:?}")]
    VersionMismatch(String),

    #[error("Server {0} already exists")]
    DuplicateServer(String),

    #[error("Unexpected {0} during handshake")]
    UnexpectedCommand(String),

    #[error("SERVER before PASS")]
    MissingPass,

    #[error("Malformed {0}")]
    Malformed(&'static str),

    #[error("Handshake timed out")]
    Timeout,

    /// The peer gave up with `ERROR`.
    #[error("remote error: {0}")]
    Remote(String),

    #[error("Connection closed during handshake")]
    Closed,
}

impl HandshakeError {
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::InvalidSid(_) => "invalid_sid",
            Self::SelfCollision(_) => "self_collision",
            Self::UnknownServer(_) => "unknown_server",
            Self::AddressNotAllowed(_) => "address_not_allowed",
            Self::BadPassword => "bad_password",
            Self::SidMismatch { .. } => "sid_mismatch",
            Self::NameMismatch { .. } => "name_mismatch",
            Self::VersionMismatch(_) => "version_mismatch",
            Self::DuplicateServer(_) => "duplicate_server",
            Self::UnexpectedCommand(_) => "unexpected_command",
            Self::MissingPass => "missing_pass",
            Self::Malformed(_) => "malformed",
            Self::Timeout => "handshake_timeout",
            Self::Remote(_) => "remote_error",
            Self::Closed => "closed",
        }
    }

    /// False when the peer is gone or already reported its own error.
    pub fn is_reportable(&self) -> bool {
        !matches!(self, Self::Remote(_) | Self::Closed)
    }
}

/// Who the peer turned out to be.
#[derive(Debug, Clone)]
pub struct PeerIdentity {
    pub name: String,
    pub sid: ServerId,
    pub description: String,
    /// Capability tokens the peer announced, if any.
    pub capabilities: Vec<String>,
    /// The link block that authorised it.
    pub link: LinkBlock,
}

#[derive(Debug)]
pub enum Step {
    /// Keep feeding lines.
    Continue,
    /// Authenticated. Inbound sessions must send `reply` before bursting.
    Complete {
        peer: PeerIdentity,
        reply: Vec<Line>,
    },
}

pub struct HandshakeMachine {
    pub state: HandshakeState,
    direction: LinkDirection,
    local: ServerIdentity,
    links: Vec<LinkBlock>,
    /// Block we dialed (outbound only).
    dialed: Option<LinkBlock>,
    peer_addr: Option<IpAddr>,
    remote_pass: Option<String>,
    remote_capab: Vec<String>,
}

impl HandshakeMachine {
    /// Machine for a connection accepted on the listener.
    pub fn inbound(local: ServerIdentity, links: Vec<LinkBlock>, peer_addr: Option<IpAddr>) -> Self {
        Self {
            state: HandshakeState::AwaitingPass,
            direction: LinkDirection::Inbound,
            local,
            links,
            dialed: None,
            peer_addr,
            remote_pass: None,
            remote_capab: Vec::new(),
        }
    }

    /// Machine for a connection we dialed to `link`.
    pub fn outbound(local: ServerIdentity, link: LinkBlock) -> Self {
        Self {
            state: HandshakeState::AwaitingPass,
            direction: LinkDirection::Outbound,
            local,
            links: Vec::new(),
            dialed: Some(link),
            peer_addr: None,
            remote_pass: None,
            remote_capab: Vec::new(),
        }
    }

    pub fn direction(&self) -> LinkDirection {
        self.direction
    }

    /// Who the session is with, before the peer has named itself.
    pub fn peer_label(&self) -> String {
        match (&self.dialed, self.peer_addr) {
            (Some(link), _) => link.name.clone(),
            (None, Some(addr)) => addr.to_string(),
            (None, None) => "unknown".to_string(),
        }
    }

    /// Lines announcing this server, authenticated with `password`.
    pub fn greeting(local: &ServerIdentity, password: &str) -> Vec<Line> {
        vec![
            Line::new(CAPAB).with_trailing(CAPABILITIES),
            Line::new(PASS).with_arg(password).with_trailing(PROTOCOL_VERSION),
            Line::new(SERVER)
                .with_arg(local.name.as_str())
                .with_arg(local.sid.as_str())
                .with_trailing(local.description.as_str()),
        ]
    }

    /// What an outbound session sends before reading anything.
    pub fn opening(&self) -> Vec<Line> {
        match &self.dialed {
            Some(link) => Self::greeting(&self.local, &link.password),
            None => Vec::new(),
        }
    }

    /// Feed one line from the peer.
    pub fn step(&mut self, line: &Line) -> Result<Step, HandshakeError> {
        match (self.state, line.command.as_str()) {
            (_, ERROR) => Err(HandshakeError::Remote(
                line.text(0).unwrap_or_default().to_string(),
            )),
            (HandshakeState::AwaitingPass, CAPAB) => {
                self.remote_capab = line
                    .text(0)
                    .unwrap_or_default()
                    .split_whitespace()
                    .map(str::to_string)
                    .collect();
                Ok(Step::Continue)
            }
            (HandshakeState::AwaitingPass, PASS) => {
                let password = line.arg(0).ok_or(HandshakeError::Malformed("PASS"))?;
                let version = line.trailing.as_deref().or(line.arg(1)).unwrap_or_default();
                if version != PROTOCOL_VERSION {
                    return Err(HandshakeError::VersionMismatch(version.to_string()));
                }
                self.remote_pass = Some(password.to_string());
                self.state = HandshakeState::AwaitingServer;
                Ok(Step::Continue)
            }
            (HandshakeState::AwaitingPass, SERVER) => Err(HandshakeError::MissingPass),
            (HandshakeState::AwaitingServer, SERVER) => {
                let name = line.arg(0).ok_or(HandshakeError::Malformed("SERVER"))?;
                let sid = line.arg(1).ok_or(HandshakeError::Malformed("SERVER"))?;
                let description = line.text(2).unwrap_or_default();
                let peer = self.verify(name, sid, description)?;
                let reply = match self.direction {
                    LinkDirection::Inbound => Self::greeting(&self.local, &peer.link.password),
                    LinkDirection::Outbound => Vec::new(),
                };
                self.state = HandshakeState::Complete;
                Ok(Step::Complete { peer, reply })
            }
            (_, other) => Err(HandshakeError::UnexpectedCommand(other.to_string())),
        }
    }

    fn verify(&self, name: &str, sid: &str, description: &str) -> Result<PeerIdentity, HandshakeError> {
        let sid = ServerId::parse(sid).map_err(|e| HandshakeError::InvalidSid(e.0))?;
        if sid == self.local.sid {
            return Err(HandshakeError::SelfCollision(sid.to_string()));
        }

        let link = match (&self.direction, &self.dialed) {
            (LinkDirection::Outbound, Some(dialed)) => {
                if !irc_eq(&dialed.name, name) {
                    return Err(HandshakeError::NameMismatch {
                        expected: dialed.name.clone(),
                        got: name.to_string(),
                    });
                }
                dialed
            }
            _ => {
                let link = self
                    .links
                    .iter()
                    .find(|l| l.direction == LinkDirection::Inbound && irc_eq(&l.name, name))
                    .ok_or_else(|| HandshakeError::UnknownServer(name.to_string()))?;
                if !link.permits(self.peer_addr) {
                    let addr = self
                        .peer_addr
                        .map(|a| a.to_string())
                        .unwrap_or_else(|| "unknown address".to_string());
                    return Err(HandshakeError::AddressNotAllowed(addr));
                }
                link
            }
        };

        let offered = self.remote_pass.as_deref().ok_or(HandshakeError::MissingPass)?;
        if !bool::from(offered.as_bytes().ct_eq(link.password.as_bytes())) {
            return Err(HandshakeError::BadPassword);
        }

        if let Some(expected) = &link.sid
            && expected.as_str() != sid.as_str()
        {
            return Err(HandshakeError::SidMismatch {
                name: name.to_string(),
                expected: expected.clone(),
                got: sid.to_string(),
            });
        }

        Ok(PeerIdentity {
            name: name.to_string(),
            sid,
            description: description.to_string(),
            capabilities: self.remote_capab.clone(),
            link: link.clone(),
        })
    }
}
