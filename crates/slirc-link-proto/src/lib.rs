//! # slirc-link-proto
//!
//! Wire layer for the slircd server-to-server link protocol.
//!
//! Everything in here is pure: no sockets, no clocks. The daemon feeds raw
//! lines in and gets [`Line`] values back, and serializes [`Line`] values on
//! the way out.
//!
//! ```rust
//! use slirc_link_proto::{Line, command};
//!
//! let line: Line = "JOIN 9f2c 001 001AAAAAB #rust 1700000000".parse().unwrap();
//! assert_eq!(line.command, command::JOIN);
//! assert!(command::has_envelope(&line.command));
//! assert_eq!(line.arg(3), Some("#rust"));
//! ```

#![deny(clippy::all)]

pub mod casemap;
pub mod command;
pub mod error;
pub mod line;
pub mod sid;

pub use casemap::{irc_eq, irc_to_lower};
pub use error::ParseError;
pub use line::Line;
pub use sid::{InvalidSid, ServerId};

/// Protocol version trailer carried on `PASS`.
pub const PROTOCOL_VERSION: &str = "TS 1";
