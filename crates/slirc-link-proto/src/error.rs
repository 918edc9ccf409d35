//! Parse errors for link lines.

use thiserror::Error;

/// Why a raw line could not be turned into a [`crate::Line`].
///
/// Callers on the link are expected to skip such lines rather than drop the
/// peer: extensions add arguments over time and old servers must tolerate them.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("empty line")]
    Empty,

    #[error("missing command")]
    MissingCommand,

    #[error("invalid command token: {0}")]
    InvalidCommand(String),
}
