//! Server identifiers.

use std::fmt;
use thiserror::Error;

/// Returned when a string is not a well-formed SID.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid SID: {0:?}")]
pub struct InvalidSid(pub String);

/// A 3-character server identifier, unique network-wide: a digit followed
/// by two alphanumerics.
///
/// Ordering is plain byte order of the identifier; nick-collision ties are
/// broken on it, so every server must agree on it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ServerId(String);

impl ServerId {
    /// Validate and wrap `s`.
    pub fn parse(s: &str) -> Result<Self, InvalidSid> {
        if is_valid_sid(s) {
            Ok(Self(s.to_string()))
        } else {
            Err(InvalidSid(s.to_string()))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The server owning `uid`: its first three characters.
    pub fn owner_of(uid: &str) -> Option<Self> {
        uid.get(..3).and_then(|prefix| Self::parse(prefix).ok())
    }
}

impl fmt::Display for ServerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for ServerId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// A digit, then two ASCII alphanumerics.
///
/// The leading digit carries over to every uid, and no nick may start
/// with a digit, so a uid is always free to serve as a nick.
pub fn is_valid_sid(s: &str) -> bool {
    let b = s.as_bytes();
    b.len() == 3 && b[0].is_ascii_digit() && b[1..].iter().all(u8::is_ascii_alphanumeric)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_digit_then_alphanumerics() {
        assert!(ServerId::parse("001").is_ok());
        assert!(ServerId::parse("9ZX").is_ok());
    }

    #[test]
    fn rejects_bad_shapes() {
        assert!(ServerId::parse("01").is_err());
        assert!(ServerId::parse("0011").is_err());
        assert!(ServerId::parse("0-1").is_err());
        assert!(ServerId::parse("").is_err());
        assert!(ServerId::parse("é1").is_err());
        assert!(ServerId::parse("ABC").is_err());
        assert!(ServerId::parse("A01").is_err());
    }

    #[test]
    fn ordering_is_lexicographic() {
        let a = ServerId::parse("00A").unwrap();
        let b = ServerId::parse("00B").unwrap();
        let nine = ServerId::parse("009").unwrap();
        assert!(a < b);
        assert!(nine < a);
    }

    #[test]
    fn owner_is_uid_prefix() {
        assert_eq!(ServerId::owner_of("002BBBBBB").unwrap().as_str(), "002");
        assert!(ServerId::owner_of("x").is_none());
    }
}
