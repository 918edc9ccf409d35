//! RFC 1459 case folding for nicknames and channel names.
//!
//! Nick and channel uniqueness on the network is decided on the folded form,
//! so every server must fold identically.

#[inline]
const fn fold(c: char) -> char {
    match c {
        'A'..='Z' => c.to_ascii_lowercase(),
        '[' => '{',
        ']' => '}',
        '\\' => '|',
        '~' => '^',
        _ => c,
    }
}

/// Fold `s` to its RFC 1459 lower-case form.
pub fn irc_to_lower(s: &str) -> String {
    s.chars().map(fold).collect()
}

/// Case-insensitive equality under RFC 1459 folding.
pub fn irc_eq(a: &str, b: &str) -> bool {
    a.len() == b.len() && a.chars().map(fold).eq(b.chars().map(fold))
}
