//! The link line: `COMMAND arg1 arg2 ... [:trailing free text]`.

use std::fmt;
use std::str::FromStr;

use crate::error::ParseError;

/// One protocol line, without its line terminator.
///
/// Positional arguments never contain spaces. Only `trailing` may, and it is
/// always written with a leading `:`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Line {
    /// Upper-cased command token.
    pub command: String,
    /// Space-separated positional arguments.
    pub args: Vec<String>,
    /// Free-text field after ` :`, if present.
    pub trailing: Option<String>,
}

impl Line {
    /// Start a line for `command`.
    pub fn new(command: &str) -> Self {
        Self {
            command: command.to_ascii_uppercase(),
            args: Vec::new(),
            trailing: None,
        }
    }

    /// Append a positional argument.
    ///
    /// Empty arguments and arguments containing spaces cannot survive a
    /// round trip, so they are replaced by `*`.
    pub fn with_arg(mut self, arg: impl Into<String>) -> Self {
        let arg = arg.into();
        if arg.is_empty() || arg.contains(' ') || arg.starts_with(':') {
            self.args.push("*".to_string());
        } else {
            self.args.push(arg);
        }
        self
    }

    /// Set the trailing free-text field.
    pub fn with_trailing(mut self, text: impl Into<String>) -> Self {
        self.trailing = Some(text.into());
        self
    }

    /// Positional argument `idx`.
    pub fn arg(&self, idx: usize) -> Option<&str> {
        self.args.get(idx).map(String::as_str)
    }

    /// Free text at position `idx`.
    ///
    /// Prefers the trailing field; falls back to positional `idx` for peers
    /// that sent a single-word text without the `:` marker.
    pub fn text(&self, idx: usize) -> Option<&str> {
        self.trailing.as_deref().or_else(|| self.arg(idx))
    }

    /// Number of positional arguments plus the trailing field.
    pub fn param_count(&self) -> usize {
        self.args.len() + usize::from(self.trailing.is_some())
    }
}

impl fmt::Display for Line {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.command)?;
        for arg in &self.args {
            write!(f, " {arg}")?;
        }
        if let Some(trailing) = &self.trailing {
            write!(f, " :{trailing}")?;
        }
        Ok(())
    }
}

impl FromStr for Line {
    type Err = ParseError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let mut rest = raw.trim_end_matches(['\r', '\n']).trim_start_matches(' ');
        if rest.is_empty() {
            return Err(ParseError::Empty);
        }

        // A source prefix carries nothing we route on.
        if rest.starts_with(':') {
            rest = rest
                .split_once(' ')
                .map(|(_, tail)| tail.trim_start_matches(' '))
                .unwrap_or("");
        }

        let (head, trailing) = match rest.find(" :") {
            Some(idx) => (&rest[..idx], Some(rest[idx + 2..].to_string())),
            None => (rest, None),
        };

        let mut tokens = head.split(' ').filter(|t| !t.is_empty());
        let command = tokens.next().ok_or(ParseError::MissingCommand)?;
        if !command.chars().all(|c| c.is_ascii_alphabetic()) {
            return Err(ParseError::InvalidCommand(command.to_string()));
        }

        Ok(Self {
            command: command.to_ascii_uppercase(),
            args: tokens.map(str::to_string).collect(),
            trailing,
        })
    }
}
