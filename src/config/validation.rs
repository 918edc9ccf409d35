//! Configuration validation.
//!
//! Validates configuration at startup to catch common errors early.

use super::{Config, LinkDirection};
use slirc_link_proto::sid::is_valid_sid;
use std::collections::HashSet;
use thiserror::Error;

/// Validation errors for configuration.
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("server.name is required")]
    MissingServerName,
    #[error("server.sid must be a digit followed by 2 alphanumeric characters, got '{0}'")]
    InvalidSid(String),
    #[error("link '{0}' has an invalid sid '{1}'")]
    InvalidLinkSid(String, String),
    #[error("link '{0}' reuses the local sid")]
    LinkSidIsLocal(String),
    #[error("link name '{0}' is configured more than once")]
    DuplicateLinkName(String),
    #[error("link sid '{0}' is configured more than once")]
    DuplicateLinkSid(String),
    #[error("link '{0}' has an empty password")]
    EmptyLinkPassword(String),
    #[error("link '{0}' sets allowed_ips but is not inbound")]
    AllowListOnOutbound(String),
    #[error("s2s.{0} must be greater than zero")]
    ZeroLimit(&'static str),
}

/// Validate a configuration, returning all errors found.
pub fn validate(config: &Config) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.server.name.is_empty() {
        errors.push(ValidationError::MissingServerName);
    }
    if !is_valid_sid(&config.server.sid) {
        errors.push(ValidationError::InvalidSid(config.server.sid.clone()));
    }

    let s2s = &config.s2s;
    for (field, value) in [
        ("flood_max_lines", s2s.flood_max_lines),
        ("dedup_max_entries", s2s.dedup_max_entries),
        ("send_queue", s2s.send_queue),
    ] {
        if value == 0 {
            errors.push(ValidationError::ZeroLimit(field));
        }
    }

    let mut names = HashSet::new();
    let mut sids = HashSet::new();
    for link in &config.links {
        if !names.insert(link.name.to_ascii_lowercase()) {
            errors.push(ValidationError::DuplicateLinkName(link.name.clone()));
        }
        if link.password.is_empty() {
            errors.push(ValidationError::EmptyLinkPassword(link.name.clone()));
        }
        if !link.allowed_ips.is_empty() && link.direction != LinkDirection::Inbound {
            errors.push(ValidationError::AllowListOnOutbound(link.name.clone()));
        }
        if let Some(sid) = &link.sid {
            if !is_valid_sid(sid) {
                errors.push(ValidationError::InvalidLinkSid(link.name.clone(), sid.clone()));
            } else if sid == &config.server.sid {
                errors.push(ValidationError::LinkSidIsLocal(link.name.clone()));
            } else if !sids.insert(sid.clone()) {
                errors.push(ValidationError::DuplicateLinkSid(sid.clone()));
            }
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
