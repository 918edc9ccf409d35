//! Tracing setup and span constructors.

use crate::config::{LogConfig, LogFormat};
use tracing_subscriber::EnvFilter;

/// Install the global subscriber. `RUST_LOG` overrides the default `info`.
pub fn init(log: &LogConfig) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    match log.format {
        LogFormat::Json => builder.json().init(),
        LogFormat::Pretty => builder.with_target(false).init(),
    }
}

/// Standardized span constructors.
pub mod spans {
    use crate::sync::link::ConnId;
    use tracing::{Span, info_span};

    /// Span every link task runs inside. `peer` is the dialed name or the
    /// remote address until the handshake names the server.
    pub fn link(conn: ConnId, direction: &str, peer: &str) -> Span {
        info_span!("link", conn = %conn, direction = %direction, peer = %peer)
    }
}
