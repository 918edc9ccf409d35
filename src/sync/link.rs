//! Registered server links.

use crate::config::LinkDirection;
use slirc_link_proto::{Line, ServerId};
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Process-unique identifier of one transport session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnId(pub u64);

static NEXT_CONN_ID: AtomicU64 = AtomicU64::new(1);

impl ConnId {
    pub fn next() -> Self {
        Self(NEXT_CONN_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for ConnId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// An authenticated link as seen by the rest of the subsystem.
#[derive(Debug, Clone)]
pub struct LinkHandle {
    pub conn: ConnId,
    /// The directly connected peer.
    pub sid: ServerId,
    pub name: String,
    pub description: String,
    /// Replicate user and channel state over this link.
    pub user_sync: bool,
    pub direction: LinkDirection,
    /// Outbound queue drained by the link's writer task.
    pub tx: mpsc::Sender<Arc<Line>>,
    /// Fires to tear the link down.
    pub cancel: CancellationToken,
    pub connected_at: Instant,
}

impl LinkHandle {
    /// Queue a line, waiting for space. Returns false if the writer is gone.
    pub async fn send(&self, line: Arc<Line>) -> bool {
        self.tx.send(line).await.is_ok()
    }
}
