//! Per-link admission control on inbound lines.

use super::link::ConnId;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Sliding-window line counter, one window per connection.
#[derive(Debug)]
pub struct FloodGate {
    windows: DashMap<ConnId, Arc<Mutex<VecDeque<Instant>>>>,
    window: Duration,
    max_lines: usize,
}

impl FloodGate {
    pub fn new(window: Duration, max_lines: usize) -> Self {
        Self {
            windows: DashMap::new(),
            window,
            max_lines,
        }
    }

    /// Consume one slot for `conn`. Returns false once the cap is exceeded.
    pub fn check(&self, conn: ConnId) -> bool {
        let window = self.windows.entry(conn).or_default().clone();
        let now = Instant::now();
        let mut stamps = window.lock();
        while stamps
            .front()
            .is_some_and(|t| now.duration_since(*t) >= self.window)
        {
            stamps.pop_front();
        }
        if stamps.len() >= self.max_lines {
            return false;
        }
        stamps.push_back(now);
        true
    }

    /// Forget a closed connection.
    pub fn remove(&self, conn: ConnId) {
        self.windows.remove(&conn);
    }

    pub fn tracked(&self) -> usize {
        self.windows.len()
    }
}
