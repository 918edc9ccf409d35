//! Netsplit handling.
//!
//! When a link drops, everything learned through it goes with it:
//! - every server routed via the link leaves the routing table and topology
//! - every user owned by one of those servers quits with [`NETSPLIT_REASON`]
//! - the remaining links get one `QUIT` per user and a `SQUIT` for the peer

use crate::metrics;
use crate::state::User;
use crate::sync::dispatch::{Outbound, Scope};
use crate::sync::link::ConnId;
use crate::sync::manager::SyncManager;
use slirc_link_proto::ServerId;
use slirc_link_proto::command::{QUIT, SQUIT};
use std::collections::HashSet;
use tracing::{debug, info};

/// Quit reason for users lost to a split.
pub const NETSPLIT_REASON: &str = "*.net *.split";

impl SyncManager {
    /// Forget `sids` and every user they own. Returns the removed users.
    pub fn drop_servers(&self, sids: &[ServerId], reason: &str) -> Vec<User> {
        if sids.is_empty() {
            return Vec::new();
        }
        for sid in sids {
            self.routing.remove(sid);
        }
        let servers = self.topology.remove_servers(sids);

        let owned: HashSet<ServerId> = sids.iter().cloned().collect();
        let mut gone: Vec<User> = self
            .matrix
            .users_owned_by(&owned)
            .into_iter()
            .filter_map(|uid| self.remove_and_notify(&uid, reason))
            .collect();
        gone.sort_by(|a, b| a.uid.cmp(&b.uid));

        for server in &servers {
            self.observer.server_split(server.sid.as_str(), &server.name);
        }
        debug!(servers = servers.len(), users = gone.len(), "Servers dropped");
        gone
    }

    /// Unwind a closed link and build what the remaining links must hear.
    ///
    /// Safe to call more than once and for sessions that never registered;
    /// only the first call for a registered link does anything.
    pub fn teardown(&self, conn: ConnId, reason: &str) -> Vec<Outbound> {
        self.flood.remove(conn);
        let Some((_, link)) = self.links.remove(&conn) else {
            return Vec::new();
        };
        metrics::link_down();

        let sids = self.routing.remove_conn(conn);
        let gone = self.drop_servers(&sids, NETSPLIT_REASON);
        info!(
            %conn,
            sid = %link.sid,
            peer = %link.name,
            servers = sids.len(),
            users = gone.len(),
            %reason,
            "Link closed, netsplit cleanup complete"
        );

        let mut outs: Vec<Outbound> = gone
            .iter()
            .map(|user| {
                Outbound::user_event(
                    self.originate(QUIT)
                        .with_arg(user.uid.as_str())
                        .with_trailing(NETSPLIT_REASON),
                )
            })
            .collect();
        outs.push(Outbound::Broadcast {
            line: self
                .originate(SQUIT)
                .with_arg(link.sid.as_str())
                .with_trailing(reason),
            except: None,
            scope: Scope::All,
        });
        outs
    }
}
