//! Next-hop table: which local connection leads toward each server.

use super::link::ConnId;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use slirc_link_proto::ServerId;

#[derive(Debug, Default)]
pub struct RoutingTable {
    routes: DashMap<ServerId, ConnId>,
}

impl RoutingTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Point `sid` at `conn` unless a different connection already owns it.
    ///
    /// On conflict the current owner is returned and nothing changes.
    pub fn claim(&self, sid: &ServerId, conn: ConnId) -> Result<(), ConnId> {
        match self.routes.entry(sid.clone()) {
            Entry::Occupied(e) if *e.get() != conn => Err(*e.get()),
            Entry::Occupied(_) => Ok(()),
            Entry::Vacant(slot) => {
                slot.insert(conn);
                Ok(())
            }
        }
    }

    pub fn route(&self, sid: &ServerId) -> Option<ConnId> {
        self.routes.get(sid).map(|c| *c)
    }

    pub fn contains(&self, sid: &ServerId) -> bool {
        self.routes.contains_key(sid)
    }

    pub fn remove(&self, sid: &ServerId) -> Option<ConnId> {
        self.routes.remove(sid).map(|(_, c)| c)
    }

    /// Drop every entry that routes through `conn`, returning their SIDs.
    pub fn remove_conn(&self, conn: ConnId) -> Vec<ServerId> {
        let sids: Vec<ServerId> = self
            .routes
            .iter()
            .filter(|e| *e.value() == conn)
            .map(|e| e.key().clone())
            .collect();
        sids.into_iter()
            .filter(|sid| self.routes.remove_if(sid, |_, via| *via == conn).is_some())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}
