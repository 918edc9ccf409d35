//! Server tree records: SERVERLIST and SQUIT.

use super::{Outbound, Scope, malformed};
use crate::error::LinkError;
use crate::sync::burst;
use crate::sync::link::ConnId;
use crate::sync::manager::SyncManager;
use crate::sync::split::NETSPLIT_REASON;
use crate::sync::topology::ServerInfo;
use slirc_link_proto::{Line, ServerId};
use tracing::{debug, info, warn};

impl SyncManager {
    /// `SERVERLIST <sid> <name> <parent-sid> :<description>`
    pub(super) fn handle_serverlist(&self, conn: ConnId, line: &Line) -> Result<Vec<Outbound>, LinkError> {
        let (Some(sid), Some(name), Some(parent)) = (line.arg(0), line.arg(1), line.arg(2)) else {
            return Ok(malformed(line));
        };
        let description = line.text(3).unwrap_or_default();

        let sid = ServerId::parse(sid).map_err(|e| LinkError::InvalidSid(e.0))?;
        if &sid == self.local_sid() {
            return Err(LinkError::SelfCollision(sid.to_string()));
        }
        let Some(peer) = self.links.get(&conn).map(|l| l.sid.clone()) else {
            return Ok(Vec::new());
        };

        if sid == peer {
            // The peer describing itself.
            if let Some(mut info) = self.topology.get(&sid) {
                info.name = name.to_string();
                info.description = description.to_string();
                self.topology.add_server(info);
            }
            return Ok(Vec::new());
        }

        let parent = match parent {
            "*" => peer.clone(),
            other => ServerId::parse(other).unwrap_or_else(|_| peer.clone()),
        };
        if self.routing.claim(&sid, conn).is_err() {
            return Err(LinkError::DuplicateServer(sid.to_string()));
        }

        let hopcount = self.topology.get(&parent).map_or(2, |p| p.hopcount + 1);
        let fresh = self.topology.add_server(ServerInfo {
            sid: sid.clone(),
            name: name.to_string(),
            description: description.to_string(),
            hopcount,
            parent: parent.clone(),
            learned_via: conn,
        });
        if !fresh {
            return Ok(Vec::new());
        }

        info!(%conn, sid = %sid, name = %name, parent = %parent, hopcount, "Server introduced");
        self.observer.server_linked(sid.as_str(), name);

        Ok(vec![Outbound::Broadcast {
            line: burst::serverlist_line(sid.as_str(), name, parent.as_str(), description),
            except: Some(conn),
            scope: Scope::All,
        }])
    }

    /// `SQUIT <id> <origin> <sid> :<reason>`
    pub(super) fn handle_squit(&self, conn: ConnId, line: &Line) -> Result<Vec<Outbound>, LinkError> {
        let Some(target) = line.arg(2) else {
            return Ok(malformed(line));
        };
        let reason = line.text(3).unwrap_or(NETSPLIT_REASON);
        let Ok(target) = ServerId::parse(target) else {
            return Ok(malformed(line));
        };

        if &target == self.local_sid() {
            warn!(%conn, "Peer sent SQUIT for this server; ignoring");
            return Ok(Vec::new());
        }
        if let Some(link) = self.link_by_sid(&target) {
            if link.conn == conn {
                return Err(LinkError::Remote(format!("SQUIT: {reason}")));
            }
            warn!(%conn, sid = %target, "SQUIT for a directly linked server from elsewhere; ignoring");
            return Ok(Vec::new());
        }
        if self.routing.route(&target) != Some(conn) {
            debug!(%conn, sid = %target, "SQUIT for a server not behind this link");
            return Ok(Vec::new());
        }

        let sids: Vec<ServerId> = self
            .topology
            .get_downstream_sids(&target)
            .into_iter()
            .filter(|sid| self.routing.route(sid) == Some(conn))
            .collect();
        let gone = self.drop_servers(&sids, NETSPLIT_REASON);
        info!(%conn, sid = %target, servers = sids.len(), users = gone.len(), %reason, "Remote split");

        Ok(vec![Outbound::Broadcast {
            line: line.clone(),
            except: Some(conn),
            scope: Scope::All,
        }])
    }
}
