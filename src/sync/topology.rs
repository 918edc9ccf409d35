//! Spanning tree of remote servers.
//!
//! Tracks who introduced whom so that losing a server also loses every
//! server behind it. The local server is not stored; direct peers name it
//! as their parent.

use super::link::ConnId;
use dashmap::DashMap;
use slirc_link_proto::ServerId;
use std::collections::HashSet;

/// A remote server on the network.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerInfo {
    pub sid: ServerId,
    pub name: String,
    pub description: String,
    /// Hops from this server; direct peers are 1.
    pub hopcount: u32,
    /// The server that introduced this one.
    pub parent: ServerId,
    /// Local connection it was learned through.
    pub learned_via: ConnId,
}

#[derive(Debug, Default)]
pub struct TopologyGraph {
    servers: DashMap<ServerId, ServerInfo>,
}

impl TopologyGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register or update a server. Returns true if it was not known.
    pub fn add_server(&self, info: ServerInfo) -> bool {
        self.servers.insert(info.sid.clone(), info).is_none()
    }

    pub fn get(&self, sid: &ServerId) -> Option<ServerInfo> {
        self.servers.get(sid).map(|s| s.clone())
    }

    pub fn contains(&self, sid: &ServerId) -> bool {
        self.servers.contains_key(sid)
    }

    /// `target` plus every server whose parent chain passes through it.
    pub fn get_downstream_sids(&self, target: &ServerId) -> Vec<ServerId> {
        let mut result = Vec::new();
        let mut to_process = vec![target.clone()];
        let mut processed = HashSet::new();

        while let Some(current) = to_process.pop() {
            if !processed.insert(current.clone()) {
                continue;
            }
            result.push(current.clone());
            for entry in self.servers.iter() {
                if entry.parent == current && !processed.contains(&entry.sid) {
                    to_process.push(entry.sid.clone());
                }
            }
        }

        result
    }

    /// Remove servers, returning the ones that were actually present.
    pub fn remove_servers(&self, sids: &[ServerId]) -> Vec<ServerInfo> {
        sids.iter()
            .filter_map(|sid| self.servers.remove(sid).map(|(_, info)| info))
            .collect()
    }

    /// All known remote servers, ordered by hop count then SID.
    pub fn remote_servers(&self) -> Vec<ServerInfo> {
        let mut all: Vec<ServerInfo> = self.servers.iter().map(|s| s.clone()).collect();
        all.sort_by(|a, b| a.hopcount.cmp(&b.hopcount).then_with(|| a.sid.cmp(&b.sid)));
        all
    }

    pub fn len(&self) -> usize {
        self.servers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.servers.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sid(s: &str) -> ServerId {
        ServerId::parse(s).unwrap()
    }

    fn add(graph: &TopologyGraph, me: &str, parent: &str, hops: u32) {
        graph.add_server(ServerInfo {
            sid: sid(me),
            name: format!("{me}.test"),
            description: String::new(),
            hopcount: hops,
            parent: sid(parent),
            learned_via: ConnId(1),
        });
    }

    #[test]
    fn downstream_of_a_chain() {
        // 001 (local) -> 00A -> 00B -> 00C
        let graph = TopologyGraph::new();
        add(&graph, "00A", "001", 1);
        add(&graph, "00B", "00A", 2);
        add(&graph, "00C", "00B", 3);

        let mut downstream = graph.get_downstream_sids(&sid("00A"));
        downstream.sort();
        assert_eq!(downstream, vec![sid("00A"), sid("00B"), sid("00C")]);
        assert_eq!(graph.get_downstream_sids(&sid("00C")), vec![sid("00C")]);
    }

    #[test]
    fn downstream_of_a_fork_spares_siblings() {
        // 001 -> {00A -> {00B, 00C}, 00D}
        let graph = TopologyGraph::new();
        add(&graph, "00A", "001", 1);
        add(&graph, "00B", "00A", 2);
        add(&graph, "00C", "00A", 2);
        add(&graph, "00D", "001", 1);

        let downstream = graph.get_downstream_sids(&sid("00A"));
        assert_eq!(downstream.len(), 3);
        assert!(!downstream.contains(&sid("00D")));

        let removed = graph.remove_servers(&downstream);
        assert_eq!(removed.len(), 3);
        assert_eq!(graph.len(), 1);
        assert!(graph.remove_servers(&downstream).is_empty());
    }

    #[test]
    fn remote_servers_are_ordered() {
        let graph = TopologyGraph::new();
        add(&graph, "00C", "00A", 2);
        add(&graph, "00B", "001", 1);
        add(&graph, "00A", "001", 1);
        let order: Vec<String> = graph
            .remote_servers()
            .into_iter()
            .map(|s| s.sid.to_string())
            .collect();
        assert_eq!(order, vec!["00A", "00B", "00C"]);
    }

    #[test]
    fn re_adding_updates_in_place() {
        let graph = TopologyGraph::new();
        add(&graph, "00A", "001", 1);
        assert!(!graph.add_server(ServerInfo {
            sid: sid("00A"),
            name: "renamed".to_string(),
            description: "d".to_string(),
            hopcount: 1,
            parent: sid("001"),
            learned_via: ConnId(1),
        }));
        assert_eq!(graph.get(&sid("00A")).unwrap().name, "renamed");
    }
}
