//! Sync Module - Server-to-Server Synchronization.
//!
//! Links peer servers into one network: authenticates links, exchanges
//! bursts, applies and relays live records, and unwinds splits.

pub mod burst;
pub mod conflict;
pub mod dedup;
pub mod dispatch;
pub mod flood;
pub mod handshake;
pub mod link;
pub mod manager;
pub mod network;
pub mod routing;
pub mod split;
pub mod topology;

#[cfg(test)]
mod tests;

pub use dispatch::{Outbound, Scope};
pub use link::{ConnId, LinkHandle};
pub use manager::SyncManager;
pub use topology::{ServerInfo, TopologyGraph};
