//! slircd-link - server-to-server link core of the Straylight IRC daemon.
//!
//! Links independently run servers into one network: authenticated links,
//! state bursts, loop-safe relay of live events, deterministic collision
//! handling and netsplit cleanup. The client-facing side plugs in through
//! [`state::NetworkObserver`] and the collaborator methods on
//! [`sync::SyncManager`].

pub mod config;
pub mod error;
pub mod http;
pub mod metrics;
pub mod state;
pub mod sync;
pub mod telemetry;
