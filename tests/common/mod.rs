//! Integration test common infrastructure.
//!
//! Builds in-process servers and scripted peers talking to them over
//! in-memory duplex pipes.

#![allow(dead_code)]

pub mod node;
pub mod peer;

#[allow(unused_imports)]
pub use node::{TestNode, inbound_block, outbound_block};
#[allow(unused_imports)]
pub use peer::TestPeer;
