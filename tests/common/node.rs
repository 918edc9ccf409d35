//! In-process server under test.

use slirc_link_proto::ServerId;
use slircd_link::config::{LinkBlock, LinkDirection, S2SConfig};
use slircd_link::error::LinkError;
use slircd_link::state::{Matrix, NullObserver, ServerIdentity};
use slircd_link::sync::SyncManager;
use slircd_link::sync::handshake::HandshakeMachine;
use slircd_link::sync::network::run_link;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::peer::TestPeer;

/// Password every test link block uses.
pub const PASSWORD: &str = "pw";

pub fn inbound_block(name: &str, user_sync: bool) -> LinkBlock {
    LinkBlock {
        name: name.to_string(),
        sid: None,
        hostname: "127.0.0.1".to_string(),
        port: 7000,
        password: PASSWORD.to_string(),
        direction: LinkDirection::Inbound,
        user_sync,
        allowed_ips: Vec::new(),
    }
}

pub fn outbound_block(name: &str) -> LinkBlock {
    LinkBlock {
        direction: LinkDirection::Outbound,
        ..inbound_block(name, true)
    }
}

/// A sync manager with no listener; sessions are attached by hand.
pub struct TestNode {
    pub manager: SyncManager,
    pub cancel: CancellationToken,
}

impl TestNode {
    pub fn new(sid: &str, links: Vec<LinkBlock>) -> Self {
        Self::with_settings(sid, links, S2SConfig::default())
    }

    pub fn with_settings(sid: &str, links: Vec<LinkBlock>, settings: S2SConfig) -> Self {
        let matrix = Arc::new(Matrix::new(ServerIdentity {
            sid: ServerId::parse(sid).expect("valid sid"),
            name: format!("s{sid}.test"),
            description: format!("Server {sid}"),
        }));
        let manager = SyncManager::new(matrix, settings, links, Arc::new(NullObserver));
        Self {
            manager,
            cancel: CancellationToken::new(),
        }
    }

    /// Accept one inbound session; the returned peer is the remote end.
    pub fn accept(&self) -> (TestPeer, JoinHandle<Result<(), LinkError>>) {
        let machine = HandshakeMachine::inbound(
            self.manager.matrix.me.clone(),
            self.manager.configured_links.to_vec(),
            None,
        );
        self.spawn(machine)
    }

    /// Dial `link`; the returned peer plays the dialed server.
    pub fn dial(&self, link: LinkBlock) -> (TestPeer, JoinHandle<Result<(), LinkError>>) {
        let machine = HandshakeMachine::outbound(self.manager.matrix.me.clone(), link);
        self.spawn(machine)
    }

    fn spawn(&self, machine: HandshakeMachine) -> (TestPeer, JoinHandle<Result<(), LinkError>>) {
        let (ours, theirs) = tokio::io::duplex(64 * 1024);
        let task = tokio::spawn(run_link(self.manager.clone(), ours, machine, self.cancel.clone()));
        (TestPeer::new(theirs), task)
    }

    /// Poll until `check` holds or a second has passed.
    pub async fn eventually(&self, mut check: impl FnMut(&SyncManager) -> bool) -> bool {
        for _ in 0..100 {
            if check(&self.manager) {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        check(&self.manager)
    }
}

impl Drop for TestNode {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
