use crate::config::{LinkBlock, LinkDirection, S2SConfig};
use crate::error::RouteError;
use crate::metrics;
use crate::state::{
    InsertError, ListEntry, ListKind, Matrix, MessageKind, NetworkObserver, Privilege, RenameError, Topic,
    User,
};
use crate::sync::burst;
use crate::sync::conflict::nick_is_claimable;
use crate::sync::dedup::{DedupCache, new_message_id};
use crate::sync::dispatch::{Outbound, Scope, is_channel_name};
use crate::sync::flood::FloodGate;
use crate::sync::handshake::{HandshakeError, PeerIdentity};
use crate::sync::link::{ConnId, LinkHandle};
use crate::sync::routing::RoutingTable;
use crate::sync::topology::{ServerInfo, TopologyGraph};
use dashmap::DashMap;
use slirc_link_proto::command::{BANDEL, CHANMETA, KILL, MODECH, QUIT, SVSJOIN, SVSNICK, SVSPART, TOPIC, UMODE};
use slirc_link_proto::{Line, ServerId};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Manages server-to-server synchronization and peer connections.
///
/// Cheap to clone; every table is shared.
#[derive(Clone)]
pub struct SyncManager {
    /// Users and channels, local and remote.
    pub matrix: Arc<Matrix>,
    pub settings: Arc<S2SConfig>,
    pub configured_links: Arc<Vec<LinkBlock>>,
    /// Authenticated direct links.
    pub links: Arc<DashMap<ConnId, LinkHandle>>,
    pub routing: Arc<RoutingTable>,
    /// Remote servers; the local server is implicit.
    pub topology: Arc<TopologyGraph>,
    pub dedup: Arc<DedupCache>,
    pub flood: Arc<FloodGate>,
    pub observer: Arc<dyn NetworkObserver>,
}

impl SyncManager {
    pub fn new(
        matrix: Arc<Matrix>,
        settings: S2SConfig,
        configured_links: Vec<LinkBlock>,
        observer: Arc<dyn NetworkObserver>,
    ) -> Self {
        Self {
            dedup: Arc::new(DedupCache::new(settings.dedup_ttl(), settings.dedup_max_entries)),
            flood: Arc::new(FloodGate::new(settings.flood_window(), settings.flood_max_lines)),
            matrix,
            settings: Arc::new(settings),
            configured_links: Arc::new(configured_links),
            links: Arc::new(DashMap::new()),
            routing: Arc::new(RoutingTable::new()),
            topology: Arc::new(TopologyGraph::new()),
            observer,
        }
    }

    pub fn local_sid(&self) -> &ServerId {
        self.matrix.local_sid()
    }

    /// Current unix time, the unit of every timestamp on the wire.
    pub fn now() -> i64 {
        chrono::Utc::now().timestamp()
    }

    /// Start an envelope line originated by this server.
    pub fn originate(&self, command: &str) -> Line {
        Line::new(command)
            .with_arg(new_message_id())
            .with_arg(self.local_sid().as_str())
    }

    // ------------------------------------------------------------------
    // Links
    // ------------------------------------------------------------------

    /// Make an authenticated peer visible to the rest of the network.
    ///
    /// Claims the route first so two sessions for one SID cannot both
    /// register. Returns the handle and the announcement for other links.
    pub fn register_link(
        &self,
        peer: &PeerIdentity,
        conn: ConnId,
        direction: LinkDirection,
        tx: mpsc::Sender<Arc<Line>>,
        cancel: CancellationToken,
    ) -> Result<(LinkHandle, Vec<Outbound>), HandshakeError> {
        if self.routing.claim(&peer.sid, conn).is_err() {
            return Err(HandshakeError::DuplicateServer(peer.sid.to_string()));
        }
        self.topology.add_server(ServerInfo {
            sid: peer.sid.clone(),
            name: peer.name.clone(),
            description: peer.description.clone(),
            hopcount: 1,
            parent: self.local_sid().clone(),
            learned_via: conn,
        });

        let handle = LinkHandle {
            conn,
            sid: peer.sid.clone(),
            name: peer.name.clone(),
            description: peer.description.clone(),
            user_sync: peer.link.user_sync,
            direction,
            tx,
            cancel,
            connected_at: Instant::now(),
        };
        self.links.insert(conn, handle.clone());
        metrics::link_up();
        info!(%conn, sid = %peer.sid, peer = %peer.name, user_sync = handle.user_sync, "Link registered");
        self.observer.server_linked(peer.sid.as_str(), &peer.name);

        let announce = Outbound::Broadcast {
            line: burst::serverlist_line(
                peer.sid.as_str(),
                &peer.name,
                self.local_sid().as_str(),
                &peer.description,
            ),
            except: Some(conn),
            scope: Scope::All,
        };
        Ok((handle, vec![announce]))
    }

    pub fn link(&self, conn: ConnId) -> Option<LinkHandle> {
        self.links.get(&conn).map(|l| l.clone())
    }

    /// The direct link to `sid`, if it is a neighbour.
    pub fn link_by_sid(&self, sid: &ServerId) -> Option<LinkHandle> {
        self.links
            .iter()
            .find(|l| &l.sid == sid)
            .map(|l| l.clone())
    }

    /// Queue `outs` on their links, in order.
    ///
    /// Targets are resolved before the first await so no map guard is held
    /// while waiting for queue space.
    pub async fn deliver(&self, outs: Vec<Outbound>) {
        for out in outs {
            let (targets, line): (Vec<LinkHandle>, Line) = match out {
                Outbound::Broadcast { line, except, scope } => (
                    self.links
                        .iter()
                        .filter(|l| Some(l.conn) != except && scope.admits(l.value()))
                        .map(|l| l.clone())
                        .collect(),
                    line,
                ),
                Outbound::Direct { conn, line } => (self.link(conn).into_iter().collect(), line),
            };
            let line = Arc::new(line);
            for link in targets {
                if !link.send(line.clone()).await {
                    debug!(conn = %link.conn, command = %line.command, "Link queue closed; line dropped");
                }
            }
        }
    }

    // ------------------------------------------------------------------
    // Collaborator API: local events out to the network
    // ------------------------------------------------------------------

    /// Register a user connected to this server and announce it.
    pub async fn introduce_local_user(&self, mut user: User) -> Result<(), RouteError> {
        user.remote_sid = None;
        if !nick_is_claimable(&user.uid, &user.nick) {
            return Err(RouteError::ErroneousNickname(user.nick));
        }
        match self.matrix.insert_user(user.clone()) {
            Ok(()) => {}
            Err(InsertError::NickInUse(_)) => return Err(RouteError::NicknameInUse(user.nick)),
            Err(InsertError::UidExists(uid)) => return Err(RouteError::UidInUse(uid)),
        }
        self.deliver(vec![Outbound::user_event(burst::user_line(&user))]).await;
        Ok(())
    }

    pub async fn propagate_join(&self, uid: &str, channel: &str) -> Result<(), RouteError> {
        if !is_channel_name(channel) {
            return Err(RouteError::NoSuchChannel(channel.to_string()));
        }
        let ts = self.matrix.channel(channel).map_or_else(Self::now, |c| c.created_ts);
        if !self.apply_join(channel, uid, ts) {
            return Err(RouteError::NoSuchUser(uid.to_string()));
        }
        let ts = self.matrix.channel(channel).map_or(ts, |c| c.created_ts);
        self.deliver(vec![Outbound::user_event(self.join_line(uid, channel, ts))])
            .await;
        Ok(())
    }

    pub async fn propagate_part(&self, uid: &str, channel: &str, reason: &str) -> Result<(), RouteError> {
        if !self.apply_part(channel, uid, reason) {
            return Err(RouteError::NoSuchChannel(channel.to_string()));
        }
        self.deliver(vec![Outbound::user_event(self.part_line(uid, channel, reason))])
            .await;
        Ok(())
    }

    pub async fn propagate_quit(&self, uid: &str, reason: &str) -> Result<(), RouteError> {
        if self.remove_and_notify(uid, reason).is_none() {
            return Err(RouteError::NoSuchUser(uid.to_string()));
        }
        let line = self.originate(QUIT).with_arg(uid).with_trailing(reason);
        self.deliver(vec![Outbound::user_event(line)]).await;
        Ok(())
    }

    /// Rename a local user; the new nick is stamped with the current time.
    pub async fn propagate_nick(&self, uid: &str, nick: &str) -> Result<(), RouteError> {
        if !nick_is_claimable(uid, nick) {
            return Err(RouteError::ErroneousNickname(nick.to_string()));
        }
        let nick_ts = Self::now();
        let old = self.matrix.rename_user(uid, nick, nick_ts).map_err(|e| match e {
            RenameError::NoSuchUser => RouteError::NoSuchUser(uid.to_string()),
            RenameError::NickInUse(_) => RouteError::NicknameInUse(nick.to_string()),
        })?;
        self.notify_rename(uid, &old, nick);
        self.deliver(vec![Outbound::user_event(self.nick_line(uid, nick, nick_ts))])
            .await;
        Ok(())
    }

    pub async fn propagate_umode(&self, uid: &str, delta: &str) -> Result<(), RouteError> {
        self.matrix
            .with_user_mut(uid, |u| u.apply_umode(delta))
            .ok_or_else(|| RouteError::NoSuchUser(uid.to_string()))?;
        let line = self.originate(UMODE).with_arg(uid).with_arg(delta);
        self.deliver(vec![Outbound::user_event(line)]).await;
        Ok(())
    }

    /// Set (or with empty `text`, clear) a topic.
    pub async fn propagate_topic(&self, channel: &str, setter: &str, text: &str) -> Result<(), RouteError> {
        let created_ts = self.channel_ts(channel)?;
        let topic = Topic {
            text: text.to_string(),
            set_by: setter.to_string(),
            set_at: Self::now(),
        };
        let line = self
            .originate(TOPIC)
            .with_arg(channel)
            .with_arg(created_ts.to_string())
            .with_arg(topic.set_at.to_string())
            .with_arg(setter)
            .with_trailing(text);
        self.apply_topic(channel, created_ts, topic);
        self.deliver(vec![Outbound::user_event(line)]).await;
        Ok(())
    }

    /// Apply a simple-mode delta such as `+nt-m`.
    pub async fn propagate_modes(&self, channel: &str, delta: &str) -> Result<(), RouteError> {
        let created_ts = self.channel_ts(channel)?;
        self.matrix.with_channel_mut(channel, |c| c.apply_mode_delta(delta));
        let line = Line::new(MODECH)
            .with_arg(channel)
            .with_arg(created_ts.to_string())
            .with_arg(delta);
        self.deliver(vec![Outbound::user_event(line)]).await;
        Ok(())
    }

    pub async fn propagate_meta(&self, channel: &str, key: Option<&str>, limit: Option<u32>) -> Result<(), RouteError> {
        let created_ts = self.channel_ts(channel)?;
        self.matrix.with_channel_mut(channel, |c| {
            c.key = key.map(str::to_string);
            c.limit = limit;
        });
        let line = Line::new(CHANMETA)
            .with_arg(channel)
            .with_arg(created_ts.to_string())
            .with_arg(key.unwrap_or("*"))
            .with_arg(limit.unwrap_or(0).to_string());
        self.deliver(vec![Outbound::user_event(line)]).await;
        Ok(())
    }

    pub async fn propagate_ban(&self, channel: &str, kind: ListKind, mask: &str, setter: &str) -> Result<(), RouteError> {
        let created_ts = self.channel_ts(channel)?;
        let entry = ListEntry {
            mask: mask.to_string(),
            set_by: setter.to_string(),
            set_at: Self::now(),
        };
        let line = burst::ban_line(channel, created_ts, kind, &entry);
        self.matrix
            .with_channel_mut(channel, |c| c.add_list_entry(kind, entry));
        self.deliver(vec![Outbound::user_event(line)]).await;
        Ok(())
    }

    pub async fn propagate_unban(&self, channel: &str, kind: ListKind, mask: &str) -> Result<(), RouteError> {
        let created_ts = self.channel_ts(channel)?;
        self.matrix
            .with_channel_mut(channel, |c| c.remove_list_entry(kind, mask));
        let line = Line::new(BANDEL)
            .with_arg(channel)
            .with_arg(created_ts.to_string())
            .with_arg(kind.token())
            .with_arg(mask);
        self.deliver(vec![Outbound::user_event(line)]).await;
        Ok(())
    }

    pub async fn propagate_member(&self, channel: &str, uid: &str, privilege: Privilege) -> Result<(), RouteError> {
        let created_ts = self.channel_ts(channel)?;
        let set = self.matrix.with_channel_mut(channel, |c| match c.members.get_mut(uid) {
            Some(slot) => {
                *slot = privilege;
                true
            }
            None => false,
        });
        if set != Some(true) {
            return Err(RouteError::NoSuchUser(uid.to_string()));
        }
        let line = burst::member_line(channel, created_ts, uid, privilege);
        self.deliver(vec![Outbound::user_event(line)]).await;
        Ok(())
    }

    /// Send a message from a local user to a channel or a remote user.
    ///
    /// Local recipients are the client layer's business and are not
    /// delivered here.
    pub async fn propagate_message(&self, kind: MessageKind, from: &str, target: &str, text: &str) -> Result<(), RouteError> {
        let line = self
            .originate(kind.as_str())
            .with_arg(from)
            .with_arg(target)
            .with_trailing(text);
        if is_channel_name(target) {
            self.deliver(vec![Outbound::user_event(line)]).await;
            return Ok(());
        }
        let uid = match self.matrix.user(target) {
            Some(user) => user.uid,
            None => self
                .matrix
                .uid_for_nick(target)
                .ok_or_else(|| RouteError::NoSuchUser(target.to_string()))?,
        };
        let next = self.next_hop(&uid)?;
        self.deliver(vec![Outbound::Direct { conn: next, line }]).await;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Collaborator API: directed operator actions
    // ------------------------------------------------------------------

    /// Disconnect a user wherever it is connected.
    pub async fn route_kill(&self, uid: &str, reason: &str) -> Result<(), RouteError> {
        self.route_directed(uid, |m| m.apply_kill(uid, reason), || {
            self.originate(KILL).with_arg(uid).with_trailing(reason)
        })
        .await
    }

    pub async fn route_svsnick(&self, uid: &str, nick: &str) -> Result<(), RouteError> {
        self.route_directed(uid, |m| m.apply_svsnick(uid, nick), || {
            self.originate(SVSNICK).with_arg(uid).with_arg(nick)
        })
        .await
    }

    pub async fn route_svsjoin(&self, uid: &str, channel: &str) -> Result<(), RouteError> {
        if !is_channel_name(channel) {
            return Err(RouteError::NoSuchChannel(channel.to_string()));
        }
        self.route_directed(uid, |m| m.apply_svsjoin(uid, channel), || {
            self.originate(SVSJOIN).with_arg(uid).with_arg(channel)
        })
        .await
    }

    pub async fn route_svspart(&self, uid: &str, channel: &str, reason: &str) -> Result<(), RouteError> {
        self.route_directed(uid, |m| m.apply_svspart(uid, channel, reason), || {
            self.originate(SVSPART)
                .with_arg(uid)
                .with_arg(channel)
                .with_trailing(reason)
        })
        .await
    }

    /// Apply a directed action here if `uid` is local, otherwise send it one
    /// hop towards the owner. Never broadcast.
    async fn route_directed(
        &self,
        uid: &str,
        apply_local: impl FnOnce(&Self) -> Vec<Outbound>,
        build: impl FnOnce() -> Line,
    ) -> Result<(), RouteError> {
        let user = self
            .matrix
            .user(uid)
            .ok_or_else(|| RouteError::NoSuchUser(uid.to_string()))?;
        if !user.is_remote() {
            let outs = apply_local(self);
            self.deliver(outs).await;
            return Ok(());
        }
        let next = self.next_hop(uid)?;
        self.deliver(vec![Outbound::Direct { conn: next, line: build() }])
            .await;
        Ok(())
    }

    fn next_hop(&self, uid: &str) -> Result<ConnId, RouteError> {
        let owner = ServerId::owner_of(uid).ok_or_else(|| RouteError::NoSuchUser(uid.to_string()))?;
        self.routing
            .route(&owner)
            .ok_or_else(|| RouteError::NoRoute(owner.to_string()))
    }

    fn channel_ts(&self, channel: &str) -> Result<i64, RouteError> {
        self.matrix
            .channel(channel)
            .map(|c| c.created_ts)
            .ok_or_else(|| RouteError::NoSuchChannel(channel.to_string()))
    }

    // ------------------------------------------------------------------
    // Collaborator API: queries and operator link control
    // ------------------------------------------------------------------

    /// Known remote servers, nearest first (LINKS / MAP).
    pub fn list_servers(&self) -> Vec<ServerInfo> {
        self.topology.remote_servers()
    }

    pub fn has_route(&self, sid: &ServerId) -> bool {
        self.routing.contains(sid)
    }

    /// Drop the direct link to `sid`. Teardown runs on the link's task.
    pub fn squit(&self, sid: &ServerId, reason: &str) -> Result<(), RouteError> {
        let Some(link) = self.link_by_sid(sid) else {
            warn!(sid = %sid, "SQUIT for a server that is not a direct link");
            return Err(RouteError::NoRoute(sid.to_string()));
        };
        info!(conn = %link.conn, sid = %sid, peer = %link.name, %reason, "Operator SQUIT");
        link.cancel.cancel();
        Ok(())
    }
}

impl std::fmt::Debug for SyncManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncManager")
            .field("sid", self.local_sid())
            .field("links", &self.links.len())
            .field("servers", &self.topology.len())
            .finish()
    }
}
