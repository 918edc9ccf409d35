//! Cross-module scenarios: several links feeding one manager, bursts
//! replayed into a second manager, netsplits.

use super::dispatch::Outbound;
use super::handshake::PeerIdentity;
use super::link::ConnId;
use super::manager::SyncManager;
use crate::config::{LinkBlock, LinkDirection, S2SConfig};
use crate::error::{LinkError, RouteError};
use crate::state::{
    ListEntry, ListKind, Matrix, MessageKind, NetworkObserver, Privilege, ServerIdentity, Topic, Uid, User,
};
use parking_lot::Mutex;
use slirc_link_proto::command::{NICK, QUIT, SQUIT};
use slirc_link_proto::{Line, ServerId};
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Observer that writes every callback down.
#[derive(Default)]
pub(crate) struct Recorder {
    events: Mutex<Vec<String>>,
}

impl Recorder {
    pub(crate) fn events(&self) -> Vec<String> {
        self.events.lock().clone()
    }

    fn push(&self, event: String) {
        self.events.lock().push(event);
    }
}

impl NetworkObserver for Recorder {
    fn user_logon(&self, user: &User) {
        self.push(format!("logon {}", user.nick));
    }
    fn user_logoff(&self, user: &User) {
        self.push(format!("logoff {}", user.nick));
    }
    fn nick_changed(&self, uid: &str, old: &str, new: &str) {
        self.push(format!("nick {uid} {old}->{new}"));
    }
    fn user_quit(&self, user: &User, reason: &str) {
        self.push(format!("quit {} {reason}", user.uid));
    }
    fn user_joined(&self, channel: &str, uid: &str) {
        self.push(format!("join {channel} {uid}"));
    }
    fn user_parted(&self, channel: &str, uid: &str, reason: &str) {
        self.push(format!("part {channel} {uid} {reason}"));
    }
    fn topic_changed(&self, channel: &str, topic: &Topic) {
        self.push(format!("topic {channel} {}", topic.text));
    }
    fn channel_reset(&self, channel: &str, created_ts: i64) {
        self.push(format!("reset {channel} {created_ts}"));
    }
    fn deliver(&self, kind: MessageKind, from: &User, target: &str, text: &str, recipients: &[Uid]) {
        self.push(format!(
            "{} {}->{target} {text} [{}]",
            kind.as_str(),
            from.nick,
            recipients.join(",")
        ));
    }
    fn disconnect_local(&self, uid: &str, reason: &str) {
        self.push(format!("disconnect {uid} {reason}"));
    }
    fn server_linked(&self, sid: &str, name: &str) {
        self.push(format!("linked {sid} {name}"));
    }
    fn server_split(&self, sid: &str, name: &str) {
        self.push(format!("split {sid} {name}"));
    }
}

pub(crate) fn manager(sid: &str) -> (SyncManager, Arc<Recorder>) {
    let matrix = Arc::new(Matrix::new(ServerIdentity {
        sid: ServerId::parse(sid).unwrap(),
        name: format!("s{sid}.test"),
        description: format!("Server {sid}"),
    }));
    let recorder = Arc::new(Recorder::default());
    let manager = SyncManager::new(matrix, S2SConfig::default(), Vec::new(), recorder.clone());
    (manager, recorder)
}

fn link_block(name: &str, user_sync: bool) -> LinkBlock {
    LinkBlock {
        name: name.to_string(),
        sid: None,
        hostname: "127.0.0.1".to_string(),
        port: 7000,
        password: "pw".to_string(),
        direction: LinkDirection::Inbound,
        user_sync,
        allowed_ips: Vec::new(),
    }
}

/// Register a fake direct link to `sid`; the receiver sees what is queued.
pub(crate) fn attach(manager: &SyncManager, sid: &str, user_sync: bool) -> (ConnId, mpsc::Receiver<Arc<Line>>) {
    let name = format!("s{sid}.test");
    let peer = PeerIdentity {
        name: name.clone(),
        sid: ServerId::parse(sid).unwrap(),
        description: format!("Server {sid}"),
        capabilities: Vec::new(),
        link: link_block(&name, user_sync),
    };
    let conn = ConnId::next();
    let (tx, rx) = mpsc::channel(1024);
    manager
        .register_link(&peer, conn, LinkDirection::Inbound, tx, CancellationToken::new())
        .unwrap();
    (conn, rx)
}

fn line(raw: &str) -> Line {
    raw.parse().unwrap()
}

fn local_user(uid: &str, nick: &str, nick_ts: i64) -> User {
    User {
        uid: uid.to_string(),
        nick: nick.to_string(),
        nick_ts,
        ident: "ident".to_string(),
        host: "host.test".to_string(),
        realname: "Real Name".to_string(),
        secure: false,
        invisible: false,
        remote_sid: None,
        channels: HashSet::new(),
    }
}

fn drain(rx: &mut mpsc::Receiver<Arc<Line>>) -> Vec<String> {
    let mut out = Vec::new();
    while let Ok(line) = rx.try_recv() {
        out.push(line.to_string());
    }
    out
}

// ----------------------------------------------------------------------
// Conflict resolution
// ----------------------------------------------------------------------

#[test]
fn older_incoming_nick_wins_and_both_renames_propagate() {
    let (a, recorder) = manager("001");
    a.matrix.insert_user(local_user("001AAAAAA", "bob", 100)).unwrap();
    let (conn, _rx) = attach(&a, "002", true);

    a.dispatch(conn, &line("USER 002BBBBBB carol 40 c host 0 + :Carol"))
        .unwrap();
    let nick = line("NICK m1 002 002BBBBBB bob 50");
    let outs = a.dispatch(conn, &nick).unwrap();

    assert_eq!(a.matrix.uid_for_nick("bob").as_deref(), Some("002BBBBBB"));
    assert_eq!(a.matrix.user("001AAAAAA").unwrap().nick, "001AAAAAA");

    assert_eq!(outs.len(), 2);
    assert_eq!(outs[0], Outbound::relay(&nick, conn));
    let rename = outs[1].line();
    assert_eq!(rename.command, NICK);
    assert_eq!(rename.arg(1), Some("001"));
    assert_eq!(rename.arg(2), Some("001AAAAAA"));
    assert_eq!(rename.arg(3), Some("001AAAAAA"));
    assert!(matches!(outs[1], Outbound::Broadcast { except: None, .. }));

    let events = recorder.events();
    let loser = events.iter().position(|e| e == "nick 001AAAAAA bob->001AAAAAA").unwrap();
    let winner = events.iter().position(|e| e == "nick 002BBBBBB carol->bob").unwrap();
    assert!(loser < winner);
    assert!(events.contains(&"logoff bob".to_string()));
}

#[test]
fn newer_incoming_nick_loses_to_the_holder() {
    let (a, _) = manager("001");
    a.matrix.insert_user(local_user("001AAAAAA", "bob", 100)).unwrap();
    let (conn, _rx) = attach(&a, "002", true);

    a.dispatch(conn, &line("USER 002BBBBBB carol 40 c host 0 + :Carol"))
        .unwrap();
    let outs = a
        .dispatch(conn, &line("NICK m1 002 002BBBBBB bob 150"))
        .unwrap();

    assert_eq!(a.matrix.uid_for_nick("bob").as_deref(), Some("001AAAAAA"));
    assert_eq!(a.matrix.user("002BBBBBB").unwrap().nick, "002BBBBBB");
    // The losing NICK is not relayed; only the forced rename travels.
    assert_eq!(outs.len(), 1);
    assert!(matches!(outs[0], Outbound::Broadcast { except: None, .. }));
    assert!(outs[0].line().to_string().ends_with("002BBBBBB 002BBBBBB 150"));
}

#[test]
fn equal_timestamps_go_to_the_smaller_sid() {
    let (a, _) = manager("005");
    let (conn_b, _rb) = attach(&a, "002", true);
    let (conn_c, _rc) = attach(&a, "003", true);

    a.dispatch(conn_c, &line("USER 003AAAAAA bob 100 u h 0 + :C"))
        .unwrap();
    a.dispatch(conn_b, &line("USER 002AAAAAA bob 100 u h 0 + :B"))
        .unwrap();

    assert_eq!(a.matrix.uid_for_nick("bob").as_deref(), Some("002AAAAAA"));
    assert_eq!(a.matrix.user("003AAAAAA").unwrap().nick, "003AAAAAA");
}

#[test]
fn uid_collision_is_fatal() {
    let (a, _) = manager("001");
    let (conn, _rx) = attach(&a, "002", true);
    let (other, _ro) = attach(&a, "003", true);
    a.dispatch(conn, &line("USER 002AAAAAA bob 1 u h 0 + :B"))
        .unwrap();
    let err = a
        .dispatch(other, &line("USER 002AAAAAA other 1 u h 0 + :B"))
        .unwrap_err();
    assert!(matches!(err, LinkError::UidCollision(_)));

    let err = a
        .dispatch(conn, &line("USER 001AAAAAA mine 1 u h 0 + :B"))
        .unwrap_err();
    assert!(matches!(err, LinkError::UidCollision(_)));
}

#[tokio::test]
async fn user_introduced_during_link_registration_arrives_twice_harmlessly() {
    let (hub, _) = manager("001");
    let (conn, mut rx) = attach(&hub, "003", true);
    // Registered, burst not yet generated: the user lands in both.
    hub.introduce_local_user(local_user("001AAAAAA", "bob", 10)).await.unwrap();
    let burst = hub.generate_burst(conn, true);
    let queued = drain(&mut rx);
    assert_eq!(queued.len(), 1);

    let (leaf, recorder) = manager("003");
    let (from_hub, _rh) = attach(&leaf, "001", true);
    for record in &burst {
        leaf.dispatch(from_hub, record).unwrap();
    }
    for raw in &queued {
        assert!(leaf.dispatch(from_hub, &line(raw)).unwrap().is_empty());
    }

    assert_eq!(leaf.matrix.user_count(), 1);
    assert_eq!(leaf.matrix.uid_for_nick("bob").as_deref(), Some("001AAAAAA"));
    let logons = recorder.events().into_iter().filter(|e| e == "logon bob").count();
    assert_eq!(logons, 1);
}

#[test]
fn digit_led_nick_from_a_peer_becomes_the_collision_nick() {
    let (a, _) = manager("001");
    a.matrix.insert_user(local_user("001AAAAAA", "bob", 100)).unwrap();
    let (conn, _rx) = attach(&a, "002", true);

    // Squatting on another user's collision nick.
    let user = line("USER 002AAAAAA 001AAAAAA 5 u h 0 + :E");
    let outs = a.dispatch(conn, &user).unwrap();
    assert_eq!(a.matrix.user("002AAAAAA").unwrap().nick, "002AAAAAA");
    assert_eq!(outs.len(), 2);
    assert_eq!(outs[0], Outbound::relay(&user, conn));
    assert_eq!(outs[1].line().arg(3), Some("002AAAAAA"));

    a.dispatch(conn, &line("NICK n1 002 002AAAAAA eve 6")).unwrap();
    let outs = a.dispatch(conn, &line("NICK n2 002 002AAAAAA 9lives 7")).unwrap();
    assert_eq!(a.matrix.user("002AAAAAA").unwrap().nick, "002AAAAAA");
    assert_eq!(outs.len(), 1);
    assert_eq!(outs[0].line().arg(1), Some("001"));

    // The local user losing a collision still finds its uid free.
    let outs = a.dispatch(conn, &line("NICK n3 002 002AAAAAA bob 50")).unwrap();
    assert_eq!(a.matrix.uid_for_nick("bob").as_deref(), Some("002AAAAAA"));
    assert_eq!(a.matrix.user("001AAAAAA").unwrap().nick, "001AAAAAA");
    assert_eq!(outs.len(), 2);
}

#[tokio::test]
async fn local_nicks_may_not_start_with_a_digit() {
    let (a, _) = manager("001");
    let (conn, _rx) = attach(&a, "002", true);
    assert_eq!(
        a.introduce_local_user(local_user("001AAAAAA", "9lives", 1)).await,
        Err(RouteError::ErroneousNickname("9lives".to_string()))
    );
    a.introduce_local_user(local_user("001AAAAAA", "bob", 1)).await.unwrap();
    assert_eq!(
        a.propagate_nick("001AAAAAA", "002BBBBBB").await,
        Err(RouteError::ErroneousNickname("002BBBBBB".to_string()))
    );
    assert_eq!(a.matrix.user("001AAAAAA").unwrap().nick, "bob");

    let outs = a
        .dispatch(conn, &line("SVSNICK s1 002 001AAAAAA 002BBBBBB"))
        .unwrap();
    assert_eq!(a.matrix.user("001AAAAAA").unwrap().nick, "001AAAAAA");
    assert_eq!(outs[0].line().arg(3), Some("001AAAAAA"));
}

#[test]
fn peers_cannot_rename_or_remode_local_users() {
    let (a, recorder) = manager("001");
    a.matrix.insert_user(local_user("001AAAAAA", "bob", 100)).unwrap();
    let (conn, _rx) = attach(&a, "002", true);

    let outs = a.dispatch(conn, &line("NICK n1 002 001AAAAAA mallory 5")).unwrap();
    assert!(outs.is_empty());
    assert_eq!(a.matrix.user("001AAAAAA").unwrap().nick, "bob");

    let outs = a.dispatch(conn, &line("UMODE u1 002 001AAAAAA +i")).unwrap();
    assert!(outs.is_empty());
    assert!(!a.matrix.user("001AAAAAA").unwrap().invisible);

    // A collision rename onto the uid is accepted and re-announced by us.
    let outs = a.dispatch(conn, &line("NICK n2 002 001AAAAAA 001AAAAAA 100")).unwrap();
    assert_eq!(a.matrix.user("001AAAAAA").unwrap().nick, "001AAAAAA");
    assert_eq!(outs.len(), 1);
    assert_eq!(outs[0].line().arg(1), Some("001"));
    assert!(recorder.events().contains(&"nick 001AAAAAA bob->001AAAAAA".to_string()));
    let again = a.dispatch(conn, &line("NICK n3 002 001AAAAAA 001AAAAAA 100")).unwrap();
    assert!(again.is_empty());
}

// ----------------------------------------------------------------------
// Loop safety
// ----------------------------------------------------------------------

#[test]
fn event_arriving_on_two_paths_is_applied_once() {
    let (b, recorder) = manager("002");
    let (from_a, _ra) = attach(&b, "001", true);
    let (from_c, _rc) = attach(&b, "003", true);
    b.dispatch(from_a, &line("USER 001AAAAAA alice 1 u h 0 + :A"))
        .unwrap();

    let join = line("JOIN 7d1e 001 001AAAAAA #loop 500");
    let first = b.dispatch(from_a, &join).unwrap();
    let second = b.dispatch(from_c, &join).unwrap();

    assert_eq!(first, vec![Outbound::relay(&join, from_a)]);
    assert!(second.is_empty());
    let joins = recorder
        .events()
        .into_iter()
        .filter(|e| e.starts_with("join #loop"))
        .count();
    assert_eq!(joins, 1);
    assert!(b.dedup.contains("7d1e"));
}

#[test]
fn own_origin_echo_is_dropped() {
    let (a, _) = manager("001");
    let (conn, _rx) = attach(&a, "002", true);
    a.matrix.insert_user(local_user("001AAAAAA", "bob", 1)).unwrap();
    let outs = a
        .dispatch(conn, &line("QUIT e1 001 001AAAAAA :echo"))
        .unwrap();
    assert!(outs.is_empty());
    assert!(a.matrix.user("001AAAAAA").is_some());
    assert!(!a.dedup.contains("e1"));
}

#[test]
fn topology_only_link_ignores_user_state() {
    let (a, _) = manager("001");
    let (conn, _rx) = attach(&a, "002", false);
    let outs = a
        .dispatch(conn, &line("USER 002AAAAAA bob 1 u h 0 + :B"))
        .unwrap();
    assert!(outs.is_empty());
    assert_eq!(a.matrix.user_count(), 0);

    let outs = a
        .dispatch(conn, &line("SERVERLIST 003 c.test 002 :C"))
        .unwrap();
    assert_eq!(outs.len(), 1);
    assert!(a.has_route(&ServerId::parse("003").unwrap()));
}

// ----------------------------------------------------------------------
// Burst
// ----------------------------------------------------------------------

#[test]
fn burst_replayed_into_a_peer_reproduces_state() {
    let (a, _) = manager("001");
    let mut bob = local_user("001AAAAAA", "bob", 10);
    bob.secure = true;
    bob.invisible = true;
    a.matrix.insert_user(bob).unwrap();
    a.matrix.insert_user(local_user("001AAAAAB", "carol", 20)).unwrap();

    // A remote user learned over another link travels in the burst too.
    let (conn_c, _rc) = attach(&a, "003", true);
    a.dispatch(conn_c, &line("USER 003AAAAAA dave 30 d h 0 + :Dave"))
        .unwrap();

    a.matrix.join("#Rust", "001AAAAAA", 100).unwrap();
    a.matrix.join("#Rust", "001AAAAAB", 100).unwrap();
    a.matrix.join("#Rust", "003AAAAAA", 100).unwrap();
    a.matrix.with_channel_mut("#Rust", |c| {
        c.apply_mode_delta("+ntm");
        c.key = Some("k3y".to_string());
        c.limit = Some(10);
        c.members.insert("001AAAAAA".to_string(), Privilege::Op);
        c.members.insert("003AAAAAA".to_string(), Privilege::Voice);
        c.add_list_entry(
            ListKind::Ban,
            ListEntry {
                mask: "*!*@spam".to_string(),
                set_by: "bob".to_string(),
                set_at: 150,
            },
        );
        c.add_list_entry(
            ListKind::Except,
            ListEntry {
                mask: "*!*@friend".to_string(),
                set_by: "bob".to_string(),
                set_at: 151,
            },
        );
        c.topic = Some(Topic {
            text: "Systems programming".to_string(),
            set_by: "bob".to_string(),
            set_at: 160,
        });
    });

    let (conn_b, _rb) = attach(&a, "002", true);
    let burst = a.generate_burst(conn_b, true);
    assert_eq!(burst.first().map(|l| l.to_string()).as_deref(), Some("SERVERLIST 001 s001.test * :Server 001"));
    assert_eq!(burst.last().map(|l| l.command.as_str()), Some("ENDBURST"));

    let (b, _) = manager("002");
    let (conn_a, _ra) = attach(&b, "001", true);
    for record in &burst {
        b.dispatch(conn_a, record).unwrap();
    }

    assert_eq!(b.matrix.channel("#rust"), a.matrix.channel("#rust"));
    for original in a.matrix.snapshot_users() {
        let mut copy = b.matrix.user(&original.uid).unwrap();
        let owner = ServerId::owner_of(&original.uid).unwrap();
        assert_eq!(copy.remote_sid.as_ref(), Some(&owner));
        copy.remote_sid = original.remote_sid.clone();
        assert_eq!(copy, original);
    }
    assert_eq!(b.matrix.user_count(), 3);
    let c = b.topology.get(&ServerId::parse("003").unwrap()).unwrap();
    assert_eq!(c.hopcount, 2);
    assert_eq!(c.parent.as_str(), "001");
}

#[test]
fn burst_never_echoes_what_the_peer_sent() {
    let (a, _) = manager("001");
    let (conn_b, _rb) = attach(&a, "002", true);
    a.dispatch(conn_b, &line("SERVERLIST 004 d.test 002 :D")).unwrap();
    a.dispatch(conn_b, &line("USER 004AAAAAA eve 1 u h 0 + :E")).unwrap();
    a.dispatch(conn_b, &line("CHAN #peer 5 :004AAAAAA")).unwrap();

    let rendered: Vec<String> = a
        .generate_burst(conn_b, true)
        .iter()
        .map(ToString::to_string)
        .collect();
    assert_eq!(rendered, vec!["SERVERLIST 001 s001.test * :Server 001", "ENDBURST"]);
}

#[test]
fn topology_only_burst_has_no_users() {
    let (a, _) = manager("001");
    a.matrix.insert_user(local_user("001AAAAAA", "bob", 1)).unwrap();
    let (conn, _rx) = attach(&a, "002", false);
    let burst = a.generate_burst(conn, false);
    assert!(burst.iter().all(|l| l.command != "USER"));
}

// ----------------------------------------------------------------------
// Channel TS
// ----------------------------------------------------------------------

#[test]
fn channel_records_follow_the_ts_rule() {
    let (a, recorder) = manager("001");
    let (conn, _rx) = attach(&a, "002", true);
    a.matrix.insert_user(local_user("001AAAAAA", "bob", 1)).unwrap();
    a.dispatch(conn, &line("USER 002AAAAAA eve 1 u h 0 + :E")).unwrap();
    a.matrix.join("#ts", "001AAAAAA", 200).unwrap();
    a.matrix.with_channel_mut("#ts", |c| {
        c.apply_mode_delta("+s");
        c.members.insert("001AAAAAA".to_string(), Privilege::Op);
    });

    // Newer creation: payload ignored, membership honored.
    assert!(a.dispatch(conn, &line("MODECH #ts 300 +m")).unwrap().is_empty());
    a.dispatch(conn, &line("CHAN #ts 300 :002AAAAAA")).unwrap();
    let chan = a.matrix.channel("#ts").unwrap();
    assert_eq!(chan.mode_string(), "+s");
    assert!(chan.members.contains_key("002AAAAAA"));

    // Older creation: wipe then apply.
    let outs = a.dispatch(conn, &line("MODECH #ts 150 +nt")).unwrap();
    assert_eq!(outs.len(), 1);
    let chan = a.matrix.channel("#ts").unwrap();
    assert_eq!(chan.created_ts, 150);
    assert_eq!(chan.mode_string(), "+nt");
    assert_eq!(chan.members.get("001AAAAAA"), Some(&Privilege::None));
    assert!(recorder.events().contains(&"reset #ts 150".to_string()));

    // Same record again changes nothing.
    a.dispatch(conn, &line("MODECH #ts 150 +nt")).unwrap();
    a.dispatch(conn, &line("CHANMETA #ts 150 key 5")).unwrap();
    let once = a.matrix.channel("#ts").unwrap();
    a.dispatch(conn, &line("CHANMETA #ts 150 key 5")).unwrap();
    a.dispatch(conn, &line("BAN #ts 150 b *!*@x eve 1")).unwrap();
    let after_ban = a.matrix.channel("#ts").unwrap();
    a.dispatch(conn, &line("BAN #ts 150 b *!*@X eve 1")).unwrap();
    assert_eq!(a.matrix.channel("#ts").unwrap(), after_ban);
    assert_eq!(once.key.as_deref(), Some("key"));
    assert_eq!(once.limit, Some(5));

    a.dispatch(conn, &line("BANDEL #ts 150 b *!*@x")).unwrap();
    assert!(a.matrix.channel("#ts").unwrap().bans.is_empty());
}

#[test]
fn topic_applies_only_when_not_older() {
    let (a, recorder) = manager("001");
    let (conn, _rx) = attach(&a, "002", true);
    a.dispatch(conn, &line("USER 002AAAAAA eve 1 u h 0 + :E")).unwrap();
    a.dispatch(conn, &line("CHAN #t 100 :002AAAAAA")).unwrap();

    let outs = a
        .dispatch(conn, &line("TOPIC t1 002 #t 100 500 eve :fresh topic"))
        .unwrap();
    assert_eq!(outs.len(), 1);
    let outs = a
        .dispatch(conn, &line("TOPIC t2 002 #t 100 400 eve :stale topic"))
        .unwrap();
    assert!(outs.is_empty());
    assert_eq!(a.matrix.channel("#t").unwrap().topic.unwrap().text, "fresh topic");

    a.dispatch(conn, &line("TOPICSET #t 100 600 eve :")).unwrap();
    assert!(a.matrix.channel("#t").unwrap().topic.is_none());
    assert!(recorder.events().contains(&"topic #t fresh topic".to_string()));
}

// ----------------------------------------------------------------------
// Netsplits
// ----------------------------------------------------------------------

#[tokio::test]
async fn losing_a_link_removes_its_whole_subtree() {
    let (a, recorder) = manager("001");
    let (conn_b, _rb) = attach(&a, "002", true);
    let (_conn_d, mut rd) = attach(&a, "004", true);
    a.matrix.insert_user(local_user("001AAAAAA", "bob", 1)).unwrap();

    a.dispatch(conn_b, &line("SERVERLIST 003 c.test 002 :C")).unwrap();
    for raw in [
        "USER 002AAAAAA u1 1 u h 0 + :x",
        "USER 003AAAAAA u2 1 u h 0 + :x",
        "USER 003AAAAAB u3 1 u h 0 + :x",
        "CHAN #mix 10 :002AAAAAA 003AAAAAA",
    ] {
        a.dispatch(conn_b, &line(raw)).unwrap();
    }
    a.matrix.join("#mix", "001AAAAAA", 10).unwrap();
    drain(&mut rd);

    let outs = a.teardown(conn_b, "Connection reset by peer");
    let quits: HashSet<String> = outs
        .iter()
        .filter(|o| o.line().command == QUIT)
        .map(|o| o.line().arg(2).unwrap().to_string())
        .collect();
    assert_eq!(quits.len(), 3);
    assert_eq!(outs.iter().filter(|o| o.line().command == QUIT).count(), 3);
    let squit = outs.last().unwrap().line();
    assert_eq!(squit.command, SQUIT);
    assert_eq!(squit.arg(2), Some("002"));

    assert_eq!(a.matrix.user_count(), 1);
    assert_eq!(a.matrix.channel("#mix").unwrap().members.len(), 1);
    assert_eq!(a.topology.len(), 1);
    assert!(!a.has_route(&ServerId::parse("003").unwrap()));
    let events = recorder.events();
    assert!(events.contains(&"split 002 s002.test".to_string()));
    assert!(events.contains(&"split 003 c.test".to_string()));

    a.deliver(outs).await;
    let seen = drain(&mut rd);
    assert_eq!(seen.len(), 4);
    assert!(seen.iter().all(|l| l.contains("*.net *.split") || l.starts_with("SQUIT")));

    assert!(a.teardown(conn_b, "again").is_empty());
}

#[test]
fn teardown_of_an_unregistered_session_is_a_no_op() {
    let (a, _) = manager("001");
    assert!(a.teardown(ConnId::next(), "handshake failed").is_empty());
}

#[test]
fn remote_squit_drops_only_the_named_subtree() {
    let (a, _) = manager("001");
    let (conn_b, _rb) = attach(&a, "002", true);
    a.dispatch(conn_b, &line("SERVERLIST 003 c.test 002 :C")).unwrap();
    a.dispatch(conn_b, &line("SERVERLIST 005 e.test 003 :E")).unwrap();
    a.dispatch(conn_b, &line("USER 005AAAAAA u 1 u h 0 + :x")).unwrap();
    a.dispatch(conn_b, &line("USER 002AAAAAA v 1 u h 0 + :x")).unwrap();

    let outs = a
        .dispatch(conn_b, &line("SQUIT s1 002 003 :gone"))
        .unwrap();
    assert_eq!(outs.len(), 1);
    assert!(a.has_route(&ServerId::parse("002").unwrap()));
    assert!(!a.has_route(&ServerId::parse("005").unwrap()));
    assert!(a.matrix.user("005AAAAAA").is_none());
    assert!(a.matrix.user("002AAAAAA").is_some());
}

#[test]
fn duplicate_server_announcement_is_fatal() {
    let (a, _) = manager("001");
    let (conn_b, _rb) = attach(&a, "002", true);
    let (conn_c, _rc) = attach(&a, "003", true);
    a.dispatch(conn_b, &line("SERVERLIST 009 x.test 002 :X")).unwrap();
    let err = a
        .dispatch(conn_c, &line("SERVERLIST 009 x.test 003 :X"))
        .unwrap_err();
    assert!(matches!(err, LinkError::DuplicateServer(_)));
    let err = a
        .dispatch(conn_c, &line("SERVERLIST 001 me.test 003 :Me"))
        .unwrap_err();
    assert!(matches!(err, LinkError::SelfCollision(_)));
}

// ----------------------------------------------------------------------
// Directed commands and messages
// ----------------------------------------------------------------------

#[test]
fn kill_is_forwarded_towards_the_owner() {
    let (a, recorder) = manager("001");
    let (conn_b, _rb) = attach(&a, "002", true);
    let (conn_c, _rc) = attach(&a, "003", true);
    a.dispatch(conn_c, &line("USER 003AAAAAA mal 1 u h 0 + :x")).unwrap();
    a.matrix.insert_user(local_user("001AAAAAA", "bob", 1)).unwrap();

    let kill = line("KILL k1 002 003AAAAAA :spam");
    assert_eq!(
        a.dispatch(conn_b, &kill).unwrap(),
        vec![Outbound::Direct { conn: conn_c, line: kill.clone() }]
    );

    let outs = a
        .dispatch(conn_b, &line("KILL k2 002 001AAAAAA :spam"))
        .unwrap();
    assert!(a.matrix.user("001AAAAAA").is_none());
    assert_eq!(outs.len(), 1);
    assert_eq!(outs[0].line().command, QUIT);
    assert_eq!(outs[0].line().trailing.as_deref(), Some("Killed (spam)"));
    assert!(recorder.events().contains(&"disconnect 001AAAAAA Killed (spam)".to_string()));
}

#[test]
fn svsnick_on_a_local_user_originates_a_nick() {
    let (a, _) = manager("001");
    let (conn_b, _rb) = attach(&a, "002", true);
    a.matrix.insert_user(local_user("001AAAAAA", "bob", 1)).unwrap();
    let outs = a
        .dispatch(conn_b, &line("SVSNICK s1 002 001AAAAAA robert"))
        .unwrap();
    assert_eq!(a.matrix.user("001AAAAAA").unwrap().nick, "robert");
    assert_eq!(outs.len(), 1);
    assert_eq!(outs[0].line().arg(3), Some("robert"));
}

#[test]
fn channel_message_reaches_local_members_and_travels_on() {
    let (a, recorder) = manager("001");
    let (conn_b, _rb) = attach(&a, "002", true);
    a.matrix.insert_user(local_user("001AAAAAA", "bob", 1)).unwrap();
    a.dispatch(conn_b, &line("USER 002AAAAAA eve 1 u h 0 + :E")).unwrap();
    a.matrix.join("#chat", "001AAAAAA", 1).unwrap();
    a.dispatch(conn_b, &line("JOIN j1 002 002AAAAAA #chat 1")).unwrap();

    let msg = line("PRIVMSG p1 002 002AAAAAA #chat :hello there");
    assert_eq!(a.dispatch(conn_b, &msg).unwrap(), vec![Outbound::relay(&msg, conn_b)]);
    assert!(recorder
        .events()
        .contains(&"PRIVMSG eve->#chat hello there [001AAAAAA]".to_string()));
}

#[tokio::test]
async fn directed_actions_report_missing_routes() {
    let (a, _) = manager("001");
    assert_eq!(
        a.route_kill("009AAAAAA", "x").await,
        Err(RouteError::NoSuchUser("009AAAAAA".to_string()))
    );

    let (conn_b, mut rb) = attach(&a, "002", true);
    a.dispatch(conn_b, &line("USER 002AAAAAA eve 1 u h 0 + :E")).unwrap();
    a.route_svsjoin("002AAAAAA", "#help").await.unwrap();
    let sent = drain(&mut rb);
    assert_eq!(sent.len(), 1);
    assert!(sent[0].starts_with("SVSJOIN "));
    assert!(sent[0].ends_with(" 001 002AAAAAA #help"));

    a.routing.remove(&ServerId::parse("002").unwrap());
    assert_eq!(
        a.route_svsnick("002AAAAAA", "x").await,
        Err(RouteError::NoRoute("002".to_string()))
    );
}

#[tokio::test]
async fn local_events_reach_user_sync_links_only() {
    let (a, _) = manager("001");
    let (_b, mut rb) = attach(&a, "002", true);
    let (_c, mut rc) = attach(&a, "003", false);
    a.introduce_local_user(local_user("001AAAAAA", "bob", 1)).await.unwrap();
    a.propagate_join("001AAAAAA", "#rust").await.unwrap();
    a.propagate_message(MessageKind::Privmsg, "001AAAAAA", "#rust", "hi").await.unwrap();

    let seen = drain(&mut rb);
    assert_eq!(seen.len(), 3);
    assert!(seen[0].starts_with("USER 001AAAAAA bob 1 "));
    assert!(seen[1].starts_with("JOIN "));
    assert!(seen[2].ends_with(" 001 001AAAAAA #rust :hi"));
    assert!(drain(&mut rc).is_empty());

    assert_eq!(
        a.introduce_local_user(local_user("001AAAAAB", "BOB", 2)).await,
        Err(RouteError::NicknameInUse("BOB".to_string()))
    );
}
