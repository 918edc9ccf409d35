//! Link tasks: the inbound listener, outbound autoconnect, and the
//! per-session reader/writer pair.

use crate::config::{LinkBlock, LinkDirection};
use crate::error::LinkError;
use crate::metrics;
use crate::sync::handshake::{HandshakeError, HandshakeMachine, PeerIdentity, Step};
use crate::sync::link::ConnId;
use crate::sync::manager::SyncManager;
use crate::telemetry::spans;
use futures_util::{Sink, SinkExt, Stream, StreamExt};
use slirc_link_proto::Line;
use slirc_link_proto::command::ERROR;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, oneshot};
use tokio_util::codec::{Framed, LinesCodec, LinesCodecError};
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, error, info, warn};

/// Longest accepted line, terminator excluded.
pub const MAX_LINE_LEN: usize = 8192;

/// How long a closing link may spend flushing its queue.
const WRITER_DRAIN: Duration = Duration::from_secs(2);

/// Wire form of a line. The codec appends `\n`.
fn wire(line: &Line) -> String {
    format!("{line}\r")
}

fn error_line(reason: impl Into<String>) -> Line {
    Line::new(ERROR).with_trailing(reason)
}

/// Run one session from handshake to teardown.
///
/// Returns `Ok` when the session ended because `cancel` fired, otherwise
/// the error that closed it.
pub async fn run_link<S>(
    manager: SyncManager,
    stream: S,
    machine: HandshakeMachine,
    cancel: CancellationToken,
) -> Result<(), LinkError>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let conn = ConnId::next();
    let direction = match machine.direction() {
        LinkDirection::Inbound => "inbound",
        LinkDirection::Outbound => "outbound",
    };
    let span = spans::link(conn, direction, &machine.peer_label());
    session(manager, conn, stream, machine, cancel)
        .instrument(span)
        .await
}

async fn session<S>(
    manager: SyncManager,
    conn: ConnId,
    stream: S,
    mut machine: HandshakeMachine,
    cancel: CancellationToken,
) -> Result<(), LinkError>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let framed = Framed::new(stream, LinesCodec::new_with_max_length(MAX_LINE_LEN));
    let (mut sink, mut lines) = framed.split();

    let timeout = manager.settings.handshake_timeout();
    let outcome = tokio::select! {
        _ = cancel.cancelled() => Err(HandshakeError::Closed),
        r = tokio::time::timeout(timeout, handshake(&mut sink, &mut lines, &mut machine)) => {
            r.unwrap_or(Err(HandshakeError::Timeout))
        }
    };
    let peer = match outcome {
        Ok(peer) => peer,
        Err(e) => return Err(reject(&mut sink, e).await),
    };
    info!(sid = %peer.sid, peer = %peer.name, capabilities = ?peer.capabilities, "Handshake complete");

    let (tx, rx) = mpsc::channel(manager.settings.send_queue);
    let link_cancel = cancel.child_token();
    let (handle, announce) =
        match manager.register_link(&peer, conn, machine.direction(), tx, link_cancel.clone()) {
            Ok(registered) => registered,
            Err(e) => return Err(reject(&mut sink, e).await),
        };
    manager.deliver(announce).await;

    let burst = manager.generate_burst(conn, handle.user_sync);
    info!(lines = burst.len(), "Sending burst");
    let (close_tx, close_rx) = oneshot::channel();
    let writer = tokio::spawn(
        write_loop(sink, rx, burst, close_rx, link_cancel.clone()).in_current_span(),
    );

    let result = read_loop(&manager, conn, &mut lines, &link_cancel).await;

    let reason = match &result {
        Ok(()) => "Link closed".to_string(),
        Err(e) => {
            if e.is_reportable() {
                let _ = close_tx.send(error_line(e.to_string()));
            }
            metrics::record_link_error(e.error_code());
            e.to_string()
        }
    };
    match &result {
        Ok(()) => info!(%reason, "Link closing"),
        Err(LinkError::Transport(_)) | Err(LinkError::Remote(_)) => info!(%reason, "Link closing"),
        Err(e) => warn!(error = %e, code = e.error_code(), "Link closing on protocol error"),
    }

    let outs = manager.teardown(conn, &reason);
    manager.deliver(outs).await;

    drop(handle);
    if tokio::time::timeout(WRITER_DRAIN, writer).await.is_err() {
        debug!("Writer did not drain in time");
    }
    link_cancel.cancel();
    result
}

/// Exchange handshake lines until the peer is authenticated.
async fn handshake<W, R>(sink: &mut W, lines: &mut R, machine: &mut HandshakeMachine) -> Result<PeerIdentity, HandshakeError>
where
    W: Sink<String, Error = LinesCodecError> + Unpin,
    R: Stream<Item = Result<String, LinesCodecError>> + Unpin,
{
    for line in machine.opening() {
        sink.send(wire(&line)).await.map_err(|_| HandshakeError::Closed)?;
    }
    while let Some(raw) = lines.next().await {
        let raw = raw.map_err(|_| HandshakeError::Closed)?;
        let line: Line = match raw.parse() {
            Ok(line) => line,
            Err(e) => {
                debug!(error = %e, "Skipping malformed handshake line");
                continue;
            }
        };
        match machine.step(&line)? {
            Step::Continue => {}
            Step::Complete { peer, reply } => {
                for line in reply {
                    sink.send(wire(&line)).await.map_err(|_| HandshakeError::Closed)?;
                }
                return Ok(peer);
            }
        }
    }
    Err(HandshakeError::Closed)
}

/// Tell the peer why it is being dropped, if it should hear it.
async fn reject<W>(sink: &mut W, e: HandshakeError) -> LinkError
where
    W: Sink<String, Error = LinesCodecError> + Unpin,
{
    if e.is_reportable() {
        let _ = sink.send(wire(&error_line(e.to_string()))).await;
    }
    let _ = sink.close().await;
    metrics::record_link_error(e.error_code());
    warn!(error = %e, code = e.error_code(), "Handshake failed");
    LinkError::from(e)
}

async fn read_loop<R>(
    manager: &SyncManager,
    conn: ConnId,
    lines: &mut R,
    cancel: &CancellationToken,
) -> Result<(), LinkError>
where
    R: Stream<Item = Result<String, LinesCodecError>> + Unpin,
{
    loop {
        let raw = tokio::select! {
            _ = cancel.cancelled() => return Ok(()),
            next = lines.next() => match next {
                Some(Ok(raw)) => raw,
                Some(Err(e)) => return Err(LinkError::Transport(e.to_string())),
                None => return Err(LinkError::Transport("connection closed by peer".to_string())),
            },
        };

        if !manager.flood.check(conn) {
            metrics::record_flood_disconnect();
            return Err(LinkError::ExcessFlood);
        }

        let line: Line = match raw.parse() {
            Ok(line) => line,
            Err(e) => {
                debug!(error = %e, "Skipping malformed line");
                continue;
            }
        };
        let outs = manager.dispatch(conn, &line)?;
        manager.deliver(outs).await;
    }
}

/// Sole owner of the write half: the burst first, then the queue.
///
/// Once every queue sender is gone the closing line, if the session left
/// one in `close`, goes out last.
async fn write_loop<W>(
    mut sink: W,
    mut rx: mpsc::Receiver<Arc<Line>>,
    burst: Vec<Line>,
    mut close: oneshot::Receiver<Line>,
    cancel: CancellationToken,
) where
    W: Sink<String, Error = LinesCodecError> + Unpin,
{
    for line in &burst {
        if let Err(e) = sink.feed(wire(line)).await {
            debug!(error = %e, "Write failed during burst");
            return;
        }
    }
    if sink.flush().await.is_err() {
        return;
    }

    loop {
        let line = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            next = rx.recv() => match next {
                Some(line) => line,
                None => {
                    if let Ok(last) = close.try_recv() {
                        let _ = sink.send(wire(&last)).await;
                    }
                    break;
                }
            },
        };
        if let Err(e) = sink.send(wire(&line)).await {
            debug!(error = %e, "Write failed");
            break;
        }
    }
    let _ = sink.close().await;
}

/// Accept inbound links on `addr` until `cancel` fires.
pub async fn run_listener(manager: SyncManager, addr: SocketAddr, cancel: CancellationToken) -> std::io::Result<()> {
    let listener = TcpListener::bind(addr).await?;
    info!(address = %addr, "S2S listener started");

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                info!("S2S listener stopping");
                return Ok(());
            }
            res = listener.accept() => match res {
                Ok((stream, peer_addr)) => {
                    info!(peer = %peer_addr, "Inbound S2S connection");
                    let machine = HandshakeMachine::inbound(
                        manager.matrix.me.clone(),
                        manager.configured_links.to_vec(),
                        Some(peer_addr.ip()),
                    );
                    let manager = manager.clone();
                    let cancel = cancel.clone();
                    tokio::spawn(async move {
                        let _ = run_link(manager, stream, machine, cancel).await;
                    });
                }
                Err(e) => error!(error = %e, "Failed to accept S2S connection"),
            },
        }
    }
}

/// Keep an outbound link up, redialing after every drop.
pub async fn run_outbound(manager: SyncManager, link: LinkBlock, cancel: CancellationToken) {
    let delay = manager.settings.reconnect_delay();
    loop {
        let address = link.address();
        info!(peer = %link.name, address = %address, "Connecting to peer");
        let connected = tokio::select! {
            _ = cancel.cancelled() => return,
            r = TcpStream::connect(&address) => r,
        };
        match connected {
            Ok(stream) => {
                let machine = HandshakeMachine::outbound(manager.matrix.me.clone(), link.clone());
                let _ = run_link(manager.clone(), stream, machine, cancel.clone()).await;
            }
            Err(e) => warn!(peer = %link.name, address = %address, error = %e, "Connect failed"),
        }

        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = tokio::time::sleep(delay) => {}
        }
    }
}

/// Start the listener and every outbound link.
pub fn spawn_links(manager: &SyncManager, cancel: &CancellationToken) {
    if let Some(addr) = manager.settings.listen {
        let manager = manager.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if let Err(e) = run_listener(manager, addr, cancel).await {
                error!(address = %addr, error = %e, "S2S listener failed");
            }
        });
    }

    for link in manager
        .configured_links
        .iter()
        .filter(|l| l.direction == LinkDirection::Outbound)
    {
        tokio::spawn(run_outbound(manager.clone(), link.clone(), cancel.clone()));
    }
}
