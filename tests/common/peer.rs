//! Scripted remote server.

use futures_util::{SinkExt, StreamExt};
use slirc_link_proto::Line;
use std::time::Duration;
use tokio::io::DuplexStream;
use tokio::time::timeout;
use tokio_util::codec::{Framed, LinesCodec};

const RECV_TIMEOUT: Duration = Duration::from_secs(5);

/// The far end of a link, driven line by line from a test.
pub struct TestPeer {
    framed: Framed<DuplexStream, LinesCodec>,
}

impl TestPeer {
    pub fn new(stream: DuplexStream) -> Self {
        Self {
            framed: Framed::new(stream, LinesCodec::new()),
        }
    }

    /// Send one raw line.
    pub async fn send(&mut self, line: &str) -> anyhow::Result<()> {
        self.framed.send(format!("{line}\r")).await?;
        Ok(())
    }

    /// Send the three handshake lines for `name`/`sid`.
    pub async fn greet(&mut self, name: &str, sid: &str, password: &str) -> anyhow::Result<()> {
        self.send("CAPAB :DEDUP SVS USERSYNC").await?;
        self.send(&format!("PASS {password} :TS 1")).await?;
        self.send(&format!("SERVER {name} {sid} :Test peer {sid}")).await
    }

    /// Receive the next line.
    pub async fn recv(&mut self) -> anyhow::Result<Line> {
        let raw = timeout(RECV_TIMEOUT, self.framed.next())
            .await?
            .ok_or_else(|| anyhow::anyhow!("link closed"))??;
        raw.parse::<Line>()
            .map_err(|e| anyhow::anyhow!("unparsable line {raw:?}: {e}"))
    }

    /// Receive lines until one with `command` arrives. Returns every line
    /// read, the match last.
    pub async fn recv_until(&mut self, command: &str) -> anyhow::Result<Vec<Line>> {
        let mut lines = Vec::new();
        loop {
            let line = self.recv().await?;
            let done = line.command == command;
            lines.push(line);
            if done {
                return Ok(lines);
            }
        }
    }

    /// Skip to the next line with `command`.
    pub async fn expect(&mut self, command: &str) -> anyhow::Result<Line> {
        let mut lines = self.recv_until(command).await?;
        lines
            .pop()
            .ok_or_else(|| anyhow::anyhow!("no {command} received"))
    }

    /// Read and discard until the other side closes.
    pub async fn drain_to_close(&mut self) -> anyhow::Result<Vec<Line>> {
        let mut lines = Vec::new();
        while let Some(raw) = timeout(RECV_TIMEOUT, self.framed.next()).await? {
            if let Ok(line) = raw?.parse::<Line>() {
                lines.push(line);
            }
        }
        Ok(lines)
    }

    /// Round-trip a `PING` so every line sent before it has been applied.
    /// Returns whatever arrived ahead of the `PONG`.
    pub async fn sync(&mut self) -> anyhow::Result<Vec<Line>> {
        self.send("PING :sync").await?;
        let mut skipped = Vec::new();
        loop {
            let line = self.recv().await?;
            if line.command == "PONG" && line.text(0) == Some("sync") {
                return Ok(skipped);
            }
            skipped.push(line);
        }
    }
}
