//! Minimal viewer-side client, used by tests and scripts.

use std::net::SocketAddr;
use std::time::Duration;

use heapscope_sweep::{OpenMode, PathId};
use tokio::io::AsyncWriteExt;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;

use crate::protocol::{self, ProtocolError};

#[derive(Clone, Debug)]
pub struct ProbeClientConfig {
    pub handshake_timeout: Duration,
    pub reply_timeout: Duration,
}

impl Default for ProbeClientConfig {
    fn default() -> Self {
        Self {
            handshake_timeout: Duration::from_secs(5),
            reply_timeout: Duration::from_secs(10),
        }
    }
}

pub struct ProbeClient {
    reader: OwnedReadHalf,
    writer: OwnedWriteHalf,
    config: ProbeClientConfig,
    summary: String,
}

impl ProbeClient {
    pub async fn connect(addr: SocketAddr) -> Result<Self, ProtocolError> {
        Self::connect_with_config(addr, ProbeClientConfig::default()).await
    }

    /// Connect, answer the handshake and read the initial summary page.
    pub async fn connect_with_config(
        addr: SocketAddr,
        config: ProbeClientConfig,
    ) -> Result<Self, ProtocolError> {
        let stream = TcpStream::connect(addr).await?;
        let _ = stream.set_nodelay(true);
        let (mut reader, mut writer) = stream.into_split();

        let magic = tokio::time::timeout(config.handshake_timeout, protocol::read_magic(&mut reader))
            .await
            .map_err(|_| ProtocolError::Timeout)??;
        protocol::write_magic(&mut writer, protocol::handshake_reply(magic)).await?;

        let summary = tokio::time::timeout(config.reply_timeout, protocol::read_frame(&mut reader))
            .await
            .map_err(|_| ProtocolError::Timeout)??;
        Ok(Self {
            reader,
            writer,
            config,
            summary,
        })
    }

    /// Markup of the page sent right after the handshake.
    pub fn summary(&self) -> &str {
        &self.summary
    }

    /// Send one raw command line and wait for its reply frame.
    pub async fn request(&mut self, line: &str) -> Result<String, ProtocolError> {
        self.writer.write_all(line.trim_end().as_bytes()).await?;
        self.writer.write_all(b"\n").await?;
        self.writer.flush().await?;
        tokio::time::timeout(self.config.reply_timeout, protocol::read_frame(&mut self.reader))
            .await
            .map_err(|_| ProtocolError::Timeout)?
    }

    pub async fn search(&mut self, pattern: &str) -> Result<String, ProtocolError> {
        self.request(&format!("SEARCH {pattern}")).await
    }

    pub async fn open(&mut self, id: PathId, mode: OpenMode) -> Result<String, ProtocolError> {
        self.request(&format!("OPEN {} {mode}", id.get())).await
    }

    pub async fn write(
        &mut self,
        id: PathId,
        field: &str,
        literal: &str,
    ) -> Result<String, ProtocolError> {
        self.request(&format!("WRITE {} {field} {literal}", id.get()))
            .await
    }
}
