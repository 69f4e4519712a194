//! TCP front end: one task and one private [`Session`] per connection.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use heapscope_sweep::{Fragment, Probe, Session};
use thiserror::Error;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;

use crate::command::Command;
use crate::protocol::{self, ProtocolError, MAGIC};

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

#[derive(Clone, Debug)]
pub struct ServerOptions {
    /// Time a client gets to answer the handshake magic.
    pub handshake_timeout: Duration,
    /// Longest command line accepted, excluding the newline.
    pub max_line_len: usize,
}

impl Default for ServerOptions {
    fn default() -> Self {
        Self {
            handshake_timeout: Duration::from_secs(5),
            max_line_len: 64 * 1024,
        }
    }
}

pub struct ProbeServer {
    listener: TcpListener,
    probe: Arc<Probe>,
    config: ServerOptions,
    shutdown: CancellationToken,
}

impl ProbeServer {
    pub async fn bind(addr: &str, probe: Arc<Probe>) -> Result<Self, ServerError> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|source| ServerError::Bind {
                addr: addr.to_owned(),
                source,
            })?;
        Ok(Self::from_listener(listener, probe))
    }

    pub fn from_listener(listener: TcpListener, probe: Arc<Probe>) -> Self {
        Self {
            listener,
            probe,
            config: ServerOptions::default(),
            shutdown: CancellationToken::new(),
        }
    }

    pub fn with_config(mut self, config: ServerOptions) -> Self {
        self.config = config;
        self
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Cancelling this token stops the accept loop and every open session.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    pub async fn run(self) -> Result<(), ServerError> {
        let addr = self.listener.local_addr()?;
        tracing::info!(target: "heapscope.server", %addr, "listening");
        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => {
                    tracing::info!(target: "heapscope.server", %addr, "shutting down");
                    return Ok(());
                }
                accept = self.listener.accept() => {
                    let (socket, peer) = match accept {
                        Ok(accepted) => accepted,
                        Err(err) => {
                            tracing::warn!(target: "heapscope.server", error = %err, "accept failed");
                            continue;
                        }
                    };
                    let _ = socket.set_nodelay(true);
                    let probe = Arc::clone(&self.probe);
                    let config = self.config.clone();
                    let shutdown = self.shutdown.child_token();
                    tokio::spawn(async move {
                        match serve_connection(socket, probe, config, shutdown).await {
                            Ok(()) | Err(ProtocolError::Closed) => {
                                tracing::debug!(target: "heapscope.server", %peer, "connection closed");
                            }
                            Err(err) => {
                                tracing::warn!(target: "heapscope.server", %peer, error = %err, "connection dropped");
                            }
                        }
                    });
                }
            }
        }
    }
}

async fn serve_connection(
    socket: TcpStream,
    probe: Arc<Probe>,
    config: ServerOptions,
    shutdown: CancellationToken,
) -> Result<(), ProtocolError> {
    let (reader, mut writer) = socket.into_split();
    let mut reader = BufReader::new(reader);

    handshake(&mut reader, &mut writer, &config).await?;

    let mut session = Session::new(probe);
    protocol::write_frame(&mut writer, &session.summary().to_markup()).await?;

    let mut buf = Vec::new();
    loop {
        let read = tokio::select! {
            _ = shutdown.cancelled() => return Ok(()),
            read = read_command_line(&mut reader, &mut buf, config.max_line_len) => read?,
        };
        let fragment = match read {
            LineRead::Eof => return Ok(()),
            LineRead::TooLong => {
                tracing::debug!(target: "heapscope.server", limit = config.max_line_len, "command line too long");
                Fragment::error(format!("command exceeds {} bytes", config.max_line_len))
            }
            LineRead::Line => match std::str::from_utf8(&buf) {
                Ok(line) if line.trim().is_empty() => continue,
                Ok(line) => dispatch(&mut session, line),
                Err(_) => Fragment::error("command is not valid UTF-8"),
            },
        };
        protocol::write_frame(&mut writer, &fragment.to_markup()).await?;
    }
}

enum LineRead {
    Eof,
    /// `buf` holds one line, newline included if the peer sent one.
    Line,
    /// The line was longer than the limit and has been skipped.
    TooLong,
}

/// Read one line of raw bytes into `buf`, reading at most `max_len` bytes
/// past which the rest of the line is discarded.
async fn read_command_line<R>(reader: &mut R, buf: &mut Vec<u8>, max_len: usize) -> std::io::Result<LineRead>
where
    R: AsyncBufRead + Unpin,
{
    buf.clear();
    let limit = u64::try_from(max_len).unwrap_or(u64::MAX).saturating_add(1);
    let read = (&mut *reader).take(limit).read_until(b'\n', buf).await?;
    if read == 0 {
        return Ok(LineRead::Eof);
    }
    if buf.last() == Some(&b'\n') || buf.len() <= max_len {
        return Ok(LineRead::Line);
    }

    buf.clear();
    loop {
        let available = reader.fill_buf().await?;
        if available.is_empty() {
            return Ok(LineRead::TooLong);
        }
        match available.iter().position(|b| *b == b'\n') {
            Some(end) => {
                reader.consume(end + 1);
                return Ok(LineRead::TooLong);
            }
            None => {
                let len = available.len();
                reader.consume(len);
            }
        }
    }
}

async fn handshake<R, W>(reader: &mut R, writer: &mut W, config: &ServerOptions) -> Result<(), ProtocolError>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    protocol::write_magic(writer, MAGIC).await?;
    let actual = tokio::time::timeout(config.handshake_timeout, protocol::read_magic(reader))
        .await
        .map_err(|_| ProtocolError::Timeout)??;
    let expected = protocol::handshake_reply(MAGIC);
    if actual != expected {
        return Err(ProtocolError::Handshake { expected, actual });
    }
    Ok(())
}

/// Run one command line against `session`. Malformed input becomes an error
/// fragment; the connection stays open.
pub fn dispatch(session: &mut Session, line: &str) -> Fragment {
    let command = match line.parse::<Command>() {
        Ok(command) => command,
        Err(err) => {
            tracing::debug!(target: "heapscope.server", line = line.trim_end(), error = %err, "malformed command");
            return Fragment::error(err.to_string());
        }
    };
    tracing::debug!(target: "heapscope.server", ?command, "command");
    match command {
        Command::Search { pattern } => session.search(&pattern),
        Command::Open { id, mode } => session.open(id, mode),
        Command::Write { id, field, literal } => session.write(id, &field, &literal),
    }
}
