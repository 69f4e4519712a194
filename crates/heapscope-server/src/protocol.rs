//! Wire format shared by the server and client.
//!
//! At connect time the server sends a 4-byte big-endian magic and expects the
//! client to answer with its wrapping negation. After that the client writes
//! one newline-terminated command per request and every server reply is a
//! big-endian `u32` length followed by that many bytes of UTF-8 markup.

use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use heapscope_config::DEFAULT_PORT;

/// `-(31448 * 31448)` for the default port.
pub const MAGIC: i32 = -((DEFAULT_PORT as i32) * (DEFAULT_PORT as i32));

/// Value a client must echo after receiving [`MAGIC`].
pub const fn handshake_reply(magic: i32) -> i32 {
    magic.wrapping_neg()
}

/// Largest reply frame a client will accept.
pub const MAX_FRAME_LEN: usize = 64 * 1024 * 1024;

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("handshake mismatch: expected {expected:#x}, got {actual:#x}")]
    Handshake { expected: i32, actual: i32 },
    #[error("frame of {0} bytes exceeds the {MAX_FRAME_LEN} byte limit")]
    FrameTooLarge(usize),
    #[error("frame is not valid UTF-8")]
    InvalidUtf8,
    #[error("timed out waiting for the peer")]
    Timeout,
    #[error("connection closed")]
    Closed,
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub async fn write_magic<W: AsyncWrite + Unpin>(writer: &mut W, magic: i32) -> std::io::Result<()> {
    writer.write_all(&magic.to_be_bytes()).await?;
    writer.flush().await
}

pub async fn read_magic<R: AsyncRead + Unpin>(reader: &mut R) -> Result<i32, ProtocolError> {
    let mut raw = [0u8; 4];
    match reader.read_exact(&mut raw).await {
        Ok(_) => Ok(i32::from_be_bytes(raw)),
        Err(err) if err.kind() == std::io::ErrorKind::UnexpectedEof => Err(ProtocolError::Closed),
        Err(err) => Err(err.into()),
    }
}

pub async fn write_frame<W: AsyncWrite + Unpin>(writer: &mut W, markup: &str) -> Result<(), ProtocolError> {
    let len = u32::try_from(markup.len()).map_err(|_| ProtocolError::FrameTooLarge(markup.len()))?;
    writer.write_all(&len.to_be_bytes()).await?;
    writer.write_all(markup.as_bytes()).await?;
    writer.flush().await?;
    Ok(())
}

pub async fn read_frame<R: AsyncRead + Unpin>(reader: &mut R) -> Result<String, ProtocolError> {
    let mut header = [0u8; 4];
    match reader.read_exact(&mut header).await {
        Ok(_) => {}
        Err(err) if err.kind() == std::io::ErrorKind::UnexpectedEof => {
            return Err(ProtocolError::Closed)
        }
        Err(err) => return Err(err.into()),
    }
    let len = u32::from_be_bytes(header) as usize;
    if len > MAX_FRAME_LEN {
        return Err(ProtocolError::FrameTooLarge(len));
    }
    let mut body = vec![0u8; len];
    reader.read_exact(&mut body).await?;
    String::from_utf8(body).map_err(|_| ProtocolError::InvalidUtf8)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn magic_matches_the_default_port() {
        assert_eq!(MAGIC, -988_976_704);
        assert_eq!(handshake_reply(MAGIC), 988_976_704);
        assert_eq!(handshake_reply(i32::MIN), i32::MIN);
    }

    #[tokio::test]
    async fn frames_carry_a_big_endian_length() {
        let mut buf = Vec::new();
        write_frame(&mut buf, "<p>hi</p>").await.unwrap();
        assert_eq!(&buf[..4], &9u32.to_be_bytes());

        let mut reader = &buf[..];
        assert_eq!(read_frame(&mut reader).await.unwrap(), "<p>hi</p>");
        assert!(matches!(
            read_frame(&mut reader).await,
            Err(ProtocolError::Closed)
        ));
    }

    #[tokio::test]
    async fn oversized_frames_are_rejected() {
        let header = u32::MAX.to_be_bytes();
        let mut reader = &header[..];
        assert!(matches!(
            read_frame(&mut reader).await,
            Err(ProtocolError::FrameTooLarge(_))
        ));
    }
}
