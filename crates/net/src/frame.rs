//! Length-prefixed frame encoding/decoding
//!
//! Wire format: [4-byte big-endian length][JSON payload]
//! Maximum frame size: 1MB (sanity limit)

use std::io;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::{Error, Result};
use crate::protocol::Message;

/// Maximum allowed frame size (1MB)
pub const MAX_FRAME_SIZE: u32 = 1024 * 1024;

fn closed_on_eof(e: io::Error) -> Error {
    if e.kind() == io::ErrorKind::UnexpectedEof {
        Error::ConnectionClosed
    } else {
        Error::Io(e)
    }
}

/// Encode a message into a single length-prefixed buffer
pub fn encode_frame(msg: &Message) -> Result<Vec<u8>> {
    let payload = msg
        .to_bytes()
        .map_err(|e| Error::Protocol(format!("Serialization failed: {}", e)))?;

    let len = u32::try_from(payload.len())
        .ok()
        .filter(|len| *len <= MAX_FRAME_SIZE)
        .ok_or_else(|| {
            Error::Protocol(format!(
                "Message too large: {} bytes (max {})",
                payload.len(),
                MAX_FRAME_SIZE
            ))
        })?;

    let mut frame = Vec::with_capacity(4 + payload.len());
    frame.extend_from_slice(&len.to_be_bytes());
    frame.extend_from_slice(&payload);
    Ok(frame)
}

/// Read a length-prefixed frame from a stream
pub async fn read_frame<R: AsyncRead + Unpin>(reader: &mut R) -> Result<Message> {
    let mut len_buf = [0u8; 4];
    reader.read_exact(&mut len_buf).await.map_err(closed_on_eof)?;

    let len = u32::from_be_bytes(len_buf);
    if len == 0 {
        return Err(Error::Protocol("Empty frame".into()));
    }
    if len > MAX_FRAME_SIZE {
        return Err(Error::Protocol(format!(
            "Frame too large: {} bytes (max {})",
            len, MAX_FRAME_SIZE
        )));
    }

    let mut payload = vec![0u8; len as usize];
    reader.read_exact(&mut payload).await.map_err(closed_on_eof)?;

    Message::from_bytes(&payload).map_err(|e| Error::Protocol(format!("Invalid JSON: {}", e)))
}

/// Write a length-prefixed frame to a stream and flush it
pub async fn write_frame<W: AsyncWrite + Unpin>(writer: &mut W, msg: &Message) -> Result<()> {
    let frame = encode_frame(msg)?;
    writer.write_all(&frame).await?;
    writer.flush().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[tokio::test]
    async fn test_frames_decode_in_order() {
        let mut buf = Vec::new();
        write_frame(&mut buf, &Message::Ping).await.unwrap();
        write_frame(&mut buf, &Message::DisconnectionNotification)
            .await
            .unwrap();

        let mut cursor = Cursor::new(buf);
        assert!(matches!(read_frame(&mut cursor).await.unwrap(), Message::Ping));
        assert!(matches!(
            read_frame(&mut cursor).await.unwrap(),
            Message::DisconnectionNotification
        ));
        assert!(matches!(
            read_frame(&mut cursor).await,
            Err(Error::ConnectionClosed)
        ));
    }

    #[tokio::test]
    async fn test_empty_frame_rejected() {
        let mut cursor = Cursor::new(vec![0, 0, 0, 0]);
        assert!(matches!(
            read_frame(&mut cursor).await,
            Err(Error::Protocol(_))
        ));
    }

    #[tokio::test]
    async fn test_oversized_frame_rejected() {
        let len = (MAX_FRAME_SIZE + 1).to_be_bytes();
        let mut cursor = Cursor::new(len.to_vec());
        assert!(read_frame(&mut cursor).await.is_err());
    }

    #[tokio::test]
    async fn test_truncated_payload_is_closed_connection() {
        let mut frame = encode_frame(&Message::Pong).unwrap();
        frame.truncate(frame.len() - 1);
        let mut cursor = Cursor::new(frame);
        assert!(matches!(
            read_frame(&mut cursor).await,
            Err(Error::ConnectionClosed)
        ));
    }
}
