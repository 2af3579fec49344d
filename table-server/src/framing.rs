//! Length-prefixed message framing for the TCP stream.
//!
//! Each message travels as a 4-byte big-endian length followed by the
//! MessagePack payload. This mirrors the client transport's framing.

use crate::error::{ProtocolError, ProtocolResult};
use table_types::Message;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Read one length-prefixed message from the stream.
pub async fn read_message<R>(reader: &mut R, max_size: usize) -> ProtocolResult<Message>
where
    R: AsyncRead + Unpin,
{
    let mut len_buf = [0u8; 4];
    reader
        .read_exact(&mut len_buf)
        .await
        .map_err(|e| ProtocolError::Stream(e.to_string()))?;
    let len = u32::from_be_bytes(len_buf) as usize;

    if len > max_size {
        return Err(ProtocolError::InvalidMessage {
            reason: format!("message too large: {} > {}", len, max_size),
        });
    }

    let mut buf = vec![0u8; len];
    reader
        .read_exact(&mut buf)
        .await
        .map_err(|e| ProtocolError::Stream(e.to_string()))?;

    Message::from_bytes(&buf).map_err(|e| ProtocolError::InvalidMessage {
        reason: e.to_string(),
    })
}

/// Write one length-prefixed message to the stream.
pub async fn write_message<W>(writer: &mut W, message: &Message) -> ProtocolResult<()>
where
    W: AsyncWrite + Unpin,
{
    let bytes = message
        .to_bytes()
        .map_err(|e| ProtocolError::InvalidMessage {
            reason: e.to_string(),
        })?;
    write_frame(writer, &bytes).await
}

/// Write pre-serialized message bytes as one frame.
pub async fn write_frame<W>(writer: &mut W, bytes: &[u8]) -> ProtocolResult<()>
where
    W: AsyncWrite + Unpin,
{
    let len = bytes.len() as u32;
    writer
        .write_all(&len.to_be_bytes())
        .await
        .map_err(|e| ProtocolError::Stream(e.to_string()))?;
    writer
        .write_all(bytes)
        .await
        .map_err(|e| ProtocolError::Stream(e.to_string()))?;
    writer
        .flush()
        .await
        .map_err(|e| ProtocolError::Stream(e.to_string()))?;
    Ok(())
}
