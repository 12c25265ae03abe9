//! Length-prefixed framing over a raw byte stream. Grounded on the
//! teacher's `spark-transport-tcp::channel` module, which wraps a
//! `TokioTcpStream` behind an async mutex and maps every I/O error through
//! a single translation point; this crate narrows that same shape to the
//! one thing `federation-transport::Transport` needs moved over the wire,
//! a length-prefixed `Bytes` frame, since federation's message framing
//! (headers, actor dispatch) is a layer this crate doesn't own.

use bytes::{Bytes, BytesMut};
use federation_core::error::ErrorCode;
use federation_core::{FederationError, Result};
use tokio::io::{AsyncReadExt, AsyncWriteExt};

/// Frames larger than this are rejected outright rather than risking an
/// unbounded allocation off an adversarial or corrupted length prefix.
pub const MAX_FRAME_LEN: u32 = 64 * 1024 * 1024;

pub async fn write_frame<W: AsyncWriteExt + Unpin>(writer: &mut W, payload: &Bytes) -> Result<()> {
    let len = payload.len();
    if len as u64 > MAX_FRAME_LEN as u64 {
        return Err(FederationError::new(ErrorCode::MessageTooLarge, "outbound frame exceeds the maximum allowed size"));
    }
    writer.write_u32(len as u32).await.map_err(io_error)?;
    writer.write_all(payload).await.map_err(io_error)?;
    writer.flush().await.map_err(io_error)?;
    Ok(())
}

/// Reads one frame. Returns `Ok(None)` on a clean EOF at a frame boundary
/// (the peer closed the connection); any other I/O failure is an error.
pub async fn read_frame<R: AsyncReadExt + Unpin>(reader: &mut R) -> Result<Option<Bytes>> {
    let len = match reader.read_u32().await {
        Ok(len) => len,
        Err(err) if err.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(err) => return Err(io_error(err)),
    };
    if len > MAX_FRAME_LEN {
        return Err(FederationError::new(ErrorCode::MessageTooLarge, "inbound frame exceeds the maximum allowed size"));
    }
    let mut buf = BytesMut::zeroed(len as usize);
    reader.read_exact(&mut buf).await.map_err(io_error)?;
    Ok(Some(buf.freeze()))
}

pub(crate) fn io_error(err: std::io::Error) -> FederationError {
    FederationError::new(ErrorCode::ServiceCommunicationCannotConnect, format!("tcp I/O error: {err}"))
}
