//! Length-prefixed frame codec
//!
//! Every control command and reply travels as an opaque byte string: a
//! 4-byte big-endian length prefix followed by the serialized message.
//! Receivers must round-trip frames identically, so encoding and
//! decoding live here and nowhere else.

use crate::error::{Error, Result};
use async_net::TcpStream;
use control_core::ControlMessage;
use futures_lite::future;
use futures_lite::io::{AsyncReadExt, AsyncWriteExt};
use std::time::Duration;

/// Upper bound on a single frame. Control-plane messages are small;
/// anything beyond this is a corrupted prefix.
pub const MAX_FRAME_LEN: usize = 16 * 1024 * 1024;

/// Serialize a control message to its wire payload.
pub fn encode(message: &ControlMessage) -> Result<Vec<u8>> {
    Ok(serde_json::to_vec(message)?)
}

/// Deserialize a wire payload back into a control message.
pub fn decode(payload: &[u8]) -> Result<ControlMessage> {
    Ok(serde_json::from_slice(payload)?)
}

/// Write one length-prefixed frame.
pub async fn write_frame<W>(writer: &mut W, payload: &[u8]) -> Result<()>
where
    W: AsyncWriteExt + Unpin,
{
    let len = u32::try_from(payload.len()).map_err(|_| Error::FrameTooLarge {
        len: payload.len(),
        max: MAX_FRAME_LEN,
    })?;
    writer.write_all(&len.to_be_bytes()).await?;
    writer.write_all(payload).await?;
    writer.flush().await?;
    Ok(())
}

/// Read one length-prefixed frame to completion.
pub async fn read_frame<R>(reader: &mut R) -> Result<Vec<u8>>
where
    R: AsyncReadExt + Unpin,
{
    let mut prefix = [0u8; 4];
    if let Err(e) = reader.read_exact(&mut prefix).await {
        if e.kind() == std::io::ErrorKind::UnexpectedEof {
            return Err(Error::PeerClosed);
        }
        return Err(e.into());
    }
    let len = u32::from_be_bytes(prefix) as usize;
    if len > MAX_FRAME_LEN {
        return Err(Error::FrameTooLarge {
            len,
            max: MAX_FRAME_LEN,
        });
    }
    let mut payload = vec![0u8; len];
    reader.read_exact(&mut payload).await?;
    Ok(payload)
}

/// Read one frame from a TCP stream with a timeout.
///
/// The timeout races a one-byte peek, never the frame read itself, so a
/// frame is either consumed whole or not touched at all. Returns
/// `Ok(None)` on timeout; the caller re-inspects the shutdown flag and
/// tries again.
pub async fn read_frame_timeout(
    stream: &mut TcpStream,
    timeout: Duration,
) -> Result<Option<Vec<u8>>> {
    let readable = {
        let probe = &*stream;
        future::or(
            async {
                let mut byte = [0u8; 1];
                Some(probe.peek(&mut byte).await)
            },
            async {
                smol::Timer::after(timeout).await;
                None
            },
        )
        .await
    };
    match readable {
        None => Ok(None),
        Some(Ok(0)) => Err(Error::PeerClosed),
        Some(Ok(_)) => read_frame(stream).await.map(Some),
        Some(Err(e)) => Err(e.into()),
    }
}

/// Write a control message as a single frame.
pub async fn write_message<W>(writer: &mut W, message: &ControlMessage) -> Result<()>
where
    W: AsyncWriteExt + Unpin,
{
    let payload = encode(message)?;
    write_frame(writer, &payload).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use control_core::{AckStatus, ControlCommand, SteeringCommand};
    use futures_lite::io::Cursor;

    #[test]
    fn frame_round_trip() {
        smol::block_on(async {
            let message =
                ControlMessage::Command(ControlCommand::bare(SteeringCommand::Init));
            let mut buf = Cursor::new(Vec::new());
            write_message(&mut buf, &message).await.unwrap();

            let mut cursor = Cursor::new(buf.into_inner());
            let payload = read_frame(&mut cursor).await.unwrap();
            assert_eq!(decode(&payload).unwrap(), message);
        });
    }

    #[test]
    fn consecutive_frames_do_not_bleed() {
        smol::block_on(async {
            let first = ControlMessage::Ack(AckStatus::Ok);
            let second = ControlMessage::Ack(AckStatus::Error);
            let mut buf = Cursor::new(Vec::new());
            write_message(&mut buf, &first).await.unwrap();
            write_message(&mut buf, &second).await.unwrap();

            let mut cursor = Cursor::new(buf.into_inner());
            assert_eq!(
                decode(&read_frame(&mut cursor).await.unwrap()).unwrap(),
                first
            );
            assert_eq!(
                decode(&read_frame(&mut cursor).await.unwrap()).unwrap(),
                second
            );
        });
    }

    #[test]
    fn oversized_prefix_is_rejected() {
        smol::block_on(async {
            let mut bytes = Vec::new();
            bytes.extend_from_slice(&(u32::MAX).to_be_bytes());
            let mut cursor = Cursor::new(bytes);
            assert!(matches!(
                read_frame(&mut cursor).await,
                Err(Error::FrameTooLarge { .. })
            ));
        });
    }

    #[test]
    fn truncated_stream_reports_peer_closed() {
        smol::block_on(async {
            let mut cursor = Cursor::new(vec![0u8, 0u8]);
            assert!(matches!(read_frame(&mut cursor).await, Err(Error::PeerClosed)));
        });
    }
}
