//! Framed I/O: length-prefixed packets on a byte stream.
//!
//! Every packet is a 4-byte big-endian length `L` followed by `L` bytes
//! of payload. A short read while consuming the length or the body after
//! at least one byte has already been read is a fatal framing error —
//! the peer is presumed out of sync and the connection must close. A
//! clean EOF *before* any byte of the length header is read is the
//! normal shutdown path, not an error.

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::{Error, Result};

/// Outcome of reading one frame from the stream.
pub enum ReadOutcome {
    /// A complete frame was read.
    Frame(Vec<u8>),
    /// The peer closed the connection cleanly before sending any bytes
    /// of the next frame. Normal termination.
    Eof,
}

/// Read one length-prefixed packet from `stream`.
///
/// `L = 0` is treated as a fatal framing error: every SFTP packet carries
/// at least a one-byte type field.
pub async fn read_packet<R: AsyncRead + Unpin>(stream: &mut R) -> Result<ReadOutcome> {
    let mut len_buf = [0u8; 4];
    match read_exact_or_eof(stream, &mut len_buf).await? {
        FillOutcome::Eof => return Ok(ReadOutcome::Eof),
        FillOutcome::ShortRead => {
            return Err(Error::framing(
                "connection closed mid-length-header: malformed peer",
            ))
        }
        FillOutcome::Full => {}
    }

    let len = u32::from_be_bytes(len_buf) as usize;
    if len == 0 {
        return Err(Error::framing("zero-length packet"));
    }

    let mut body = vec![0u8; len];
    stream
        .read_exact(&mut body)
        .await
        .map_err(|e| Error::framing(format!("truncated packet body: {e}")))?;

    Ok(ReadOutcome::Frame(body))
}

/// Write `payload` as one complete length-prefixed packet.
pub async fn write_packet<W: AsyncWrite + Unpin>(stream: &mut W, payload: &[u8]) -> Result<()> {
    let len = u32::try_from(payload.len())
        .map_err(|_| Error::protocol("response payload too large to frame"))?;
    stream.write_all(&len.to_be_bytes()).await?;
    stream.write_all(payload).await?;
    stream.flush().await?;
    Ok(())
}

enum FillOutcome {
    Full,
    ShortRead,
    Eof,
}

/// Like `read_exact`, but distinguishes "EOF before any byte was read"
/// (the caller's clean-shutdown path) from a short read after the stream
/// had already started yielding bytes (a framing violation).
async fn read_exact_or_eof<R: AsyncRead + Unpin>(
    stream: &mut R,
    buf: &mut [u8],
) -> Result<FillOutcome> {
    let mut filled = 0;
    while filled < buf.len() {
        let n = stream.read(&mut buf[filled..]).await?;
        if n == 0 {
            return Ok(if filled == 0 {
                FillOutcome::Eof
            } else {
                FillOutcome::ShortRead
            });
        }
        filled += n;
    }
    Ok(FillOutcome::Full)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[tokio::test]
    async fn reads_a_complete_frame() {
        let mut data = Vec::new();
        data.extend_from_slice(&5u32.to_be_bytes());
        data.extend_from_slice(b"hello");
        let mut cursor = Cursor::new(data);

        match read_packet(&mut cursor).await.unwrap() {
            ReadOutcome::Frame(body) => assert_eq!(body, b"hello"),
            ReadOutcome::Eof => panic!("expected a frame"),
        }
    }

    #[tokio::test]
    async fn clean_eof_before_any_byte_is_not_an_error() {
        let mut cursor = Cursor::new(Vec::<u8>::new());
        match read_packet(&mut cursor).await.unwrap() {
            ReadOutcome::Eof => {}
            ReadOutcome::Frame(_) => panic!("expected EOF"),
        }
    }

    #[tokio::test]
    async fn zero_length_packet_is_fatal() {
        let data = 0u32.to_be_bytes().to_vec();
        let mut cursor = Cursor::new(data);
        assert!(read_packet(&mut cursor).await.is_err());
    }

    #[tokio::test]
    async fn truncated_length_header_is_fatal() {
        let data = vec![0u8, 0u8]; // only 2 of 4 length bytes
        let mut cursor = Cursor::new(data);
        assert!(read_packet(&mut cursor).await.is_err());
    }

    #[tokio::test]
    async fn truncated_body_is_fatal() {
        let mut data = Vec::new();
        data.extend_from_slice(&10u32.to_be_bytes());
        data.extend_from_slice(b"short");
        let mut cursor = Cursor::new(data);
        assert!(read_packet(&mut cursor).await.is_err());
    }

    #[tokio::test]
    async fn write_packet_prefixes_exact_length() {
        let mut out = Vec::new();
        write_packet(&mut out, b"payload-bytes").await.unwrap();
        let len = u32::from_be_bytes(out[..4].try_into().unwrap());
        assert_eq!(len as usize, out.len() - 4);
        assert_eq!(&out[4..], b"payload-bytes");
    }
}
