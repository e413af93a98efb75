//! Wire codec: encode/decode the primitive SFTP types.
//!
//! Every primitive is big-endian. Strings are length-prefixed and
//! binary-safe — never NUL-terminated. Decoding never panics: a short
//! buffer yields [`crate::Error::Protocol`], which the dispatcher turns
//! into a `BAD_MESSAGE` response for that request.

use bytes::{Buf, BufMut, BytesMut};

use crate::error::{Error, Result};

/// Read a `u8` from the front of `buf`.
pub fn get_u8(buf: &mut &[u8]) -> Result<u8> {
    if buf.is_empty() {
        return Err(Error::protocol("insufficient data for u8"));
    }
    let v = buf[0];
    buf.advance(1);
    Ok(v)
}

/// Read a big-endian `u16` from the front of `buf`.
pub fn get_u16(buf: &mut &[u8]) -> Result<u16> {
    if buf.remaining() < 2 {
        return Err(Error::protocol("insufficient data for u16"));
    }
    Ok(buf.get_u16())
}

/// Read a big-endian `u32` from the front of `buf`.
pub fn get_u32(buf: &mut &[u8]) -> Result<u32> {
    if buf.remaining() < 4 {
        return Err(Error::protocol("insufficient data for u32"));
    }
    Ok(buf.get_u32())
}

/// Read a big-endian `u64` from the front of `buf`.
pub fn get_u64(buf: &mut &[u8]) -> Result<u64> {
    if buf.remaining() < 8 {
        return Err(Error::protocol("insufficient data for u64"));
    }
    Ok(buf.get_u64())
}

/// Decode an SFTP string: a `u32` length followed by that many raw bytes.
/// Binary-safe — not required to be valid UTF-8 (callers that need text
/// validate that themselves; handle values, for instance, never are).
pub fn get_string(buf: &mut &[u8]) -> Result<Vec<u8>> {
    let len = get_u32(buf)? as usize;
    if buf.remaining() < len {
        return Err(Error::protocol("insufficient data for string"));
    }
    let bytes = buf[..len].to_vec();
    buf.advance(len);
    Ok(bytes)
}

/// Decode an SFTP string and require it to be valid UTF-8 (paths and most
/// textual fields are sent as UTF-8 on the wire per the protocol).
pub fn get_utf8_string(buf: &mut &[u8]) -> Result<String> {
    let bytes = get_string(buf)?;
    String::from_utf8(bytes).map_err(|e| Error::protocol(format!("invalid UTF-8 string: {e}")))
}

/// Append a `u8`.
pub fn put_u8(out: &mut BytesMut, v: u8) {
    out.put_u8(v);
}

/// Append a big-endian `u16`.
pub fn put_u16(out: &mut BytesMut, v: u16) {
    out.put_u16(v);
}

/// Append a big-endian `u32`.
pub fn put_u32(out: &mut BytesMut, v: u32) {
    out.put_u32(v);
}

/// Append a big-endian `u64`.
pub fn put_u64(out: &mut BytesMut, v: u64) {
    out.put_u64(v);
}

/// Append an SFTP string (length-prefixed, binary-safe).
pub fn put_string(out: &mut BytesMut, data: &[u8]) {
    out.put_u32(data.len() as u32);
    out.put_slice(data);
}

/// Append an SFTP string from a `&str`.
pub fn put_str(out: &mut BytesMut, s: &str) {
    put_string(out, s.as_bytes());
}

/// A nested sub-block: a `u32` length placeholder followed by a sequence
/// of further writes, back-patched to the correct length when dropped.
///
/// Mirrors `send_sub_begin` / `send_sub_end` in the reference design:
/// `begin` reserves the length word, every `put_*` call on the returned
/// guard writes into the enclosing buffer as normal, and `end` rewrites
/// the reserved word with the number of bytes written in between.
pub struct SubBlock<'a> {
    out: &'a mut BytesMut,
    len_offset: usize,
}

impl<'a> SubBlock<'a> {
    /// Reserve space for the sub-block's length prefix and begin writing.
    pub fn begin(out: &'a mut BytesMut) -> Self {
        let len_offset = out.len();
        out.put_u32(0);
        SubBlock { out, len_offset }
    }

    /// Borrow the underlying buffer to append sub-block contents.
    pub fn buf(&mut self) -> &mut BytesMut {
        self.out
    }

    /// Back-patch the reserved length and consume the guard.
    pub fn end(self) {
        let body_len = (self.out.len() - self.len_offset - 4) as u32;
        self.out[self.len_offset..self.len_offset + 4].copy_from_slice(&body_len.to_be_bytes());
    }
}
