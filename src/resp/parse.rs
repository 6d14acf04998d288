//! Incremental RESP reply parser.
//!
//! Operates on a buffered byte slice. Returns `Ok(None)` when the buffer
//! doesn't hold a complete frame yet so the caller can read more data and
//! retry without losing anything.

use std::io::Cursor;

use bytes::Bytes;

use super::{Frame, ProtocolError};

/// Maximum nesting depth for arrays and maps.
const MAX_NESTING_DEPTH: usize = 32;

/// Cap for `Vec::with_capacity` on declared element counts.
const PREALLOC_CAP: usize = 1024;

/// Parses one frame from the front of `buf`.
///
/// Returns `Ok(Some((frame, consumed)))` for a complete frame, `Ok(None)` if
/// more data is needed, or an error if the data is malformed.
pub fn parse_frame(buf: &[u8]) -> Result<Option<(Frame, usize)>, ProtocolError> {
    if buf.is_empty() {
        return Ok(None);
    }

    let mut cursor = Cursor::new(buf);
    match try_parse(&mut cursor, 0) {
        Ok(frame) => Ok(Some((frame, cursor.position() as usize))),
        Err(ProtocolError::Incomplete) => Ok(None),
        Err(e) => Err(e),
    }
}

fn try_parse(cursor: &mut Cursor<&[u8]>, depth: usize) -> Result<Frame, ProtocolError> {
    match read_byte(cursor)? {
        b'+' => {
            let line = read_line(cursor)?;
            let s = std::str::from_utf8(line)
                .map_err(|_| ProtocolError::InvalidUtf8("simple string"))?;
            Ok(Frame::Simple(s.to_owned()))
        }
        b'-' => {
            let line = read_line(cursor)?;
            let s =
                std::str::from_utf8(line).map_err(|_| ProtocolError::InvalidUtf8("error"))?;
            Ok(Frame::Error(s.to_owned()))
        }
        b':' => Ok(Frame::Integer(read_integer_line(cursor)?)),
        b'$' => {
            let len = read_integer_line(cursor)?;
            if len == -1 {
                return Ok(Frame::Null);
            }
            if len < 0 {
                return Err(ProtocolError::InvalidFrameLength(len));
            }
            let len = len as usize;

            let pos = cursor.position() as usize;
            let buf = *cursor.get_ref();
            if buf.len().saturating_sub(pos) < len + 2 {
                return Err(ProtocolError::Incomplete);
            }
            if &buf[pos + len..pos + len + 2] != b"\r\n" {
                return Err(ProtocolError::InvalidFrameLength(len as i64));
            }

            cursor.set_position((pos + len + 2) as u64);
            Ok(Frame::Bulk(Bytes::copy_from_slice(&buf[pos..pos + len])))
        }
        b'*' => {
            if depth + 1 > MAX_NESTING_DEPTH {
                return Err(ProtocolError::NestingTooDeep(MAX_NESTING_DEPTH));
            }
            let count = read_integer_line(cursor)?;
            if count == -1 {
                return Ok(Frame::Null);
            }
            if count < 0 {
                return Err(ProtocolError::InvalidFrameLength(count));
            }

            let count = count as usize;
            let mut frames = Vec::with_capacity(count.min(PREALLOC_CAP));
            for _ in 0..count {
                frames.push(try_parse(cursor, depth + 1)?);
            }
            Ok(Frame::Array(frames))
        }
        b'_' => {
            let _ = read_line(cursor)?;
            Ok(Frame::Null)
        }
        b'%' => {
            if depth + 1 > MAX_NESTING_DEPTH {
                return Err(ProtocolError::NestingTooDeep(MAX_NESTING_DEPTH));
            }
            let count = read_integer_line(cursor)?;
            if count < 0 {
                return Err(ProtocolError::InvalidFrameLength(count));
            }

            let count = count as usize;
            let mut pairs = Vec::with_capacity(count.min(PREALLOC_CAP));
            for _ in 0..count {
                let key = try_parse(cursor, depth + 1)?;
                let val = try_parse(cursor, depth + 1)?;
                pairs.push((key, val));
            }
            Ok(Frame::Map(pairs))
        }
        other => Err(ProtocolError::InvalidPrefix(other)),
    }
}

fn read_byte(cursor: &mut Cursor<&[u8]>) -> Result<u8, ProtocolError> {
    let pos = cursor.position() as usize;
    let buf = *cursor.get_ref();
    if pos >= buf.len() {
        return Err(ProtocolError::Incomplete);
    }
    cursor.set_position((pos + 1) as u64);
    Ok(buf[pos])
}

/// Returns the bytes up to the next `\r\n` and advances past it.
fn read_line<'a>(cursor: &mut Cursor<&'a [u8]>) -> Result<&'a [u8], ProtocolError> {
    let buf: &'a [u8] = *cursor.get_ref();
    let start = cursor.position() as usize;
    if start >= buf.len() {
        return Err(ProtocolError::Incomplete);
    }

    match buf[start..].windows(2).position(|w| w == b"\r\n") {
        Some(offset) => {
            let end = start + offset;
            cursor.set_position((end + 2) as u64);
            Ok(&buf[start..end])
        }
        None => Err(ProtocolError::Incomplete),
    }
}

fn read_integer_line(cursor: &mut Cursor<&[u8]>) -> Result<i64, ProtocolError> {
    let line = read_line(cursor)?;
    std::str::from_utf8(line)
        .ok()
        .and_then(|s| s.parse::<i64>().ok())
        .ok_or(ProtocolError::InvalidInteger)
}
