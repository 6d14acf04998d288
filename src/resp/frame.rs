//! RESP frame type and direct-to-buffer serialization.

use bytes::{BufMut, Bytes, BytesMut};

/// A single RESP protocol frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// Simple string reply, e.g. `+OK\r\n`.
    Simple(String),

    /// Error reply, e.g. `-READONLY You can't write against a read only replica.\r\n`.
    Error(String),

    /// 64-bit signed integer, e.g. `:1\r\n`.
    Integer(i64),

    /// Binary-safe bulk string, e.g. `$5\r\nhello\r\n`.
    Bulk(Bytes),

    /// Ordered array of frames.
    Array(Vec<Frame>),

    /// Null value (`_\r\n`, `$-1\r\n` or `*-1\r\n`).
    Null,

    /// RESP3 map of key-value frame pairs.
    Map(Vec<(Frame, Frame)>),
}

impl Frame {
    /// Build a command frame: an array of bulk strings.
    pub fn command<I, T>(parts: I) -> Frame
    where
        I: IntoIterator<Item = T>,
        T: Into<Bytes>,
    {
        Frame::Array(parts.into_iter().map(|p| Frame::Bulk(p.into())).collect())
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Frame::Null)
    }

    /// Serializes this frame into the provided buffer.
    pub fn serialize(&self, dst: &mut BytesMut) {
        match self {
            Frame::Simple(s) => {
                dst.put_u8(b'+');
                dst.put_slice(s.as_bytes());
                dst.put_slice(b"\r\n");
            }
            Frame::Error(msg) => {
                dst.put_u8(b'-');
                dst.put_slice(msg.as_bytes());
                dst.put_slice(b"\r\n");
            }
            Frame::Integer(n) => {
                dst.put_u8(b':');
                write_i64(*n, dst);
                dst.put_slice(b"\r\n");
            }
            Frame::Bulk(data) => {
                dst.put_u8(b'$');
                write_i64(data.len() as i64, dst);
                dst.put_slice(b"\r\n");
                dst.put_slice(data);
                dst.put_slice(b"\r\n");
            }
            Frame::Array(items) => {
                dst.put_u8(b'*');
                write_i64(items.len() as i64, dst);
                dst.put_slice(b"\r\n");
                for item in items {
                    item.serialize(dst);
                }
            }
            Frame::Null => {
                dst.put_slice(b"_\r\n");
            }
            Frame::Map(pairs) => {
                dst.put_u8(b'%');
                write_i64(pairs.len() as i64, dst);
                dst.put_slice(b"\r\n");
                for (key, val) in pairs {
                    key.serialize(dst);
                    val.serialize(dst);
                }
            }
        }
    }
}

fn write_i64(val: i64, dst: &mut BytesMut) {
    let mut buf = itoa::Buffer::new();
    dst.put_slice(buf.format(val).as_bytes());
}

#[cfg(test)]
mod tests {
    use super::*;

    fn serialize(frame: &Frame) -> Vec<u8> {
        let mut buf = BytesMut::new();
        frame.serialize(&mut buf);
        buf.to_vec()
    }

    #[test]
    fn command_is_array_of_bulks() {
        let frame = Frame::command(["REPLICAOF", "NO", "ONE"]);
        assert_eq!(
            serialize(&frame),
            b"*3\r\n$9\r\nREPLICAOF\r\n$2\r\nNO\r\n$3\r\nONE\r\n"
        );
    }

    #[test]
    fn scalars() {
        assert_eq!(serialize(&Frame::Simple("OK".into())), b"+OK\r\n");
        assert_eq!(serialize(&Frame::Error("ERR bad".into())), b"-ERR bad\r\n");
        assert_eq!(serialize(&Frame::Integer(-1)), b":-1\r\n");
        assert_eq!(serialize(&Frame::Null), b"_\r\n");
        assert_eq!(
            serialize(&Frame::Bulk(Bytes::from_static(b""))),
            b"$0\r\n\r\n"
        );
    }

    #[test]
    fn map() {
        let frame = Frame::Map(vec![(Frame::Simple("role".into()), Frame::Integer(1))]);
        assert_eq!(serialize(&frame), b"%1\r\n+role\r\n:1\r\n");
    }
}
