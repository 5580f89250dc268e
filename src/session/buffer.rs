//! Append-only output capture with cursor-based reads.
//!
//! Every byte a process produces stays addressable by its offset until the
//! owning session is reclaimed, so a poller can never miss output no matter
//! how rarely it polls.

use parking_lot::RwLock;

use crate::session::error::{Result, SessionError};

/// Growth-only byte log shared between a session's output pump (the only
/// writer) and any number of readers.
#[derive(Debug, Default)]
pub struct OutputBuffer {
    inner: RwLock<Inner>,
}

#[derive(Debug, Default)]
struct Inner {
    bytes: Vec<u8>,
    closed: bool,
}

impl OutputBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a chunk. Returns `false` (and drops the chunk) once the buffer
    /// has been closed.
    pub fn append(&self, chunk: &[u8]) -> bool {
        let mut inner = self.inner.write();
        if inner.closed {
            return false;
        }
        inner.bytes.extend_from_slice(chunk);
        true
    }

    /// Everything appended since `offset`, plus the offset to pass next time.
    pub fn read_since(&self, offset: usize) -> Result<(Vec<u8>, usize)> {
        let inner = self.inner.read();
        let len = inner.bytes.len();
        if offset > len {
            return Err(SessionError::InvalidOffset { offset, len });
        }
        Ok((inner.bytes[offset..].to_vec(), len))
    }

    pub fn len(&self) -> usize {
        self.inner.read().bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Seal the buffer. Reads keep working against the final content.
    pub fn close(&self) {
        self.inner.write().closed = true;
    }

    pub fn is_closed(&self) -> bool {
        self.inner.read().closed
    }
}

/// Length of the longest prefix of `bytes` that does not end inside a
/// multi-byte UTF-8 sequence.
///
/// Invalid sequences are not held back, only a truncated trailing one.
pub fn complete_utf8_len(bytes: &[u8]) -> usize {
    let len = bytes.len();
    for back in 1..=len.min(4) {
        let byte = bytes[len - back];
        if byte & 0b1100_0000 == 0b1000_0000 {
            continue;
        }
        let width = match byte {
            0xC0..=0xDF => 2,
            0xE0..=0xEF => 3,
            0xF0..=0xF7 => 4,
            _ => 1,
        };
        return if width > back { len - back } else { len };
    }
    len
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn read_since_returns_only_new_bytes() {
        let buffer = OutputBuffer::new();
        buffer.append(b"hello ");
        let (first, offset) = buffer.read_since(0).unwrap();
        assert_eq!(first, b"hello ");
        assert_eq!(offset, 6);

        buffer.append(b"world");
        let (second, offset) = buffer.read_since(offset).unwrap();
        assert_eq!(second, b"world");
        assert_eq!(offset, 11);

        let (empty, same) = buffer.read_since(offset).unwrap();
        assert!(empty.is_empty());
        assert_eq!(same, 11);
    }

    #[test]
    fn history_is_immutable() {
        let buffer = OutputBuffer::new();
        buffer.append(b"abc");
        let (before, _) = buffer.read_since(1).unwrap();
        buffer.append(b"def");
        let (after, _) = buffer.read_since(1).unwrap();
        assert_eq!(&after[..before.len()], &before[..]);
    }

    #[test]
    fn offset_past_end_is_rejected() {
        let buffer = OutputBuffer::new();
        buffer.append(b"xy");
        let err = buffer.read_since(3).unwrap_err();
        assert!(matches!(
            err,
            SessionError::InvalidOffset { offset: 3, len: 2 }
        ));
    }

    #[test]
    fn closed_buffer_rejects_appends_but_serves_reads() {
        let buffer = OutputBuffer::new();
        buffer.append(b"done");
        buffer.close();
        assert!(!buffer.append(b"late"));
        assert!(buffer.is_closed());
        assert_eq!(buffer.read_since(0).unwrap().0, b"done");
    }

    #[test]
    fn concatenated_reads_equal_full_stream() {
        let buffer = OutputBuffer::new();
        let mut seen = Vec::new();
        let mut offset = 0;
        for chunk in [&b"a"[..], b"bc", b"", b"def", b"g"] {
            buffer.append(chunk);
            if chunk.len() % 2 == 0 {
                continue;
            }
            let (data, next) = buffer.read_since(offset).unwrap();
            seen.extend(data);
            offset = next;
        }
        let (rest, _) = buffer.read_since(offset).unwrap();
        seen.extend(rest);
        assert_eq!(seen, b"abcdefg");
    }

    #[test]
    fn utf8_prefix_holds_back_truncated_sequence() {
        let text = "héllo".as_bytes();
        assert_eq!(complete_utf8_len(text), text.len());
        // "é" is two bytes; cut after its first byte
        assert_eq!(complete_utf8_len(&text[..2]), 1);
        let emoji = "🙂".as_bytes();
        assert_eq!(complete_utf8_len(&emoji[..3]), 0);
        assert_eq!(complete_utf8_len(b""), 0);
        assert_eq!(complete_utf8_len(&[0xFF, b'a']), 2);
    }
}
