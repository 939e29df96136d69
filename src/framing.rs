//! Byte-stream framing for the handoff and session legs.
//!
//! A TCP read may return half a line, or several lines at once. `LineBuffer`
//! accumulates bytes and hands out complete newline-terminated lines; the
//! session flag is read with exact-length reads so a split flag is
//! reassembled as well.

use bytes::{Buf, Bytes, BytesMut};
use std::io::{self, Read, Write};

/// Longest accepted line, excluding its terminator.
pub const MAX_LINE_LENGTH: usize = 1024;

/// Bytes requested from the socket per read.
const READ_CHUNK: usize = 4096;

/// Flag value announcing a normal client session.
pub const CLIENT_FLAG: u32 = 0;

/// Flag value announcing the administrative close sent at shutdown.
pub const CLOSE_FLAG: u32 = 1;

/// What a connection on a desk endpoint is for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionKind {
    Client,
    Close,
}

/// Read the 4-byte big-endian session flag.
pub fn read_flag<R: Read>(reader: &mut R) -> io::Result<SessionKind> {
    let mut raw = [0u8; 4];
    reader.read_exact(&mut raw)?;
    Ok(match u32::from_be_bytes(raw) {
        CLIENT_FLAG => SessionKind::Client,
        _ => SessionKind::Close,
    })
}

/// Write the session flag for `kind`.
pub fn write_flag<W: Write>(writer: &mut W, kind: SessionKind) -> io::Result<()> {
    let flag = match kind {
        SessionKind::Client => CLIENT_FLAG,
        SessionKind::Close => CLOSE_FLAG,
    };
    writer.write_all(&flag.to_be_bytes())
}

/// One framed line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Line {
    /// Line contents without `\n` (or `\r\n`).
    Complete(Bytes),
    /// A line exceeded `MAX_LINE_LENGTH`; its bytes are discarded up to the
    /// next newline.
    Overlong,
}

/// Reassembles newline-terminated lines from arbitrary read boundaries.
#[derive(Debug, Default)]
pub struct LineBuffer {
    buf: BytesMut,
    /// Dropping the tail of an overlong line.
    discarding: bool,
}

impl LineBuffer {
    pub fn new() -> Self {
        Self {
            buf: BytesMut::with_capacity(READ_CHUNK),
            discarding: false,
        }
    }

    /// Number of buffered bytes not yet returned as a line.
    pub fn pending(&self) -> usize {
        self.buf.len()
    }

    /// Append raw bytes.
    pub fn extend(&mut self, data: &[u8]) {
        self.buf.extend_from_slice(data);
    }

    /// Read once from `reader` into the buffer.
    ///
    /// Returns the number of bytes read; 0 means EOF.
    pub fn fill<R: Read>(&mut self, reader: &mut R) -> io::Result<usize> {
        let mut chunk = [0u8; READ_CHUNK];
        loop {
            match reader.read(&mut chunk) {
                Ok(n) => {
                    self.extend(&chunk[..n]);
                    return Ok(n);
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
    }

    /// Pop the next complete line, if one is buffered.
    pub fn next_line(&mut self) -> Option<Line> {
        loop {
            let Some(pos) = self.buf.iter().position(|&b| b == b'\n') else {
                if self.discarding {
                    self.buf.clear();
                    return None;
                }
                // A trailing `\r` may still turn out to be part of the terminator.
                let limit = MAX_LINE_LENGTH + usize::from(self.buf.last() == Some(&b'\r'));
                if self.buf.len() > limit {
                    self.buf.clear();
                    self.discarding = true;
                    return Some(Line::Overlong);
                }
                return None;
            };

            if self.discarding {
                self.buf.advance(pos + 1);
                self.discarding = false;
                continue;
            }

            let mut line = self.buf.split_to(pos + 1);
            line.truncate(pos);
            if line.last() == Some(&b'\r') {
                line.truncate(pos - 1);
            }

            if line.len() > MAX_LINE_LENGTH {
                return Some(Line::Overlong);
            }
            return Some(Line::Complete(line.freeze()));
        }
    }

    /// Block on `reader` until a line is available.
    ///
    /// Returns `None` at EOF; an unterminated tail is dropped.
    pub fn read_line<R: Read>(&mut self, reader: &mut R) -> io::Result<Option<Line>> {
        loop {
            if let Some(line) = self.next_line() {
                return Ok(Some(line));
            }
            if self.fill(reader)? == 0 {
                return Ok(None);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    /// Reader that yields at most `step` bytes per call.
    struct Trickle<'a> {
        data: &'a [u8],
        step: usize,
    }

    impl Read for Trickle<'_> {
        fn read(&mut self, out: &mut [u8]) -> io::Result<usize> {
            let n = self.step.min(self.data.len()).min(out.len());
            out[..n].copy_from_slice(&self.data[..n]);
            self.data = &self.data[n..];
            Ok(n)
        }
    }

    fn complete(s: &str) -> Option<Line> {
        Some(Line::Complete(Bytes::copy_from_slice(s.as_bytes())))
    }

    #[test]
    fn test_split_lines() {
        let mut lb = LineBuffer::new();
        lb.extend(b"l 5\nd 5 ");
        assert_eq!(lb.next_line(), complete("l 5"));
        assert_eq!(lb.next_line(), None);

        lb.extend(b"50\r\nq\n");
        assert_eq!(lb.next_line(), complete("d 5 50"));
        assert_eq!(lb.next_line(), complete("q"));
        assert_eq!(lb.next_line(), None);
        assert_eq!(lb.pending(), 0);
    }

    #[test]
    fn test_empty_line() {
        let mut lb = LineBuffer::new();
        lb.extend(b"\n");
        assert_eq!(lb.next_line(), complete(""));
    }

    #[test]
    fn test_read_line_byte_by_byte() {
        let mut reader = Trickle {
            data: b"t 5 6 10\nq\npartial",
            step: 1,
        };
        let mut lb = LineBuffer::new();
        assert_eq!(lb.read_line(&mut reader).unwrap(), complete("t 5 6 10"));
        assert_eq!(lb.read_line(&mut reader).unwrap(), complete("q"));
        assert_eq!(lb.read_line(&mut reader).unwrap(), None);
    }

    #[test]
    fn test_overlong_line_is_dropped() {
        let mut lb = LineBuffer::new();
        lb.extend(&vec![b'l'; MAX_LINE_LENGTH + 10]);
        assert_eq!(lb.next_line(), Some(Line::Overlong));
        lb.extend(b"tail of the long line\nl 1\n");
        assert_eq!(lb.next_line(), complete("l 1"));
    }

    #[test]
    fn test_overlong_terminated_line() {
        let mut lb = LineBuffer::new();
        let mut data = vec![b'd'; MAX_LINE_LENGTH + 1];
        data.extend_from_slice(b"\nq\n");
        lb.extend(&data);
        assert_eq!(lb.next_line(), Some(Line::Overlong));
        assert_eq!(lb.next_line(), complete("q"));
    }

    #[test]
    fn test_longest_line_with_split_crlf() {
        let body = vec![b'a'; MAX_LINE_LENGTH];
        let expected = Some(Line::Complete(Bytes::copy_from_slice(&body)));

        let mut whole = LineBuffer::new();
        whole.extend(&body);
        whole.extend(b"\r\n");
        assert_eq!(whole.next_line(), expected);

        let mut split = LineBuffer::new();
        split.extend(&body);
        split.extend(b"\r");
        assert_eq!(split.next_line(), None);
        split.extend(b"\n");
        assert_eq!(split.next_line(), expected);
        assert_eq!(split.pending(), 0);

        // `\r` not followed by `\n` counts toward the line.
        let mut stray = LineBuffer::new();
        stray.extend(&body);
        stray.extend(b"\rx");
        assert_eq!(stray.next_line(), Some(Line::Overlong));
    }

    #[test]
    fn test_flag_roundtrip_split() {
        let mut out = Vec::new();
        write_flag(&mut out, SessionKind::Close).unwrap();
        assert_eq!(out, vec![0, 0, 0, 1]);

        let mut reader = Trickle {
            data: &out,
            step: 1,
        };
        assert_eq!(read_flag(&mut reader).unwrap(), SessionKind::Close);

        let mut reader = Cursor::new(vec![0u8, 0, 0, 0]);
        assert_eq!(read_flag(&mut reader).unwrap(), SessionKind::Client);
    }

    #[test]
    fn test_short_flag_is_error() {
        let mut reader = Cursor::new(vec![0u8, 0]);
        let err = read_flag(&mut reader).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);
    }
}
