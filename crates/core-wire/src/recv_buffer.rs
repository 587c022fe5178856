//! Bounded delimited-line reader over a blocking byte channel.

use std::io::Read;
use std::ops::Range;
use thiserror::Error;

pub const MIN_CAPACITY: usize = 512;

#[derive(Debug, Error)]
pub enum ReadLineError {
    #[error("unterminated line exceeds the {0} byte receive buffer")]
    BufferOverflow(usize),
    #[error("controller channel read failed: {0}")]
    Io(#[source] std::io::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineStatus {
    /// Nothing to report this call; the caller should try again later.
    NoData,
    /// A line is ready via [`RecvBuffer::current_line`]; there is no
    /// further unconsumed data buffered behind it.
    LineNoResidue,
    /// A line is ready via [`RecvBuffer::current_line`]; another line (or
    /// a partial one) is already buffered and will surface on the next call.
    LineWithResidue,
}

/// A fixed-capacity line reader holding at most one partial line across
/// reads from a blocking byte channel.
pub struct RecvBuffer {
    buf: Vec<u8>,
    capacity: usize,
    begin: usize,
    end: usize,
    current_line: Option<Range<usize>>,
}

impl RecvBuffer {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(MIN_CAPACITY);
        Self {
            buf: vec![0u8; capacity],
            capacity,
            begin: 0,
            end: 0,
            current_line: None,
        }
    }

    /// The most recently completed line, excluding its terminating newline.
    /// The caller must consume this before the next call to [`Self::read_line`].
    pub fn current_line(&self) -> &[u8] {
        match &self.current_line {
            Some(range) => &self.buf[range.clone()],
            None => &[],
        }
    }

    fn scan_for_newline(&self) -> Option<usize> {
        self.buf[self.begin..self.end]
            .iter()
            .position(|&b| b == b'\n')
            .map(|rel| self.begin + rel)
        }

    pub fn read_line<R: Read>(&mut self, reader: &mut R) -> Result<LineStatus, ReadLineError> {
        loop {
            if let Some(newline_at) = self.scan_for_newline() {
                let line_start = self.begin;
                let new_begin = newline_at + 1;
                let residue = new_begin < self.end;
                self.current_line = Some(line_start..newline_at);
                self.begin = new_begin;
                return Ok(if residue {
                    LineStatus::LineWithResidue
                } else {
                    LineStatus::LineNoResidue
                });
            }

            if self.begin == 0 && self.end == self.capacity {
                self.begin = 0;
                self.end = 0;
                self.current_line = None;
                return Err(ReadLineError::BufferOverflow(self.capacity));
            }

            if self.begin > 0 {
                self.buf.copy_within(self.begin..self.end, 0);
                self.end -= self.begin;
                self.begin = 0;
            }

            let n = reader
                .read(&mut self.buf[self.end..self.capacity])
                .map_err(ReadLineError::Io)?;
            if n == 0 {
                return Ok(LineStatus::NoData);
            }
            self.end += n;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn reads_single_line_no_residue() {
        let mut rb = RecvBuffer::new(MIN_CAPACITY);
        let mut src = Cursor::new(b"LN 1 0\n".to_vec());
        let status = rb.read_line(&mut src).unwrap();
        assert_eq!(status, LineStatus::LineNoResidue);
        assert_eq!(rb.current_line(), b"LN 1 0");
    }

    #[test]
    fn reads_two_lines_from_one_read_with_residue() {
        let mut rb = RecvBuffer::new(MIN_CAPACITY);
        let mut src = Cursor::new(b"LN 1 0\nLN 2 0\n".to_vec());
        let first = rb.read_line(&mut src).unwrap();
        assert_eq!(first, LineStatus::LineWithResidue);
        assert_eq!(rb.current_line(), b"LN 1 0");
        let second = rb.read_line(&mut src).unwrap();
        assert_eq!(second, LineStatus::LineNoResidue);
        assert_eq!(rb.current_line(), b"LN 2 0");
    }

    #[test]
    fn no_data_on_empty_read() {
        let mut rb = RecvBuffer::new(MIN_CAPACITY);
        let mut src = Cursor::new(Vec::<u8>::new());
        let status = rb.read_line(&mut src).unwrap();
        assert_eq!(status, LineStatus::NoData);
    }

    #[test]
    fn buffer_overflow_is_recoverable() {
        let mut rb = RecvBuffer::new(MIN_CAPACITY);
        let mut src = Cursor::new(vec![b'x'; MIN_CAPACITY]);
        let err = rb.read_line(&mut src).unwrap_err();
        assert!(matches!(err, ReadLineError::BufferOverflow(MIN_CAPACITY)));

        // The reader is still usable afterward.
        let mut src2 = Cursor::new(b"LN 1 0\n".to_vec());
        let status = rb.read_line(&mut src2).unwrap();
        assert_eq!(status, LineStatus::LineNoResidue);
        assert_eq!(rb.current_line(), b"LN 1 0");
    }

    #[test]
    fn carries_partial_line_across_reads() {
        struct Chunked {
            chunks: Vec<Vec<u8>>,
        }
        impl Read for Chunked {
            fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
                if self.chunks.is_empty() {
                    return Ok(0);
                }
                let chunk = self.chunks.remove(0);
                buf[..chunk.len()].copy_from_slice(&chunk);
                Ok(chunk.len())
            }
        }
        let mut src = Chunked {
            chunks: vec![b"LN 1".to_vec(), b" 0\n".to_vec()],
        };
        let mut rb = RecvBuffer::new(MIN_CAPACITY);
        let status = rb.read_line(&mut src).unwrap();
        assert_eq!(status, LineStatus::LineNoResidue);
        assert_eq!(rb.current_line(), b"LN 1 0");
    }

    #[test]
    fn minimum_capacity_enforced() {
        let rb = RecvBuffer::new(16);
        assert_eq!(rb.capacity, MIN_CAPACITY);
    }
}
