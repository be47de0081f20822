//! Line framing over a fixed-capacity ring buffer
//!
//! A [`LineReader`] pulls bytes from a [`ByteSource`] into a reusable circular
//! buffer and hands back newline-terminated lines in arrival order. Buffered
//! data is either one contiguous segment or wraps past the end of the buffer
//! into two; lines spanning the wrap point are stitched together on copy.
//!
//! Newline search resumes from the scan cursor, so every ingested byte is
//! examined at most once no matter how the stream is fragmented.

use std::io;

use async_trait::async_trait;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt};
use tracing::debug;

const NEWLINE: u8 = 0x0A;

/// Anything bytes can be pulled from
#[async_trait]
pub trait ByteSource: Send {
    /// Read up to `buf.len()` bytes. `Ok(0)` means end of stream.
    async fn read(&mut self, buf: &mut [u8]) -> io::Result<usize>;
}

#[async_trait]
impl<T> ByteSource for T
where
    T: AsyncRead + Unpin + Send,
{
    async fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        AsyncReadExt::read(self, buf).await
    }
}

/// Why [`LineReader::read_line`] produced no line
#[derive(Debug, Error)]
pub enum LineError {
    /// The source reported end of stream
    #[error("Connection closed by peer")]
    Disconnected,

    /// The delimited line was longer than the caller allows; it has been discarded
    #[error("Result buffer too small: line is {line_len} bytes, limit is {max_len}")]
    ResultTooSmall { line_len: usize, max_len: usize },

    /// The ring filled up without a newline
    #[error("Buffer overflow: received {capacity} bytes without a new line character")]
    BufferOverflow { capacity: usize },

    /// The source failed
    #[error("Read failed: {0}")]
    Io(#[from] io::Error),
}

/// Newline framer with a fixed-capacity circular buffer
pub struct LineReader<S> {
    source: S,
    buffer: Box<[u8]>,
    /// Next free slot
    write_cursor: usize,
    /// First unconsumed byte, `None` when the buffer is empty
    read_cursor: Option<usize>,
    /// Where the next newline search resumes
    scan_cursor: usize,
    scanned_bytes: u64,
}

impl<S: ByteSource> LineReader<S> {
    /// Create a reader with a ring of `capacity` bytes.
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is zero.
    pub fn new(source: S, capacity: usize) -> Self {
        assert!(capacity > 0, "line reader capacity must be non-zero");
        Self {
            source,
            buffer: vec![0u8; capacity].into_boxed_slice(),
            write_cursor: 0,
            read_cursor: None,
            scan_cursor: 0,
            scanned_bytes: 0,
        }
    }

    /// Read the next line, including its trailing `\n`.
    ///
    /// A line of exactly `max_len` bytes is returned. Longer lines are
    /// consumed and reported as
    /// [`LineError::ResultTooSmall`]; the following line is still readable.
    pub async fn read_line(&mut self, max_len: usize) -> Result<Vec<u8>, LineError> {
        loop {
            if let Some((start, line_len)) = self.scan_for_newline() {
                return self.take_line(start, line_len, max_len);
            }

            if self.is_full() {
                debug!(
                    "Buffer overflow. Received more than {} bytes without a new line character",
                    self.capacity()
                );
                return Err(LineError::BufferOverflow {
                    capacity: self.capacity(),
                });
            }

            let (start, room) = self.free_region();
            let received =
                ByteSource::read(&mut self.source, &mut self.buffer[start..start + room]).await?;
            if received == 0 {
                return Err(LineError::Disconnected);
            }

            if self.read_cursor.is_none() {
                self.read_cursor = Some(start);
                self.scan_cursor = start;
            }
            self.write_cursor = (self.write_cursor + received) % self.capacity();
        }
    }

    pub fn capacity(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.read_cursor.is_none()
    }

    pub fn is_full(&self) -> bool {
        self.read_cursor == Some(self.write_cursor)
    }

    /// Bytes currently buffered
    pub fn len(&self) -> usize {
        match self.read_cursor {
            None => 0,
            Some(r) if self.write_cursor > r => self.write_cursor - r,
            Some(r) => self.capacity() - r + self.write_cursor,
        }
    }

    /// Discard buffered data, keeping the allocation
    pub fn reset(&mut self) {
        self.write_cursor = 0;
        self.read_cursor = None;
        self.scan_cursor = 0;
    }

    /// Total bytes examined for newlines over the reader's lifetime
    pub fn scanned_bytes(&self) -> u64 {
        self.scanned_bytes
    }

    pub fn get_ref(&self) -> &S {
        &self.source
    }

    /// Search the unscanned tail. Returns `(start, length)` of the first complete line.
    fn scan_for_newline(&mut self) -> Option<(usize, usize)> {
        let start = self.read_cursor?;
        let capacity = self.capacity();
        let used = self.len();
        let mut offset = (self.scan_cursor + capacity - start) % capacity;

        while offset < used {
            let pos = (start + offset) % capacity;
            let chunk = (capacity - pos).min(used - offset);
            match self.buffer[pos..pos + chunk]
                .iter()
                .position(|&b| b == NEWLINE)
            {
                Some(index) => {
                    self.scanned_bytes += (index + 1) as u64;
                    return Some((start, offset + index + 1));
                },
                None => {
                    self.scanned_bytes += chunk as u64;
                    offset += chunk;
                },
            }
        }

        self.scan_cursor = (start + offset) % capacity;
        None
    }

    /// Copy out (or discard) the line at `start` and advance past it
    fn take_line(
        &mut self,
        start: usize,
        line_len: usize,
        max_len: usize,
    ) -> Result<Vec<u8>, LineError> {
        let capacity = self.capacity();
        let end = start + line_len;

        let line = (line_len <= max_len).then(|| {
            let mut line = Vec::with_capacity(line_len);
            if end <= capacity {
                line.extend_from_slice(&self.buffer[start..end]);
            } else {
                line.extend_from_slice(&self.buffer[start..]);
                line.extend_from_slice(&self.buffer[..end - capacity]);
            }
            line
        });

        if line_len == self.len() {
            self.reset();
        } else {
            let next = end % capacity;
            self.read_cursor = Some(next);
            self.scan_cursor = next;
        }

        line.ok_or_else(|| {
            debug!(
                "Result buffer too small. Discarding {} byte line (limit {})",
                line_len, max_len
            );
            LineError::ResultTooSmall { line_len, max_len }
        })
    }

    /// Writable region: after the data if it doesn't wrap, else the gap before the read cursor
    fn free_region(&self) -> (usize, usize) {
        let capacity = self.capacity();
        match self.read_cursor {
            None => (0, capacity),
            Some(r) if self.write_cursor > r => (self.write_cursor, capacity - self.write_cursor),
            Some(r) => (self.write_cursor, r - self.write_cursor),
        }
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;
    use rand::{rngs::StdRng, Rng, SeedableRng};
    use std::collections::VecDeque;
    use std::pin::Pin;
    use std::task::{Context, Poll};
    use tokio::io::ReadBuf;

    /// Hands out pre-arranged chunks, splitting any that exceed the caller's room
    struct ChunkSource {
        chunks: VecDeque<Vec<u8>>,
        reads: usize,
    }

    impl ChunkSource {
        fn new<I, C>(chunks: I) -> Self
        where
            I: IntoIterator<Item = C>,
            C: AsRef<[u8]>,
        {
            Self {
                chunks: chunks.into_iter().map(|c| c.as_ref().to_vec()).collect(),
                reads: 0,
            }
        }
    }

    impl AsyncRead for ChunkSource {
        fn poll_read(
            mut self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
            buf: &mut ReadBuf<'_>,
        ) -> Poll<io::Result<()>> {
            self.reads += 1;
            if let Some(mut chunk) = self.chunks.pop_front() {
                let n = chunk.len().min(buf.remaining());
                buf.put_slice(&chunk[..n]);
                if n < chunk.len() {
                    chunk.drain(..n);
                    self.chunks.push_front(chunk);
                }
            }
            Poll::Ready(Ok(()))
        }
    }

    #[tokio::test]
    async fn test_receive_one_line() {
        let mut reader = LineReader::new(ChunkSource::new(["test\n"]), 20);

        let line = reader.read_line(30).await.unwrap();
        assert_eq!(line, b"test\n");
        assert!(reader.is_empty());
        assert!(!reader.is_full());
    }

    #[tokio::test]
    async fn test_one_line_in_multiple_pieces() {
        let mut reader = LineReader::new(ChunkSource::new(["te", "s", "t\n"]), 20);

        assert_eq!(reader.read_line(30).await.unwrap(), b"test\n");
        assert!(reader.is_empty());
        assert_eq!(reader.get_ref().reads, 3);
    }

    #[tokio::test]
    async fn test_receive_multiple_lines_at_once() {
        let mut reader = LineReader::new(ChunkSource::new(["test1\ntest2\ntest3\n"]), 20);

        assert_eq!(reader.read_line(30).await.unwrap(), b"test1\n");
        assert!(!reader.is_empty());
        assert_eq!(reader.read_line(30).await.unwrap(), b"test2\n");
        assert!(!reader.is_empty());
        assert_eq!(reader.read_line(30).await.unwrap(), b"test3\n");
        assert!(reader.is_empty());
        // Everything came from the single read
        assert_eq!(reader.get_ref().reads, 1);
    }

    #[tokio::test]
    async fn test_line_split_across_wrap_point() {
        // Ring of 10: after "ab\n" is consumed the next line runs off the end
        // of the buffer ("hi" lands exactly on the wrap) and continues at 0.
        let mut reader = LineReader::new(ChunkSource::new(["ab\ncdefg", "hi", "\n"]), 10);

        assert_eq!(reader.read_line(20).await.unwrap(), b"ab\n");
        assert_eq!(reader.read_line(20).await.unwrap(), b"cdefghi\n");
        assert!(reader.is_empty());
    }

    #[tokio::test]
    async fn test_partial_line_kept_between_calls() {
        let mut reader = LineReader::new(ChunkSource::new(["one\ntw", "o\nthr", "ee\n"]), 16);

        assert_eq!(reader.read_line(16).await.unwrap(), b"one\n");
        assert_eq!(reader.len(), 2);
        assert_eq!(reader.read_line(16).await.unwrap(), b"two\n");
        assert_eq!(reader.read_line(16).await.unwrap(), b"three\n");
    }

    #[tokio::test]
    async fn test_buffer_overflow() {
        let mut reader = LineReader::new(ChunkSource::new(["1234567890"]), 10);

        let err = reader.read_line(20).await.unwrap_err();
        assert!(matches!(err, LineError::BufferOverflow { capacity: 10 }));
        assert!(reader.is_full());
    }

    #[tokio::test]
    async fn test_overflow_after_wrap() {
        // Wrapped data filling the ring with no newline is still an overflow
        let mut reader = LineReader::new(ChunkSource::new(["ab\ncdefg", "hijkl"]), 10);

        assert_eq!(reader.read_line(20).await.unwrap(), b"ab\n");
        let err = reader.read_line(20).await.unwrap_err();
        assert!(matches!(err, LineError::BufferOverflow { .. }));
    }

    #[tokio::test]
    async fn test_result_too_small() {
        let mut reader = LineReader::new(ChunkSource::new(["12345\n"]), 10);

        let err = reader.read_line(5).await.unwrap_err();
        assert!(matches!(
            err,
            LineError::ResultTooSmall {
                line_len: 6,
                max_len: 5
            }
        ));
        // The oversized line is gone
        assert!(reader.is_empty());
    }

    #[tokio::test]
    async fn test_max_len_is_inclusive() {
        let mut reader = LineReader::new(ChunkSource::new(["1234\n12345\n"]), 16);

        assert_eq!(reader.read_line(5).await.unwrap(), b"1234\n");
        assert!(matches!(
            reader.read_line(5).await,
            Err(LineError::ResultTooSmall {
                line_len: 6,
                max_len: 5
            })
        ));
    }

    #[tokio::test]
    async fn test_result_too_small_makes_progress() {
        let mut reader = LineReader::new(ChunkSource::new(["toolongline\nok\n"]), 32);

        assert!(matches!(
            reader.read_line(8).await,
            Err(LineError::ResultTooSmall { line_len: 12, .. })
        ));
        assert_eq!(reader.read_line(8).await.unwrap(), b"ok\n");
    }

    #[tokio::test]
    async fn test_disconnected() {
        let mut reader = LineReader::new(ChunkSource::new(Vec::<Vec<u8>>::new()), 10);
        assert!(matches!(
            reader.read_line(10).await,
            Err(LineError::Disconnected)
        ));

        let mut reader = LineReader::new(ChunkSource::new(["partial"]), 10);
        assert!(matches!(
            reader.read_line(10).await,
            Err(LineError::Disconnected)
        ));
        // Cursors are left as they were
        assert_eq!(reader.len(), 7);
    }

    #[tokio::test]
    async fn test_io_error_surfaces() {
        let source = tokio_test::io::Builder::new()
            .read(b"get ")
            .read_error(io::Error::new(io::ErrorKind::ConnectionReset, "reset"))
            .build();
        let mut reader = LineReader::new(source, 10);

        match reader.read_line(10).await {
            Err(LineError::Io(e)) => assert_eq!(e.kind(), io::ErrorKind::ConnectionReset),
            other => panic!("expected Io error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_reset_discards_data() {
        let mut reader = LineReader::new(ChunkSource::new(["abc\ndef", "\n"]), 10);

        assert_eq!(reader.read_line(10).await.unwrap(), b"abc\n");
        assert_eq!(reader.len(), 3);
        reader.reset();
        assert!(reader.is_empty());
        assert_eq!(reader.read_line(10).await.unwrap(), b"\n");
    }

    #[tokio::test]
    async fn test_random_chunks_reconstruct_stream() {
        const TOTAL: usize = 2_000_000;
        let mut rng = StdRng::seed_from_u64(0x12C0);

        let mut data = Vec::with_capacity(TOTAL + 400);
        let mut expected_lines = Vec::new();
        while data.len() < TOTAL {
            let len = rng.gen_range(0..300);
            let mut line: Vec<u8> = (0..len).map(|_| rng.gen_range(b' '..=b'~')).collect();
            line.push(NEWLINE);
            data.extend_from_slice(&line);
            expected_lines.push(line);
        }

        let mut chunks = Vec::new();
        let mut pos = 0;
        while pos < data.len() {
            let size = rng.gen_range(1..=600).min(data.len() - pos);
            chunks.push(data[pos..pos + size].to_vec());
            pos += size;
        }

        let mut reader = LineReader::new(ChunkSource::new(chunks), 400);
        let mut lines = Vec::new();
        loop {
            match reader.read_line(400).await {
                Ok(line) => lines.push(line),
                Err(LineError::Disconnected) => break,
                Err(e) => panic!("unexpected framing error: {}", e),
            }
        }

        assert_eq!(lines.len(), expected_lines.len());
        assert!(lines == expected_lines);
        assert_eq!(lines.concat(), data);
        assert!(reader.scanned_bytes() <= data.len() as u64);
    }
}
