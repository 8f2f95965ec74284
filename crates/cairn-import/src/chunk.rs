//! Streaming block splitters.

use std::io::Read;

use bytes::Bytes;

/// Default chunk size: 256 KiB.
pub const DEFAULT_CHUNK_SIZE: usize = 256 * 1024;

/// A splitter consuming a byte stream and emitting chunks.
///
/// The fixed-size splitter is the default; content-defined splitters plug in
/// through this trait.
pub trait Chunker {
    /// The next chunk, or `None` at end of stream.
    fn next_chunk(&mut self) -> std::io::Result<Option<Bytes>>;
}

/// Fixed-size splitter: every chunk is `size` bytes except a shorter tail.
pub struct SizeChunker<R: Read> {
    reader: R,
    size: usize,
    done: bool,
}

impl<R: Read> SizeChunker<R> {
    pub fn new(reader: R, size: usize) -> Self {
        assert!(size > 0, "chunk size must be positive");
        Self {
            reader,
            size,
            done: false,
        }
    }

    pub fn with_default_size(reader: R) -> Self {
        Self::new(reader, DEFAULT_CHUNK_SIZE)
    }
}

impl<R: Read> Chunker for SizeChunker<R> {
    fn next_chunk(&mut self) -> std::io::Result<Option<Bytes>> {
        if self.done {
            return Ok(None);
        }
        let mut chunk = vec![0u8; self.size];
        let mut filled = 0usize;
        while filled < self.size {
            match self.reader.read(&mut chunk[filled..]) {
                Ok(0) => {
                    self.done = true;
                    break;
                }
                Ok(n) => filled += n,
                Err(err) if err.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(err) => return Err(err),
            }
        }
        if filled == 0 {
            return Ok(None);
        }
        chunk.truncate(filled);
        Ok(Some(Bytes::from(chunk)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunks_of(data: &[u8], size: usize) -> Vec<Bytes> {
        let mut chunker = SizeChunker::new(data, size);
        let mut out = Vec::new();
        while let Some(chunk) = chunker.next_chunk().unwrap() {
            out.push(chunk);
        }
        out
    }

    #[test]
    fn empty_stream_has_no_chunks() {
        assert!(chunks_of(b"", 4).is_empty());
    }

    #[test]
    fn exact_multiple_splits_evenly() {
        let chunks = chunks_of(&[7u8; 8], 4);
        assert_eq!(chunks.len(), 2);
        assert!(chunks.iter().all(|c| c.len() == 4));
    }

    #[test]
    fn boundary_plus_one_byte_adds_a_chunk() {
        // Exactly one chunk at the boundary...
        assert_eq!(chunks_of(&[1u8; 4], 4).len(), 1);
        // ...and a second one for a single extra byte.
        let chunks = chunks_of(&[1u8; 5], 4);
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[1].len(), 1);
    }

    #[test]
    fn concatenation_reproduces_input() {
        let data: Vec<u8> = (0..1000).map(|i| (i % 251) as u8).collect();
        let chunks = chunks_of(&data, 64);
        let rebuilt: Vec<u8> = chunks.iter().flat_map(|c| c.iter().copied()).collect();
        assert_eq!(rebuilt, data);
    }

    #[test]
    fn default_size_is_256_kib() {
        assert_eq!(DEFAULT_CHUNK_SIZE, 262_144);
        let data = vec![0u8; DEFAULT_CHUNK_SIZE + 1];
        let mut chunker = SizeChunker::with_default_size(&data[..]);
        assert_eq!(chunker.next_chunk().unwrap().unwrap().len(), DEFAULT_CHUNK_SIZE);
        assert_eq!(chunker.next_chunk().unwrap().unwrap().len(), 1);
        assert!(chunker.next_chunk().unwrap().is_none());
    }
}
