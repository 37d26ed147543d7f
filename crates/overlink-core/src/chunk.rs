//! Message chunks delivered by the transport below the linearizer.

use bytes::Bytes;

/// A slice of one logical message, positioned by byte offset.
///
/// Chunks may arrive in any order, repeat, or overlap. The payload is a
/// reference-counted [`Bytes`] so trimming a chunk never copies.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    offset: u64,
    end_of_message: bool,
    data: Bytes,
}

impl Chunk {
    /// Create a chunk that does not end the message
    pub fn new(offset: u64, data: impl Into<Bytes>) -> Self {
        Self {
            offset,
            end_of_message: false,
            data: data.into(),
        }
    }

    /// Create the chunk that ends the message
    pub fn last(offset: u64, data: impl Into<Bytes>) -> Self {
        Self {
            offset,
            end_of_message: true,
            data: data.into(),
        }
    }

    /// Create a chunk with an explicit end-of-message flag
    pub fn with_flag(offset: u64, end_of_message: bool, data: impl Into<Bytes>) -> Self {
        Self {
            offset,
            end_of_message,
            data: data.into(),
        }
    }

    /// First byte offset covered by this chunk
    pub fn start(&self) -> u64 {
        self.offset
    }

    /// One past the last byte offset covered, or `None` if it overflows `u64`
    pub fn end(&self) -> Option<u64> {
        self.offset.checked_add(self.data.len() as u64)
    }

    /// Payload length in bytes
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Whether the payload is empty
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Whether this chunk declares the end of the message
    pub fn is_end_of_message(&self) -> bool {
        self.end_of_message
    }

    /// Borrow the payload
    pub fn data(&self) -> &Bytes {
        &self.data
    }

    /// Take the payload
    pub fn into_data(self) -> Bytes {
        self.data
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chunk_bounds() {
        let chunk = Chunk::new(10, &b"hello"[..]);
        assert_eq!(chunk.start(), 10);
        assert_eq!(chunk.end(), Some(15));
        assert_eq!(chunk.len(), 5);
        assert!(!chunk.is_end_of_message());
    }

    #[test]
    fn test_last_chunk() {
        let chunk = Chunk::last(0, Bytes::new());
        assert!(chunk.is_end_of_message());
        assert!(chunk.is_empty());
        assert_eq!(chunk.end(), Some(0));
    }

    #[test]
    fn test_end_overflow() {
        let chunk = Chunk::new(u64::MAX, &b"x"[..]);
        assert_eq!(chunk.end(), None);
    }
}
