//! The byte buffer type handed across the input/output event boundary.

/// An owned byte buffer with a send/consume cursor.
///
/// `position` tracks how much of `data` has already been sent when a write
/// is interrupted by a would-block; it is always `0` for a freshly received
/// or freshly enqueued buffer.
#[derive(Debug, Clone)]
pub struct Buffer {
    data: Vec<u8>,
    position: usize,
}

impl Buffer {
    pub fn new(data: Vec<u8>) -> Buffer {
        Buffer { data, position: 0 }
    }

    pub fn with_capacity(capacity: usize) -> Buffer {
        Buffer {
            data: vec![0u8; capacity],
            position: 0,
        }
    }

    /// Bytes not yet sent (or, for a freshly read buffer, all of it).
    pub fn remaining(&self) -> &[u8] {
        &self.data[self.position..]
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn position(&self) -> usize {
        self.position
    }

    /// Advances the send cursor by `n` bytes after a partial write.
    pub fn advance(&mut self, n: usize) {
        self.position += n;
        debug_assert!(self.position <= self.data.len());
    }

    pub fn is_fully_sent(&self) -> bool {
        self.position >= self.data.len()
    }

    /// Truncates the backing storage to `len` bytes, used after a `read`
    /// fills fewer bytes than the buffer's allocated capacity.
    pub fn truncate(&mut self, len: usize) {
        self.data.truncate(len);
    }

    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        &mut self.data
    }

    pub fn into_vec(self) -> Vec<u8> {
        self.data
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn advance_tracks_remaining() {
        let mut buf = Buffer::new(vec![1, 2, 3, 4]);
        assert_eq!(buf.remaining(), &[1, 2, 3, 4]);
        buf.advance(2);
        assert_eq!(buf.remaining(), &[3, 4]);
        assert!(!buf.is_fully_sent());
        buf.advance(2);
        assert!(buf.is_fully_sent());
        assert!(buf.remaining().is_empty());
    }

    #[test]
    fn truncate_after_short_read() {
        let mut buf = Buffer::with_capacity(16);
        buf.truncate(5);
        assert_eq!(buf.len(), 5);
    }
}
