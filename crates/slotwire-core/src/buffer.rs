//! Fixed-capacity wire buffer with an embedded header
//!
//! Layout of the single allocation:
//!
//! ```text
//! +-----------+-----------+---------------------------------------------+
//! | cursor u32| count u32 |                 payload region              |
//! +-----------+-----------+---------------------------------------------+
//! 0           4           8 (HEADER_SIZE)                      capacity
//!                         |<- cursor ->|<---- count ---->|<- free ->|
//!                                      read position     write position
//! ```
//!
//! Both header fields are stored in native byte order and are rewritten on
//! every mutation, so [`WireBuffer::serialize`] can hand the header and the
//! payload out as one slice with no copy. Because `count` sits directly in
//! front of the payload, the bytes `[count][payload]` are also a complete
//! socket frame ([`WireBuffer::frame`]).
//!
//! The buffer never grows. Every append, reservation, pop and dequeue checks
//! its precondition and panics on violation: overrunning a slot is a
//! programming error, not a recoverable condition.

use core::fmt;

/// Width of the read-cursor header field
pub const CURSOR_SIZE: usize = 4;
/// Width of the count header field (also the socket length-prefix width)
pub const COUNT_SIZE: usize = 4;
/// Bytes in front of the payload region
pub const HEADER_SIZE: usize = CURSOR_SIZE + COUNT_SIZE;

/// Fixed-capacity byte region with a self-describing header
pub struct WireBuffer {
    storage: Box<[u8]>,
    /// Offset of the first unconsumed byte, relative to the payload start
    cursor: usize,
    /// Bytes available from `cursor`
    count: usize,
}

impl WireBuffer {
    /// Allocate a buffer of `capacity` total bytes (header included).
    ///
    /// # Panics
    ///
    /// If `capacity` does not exceed [`HEADER_SIZE`] or the payload region
    /// would not fit a 32-bit count.
    pub fn new(capacity: usize) -> Self {
        assert!(
            capacity > HEADER_SIZE,
            "wire buffer capacity {} must exceed header size {}",
            capacity,
            HEADER_SIZE
        );
        assert!(
            capacity - HEADER_SIZE <= u32::MAX as usize,
            "wire buffer payload capacity {} exceeds u32 count",
            capacity - HEADER_SIZE
        );
        let mut buffer = WireBuffer {
            storage: vec![0u8; capacity].into_boxed_slice(),
            cursor: 0,
            count: 0,
        };
        buffer.sync_header();
        buffer
    }

    /// Total bytes including the header
    #[inline]
    pub fn capacity(&self) -> usize {
        self.storage.len()
    }

    /// Usable payload bytes (total capacity minus header)
    #[inline]
    pub fn data_capacity(&self) -> usize {
        self.storage.len() - HEADER_SIZE
    }

    /// Bytes currently available from the read cursor
    #[inline]
    pub fn len(&self) -> usize {
        self.count
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Bytes consumed from the head since the last reset
    #[inline]
    pub fn dequeued_count(&self) -> usize {
        self.cursor
    }

    /// Unused bytes after the write position
    #[inline]
    pub fn free_space(&self) -> usize {
        self.data_capacity() - self.cursor - self.count
    }

    /// Live payload bytes (`cursor .. cursor + count`)
    #[inline]
    pub fn payload(&self) -> &[u8] {
        let start = HEADER_SIZE + self.cursor;
        &self.storage[start..start + self.count]
    }

    /// Append `data` at the write position.
    pub fn push(&mut self, data: &[u8]) {
        let dst = self.allocate(data.len());
        dst.copy_from_slice(data);
    }

    /// Append the first `len` bytes of `data`.
    pub fn push_n(&mut self, data: &[u8], len: usize) {
        assert!(
            len <= data.len(),
            "push of {} bytes from a {}-byte source",
            len,
            data.len()
        );
        self.push(&data[..len]);
    }

    /// Reserve `n` bytes at the write position and return them for writing.
    /// The count is advanced immediately.
    pub fn allocate(&mut self, n: usize) -> &mut [u8] {
        self.check_fits(n);
        let start = self.write_position();
        self.count += n;
        self.sync_header();
        &mut self.storage[start..start + n]
    }

    /// Writable view of the first `n` free bytes. Does not change the count;
    /// follow with [`reserve_space`](Self::reserve_space) once the number of
    /// bytes actually written is known.
    #[inline]
    pub fn slice_free_space(&mut self, n: usize) -> &mut [u8] {
        self.slice_free_space_at(0, n)
    }

    /// Writable view of `n` free bytes starting `offset` bytes past the
    /// write position. Does not change the count.
    pub fn slice_free_space_at(&mut self, offset: usize, n: usize) -> &mut [u8] {
        self.check_fits(offset + n);
        let start = self.write_position() + offset;
        &mut self.storage[start..start + n]
    }

    /// Commit `n` bytes written out-of-band into the free space.
    pub fn reserve_space(&mut self, n: usize) {
        self.check_fits(n);
        self.count += n;
        self.sync_header();
    }

    /// Remove the last `n` bytes, returning them.
    pub fn pop(&mut self, n: usize) -> &[u8] {
        assert!(n <= self.count, "pop of {} bytes from {} available", n, self.count);
        self.count -= n;
        self.sync_header();
        let start = self.write_position();
        &self.storage[start..start + n]
    }

    /// Remove the first `n` bytes, returning them.
    pub fn dequeue(&mut self, n: usize) -> &[u8] {
        assert!(
            n <= self.count,
            "dequeue of {} bytes from {} available",
            n,
            self.count
        );
        let start = HEADER_SIZE + self.cursor;
        self.cursor += n;
        self.count -= n;
        self.sync_header();
        &self.storage[start..start + n]
    }

    /// Return the cursor to the payload start and the count to zero.
    /// Memory is not cleared.
    #[inline]
    pub fn reset(&mut self) {
        self.cursor = 0;
        self.count = 0;
        self.sync_header();
    }

    /// Header plus payload as one contiguous view of exactly
    /// `HEADER_SIZE + len()` bytes.
    ///
    /// # Panics
    ///
    /// If bytes have been dequeued (the live payload no longer follows the
    /// header directly).
    pub fn serialize(&self) -> &[u8] {
        assert!(
            self.cursor == 0,
            "serialize requires an undequeued buffer ({} bytes dequeued)",
            self.cursor
        );
        &self.storage[..HEADER_SIZE + self.count]
    }

    /// The live payload prefixed by its 4-byte native-order length, exactly
    /// as it travels on the socket.
    ///
    /// # Panics
    ///
    /// If bytes have been dequeued (the count field is then no longer
    /// adjacent to the live payload).
    pub fn frame(&self) -> &[u8] {
        assert!(
            self.cursor == 0,
            "frame view requires an undequeued buffer ({} bytes dequeued)",
            self.cursor
        );
        &self.storage[CURSOR_SIZE..HEADER_SIZE + self.count]
    }

    #[inline]
    fn write_position(&self) -> usize {
        HEADER_SIZE + self.cursor + self.count
    }

    #[inline]
    fn check_fits(&self, n: usize) {
        assert!(
            n <= self.free_space(),
            "wire buffer overrun: {} bytes requested, {} free",
            n,
            self.free_space()
        );
    }

    #[inline]
    fn sync_header(&mut self) {
        self.storage[..CURSOR_SIZE].copy_from_slice(&(self.cursor as u32).to_ne_bytes());
        self.storage[CURSOR_SIZE..HEADER_SIZE].copy_from_slice(&(self.count as u32).to_ne_bytes());
    }
}

impl fmt::Debug for WireBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WireBuffer")
            .field("capacity", &self.capacity())
            .field("cursor", &self.cursor)
            .field("count", &self.count)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn header(cursor: u32, count: u32) -> Vec<u8> {
        let mut bytes = cursor.to_ne_bytes().to_vec();
        bytes.extend_from_slice(&count.to_ne_bytes());
        bytes
    }

    #[test]
    fn test_new_buffer_is_empty() {
        let buf = WireBuffer::new(64);
        assert_eq!(buf.capacity(), 64);
        assert_eq!(buf.data_capacity(), 64 - HEADER_SIZE);
        assert_eq!(buf.len(), 0);
        assert_eq!(buf.free_space(), 56);
        assert_eq!(buf.serialize(), header(0, 0).as_slice());
    }

    #[test]
    #[should_panic(expected = "must exceed header size")]
    fn test_capacity_must_exceed_header() {
        let _ = WireBuffer::new(HEADER_SIZE);
    }

    #[test]
    fn test_serialize_is_header_plus_pushes() {
        let mut buf = WireBuffer::new(32);
        buf.push(b"hello");
        buf.push_n(b" world!!", 6);

        let mut expected = header(0, 11);
        expected.extend_from_slice(b"hello world");
        assert_eq!(buf.serialize(), expected.as_slice());
        assert_eq!(buf.payload(), b"hello world");
    }

    #[test]
    fn test_dequeue_reproduces_pushed_sequence() {
        let mut buf = WireBuffer::new(64);
        let chunks: [&[u8]; 3] = [b"ab", b"cdef", b"g"];
        for chunk in chunks {
            buf.push(chunk);
        }

        let mut out = Vec::new();
        out.extend_from_slice(buf.dequeue(3));
        out.extend_from_slice(buf.dequeue(1));
        assert_eq!(buf.dequeued_count(), 4);
        let rest = buf.len();
        out.extend_from_slice(buf.dequeue(rest));

        assert_eq!(out, b"abcdefg");
        assert!(buf.is_empty());
        assert_eq!(buf.dequeued_count(), 7);
    }

    #[test]
    #[should_panic(expected = "serialize requires an undequeued buffer")]
    fn test_serialize_after_dequeue_panics() {
        let mut buf = WireBuffer::new(32);
        buf.push(b"abcdef");
        let _ = buf.dequeue(2);
        let _ = buf.serialize();
    }

    #[test]
    fn test_view_then_commit() {
        let mut buf = WireBuffer::new(32);
        buf.push(b"xy");

        // Simulate a read that delivers fewer bytes than the view offered
        let view = buf.slice_free_space(10);
        assert_eq!(view.len(), 10);
        view[..3].copy_from_slice(b"123");
        assert_eq!(buf.len(), 2);

        buf.reserve_space(3);
        assert_eq!(buf.payload(), b"xy123");

        // Successive views start after the committed bytes
        buf.slice_free_space(2).copy_from_slice(b"45");
        buf.reserve_space(2);
        assert_eq!(buf.payload(), b"xy12345");
    }

    #[test]
    fn test_slice_free_space_at_offset() {
        let mut buf = WireBuffer::new(32);
        buf.slice_free_space_at(2, 2).copy_from_slice(b"cd");
        buf.slice_free_space(2).copy_from_slice(b"ab");
        buf.reserve_space(4);
        assert_eq!(buf.payload(), b"abcd");
    }

    #[test]
    fn test_allocate_writes_in_place() {
        let mut buf = WireBuffer::new(16);
        buf.allocate(3).copy_from_slice(&[1, 2, 3]);
        assert_eq!(buf.len(), 3);
        assert_eq!(buf.payload(), &[1, 2, 3]);
    }

    #[test]
    fn test_pop_removes_tail() {
        let mut buf = WireBuffer::new(16);
        buf.push(b"abcdef");
        assert_eq!(buf.pop(2), b"ef");
        assert_eq!(buf.payload(), b"abcd");
        buf.push(b"Z");
        assert_eq!(buf.payload(), b"abcdZ");
    }

    #[test]
    fn test_reset_is_logical() {
        let mut buf = WireBuffer::new(16);
        buf.push(b"abc");
        let _ = buf.dequeue(1);
        buf.reset();
        assert_eq!(buf.len(), 0);
        assert_eq!(buf.dequeued_count(), 0);
        assert_eq!(buf.free_space(), buf.data_capacity());
        assert_eq!(buf.serialize(), header(0, 0).as_slice());
    }

    #[test]
    fn test_frame_matches_socket_format() {
        let mut buf = WireBuffer::new(16);
        buf.push(&[9, 8, 7]);

        let mut expected = 3u32.to_ne_bytes().to_vec();
        expected.extend_from_slice(&[9, 8, 7]);
        assert_eq!(buf.frame(), expected.as_slice());
    }

    #[test]
    fn test_fill_to_exact_capacity() {
        let mut buf = WireBuffer::new(HEADER_SIZE + 4);
        buf.push(&[1, 2, 3, 4]);
        assert_eq!(buf.free_space(), 0);
    }

    #[test]
    #[should_panic(expected = "wire buffer overrun")]
    fn test_overrun_panics() {
        let mut buf = WireBuffer::new(HEADER_SIZE + 4);
        buf.push(&[1, 2, 3, 4, 5]);
    }

    #[test]
    #[should_panic(expected = "wire buffer overrun")]
    fn test_reserve_past_capacity_panics() {
        let mut buf = WireBuffer::new(HEADER_SIZE + 4);
        buf.reserve_space(5);
    }

    #[test]
    #[should_panic(expected = "dequeue of 3 bytes")]
    fn test_dequeue_past_count_panics() {
        let mut buf = WireBuffer::new(16);
        buf.push(b"ab");
        let _ = buf.dequeue(3);
    }
}
