//! # Engine Ring Buffer View
//!
//! Consumer side of the engine's single-producer / single-consumer PCM ring.
//!
//! ## Design
//!
//! - **Ownership**: the engine owns the memory and the write cursor; this
//!   view owns the read cursor and publishes it back after every read.
//! - **Occupancy**: `available = (capacity + write - read) % capacity`.
//!   `write == read` means empty, so the engine never fills the ring
//!   completely.
//! - **Alignment**: reads are truncated to whole frames, so the read cursor
//!   always sits on a frame boundary relative to where reading started.
//! - **Wraparound**: a read that crosses the end of the region is served as
//!   two contiguous copies.
//!
//! The only `unsafe` reads of engine memory in the crate live in
//! [`EngineRingBuffer::read_into`], which clamps every read to the bytes the
//! engine has published. The read cursor cannot overtake the write cursor
//! through this type.
//!
//! ## Usage
//!
//! ```ignore
//! let mut ring = EngineRingBuffer::attach(engine_buffer, region);
//! let len = ring.readable(requested_bytes, frame_size);
//! if len > 0 {
//!     let copied = ring.read_into(&mut frame[..len], frame_size);
//! }
//! ```

use std::ops::Range;
use std::sync::Arc;

use bridge_traits::{EngineAudioBuffer, EngineRegion};

/// Bytes that can be read when the cursors are at `read` and `write`.
pub fn available_bytes(capacity: usize, read: usize, write: usize) -> usize {
    if capacity == 0 {
        return 0;
    }
    (capacity + write % capacity - read % capacity) % capacity
}

/// Bytes to copy for one request: the smaller of what is available and what
/// was asked for, truncated down to a whole number of frames.
pub fn bytes_to_copy(available: usize, requested: usize, frame_size: usize) -> usize {
    if frame_size == 0 {
        return 0;
    }
    let len = available.min(requested);
    len - len % frame_size
}

/// Split `len` bytes starting at `read` into at most two contiguous ranges of
/// a ring of `capacity` bytes.
pub fn wrap_ranges(capacity: usize, read: usize, len: usize) -> (Range<usize>, Option<Range<usize>>) {
    let first_len = len.min(capacity - read);
    let first = read..read + first_len;
    let rest = len - first_len;
    if rest == 0 {
        (first, None)
    } else {
        (first, Some(0..rest))
    }
}

/// Read-side view over the engine's ring region.
pub struct EngineRingBuffer {
    buffer: Arc<dyn EngineAudioBuffer>,
    region: EngineRegion,
    read: usize,
}

impl EngineRingBuffer {
    /// Attach to a region, resetting the read cursor to 0 and publishing it.
    pub fn attach(buffer: Arc<dyn EngineAudioBuffer>, region: EngineRegion) -> Self {
        buffer.set_read_cursor(0);
        Self {
            buffer,
            region,
            read: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.region.capacity()
    }

    pub fn read_cursor(&self) -> usize {
        self.read
    }

    /// Whole-frame byte count readable right now, capped at `requested`.
    ///
    /// Performs exactly one load of the engine's write cursor.
    pub fn readable(&self, requested: usize, frame_size: usize) -> usize {
        let write = self.buffer.write_cursor();
        let available = available_bytes(self.capacity(), self.read, write);
        bytes_to_copy(available, requested, frame_size)
    }

    /// Copy up to `dest.len()` bytes from the read cursor into `dest`,
    /// advance the read cursor past them, and publish it.
    ///
    /// The write cursor is loaded once and the copy is clamped to the whole
    /// frames available at that moment. Returns the number of bytes copied;
    /// `dest[copied..]` is left untouched.
    pub fn read_into(&mut self, dest: &mut [u8], frame_size: usize) -> usize {
        let len = self.readable(dest.len(), frame_size);
        if len == 0 {
            return 0;
        }

        let capacity = self.capacity();
        let (first, second) = wrap_ranges(capacity, self.read, len);
        let base = self.region.base().as_ptr();

        // SAFETY: both ranges lie inside `0..capacity` and cover only bytes
        // between the read cursor and the write cursor loaded above, which the
        // engine does not touch until the read cursor moves past them. The
        // region stays valid while `self.buffer` is alive.
        unsafe {
            std::ptr::copy_nonoverlapping(base.add(first.start), dest.as_mut_ptr(), first.len());
            if let Some(second) = second {
                std::ptr::copy_nonoverlapping(
                    base.add(second.start),
                    dest.as_mut_ptr().add(first.len()),
                    second.len(),
                );
            }
        }

        self.read = (self.read + len) % capacity;
        self.buffer.set_read_cursor(self.read);
        len
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{TestEngineBuffer, XorShift};

    /// Move the read cursor to `position` by publishing and reading up to it.
    fn advance_to(engine: &TestEngineBuffer, ring: &mut EngineRingBuffer, position: usize) {
        engine.set_write_cursor(position);
        let mut scratch = vec![0u8; position];
        assert_eq!(ring.read_into(&mut scratch, 1), position);
    }

    #[test]
    fn test_ring_buffer_available_wraps() {
        assert_eq!(available_bytes(1000, 600, 200), 600);
        assert_eq!(available_bytes(1000, 200, 600), 400);
        assert_eq!(available_bytes(1000, 300, 300), 0);
        assert_eq!(available_bytes(0, 0, 0), 0);
    }

    #[test]
    fn test_ring_buffer_copy_is_frame_aligned() {
        assert_eq!(bytes_to_copy(7, 100, 4), 4);
        assert_eq!(bytes_to_copy(3, 100, 4), 0);
        assert_eq!(bytes_to_copy(1000, 18, 6), 18);
        assert_eq!(bytes_to_copy(1000, 20, 6), 18);
    }

    #[test]
    fn test_ring_buffer_wrap_ranges() {
        assert_eq!(wrap_ranges(1000, 600, 400), (600..1000, None));
        assert_eq!(wrap_ranges(1000, 800, 400), (800..1000, Some(0..200)));
        assert_eq!(wrap_ranges(1000, 0, 0), (0..0, None));
    }

    #[test]
    fn test_ring_buffer_scenario_1000_4_600_200() {
        let engine = TestEngineBuffer::with_pattern(1000);
        let mut ring = EngineRingBuffer::attach(engine.clone(), engine.region().unwrap());
        advance_to(&engine, &mut ring, 200);
        engine.set_write_cursor(600);

        let len = ring.readable(usize::MAX, 4);
        assert_eq!(len, 400);

        let mut out = vec![0u8; len];
        assert_eq!(ring.read_into(&mut out, 4), 400);

        assert_eq!(out, engine.expected(200, 400));
        assert_eq!(ring.read_cursor(), 600);
        assert_eq!(engine.published_read_cursor(), 600);
    }

    #[test]
    fn test_ring_buffer_attach_publishes_zero() {
        let engine = TestEngineBuffer::with_pattern(64);
        engine.force_read_cursor(17);
        let ring = EngineRingBuffer::attach(engine.clone(), engine.region().unwrap());
        assert_eq!(ring.read_cursor(), 0);
        assert_eq!(engine.published_read_cursor(), 0);
    }

    #[test]
    fn test_ring_buffer_empty_reads_nothing() {
        let engine = TestEngineBuffer::with_pattern(256);
        let mut ring = EngineRingBuffer::attach(engine.clone(), engine.region().unwrap());
        assert_eq!(ring.readable(1024, 4), 0);

        let mut out = [0xAAu8; 64];
        assert_eq!(ring.read_into(&mut out, 4), 0);
        assert!(out.iter().all(|&b| b == 0xAA));
        assert_eq!(engine.published_read_cursor(), 0);
    }

    #[test]
    fn test_ring_buffer_oversized_read_stops_at_writer() {
        let engine = TestEngineBuffer::with_pattern(1000);
        engine.set_write_cursor(100);
        let mut ring = EngineRingBuffer::attach(engine.clone(), engine.region().unwrap());

        let mut out = vec![0u8; 900];
        assert_eq!(ring.read_into(&mut out, 4), 100);
        assert_eq!(out[..100], engine.expected(0, 100)[..]);
        assert!(out[100..].iter().all(|&b| b == 0));
        assert_eq!(ring.read_cursor(), 100);
        assert_eq!(engine.published_read_cursor(), 100);

        // Caught up: further reads copy nothing and leave the cursor alone.
        assert_eq!(ring.read_into(&mut out, 4), 0);
        assert_eq!(ring.read_cursor(), 100);
        assert_eq!(available_bytes(1000, ring.read_cursor(), 100), 0);
    }

    #[test]
    fn test_ring_buffer_wrap_property() {
        let mut rng = XorShift::new(0x5eed_1234_abcd_0001);

        for _ in 0..500 {
            let frame_size = [2usize, 3, 4, 6, 8][rng.below(5)];
            let capacity = frame_size * (1 + rng.below(200)) + rng.below(frame_size);
            let engine = TestEngineBuffer::with_pattern(capacity);
            let mut ring = EngineRingBuffer::attach(engine.clone(), engine.region().unwrap());

            let read = rng.below(capacity);
            advance_to(&engine, &mut ring, read);
            let write = rng.below(capacity);
            engine.set_write_cursor(write);

            let requested = rng.below(capacity * 2);
            let len = ring.readable(requested, frame_size);

            let available = available_bytes(capacity, read, write);
            assert!(len <= available);
            assert!(len <= requested);
            assert_eq!(len % frame_size, 0);

            let mut out = vec![0u8; requested];
            assert_eq!(ring.read_into(&mut out, frame_size), len);
            assert_eq!(out[..len], engine.expected(read, len)[..]);

            assert_eq!(ring.read_cursor(), (read + len) % capacity);
            assert!(ring.read_cursor() < capacity);
            // Never overtakes the writer.
            assert!(available_bytes(capacity, ring.read_cursor(), write) == available - len);
        }
    }
}
