//! # Frame Pool
//!
//! Bounded set of reusable byte buffers for the render thread. Frames are
//! pre-allocated at the nominal quantum size so the steady state performs no
//! allocation; oversized requests fall back to an exact-size allocation that
//! is dropped after use. Correctness never depends on a pool hit.

use std::ops::{Deref, DerefMut};

/// One PCM buffer handed to the render graph.
#[derive(Debug)]
pub struct PooledFrame {
    storage: Box<[u8]>,
    len: usize,
}

impl PooledFrame {
    fn with_capacity(capacity: usize) -> Self {
        Self {
            storage: vec![0u8; capacity].into_boxed_slice(),
            len: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.storage.len()
    }

    /// Bytes committed by the last write.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Immutable view of the committed bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.storage[..self.len]
    }

    /// Borrow the first `len` bytes for writing. `len` is clamped to the
    /// capacity. The logical length becomes `len` when the guard drops.
    pub fn write(&mut self, len: usize) -> FrameWriteGuard<'_> {
        let len = len.min(self.capacity());
        FrameWriteGuard { frame: self, len }
    }
}

/// Exclusive write borrow of a [`PooledFrame`].
pub struct FrameWriteGuard<'a> {
    frame: &'a mut PooledFrame,
    len: usize,
}

impl FrameWriteGuard<'_> {
    /// Shorten the length committed on drop. Never grows it.
    pub fn truncate(&mut self, len: usize) {
        self.len = self.len.min(len);
    }
}

impl Deref for FrameWriteGuard<'_> {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        &self.frame.storage[..self.len]
    }
}

impl DerefMut for FrameWriteGuard<'_> {
    fn deref_mut(&mut self) -> &mut [u8] {
        &mut self.frame.storage[..self.len]
    }
}

impl Drop for FrameWriteGuard<'_> {
    fn drop(&mut self) {
        self.frame.len = self.len;
    }
}

/// Pool of idle frames.
///
/// Not internally synchronized: the bridge only touches it while holding its
/// active-state lock.
#[derive(Debug)]
pub struct FramePool {
    idle: Vec<PooledFrame>,
    pool_size: usize,
    nominal_capacity: usize,
    allocations: usize,
}

impl FramePool {
    /// Empty pool that keeps up to `pool_size` idle frames of at most
    /// `nominal_capacity` bytes.
    pub fn new(pool_size: usize, nominal_capacity: usize) -> Self {
        Self {
            idle: Vec::with_capacity(pool_size),
            pool_size,
            nominal_capacity,
            allocations: 0,
        }
    }

    /// Fill the idle set with nominal-size frames.
    pub fn preallocate(&mut self) {
        while self.idle.len() < self.pool_size {
            self.idle.push(PooledFrame::with_capacity(self.nominal_capacity));
            self.allocations += 1;
        }
    }

    /// Take an idle frame holding at least `min_capacity` bytes, or allocate
    /// one of exactly that size.
    pub fn acquire(&mut self, min_capacity: usize) -> PooledFrame {
        match self
            .idle
            .iter()
            .position(|frame| frame.capacity() >= min_capacity)
        {
            Some(index) => self.idle.swap_remove(index),
            None => {
                self.allocations += 1;
                PooledFrame::with_capacity(min_capacity)
            }
        }
    }

    /// Return a frame. Kept only when it is not oversized and the idle set
    /// has room; dropped otherwise.
    pub fn release(&mut self, mut frame: PooledFrame) {
        if frame.capacity() <= self.nominal_capacity && self.idle.len() < self.pool_size {
            frame.len = 0;
            self.idle.push(frame);
        }
    }

    /// Drop every idle frame.
    pub fn clear(&mut self) {
        self.idle.clear();
    }

    pub fn idle_len(&self) -> usize {
        self.idle.len()
    }

    pub fn pool_size(&self) -> usize {
        self.pool_size
    }

    pub fn nominal_capacity(&self) -> usize {
        self.nominal_capacity
    }

    /// Frames allocated over the pool's lifetime, including preallocation.
    pub fn allocations(&self) -> usize {
        self.allocations
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_preallocate_fills_to_pool_size() {
        let mut pool = FramePool::new(6, 441 * 4);
        pool.preallocate();
        assert_eq!(pool.idle_len(), 6);
        assert_eq!(pool.allocations(), 6);

        pool.preallocate();
        assert_eq!(pool.allocations(), 6);
    }

    #[test]
    fn test_acquire_reuses_idle_frame() {
        let mut pool = FramePool::new(2, 1764);
        pool.preallocate();

        let frame = pool.acquire(1000);
        assert_eq!(frame.capacity(), 1764);
        assert_eq!(pool.idle_len(), 1);
        assert_eq!(pool.allocations(), 2);
    }

    #[test]
    fn test_acquire_oversized_allocates_exact() {
        let mut pool = FramePool::new(2, 1764);
        pool.preallocate();

        let frame = pool.acquire(5000);
        assert_eq!(frame.capacity(), 5000);
        assert_eq!(pool.idle_len(), 2);

        pool.release(frame);
        assert_eq!(pool.idle_len(), 2, "oversized frame must not be retained");
    }

    #[test]
    fn test_release_respects_pool_size() {
        let mut pool = FramePool::new(6, 1764);
        let frames: Vec<_> = (0..10).map(|_| pool.acquire(100)).collect();
        for frame in frames {
            pool.release(frame);
        }
        assert_eq!(pool.idle_len(), 6);
    }

    #[test]
    fn test_pool_bounds_under_mixed_traffic() {
        let mut pool = FramePool::new(6, 1764);
        pool.preallocate();

        for round in 0..200 {
            let sizes = [4, 1764, 1765, 8000, 400, 1764 - round % 7];
            let held: Vec<_> = sizes.iter().map(|&s| pool.acquire(s)).collect();
            for frame in held {
                pool.release(frame);
            }
            assert!(pool.idle_len() <= pool.pool_size());
            assert!(pool.idle.iter().all(|f| f.capacity() <= pool.nominal_capacity()));
        }
    }

    #[test]
    fn test_write_guard_commits_length() {
        let mut pool = FramePool::new(1, 16);
        let mut frame = pool.acquire(16);
        {
            let mut guard = frame.write(6);
            guard.copy_from_slice(&[1, 2, 3, 4, 5, 6]);
            assert_eq!(guard.len(), 6);
        }
        assert_eq!(frame.len(), 6);
        assert_eq!(frame.as_bytes(), &[1, 2, 3, 4, 5, 6]);

        pool.release(frame);
        let reused = pool.acquire(4);
        assert!(reused.is_empty());
    }

    #[test]
    fn test_write_guard_truncate_shortens_commit() {
        let mut pool = FramePool::new(1, 16);
        let mut frame = pool.acquire(16);
        {
            let mut guard = frame.write(12);
            guard[..4].copy_from_slice(&[9, 8, 7, 6]);
            guard.truncate(4);
            guard.truncate(10);
            assert_eq!(guard.len(), 4);
        }
        assert_eq!(frame.as_bytes(), &[9, 8, 7, 6]);
    }

    #[test]
    fn test_write_clamps_to_capacity() {
        let mut pool = FramePool::new(0, 8);
        let mut frame = pool.acquire(8);
        drop(frame.write(100));
        assert_eq!(frame.len(), 8);
    }

    #[test]
    fn test_clear_drops_idle() {
        let mut pool = FramePool::new(6, 64);
        pool.preallocate();
        pool.clear();
        assert_eq!(pool.idle_len(), 0);
    }
}
