//! Bounded pool of reusable scratch buffers for codec work.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};

/// Fixed-capacity pool of zero-initialized byte buffers.
///
/// `acquire` hands out the first pooled buffer large enough for the request,
/// allocating a fresh one when none fits. `release` zeroes the buffer and
/// returns it while the pool is under capacity; overflow buffers are dropped.
pub struct BufferPool {
    capacity: usize,
    pool: Mutex<VecDeque<Vec<u8>>>,
    allocated: AtomicU64,
    reused: AtomicU64,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl BufferPool {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            pool: Mutex::new(VecDeque::new()),
            allocated: AtomicU64::new(0),
            reused: AtomicU64::new(0),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// Get a buffer of at least `size` bytes.
    pub fn acquire(&self, size: usize) -> Vec<u8> {
        {
            let mut pool = self.pool.lock();
            if let Some(pos) = pool.iter().position(|buf| buf.len() >= size) {
                let buf = pool.remove(pos).unwrap_or_default();
                self.hits.fetch_add(1, Ordering::Relaxed);
                self.reused.fetch_add(1, Ordering::Relaxed);
                return buf;
            }
        }

        self.misses.fetch_add(1, Ordering::Relaxed);
        self.allocated.fetch_add(1, Ordering::Relaxed);
        vec![0u8; size]
    }

    /// Return a buffer to the pool, zeroing its contents first.
    pub fn release(&self, mut buf: Vec<u8>) {
        let mut pool = self.pool.lock();
        if pool.len() < self.capacity {
            buf.fill(0);
            pool.push_back(buf);
        }
        // Over capacity: drop the buffer.
    }

    pub fn pooled(&self) -> usize {
        self.pool.lock().len()
    }

    pub fn stats(&self) -> BufferPoolStats {
        BufferPoolStats {
            allocated: self.allocated.load(Ordering::Relaxed),
            reused: self.reused.load(Ordering::Relaxed),
            pool_hits: self.hits.load(Ordering::Relaxed),
            pool_misses: self.misses.load(Ordering::Relaxed),
        }
    }
}

/// Buffer pool counters snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BufferPoolStats {
    pub allocated: u64,
    pub reused: u64,
    pub pool_hits: u64,
    pub pool_misses: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_acquire_allocates_then_reuses() {
        let pool = BufferPool::new(4);

        let buf = pool.acquire(128);
        assert_eq!(buf.len(), 128);
        assert_eq!(pool.stats().pool_misses, 1);

        pool.release(buf);
        assert_eq!(pool.pooled(), 1);

        // A smaller request reuses the pooled buffer.
        let buf = pool.acquire(64);
        assert_eq!(buf.len(), 128);
        assert_eq!(pool.stats().pool_hits, 1);
    }

    #[test]
    fn test_release_zeroes_contents() {
        let pool = BufferPool::new(2);
        let mut buf = pool.acquire(8);
        buf.copy_from_slice(&[0xAA; 8]);
        pool.release(buf);

        let buf = pool.acquire(8);
        assert!(buf.iter().all(|&b| b == 0));
    }

    #[test]
    fn test_pool_capacity_is_bounded() {
        let pool = BufferPool::new(2);
        let bufs: Vec<_> = (0..4).map(|_| pool.acquire(16)).collect();
        for buf in bufs {
            pool.release(buf);
        }
        assert_eq!(pool.pooled(), 2);
    }

    #[test]
    fn test_concurrent_access() {
        use std::sync::Arc;

        let pool = Arc::new(BufferPool::new(8));
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let pool = pool.clone();
                std::thread::spawn(move || {
                    for _ in 0..100 {
                        let buf = pool.acquire(256);
                        pool.release(buf);
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }
        assert!(pool.pooled() <= 8);
    }
}
