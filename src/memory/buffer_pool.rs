use std::collections::{HashMap, VecDeque};
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicUsize, Ordering};
use parking_lot::Mutex;

const MIN_SIZE_CLASS: usize = 64;

/// Pool of reusable byte buffers bucketed by power-of-two size class
#[derive(Debug)]
pub struct ByteBufferPool {
    pools: Mutex<HashMap<usize, BufferQueue>>,
    max_per_size: usize,
    pub total_allocated: AtomicUsize,
}

#[derive(Debug)]
struct BufferQueue {
    buffers: VecDeque<Vec<u8>>,
}

impl BufferQueue {
    fn new() -> BufferQueue {
        BufferQueue { buffers: VecDeque::new() }
    }
}

impl ByteBufferPool {
    pub fn new(max_per_size: usize) -> Self {
        let mut pools = HashMap::new();

        // Key sized buffers are by far the most common
        for size in [64, 256, 1024, 4096] {
            pools.insert(size, BufferQueue::new());
        }

        ByteBufferPool {
            pools: Mutex::new(pools),
            max_per_size,
            total_allocated: AtomicUsize::new(0),
        }
    }

    /// Borrow an empty buffer with at least `min_capacity` bytes of capacity.
    /// The buffer goes back to the pool when the guard drops.
    pub fn get(&self, min_capacity: usize) -> PooledBuffer<'_> {
        let size_class = Self::size_class(min_capacity);

        let pooled = {
            let mut pools = self.pools.lock();
            pools.get_mut(&size_class).and_then(|queue| queue.buffers.pop_front())
        };

        let buf = match pooled {
            Some(buf) => buf,
            None => {
                self.total_allocated.fetch_add(1, Ordering::Relaxed);
                Vec::with_capacity(size_class)
            }
        };

        PooledBuffer { pool: self, buf: Some(buf) }
    }

    fn return_buffer(&self, mut buf: Vec<u8>) {
        buf.clear();
        // Buffers that grew past their class are filed under the class they now fill
        let size_class = Self::floor_size_class(buf.capacity());

        let mut pools = self.pools.lock();
        let queue = pools.entry(size_class).or_insert_with(BufferQueue::new);
        if queue.buffers.len() < self.max_per_size {
            queue.buffers.push_back(buf);
        }
    }

    /// Number of idle buffers currently held across all size classes
    pub fn current_pool_size(&self) -> usize {
        self.pools.lock().values().map(|q| q.buffers.len()).sum()
    }

    pub fn max_per_size(&self) -> usize {
        self.max_per_size
    }

    fn size_class(min_capacity: usize) -> usize {
        min_capacity.max(MIN_SIZE_CLASS).next_power_of_two()
    }

    fn floor_size_class(capacity: usize) -> usize {
        if capacity < MIN_SIZE_CLASS {
            return MIN_SIZE_CLASS;
        }
        // largest power of two not above capacity
        1usize << (usize::BITS - 1 - capacity.leading_zeros())
    }
}

impl Default for ByteBufferPool {
    fn default() -> Self {
        ByteBufferPool::new(50)
    }
}

/// Scoped loan of a pooled buffer
pub struct PooledBuffer<'a> {
    pool: &'a ByteBufferPool,
    buf: Option<Vec<u8>>,
}

impl PooledBuffer<'_> {
    /// Take ownership of the bytes, the buffer is not returned to the pool
    pub fn into_vec(mut self) -> Vec<u8> {
        self.buf.take().unwrap_or_default()
    }
}

impl Deref for PooledBuffer<'_> {
    type Target = Vec<u8>;

    fn deref(&self) -> &Vec<u8> {
        // Only None after into_vec, which consumes the guard
        self.buf.as_ref().unwrap_or(&EMPTY)
    }
}

impl DerefMut for PooledBuffer<'_> {
    fn deref_mut(&mut self) -> &mut Vec<u8> {
        self.buf.get_or_insert_with(Vec::new)
    }
}

impl Drop for PooledBuffer<'_> {
    fn drop(&mut self) {
        if let Some(buf) = self.buf.take() {
            self.pool.return_buffer(buf);
        }
    }
}

static EMPTY: Vec<u8> = Vec::new();

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_buffer_returned_on_drop() {
        let pool = ByteBufferPool::new(10);
        assert_eq!(pool.current_pool_size(), 0);
        {
            let mut buf = pool.get(100);
            buf.extend_from_slice(b"hello");
            assert!(buf.capacity() >= 100);
        }
        assert_eq!(pool.current_pool_size(), 1);

        // Reused buffer comes back empty
        let buf = pool.get(100);
        assert!(buf.is_empty());
        assert_eq!(pool.current_pool_size(), 0);
        assert_eq!(pool.total_allocated.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn test_pool_is_bounded() {
        let pool = ByteBufferPool::new(2);
        let buffers: Vec<_> = (0..5).map(|_| pool.get(10)).collect();
        drop(buffers);
        assert_eq!(pool.current_pool_size(), 2);
    }

    #[test]
    fn test_into_vec_keeps_bytes() {
        let pool = ByteBufferPool::new(2);
        let mut buf = pool.get(8);
        buf.extend_from_slice(&[1, 2, 3]);
        let owned = buf.into_vec();
        assert_eq!(owned, vec![1, 2, 3]);
        assert_eq!(pool.current_pool_size(), 0);
    }

    #[test]
    fn test_size_classes() {
        assert_eq!(ByteBufferPool::size_class(1), 64);
        assert_eq!(ByteBufferPool::size_class(65), 128);
        assert_eq!(ByteBufferPool::floor_size_class(100), 64);
        assert_eq!(ByteBufferPool::floor_size_class(4096), 4096);
    }
}
