//! Consumer side of the ready queue

use std::sync::Arc;

use crate::core::buffer::{BufferItem, BufferPool, ReadyQueue};

/// Serves reads from published buffers in order, recycling exhausted ones
#[derive(Debug)]
pub struct StreamReader {
    pool: Arc<BufferPool>,
    ready: Arc<ReadyQueue>,
    current: Option<BufferItem>,
}

impl StreamReader {
    pub fn new(pool: Arc<BufferPool>, ready: Arc<ReadyQueue>) -> Self {
        Self {
            pool,
            ready,
            current: None,
        }
    }

    /// Copy up to `buf.len()` bytes of the next unread data.
    ///
    /// Returns 0 when nothing has been published yet; that is never an
    /// end-of-stream signal on its own.
    pub fn read(&mut self, buf: &mut [u8]) -> usize {
        if buf.is_empty() {
            return 0;
        }

        loop {
            if self.current.is_none() {
                self.current = self.ready.pop();
            }
            let Some(item) = self.current.as_mut() else {
                return 0;
            };

            let copied = item.consume(buf);
            if item.is_consumed() {
                if let Some(done) = self.current.take() {
                    self.pool.release(done);
                }
            }
            if copied > 0 {
                return copied;
            }
        }
    }

    /// Whether a partially read buffer is held
    pub fn has_current(&self) -> bool {
        self.current.is_some()
    }

    /// Free the held buffer, if any
    pub fn teardown(&mut self) {
        if let Some(item) = self.current.take() {
            self.pool.free(item);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::buffer::BufferKind;

    fn setup() -> (Arc<BufferPool>, Arc<ReadyQueue>, StreamReader) {
        let pool = Arc::new(BufferPool::new(16));
        let ready = Arc::new(ReadyQueue::new());
        let reader = StreamReader::new(Arc::clone(&pool), Arc::clone(&ready));
        (pool, ready, reader)
    }

    fn publish(pool: &BufferPool, ready: &ReadyQueue, bytes: &[u8]) {
        let mut item = pool.obtain().unwrap();
        item.reset(BufferKind::Body);
        item.append(bytes);
        ready.push(item);
    }

    #[test]
    fn test_empty_queue_reads_zero() {
        let (_pool, _ready, mut reader) = setup();
        let mut buf = [0u8; 8];
        assert_eq!(reader.read(&mut buf), 0);
        assert!(!reader.has_current());
    }

    #[test]
    fn test_reads_span_buffers_in_order() {
        let (pool, ready, mut reader) = setup();
        publish(&pool, &ready, b"abcdef");
        publish(&pool, &ready, b"ghij");

        let mut buf = [0u8; 4];
        assert_eq!(reader.read(&mut buf), 4);
        assert_eq!(&buf, b"abcd");
        assert_eq!(reader.read(&mut buf), 2);
        assert_eq!(&buf[..2], b"ef");
        assert_eq!(pool.stats().idle, 1, "exhausted buffer goes back to the pool");
        assert_eq!(reader.read(&mut buf), 4);
        assert_eq!(&buf, b"ghij");
        assert_eq!(reader.read(&mut buf), 0);
    }

    #[test]
    fn test_skips_empty_buffers() {
        let (pool, ready, mut reader) = setup();
        publish(&pool, &ready, b"");
        publish(&pool, &ready, b"xy");

        let mut buf = [0u8; 4];
        assert_eq!(reader.read(&mut buf), 2);
        assert_eq!(pool.stats().idle, 2);
    }

    #[test]
    fn test_teardown_frees_current() {
        let (pool, ready, mut reader) = setup();
        publish(&pool, &ready, b"0123456789");

        let mut buf = [0u8; 3];
        reader.read(&mut buf);
        assert!(reader.has_current());
        reader.teardown();
        assert!(!reader.has_current());
        assert_eq!(pool.stats().live(), 0);
    }
}
