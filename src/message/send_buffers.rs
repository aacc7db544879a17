use crate::error::{RtpsError, RtpsResult};
use alloc::sync::Arc;
use bytes::BytesMut;
use core::mem;
use core::ops::{Deref, DerefMut};
use log::{debug, trace};
use parking_lot::{Condvar, Mutex};
use std::time::Instant;

struct Pool {
    free: Vec<BytesMut>,
    allocated: usize,
}

/// Pool of reusable buffers for building outgoing RTPS messages.
///
/// Buffers are created on demand until `max_buffers` exist (0 = no bound),
/// after that `get_buffer` waits until one is returned.
pub struct SendBuffersManager {
    pool: Mutex<Pool>,
    available: Condvar,
    buffer_size: usize,
    max_buffers: usize,
}

impl SendBuffersManager {
    pub fn new(initial_buffers: usize, buffer_size: usize, max_buffers: usize) -> Arc<Self> {
        let free = (0..initial_buffers)
            .map(|_| BytesMut::with_capacity(buffer_size))
            .collect();
        Arc::new(Self {
            pool: Mutex::new(Pool {
                free,
                allocated: initial_buffers,
            }),
            available: Condvar::new(),
            buffer_size,
            max_buffers,
        })
    }

    pub fn buffer_size(&self) -> usize {
        self.buffer_size
    }

    pub fn get_buffer(
        self: &Arc<Self>,
        max_blocking_time_point: Option<Instant>,
    ) -> RtpsResult<SendBuffer> {
        let mut pool = self.pool.lock();
        loop {
            if let Some(buf) = pool.free.pop() {
                return Ok(SendBuffer::new(buf, Arc::clone(self)));
            }
            if self.max_buffers == 0 || pool.allocated < self.max_buffers {
                pool.allocated += 1;
                debug!(
                    "SendBuffersManager grows pool to {} buffers of {} bytes",
                    pool.allocated, self.buffer_size
                );
                return Ok(SendBuffer::new(
                    BytesMut::with_capacity(self.buffer_size),
                    Arc::clone(self),
                ));
            }
            trace!("SendBuffersManager waits for a free buffer");
            match max_blocking_time_point {
                Some(deadline) => {
                    if self.available.wait_until(&mut pool, deadline).timed_out()
                        && pool.free.is_empty()
                    {
                        return Err(RtpsError::Timeout);
                    }
                }
                None => self.available.wait(&mut pool),
            }
        }
    }

    fn return_buffer(&self, mut buf: BytesMut) {
        buf.clear();
        self.pool.lock().free.push(buf);
        self.available.notify_one();
    }

    pub fn free_buffers(&self) -> usize {
        self.pool.lock().free.len()
    }

    pub fn allocated_buffers(&self) -> usize {
        self.pool.lock().allocated
    }
}

/// A buffer borrowed from a SendBuffersManager, given back on drop
pub struct SendBuffer {
    data: BytesMut,
    manager: Arc<SendBuffersManager>,
}

impl SendBuffer {
    fn new(data: BytesMut, manager: Arc<SendBuffersManager>) -> Self {
        Self { data, manager }
    }
}

impl Deref for SendBuffer {
    type Target = BytesMut;
    fn deref(&self) -> &BytesMut {
        &self.data
    }
}

impl DerefMut for SendBuffer {
    fn deref_mut(&mut self) -> &mut BytesMut {
        &mut self.data
    }
}

impl Drop for SendBuffer {
    fn drop(&mut self) {
        self.manager.return_buffer(mem::take(&mut self.data));
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn buffers_are_reused() {
        let manager = SendBuffersManager::new(1, 128, 0);
        {
            let mut buf = manager.get_buffer(None).unwrap();
            buf.extend_from_slice(b"RTPS");
            assert_eq!(manager.free_buffers(), 0);
        }
        assert_eq!(manager.free_buffers(), 1);
        let buf = manager.get_buffer(None).unwrap();
        assert!(buf.is_empty());
        assert_eq!(manager.allocated_buffers(), 1);
    }

    #[test]
    fn pool_grows_when_unbounded() {
        let manager = SendBuffersManager::new(0, 64, 0);
        let a = manager.get_buffer(None).unwrap();
        let b = manager.get_buffer(None).unwrap();
        assert_eq!(manager.allocated_buffers(), 2);
        drop(a);
        drop(b);
        assert_eq!(manager.free_buffers(), 2);
    }

    #[test]
    fn bounded_pool_times_out_then_recovers() {
        let manager = SendBuffersManager::new(1, 64, 1);
        let held = manager.get_buffer(None).unwrap();
        let deadline = Instant::now() + Duration::from_millis(20);
        assert!(matches!(
            manager.get_buffer(Some(deadline)),
            Err(RtpsError::Timeout)
        ));

        let waiter = {
            let manager = Arc::clone(&manager);
            thread::spawn(move || {
                manager
                    .get_buffer(Some(Instant::now() + Duration::from_secs(5)))
                    .is_ok()
            })
        };
        thread::sleep(Duration::from_millis(10));
        drop(held);
        assert!(waiter.join().unwrap());
    }
}
