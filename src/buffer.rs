//! The buffered byte stream adapter: a fixed-size slab sitting between the
//! typed primitives and the underlying async stream, refilling on reader
//! underflow and flushing on writer overflow.

use bytes::BytesMut;
use futures_util::FutureExt;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio_util::sync::CancellationToken;

use crate::error::{Error, Result};
use crate::pool::BufferPool;
use crate::varint;

/// Where a codec's backing slab came from, and therefore whether it must be
/// returned to a pool on disposal.
enum Source {
  Pooled(BufferPool),
  Caller,
}

/// Construction-time options shared by readers and writers.
#[derive(Clone)]
pub struct BufferOptions {
  pub buffer_size: usize,
  pub buffer_pool: BufferPool,
  pub buffer: Option<BytesMut>,
}

impl Default for BufferOptions {
  fn default() -> Self {
    Self {
      buffer_size: 1024 * 1024,
      buffer_pool: BufferPool::shared(),
      buffer: None,
    }
  }
}

fn acquire(options: BufferOptions) -> Result<(BytesMut, usize, Source)> {
  if let Some(mut buf) = options.buffer {
    if buf.is_empty() && buf.capacity() == 0 {
      return Err(Error::invalid_argument("caller-provided buffer must be non-empty"));
    }
    let capacity = buf.capacity().max(buf.len());
    buf.resize(capacity, 0);
    Ok((buf, capacity, Source::Caller))
  } else {
    if options.buffer_size == 0 {
      return Err(Error::invalid_argument("buffer_size must be > 0 for a pooled buffer"));
    }
    let mut buf = options.buffer_pool.rent(options.buffer_size);
    buf.resize(options.buffer_size, 0);
    Ok((buf, options.buffer_size, Source::Pooled(options.buffer_pool)))
  }
}

/// Polls `fut` exactly once without awaiting, the "non-blocking" probe used
/// by [`ReadBuffer::is_complete`]. A generic `AsyncRead` has no portable
/// `try_read`, so a single manual poll against a no-op waker stands in for
/// one.
fn poll_once<F: std::future::Future>(fut: F) -> Option<F::Output> {
  fut.now_or_never()
}

async fn with_cancellation<F: std::future::Future<Output = std::io::Result<T>>, T>(
  token: &CancellationToken,
  fut: F,
) -> Result<T> {
  tokio::select! {
    biased;
    _ = token.cancelled() => Err(Error::Cancelled),
    res = fut => res.map_err(Error::Io),
  }
}

/// The reader side of the adapter: refill-on-underflow with the
/// `is_complete` adaptive probe.
pub(crate) struct ReadBuffer {
  buf: BytesMut,
  capacity: usize,
  position: usize,
  available: usize,
  last_row_boundary: usize,
  source: Source,
  disposed: bool,
}

impl ReadBuffer {
  pub fn new(options: BufferOptions) -> Result<Self> {
    let (buf, capacity, source) = acquire(options)?;
    Ok(Self {
      buf,
      capacity,
      position: 0,
      available: 0,
      last_row_boundary: 0,
      source,
      disposed: false,
    })
  }

  pub fn capacity(&self) -> usize {
    self.capacity
  }

  fn unread(&self) -> &[u8] {
    &self.buf[self.position..self.available]
  }

  /// Moves the unread tail to the front of the slab, compacting consumed
  /// bytes out.
  fn compact(&mut self) {
    if self.position == 0 {
      return;
    }
    self.buf.copy_within(self.position..self.available, 0);
    self.available -= self.position;
    self.last_row_boundary = self.last_row_boundary.saturating_sub(self.position);
    self.position = 0;
  }

  /// Ensures at least `n` bytes are available starting at `position`,
  /// blocking on the underlying stream if necessary. Used by every typed
  /// primitive before it decodes.
  pub async fn ensure<R: AsyncRead + Unpin>(
    &mut self,
    stream: &mut R,
    n: usize,
    token: &CancellationToken,
    column: Option<&str>,
  ) -> Result<()> {
    if self.available - self.position >= n {
      return Ok(());
    }
    if n > self.capacity {
      return Err(Error::invalid_argument(format!(
        "requested read of {n} bytes exceeds buffer capacity {}",
        self.capacity
      )));
    }
    self.compact();
    let mut obtained = self.available - self.position;
    while obtained < n {
      if self.available == self.capacity {
        self.compact();
      }
      let read = with_cancellation(token, stream.read(&mut self.buf[self.available..self.capacity])).await?;
      if read == 0 {
        return Err(Error::end_of_stream(n, obtained, column));
      }
      self.available += read;
      obtained += read;
    }
    Ok(())
  }

  /// The non-blocking, adaptively-sized refill probe polled between rows.
  /// Returns `true` once the stream is fully drained.
  pub async fn is_complete<R: AsyncRead + Unpin>(&mut self, stream: &mut R, token: &CancellationToken) -> Result<bool> {
    let last_row_size = self.position - self.last_row_boundary;
    self.last_row_boundary = self.position;

    if self.available - self.position >= last_row_size {
      return Ok(false);
    }

    loop {
      if self.available == self.capacity {
        self.compact();
        if self.available == self.capacity {
          // Caller-sized buffer smaller than one row; nothing more to do
          // non-blockingly, a later `ensure` will surface `EndOfStream`
          // deterministically if the stream truly can't supply the row.
          return Ok(false);
        }
      }

      if token.is_cancelled() {
        return Err(Error::Cancelled);
      }

      match poll_once(stream.read(&mut self.buf[self.available..self.capacity])) {
        None => return Ok(false), // would block; don't wait synchronously here
        Some(Err(err)) => return Err(Error::Io(err)),
        Some(Ok(0)) => {
          return Ok(self.position == self.available);
        }
        Some(Ok(n)) => {
          self.available += n;
          if self.available - self.position >= last_row_size {
            return Ok(false);
          }
        }
      }
    }
  }

  pub fn position(&self) -> usize {
    self.position
  }

  pub fn advance(&mut self, n: usize) {
    debug_assert!(self.position + n <= self.available);
    self.position += n;
  }

  pub fn peek(&self, n: usize) -> &[u8] {
    &self.buf[self.position..self.position + n]
  }

  /// Like [`Self::peek`] but against an already-consumed offset, for
  /// [`crate::reader::RowBinaryReader::read_raw_bytes`], which advances
  /// past the returned view before handing it back to the caller.
  pub fn peek_at(&self, start: usize, n: usize) -> &[u8] {
    &self.buf[start..start + n]
  }

  /// Decodes a varint, growing the `ensure`d window one byte at a time
  /// since the encoded length isn't known up front.
  pub async fn read_varint<R: AsyncRead + Unpin>(
    &mut self,
    stream: &mut R,
    token: &CancellationToken,
    column: Option<&str>,
  ) -> Result<u64> {
    let mut len = 1;
    loop {
      self.ensure(stream, len, token, column).await?;
      if let Some((value, consumed)) = varint::decode(self.peek(len)) {
        self.advance(consumed);
        if value > varint::MAX_VARINT_VALUE {
          return Err(Error::invalid_argument(format!(
            "decoded varint {value} exceeds the maximum of {}",
            varint::MAX_VARINT_VALUE
          )));
        }
        return Ok(value);
      }
      len += 1;
      if len > 10 {
        return Err(Error::invalid_argument("varint did not terminate within 10 bytes"));
      }
    }
  }

  /// Returns the rented buffer to its pool (a no-op for caller-supplied
  /// buffers). Idempotent.
  pub fn dispose(&mut self) {
    if self.disposed {
      return;
    }
    self.disposed = true;
    if let Source::Pooled(pool) = &self.source {
      pool.release(std::mem::take(&mut self.buf));
    }
  }

  /// Returns the current slab to its pool and rents a fresh one of the same
  /// capacity (a no-op on the buffer itself for caller-supplied buffers),
  /// clearing all cursor state. Lets the owning reader be reused for a new
  /// session without reconstructing it (§3 Data model "Lifecycle").
  pub fn reset(&mut self) {
    if let Source::Pooled(pool) = &self.source {
      pool.release(std::mem::take(&mut self.buf));
      let mut buf = pool.rent(self.capacity);
      buf.resize(self.capacity, 0);
      self.buf = buf;
    }
    self.position = 0;
    self.available = 0;
    self.last_row_boundary = 0;
  }
}

impl Drop for ReadBuffer {
  fn drop(&mut self) {
    self.dispose();
  }
}

/// The writer side of §4.C: flush-on-overflow with the batch-size heuristic.
pub(crate) struct WriteBuffer {
  buf: BytesMut,
  capacity: usize,
  position: usize,
  last_batch_boundary: usize,
  source: Source,
  disposed: bool,
}

impl WriteBuffer {
  pub fn new(options: BufferOptions) -> Result<Self> {
    let (buf, capacity, source) = acquire(options)?;
    Ok(Self {
      buf,
      capacity,
      position: 0,
      last_batch_boundary: 0,
      source,
      disposed: false,
    })
  }

  pub fn capacity(&self) -> usize {
    self.capacity
  }

  pub fn position(&self) -> usize {
    self.position
  }

  /// Ensures `n` bytes of headroom remain before `position`, performing a
  /// blocking flush first if not. Used by every typed primitive before it
  /// encodes.
  pub async fn ensure<W: AsyncWrite + Unpin>(&mut self, stream: &mut W, n: usize, token: &CancellationToken) -> Result<()> {
    if self.capacity - self.position >= n {
      return Ok(());
    }
    if n > self.capacity {
      return Err(Error::invalid_argument(format!(
        "value of {n} bytes exceeds buffer capacity {}",
        self.capacity
      )));
    }
    self.flush_physical(stream, token).await
  }

  pub fn put(&mut self, bytes: &[u8]) {
    debug_assert!(self.position + bytes.len() <= self.capacity);
    self.buf[self.position..self.position + bytes.len()].copy_from_slice(bytes);
    self.position += bytes.len();
  }

  /// Encodes a varint (§4.B), pre-checking the 5-byte headroom that always
  /// covers a value bounded by `MAX_VARINT_VALUE` so the inner loop never
  /// has to re-check capacity.
  pub async fn write_varint<W: AsyncWrite + Unpin>(&mut self, stream: &mut W, value: u64, token: &CancellationToken) -> Result<()> {
    self.ensure(stream, 5, token).await?;
    let mut tmp = [0u8; 5];
    let n = varint::encode_into(value, &mut tmp);
    self.put(&tmp[..n]);
    Ok(())
  }

  async fn flush_physical<W: AsyncWrite + Unpin>(&mut self, stream: &mut W, token: &CancellationToken) -> Result<()> {
    with_cancellation(token, stream.write_all(&self.buf[..self.position])).await?;
    with_cancellation(token, stream.flush()).await?;
    self.position = 0;
    self.last_batch_boundary = 0;
    Ok(())
  }

  /// The caller-facing flush cadence (§4.C / §5): batches physical writes,
  /// skipping I/O when the buffer already has room for another batch the
  /// size of the last one.
  pub async fn flush<W: AsyncWrite + Unpin>(&mut self, stream: &mut W, token: &CancellationToken) -> Result<()> {
    let last_batch_size = self.position - self.last_batch_boundary;
    if self.capacity - self.position >= last_batch_size {
      self.last_batch_boundary = self.position;
      return Ok(());
    }
    self.flush_physical(stream, token).await
  }

  /// Flushes any residual bytes and releases the buffer. Idempotent.
  pub async fn dispose<W: AsyncWrite + Unpin>(&mut self, stream: &mut W, token: &CancellationToken) -> Result<()> {
    if self.disposed {
      return Ok(());
    }
    if self.position > 0 {
      self.flush_physical(stream, token).await?;
    }
    self.disposed = true;
    if let Source::Pooled(pool) = &self.source {
      pool.release(std::mem::take(&mut self.buf));
    }
    Ok(())
  }

  /// Flushes any residual bytes, returns the slab to its pool, and rents a
  /// fresh one of the same capacity, clearing all cursor state. Lets the
  /// owning writer be reused for a new session without reconstructing it
  /// (§3 Data model "Lifecycle").
  pub async fn reset<W: AsyncWrite + Unpin>(&mut self, stream: &mut W, token: &CancellationToken) -> Result<()> {
    if self.position > 0 {
      self.flush_physical(stream, token).await?;
    }
    if let Source::Pooled(pool) = &self.source {
      pool.release(std::mem::take(&mut self.buf));
      let mut buf = pool.rent(self.capacity);
      buf.resize(self.capacity, 0);
      self.buf = buf;
    }
    self.position = 0;
    self.last_batch_boundary = 0;
    Ok(())
  }
}

impl Drop for WriteBuffer {
  fn drop(&mut self) {
    if !self.disposed {
      if let Source::Pooled(pool) = &self.source {
        pool.release(std::mem::take(&mut self.buf));
      }
    }
  }
}
