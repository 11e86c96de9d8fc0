//! Writer primitives (§4.E): symmetric encoders for the value set decoded
//! by [`crate::reader::RowBinaryReader`].

use std::net::{Ipv4Addr, Ipv6Addr};

use bytes::BytesMut;
use tokio::io::AsyncWrite;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::buffer::{BufferOptions, WriteBuffer};
use crate::error::{Error, Result};
use crate::header::Column;
use crate::pool::BufferPool;
use crate::types::Kind;
use crate::values;

#[cfg(any(debug_assertions, feature = "validate"))]
use crate::validator::{Observed, Validator};

/// Construction-time options for [`RowBinaryWriter`] (§6).
pub struct WriterOptions {
  pub buffer_size: usize,
  pub buffer_pool: BufferPool,
  pub buffer: Option<BytesMut>,
  pub cancellation_token: CancellationToken,
  /// Enables the shape validator (§4.G) against this schema. The writer
  /// never reads or emits a header itself (§6 "Output format... bare
  /// `RowBinary` only"); a schema here is purely a local consistency check
  /// on the caller's own write sequence.
  pub schema: Option<Vec<Column>>,
}

impl Default for WriterOptions {
  fn default() -> Self {
    let defaults = BufferOptions::default();
    Self {
      buffer_size: defaults.buffer_size,
      buffer_pool: defaults.buffer_pool,
      buffer: defaults.buffer,
      cancellation_token: CancellationToken::new(),
      schema: None,
    }
  }
}

/// A streaming encoder producing bare `RowBinary` (§6). Single-threaded,
/// forward-only: see §5.
pub struct RowBinaryWriter<W> {
  stream: W,
  buf: WriteBuffer,
  token: CancellationToken,
  #[cfg(any(debug_assertions, feature = "validate"))]
  validator: Option<Validator>,
}

impl<W: AsyncWrite + Unpin> RowBinaryWriter<W> {
  pub fn new(stream: W, options: WriterOptions) -> Result<Self> {
    let buf = WriteBuffer::new(BufferOptions {
      buffer_size: options.buffer_size,
      buffer_pool: options.buffer_pool,
      buffer: options.buffer,
    })?;
    #[cfg(any(debug_assertions, feature = "validate"))]
    let validator = options.schema.map(Validator::new);
    Ok(Self {
      stream,
      buf,
      token: options.cancellation_token,
      #[cfg(any(debug_assertions, feature = "validate"))]
      validator,
    })
  }

  /// The caller-facing flush cadence (§4.C/§5): batches physical writes,
  /// skipping I/O while the buffer already has room for another batch the
  /// size of the last one.
  pub async fn flush(&mut self) -> Result<()> {
    self.buf.flush(&mut self.stream, &self.token).await
  }

  /// Flushes any residual bytes and releases the buffer. Idempotent;
  /// a writer dropped without calling this loses its tail bytes silently,
  /// matching the pool's "release exactly once" discipline in §5.
  pub async fn dispose(&mut self) -> Result<()> {
    self.buf.dispose(&mut self.stream, &self.token).await
  }

  /// Flushes any residual bytes, returns the buffer to its pool, rents a
  /// fresh one, and clears the validator's in-progress stack (preserving
  /// its configured schema, if any), so the writer can encode a new
  /// session on the same stream without being reconstructed (§3 Data model
  /// "Lifecycle").
  pub async fn reset(&mut self) -> Result<()> {
    self.buf.reset(&mut self.stream, &self.token).await?;
    #[cfg(any(debug_assertions, feature = "validate"))]
    {
      self.validator = self.validator.as_ref().map(|v| Validator::new(v.columns().to_vec()));
    }
    Ok(())
  }

  #[cfg(any(debug_assertions, feature = "validate"))]
  fn observe(&mut self, observed: Observed<'_>) -> Result<()> {
    match &mut self.validator {
      Some(v) => v.observe(observed),
      None => Ok(()),
    }
  }

  #[cfg(not(any(debug_assertions, feature = "validate")))]
  fn observe(&mut self, _observed: ()) -> Result<()> {
    Ok(())
  }

  async fn ensure(&mut self, n: usize) -> Result<()> {
    self.buf.ensure(&mut self.stream, n, &self.token).await
  }

  async fn write_fixed(&mut self, bytes: &[u8]) -> Result<()> {
    self.ensure(bytes.len()).await?;
    self.buf.put(bytes);
    Ok(())
  }

  pub async fn write_u8(&mut self, v: u8) -> Result<()> {
    self.observe(observed(Kind::UInt8))?;
    self.write_fixed(&[v]).await
  }

  pub async fn write_i8(&mut self, v: i8) -> Result<()> {
    self.observe(observed(Kind::Int8))?;
    self.write_fixed(&[v as u8]).await
  }

  pub async fn write_u16(&mut self, v: u16) -> Result<()> {
    self.observe(observed(Kind::UInt16))?;
    self.write_fixed(&v.to_le_bytes()).await
  }

  pub async fn write_i16(&mut self, v: i16) -> Result<()> {
    self.observe(observed(Kind::Int16))?;
    self.write_fixed(&v.to_le_bytes()).await
  }

  pub async fn write_u32(&mut self, v: u32) -> Result<()> {
    self.observe(observed(Kind::UInt32))?;
    self.write_fixed(&v.to_le_bytes()).await
  }

  pub async fn write_i32(&mut self, v: i32) -> Result<()> {
    self.observe(observed(Kind::Int32))?;
    self.write_fixed(&v.to_le_bytes()).await
  }

  pub async fn write_u64(&mut self, v: u64) -> Result<()> {
    self.observe(observed(Kind::UInt64))?;
    self.write_fixed(&v.to_le_bytes()).await
  }

  pub async fn write_i64(&mut self, v: i64) -> Result<()> {
    self.observe(observed(Kind::Int64))?;
    self.write_fixed(&v.to_le_bytes()).await
  }

  pub async fn write_f32(&mut self, v: f32) -> Result<()> {
    self.observe(observed(Kind::Float32))?;
    self.write_fixed(&v.to_le_bytes()).await
  }

  pub async fn write_f64(&mut self, v: f64) -> Result<()> {
    self.observe(observed(Kind::Float64))?;
    self.write_fixed(&v.to_le_bytes()).await
  }

  pub async fn write_bool(&mut self, v: bool) -> Result<()> {
    self.observe(observed(Kind::Bool))?;
    self.write_fixed(&[v as u8]).await
  }

  async fn write_len_prefixed_bytes(&mut self, bytes: &[u8]) -> Result<()> {
    self.buf.write_varint(&mut self.stream, bytes.len() as u64, &self.token).await?;
    self.write_fixed(bytes).await
  }

  /// Encodes as UTF-8 (the default encoding, §4.E).
  pub async fn write_string(&mut self, v: &str) -> Result<()> {
    self.observe_variable_string(v.len())?;
    self.write_len_prefixed_bytes(v.as_bytes()).await
  }

  /// Encodes pre-serialized bytes under the variable-length string framing,
  /// for a caller-specified encoding instead of the UTF-8 default.
  pub async fn write_string_bytes(&mut self, bytes: &[u8]) -> Result<()> {
    self.observe_variable_string(bytes.len())?;
    self.write_len_prefixed_bytes(bytes).await
  }

  #[cfg(any(debug_assertions, feature = "validate"))]
  fn observe_variable_string(&mut self, len: usize) -> Result<()> {
    self.observe(Observed::VariableString(len))
  }

  #[cfg(not(any(debug_assertions, feature = "validate")))]
  fn observe_variable_string(&mut self, _len: usize) -> Result<()> {
    Ok(())
  }

  /// Encodes as ASCII (the default, §4.E). `v` must be exactly `n` bytes
  /// once ASCII-encoded; a contract violation otherwise, checked whenever
  /// the shape validator is compiled in (§7).
  pub async fn write_fixed_string(&mut self, v: &str, n: usize) -> Result<()> {
    self.observe(observed_fixed_string(n as u32))?;
    if cfg!(any(debug_assertions, feature = "validate")) && v.len() != n {
      return Err(Error::contract_violation(format!(
        "FixedString({n}) write given a {}-byte value",
        v.len()
      )));
    }
    self.write_fixed(v.as_bytes()).await
  }

  pub async fn write_date(&mut self, days: u16) -> Result<()> {
    self.observe(observed(Kind::Date))?;
    if cfg!(any(debug_assertions, feature = "validate")) && !(values::DATE_MIN_DAYS..=values::DATE_MAX_DAYS).contains(&days) {
      return Err(Error::contract_violation(format!("Date {days} outside 1970-01-01..2149-06-06")));
    }
    self.write_fixed(&days.to_le_bytes()).await
  }

  pub async fn write_date32(&mut self, days: i32) -> Result<()> {
    self.observe(observed(Kind::Date32))?;
    if cfg!(any(debug_assertions, feature = "validate")) && !(values::DATE32_MIN_DAYS..=values::DATE32_MAX_DAYS).contains(&days) {
      return Err(Error::contract_violation(format!("Date32 {days} outside 1900-01-01..2299-12-31")));
    }
    self.write_fixed(&days.to_le_bytes()).await
  }

  pub async fn write_datetime(&mut self, seconds: u32) -> Result<()> {
    self.observe(observed(Kind::DateTime))?;
    if cfg!(any(debug_assertions, feature = "validate"))
      && !(values::DATETIME_MIN_SECONDS..=values::DATETIME_MAX_SECONDS).contains(&seconds)
    {
      return Err(Error::contract_violation(format!(
        "DateTime {seconds} outside epoch..2106-02-07 06:28:15"
      )));
    }
    self.write_fixed(&seconds.to_le_bytes()).await
  }

  pub async fn write_datetime64(&mut self, ticks: i64, p: u32) -> Result<()> {
    self.observe(observed_precision(Kind::DateTime64, p))?;
    let as_100ns = values::ticks_to_100ns(ticks, p)?;
    if cfg!(any(debug_assertions, feature = "validate"))
      && !(values::DATETIME64_MIN_100NS..=values::DATETIME64_MAX_100NS).contains(&as_100ns)
    {
      return Err(Error::contract_violation(format!(
        "DateTime64({p}) {ticks} outside 1900-01-01..2299-12-31 23:59:59.999"
      )));
    }
    self.write_fixed(&ticks.to_le_bytes()).await
  }

  pub async fn write_time(&mut self, seconds: i32) -> Result<()> {
    self.observe(observed(Kind::Time))?;
    if cfg!(any(debug_assertions, feature = "validate")) && !(values::TIME_MIN_SECONDS..=values::TIME_MAX_SECONDS).contains(&seconds) {
      return Err(Error::contract_violation(format!("Time {seconds} outside +/-999:59:59")));
    }
    self.write_fixed(&seconds.to_le_bytes()).await
  }

  pub async fn write_time64(&mut self, ticks: i64, p: u32) -> Result<()> {
    self.observe(observed_precision(Kind::Time64, p))?;
    let as_100ns = values::ticks_to_100ns(ticks, p)?;
    if cfg!(any(debug_assertions, feature = "validate")) && !(values::TIME64_MIN_100NS..=values::TIME64_MAX_100NS).contains(&as_100ns) {
      return Err(Error::contract_violation(format!("Time64({p}) {ticks} outside +/-999:59:59")));
    }
    self.write_fixed(&ticks.to_le_bytes()).await
  }

  pub async fn write_uuid(&mut self, v: Uuid) -> Result<()> {
    self.observe(observed(Kind::Uuid))?;
    self.write_fixed(&values::uuid_to_wire(v)).await
  }

  /// `v`'s octets are reversed on the wire relative to dotted-quad order.
  pub async fn write_ipv4(&mut self, v: Ipv4Addr) -> Result<()> {
    self.observe(observed(Kind::Ipv4))?;
    let wire = values::ipv4_to_wire(v.octets());
    self.write_fixed(&wire.to_le_bytes()).await
  }

  pub async fn write_ipv6(&mut self, v: Ipv6Addr) -> Result<()> {
    self.observe(observed(Kind::Ipv6))?;
    self.write_fixed(&v.octets()).await
  }

  /// Must be followed by exactly `n` element encodings (§4.E).
  pub async fn write_array_length(&mut self, n: u64) -> Result<()> {
    self.observe_array_length(n)?;
    self.buf.write_varint(&mut self.stream, n, &self.token).await
  }

  #[cfg(any(debug_assertions, feature = "validate"))]
  fn observe_array_length(&mut self, n: u64) -> Result<()> {
    self.observe(Observed::ArrayLength(n))
  }

  #[cfg(not(any(debug_assertions, feature = "validate")))]
  fn observe_array_length(&mut self, _n: u64) -> Result<()> {
    Ok(())
  }

  /// `write_null(true)` emits `0x01` with no following payload;
  /// `write_null(false)` emits `0x00` and obliges the caller to write the
  /// payload next (§4.E).
  pub async fn write_null(&mut self, is_null: bool) -> Result<()> {
    self.observe_null_tag(is_null)?;
    self.write_fixed(&[is_null as u8]).await
  }

  #[cfg(any(debug_assertions, feature = "validate"))]
  fn observe_null_tag(&mut self, is_null: bool) -> Result<()> {
    self.observe(Observed::NullTag(is_null))
  }

  #[cfg(not(any(debug_assertions, feature = "validate")))]
  fn observe_null_tag(&mut self, _is_null: bool) -> Result<()> {
    Ok(())
  }

  /// Writes pre-encoded bytes directly, bypassing shape validation for this
  /// slot (mirrors [`crate::reader::RowBinaryReader::read_raw_bytes`]).
  pub async fn write_raw_bytes(&mut self, bytes: &[u8]) -> Result<()> {
    self.observe_raw_bytes()?;
    self.write_fixed(bytes).await
  }

  #[cfg(any(debug_assertions, feature = "validate"))]
  fn observe_raw_bytes(&mut self) -> Result<()> {
    self.observe(Observed::RawBytes)
  }

  #[cfg(not(any(debug_assertions, feature = "validate")))]
  fn observe_raw_bytes(&mut self) -> Result<()> {
    Ok(())
  }
}

#[cfg(any(debug_assertions, feature = "validate"))]
fn observed(kind: Kind) -> Observed<'static> {
  Observed::Kind(kind)
}

#[cfg(not(any(debug_assertions, feature = "validate")))]
fn observed(_kind: Kind) {}

#[cfg(any(debug_assertions, feature = "validate"))]
fn observed_fixed_string(n: u32) -> Observed<'static> {
  Observed::FixedString(n)
}

#[cfg(not(any(debug_assertions, feature = "validate")))]
fn observed_fixed_string(_n: u32) {}

#[cfg(any(debug_assertions, feature = "validate"))]
fn observed_precision(kind: Kind, p: u32) -> Observed<'static> {
  Observed::PrecisionScalar(kind, p)
}

#[cfg(not(any(debug_assertions, feature = "validate")))]
fn observed_precision(_kind: Kind, _p: u32) {}
