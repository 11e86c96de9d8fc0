//! Reader primitives (§4.D): decode fixed-width integers, floats,
//! fixed/variable strings, dates, times, UUID, IPv4/IPv6, null tag, array
//! length, and raw bytes off a buffered async stream.

use std::net::{Ipv4Addr, Ipv6Addr};

use bytes::BytesMut;
use tokio::io::AsyncRead;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::buffer::{BufferOptions, ReadBuffer};
use crate::error::{Error, Result};
use crate::header::{self, Column};
use crate::pool::BufferPool;
use crate::types::Kind;
use crate::values;

#[cfg(any(debug_assertions, feature = "validate"))]
use crate::validator::{Observed, Validator};

/// Construction-time options for [`RowBinaryReader`] (§6).
pub struct ReaderOptions {
  /// Size of the pooled buffer. Must be at least as large as the largest
  /// single row, or `is_complete`'s non-blocking refill can never catch up
  /// and every row falls through to the blocking path.
  pub buffer_size: usize,
  pub buffer_pool: BufferPool,
  /// A caller-provided buffer; when present, takes precedence and is not
  /// pooled.
  pub buffer: Option<BytesMut>,
  /// Propagated into every asynchronous suspension point (header read,
  /// `is_complete`, blocking refill).
  pub cancellation_token: CancellationToken,
}

impl Default for ReaderOptions {
  fn default() -> Self {
    let defaults = BufferOptions::default();
    Self {
      buffer_size: defaults.buffer_size,
      buffer_pool: defaults.buffer_pool,
      buffer: defaults.buffer,
      cancellation_token: CancellationToken::new(),
    }
  }
}

/// A streaming decoder over `RowBinary` or `RowBinaryWithNamesAndTypes`
/// (§6). Single-threaded, forward-only, no seeking: see §5.
pub struct RowBinaryReader<R> {
  stream: R,
  buf: ReadBuffer,
  token: CancellationToken,
  columns: Vec<Column>,
  #[cfg(any(debug_assertions, feature = "validate"))]
  validator: Option<Validator>,
}

impl<R: AsyncRead + Unpin> RowBinaryReader<R> {
  pub fn new(stream: R, options: ReaderOptions) -> Result<Self> {
    let buf = ReadBuffer::new(BufferOptions {
      buffer_size: options.buffer_size,
      buffer_pool: options.buffer_pool,
      buffer: options.buffer,
    })?;
    Ok(Self {
      stream,
      buf,
      token: options.cancellation_token,
      columns: Vec::new(),
      #[cfg(any(debug_assertions, feature = "validate"))]
      validator: None,
    })
  }

  /// Reads the `RowBinaryWithNamesAndTypes` header (§4.F). Must be called
  /// exactly once, before any row is decoded, and only for that variant;
  /// bare `RowBinary` streams skip this call entirely.
  pub async fn read_columns(&mut self) -> Result<&[Column]> {
    // A single speculative, non-blocking top-up (step 1 of §4.F) costs
    // nothing when the header is already fully buffered, which it almost
    // always is for any reasonable buffer size.
    let _ = self.buf.is_complete(&mut self.stream, &self.token).await;
    let columns = header::read_columns(&mut self.buf, &mut self.stream, &self.token).await?;
    self.columns = columns.clone();
    #[cfg(any(debug_assertions, feature = "validate"))]
    {
      self.validator = Some(Validator::new(columns));
    }
    Ok(&self.columns)
  }

  pub fn columns(&self) -> &[Column] {
    &self.columns
  }

  /// Returns the buffer to its pool, rents a fresh one, and clears the
  /// schema/validator state, so the reader can decode a new
  /// `RowBinary`/`RowBinaryWithNamesAndTypes` session on the same stream
  /// without being reconstructed (§3 Data model "Lifecycle").
  pub fn reset(&mut self) {
    self.buf.reset();
    self.columns.clear();
    #[cfg(any(debug_assertions, feature = "validate"))]
    {
      self.validator = None;
    }
  }

  /// The non-blocking, adaptively-sized refill probe (§4.C) a caller polls
  /// between rows. Returns `true` once the stream is exhausted.
  pub async fn is_complete(&mut self) -> Result<bool> {
    self.buf.is_complete(&mut self.stream, &self.token).await
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

  /// Owned rather than borrowed: every call site needs it alongside a
  /// mutable borrow of `self.stream`, which an `&self` method can't
  /// coexist with through a plain field-borrow split.
  fn current_column(&self) -> Option<String> {
    #[cfg(any(debug_assertions, feature = "validate"))]
    {
      self.validator.as_ref().and_then(Validator::current_path).map(ToString::to_string)
    }
    #[cfg(not(any(debug_assertions, feature = "validate")))]
    {
      None
    }
  }

  async fn ensure(&mut self, n: usize) -> Result<()> {
    let column = self.current_column();
    self.buf.ensure(&mut self.stream, n, &self.token, column.as_deref()).await
  }

  async fn read_fixed<const N: usize>(&mut self) -> Result<[u8; N]> {
    self.ensure(N).await?;
    let mut out = [0u8; N];
    out.copy_from_slice(self.buf.peek(N));
    self.buf.advance(N);
    Ok(out)
  }

  pub async fn read_u8(&mut self) -> Result<u8> {
    self.observe(observed(Kind::UInt8))?;
    Ok(self.read_fixed::<1>().await?[0])
  }

  pub async fn read_i8(&mut self) -> Result<i8> {
    self.observe(observed(Kind::Int8))?;
    Ok(self.read_fixed::<1>().await?[0] as i8)
  }

  pub async fn read_u16(&mut self) -> Result<u16> {
    self.observe(observed(Kind::UInt16))?;
    Ok(u16::from_le_bytes(self.read_fixed().await?))
  }

  pub async fn read_i16(&mut self) -> Result<i16> {
    self.observe(observed(Kind::Int16))?;
    Ok(i16::from_le_bytes(self.read_fixed().await?))
  }

  pub async fn read_u32(&mut self) -> Result<u32> {
    self.observe(observed(Kind::UInt32))?;
    Ok(u32::from_le_bytes(self.read_fixed().await?))
  }

  pub async fn read_i32(&mut self) -> Result<i32> {
    self.observe(observed(Kind::Int32))?;
    Ok(i32::from_le_bytes(self.read_fixed().await?))
  }

  pub async fn read_u64(&mut self) -> Result<u64> {
    self.observe(observed(Kind::UInt64))?;
    Ok(u64::from_le_bytes(self.read_fixed().await?))
  }

  pub async fn read_i64(&mut self) -> Result<i64> {
    self.observe(observed(Kind::Int64))?;
    Ok(i64::from_le_bytes(self.read_fixed().await?))
  }

  pub async fn read_f32(&mut self) -> Result<f32> {
    self.observe(observed(Kind::Float32))?;
    Ok(f32::from_le_bytes(self.read_fixed().await?))
  }

  pub async fn read_f64(&mut self) -> Result<f64> {
    self.observe(observed(Kind::Float64))?;
    Ok(f64::from_le_bytes(self.read_fixed().await?))
  }

  /// Reinterprets the wire byte strictly: any value other than `0`/`1` is a
  /// contract violation rather than silently coerced to `true` (§9 design
  /// note: the strict interpretation is the one this spec prescribes).
  pub async fn read_bool(&mut self) -> Result<bool> {
    self.observe(observed(Kind::Bool))?;
    let byte = self.read_fixed::<1>().await?[0];
    match byte {
      0 => Ok(false),
      1 => Ok(true),
      other => Err(Error::contract_violation(format!("Bool byte must be 0 or 1, got {other}"))),
    }
  }

  async fn read_len_prefixed_bytes(&mut self) -> Result<Vec<u8>> {
    let column = self.current_column();
    let len = self.buf.read_varint(&mut self.stream, &self.token, column.as_deref()).await?;
    let len = len as usize;
    self.ensure(len).await?;
    let bytes = self.buf.peek(len).to_vec();
    self.buf.advance(len);
    Ok(bytes)
  }

  /// Decodes as UTF-8 (the default encoding, §4.D).
  pub async fn read_string(&mut self) -> Result<String> {
    let bytes = self.read_len_prefixed_bytes().await?;
    self.observe_variable_string(bytes.len())?;
    String::from_utf8(bytes).map_err(|e| Error::invalid_argument(format!("String column is not valid UTF-8: {e}")))
  }

  /// Decodes with a caller-specified decoder instead of the UTF-8 default
  /// (§4.D "or caller-specified encoding").
  pub async fn read_string_with<D>(&mut self, decode: D) -> Result<String>
  where
    D: FnOnce(&[u8]) -> Result<String>,
  {
    let bytes = self.read_len_prefixed_bytes().await?;
    self.observe_variable_string(bytes.len())?;
    decode(&bytes)
  }

  #[cfg(any(debug_assertions, feature = "validate"))]
  fn observe_variable_string(&mut self, len: usize) -> Result<()> {
    self.observe(Observed::VariableString(len))
  }

  #[cfg(not(any(debug_assertions, feature = "validate")))]
  fn observe_variable_string(&mut self, _len: usize) -> Result<()> {
    Ok(())
  }

  /// Decodes as ASCII (the default, §4.D): each byte maps 1:1 to a Unicode
  /// scalar value in the Latin-1 range, which is always a valid `char`.
  pub async fn read_fixed_string(&mut self, n: usize) -> Result<String> {
    self.observe(observed_fixed_string(n as u32))?;
    self.ensure(n).await?;
    let s = self.buf.peek(n).iter().map(|&b| b as char).collect();
    self.buf.advance(n);
    Ok(s)
  }

  /// Days since `1970-01-01`, unsigned.
  pub async fn read_date(&mut self) -> Result<u16> {
    self.observe(observed(Kind::Date))?;
    Ok(u16::from_le_bytes(self.read_fixed().await?))
  }

  /// Days since `1970-01-01`, signed (negative dates allowed).
  pub async fn read_date32(&mut self) -> Result<i32> {
    self.observe(observed(Kind::Date32))?;
    Ok(i32::from_le_bytes(self.read_fixed().await?))
  }

  /// Seconds since the epoch, UTC.
  pub async fn read_datetime(&mut self) -> Result<u32> {
    self.observe(observed(Kind::DateTime))?;
    Ok(u32::from_le_bytes(self.read_fixed().await?))
  }

  /// Ticks at precision `p` since the epoch (§4.D precision table).
  pub async fn read_datetime64(&mut self, p: u32) -> Result<i64> {
    self.observe(observed_precision(Kind::DateTime64, p))?;
    let raw = i64::from_le_bytes(self.read_fixed().await?);
    values::ticks_to_100ns(raw, p)?;
    Ok(raw)
  }

  /// Seconds, may be negative; range documented as `±999:59:59`.
  pub async fn read_time(&mut self) -> Result<i32> {
    self.observe(observed(Kind::Time))?;
    Ok(i32::from_le_bytes(self.read_fixed().await?))
  }

  /// Ticks at precision `p`.
  pub async fn read_time64(&mut self, p: u32) -> Result<i64> {
    self.observe(observed_precision(Kind::Time64, p))?;
    let raw = i64::from_le_bytes(self.read_fixed().await?);
    values::ticks_to_100ns(raw, p)?;
    Ok(raw)
  }

  pub async fn read_uuid(&mut self) -> Result<Uuid> {
    self.observe(observed(Kind::Uuid))?;
    Ok(values::uuid_from_wire(self.read_fixed().await?))
  }

  /// Wire order is little-endian; reversed relative to dotted-quad order.
  pub async fn read_ipv4(&mut self) -> Result<Ipv4Addr> {
    self.observe(observed(Kind::Ipv4))?;
    let wire = u32::from_le_bytes(self.read_fixed().await?);
    Ok(Ipv4Addr::from(values::ipv4_from_wire(wire)))
  }

  pub async fn read_ipv6(&mut self) -> Result<Ipv6Addr> {
    self.observe(observed(Kind::Ipv6))?;
    let octets: [u8; 16] = self.read_fixed().await?;
    Ok(Ipv6Addr::from(octets))
  }

  /// The length of the immediately following sequence (§4.D).
  pub async fn read_array_length(&mut self) -> Result<u64> {
    let column = self.current_column();
    let n = self.buf.read_varint(&mut self.stream, &self.token, column.as_deref()).await?;
    self.observe_array_length(n)?;
    Ok(n)
  }

  #[cfg(any(debug_assertions, feature = "validate"))]
  fn observe_array_length(&mut self, n: u64) -> Result<()> {
    self.observe(Observed::ArrayLength(n))
  }

  #[cfg(not(any(debug_assertions, feature = "validate")))]
  fn observe_array_length(&mut self, _n: u64) -> Result<()> {
    Ok(())
  }

  /// `true` if the following value is absent.
  pub async fn is_null(&mut self) -> Result<bool> {
    let byte = self.read_fixed::<1>().await?[0];
    let is_null = match byte {
      0 => false,
      1 => true,
      other => return Err(Error::contract_violation(format!("Nullable tag must be 0 or 1, got {other}"))),
    };
    self.observe_null_tag(is_null)?;
    Ok(is_null)
  }

  #[cfg(any(debug_assertions, feature = "validate"))]
  fn observe_null_tag(&mut self, is_null: bool) -> Result<()> {
    self.observe(Observed::NullTag(is_null))
  }

  #[cfg(not(any(debug_assertions, feature = "validate")))]
  fn observe_null_tag(&mut self, _is_null: bool) -> Result<()> {
    Ok(())
  }

  /// Returns a borrowed view into the buffer, valid until the next
  /// primitive call. Suppresses shape validation for this slot (§4.D).
  pub async fn read_raw_bytes(&mut self, n: usize) -> Result<&[u8]> {
    self.observe_raw_bytes()?;
    self.ensure(n).await?;
    let start = self.buf.position();
    self.buf.advance(n);
    Ok(self.buf.peek_at(start, n))
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

#[cfg(test)]
mod tests {
  use super::*;

  #[tokio::test]
  async fn reads_varint_string() {
    // S3: 06 74 65 73 74 5f 61 -> "test_a"
    let wire = [0x06, 0x74, 0x65, 0x73, 0x74, 0x5f, 0x61];
    let mut reader = RowBinaryReader::new(&wire[..], ReaderOptions::default()).unwrap();
    assert_eq!(reader.read_string().await.unwrap(), "test_a");
  }

  #[tokio::test]
  async fn rejects_non_boolean_byte() {
    let wire = [0x02u8];
    let mut reader = RowBinaryReader::new(&wire[..], ReaderOptions::default()).unwrap();
    assert!(reader.read_bool().await.is_err());
  }

  #[tokio::test]
  async fn reports_end_of_stream_with_byte_counts() {
    let wire = [0x01u8];
    let mut reader = RowBinaryReader::new(&wire[..], ReaderOptions::default()).unwrap();
    match reader.read_u64().await {
      Err(Error::EndOfStream { needed, obtained, .. }) => {
        assert_eq!(needed, 8);
        assert_eq!(obtained, 1);
      }
      other => panic!("expected EndOfStream, got {other:?}"),
    }
  }

  #[tokio::test]
  async fn ipv4_reverses_octets_s5() {
    let wire = [0xF2u8, 0x22, 0x6A, 0x74];
    let mut reader = RowBinaryReader::new(&wire[..], ReaderOptions::default()).unwrap();
    assert_eq!(reader.read_ipv4().await.unwrap(), Ipv4Addr::new(116, 106, 34, 242));
  }

  #[tokio::test]
  async fn nullable_tag_s6() {
    let wire = [0x01u8];
    let mut reader = RowBinaryReader::new(&wire[..], ReaderOptions::default()).unwrap();
    assert!(reader.is_null().await.unwrap());

    let wire = [0x00u8, 0x7F];
    let mut reader = RowBinaryReader::new(&wire[..], ReaderOptions::default()).unwrap();
    assert!(!reader.is_null().await.unwrap());
    assert_eq!(reader.read_i8().await.unwrap(), 127);
  }

  #[tokio::test]
  async fn reset_clears_schema_and_is_reusable() {
    let mut header = Vec::new();
    crate::varint::encode(1, &mut header);
    crate::varint::encode(1, &mut header);
    header.extend_from_slice(b"n");
    crate::varint::encode(6, &mut header);
    header.extend_from_slice(b"UInt64");
    header.push(7); // payload: a single UInt64 row, value 7

    let mut reader = RowBinaryReader::new(header.as_slice(), ReaderOptions::default()).unwrap();
    reader.read_columns().await.unwrap();
    assert_eq!(reader.columns().len(), 1);

    reader.reset();
    assert!(reader.columns().is_empty());

    // The reset buffer still works for plain, schema-less reads.
    let wire = [0x2Au8];
    let mut reader = RowBinaryReader::new(&wire[..], ReaderOptions::default()).unwrap();
    reader.reset();
    assert_eq!(reader.read_u8().await.unwrap(), 0x2A);
  }

  #[tokio::test]
  async fn read_datetime64_rejects_precision_outside_0_9() {
    let wire = [0u8; 8];
    let mut reader = RowBinaryReader::new(&wire[..], ReaderOptions::default()).unwrap();
    match reader.read_datetime64(10).await {
      Err(Error::UnsupportedPrecision { precision: 10 }) => {}
      other => panic!("expected UnsupportedPrecision, got {other:?}"),
    }
  }

  #[tokio::test]
  async fn read_time64_rejects_precision_outside_0_9() {
    let wire = [0u8; 8];
    let mut reader = RowBinaryReader::new(&wire[..], ReaderOptions::default()).unwrap();
    match reader.read_time64(10).await {
      Err(Error::UnsupportedPrecision { precision: 10 }) => {}
      other => panic!("expected UnsupportedPrecision, got {other:?}"),
    }
  }
}
