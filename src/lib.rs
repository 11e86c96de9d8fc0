//! A high-throughput, forward-only binary codec for the RowBinary family of
//! wire formats used by ClickHouse.
//!
//! [`reader::RowBinaryReader`] decodes rows from an `AsyncRead`; the
//! symmetric [`writer::RowBinaryWriter`] encodes rows into an `AsyncWrite`.
//! Both drive a fixed-size, pooled buffer rather than issuing a syscall per
//! value; see [`buffer`] for the refill/flush discipline that makes that
//! work.
//!
//! This crate does not open connections, authenticate, compress, or map
//! rows to structs: callers issue typed primitive calls in column order and
//! own the underlying stream themselves.

mod buffer;
mod error;
mod header;
mod pool;
mod reader;
mod types;
#[cfg(any(debug_assertions, feature = "validate"))]
mod validator;
mod values;
mod varint;
mod writer;

pub use error::{Error, Result};
pub use header::Column;
pub use pool::BufferPool;
pub use reader::{ReaderOptions, RowBinaryReader};
pub use types::{Kind, Type, parse_type};
pub use writer::{RowBinaryWriter, WriterOptions};
