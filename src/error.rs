use thiserror::Error;

/// Errors surfaced by readers, writers, and the type grammar parser.
#[derive(Debug, Error)]
pub enum Error {
  /// A type string did not match the grammar in [`crate::types`], or the
  /// input had trailing characters after a complete type was parsed.
  #[error("failed to parse type string: {message}")]
  TypeParse { message: String },

  /// The underlying stream ended before a value could be fully decoded.
  #[error("unexpected end of stream: needed {needed} byte(s), got {obtained}{}", column.as_deref().map(|c| format!(" while decoding column `{c}`")).unwrap_or_default())]
  EndOfStream {
    needed: usize,
    obtained: usize,
    column: Option<String>,
  },

  /// `DateTime64`/`Time64` precision outside the supported 0..=9 range.
  #[error("unsupported precision {precision}, expected 0..=9")]
  UnsupportedPrecision { precision: u32 },

  /// A construction-time or call-time argument was invalid (non-readable
  /// stream, zero-sized pooled buffer, address family mismatch, ...).
  #[error("invalid argument: {message}")]
  InvalidArgument { message: String },

  /// Debug-only: a typed read/write call did not match the expected shape
  /// from the schema, or a date/time value fell outside its wire range.
  #[error("contract violation: {message}")]
  ContractViolation { message: String },

  /// The caller's cancellation token fired before an asynchronous
  /// operation completed.
  #[error("operation cancelled")]
  Cancelled,

  /// Propagated unchanged from the underlying stream.
  #[error(transparent)]
  Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
  pub(crate) fn end_of_stream(needed: usize, obtained: usize, column: Option<&str>) -> Self {
    tracing::debug!(needed, obtained, column = ?column, "stream ended mid-value");
    Error::EndOfStream {
      needed,
      obtained,
      column: column.map(ToString::to_string),
    }
  }

  pub(crate) fn contract_violation(message: impl Into<String>) -> Self {
    let message = message.into();
    tracing::trace!(%message, "shape validator rejected a typed call");
    Error::ContractViolation { message }
  }

  pub(crate) fn invalid_argument(message: impl Into<String>) -> Self {
    Error::InvalidArgument { message: message.into() }
  }

  pub(crate) fn type_parse(message: impl Into<String>) -> Self {
    Error::TypeParse { message: message.into() }
  }
}
