//! The column header reader (§4.F): parses the schema prelude of the
//! `RowBinaryWithNamesAndTypes` variant ahead of any row decoding.

use tokio::io::AsyncRead;
use tokio_util::sync::CancellationToken;

use crate::buffer::ReadBuffer;
use crate::error::{Error, Result};
use crate::types::{self, Type};

/// A diagnostic sanity bound on the column count (§4.F step 2); not a hard
/// protocol limit, just a guard against reading garbage as a header.
const MAX_COLUMNS: u64 = 1000;

/// A single column of a `RowBinaryWithNamesAndTypes` schema: a name paired
/// with its parsed type. Order matches the order of typed reads per row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Column {
  pub name: String,
  pub ty: Type,
}

async fn read_len_prefixed_string<R: AsyncRead + Unpin>(
  buf: &mut ReadBuffer,
  stream: &mut R,
  token: &CancellationToken,
) -> Result<String> {
  let len = buf.read_varint(stream, token, None).await?;
  let len = len as usize;
  buf.ensure(stream, len, token, None).await?;
  let bytes = buf.peek(len).to_vec();
  buf.advance(len);
  String::from_utf8(bytes).map_err(|e| Error::invalid_argument(format!("column header is not valid UTF-8: {e}")))
}

/// Reads the `RowBinaryWithNamesAndTypes` header (§4.F): a varint column
/// count, that many varint-length UTF-8 names, then that many varint-length
/// type strings parsed via [`crate::types::parse_type`].
pub(crate) async fn read_columns<R: AsyncRead + Unpin>(
  buf: &mut ReadBuffer,
  stream: &mut R,
  token: &CancellationToken,
) -> Result<Vec<Column>> {
  let count = buf.read_varint(stream, token, None).await?;
  if cfg!(any(debug_assertions, feature = "validate")) && !(1..=MAX_COLUMNS).contains(&count) {
    return Err(Error::contract_violation(format!(
      "column count {count} outside the sane 1..={MAX_COLUMNS} range"
    )));
  }

  let mut names = Vec::with_capacity(count as usize);
  for _ in 0..count {
    names.push(read_len_prefixed_string(buf, stream, token).await?);
  }

  let mut columns = Vec::with_capacity(count as usize);
  for name in names {
    let type_str = read_len_prefixed_string(buf, stream, token).await?;
    let ty = types::parse_type(&type_str)?;
    columns.push(Column { name, ty });
  }
  Ok(columns)
}
