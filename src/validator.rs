//! The debug-only shape validator (§4.G): tracks the expected remaining
//! column types for the row in progress and asserts each typed call
//! matches the schema.
//!
//! Entirely compiled out (behind `cfg(any(debug_assertions, feature =
//! "validate"))`) in release builds without the `validate` feature, so it
//! costs nothing there — not even the `Vec` allocation for the stack.

use crate::error::{Error, Result};
use crate::header::Column;
use crate::types::{Kind, Type};

/// What a primitive observed, for comparison against the schema.
pub(crate) enum Observed<'a> {
  /// Fixed-width scalar reads/writes: compared against the popped type's
  /// kind, with the documented substitution exceptions.
  Kind(Kind),
  /// `read_fixed_string`/`write_fixed_string`: kind must be `FixedString`
  /// and `n` must match its declared length.
  FixedString(u32),
  /// `read_datetime64`/`read_time64` (and writer equivalents): kind must
  /// be `DateTime64`/`Time64` and `p` must match its declared precision.
  PrecisionScalar(Kind, u32),
  /// `read_string`/`write_string`: matches a `String` column unconditionally,
  /// or a `FixedString(N)` column when the observed byte length equals `N`.
  VariableString(usize),
  /// `read_array_length`/`write_array_length`: kind must be `Array`; `n`
  /// copies of its element type are pushed back onto the stack.
  ArrayLength(u64),
  /// `is_null`/`write_null`: kind must be `Nullable`; if the tag indicates
  /// a present value, the inner type is pushed back onto the stack.
  NullTag(bool),
  /// `read_raw_bytes`: consumes a slot without comparing its type.
  RawBytes,
  #[allow(dead_code)]
  _Phantom(&'a ()),
}

fn kind_matches(observed: Kind, expected: Kind) -> bool {
  observed == expected
    || (observed == Kind::UInt32 && expected == Kind::Ipv4)
    || (observed == Kind::Int64 && matches!(expected, Kind::DateTime64 | Kind::Time64))
}

/// One entry in the expected-reads stack: the column path segment (for
/// diagnostics) and the type still expected there.
struct Expected {
  path: String,
  ty: Type,
}

pub(crate) struct Validator {
  columns: Vec<Column>,
  stack: Vec<Expected>,
  last_path: Option<String>,
}

impl Validator {
  pub fn new(columns: Vec<Column>) -> Self {
    Self { columns, stack: Vec::new(), last_path: None }
  }

  pub fn columns(&self) -> &[Column] {
    &self.columns
  }

  /// The column path of the slot most recently popped, for `EndOfStream`'s
  /// "column currently being decoded" detail. `None` before the first call.
  pub fn current_path(&self) -> Option<&str> {
    self.last_path.as_deref()
  }

  fn refill(&mut self) {
    for column in self.columns.iter().rev() {
      self.stack.push(Expected {
        path: column.name.clone(),
        ty: column.ty.clone(),
      });
    }
  }

  /// Pops the next expected slot, refilling from the schema at a row
  /// boundary and flattening tuples recursively.
  fn pop(&mut self) -> Result<Expected> {
    if self.stack.is_empty() {
      self.refill();
    }
    let entry = self
      .stack
      .pop()
      .ok_or_else(|| Error::contract_violation("typed call with no columns declared in schema"))?;
    if entry.ty.kind() == Kind::Tuple {
      for (i, field) in entry.ty.nested().iter().enumerate().rev() {
        self.stack.push(Expected {
          path: format!("{}.{}", entry.path, field.field_name().unwrap_or(&i.to_string())),
          ty: field.clone(),
        });
      }
      return self.pop();
    }
    self.last_path = Some(entry.path.clone());
    Ok(entry)
  }

  pub fn observe(&mut self, observed: Observed<'_>) -> Result<()> {
    let expected = self.pop()?;
    match observed {
      Observed::RawBytes => Ok(()),
      Observed::Kind(kind) => {
        if kind_matches(kind, expected.ty.kind()) {
          Ok(())
        } else {
          Err(Error::contract_violation(format!(
            "column `{}`: expected {:?}, got {:?}",
            expected.path,
            expected.ty.kind(),
            kind
          )))
        }
      }
      Observed::FixedString(n) => {
        if expected.ty.kind() != Kind::FixedString {
          return Err(Error::contract_violation(format!(
            "column `{}`: expected {:?}, got FixedString",
            expected.path,
            expected.ty.kind()
          )));
        }
        if expected.ty.precision_or_length() != Some(n) {
          return Err(Error::contract_violation(format!(
            "column `{}`: FixedString length mismatch, expected {:?}, got {}",
            expected.path,
            expected.ty.precision_or_length(),
            n
          )));
        }
        Ok(())
      }
      Observed::PrecisionScalar(kind, p) => {
        if !kind_matches(kind, expected.ty.kind()) {
          return Err(Error::contract_violation(format!(
            "column `{}`: expected {:?}, got {:?}",
            expected.path,
            expected.ty.kind(),
            kind
          )));
        }
        // The i64-in-place-of-DateTime64/Time64 exception skips the
        // precision check entirely; only a same-kind call enforces it.
        if kind == expected.ty.kind() && expected.ty.precision_or_length() != Some(p) {
          return Err(Error::contract_violation(format!(
            "column `{}`: precision mismatch, expected {:?}, got {}",
            expected.path,
            expected.ty.precision_or_length(),
            p
          )));
        }
        Ok(())
      }
      Observed::VariableString(len) => match expected.ty.kind() {
        Kind::String => Ok(()),
        Kind::FixedString if expected.ty.precision_or_length() == Some(len as u32) => Ok(()),
        _ => Err(Error::contract_violation(format!(
          "column `{}`: expected {:?}, got a {}-byte string",
          expected.path,
          expected.ty.kind(),
          len
        ))),
      },
      Observed::ArrayLength(n) => {
        if expected.ty.kind() != Kind::Array {
          return Err(Error::contract_violation(format!(
            "column `{}`: expected {:?}, got Array",
            expected.path,
            expected.ty.kind()
          )));
        }
        let element = expected.ty.nested()[0].clone();
        for i in (0..n).rev() {
          self.stack.push(Expected {
            path: format!("{}[{}]", expected.path, i),
            ty: element.clone(),
          });
        }
        Ok(())
      }
      Observed::NullTag(is_null) => {
        if expected.ty.kind() != Kind::Nullable {
          return Err(Error::contract_violation(format!(
            "column `{}`: expected {:?}, got Nullable",
            expected.path,
            expected.ty.kind()
          )));
        }
        if !is_null {
          self.stack.push(Expected {
            path: expected.path,
            ty: expected.ty.nested()[0].clone(),
          });
        }
        Ok(())
      }
      Observed::_Phantom(_) => unreachable!(),
    }
  }
}
