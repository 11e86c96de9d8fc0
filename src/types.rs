//! Parser and in-memory representation for the database's textual type
//! grammar (e.g. `Array(Tuple(a Nullable(String), b UInt64))`).

use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::rc::{Rc, Weak};

use crate::error::{Error, Result};

/// The 25 wire-visible type kinds this codec understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Kind {
  UInt8,
  Int8,
  UInt16,
  Int16,
  UInt32,
  Int32,
  UInt64,
  Int64,
  Float32,
  Float64,
  Bool,
  String,
  FixedString,
  Date,
  Date32,
  DateTime,
  DateTime64,
  Time,
  Time64,
  Uuid,
  Ipv4,
  Ipv6,
  Array,
  Nullable,
  Tuple,
}

impl Kind {
  fn name(self) -> &'static str {
    match self {
      Kind::UInt8 => "UInt8",
      Kind::Int8 => "Int8",
      Kind::UInt16 => "UInt16",
      Kind::Int16 => "Int16",
      Kind::UInt32 => "UInt32",
      Kind::Int32 => "Int32",
      Kind::UInt64 => "UInt64",
      Kind::Int64 => "Int64",
      Kind::Float32 => "Float32",
      Kind::Float64 => "Float64",
      Kind::Bool => "Bool",
      Kind::String => "String",
      Kind::FixedString => "FixedString",
      Kind::Date => "Date",
      Kind::Date32 => "Date32",
      Kind::DateTime => "DateTime",
      Kind::DateTime64 => "DateTime64",
      Kind::Time => "Time",
      Kind::Time64 => "Time64",
      Kind::Uuid => "UUID",
      Kind::Ipv4 => "IPv4",
      Kind::Ipv6 => "IPv6",
      Kind::Array => "Array",
      Kind::Nullable => "Nullable",
      Kind::Tuple => "Tuple",
    }
  }

  /// The 19 scalar (argument-less, non-nesting) kinds eligible for the
  /// pre-built singleton cache.
  fn is_plain_scalar(self) -> bool {
    !matches!(
      self,
      Kind::FixedString | Kind::DateTime64 | Kind::Time64 | Kind::Array | Kind::Nullable | Kind::Tuple
    )
  }
}

struct Inner {
  name: Kind,
  nested: Vec<Type>,
  precision_or_length: Option<u32>,
  field_name: Option<String>,
  parent: RefCell<Weak<Inner>>,
}

/// A parsed type tree. Cheap to clone (reference-counted).
///
/// `parent` is a back-pointer to the enclosing type, set once at
/// construction and never mutated afterwards; the root's parent is absent.
/// Equality is structural and ignores `parent` (which exists purely for
/// diagnostics and root lookup).
#[derive(Clone)]
pub struct Type(Rc<Inner>);

impl Type {
  fn build(name: Kind, nested: Vec<Type>, precision_or_length: Option<u32>, field_name: Option<String>) -> Self {
    let inner = Rc::new(Inner {
      name,
      nested,
      precision_or_length,
      field_name,
      parent: RefCell::new(Weak::new()),
    });
    for child in &inner.nested {
      // Scalar children drawn from `SCALAR_CACHE` are shared across unrelated
      // trees, so a strong count above 1 means this container isn't the
      // child's sole owner; claiming parenthood would make the back-pointer
      // flip to whichever tree nested it most recently. Leave it unset
      // (parent lookup for such a child simply reports `None`) rather than
      // risk a stale pointer.
      if Rc::strong_count(&child.0) == 1 {
        *child.0.parent.borrow_mut() = Rc::downgrade(&inner);
      }
    }
    Type(inner)
  }

  pub fn kind(&self) -> Kind {
    self.0.name
  }

  pub fn nested(&self) -> &[Type] {
    &self.0.nested
  }

  pub fn precision_or_length(&self) -> Option<u32> {
    self.0.precision_or_length
  }

  pub fn field_name(&self) -> Option<&str> {
    self.0.field_name.as_deref()
  }

  pub fn parent(&self) -> Option<Type> {
    self.0.parent.borrow().upgrade().map(Type)
  }

  /// Walks up to the enclosing top-level type. Cosmetic; recomputed rather
  /// than cached.
  pub fn root(&self) -> Type {
    let mut current = self.clone();
    while let Some(parent) = current.parent() {
      current = parent;
    }
    current
  }

  /// Rebuilds this node with a tuple field name attached. Consumes `self`
  /// via `Rc::try_unwrap` rather than cloning its `nested` children: cloning
  /// while `self` is still alive would bump each child's strong count to 2,
  /// making `build`'s "am I this child's sole owner" check fail spuriously
  /// and leave the child's `parent` permanently dangling once `self` drops.
  fn with_field_name(self, field_name: String) -> Self {
    match Rc::try_unwrap(self.0) {
      Ok(inner) => Type::build(inner.name, inner.nested, inner.precision_or_length, Some(field_name)),
      Err(rc) => Type::build(rc.name, rc.nested.clone(), rc.precision_or_length, Some(field_name)),
    }
  }
}

impl PartialEq for Type {
  fn eq(&self, other: &Self) -> bool {
    self.0.name == other.0.name
      && self.0.precision_or_length == other.0.precision_or_length
      && self.0.field_name == other.0.field_name
      && self.0.nested == other.0.nested
  }
}

impl Eq for Type {}

impl fmt::Debug for Type {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("Type")
      .field("name", &self.0.name)
      .field("nested", &self.0.nested)
      .field("precision_or_length", &self.0.precision_or_length)
      .field("field_name", &self.0.field_name)
      .finish()
  }
}

impl fmt::Display for Type {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self.kind() {
      Kind::FixedString => write!(f, "FixedString({})", self.0.precision_or_length.unwrap_or(0)),
      Kind::DateTime64 => write!(f, "DateTime64({})", self.0.precision_or_length.unwrap_or(3)),
      Kind::Time64 => write!(f, "Time64({})", self.0.precision_or_length.unwrap_or(3)),
      Kind::Nullable => write!(f, "Nullable({})", self.0.nested[0]),
      Kind::Array => write!(f, "Array({})", self.0.nested[0]),
      Kind::Tuple => {
        write!(f, "Tuple(")?;
        for (i, field) in self.0.nested.iter().enumerate() {
          if i > 0 {
            write!(f, ", ")?;
          }
          write!(f, "{} {}", field.field_name().unwrap_or(""), field)?;
        }
        write!(f, ")")
      }
      _ => write!(f, "{}", self.kind().name()),
    }
  }
}

thread_local! {
  static SCALAR_CACHE: RefCell<HashMap<Kind, Type>> = RefCell::new(HashMap::new());
}

fn scalar(kind: Kind) -> Type {
  debug_assert!(kind.is_plain_scalar());
  SCALAR_CACHE.with(|cache| {
    cache
      .borrow_mut()
      .entry(kind)
      .or_insert_with(|| Type::build(kind, Vec::new(), None, None))
      .clone()
  })
}

/// Parses a type string per the grammar in the codec's type system.
///
/// # Errors
///
/// Returns [`Error::TypeParse`] on a malformed string, an unknown type
/// name, or trailing characters after a complete type.
pub fn parse_type(input: &str) -> Result<Type> {
  let mut parser = Parser { bytes: input.as_bytes(), pos: 0 };
  let ty = parser.parse_type()?;
  if parser.pos != parser.bytes.len() {
    return Err(Error::type_parse(format!(
      "trailing characters after type: {:?}",
      &input[parser.pos..]
    )));
  }
  Ok(ty)
}

struct Parser<'a> {
  bytes: &'a [u8],
  pos: usize,
}

impl<'a> Parser<'a> {
  fn peek(&self) -> Option<u8> {
    self.bytes.get(self.pos).copied()
  }

  fn skip_ws(&mut self) {
    while matches!(self.peek(), Some(b' ' | b'\t')) {
      self.pos += 1;
    }
  }

  fn expect(&mut self, c: u8) -> Result<()> {
    if self.peek() == Some(c) {
      self.pos += 1;
      Ok(())
    } else {
      Err(Error::type_parse(format!(
        "expected {:?} at byte offset {}, found {:?}",
        c as char,
        self.pos,
        self.peek().map(|b| b as char)
      )))
    }
  }

  fn is_ident_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_'
  }

  /// Reads an identifier token, terminated by `(`, `)`, `,`, whitespace, or EOF.
  fn read_ident(&mut self) -> Result<&'a str> {
    let start = self.pos;
    while self.peek().map(Self::is_ident_byte).unwrap_or(false) {
      self.pos += 1;
    }
    if self.pos == start {
      return Err(Error::type_parse(format!(
        "expected identifier at byte offset {}",
        start
      )));
    }
    Ok(std::str::from_utf8(&self.bytes[start..self.pos]).expect("ascii identifier"))
  }

  fn parse_uint(&mut self) -> Result<u32> {
    let start = self.pos;
    while matches!(self.peek(), Some(b) if b.is_ascii_digit()) {
      self.pos += 1;
    }
    if self.pos == start {
      return Err(Error::type_parse(format!("expected integer at byte offset {}", start)));
    }
    std::str::from_utf8(&self.bytes[start..self.pos])
      .unwrap()
      .parse()
      .map_err(|_| Error::type_parse("integer literal out of range"))
  }

  /// Parses the optional `"(" int ["," any] ")"` suffix shared by
  /// `DateTime64`/`Time64`, defaulting to precision 3 when absent.
  fn parse_optional_precision(&mut self, kind: Kind) -> Result<Type> {
    if self.peek() != Some(b'(') {
      return Ok(Type::build(kind, Vec::new(), Some(3), None));
    }
    self.pos += 1;
    self.skip_ws();
    let precision = self.parse_uint()?;
    self.skip_ws();
    if self.peek() == Some(b',') {
      // Trailing arguments (e.g. a timezone name) are tolerated and ignored.
      while self.peek().map(|c| c != b')').unwrap_or(false) {
        self.pos += 1;
      }
    }
    self.expect(b')')?;
    Ok(Type::build(kind, Vec::new(), Some(precision), None))
  }

  fn parse_field(&mut self) -> Result<Type> {
    self.skip_ws();
    let name = self.read_ident()?.to_string();
    self.skip_ws();
    let ty = self.parse_type()?;
    Ok(ty.with_field_name(name))
  }

  fn parse_type(&mut self) -> Result<Type> {
    let name = self.read_ident()?;
    match name {
      "UInt8" => Ok(scalar(Kind::UInt8)),
      "Int8" => Ok(scalar(Kind::Int8)),
      "UInt16" => Ok(scalar(Kind::UInt16)),
      "Int16" => Ok(scalar(Kind::Int16)),
      "UInt32" => Ok(scalar(Kind::UInt32)),
      "Int32" => Ok(scalar(Kind::Int32)),
      "UInt64" => Ok(scalar(Kind::UInt64)),
      "Int64" => Ok(scalar(Kind::Int64)),
      "Float32" => Ok(scalar(Kind::Float32)),
      "Float64" => Ok(scalar(Kind::Float64)),
      "Bool" => Ok(scalar(Kind::Bool)),
      "String" => Ok(scalar(Kind::String)),
      "Date" => Ok(scalar(Kind::Date)),
      "Date32" => Ok(scalar(Kind::Date32)),
      "DateTime" => Ok(scalar(Kind::DateTime)),
      "Time" => Ok(scalar(Kind::Time)),
      "UUID" => Ok(scalar(Kind::Uuid)),
      "IPv4" => Ok(scalar(Kind::Ipv4)),
      "IPv6" => Ok(scalar(Kind::Ipv6)),
      "DateTime64" => self.parse_optional_precision(Kind::DateTime64),
      "Time64" => self.parse_optional_precision(Kind::Time64),
      "FixedString" => {
        self.expect(b'(')?;
        self.skip_ws();
        let len = self.parse_uint()?;
        self.skip_ws();
        self.expect(b')')?;
        Ok(Type::build(Kind::FixedString, Vec::new(), Some(len), None))
      }
      "Nullable" => {
        self.expect(b'(')?;
        let inner = self.parse_type()?;
        self.expect(b')')?;
        Ok(Type::build(Kind::Nullable, vec![inner], None, None))
      }
      "Array" => {
        self.expect(b'(')?;
        let inner = self.parse_type()?;
        self.expect(b')')?;
        Ok(Type::build(Kind::Array, vec![inner], None, None))
      }
      "Tuple" => {
        self.expect(b'(')?;
        let mut fields = Vec::new();
        fields.push(self.parse_field()?);
        while self.peek() == Some(b',') {
          self.pos += 1;
          fields.push(self.parse_field()?);
        }
        self.expect(b')')?;
        Ok(Type::build(Kind::Tuple, fields, None, None))
      }
      other => Err(Error::type_parse(format!("unknown type name `{other}`"))),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn ty(s: &str) -> Type {
    parse_type(s).unwrap_or_else(|e| panic!("failed to parse {s:?}: {e}"))
  }

  #[test]
  fn parses_scalars() {
    assert_eq!(ty("UInt8").kind(), Kind::UInt8);
    assert_eq!(ty("Bool").kind(), Kind::Bool);
    assert_eq!(ty("IPv6").kind(), Kind::Ipv6);
  }

  #[test]
  fn parses_fixed_string() {
    let t = ty("FixedString(12)");
    assert_eq!(t.kind(), Kind::FixedString);
    assert_eq!(t.precision_or_length(), Some(12));
  }

  #[test]
  fn datetime64_defaults_to_precision_3() {
    assert_eq!(ty("DateTime64").precision_or_length(), Some(3));
    assert_eq!(ty("DateTime64(6)").precision_or_length(), Some(6));
  }

  #[test]
  fn datetime64_tolerates_trailing_args() {
    let t = ty("DateTime64(5, 'UTC')");
    assert_eq!(t.precision_or_length(), Some(5));
  }

  #[test]
  fn nested_array_of_tuple() {
    let t = ty("Array(Tuple(a Nullable(String), b UInt64))");
    assert_eq!(t.kind(), Kind::Array);
    let tuple = &t.nested()[0];
    assert_eq!(tuple.kind(), Kind::Tuple);
    assert_eq!(tuple.nested()[0].field_name(), Some("a"));
    assert_eq!(tuple.nested()[0].kind(), Kind::Nullable);
    assert_eq!(tuple.nested()[1].field_name(), Some("b"));
  }

  #[test]
  fn parent_back_pointer() {
    // Array/Nullable/Tuple nodes are never drawn from the scalar cache, so
    // a compound child's parent back-pointer is always set.
    let t = ty("Array(Array(UInt8))");
    let inner = &t.nested()[0];
    assert_eq!(inner.parent().as_ref(), Some(&t));
    assert!(t.parent().is_none());
    assert_eq!(inner.root(), t);
  }

  #[test]
  fn tuple_field_parent_is_set_even_for_scalar_kind() {
    // Tuple fields always rebuild a fresh node to attach the field name, so
    // unlike a bare scalar nested directly under Array/Nullable, they are
    // never a cache hit and always get a correct parent.
    let t = ty("Tuple(a UInt8)");
    let field = &t.nested()[0];
    assert_eq!(field.parent().as_ref(), Some(&t));
  }

  #[test]
  fn tuple_field_with_compound_type_keeps_grandchild_parent_pointer() {
    // The field's own type (Nullable(Array(UInt8))) is compound, so its
    // nested Array node is never scalar-cache-shared and must keep a live
    // parent pointer back to the field even after `with_field_name` rebuilds
    // the field node to attach its name.
    let t = ty("Tuple(a Nullable(Array(UInt8)))");
    let field = &t.nested()[0];
    assert_eq!(field.field_name(), Some("a"));
    let array = &field.nested()[0];
    assert_eq!(array.parent().as_ref(), Some(field));
  }

  #[test]
  fn scalar_cache_is_shared_and_leaves_parent_unset_when_nested() {
    // A scalar type parsed at top level and one nested under Array resolve
    // to the same cached node; since that node may simultaneously be a
    // child of many unrelated trees, its parent back-pointer is left
    // unset rather than racing to point at whichever tree nested it last.
    let top = ty("UInt8");
    let nested = &ty("Array(UInt8)").nested()[0];
    assert_eq!(top, *nested);
    assert!(nested.parent().is_none());
  }

  #[test]
  fn display_round_trips() {
    for s in [
      "UInt8",
      "FixedString(12)",
      "DateTime64(3)",
      "Nullable(String)",
      "Array(Array(UInt64))",
      "Tuple(a Nullable(String), b UInt64)",
    ] {
      let t1 = ty(s);
      let printed = t1.to_string();
      let t2 = ty(&printed);
      assert_eq!(t1, t2, "round trip mismatch for {s:?} -> {printed:?}");
    }
  }

  #[test]
  fn datetime64_default_round_trips_explicit() {
    // Omitted precision defaults to 3, which pretty-prints with an explicit
    // "(3)" that parses back to an equal tree.
    let t1 = ty("DateTime64");
    let t2 = ty(&t1.to_string());
    assert_eq!(t1, t2);
  }

  #[test]
  fn rejects_invalid_inputs() {
    for s in [
      "JSON",
      "Variant",
      "Map",
      "BFloat16",
      "Array",
      "Array()",
      "Array(Int8",
      "Array(Int8, String)",
      "Nullable",
      "Nullable()",
      "Nullable(Bool",
      "Nullable(String, UInt32)",
      "Tuple",
      "Tuple()",
      "Tuple(DateTime)",
      "Tuple(field Date",
      "Tuple(field Date,)",
      "Tuple(field UInt16(String))",
    ] {
      assert!(parse_type(s).is_err(), "expected {s:?} to be rejected");
    }
  }
}
