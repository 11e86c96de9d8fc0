//! Wire-layout helpers for the types whose byte order or scale doesn't
//! follow directly from a plain little-endian cast: UUID, IPv4, and the
//! `DateTime64`/`Time64` tick scaling table.

use uuid::Uuid;

use crate::error::{Error, Result};

/// Permutes a textual-order UUID (the 16 bytes of [`Uuid::into_bytes`],
/// big-endian groups A:4 B:2 C:2 D:2 E:6) into wire order: C (LE), B (LE),
/// A (LE), D reversed, E reversed.
pub fn uuid_to_wire(uuid: Uuid) -> [u8; 16] {
  let b = uuid.into_bytes(); // A(0..4) B(4..6) C(6..8) D(8..10) E(10..16)
  let mut out = [0u8; 16];
  out[0..2].copy_from_slice(&[b[7], b[6]]); // C, little-endian
  out[2..4].copy_from_slice(&[b[5], b[4]]); // B, little-endian
  out[4..8].copy_from_slice(&[b[3], b[2], b[1], b[0]]); // A, little-endian
  out[8..10].copy_from_slice(&[b[9], b[8]]); // D, reversed
  out[10..16].copy_from_slice(&[b[15], b[14], b[13], b[12], b[11], b[10]]); // E, reversed
  out
}

/// Inverts [`uuid_to_wire`].
pub fn uuid_from_wire(wire: [u8; 16]) -> Uuid {
  let b = [
    wire[7], wire[6], wire[5], wire[4], wire[3], wire[2], wire[1], wire[0], wire[9], wire[8], wire[15], wire[14],
    wire[13], wire[12], wire[11], wire[10],
  ];
  Uuid::from_bytes(b)
}

/// `IPv4` is stored as a little-endian `u32`; reversing its bytes yields the
/// big-endian (dotted-quad) octet order.
pub fn ipv4_to_wire(octets: [u8; 4]) -> u32 {
  let mut reversed = octets;
  reversed.reverse();
  u32::from_le_bytes(reversed)
}

pub fn ipv4_from_wire(wire: u32) -> [u8; 4] {
  let mut octets = wire.to_le_bytes();
  octets.reverse();
  octets
}

/// Ticks-per-second-equivalent table for `DateTime64`/`Time64`, expressed as
/// a signed power of ten: positive values are a reader multiplier (wire
/// ticks are multiplied by `10^n` to reach 100ns units), negative values a
/// divisor.
fn exponent(precision: u32) -> Result<i32> {
  match precision {
    0 => Ok(7),
    1 => Ok(6),
    2 => Ok(5),
    3 => Ok(4),
    4 => Ok(3),
    5 => Ok(2),
    6 => Ok(1),
    7 => Ok(0),
    8 => Ok(-1),
    9 => Ok(-2),
    _ => Err(Error::UnsupportedPrecision { precision }),
  }
}

/// Converts a wire tick count at `precision` into 100ns units (lossy for
/// precision 8/9, which exceed the 100ns host resolution).
pub fn ticks_to_100ns(raw: i64, precision: u32) -> Result<i64> {
  match exponent(precision)? {
    e if e >= 0 => Ok(raw * 10i64.pow(e as u32)),
    e => Ok(raw / 10i64.pow((-e) as u32)),
  }
}

/// Converts 100ns units into a wire tick count at `precision`.
pub fn ticks_from_100ns(value_100ns: i64, precision: u32) -> Result<i64> {
  match exponent(precision)? {
    e if e >= 0 => Ok(value_100ns / 10i64.pow(e as u32)),
    e => Ok(value_100ns * 10i64.pow((-e) as u32)),
  }
}

pub const DATE_MIN_DAYS: u16 = 0; // 1970-01-01
pub const DATE_MAX_DAYS: u16 = 65535; // 2149-06-06

pub const DATE32_MIN_DAYS: i32 = -25567; // 1900-01-01
pub const DATE32_MAX_DAYS: i32 = 120529; // 2299-12-31

pub const DATETIME_MIN_SECONDS: u32 = 0; // epoch
pub const DATETIME_MAX_SECONDS: u32 = 4294967295; // 2106-02-07 06:28:15

/// Seconds in `±999:59:59`, the `Time`/`Time64` range (§4.E, §9 Open
/// Question: not made configurable in this version).
pub const TIME_MAX_SECONDS: i32 = 999 * 3600 + 59 * 60 + 59;
pub const TIME_MIN_SECONDS: i32 = -TIME_MAX_SECONDS;

const SECOND_100NS: i64 = 10_000_000;

/// `DateTime64` range in 100ns units (precision-independent, unlike the raw
/// wire ticks): `1900-01-01 00:00:00.000` .. `2299-12-31 23:59:59.999`.
pub const DATETIME64_MIN_100NS: i64 = DATE32_MIN_DAYS as i64 * 86_400 * SECOND_100NS;
pub const DATETIME64_MAX_100NS: i64 = (DATE32_MAX_DAYS as i64 * 86_400 + 86_399) * SECOND_100NS + 999 * 10_000;

/// `Time64` range in 100ns units, the same `±999:59:59` bound as `Time`
/// with a fractional second of headroom.
pub const TIME64_MIN_100NS: i64 = TIME_MIN_SECONDS as i64 * SECOND_100NS - 999 * 10_000;
pub const TIME64_MAX_100NS: i64 = TIME_MAX_SECONDS as i64 * SECOND_100NS + 999 * 10_000;
