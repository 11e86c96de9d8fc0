//! End-to-end scenarios against the public API, using an in-memory
//! `Vec<u8>`/`tokio::io::duplex` stream rather than a network collaborator
//! (out of scope per spec.md §1).

use std::net::{Ipv4Addr, Ipv6Addr};

use rowbinary::{ReaderOptions, RowBinaryReader, RowBinaryWriter, WriterOptions};
use uuid::Uuid;

fn leb128(value: u64, out: &mut Vec<u8>) {
  let mut v = value;
  loop {
    let byte = (v & 0x7F) as u8;
    v >>= 7;
    if v == 0 {
      out.push(byte);
      return;
    }
    out.push(byte | 0x80);
  }
}

fn push_str(out: &mut Vec<u8>, s: &str) {
  leb128(s.len() as u64, out);
  out.extend_from_slice(s.as_bytes());
}

/// S1: round-trip of a 26-column row through `RowBinaryWithNamesAndTypes`.
/// The writer only ever produces bare `RowBinary` (§6), so the header here
/// is hand-assembled exactly as a real caller streaming to ClickHouse's
/// HTTP interface would prepend it.
#[tokio::test]
async fn s1_round_trips_a_26_column_row_with_names_and_types() {
  let columns: [(&str, &str); 26] = [
    ("u8", "UInt8"),
    ("s8", "Int8"),
    ("u16", "UInt16"),
    ("s16", "Int16"),
    ("u32", "UInt32"),
    ("s32", "Int32"),
    ("u64", "UInt64"),
    ("s64", "Int64"),
    ("f32", "Float32"),
    ("f64", "Float64"),
    ("str", "String"),
    ("fstr", "FixedString(2)"),
    ("date", "Date"),
    ("date32", "Date32"),
    ("dt", "DateTime"),
    ("dt64", "DateTime64(3)"),
    ("time", "Time"),
    ("time64", "Time64(3)"),
    ("uuid", "UUID"),
    ("ipv4", "IPv4"),
    ("ipv6", "IPv6"),
    ("arr", "Array(String)"),
    ("bool", "Bool"),
    ("nullable", "Nullable(Int8)"),
    ("narr", "Array(Array(UInt8))"),
    ("tuple", "Tuple(a UInt32, b Tuple(c UInt32, d String))"),
  ];

  let mut header = Vec::new();
  leb128(columns.len() as u64, &mut header);
  for (name, _) in &columns {
    push_str(&mut header, name);
  }
  for (_, ty) in &columns {
    push_str(&mut header, ty);
  }

  let uuid = Uuid::parse_str("61f0c404-5cb3-11e7-907b-a6006ad3dba0").unwrap();
  let ipv4 = Ipv4Addr::new(116, 106, 34, 242);
  let ipv6: Ipv6Addr = "2a02:e980:1e::1".parse().unwrap();

  let mut row = Vec::new();
  {
    let mut w = RowBinaryWriter::new(&mut row, WriterOptions::default()).unwrap();
    w.write_u8(1).await.unwrap();
    w.write_i8(2).await.unwrap();
    w.write_u16(3).await.unwrap();
    w.write_i16(-4).await.unwrap();
    w.write_u32(5).await.unwrap();
    w.write_i32(-6).await.unwrap();
    w.write_u64(7).await.unwrap();
    w.write_i64(-8).await.unwrap();
    w.write_f32(1.5).await.unwrap();
    w.write_f64(2.87).await.unwrap();
    w.write_string("test_a").await.unwrap();
    w.write_fixed_string("US", 2).await.unwrap();
    w.write_date(20089).await.unwrap(); // 2025-01-01
    w.write_date32(84006).await.unwrap(); // 2200-01-01
    w.write_datetime(1_735_718_400).await.unwrap(); // 2025-01-01T08:00:00Z
    w.write_datetime64(1_735_725_600_500, 3).await.unwrap();
    w.write_time(361424).await.unwrap(); // 100:23:44
    w.write_time64(3_910_812, 3).await.unwrap(); // 01:05:10.812
    w.write_uuid(uuid).await.unwrap();
    w.write_ipv4(ipv4).await.unwrap();
    w.write_ipv6(ipv6).await.unwrap();
    w.write_array_length(3).await.unwrap();
    w.write_string("a").await.unwrap();
    w.write_string("b").await.unwrap();
    w.write_string("c").await.unwrap();
    w.write_bool(true).await.unwrap();
    w.write_null(true).await.unwrap();
    w.write_array_length(2).await.unwrap();
    w.write_array_length(2).await.unwrap();
    w.write_u8(8).await.unwrap();
    w.write_u8(10).await.unwrap();
    w.write_array_length(2).await.unwrap();
    w.write_u8(12).await.unwrap();
    w.write_u8(14).await.unwrap();
    w.write_u32(1).await.unwrap();
    w.write_u32(2).await.unwrap();
    w.write_string("tuple_a").await.unwrap();
    w.dispose().await.unwrap();
  }

  let mut wire = header;
  wire.extend_from_slice(&row);

  let mut reader = RowBinaryReader::new(wire.as_slice(), ReaderOptions::default()).unwrap();
  let read_columns = reader.read_columns().await.unwrap().to_vec();
  assert_eq!(read_columns.len(), 26);
  assert_eq!(read_columns[0].name, "u8");
  assert_eq!(read_columns[0].ty.kind(), rowbinary::Kind::UInt8);
  assert_eq!(read_columns[24].ty.kind(), rowbinary::Kind::Array);

  assert_eq!(reader.read_u8().await.unwrap(), 1);
  assert_eq!(reader.read_i8().await.unwrap(), 2);
  assert_eq!(reader.read_u16().await.unwrap(), 3);
  assert_eq!(reader.read_i16().await.unwrap(), -4);
  assert_eq!(reader.read_u32().await.unwrap(), 5);
  assert_eq!(reader.read_i32().await.unwrap(), -6);
  assert_eq!(reader.read_u64().await.unwrap(), 7);
  assert_eq!(reader.read_i64().await.unwrap(), -8);
  assert_eq!(reader.read_f32().await.unwrap(), 1.5);
  assert_eq!(reader.read_f64().await.unwrap(), 2.87);
  assert_eq!(reader.read_string().await.unwrap(), "test_a");
  assert_eq!(reader.read_fixed_string(2).await.unwrap(), "US");
  assert_eq!(reader.read_date().await.unwrap(), 20089);
  assert_eq!(reader.read_date32().await.unwrap(), 84006);
  assert_eq!(reader.read_datetime().await.unwrap(), 1_735_718_400);
  assert_eq!(reader.read_datetime64(3).await.unwrap(), 1_735_725_600_500);
  assert_eq!(reader.read_time().await.unwrap(), 361424);
  assert_eq!(reader.read_time64(3).await.unwrap(), 3_910_812);
  assert_eq!(reader.read_uuid().await.unwrap(), uuid);
  assert_eq!(reader.read_ipv4().await.unwrap(), ipv4);
  assert_eq!(reader.read_ipv6().await.unwrap(), ipv6);
  let n = reader.read_array_length().await.unwrap();
  assert_eq!(n, 3);
  for expected in ["a", "b", "c"] {
    assert_eq!(reader.read_string().await.unwrap(), expected);
  }
  assert!(reader.read_bool().await.unwrap());
  assert!(reader.is_null().await.unwrap());
  assert_eq!(reader.read_array_length().await.unwrap(), 2);
  assert_eq!(reader.read_array_length().await.unwrap(), 2);
  assert_eq!(reader.read_u8().await.unwrap(), 8);
  assert_eq!(reader.read_u8().await.unwrap(), 10);
  assert_eq!(reader.read_array_length().await.unwrap(), 2);
  assert_eq!(reader.read_u8().await.unwrap(), 12);
  assert_eq!(reader.read_u8().await.unwrap(), 14);
  assert_eq!(reader.read_u32().await.unwrap(), 1);
  assert_eq!(reader.read_u32().await.unwrap(), 2);
  assert_eq!(reader.read_string().await.unwrap(), "tuple_a");

  assert!(reader.is_complete().await.unwrap());
}

/// S2: tuple flattening — a nested tuple is concatenated on the wire with
/// no delimiter, as if its fields were consecutive top-level columns.
#[tokio::test]
async fn s2_tuple_flattening_wire_bytes() {
  let wire: [u8; 16] = [0x01, 0x00, 0x00, 0x00, 0x02, 0x00, 0x00, 0x00, 0x07, b't', b'u', b'p', b'l', b'e', b'_', b'a'];

  let mut reader = RowBinaryReader::new(&wire[..], ReaderOptions::default()).unwrap();
  assert_eq!(reader.read_u32().await.unwrap(), 1);
  assert_eq!(reader.read_u32().await.unwrap(), 2);
  assert_eq!(reader.read_string().await.unwrap(), "tuple_a");

  let mut out = Vec::new();
  let mut writer = RowBinaryWriter::new(&mut out, WriterOptions::default()).unwrap();
  writer.write_u32(1).await.unwrap();
  writer.write_u32(2).await.unwrap();
  writer.write_string("tuple_a").await.unwrap();
  writer.dispose().await.unwrap();
  assert_eq!(out, wire);
}

/// S4: `Date32` accepts and round-trips negative day counts.
#[tokio::test]
async fn s4_date32_negative_round_trip() {
  let mut out = Vec::new();
  let mut writer = RowBinaryWriter::new(&mut out, WriterOptions::default()).unwrap();
  writer.write_date32(-25567).await.unwrap(); // 1900-01-01
  writer.dispose().await.unwrap();
  assert_eq!(i32::from_le_bytes(out.clone().try_into().unwrap()), -25567);

  let mut reader = RowBinaryReader::new(out.as_slice(), ReaderOptions::default()).unwrap();
  assert_eq!(reader.read_date32().await.unwrap(), -25567);
}

/// The shape validator (§4.G), exercised through the public API in a debug
/// build: a typed call that disagrees with the declared schema fails at
/// the first offending primitive rather than silently desyncing.
#[tokio::test]
#[cfg(debug_assertions)]
async fn validator_rejects_a_mismatched_typed_call() {
  let mut header = Vec::new();
  leb128(1, &mut header);
  push_str(&mut header, "n");
  push_str(&mut header, "UInt8");

  let mut reader = RowBinaryReader::new(header.as_slice(), ReaderOptions::default()).unwrap();
  reader.read_columns().await.unwrap();
  let err = reader.read_u64().await.unwrap_err();
  assert!(err.to_string().contains("contract violation"));
}

/// Buffered I/O (§4.C): a reader whose buffer comfortably exceeds the row
/// size should not need more physical reads than the stream has chunks,
/// even when the underlying stream drip-feeds bytes one row at a time.
#[tokio::test]
async fn buffered_reader_amortizes_across_rows() {
  let (mut client, server) = tokio::io::duplex(64 * 1024);
  let server_task = tokio::spawn(async move {
    let mut reader = RowBinaryReader::new(server, ReaderOptions::default()).unwrap();
    let mut total = 0u64;
    loop {
      if reader.is_complete().await.unwrap() {
        break;
      }
      total += reader.read_u64().await.unwrap();
    }
    total
  });

  use tokio::io::AsyncWriteExt;
  for i in 0..100u64 {
    client.write_all(&i.to_le_bytes()).await.unwrap();
  }
  drop(client);

  let total = server_task.await.unwrap();
  assert_eq!(total, (0..100u64).sum::<u64>());
}
