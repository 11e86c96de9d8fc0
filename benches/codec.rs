//! Representative micro-benchmark over the varint codec and a fixed-width
//! row shape (mirrors the teacher's `benches/binlog.rs` convention); not a
//! full performance harness, which is out of scope (spec.md §1).

use criterion::{criterion_group, criterion_main, BatchSize, Criterion};
use rowbinary::{ReaderOptions, RowBinaryReader, RowBinaryWriter, WriterOptions};
use tokio::runtime::Runtime;

fn fixed_width_row_round_trip(c: &mut Criterion) {
  let rt = Runtime::new().unwrap();

  c.bench_function("write 1000 UInt64 rows", |b| {
    b.to_async(&rt).iter_batched(
      Vec::new,
      |mut out| async move {
        let mut writer = RowBinaryWriter::new(&mut out, WriterOptions::default()).unwrap();
        for i in 0..1000u64 {
          writer.write_u64(i).await.unwrap();
        }
        writer.flush().await.unwrap();
        out
      },
      BatchSize::SmallInput,
    )
  });

  let mut wire = Vec::new();
  {
    let rt2 = Runtime::new().unwrap();
    rt2.block_on(async {
      let mut writer = RowBinaryWriter::new(&mut wire, WriterOptions::default()).unwrap();
      for i in 0..1000u64 {
        writer.write_u64(i).await.unwrap();
      }
      writer.dispose().await.unwrap();
    });
  }

  c.bench_function("read 1000 UInt64 rows", |b| {
    b.to_async(&rt).iter_batched(
      || wire.clone(),
      |wire| async move {
        let mut reader = RowBinaryReader::new(wire.as_slice(), ReaderOptions::default()).unwrap();
        let mut total = 0u64;
        for _ in 0..1000 {
          total = total.wrapping_add(reader.read_u64().await.unwrap());
        }
        total
      },
      BatchSize::SmallInput,
    )
  });
}

criterion_group!(benches, fixed_width_row_round_trip);
criterion_main!(benches);
