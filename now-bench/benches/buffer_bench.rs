//! Stream defragmentation benchmarks.

use bytes::{Bytes, BytesMut};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use now_proto::{ExecData, ExecStream, MessageBuffer, NowMessage};

/// A stream of `count` stdout messages of `size` bytes each.
fn stream(count: usize, size: usize) -> Bytes {
    let mut buf = BytesMut::new();
    for i in 0..count {
        let msg: NowMessage = ExecData {
            session_id: 1,
            stream: ExecStream::Stdout,
            last: i + 1 == count,
            data: Bytes::from(vec![0x42u8; size]),
        }
        .into();
        buf.extend_from_slice(&msg.encode().unwrap());
    }
    buf.freeze()
}

fn drain(buffer: &mut MessageBuffer) -> usize {
    let mut n = 0;
    while let Some(raw) = buffer.take_next_message() {
        black_box(NowMessage::decode(raw).unwrap());
        n += 1;
    }
    n
}

fn bench_chunked_feed(c: &mut Criterion) {
    let mut group = c.benchmark_group("defrag_chunked");
    let data = stream(64, 1024);

    // chunk sizes below, near and above the frame size
    for chunk in [16, 1500, 8192, 65536] {
        group.throughput(Throughput::Bytes(data.len() as u64));
        group.bench_with_input(BenchmarkId::from_parameter(chunk), &chunk, |b, &chunk| {
            b.iter(|| {
                let mut buffer = MessageBuffer::new();
                let mut decoded = 0;
                for piece in data.chunks(chunk) {
                    buffer.add_data(piece).unwrap();
                    decoded += drain(&mut buffer);
                }
                assert_eq!(decoded, 64);
            });
        });
    }

    group.finish();
}

fn bench_large_frames(c: &mut Criterion) {
    let mut group = c.benchmark_group("defrag_large_frames");

    for size in [32 * 1024, 256 * 1024] {
        let data = stream(4, size);

        group.throughput(Throughput::Bytes(data.len() as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), &data, |b, data| {
            b.iter(|| {
                let mut buffer = MessageBuffer::new();
                for piece in data.chunks(8192) {
                    buffer.add_data(piece).unwrap();
                }
                assert_eq!(drain(&mut buffer), 4);
            });
        });
    }

    group.finish();
}

criterion_group!(benches, bench_chunked_feed, bench_large_frames);

criterion_main!(benches);
