//! Message encoding/decoding benchmarks.

use bytes::Bytes;
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use now_proto::{
    Capset, ExecData, ExecMessage, ExecPowerShell, ExecStream, NowMessage, SessionMessage,
};
use std::time::Duration;

fn exec_data(size: usize) -> NowMessage {
    ExecData {
        session_id: 1,
        stream: ExecStream::Stdout,
        last: false,
        data: Bytes::from(vec![0x42u8; size]),
    }
    .into()
}

fn control_messages() -> Vec<(&'static str, NowMessage)> {
    let capset = Capset::all()
        .with_heartbeat(Duration::from_secs(60))
        .unwrap();
    let pwsh = ExecPowerShell::new(7, "Get-ChildItem -Recurse")
        .with_directory("C:\\Users")
        .with_no_logo()
        .with_io_redirection();

    vec![
        ("capset", capset.into()),
        ("lock", SessionMessage::Lock.into()),
        ("pwsh", ExecMessage::Pwsh(pwsh).into()),
        (
            "abort",
            ExecMessage::Abort {
                session_id: 7,
                exit_code: 1,
            }
            .into(),
        ),
    ]
}

fn bench_data_encode(c: &mut Criterion) {
    let mut group = c.benchmark_group("exec_data_encode");

    for size in [64, 4096, 32768] {
        let msg = exec_data(size);

        group.throughput(Throughput::Bytes(size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), &msg, |b, msg| {
            b.iter(|| black_box(msg.encode().unwrap()));
        });
    }

    group.finish();
}

fn bench_data_decode(c: &mut Criterion) {
    let mut group = c.benchmark_group("exec_data_decode");

    for size in [64, 4096, 32768] {
        let encoded = exec_data(size).encode().unwrap();

        group.throughput(Throughput::Bytes(size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), &encoded, |b, encoded| {
            b.iter(|| black_box(NowMessage::decode_bytes(encoded).unwrap()));
        });
    }

    group.finish();
}

fn bench_control_roundtrip(c: &mut Criterion) {
    let mut group = c.benchmark_group("control_roundtrip");
    group.throughput(Throughput::Elements(1));

    for (name, msg) in control_messages() {
        group.bench_with_input(BenchmarkId::from_parameter(name), &msg, |b, msg| {
            b.iter(|| {
                let encoded = msg.encode().unwrap();
                black_box(NowMessage::decode_bytes(&encoded).unwrap())
            });
        });
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_data_encode,
    bench_data_decode,
    bench_control_roundtrip,
);

criterion_main!(benches);
