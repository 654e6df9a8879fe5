use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use docsync_core::crdt::MarkType;
use docsync_core::{Operation, ParentRef, Position, Replica, TextRange};

fn typed(id: &str, text: &str) -> Replica {
    let mut replica = Replica::new(id).unwrap();
    for (i, c) in text.chars().enumerate() {
        replica.insert_text(&Position::root(i), &c.to_string()).unwrap();
    }
    replica
}

/// Benchmark single character insert
fn bench_single_insert(c: &mut Criterion) {
    c.bench_function("replica_single_insert", |b| {
        b.iter(|| {
            let mut replica = Replica::new("client1").unwrap();
            black_box(replica.insert_text(&Position::root(0), "a").unwrap());
        });
    });
}

/// Benchmark sequential typing, one intent per keystroke
fn bench_sequential_typing(c: &mut Criterion) {
    let mut group = c.benchmark_group("replica_sequential_typing");

    for size in [10, 100, 1000].iter() {
        group.bench_with_input(BenchmarkId::from_parameter(size), size, |b, &size| {
            b.iter(|| {
                let mut replica = Replica::new("client1").unwrap();
                for i in 0..size {
                    black_box(replica.insert_text(&Position::root(i), "a").unwrap());
                }
            });
        });
    }

    group.finish();
}

/// Benchmark applying a typed history on a fresh replica
fn bench_remote_apply(c: &mut Criterion) {
    let mut group = c.benchmark_group("replica_remote_apply");

    for size in [100, 1000, 5000].iter() {
        let mut source = typed("client1", &"a".repeat(*size));
        let ops = source.take_outbox();
        group.bench_with_input(BenchmarkId::from_parameter(size), &ops, |b, ops| {
            b.iter_batched(
                || ops.clone(),
                |ops| {
                    let mut replica = Replica::new("client2").unwrap();
                    black_box(replica.receive_batch(ops));
                },
                criterion::BatchSize::SmallInput,
            );
        });
    }

    group.finish();
}

/// Benchmark worst-case causal buffering: history delivered in reverse
fn bench_reverse_delivery(c: &mut Criterion) {
    let mut source = typed("client1", &"a".repeat(1000));
    let mut ops = source.take_outbox();
    ops.reverse();

    c.bench_function("replica_reverse_delivery_1k", |b| {
        b.iter_batched(
            || ops.clone(),
            |ops| {
                let mut replica = Replica::new("client2").unwrap();
                replica.receive_batch(ops);
                assert!(!replica.sync_health().is_stalled());
            },
            criterion::BatchSize::SmallInput,
        );
    });
}

/// Benchmark concurrent edits convergence
fn bench_concurrent_convergence(c: &mut Criterion) {
    c.bench_function("replica_concurrent_3way_convergence", |b| {
        b.iter(|| {
            let mut replicas = [typed("client1", ""), typed("client2", ""), typed("client3", "")];
            let letters = ["a", "b", "c"];

            // Each client makes 100 edits
            for (replica, letter) in replicas.iter_mut().zip(letters) {
                for i in 0..100 {
                    replica.insert_text(&Position::root(i), letter).unwrap();
                }
            }

            // Full mesh exchange
            let outboxes: Vec<Vec<Operation>> = replicas.iter_mut().map(|r| r.take_outbox()).collect();
            for replica in replicas.iter_mut() {
                for ops in &outboxes {
                    replica.receive_batch(ops.clone());
                }
            }

            // Verify convergence
            let result = replicas[0].text();
            assert_eq!(replicas[1].text(), result);
            assert_eq!(replicas[2].text(), result);
        });
    });
}

/// Benchmark mark resolution while projecting a formatted document
fn bench_snapshot_with_marks(c: &mut Criterion) {
    let mut replica = Replica::new("client1").unwrap();
    replica.insert_text(&Position::root(0), &"a".repeat(2000)).unwrap();
    for start in (0..2000).step_by(20) {
        replica
            .toggle_mark(&TextRange::new(ParentRef::Root, start, start + 10), MarkType::Bold)
            .unwrap();
    }

    c.bench_function("replica_snapshot_2k_chars_100_marks", |b| {
        b.iter(|| {
            black_box(replica.snapshot());
        });
    });
}

/// Benchmark serialization of an operation log
fn bench_log_serialization(c: &mut Criterion) {
    let replica = typed("client1", &"a".repeat(1000));

    c.bench_function("replica_serialize_1k_op_log", |b| {
        b.iter(|| {
            black_box(serde_json::to_string(replica.log()).unwrap());
        });
    });
}

criterion_group!(
    benches,
    bench_single_insert,
    bench_sequential_typing,
    bench_remote_apply,
    bench_reverse_delivery,
    bench_concurrent_convergence,
    bench_snapshot_with_marks,
    bench_log_serialization,
);

criterion_main!(benches);
