use agentflow_checkpoint::{CheckpointStorage, InMemoryCheckpointStorage, WorkflowCheckpoint};
use criterion::{black_box, criterion_group, criterion_main, Criterion};
use serde_json::json;

fn sample_checkpoint() -> WorkflowCheckpoint {
    let mut checkpoint = WorkflowCheckpoint::new("bench-workflow", 100);
    for i in 0..16 {
        checkpoint.shared_state.insert(format!("key-{}", i), json!({"value": i}));
        checkpoint
            .messages
            .entry(format!("executor-{}", i % 4))
            .or_default()
            .push(json!({"payload": {"kind": "int", "data": i}}));
    }
    checkpoint
}

fn checkpoint_save_benchmark(c: &mut Criterion) {
    let runtime = tokio::runtime::Runtime::new().unwrap();
    let storage = InMemoryCheckpointStorage::new();
    let checkpoint = sample_checkpoint();

    c.bench_function("checkpoint save", |b| {
        b.iter(|| {
            runtime.block_on(async {
                storage.save(black_box(checkpoint.clone())).await.unwrap();
            })
        });
    });
}

fn checkpoint_load_benchmark(c: &mut Criterion) {
    let runtime = tokio::runtime::Runtime::new().unwrap();
    let storage = InMemoryCheckpointStorage::new();
    let id = runtime.block_on(storage.save(sample_checkpoint())).unwrap();

    c.bench_function("checkpoint load", |b| {
        b.iter(|| {
            runtime.block_on(async {
                storage.load(black_box(&id)).await.unwrap();
            })
        });
    });
}

criterion_group!(benches, checkpoint_save_benchmark, checkpoint_load_benchmark);
criterion_main!(benches);
