use std::hint::black_box;

use criterion::*;
use ecs_chunks::engine::store::EntityStore;

mod common;
use common::*;

fn spawn_benchmark(c: &mut Criterion) {
    init_components();

    let mut group = c.benchmark_group("spawn");

    for &count in &[AGENTS_SMALL, AGENTS_MED] {
        group.throughput(Throughput::Elements(count as u64));

        group.bench_with_input(BenchmarkId::new("create_entities", count), &count, |b, &count| {
            b.iter(|| {
                let mut store = EntityStore::new();
                let agents = store
                    .create_entities(&agent_types(), count)
                    .expect("create_entities failed in benchmark");
                black_box((store, agents));
            });
        });

        group.bench_with_input(BenchmarkId::new("create_entity_loop", count), &count, |b, &count| {
            b.iter(|| {
                let mut store = EntityStore::new();
                let archetype = store
                    .archetype_for_types(&agent_types())
                    .expect("archetype resolution failed");
                for _ in 0..count {
                    store.create_entity_in(archetype).expect("create_entity_in failed");
                }
                black_box(store);
            });
        });

        group.bench_with_input(BenchmarkId::new("destroy_all", count), &count, |b, &count| {
            b.iter_batched(
                || make_store(count),
                |(mut store, agents)| {
                    store.destroy_entities(&agents).expect("destroy_entities failed");
                    black_box(store);
                },
                BatchSize::LargeInput,
            );
        });
    }

    group.finish();
}

criterion_group!(benches, spawn_benchmark);
criterion_main!(benches);
