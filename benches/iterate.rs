use criterion::*;
use std::hint::black_box;

use ecs_chunks::engine::query::{QueryBuilder, QueryOptions};

mod common;
use common::*;

fn iterate_benchmark(c: &mut Criterion) {
    init_components();

    let mut group = c.benchmark_group("iterate");
    group.throughput(Throughput::Elements(AGENTS_MED as u64));

    group.bench_function("for_each_chunk_mut_write_wealth", |b| {
        let (mut store, _) = make_store(AGENTS_MED);
        let q = store
            .create_query(&QueryBuilder::new().write::<Wealth>().build().unwrap())
            .unwrap();
        b.iter(|| {
            store
                .for_each_chunk_mut(q, |mut view| {
                    for w in view.column_mut::<Wealth>().unwrap() {
                        w.value *= 1.0001;
                    }
                })
                .unwrap();
        });
    });

    group.bench_function("for_each_chunk_employed_batches", |b| {
        let (mut store, _) = make_store(AGENTS_MED);
        let q = store
            .create_query(
                &QueryBuilder::new()
                    .read::<Employed>()
                    .read::<Productivity>()
                    .build()
                    .unwrap(),
            )
            .unwrap();
        b.iter(|| {
            let mut total = 0.0f32;
            store
                .for_each_chunk(q, |view| {
                    let rates = view.column::<Productivity>().unwrap();
                    for batch in view.batches() {
                        total += rates[batch.start..batch.start + batch.len].iter().map(|p| p.rate).sum::<f32>();
                    }
                })
                .unwrap();
            black_box(total);
        });
    });

    group.bench_function("for_each_chunk_ignore_enable_bits", |b| {
        let (mut store, _) = make_store(AGENTS_MED);
        let q = store
            .create_query(
                &QueryBuilder::new()
                    .read::<Productivity>()
                    .read::<Employed>()
                    .options(QueryOptions::IGNORE_ENABLED_BITS)
                    .build()
                    .unwrap(),
            )
            .unwrap();
        b.iter(|| {
            let mut total = 0.0f32;
            store
                .for_each_chunk(q, |view| {
                    total += view.column::<Productivity>().unwrap().iter().map(|p| p.rate).sum::<f32>();
                })
                .unwrap();
            black_box(total);
        });
    });

    #[cfg(feature = "parallel")]
    group.bench_function("par_for_each_chunk_read_position", |b| {
        use std::sync::atomic::{AtomicUsize, Ordering};

        let (mut store, _) = make_store(AGENTS_MED);
        let q = store
            .create_query(&QueryBuilder::new().read::<Position>().build().unwrap())
            .unwrap();
        b.iter(|| {
            let seen = AtomicUsize::new(0);
            store
                .par_for_each_chunk(q, |view| {
                    let n = view.column::<Position>().unwrap().iter().filter(|p| p.x >= 0.0).count();
                    seen.fetch_add(n, Ordering::Relaxed);
                })
                .unwrap();
            black_box(seen.into_inner());
        });
    });

    group.bench_function("calculate_entity_count", |b| {
        let (mut store, _) = make_store(AGENTS_MED);
        let q = store
            .create_query(&QueryBuilder::new().read::<Employed>().build().unwrap())
            .unwrap();
        b.iter(|| black_box(store.calculate_entity_count(q).unwrap()));
    });

    group.bench_function("toggle_enable_bits_for_query", |b| {
        let (mut store, _) = make_store(AGENTS_MED);
        let q = store
            .create_query(
                &QueryBuilder::new()
                    .read::<Employed>()
                    .options(QueryOptions::IGNORE_ENABLED_BITS)
                    .build()
                    .unwrap(),
            )
            .unwrap();
        let mut enabled = false;
        b.iter(|| {
            black_box(store.set_enabled_for_query::<Employed>(q, enabled).unwrap());
            enabled = !enabled;
        });
    });

    group.finish();
}

criterion_group!(benches, iterate_benchmark);
criterion_main!(benches);
