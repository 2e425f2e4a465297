use std::sync::Arc;
use std::thread;
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use refdata_store::core::config::Config;
use refdata_store::core::types::{KeyRange, MapDefinition, ProcessingState, RefDataValue, RefStreamDefinition};
use refdata_store::store::offheap_store::RefDataOffHeapStore;
use chrono::Utc;
use rand::Rng;
use tempfile::TempDir;

const KEY_COUNT: usize = 100_000;
const RANGE_COUNT: u64 = 10_000;

struct Fixture {
    _dir: TempDir,
    store: Arc<RefDataOffHeapStore>,
    keys: MapDefinition,
    ranges: MapDefinition,
}

// Helper to create a store holding one loaded stream
fn setup() -> Fixture {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(RefDataOffHeapStore::open(Config::with_storage_path(dir.path())).unwrap());
    let def = RefStreamDefinition::new("bench-pipeline", "1", 1);
    let keys = MapDefinition::new(def.clone(), "keys");
    let ranges = MapDefinition::new(def.clone(), "ranges");

    store
        .do_with_loader_unless_complete(&def, Utc::now(), |loader| {
            loader.initialise(false)?;
            for i in 0..KEY_COUNT {
                loader.put_key_value(&keys, &format!("key_{}", i), RefDataValue::from(format!("value_{}", i % 5000)))?;
            }
            for i in 0..RANGE_COUNT {
                loader.put_range_value(&ranges, KeyRange::new(i * 10, i * 10 + 5)?, RefDataValue::from(format!("range_{}", i)))?;
            }
            loader.complete_processing(ProcessingState::Complete)
        })
        .unwrap();

    Fixture { _dir: dir, store, keys, ranges }
}

/// Benchmark single key and range lookups
fn bench_point_lookups(c: &mut Criterion) {
    let fixture = setup();
    let mut group = c.benchmark_group("point_lookup");
    let mut rng = rand::thread_rng();

    group.bench_function("key_hit", |b| {
        b.iter(|| {
            let key = format!("key_{}", rng.gen_range(0..KEY_COUNT));
            fixture.store.get_value(&fixture.keys, black_box(&key)).unwrap()
        });
    });

    group.bench_function("key_miss", |b| {
        b.iter(|| fixture.store.get_value(&fixture.keys, black_box("no_such_key")).unwrap());
    });

    group.bench_function("range_hit", |b| {
        b.iter(|| {
            let value = rng.gen_range(0..RANGE_COUNT) * 10 + 2;
            fixture.store.get_value(&fixture.ranges, black_box(&value.to_string())).unwrap()
        });
    });

    group.bench_function("range_gap", |b| {
        b.iter(|| {
            let value = rng.gen_range(0..RANGE_COUNT) * 10 + 7;
            fixture.store.get_value(&fixture.ranges, black_box(&value.to_string())).unwrap()
        });
    });

    group.bench_function("consume_bytes", |b| {
        b.iter(|| {
            let key = format!("key_{}", rng.gen_range(0..KEY_COUNT));
            fixture.store.consume_value_bytes(&fixture.keys, &key, |typed| typed.bytes.len()).unwrap()
        });
    });

    group.bench_function("proxy_supply_value", |b| {
        b.iter(|| {
            let key = format!("key_{}", rng.gen_range(0..KEY_COUNT));
            let proxy = fixture.store.get_value_proxy(&fixture.keys, &key).unwrap();
            proxy.supply_value().unwrap()
        });
    });

    group.finish();
}

/// Benchmark lookups from several reader threads at once
fn bench_concurrent_lookups(c: &mut Criterion) {
    let fixture = setup();
    let mut group = c.benchmark_group("concurrent_lookup");
    group.sample_size(20);

    for threads in [1, 2, 4, 8].iter() {
        group.bench_with_input(BenchmarkId::from_parameter(threads), threads, |b, &threads| {
            b.iter(|| {
                thread::scope(|scope| {
                    for _ in 0..threads {
                        scope.spawn(|| {
                            let mut rng = rand::thread_rng();
                            for _ in 0..1_000 {
                                let key = format!("key_{}", rng.gen_range(0..KEY_COUNT));
                                black_box(fixture.store.get_value(&fixture.keys, &key).unwrap());
                            }
                        });
                    }
                });
            });
        });
    }
    group.finish();
}

criterion_group!(benches, bench_point_lookups, bench_concurrent_lookups);
criterion_main!(benches);
