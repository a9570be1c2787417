//! Throughput Benchmark for FlashKV Persist
//!
//! Measures per-key save/load, scans, the whole-file read-modify-write
//! cycle, the codec on its own, and concurrent writers sharing one database
//! lock.

use bytes::Bytes;
use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use flashkv_persist::storage::{
    decode_value, encode_value, KeyStore, PerKeyBackend, SweepStore, Value, WholeFileBackend,
};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

const SERVER: &str = "bench";

/// Benchmark save_key on the per-key backends
fn bench_save(c: &mut Criterion) {
    let tmp = TempDir::new().unwrap();
    let json = PerKeyBackend::new(tmp.path().join("json"));
    let mjson = SweepStore::new(tmp.path().join("mjson"));

    let mut group = c.benchmark_group("save");
    group.throughput(Throughput::Elements(1));

    group.bench_function("json_small", |b| {
        let mut i = 0u64;
        let value = Value::bytes("small_value");
        b.iter(|| {
            let key = format!("key:{}", i % 10_000);
            json.save_key(SERVER, 0, key.as_bytes(), &value, None).unwrap();
            i += 1;
        });
    });

    group.bench_function("mjson_small", |b| {
        let mut i = 0u64;
        let value = Value::bytes("small_value");
        b.iter(|| {
            let key = format!("key:{}", i % 10_000);
            mjson.save_key(SERVER, 0, key.as_bytes(), &value, None).unwrap();
            i += 1;
        });
    });

    group.bench_function("json_large", |b| {
        let mut i = 0u64;
        let value = Value::bytes("x".repeat(64 * 1024)); // 64KB value
        b.iter(|| {
            let key = format!("large:{}", i % 1_000);
            json.save_key(SERVER, 0, key.as_bytes(), &value, None).unwrap();
            i += 1;
        });
    });

    group.finish();
}

/// Benchmark load_key hits and misses
fn bench_load(c: &mut Criterion) {
    let tmp = TempDir::new().unwrap();
    let store = PerKeyBackend::new(tmp.path());

    for i in 0..1_000 {
        let key = format!("key:{}", i);
        let value = Value::bytes(format!("value:{}", i));
        store.save_key(SERVER, 0, key.as_bytes(), &value, None).unwrap();
    }

    let mut group = c.benchmark_group("load");
    group.throughput(Throughput::Elements(1));

    group.bench_function("load_existing", |b| {
        let mut i = 0u64;
        b.iter(|| {
            let key = format!("key:{}", i % 1_000);
            black_box(store.load_key(SERVER, 0, key.as_bytes()).unwrap());
            i += 1;
        });
    });

    group.bench_function("load_missing", |b| {
        let mut i = 0u64;
        b.iter(|| {
            let key = format!("missing:{}", i);
            black_box(store.load_key(SERVER, 0, key.as_bytes()).unwrap());
            i += 1;
        });
    });

    group.bench_function("ttl", |b| {
        let mut i = 0u64;
        b.iter(|| {
            let key = format!("key:{}", i % 1_000);
            black_box(store.ttl(SERVER, 0, key.as_bytes()).unwrap());
            i += 1;
        });
    });

    group.finish();
}

/// Benchmark the whole-file read-modify-write cycle
fn bench_whole_file(c: &mut Criterion) {
    let tmp = TempDir::new().unwrap();
    let store = WholeFileBackend::new(tmp.path());

    for i in 0..500 {
        let key = format!("key:{}", i);
        store
            .save_key(SERVER, 0, key.as_bytes(), &Value::bytes("v"), None)
            .unwrap();
    }

    let mut group = c.benchmark_group("whole_file");
    group.throughput(Throughput::Elements(1));

    group.bench_function("save_key_500", |b| {
        let mut i = 0u64;
        b.iter(|| {
            let key = format!("key:{}", i % 500);
            store
                .save_key(SERVER, 0, key.as_bytes(), &Value::bytes("v2"), None)
                .unwrap();
            i += 1;
        });
    });

    group.bench_function("load_500", |b| {
        b.iter(|| black_box(store.load(SERVER, 0).unwrap()));
    });

    group.finish();
}

/// Benchmark the value codec without the filesystem
fn bench_codec(c: &mut Criterion) {
    let hash = Value::hash((0..100).map(|i| (format!("field:{}", i), format!("value:{}", i))));
    let list = Value::list((0..100).map(|i| Bytes::from(format!("item:{}", i))));

    let mut group = c.benchmark_group("codec");

    for (name, value) in [("hash_100", &hash), ("list_100", &list)] {
        let encoded = encode_value(value).unwrap();
        group.bench_function(format!("encode_{name}"), |b| {
            b.iter(|| black_box(encode_value(value).unwrap()));
        });
        group.bench_function(format!("decode_{name}"), |b| {
            b.iter(|| black_box(decode_value(&encoded).unwrap()));
        });
    }

    group.finish();
}

/// Benchmark concurrent writers on one database lock
fn bench_concurrent(c: &mut Criterion) {
    use std::thread;

    let tmp = TempDir::new().unwrap();
    let store = Arc::new(PerKeyBackend::new(tmp.path()));

    let mut group = c.benchmark_group("concurrent");
    group.measurement_time(Duration::from_secs(10));

    group.bench_function("4_threads_save_load", |b| {
        b.iter(|| {
            let handles: Vec<_> = (0..4)
                .map(|t| {
                    let store = Arc::clone(&store);
                    thread::spawn(move || {
                        for i in 0..250 {
                            let key = format!("key:{}:{}", t, i);
                            store
                                .save_key(SERVER, 0, key.as_bytes(), &Value::bytes("value"), None)
                                .unwrap();
                            store.load_key(SERVER, 0, key.as_bytes()).unwrap();
                        }
                    })
                })
                .collect();

            for handle in handles {
                handle.join().unwrap();
            }
        });
    });

    group.finish();
}

/// Benchmark KEYS-style scans
fn bench_scan(c: &mut Criterion) {
    let tmp = TempDir::new().unwrap();
    let store = PerKeyBackend::new(tmp.path());

    // Pre-populate with various key patterns
    for i in 0..300 {
        for prefix in ["user", "session", "cache"] {
            let key = format!("{}:{}", prefix, i);
            store
                .save_key(SERVER, 0, key.as_bytes(), &Value::bytes("data"), None)
                .unwrap();
        }
    }

    let mut group = c.benchmark_group("scan");

    group.bench_function("scan_pattern", |b| {
        b.iter(|| black_box(store.scan_keys(SERVER, 0, "user:*").unwrap().count()));
    });

    group.bench_function("keys_all", |b| {
        b.iter(|| black_box(store.keys(SERVER, 0).unwrap().count()));
    });

    group.finish();
}

criterion_group!(
    benches,
    bench_save,
    bench_load,
    bench_whole_file,
    bench_codec,
    bench_concurrent,
    bench_scan,
);

criterion_main!(benches);
