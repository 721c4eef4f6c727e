use config::{Options, ReadOptions};
use criterion::{criterion_group, criterion_main, BatchSize, Criterion};
use engine::{Db, OptimisticTransactionDb, WriteBatch};
use tempfile::tempdir;

const N_KEYS: usize = 10_000;
const VALUE_SIZE: usize = 100;

fn bench_options() -> Options {
    let mut opts = Options::default();
    opts.create_if_missing = true;
    opts
}

fn key(i: usize) -> Vec<u8> {
    format!("key{:08}", i).into_bytes()
}

fn filled_db(dir: &std::path::Path, flush: bool) -> Db {
    let db = Db::open(dir, &bench_options()).unwrap();
    for i in 0..N_KEYS {
        db.put(key(i), vec![b'x'; VALUE_SIZE]).unwrap();
    }
    if flush {
        db.flush().unwrap();
    }
    db
}

fn put_benchmark(c: &mut Criterion) {
    c.bench_function("db_put_10k", |b| {
        b.iter_batched(
            || {
                let dir = tempdir().unwrap();
                let db = Db::open(dir.path(), &bench_options()).unwrap();
                (dir, db)
            },
            |(_dir, db)| {
                for i in 0..N_KEYS {
                    db.put(key(i), vec![b'x'; VALUE_SIZE]).unwrap();
                }
            },
            BatchSize::LargeInput,
        );
    });
}

fn batch_write_benchmark(c: &mut Criterion) {
    c.bench_function("db_write_batch_100x100", |b| {
        b.iter_batched(
            || {
                let dir = tempdir().unwrap();
                let db = Db::open(dir.path(), &bench_options()).unwrap();
                (dir, db)
            },
            |(_dir, db)| {
                for chunk in 0..100 {
                    let mut batch = WriteBatch::new();
                    for i in 0..100 {
                        batch.put(key(chunk * 100 + i), vec![b'x'; VALUE_SIZE]);
                    }
                    db.write(batch).unwrap();
                }
            },
            BatchSize::LargeInput,
        );
    });
}

fn get_benchmark(c: &mut Criterion) {
    for (name, flush) in [("db_get_memtable_10k", false), ("db_get_table_10k", true)] {
        c.bench_function(name, |b| {
            b.iter_batched(
                || {
                    let dir = tempdir().unwrap();
                    let db = filled_db(dir.path(), flush);
                    (dir, db)
                },
                |(_dir, db)| {
                    for i in 0..N_KEYS {
                        assert!(db.get(key(i)).unwrap().is_some());
                    }
                },
                BatchSize::LargeInput,
            );
        });
    }
}

fn iterate_benchmark(c: &mut Criterion) {
    c.bench_function("db_iterate_10k", |b| {
        b.iter_batched(
            || {
                let dir = tempdir().unwrap();
                let db = filled_db(dir.path(), true);
                (dir, db)
            },
            |(_dir, db)| {
                let n = db.new_iterator(&ReadOptions::default()).unwrap().count();
                assert_eq!(n, N_KEYS);
            },
            BatchSize::LargeInput,
        );
    });
}

fn compact_benchmark(c: &mut Criterion) {
    c.bench_function("db_compact_range_10k", |b| {
        b.iter_batched(
            || {
                let dir = tempdir().unwrap();
                let db = filled_db(dir.path(), true);
                (dir, db)
            },
            |(_dir, db)| db.compact_range().unwrap(),
            BatchSize::LargeInput,
        );
    });
}

fn transaction_benchmark(c: &mut Criterion) {
    c.bench_function("txn_read_modify_write_1k", |b| {
        b.iter_batched(
            || {
                let dir = tempdir().unwrap();
                let db = OptimisticTransactionDb::open(dir.path(), &bench_options()).unwrap();
                (dir, db)
            },
            |(_dir, db)| {
                for i in 0..1_000 {
                    let mut txn = db.begin_transaction(&Default::default(), &Default::default());
                    txn.get_for_update(&ReadOptions::default(), key(i)).unwrap();
                    txn.put(key(i), vec![b'x'; VALUE_SIZE]).unwrap();
                    txn.commit().unwrap();
                }
            },
            BatchSize::LargeInput,
        );
    });
}

criterion_group!(
    benches,
    put_benchmark,
    batch_write_benchmark,
    get_benchmark,
    iterate_benchmark,
    compact_benchmark,
    transaction_benchmark
);
criterion_main!(benches);
