//! End-to-end persistence behavior across instances, restarts and databases,
//! run against every backend.

use bytes::Bytes;
use flashkv_persist::storage::{now_secs, BackendKind, KeyStore, Value};
use flashkv_persist::{Database, Server, ServerId, StorageConfig};
use std::collections::HashSet;
use std::fs;
use std::path::Path;
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::Duration;
use tempfile::TempDir;

const BACKENDS: [BackendKind; 3] = [
    BackendKind::WholeFile,
    BackendKind::PerKey,
    BackendKind::PerKeySweep,
];

const SERVER: &str = "localhost:6379:v7";

/// A fresh backend instance on `root`, as a new process would open it.
fn open(root: &Path, backend: BackendKind) -> Server {
    let config = StorageConfig {
        root: root.to_path_buf(),
        backend,
        server_id: Some(SERVER.to_string()),
        ..Default::default()
    };
    Server::new(config.server_id(), config.open().unwrap())
}

fn get_str(db: &Database, key: &str) -> Option<Bytes> {
    match db.get(key.as_bytes()).unwrap()? {
        Value::Bytes(b) => Some(b),
        other => panic!("expected bytes, got {other:?}"),
    }
}

/// Read-increment-write, the way a dispatcher implements INCR.
fn incr(db: &Database, key: &str) -> i64 {
    let current = get_str(db, key)
        .map(|b| std::str::from_utf8(&b).unwrap().parse::<i64>().unwrap())
        .unwrap_or(0);
    let next = current + 1;
    db.set(key.as_bytes(), Value::bytes(next.to_string())).unwrap();
    next
}

fn key_set(db: &Database, pattern: &str) -> HashSet<Bytes> {
    db.scan(pattern).unwrap().collect()
}

#[test]
fn test_instances_observe_each_other() {
    for backend in BACKENDS {
        let tmp = TempDir::new().unwrap();
        let conn1 = open(tmp.path(), backend).db(0);
        let conn2 = open(tmp.path(), backend).db(0);

        conn1.set(b"test:key", Value::bytes("value1")).unwrap();
        conn1.set(b"counter", Value::bytes("1")).unwrap();

        assert_eq!(get_str(&conn2, "test:key"), Some(Bytes::from("value1")), "{backend}");
        assert_eq!(get_str(&conn2, "counter"), Some(Bytes::from("1")), "{backend}");

        conn2.set(b"test:key", Value::bytes("value2")).unwrap();
        assert_eq!(incr(&conn2, "counter"), 2);

        assert_eq!(get_str(&conn1, "test:key"), Some(Bytes::from("value2")), "{backend}");
        assert_eq!(get_str(&conn1, "counter"), Some(Bytes::from("2")), "{backend}");
    }
}

#[test]
fn test_counter_item_scenario() {
    for backend in BACKENDS {
        let tmp = TempDir::new().unwrap();
        let first = open(tmp.path(), backend);
        let store = first.store();

        let one = Value::item(Value::bytes("1"), None);
        store.save_key(SERVER, 0, b"counter", &one, None).unwrap();
        assert_eq!(store.load_key(SERVER, 0, b"counter").unwrap(), Some(one));

        let two = Value::item(Value::bytes("2"), None);
        store.save_key(SERVER, 0, b"counter", &two, None).unwrap();

        let second = open(tmp.path(), backend);
        assert_eq!(
            second.store().load_key(SERVER, 0, b"counter").unwrap(),
            Some(two),
            "{backend}"
        );
    }
}

#[test]
fn test_data_survives_restart() {
    for backend in BACKENDS {
        let tmp = TempDir::new().unwrap();
        {
            let db = open(tmp.path(), backend).db(0);
            db.set(b"persistent_key", Value::bytes("persist_value")).unwrap();
            db.set(b"list_key", Value::list(["item1", "item2"])).unwrap();
            db.set(b"hash_key", Value::hash([("field1", "value1")])).unwrap();
        }

        let db = open(tmp.path(), backend).db(0);
        assert_eq!(
            get_str(&db, "persistent_key"),
            Some(Bytes::from("persist_value"))
        );
        assert_eq!(
            db.get(b"list_key").unwrap(),
            Some(Value::list(["item1", "item2"])),
            "{backend}"
        );
        match db.get(b"hash_key").unwrap() {
            Some(Value::Hash(hash)) => {
                assert_eq!(hash.get(&b"field1"[..]), Some(&Bytes::from("value1")))
            }
            other => panic!("{backend}: expected hash, got {other:?}"),
        }
    }
}

#[test]
fn test_whole_file_directory_structure() {
    let tmp = TempDir::new().unwrap();
    let server = open(tmp.path(), BackendKind::WholeFile);
    for n in 0..3 {
        server.db(n).set(format!("db{n}_key").as_bytes(), Value::bytes("v")).unwrap();
    }

    let server_dirs: Vec<_> = fs::read_dir(tmp.path()).unwrap().collect();
    assert_eq!(server_dirs.len(), 1);

    let server_dir = tmp.path().join(SERVER);
    for name in ["db0.json", "db1.json", "db2.json"] {
        assert!(server_dir.join(name).is_file(), "missing {name}");
    }
}

#[test]
fn test_per_key_directory_structure() {
    let tmp = TempDir::new().unwrap();

    open(tmp.path(), BackendKind::PerKey)
        .db(0)
        .set(b"test_key", Value::bytes("v"))
        .unwrap();
    open(tmp.path(), BackendKind::PerKeySweep)
        .db(1)
        .set(b"test_key", Value::bytes("v"))
        .unwrap();

    let server_dir = tmp.path().join(SERVER);
    assert!(server_dir.join("db0").join("dGVzdF9rZXk=.json").is_file());
    assert!(server_dir.join("db1").join("dGVzdF9rZXk=.mjson").is_file());
}

#[test]
fn test_databases_are_isolated() {
    for backend in BACKENDS {
        let tmp = TempDir::new().unwrap();
        {
            let server = open(tmp.path(), backend);
            for n in 0..3 {
                let key = format!("db{n}_key");
                let value = format!("db{n}_value");
                server.db(n).set(key.as_bytes(), Value::bytes(value)).unwrap();
            }
        }

        let server = open(tmp.path(), backend);
        let (db0, db1, db2) = (server.db(0), server.db(1), server.db(2));

        assert_eq!(get_str(&db0, "db0_key"), Some(Bytes::from("db0_value")));
        assert_eq!(get_str(&db0, "db1_key"), None, "{backend}");
        assert_eq!(get_str(&db1, "db1_key"), Some(Bytes::from("db1_value")));
        assert_eq!(get_str(&db1, "db0_key"), None, "{backend}");
        assert_eq!(get_str(&db2, "db2_key"), Some(Bytes::from("db2_value")));
        assert_eq!(get_str(&db2, "db0_key"), None, "{backend}");
    }
}

#[test]
fn test_server_identities_are_isolated() {
    for backend in BACKENDS {
        let tmp = TempDir::new().unwrap();
        let store = open(tmp.path(), backend).store().clone();

        let a = Server::new(ServerId::from_address("localhost", 6379, 7), Arc::clone(&store));
        let b = Server::new(ServerId::from_address("localhost", 6380, 7), store);

        a.db(0).set(b"shared", Value::bytes("a")).unwrap();
        assert_eq!(b.db(0).get(b"shared").unwrap(), None, "{backend}");
    }
}

#[test]
fn test_expiry_and_enumeration() {
    for backend in BACKENDS {
        let tmp = TempDir::new().unwrap();
        let db = open(tmp.path(), backend).db(0);

        db.set(b"a", Value::bytes("1")).unwrap();
        db.set_at(b"b", &Value::bytes("2"), Some(now_secs() - 1.0)).unwrap();

        assert_eq!(key_set(&db, "*"), HashSet::from([Bytes::from("a")]), "{backend}");
        assert_eq!(db.get(b"b").unwrap(), None);
        assert_eq!(db.ttl(b"b").unwrap(), -2);
        assert_eq!(db.ttl(b"a").unwrap(), -1);
    }
}

#[test]
fn test_pattern_scan() {
    for backend in BACKENDS {
        let tmp = TempDir::new().unwrap();
        let db = open(tmp.path(), backend).db(0);

        for key in ["foo1", "foo2", "bar1"] {
            db.set(key.as_bytes(), Value::bytes("v")).unwrap();
        }

        assert_eq!(
            key_set(&db, "foo*"),
            HashSet::from([Bytes::from("foo1"), Bytes::from("foo2")]),
            "{backend}"
        );
    }
}

#[test]
fn test_flush_db_empties_one_database() {
    for backend in BACKENDS {
        let tmp = TempDir::new().unwrap();
        let server = open(tmp.path(), backend);

        server.db(0).set(b"keep", Value::bytes("v")).unwrap();
        server.db(1).set(b"drop", Value::bytes("v")).unwrap();

        server.db(1).flush().unwrap();

        assert!(server.db(1).is_empty().unwrap(), "{backend}");
        assert_eq!(get_str(&server.db(0), "keep"), Some(Bytes::from("v")));
    }
}

#[test]
fn test_flush_all_reaches_every_server() {
    for backend in BACKENDS {
        let tmp = TempDir::new().unwrap();
        let store = open(tmp.path(), backend).store().clone();
        let a = Server::new(ServerId::new("a"), Arc::clone(&store));
        let b = Server::new(ServerId::new("b"), store);

        a.db(0).set(b"k", Value::bytes("v")).unwrap();
        b.db(4).set(b"k", Value::bytes("v")).unwrap();

        a.flush_all().unwrap();

        assert!(a.db(0).is_empty().unwrap(), "{backend}");
        assert!(b.db(4).is_empty().unwrap(), "{backend}");
    }
}

#[test]
fn test_concurrent_writers_lose_nothing() {
    for backend in BACKENDS {
        let tmp = TempDir::new().unwrap();
        let server = Arc::new(open(tmp.path(), backend));

        let handles: Vec<_> = (0..4)
            .map(|t| {
                let server = Arc::clone(&server);
                thread::spawn(move || {
                    let db = server.db(0);
                    for i in 0..25 {
                        let key = format!("t{t}:{i}");
                        db.set(key.as_bytes(), Value::bytes("v")).unwrap();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(server.db(0).len().unwrap(), 100, "{backend}");
    }
}

#[test]
fn test_expire_racing_delete_never_resurrects() {
    for backend in BACKENDS {
        let tmp = TempDir::new().unwrap();
        let server = Arc::new(open(tmp.path(), backend));

        for round in 0..50 {
            let db = server.db(0);
            db.set(b"k", Value::bytes(format!("v{round}"))).unwrap();

            let barrier = Arc::new(Barrier::new(2));
            let expirer = {
                let (db, barrier) = (server.db(0), Arc::clone(&barrier));
                thread::spawn(move || {
                    barrier.wait();
                    db.expire(b"k", Duration::from_secs(100)).unwrap();
                    db.persist(b"k").unwrap();
                })
            };
            let deleter = {
                let (db, barrier) = (server.db(0), Arc::clone(&barrier));
                thread::spawn(move || {
                    barrier.wait();
                    assert!(db.delete(b"k").unwrap());
                })
            };
            expirer.join().unwrap();
            deleter.join().unwrap();

            assert_eq!(db.get(b"k").unwrap(), None, "{backend} round {round}");
        }
    }
}

#[test]
fn test_binary_keys_and_values() {
    for backend in BACKENDS {
        let tmp = TempDir::new().unwrap();
        let db = open(tmp.path(), backend).db(0);
        let key = b"\x00bin\xff/../key";
        let value = Value::bytes(&b"\x80\x81\xfe\xff"[..]);

        db.set(key, value.clone()).unwrap();

        let reopened = open(tmp.path(), backend).db(0);
        assert_eq!(reopened.get(key).unwrap(), Some(value), "{backend}");
        let keys: Vec<Bytes> = reopened.keys().unwrap().collect();
        assert_eq!(keys, vec![Bytes::from_static(key)]);
    }
}
