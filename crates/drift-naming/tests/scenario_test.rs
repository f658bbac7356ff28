//! End-to-end scenarios: naming server plus live storage servers on
//! loopback, driven the way a client would drive them.

mod common;

use std::sync::Arc;
use std::thread;

use common::*;
use drift_proto::{Service, ServiceError, ServiceStub, Storage, StorageError, StorageStub, VPath};
use drift_rmi::RmiError;

#[test]
fn happy_path_register_resolve_read() {
    let naming = start_naming(20);
    let storage = start_storage(&naming, &[("/a/b.txt", b"hello bytes"), ("/a/c.txt", b"sea")]);
    let client = service_stub(&naming);

    // Registration reported no duplicates, so nothing was pruned.
    assert!(storage.has_local("/a/b.txt"));
    assert!(storage.has_local("/a/c.txt"));

    let stub = client.get_storage(&p("/a/b.txt")).unwrap();
    let size = stub.size(&p("/a/b.txt")).unwrap();
    assert_eq!(size, 11);
    assert_eq!(stub.read(&p("/a/b.txt"), 0, size as u32).unwrap(), b"hello bytes");

    naming.stop();
}

#[test]
fn duplicate_pruning_on_second_registration() {
    let naming = start_naming(20);
    let s1 = start_storage(&naming, &[("/x", b"one"), ("/d/e/shared", b"deep")]);
    let s2 = start_storage(
        &naming,
        &[("/x", b"two"), ("/d/e/shared", b"deep2"), ("/y", b"why")],
    );
    let client = service_stub(&naming);

    // S2's duplicates were deleted locally and the emptied directory
    // chain pruned up to (but not including) the root.
    assert!(!s2.has_local("/x"));
    assert!(!s2.has_local("/d/e/shared"));
    assert!(!s2.has_local("/d"));
    assert!(s2.has_local("/y"));

    // S1 keeps its copies.
    assert!(s1.has_local("/x"));
    assert!(s1.has_local("/d/e/shared"));

    let mut top = client.list(&p("/")).unwrap();
    top.sort();
    assert_eq!(
        top,
        vec!["d".to_string(), "x".to_string(), "y".to_string()]
    );

    // /x resolves to S1 — the first registrant won.
    let expected = StorageStub::with_host("127.0.0.1", s1.client_port()).unwrap();
    assert_eq!(client.get_storage(&p("/x")).unwrap(), expected);
    assert_eq!(
        client.get_storage(&p("/x")).unwrap().read(&p("/x"), 0, 3).unwrap(),
        b"one"
    );

    naming.stop();
}

#[test]
fn read_threshold_triggers_replication() {
    let naming = start_naming(20);
    let _s1 = start_storage(&naming, &[("/y", b"payload")]);
    let s2 = start_storage(&naming, &[]);
    let client = service_stub(&naming);

    assert_eq!(naming.replica_count(&p("/y")), Some(1));

    for _ in 0..20 {
        let stub = client.get_storage(&p("/y")).unwrap();
        assert_eq!(stub.read(&p("/y"), 0, 7).unwrap(), b"payload");
    }

    // The 20th shared acquisition crossed the threshold: the file now
    // lives on both servers and the counter is reset.
    assert_eq!(naming.replica_count(&p("/y")), Some(2));
    assert_eq!(naming.shared_reads(&p("/y")), Some(0));
    assert!(s2.has_local("/y"));
    assert_eq!(
        std::fs::read(p("/y").to_local(s2.dir.path())).unwrap(),
        b"payload"
    );

    naming.stop();
}

#[test]
fn exclusive_lock_invalidates_extra_replicas() {
    let naming = start_naming(20);
    let s1 = start_storage(&naming, &[("/y", b"payload")]);
    let s2 = start_storage(&naming, &[]);
    let client = service_stub(&naming);

    for _ in 0..20 {
        client.get_storage(&p("/y")).unwrap();
    }
    assert_eq!(naming.replica_count(&p("/y")), Some(2));

    client.lock(&p("/y"), true).unwrap();
    client.unlock(&p("/y"), true).unwrap();

    assert_eq!(naming.replica_count(&p("/y")), Some(1));
    // Exactly one server still holds the bytes, and it is the one the
    // naming server kept.
    assert_eq!(
        s1.has_local("/y") as usize + s2.has_local("/y") as usize,
        1
    );
    let survivor = client.get_storage(&p("/y")).unwrap();
    assert_eq!(survivor.read(&p("/y"), 0, 7).unwrap(), b"payload");

    naming.stop();
}

#[test]
fn ascending_lock_order_is_deadlock_free() {
    let naming = start_naming(200);
    let _storage = start_storage(
        &naming,
        &[("/bin/cat", b"meow"), ("/etc/dfs/conf.txt", b"conf")],
    );
    let client = Arc::new(service_stub(&naming));

    // Each worker locks its set in ascending path order, as the ordering
    // contract prescribes, and releases in reverse.
    fn lock_set(client: &ServiceStub, set: &mut [VPath]) {
        set.sort();
        for path in set.iter() {
            client.lock(path, true).unwrap();
        }
        for path in set.iter().rev() {
            client.unlock(path, true).unwrap();
        }
    }

    let first = {
        let client = Arc::clone(&client);
        thread::spawn(move || {
            let mut set = vec![p("/etc"), p("/bin/cat")];
            for _ in 0..25 {
                lock_set(&client, &mut set);
            }
        })
    };
    let second = {
        let client = Arc::clone(&client);
        thread::spawn(move || {
            let mut set = vec![p("/bin/cat"), p("/etc/dfs/conf.txt")];
            for _ in 0..25 {
                lock_set(&client, &mut set);
            }
        })
    };

    first.join().unwrap();
    second.join().unwrap();

    naming.stop();
}

#[test]
fn stopped_storage_surfaces_transport_errors_only_for_itself() {
    let naming = start_naming(200);
    let s1 = start_storage(&naming, &[("/gone", b"bye")]);
    let _s2 = start_storage(&naming, &[("/stays", b"hi")]);
    let client = service_stub(&naming);

    let doomed = client.get_storage(&p("/gone")).unwrap();
    let healthy = client.get_storage(&p("/stays")).unwrap();

    assert_eq!(doomed.read(&p("/gone"), 0, 3).unwrap(), b"bye");

    s1.server.stop();

    match doomed.read(&p("/gone"), 0, 3) {
        Err(StorageError::Rmi(RmiError::Connect { .. }))
        | Err(StorageError::Rmi(RmiError::Io(_))) => {}
        other => panic!("expected a transport error, got {other:?}"),
    }

    // Other stubs are untouched.
    assert_eq!(healthy.read(&p("/stays"), 0, 2).unwrap(), b"hi");

    naming.stop();
}

#[test]
fn register_response_paths_already_existed() {
    let naming = start_naming(20);
    let _s1 = start_storage(&naming, &[("/x", b"one")]);
    let s2 = start_storage(&naming, &[("/x", b"two"), ("/y", b"why")]);
    let client = service_stub(&naming);

    // The path S2 was told to delete is exactly the one that already
    // existed, and it is still resolvable after the pruning.
    assert!(!s2.has_local("/x"));
    assert!(client.get_storage(&p("/x")).is_ok());
    assert!(client.get_storage(&p("/y")).is_ok());
    assert!(matches!(
        client.get_storage(&p("/z")),
        Err(ServiceError::NotFound(_))
    ));

    naming.stop();
}
