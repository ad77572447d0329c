#![no_main]

//! Fuzz target for container tree operations
//!
//! Runs random sequences of sub-container creation, retrieval and deletion
//! and checks that every built object is closed exactly once.

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;
use scoped_dic::{APP, BoxError, Builder, Container, Definition, REQUEST, SUB_REQUEST};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

#[derive(Debug)]
struct Tracked {
    id: u64,
}

#[derive(Debug, Arbitrary)]
enum Object {
    App,
    Request,
    SubRequest,
    Unshared,
    Flaky,
}

impl Object {
    fn name(&self) -> &'static str {
        match self {
            Object::App => "app-obj",
            Object::Request => "request-obj",
            Object::SubRequest => "sub-obj",
            Object::Unshared => "unshared-obj",
            Object::Flaky => "flaky-obj",
        }
    }
}

#[derive(Debug, Arbitrary)]
enum TreeOp {
    SubContainer(u8),
    Get(u8, Object),
    UnscopedGet(u8, Object),
    Clean(u8),
    Delete(u8),
    DeleteWithSubContainers(u8),
}

type Closes = Arc<Mutex<HashMap<u64, u32>>>;

fn tracked(name: &str, scope: &str, ids: &Arc<AtomicU64>, closes: &Closes) -> Definition {
    let ids = Arc::clone(ids);
    let closes = Arc::clone(closes);
    Definition::new(name)
        .scope(scope)
        .build(move |_| {
            Ok::<_, BoxError>(Tracked {
                id: ids.fetch_add(1, Ordering::SeqCst),
            })
        })
        .close(move |obj: &Tracked| {
            *closes.lock().unwrap().entry(obj.id).or_default() += 1;
            Ok::<_, BoxError>(())
        })
}

fuzz_target!(|ops: Vec<TreeOp>| {
    let ids = Arc::new(AtomicU64::new(0));
    let closes: Closes = Arc::default();
    let attempts = Arc::new(AtomicU64::new(0));

    let mut builder = Builder::default();
    builder
        .add_all([
            tracked("app-obj", APP, &ids, &closes),
            tracked("request-obj", REQUEST, &ids, &closes),
            tracked("sub-obj", SUB_REQUEST, &ids, &closes),
            tracked("unshared-obj", REQUEST, &ids, &closes).unshared(),
            Definition::new("flaky-obj").build(move |_| {
                if attempts.fetch_add(1, Ordering::SeqCst) % 2 == 0 {
                    Err("flaky")
                } else {
                    Ok(0u8)
                }
            }),
        ])
        .unwrap();

    let app = builder.build();
    let mut containers: Vec<Container> = vec![app.clone()];

    for op in ops.into_iter().take(200) {
        match op {
            TreeOp::SubContainer(i) => {
                let parent = &containers[i as usize % containers.len()];
                match parent.sub_container() {
                    Ok(child) => containers.push(child),
                    Err(err) => assert!(err.is_closed() || parent.sub_scopes().is_empty()),
                }
            }
            TreeOp::Get(i, obj) => {
                let ctn = &containers[i as usize % containers.len()];
                let first = ctn.safe_get(obj.name());
                if ctn.is_closed() {
                    assert!(first.unwrap_err().is_closed());
                } else if let (Ok(a), Object::App | Object::Request | Object::SubRequest) =
                    (&first, &obj)
                {
                    let b = ctn.safe_get(obj.name()).unwrap();
                    assert!(Arc::ptr_eq(a, &b), "cached objects must be identical");
                }
            }
            TreeOp::UnscopedGet(i, obj) => {
                let ctn = &containers[i as usize % containers.len()];
                if let Err(err) = ctn.unscoped_safe_get(obj.name()) {
                    assert!(!err.is_scope_mismatch());
                }
            }
            TreeOp::Clean(i) => {
                let _ = containers[i as usize % containers.len()].clean();
            }
            TreeOp::Delete(i) => {
                let _ = containers[i as usize % containers.len()].delete();
            }
            TreeOp::DeleteWithSubContainers(i) => {
                let ctn = &containers[i as usize % containers.len()];
                let was_closed = ctn.is_closed();
                let result = ctn.delete_with_sub_containers();
                assert_eq!(was_closed, result.is_err());
                assert!(ctn.is_closed());
            }
        }
    }

    let _ = app.delete_with_sub_containers();
    assert!(containers.iter().all(Container::is_closed));

    let closes = closes.lock().unwrap();
    let built = ids.load(Ordering::SeqCst);
    assert_eq!(closes.len() as u64, built, "every built object is closed");
    assert!(closes.values().all(|&n| n == 1), "no object is closed twice");
});
