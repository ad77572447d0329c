#![no_main]

//! Fuzz target for concurrent retrievals and teardown
//!
//! Threads hammer the same request containers while one of them may delete
//! the tree; builds must run once per container and close hooks at most once.

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;
use scoped_dic::{APP, BoxError, Builder, Container, Definition, REQUEST};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;

#[derive(Debug)]
struct Tracked {
    id: u64,
}

/// Thread operation
#[derive(Debug, Clone, Arbitrary)]
enum ThreadOp {
    GetApp,
    GetRequest(u8),
    UnscopedGet,
    NewRequest,
    DeleteRequest(u8),
}

/// Concurrent test scenario
#[derive(Debug, Arbitrary)]
struct ConcurrentScenario {
    // Number of threads (clamped to 1-8)
    thread_count: u8,
    // Operations per thread (clamped)
    ops_per_thread: Vec<ThreadOp>,
    // Whether the root is deleted while threads run
    delete_root: bool,
}

fuzz_target!(|scenario: ConcurrentScenario| {
    let ids = Arc::new(AtomicU64::new(0));
    let closes: Arc<Mutex<HashMap<u64, u32>>> = Arc::default();

    let mut builder = Builder::default();
    for (name, scope) in [("app-obj", APP), ("request-obj", REQUEST)] {
        let ids = Arc::clone(&ids);
        let closes = Arc::clone(&closes);
        builder
            .add(
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
                    }),
            )
            .unwrap();
    }
    let app = builder.build();
    let requests: Vec<Container> = (0..4).map(|_| app.sub_container().unwrap()).collect();

    // Clamp thread count
    let thread_count = (scenario.thread_count % 8).max(1) as usize;
    let ops: Vec<ThreadOp> = scenario.ops_per_thread.into_iter().take(50).collect();

    thread::scope(|s| {
        for _ in 0..thread_count {
            s.spawn(|| {
                for op in &ops {
                    match op {
                        ThreadOp::GetApp => {
                            if let Ok(a) = app.safe_get("app-obj") {
                                if let Ok(b) = app.safe_get("app-obj") {
                                    assert!(Arc::ptr_eq(&a, &b));
                                }
                            }
                        }
                        ThreadOp::GetRequest(i) => {
                            let request = &requests[*i as usize % requests.len()];
                            if let Err(err) = request.safe_get("request-obj") {
                                assert!(err.is_closed() || matches!(err, scoped_dic::DiError::ParentDropped));
                            }
                        }
                        ThreadOp::UnscopedGet => {
                            let _ = app.unscoped_safe_get("request-obj");
                        }
                        ThreadOp::NewRequest => {
                            if let Ok(request) = app.sub_container() {
                                let _ = request.safe_get("request-obj");
                                let _ = request.delete();
                            }
                        }
                        ThreadOp::DeleteRequest(i) => {
                            let _ = requests[*i as usize % requests.len()].delete();
                        }
                    }
                }
            });
        }

        if scenario.delete_root {
            let _ = app.delete_with_sub_containers();
        }
    });

    let _ = app.delete_with_sub_containers();
    assert!(requests.iter().all(Container::is_closed));

    let closes = closes.lock().unwrap();
    assert_eq!(closes.len() as u64, ids.load(Ordering::SeqCst));
    assert!(closes.values().all(|&n| n == 1), "no object is closed twice");
});
