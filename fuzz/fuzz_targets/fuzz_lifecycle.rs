#![no_main]

//! Fuzz target for deferred deletion
//!
//! Builds a random tree, then lets every owner call `delete` on its own
//! container in random order. Parents must close only after their last
//! child, and each close hook must run exactly once.

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;
use scoped_dic::{BoxError, Builder, Container, Definition, REQUEST, SUB_REQUEST};
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

#[derive(Debug, Arbitrary)]
struct Scenario {
    /// Sub-containers per request (each entry is one request)
    requests: Vec<u8>,
    /// Deletion order, as indexes into the container list
    order: Vec<u8>,
}

struct Node {
    container: Container,
    parent: Option<usize>,
    deleted: bool,
}

fuzz_target!(|scenario: Scenario| {
    let closes = Arc::new(AtomicU32::new(0));

    let mut builder = Builder::default();
    for (name, scope) in [("tx", REQUEST), ("step", SUB_REQUEST)] {
        let closes = Arc::clone(&closes);
        builder
            .add(
                Definition::new(name)
                    .scope(scope)
                    .build(|_| Ok::<_, BoxError>(()))
                    .close(move |_: &()| {
                        closes.fetch_add(1, Ordering::SeqCst);
                        Ok::<_, BoxError>(())
                    }),
            )
            .unwrap();
    }
    let app = builder.build();

    let mut nodes = vec![Node {
        container: app.clone(),
        parent: None,
        deleted: false,
    }];
    let mut built = 0;
    for subs in scenario.requests.iter().take(8) {
        let request = app.sub_container().unwrap();
        request.get("tx");
        built += 1;
        let request_index = nodes.len();
        nodes.push(Node {
            container: request.clone(),
            parent: Some(0),
            deleted: false,
        });
        for _ in 0..(subs % 4) {
            let sub = request.sub_container().unwrap();
            sub.get("step");
            built += 1;
            nodes.push(Node {
                container: sub,
                parent: Some(request_index),
                deleted: false,
            });
        }
    }

    let mut order: Vec<usize> = scenario
        .order
        .iter()
        .map(|&i| i as usize % nodes.len())
        .collect();
    order.extend(0..nodes.len());

    for index in order {
        if nodes[index].deleted {
            continue;
        }
        nodes[index].container.delete().unwrap();
        nodes[index].deleted = true;

        for (i, node) in nodes.iter().enumerate() {
            let open_children = nodes
                .iter()
                .any(|child| child.parent == Some(i) && !child.container.is_closed());
            // Closed exactly when deletion was requested and no child is left
            assert_eq!(node.container.is_closed(), node.deleted && !open_children);
        }
    }

    assert!(nodes.iter().all(|node| node.container.is_closed()));
    assert_eq!(closes.load(Ordering::SeqCst), built);
});
