#![no_main]

//! Fuzz target for scope rules with arbitrary scope lists
//!
//! Builds a container tree over a random scope list and checks where each
//! object is cached and which retrievals are rejected.

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;
use scoped_dic::{BoxError, Builder, Container, Definition, DiError};
use std::sync::Arc;

#[derive(Debug, Arbitrary)]
struct Scenario {
    /// Number of scopes (clamped to 1-6)
    depth: u8,
    /// (container depth, object scope) retrievals
    gets: Vec<(u8, u8)>,
    unscoped: bool,
}

fuzz_target!(|scenario: Scenario| {
    let depth = (scenario.depth % 6).max(1) as usize;
    let scopes: Vec<String> = (0..depth).map(|i| format!("scope-{i}")).collect();
    let scope_refs: Vec<&str> = scopes.iter().map(String::as_str).collect();

    let mut builder = Builder::new(&scope_refs).unwrap();
    for (i, scope) in scopes.iter().enumerate() {
        builder
            .add(
                Definition::new(format!("obj-{i}"))
                    .scope(scope.as_str())
                    .build(move |_| Ok::<_, BoxError>(i)),
            )
            .unwrap();
    }

    let root = builder.build();
    assert_eq!(root.scope(), scopes[0]);

    // One container per scope, each the child of the previous one
    let mut chain: Vec<Container> = vec![root.clone()];
    while chain.len() < depth {
        let next = chain[chain.len() - 1].sub_container().unwrap();
        chain.push(next);
    }
    assert!(matches!(
        chain[depth - 1].sub_container(),
        Err(DiError::NoSubScope { .. })
    ));

    for (at, object) in scenario.gets.into_iter().take(64) {
        let at = at as usize % depth;
        let object = object as usize % depth;
        let name = format!("obj-{object}");
        let ctn = &chain[at];

        let result = if scenario.unscoped {
            ctn.unscoped_safe_get_as::<usize>(&name)
        } else {
            ctn.safe_get_as::<usize>(&name)
        };

        if object <= at || scenario.unscoped {
            assert_eq!(*result.unwrap(), object);
            if object <= at {
                // Cached in the container of its own scope
                assert!(chain[object].is_built(&name));
                let direct = chain[object].safe_get_as::<usize>(&name).unwrap();
                assert!(Arc::ptr_eq(&direct, &ctn.safe_get_as::<usize>(&name).unwrap()));
            }
        } else {
            assert!(result.unwrap_err().is_scope_mismatch());
        }
    }

    root.clean().unwrap();
    root.delete_with_sub_containers().unwrap();
    assert!(chain.iter().all(Container::is_closed));
});
