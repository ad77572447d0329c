//! Definition registry shared by every container of a tree

use crate::{Definition, Scopes};
use ahash::RandomState;
use std::collections::HashMap;

/// A validated definition with its scope resolved to a position.
#[derive(Clone, Debug)]
pub(crate) struct Registered {
    pub def: Definition,
    pub scope_index: usize,
}

impl Registered {
    #[inline]
    pub fn name(&self) -> &str {
        &self.def.name
    }
}

/// Immutable set of definitions, built once by the [`Builder`](crate::Builder).
pub(crate) struct Registry {
    scopes: Scopes,
    definitions: HashMap<String, Registered, RandomState>,
}

impl Registry {
    pub fn new(scopes: Scopes, definitions: HashMap<String, Registered, RandomState>) -> Self {
        Self {
            scopes,
            definitions,
        }
    }

    #[inline]
    pub fn scopes(&self) -> &Scopes {
        &self.scopes
    }

    #[inline]
    pub fn get(&self, name: &str) -> Option<&Registered> {
        self.definitions.get(name)
    }

    /// Scope name at a position of the scope list.
    #[inline]
    pub fn scope_name(&self, index: usize) -> &str {
        self.scopes.get(index).unwrap_or_default()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.definitions.len()
    }
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registry")
            .field("scopes", &self.scopes)
            .field("definitions", &self.definitions.len())
            .finish()
    }
}
