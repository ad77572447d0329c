//! Typed object keys
//!
//! A [`Key`] pairs an object name with the Rust type its build function
//! produces, so retrieval returns `Arc<T>` without spelling out the type at
//! every call site.
//!
//! # Example
//!
//! ```rust
//! use scoped_dic::{BoxError, Builder, Key, REQUEST};
//!
//! struct Config {
//!     port: u16,
//! }
//!
//! struct Session {
//!     user: String,
//! }
//!
//! const CONFIG: Key<Config> = Key::new("config");
//! const SESSION: Key<Session> = Key::new("session");
//!
//! let mut builder = Builder::new(&[]).unwrap();
//! builder
//!     .add(CONFIG.define(|_| Ok::<_, BoxError>(Config { port: 8080 })))
//!     .unwrap()
//!     .add(SESSION.define(|_| Ok::<_, BoxError>(Session { user: "guest".into() })).scope(REQUEST))
//!     .unwrap();
//!
//! let app = builder.build();
//! let request = app.sub_container().unwrap();
//!
//! assert_eq!(CONFIG.get(&request).port, 8080);
//! assert_eq!(request.resolve(&SESSION).unwrap().user, "guest");
//! ```

use crate::context::{self, ActiveContainer};
use crate::{BoxError, Container, Definition, Injectable, Result};
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

/// Name of an object together with its type.
pub struct Key<T> {
    name: &'static str,
    _type: PhantomData<fn() -> T>,
}

impl<T> Key<T> {
    /// Create a key. Usable in `const` items.
    #[inline]
    pub const fn new(name: &'static str) -> Self {
        Self {
            name,
            _type: PhantomData,
        }
    }

    /// Object name
    #[inline]
    pub const fn name(&self) -> &'static str {
        self.name
    }
}

impl<T: Injectable> Key<T> {
    /// Start a definition for this key whose build function returns a `T`.
    pub fn define<E, F>(&self, build: F) -> Definition
    where
        E: Into<BoxError>,
        F: Fn(&Container) -> std::result::Result<T, E> + Send + Sync + 'static,
    {
        Definition::new(self.name).build(build)
    }

    /// Retrieve the object from `container`.
    #[inline]
    pub fn safe_get(&self, container: &Container) -> Result<Arc<T>> {
        container.safe_get_as(self.name)
    }

    /// Retrieve the object from `container`, aborting on error.
    #[inline]
    #[track_caller]
    pub fn get(&self, container: &Container) -> Arc<T> {
        container.get_as(self.name)
    }

    /// Retrieve the object even if it belongs to a narrower scope.
    #[inline]
    pub fn unscoped_safe_get(&self, container: &Container) -> Result<Arc<T>> {
        container.unscoped_safe_get_as(self.name)
    }

    #[inline]
    #[track_caller]
    pub fn unscoped_get(&self, container: &Container) -> Arc<T> {
        container.unscoped_get_as(self.name)
    }

    /// Retrieve the object from whatever container `carrier` holds.
    ///
    /// Aborts if the carrier has no container or the retrieval fails.
    #[track_caller]
    pub fn from_context<C: ActiveContainer + ?Sized>(&self, carrier: &C) -> Arc<T> {
        self.get(&context::resolve(carrier))
    }
}

impl<T> Clone for Key<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for Key<T> {}

impl<T> PartialEq for Key<T> {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
    }
}

impl<T> Eq for Key<T> {}

impl<T> fmt::Debug for Key<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Key")
            .field("name", &self.name)
            .field("type", &std::any::type_name::<T>())
            .finish()
    }
}

impl<T> fmt::Display for Key<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name)
    }
}

impl Container {
    /// Retrieve the object behind a typed key.
    #[inline]
    pub fn resolve<T: Injectable>(&self, key: &Key<T>) -> Result<Arc<T>> {
        key.safe_get(self)
    }

    /// Unscoped retrieval of the object behind a typed key.
    #[inline]
    pub fn unscoped_resolve<T: Injectable>(&self, key: &Key<T>) -> Result<Arc<T>> {
        key.unscoped_safe_get(self)
    }
}
