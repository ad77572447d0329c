//! # Scoped DIC - Scoped Object Container for Rust
//!
//! A dependency injection container whose objects live in named scopes.
//! Containers form a tree with one level per scope: an application-wide
//! root, one child per request, one grandchild per sub-request. Objects are
//! built lazily in the container matching their scope, cached there, and
//! closed when that container is deleted.
//!
//! ## Features
//!
//! - **Scoped lifetimes** - objects are shared by every container below the one that owns them
//! - **Single build** - concurrent first retrievals run the build function once
//! - **Deterministic teardown** - close hooks run leaf-first when containers are deleted
//! - **Unscoped access** - narrower objects on demand from a wider container, released by `clean`
//! - **Typed keys** - `Key<T>` and `#[derive(Accessors)]` for typed retrieval
//! - **Observable** - optional tracing integration with JSON or pretty output
//!
//! ## Quick Start
//!
//! ```rust
//! use scoped_dic::{BoxError, Builder, Definition, REQUEST};
//! use std::sync::Arc;
//!
//! struct Database {
//!     url: String,
//! }
//!
//! struct CurrentUser {
//!     name: String,
//! }
//!
//! let mut builder = Builder::new(&[]).unwrap();
//! builder
//!     .add(Definition::new("db").build(|_| {
//!         Ok::<_, BoxError>(Database { url: "postgres://localhost".into() })
//!     }))
//!     .unwrap()
//!     .add(
//!         Definition::new("current-user")
//!             .scope(REQUEST)
//!             .build(|ctn| {
//!                 let db = ctn.safe_get_as::<Database>("db")?;
//!                 Ok::<_, BoxError>(CurrentUser { name: format!("loaded from {}", db.url) })
//!             }),
//!     )
//!     .unwrap();
//!
//! let app = builder.build();
//!
//! // One container per request
//! let request = app.sub_container().unwrap();
//! let user = request.get_as::<CurrentUser>("current-user");
//! assert_eq!(user.name, "loaded from postgres://localhost");
//!
//! // Deleting the request closes its objects; the database stays in `app`
//! request.delete().unwrap();
//! assert!(app.safe_get("db").is_ok());
//! ```
//!
//! ## Unscoped Access
//!
//! ```rust
//! use scoped_dic::{BoxError, Builder, Definition, REQUEST};
//!
//! let mut builder = Builder::new(&[]).unwrap();
//! builder
//!     .add(Definition::new("report").scope(REQUEST).build(|_| Ok::<_, BoxError>(42u32)))
//!     .unwrap();
//! let app = builder.build();
//!
//! // A background job in the app scope needs a request object
//! assert!(app.safe_get("report").is_err());
//! assert_eq!(*app.unscoped_get_as::<u32>("report"), 42);
//!
//! // Release the hidden request container
//! app.clean().unwrap();
//! ```

// Lets the derive macro's `::scoped_dic` paths resolve inside this crate
extern crate self as scoped_dic;

mod builder;
mod container;
pub mod context;
mod definition;
mod error;
#[cfg(feature = "logging")]
pub mod logging;
mod provider;
mod registry;
mod scope;
mod storage;
mod typed;

pub use builder::*;
pub use container::*;
pub use context::{ActiveContainer, resolve, try_resolve};
pub use definition::*;
pub use error::*;
pub use provider::*;
pub use scope::*;
pub use typed::*;

#[cfg(feature = "derive")]
pub use scoped_dic_derive::Accessors;

// Re-export tracing macros for convenience when logging feature is enabled
#[cfg(feature = "logging")]
pub use tracing::{debug, error, info, trace, warn};

// Re-export for convenience
pub use std::sync::Arc;

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::{
        ActiveContainer, BoxError, Builder, Container, DiError, Definition, Injectable, Instance,
        Key, Provider, Result, Scopes, APP, REQUEST, SUB_REQUEST,
    };
    pub use std::sync::Arc;
}
