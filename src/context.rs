//! Locating the active container
//!
//! Code deep in a call chain often only has a request, a handler state or
//! some other carrier at hand. [`ActiveContainer`] is the capability "exposes
//! the container to use", and [`resolve`] turns any such carrier into a
//! [`Container`].
//!
//! ```rust
//! use scoped_dic::{ActiveContainer, Builder, Container, context};
//!
//! struct Request {
//!     path: String,
//!     container: Container,
//! }
//!
//! impl ActiveContainer for Request {
//!     fn active_container(&self) -> Option<Container> {
//!         Some(self.container.clone())
//!     }
//! }
//!
//! let app = Builder::new(&[]).unwrap().build();
//! let req = Request {
//!     path: "/users".into(),
//!     container: app.sub_container().unwrap(),
//! };
//!
//! assert_eq!(context::resolve(&req).scope(), "request");
//! ```

use crate::{Container, DiError, Result};
use std::sync::Arc;

/// A value that can expose the container to retrieve objects from.
pub trait ActiveContainer {
    /// The container, or `None` if this value does not carry one.
    fn active_container(&self) -> Option<Container>;
}

impl ActiveContainer for Container {
    #[inline]
    fn active_container(&self) -> Option<Container> {
        Some(self.clone())
    }
}

impl<T: ActiveContainer + ?Sized> ActiveContainer for &T {
    #[inline]
    fn active_container(&self) -> Option<Container> {
        (**self).active_container()
    }
}

impl<T: ActiveContainer + ?Sized> ActiveContainer for Arc<T> {
    #[inline]
    fn active_container(&self) -> Option<Container> {
        (**self).active_container()
    }
}

impl<T: ActiveContainer> ActiveContainer for Option<T> {
    #[inline]
    fn active_container(&self) -> Option<Container> {
        self.as_ref().and_then(ActiveContainer::active_container)
    }
}

/// Find the container carried by `carrier`.
///
/// # Errors
///
/// [`DiError::NoActiveContainer`] if the carrier has none.
pub fn try_resolve<C: ActiveContainer + ?Sized>(carrier: &C) -> Result<Container> {
    carrier
        .active_container()
        .ok_or(DiError::NoActiveContainer)
}

/// Find the container carried by `carrier`, aborting if there is none.
#[track_caller]
pub fn resolve<C: ActiveContainer + ?Sized>(carrier: &C) -> Container {
    try_resolve(carrier).unwrap_or_else(|err| err.abort())
}

#[cfg(feature = "async")]
mod task {
    use super::*;
    use std::future::Future;

    tokio::task_local! {
        static ACTIVE: Container;
    }

    /// Run `fut` with `container` as the active container of the task.
    ///
    /// Nested calls shadow the outer container until the inner future
    /// completes.
    pub async fn with_container<F>(container: Container, fut: F) -> F::Output
    where
        F: Future,
    {
        #[cfg(feature = "logging")]
        tracing::trace!(
            target: "scoped_dic",
            container_id = container.id().id(),
            scope = container.scope(),
            "Entering task container"
        );

        ACTIVE.scope(container, fut).await
    }

    /// Active container of the current task, if any.
    pub fn current() -> Option<Container> {
        ACTIVE.try_with(Container::clone).ok()
    }

    /// Carrier resolving to the active container of the current task.
    #[derive(Debug, Clone, Copy, Default)]
    pub struct TaskContext;

    impl ActiveContainer for TaskContext {
        #[inline]
        fn active_container(&self) -> Option<Container> {
            current()
        }
    }
}

#[cfg(feature = "async")]
pub use task::{TaskContext, current, with_container};
