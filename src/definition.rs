//! Object definitions
//!
//! A definition is the recipe for a named object: the scope it lives in,
//! how to build it and, optionally, how to close it when its container is
//! deleted. Typed closures are erased when the definition is created so the
//! registry can hold heterogeneous objects under string names.

use crate::{BoxError, Container, DiError, Injectable};
use std::any::Any;
use std::sync::Arc;

/// A built object, shared between every caller that retrieves it.
pub type Instance = Arc<dyn Any + Send + Sync>;

/// Type-erased build function
pub(crate) type BuildFn = Arc<dyn Fn(&Container) -> Result<Instance, BoxError> + Send + Sync>;

/// Type-erased close function
pub(crate) type CloseFn = Arc<dyn Fn(&Instance) -> Result<(), BoxError> + Send + Sync>;

/// Declarative recipe for a named object.
///
/// # Examples
///
/// ```rust
/// use scoped_dic::{Builder, Definition, REQUEST};
///
/// struct Connection {
///     dsn: String,
/// }
///
/// let def = Definition::new("db")
///     .build(|_| Ok::<_, std::io::Error>(Connection { dsn: "postgres://localhost".into() }))
///     .close(|conn: &Connection| {
///         println!("closing {}", conn.dsn);
///         Ok::<_, std::io::Error>(())
///     });
///
/// let session = Definition::new("session")
///     .scope(REQUEST)
///     .build(|_| Ok::<_, std::io::Error>(String::from("anonymous")));
///
/// let mut builder = Builder::new(&[]).unwrap();
/// builder.add_all([def, session]).unwrap();
/// let app = builder.build();
/// assert!(app.contains("db"));
/// ```
#[derive(Clone)]
pub struct Definition {
    pub(crate) name: String,
    pub(crate) scope: Option<String>,
    pub(crate) build: Option<BuildFn>,
    pub(crate) close: Option<CloseFn>,
    pub(crate) unshared: bool,
    pub(crate) type_name: &'static str,
}

impl Definition {
    /// Start a definition. Without an explicit scope it belongs to the
    /// widest scope of the builder it is added to.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            scope: None,
            build: None,
            close: None,
            unshared: false,
            type_name: "<unbuilt>",
        }
    }

    /// Definition for an already built object, used by [`Builder::set`](crate::Builder::set).
    pub fn instance<T: Injectable>(name: impl Into<String>, value: T) -> Self {
        let instance: Instance = Arc::new(value);
        Self {
            name: name.into(),
            scope: None,
            build: Some(Arc::new(move |_| Ok(Arc::clone(&instance)))),
            close: None,
            unshared: false,
            type_name: std::any::type_name::<T>(),
        }
    }

    /// Declare the scope the object belongs to.
    pub fn scope(mut self, scope: impl Into<String>) -> Self {
        self.scope = Some(scope.into());
        self
    }

    /// Set the build function.
    ///
    /// The function receives the container that owns the object, so it can
    /// retrieve the object's own dependencies from it.
    pub fn build<T, E, F>(mut self, build: F) -> Self
    where
        T: Injectable,
        E: Into<BoxError>,
        F: Fn(&Container) -> Result<T, E> + Send + Sync + 'static,
    {
        self.build = Some(Arc::new(move |ctn| {
            build(ctn).map(|obj| Arc::new(obj) as Instance).map_err(Into::into)
        }));
        self.type_name = std::any::type_name::<T>();
        self
    }

    /// Set a build function that already returns a shared instance.
    ///
    /// Useful when the object is a trait object or comes from elsewhere as an `Arc`.
    pub fn build_arc<T, E, F>(mut self, build: F) -> Self
    where
        T: Injectable,
        E: Into<BoxError>,
        F: Fn(&Container) -> Result<Arc<T>, E> + Send + Sync + 'static,
    {
        self.build = Some(Arc::new(move |ctn| {
            build(ctn).map(|obj| obj as Instance).map_err(Into::into)
        }));
        self.type_name = std::any::type_name::<T>();
        self
    }

    /// Set the close function, called once when the owning container is deleted.
    ///
    /// If the built object is not a `T`, teardown reports a type mismatch
    /// for this object instead of calling the function.
    pub fn close<T, E, F>(mut self, close: F) -> Self
    where
        T: Injectable,
        E: Into<BoxError>,
        F: Fn(&T) -> Result<(), E> + Send + Sync + 'static,
    {
        let name = self.name.clone();
        self.close = Some(Arc::new(move |obj| match obj.downcast_ref::<T>() {
            Some(obj) => close(obj).map_err(Into::into),
            None => Err(Box::new(DiError::type_mismatch::<T>(name.as_str())) as BoxError),
        }));
        self
    }

    /// Build a fresh object on every retrieval instead of caching it.
    pub fn unshared(mut self) -> Self {
        self.unshared = true;
        self
    }

    /// Name of the object.
    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Declared scope, `None` until the definition is registered.
    #[inline]
    pub fn declared_scope(&self) -> Option<&str> {
        self.scope.as_deref()
    }

    /// Whether the object is rebuilt on every retrieval.
    #[inline]
    pub fn is_unshared(&self) -> bool {
        self.unshared
    }

    /// Whether a close function is set.
    #[inline]
    pub fn has_close(&self) -> bool {
        self.close.is_some()
    }

    /// Whether a build function is set.
    #[inline]
    pub fn has_build(&self) -> bool {
        self.build.is_some()
    }

    /// Type produced by the build function, for diagnostics.
    #[inline]
    pub fn type_name(&self) -> &'static str {
        self.type_name
    }
}

impl std::fmt::Debug for Definition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Definition")
            .field("name", &self.name)
            .field("scope", &self.scope)
            .field("type", &self.type_name)
            .field("has_build", &self.build.is_some())
            .field("has_close", &self.close.is_some())
            .field("unshared", &self.unshared)
            .finish()
    }
}
