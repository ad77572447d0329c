//! Provider traits
//!
//! These traits define what types can be stored in a container and where
//! the definitions of a container come from.

use crate::{BoxError, Definition};

/// Marker trait for types that can be built by a container.
///
/// This is automatically implemented for all types that are `Send + Sync + 'static`.
/// You never need to implement this manually.
pub trait Injectable: Send + Sync + 'static {
    /// Returns the type name for debugging
    #[inline]
    fn type_name_of() -> &'static str
    where
        Self: Sized,
    {
        std::any::type_name::<Self>()
    }
}

// Blanket implementation - everything that's Send + Sync + 'static is Injectable
impl<T: Send + Sync + 'static> Injectable for T {}

/// Source of the definitions loaded into a [`Builder`](crate::Builder).
///
/// Applications usually have a single provider listing every object they
/// wire together. Loading may fail, for instance when a definition depends
/// on configuration that is missing.
///
/// # Examples
///
/// ```rust
/// use scoped_dic::{BoxError, Definition, Provider, REQUEST};
///
/// struct AppProvider {
///     dsn: String,
/// }
///
/// impl Provider for AppProvider {
///     fn load(&self) -> Result<Vec<Definition>, BoxError> {
///         if self.dsn.is_empty() {
///             return Err("missing database dsn".into());
///         }
///         let dsn = self.dsn.clone();
///         Ok(vec![
///             Definition::new("dsn").build(move |_| Ok::<_, BoxError>(dsn.clone())),
///             Definition::new("request-id")
///                 .scope(REQUEST)
///                 .build(|_| Ok::<_, BoxError>(42u64)),
///         ])
///     }
/// }
///
/// let defs = AppProvider { dsn: "postgres://localhost".into() }.load().unwrap();
/// assert_eq!(defs.len(), 2);
/// ```
pub trait Provider {
    /// Produce every definition of the provider.
    fn load(&self) -> Result<Vec<Definition>, BoxError>;
}

impl Provider for Vec<Definition> {
    fn load(&self) -> Result<Vec<Definition>, BoxError> {
        Ok(self.clone())
    }
}

impl Provider for [Definition] {
    fn load(&self) -> Result<Vec<Definition>, BoxError> {
        Ok(self.to_vec())
    }
}
