//! Error types for the scoped container

use std::fmt;
use thiserror::Error;

#[cfg(feature = "logging")]
use tracing::error;

/// Boxed error returned by definition build and close functions.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Errors that can occur while building or using a container
#[derive(Error, Debug, Clone)]
pub enum DiError {
    /// The scope list is empty, contains duplicates or an empty name
    #[error("Invalid scope list: {reason}")]
    InvalidScopes { reason: String },

    /// A definition declares a scope that is not in the scope list
    #[error("Definition `{name}` has unknown scope `{scope}` (known scopes: {known})")]
    UnknownScope {
        name: String,
        scope: String,
        known: String,
    },

    /// Two definitions share the same name
    #[error(
        "Definition `{name}` in scope `{new_scope}` conflicts with an existing definition `{name}` in scope `{existing_scope}`"
    )]
    DuplicateDefinition {
        name: String,
        existing_scope: String,
        new_scope: String,
    },

    /// A definition has no build function
    #[error("Definition `{name}` has no build function")]
    MissingBuild { name: String },

    /// A definition is malformed in some other way
    #[error("Invalid definition: {reason}")]
    InvalidDefinition { reason: String },

    /// The provider could not load its definitions
    #[error("Could not load definitions from the provider: {reason}")]
    ProviderFailed { reason: String },

    /// No definition is registered under this name
    #[error("Object not found: `{name}`")]
    NotFound { name: String },

    /// The object belongs to a scope narrower than the container's
    #[error(
        "Object `{name}` belongs to scope `{scope}` which is narrower than the container scope `{container_scope}`"
    )]
    ScopeMismatch {
        name: String,
        scope: String,
        container_scope: String,
    },

    /// The build function of the definition failed
    #[error("Failed to build `{name}`: {reason}")]
    CreationFailed { name: String, reason: String },

    /// The definition depends on itself while being built
    #[error("Circular dependency detected while building: `{name}`")]
    CircularDependency { name: String },

    /// The container has been deleted
    #[error("Container in scope `{scope}` is closed")]
    Closed { scope: String },

    /// The container already has the narrowest scope
    #[error("There is no scope narrower than `{scope}`")]
    NoSubScope { scope: String },

    /// No container could be located from a context carrier
    #[error("Could not locate an active container")]
    NoActiveContainer,

    /// The parent container was dropped while a child was still in use
    #[error("Parent container has been dropped")]
    ParentDropped,

    /// The stored object does not have the requested type
    #[error("Could not get `{name}` because the object could not be cast to {expected}")]
    TypeMismatch { name: String, expected: &'static str },

    /// One or more close hooks failed during teardown
    #[error("{count} close hook(s) failed during teardown: {list}", count = .failures.len(), list = CloseFailures(.failures))]
    CloseFailed { failures: Vec<CloseFailure> },
}

/// A close hook that returned an error during teardown.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloseFailure {
    /// Name of the object whose close hook failed
    pub name: String,
    /// Error reported by the hook
    pub reason: String,
}

impl fmt::Display for CloseFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "`{}`: {}", self.name, self.reason)
    }
}

struct CloseFailures<'a>(&'a [CloseFailure]);

impl fmt::Display for CloseFailures<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, failure) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str("; ")?;
            }
            write!(f, "{failure}")?;
        }
        Ok(())
    }
}

impl DiError {
    /// Create a NotFound error
    #[inline]
    pub fn not_found(name: impl Into<String>) -> Self {
        Self::NotFound { name: name.into() }
    }

    /// Create a CreationFailed error from the build function's error
    #[inline]
    pub fn creation_failed(name: impl Into<String>, reason: impl fmt::Display) -> Self {
        Self::CreationFailed {
            name: name.into(),
            reason: reason.to_string(),
        }
    }

    /// Create a TypeMismatch error for type `T`
    #[inline]
    pub fn type_mismatch<T: ?Sized + 'static>(name: impl Into<String>) -> Self {
        Self::TypeMismatch {
            name: name.into(),
            expected: std::any::type_name::<T>(),
        }
    }

    /// Create a Closed error
    #[inline]
    pub fn closed(scope: impl Into<String>) -> Self {
        Self::Closed {
            scope: scope.into(),
        }
    }

    /// Whether the caller may retry through an unscoped accessor.
    #[inline]
    pub fn is_scope_mismatch(&self) -> bool {
        matches!(self, Self::ScopeMismatch { .. })
    }

    /// Whether the error comes from using a deleted container.
    #[inline]
    pub fn is_closed(&self) -> bool {
        matches!(self, Self::Closed { .. })
    }

    /// Whether the error was raised while validating definitions.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            Self::InvalidScopes { .. }
                | Self::UnknownScope { .. }
                | Self::DuplicateDefinition { .. }
                | Self::MissingBuild { .. }
                | Self::InvalidDefinition { .. }
                | Self::ProviderFailed { .. }
        )
    }

    /// Report the error and abort the current unit of work.
    ///
    /// This is the contract of every `get*` accessor: a missing or broken
    /// object is a wiring bug, not a condition the caller handles. The panic
    /// unwinds the current thread or task only.
    #[cold]
    #[track_caller]
    pub fn abort(self) -> ! {
        #[cfg(feature = "logging")]
        error!(
            target: "scoped_dic",
            error = %self,
            "Aborting: object could not be retrieved"
        );

        panic!("{self}")
    }
}

/// Result type alias for container operations
pub type Result<T> = std::result::Result<T, DiError>;
