//! Scope lists and container identity
//!
//! A scope is a named lifetime tier. The scope list is ordered from the
//! widest scope (the root container) to the narrowest one.

use crate::{DiError, Result};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

/// Application scope: objects live as long as the root container.
pub const APP: &str = "app";

/// Request scope: one container per inbound request.
pub const REQUEST: &str = "request";

/// Sub-request scope: nested units of work inside a request.
pub const SUB_REQUEST: &str = "subrequest";

/// Ordered list of scope names, widest first.
///
/// # Examples
///
/// ```rust
/// use scoped_dic::Scopes;
///
/// let scopes = Scopes::new(["app", "request", "subrequest"]).unwrap();
/// assert_eq!(scopes.widest(), "app");
/// assert_eq!(scopes.sub_scopes("app"), ["request", "subrequest"]);
/// assert!(Scopes::new(["app", "app"]).is_err());
/// ```
#[derive(Clone, PartialEq, Eq)]
pub struct Scopes {
    names: Arc<[String]>,
}

impl Scopes {
    /// Validate and create a scope list.
    pub fn new<I, S>(names: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let names: Vec<String> = names.into_iter().map(Into::into).collect();

        if names.is_empty() {
            return Err(DiError::InvalidScopes {
                reason: "at least one scope is required".into(),
            });
        }

        for (i, name) in names.iter().enumerate() {
            if name.is_empty() {
                return Err(DiError::InvalidScopes {
                    reason: format!("scope at position {i} has an empty name"),
                });
            }
            if names[..i].contains(name) {
                return Err(DiError::InvalidScopes {
                    reason: format!("scope `{name}` is declared more than once"),
                });
            }
        }

        Ok(Self {
            names: names.into(),
        })
    }

    /// The widest scope, used by the root container.
    #[inline]
    pub fn widest(&self) -> &str {
        &self.names[0]
    }

    /// Position of a scope in the list, `0` being the widest.
    #[inline]
    pub fn index_of(&self, scope: &str) -> Option<usize> {
        self.names.iter().position(|s| s == scope)
    }

    /// Whether the scope is part of the list.
    #[inline]
    pub fn contains(&self, scope: &str) -> bool {
        self.index_of(scope).is_some()
    }

    /// Scope name at a position.
    #[inline]
    pub fn get(&self, index: usize) -> Option<&str> {
        self.names.get(index).map(String::as_str)
    }

    /// Scopes wider than `scope`, widest first.
    pub fn parent_scopes(&self, scope: &str) -> &[String] {
        match self.index_of(scope) {
            Some(i) => &self.names[..i],
            None => &[],
        }
    }

    /// Scopes narrower than `scope`, widest first.
    pub fn sub_scopes(&self, scope: &str) -> &[String] {
        match self.index_of(scope) {
            Some(i) => &self.names[i + 1..],
            None => &[],
        }
    }

    /// All scopes, widest first.
    #[inline]
    pub fn as_slice(&self) -> &[String] {
        &self.names
    }

    /// Iterate over the scope names, widest first.
    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.names.iter().map(String::as_str)
    }

    /// Number of scopes.
    #[inline]
    pub fn len(&self) -> usize {
        self.names.len()
    }

    /// Always false: a valid scope list has at least one scope.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

impl Default for Scopes {
    /// `app`, `request`, `subrequest`.
    fn default() -> Self {
        Self {
            names: vec![APP.to_string(), REQUEST.to_string(), SUB_REQUEST.to_string()].into(),
        }
    }
}

impl std::fmt::Debug for Scopes {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.names.iter()).finish()
    }
}

impl std::fmt::Display for Scopes {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.names.join(", "))
    }
}

/// Unique container identifier.
///
/// Each container gets a unique ID for tracking and debugging.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ContainerId(u64);

impl ContainerId {
    /// Generate a new unique container ID.
    #[inline]
    pub fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    /// Get the raw ID value.
    #[inline]
    pub fn id(&self) -> u64 {
        self.0
    }
}

impl Default for ContainerId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ContainerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "container-{}", self.0)
    }
}
