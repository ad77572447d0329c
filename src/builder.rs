//! Container builder
//!
//! The builder validates definitions against the scope list and produces
//! the root container. Definitions cannot change once the root is built.

use crate::registry::{Registered, Registry};
use crate::{Container, Definition, DiError, Injectable, Provider, Result, Scopes};
use ahash::RandomState;
use std::collections::HashMap;
use std::sync::Arc;

#[cfg(feature = "logging")]
use tracing::{debug, warn};

/// Builder for a root [`Container`].
///
/// # Examples
///
/// ```rust
/// use scoped_dic::{Builder, Definition, BoxError, APP, REQUEST};
///
/// let mut builder = Builder::new(&[]).unwrap();
/// builder
///     .add(Definition::new("db").scope(APP).build(|_| Ok::<_, BoxError>(String::from("pool"))))
///     .unwrap();
///
/// // Unknown scopes are rejected
/// let err = builder
///     .add(Definition::new("job").scope("batch").build(|_| Ok::<_, BoxError>(1u8)))
///     .unwrap_err();
/// assert!(err.is_configuration());
///
/// let app = builder.build();
/// assert_eq!(app.scope(), APP);
/// assert!(app.contains("db"));
/// ```
pub struct Builder {
    scopes: Scopes,
    definitions: HashMap<String, Registered, RandomState>,
}

impl Builder {
    /// Create a builder for the given scopes, widest first.
    ///
    /// An empty list selects the default `app`, `request`, `subrequest` scopes.
    pub fn new(scopes: &[&str]) -> Result<Self> {
        let scopes = if scopes.is_empty() {
            Scopes::default()
        } else {
            Scopes::new(scopes.iter().copied())?
        };
        Ok(Self::with_scopes(scopes))
    }

    /// Create a builder from an already validated scope list.
    pub fn with_scopes(scopes: Scopes) -> Self {
        #[cfg(feature = "logging")]
        debug!(
            target: "scoped_dic",
            scopes = %scopes,
            "Creating container builder"
        );

        Self {
            scopes,
            definitions: HashMap::with_hasher(RandomState::new()),
        }
    }

    /// Create a builder and add every definition of `provider`.
    ///
    /// Fails on the first definition that does not validate.
    pub fn with_provider<P>(scopes: &[&str], provider: &P) -> Result<Self>
    where
        P: Provider + ?Sized,
    {
        let mut builder = Self::new(scopes)?;
        let definitions = provider.load().map_err(|e| DiError::ProviderFailed {
            reason: e.to_string(),
        })?;
        builder.add_all(definitions)?;
        Ok(builder)
    }

    /// Add a definition.
    ///
    /// Fails if the scope is unknown, the name is empty or already used, or
    /// the definition has no build function.
    pub fn add(&mut self, def: Definition) -> Result<&mut Self> {
        let registered = self.validate(def)?;

        if let Some(existing) = self.definitions.get(registered.name()) {
            return Err(DiError::DuplicateDefinition {
                name: registered.def.name,
                existing_scope: self.scope_name(existing.scope_index),
                new_scope: self.scope_name(registered.scope_index),
            });
        }

        #[cfg(feature = "logging")]
        debug!(
            target: "scoped_dic",
            name = registered.name(),
            scope = self.scopes.get(registered.scope_index),
            unshared = registered.def.unshared,
            "Definition added"
        );

        self.definitions.insert(registered.def.name.clone(), registered);
        Ok(self)
    }

    /// Add several definitions, stopping at the first invalid one.
    pub fn add_all<I>(&mut self, defs: I) -> Result<&mut Self>
    where
        I: IntoIterator<Item = Definition>,
    {
        for def in defs {
            self.add(def)?;
        }
        Ok(self)
    }

    /// Add a definition, shadowing any definition with the same name.
    ///
    /// Meant for tests that swap a production object for a fake. The
    /// definition is still validated.
    pub fn replace(&mut self, def: Definition) -> Result<&mut Self> {
        let registered = self.validate(def)?;

        #[cfg(feature = "logging")]
        {
            if self.definitions.contains_key(registered.name()) {
                warn!(
                    target: "scoped_dic",
                    name = registered.name(),
                    "Definition replaced"
                );
            }
        }

        self.definitions.insert(registered.def.name.clone(), registered);
        Ok(self)
    }

    /// Register an already built object in the widest scope.
    ///
    /// This bypasses every check and silently shadows an existing definition
    /// with the same name, whatever its scope. Only use it in tests.
    pub fn set<T: Injectable>(&mut self, name: impl Into<String>, value: T) -> &mut Self {
        let mut def = Definition::instance(name, value);
        def.scope = Some(self.scopes.widest().to_string());

        #[cfg(feature = "logging")]
        debug!(
            target: "scoped_dic",
            name = def.name(),
            "Pre-built object set"
        );

        self.definitions.insert(
            def.name.clone(),
            Registered {
                def,
                scope_index: 0,
            },
        );
        self
    }

    /// The scope list of the containers this builder produces.
    #[inline]
    pub fn scopes(&self) -> &Scopes {
        &self.scopes
    }

    /// Whether a definition is registered under `name`.
    #[inline]
    pub fn contains(&self, name: &str) -> bool {
        self.definitions.contains_key(name)
    }

    /// Registered definitions, in no particular order.
    pub fn definitions(&self) -> impl Iterator<Item = &Definition> {
        self.definitions.values().map(|r| &r.def)
    }

    /// Number of registered definitions.
    #[inline]
    pub fn len(&self) -> usize {
        self.definitions.len()
    }

    /// Whether no definition is registered.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.definitions.is_empty()
    }

    /// Create a root container in the widest scope.
    ///
    /// The builder can be reused; each call produces an independent tree.
    pub fn build(&self) -> Container {
        let registry = Registry::new(self.scopes.clone(), self.definitions.clone());
        Container::root(Arc::new(registry))
    }

    fn validate(&self, mut def: Definition) -> Result<Registered> {
        if def.name.is_empty() {
            return Err(DiError::InvalidDefinition {
                reason: "definition name is empty".into(),
            });
        }

        let scope = match def.scope.take() {
            Some(scope) => scope,
            None => self.scopes.widest().to_string(),
        };
        let Some(scope_index) = self.scopes.index_of(&scope) else {
            return Err(DiError::UnknownScope {
                name: def.name,
                scope,
                known: self.scopes.to_string(),
            });
        };

        if def.build.is_none() {
            return Err(DiError::MissingBuild { name: def.name });
        }

        def.scope = Some(scope);
        Ok(Registered { def, scope_index })
    }

    fn scope_name(&self, index: usize) -> String {
        self.scopes.get(index).unwrap_or_default().to_string()
    }
}

impl Default for Builder {
    /// Builder with the default `app`, `request`, `subrequest` scopes.
    fn default() -> Self {
        Self::with_scopes(Scopes::default())
    }
}

impl std::fmt::Debug for Builder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Builder")
            .field("scopes", &self.scopes)
            .field("definitions", &self.definitions.len())
            .finish()
    }
}
