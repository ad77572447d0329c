//! Scoped dependency injection container
//!
//! A `Container` is one node of a tree with one level per scope. Objects are
//! built lazily in the container whose scope matches their definition, found
//! by walking up the parent chain, and cached there until the container is
//! deleted.

use crate::definition::Instance;
use crate::registry::{Registered, Registry};
use crate::storage::{ObjectStorage, lock};
use crate::{
    Builder, CloseFailure, ContainerId, Definition, DiError, Injectable, Provider, Result,
};
use ahash::RandomState;
use once_cell::sync::OnceCell;
use std::cell::RefCell;
use std::cmp::Ordering as ScopeOrder;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering, fence};
use std::sync::{Arc, Mutex, Weak};

#[cfg(feature = "logging")]
use tracing::{debug, trace, warn};

const OPEN: u8 = 0;
const CLOSING: u8 = 1;
const CLOSED: u8 = 2;

thread_local! {
    /// Objects being built on this thread, to turn self-dependencies into
    /// errors instead of a deadlock on the slot.
    static BUILDING: RefCell<Vec<(ContainerId, String)>> = const { RefCell::new(Vec::new()) };
}

/// Pops the build stack entry, even if the build function panics.
struct BuildGuard;

impl BuildGuard {
    fn enter(id: ContainerId, name: &str) -> Option<Self> {
        BUILDING.with(|stack| {
            let mut stack = stack.borrow_mut();
            if stack.iter().any(|(i, n)| *i == id && n == name) {
                return None;
            }
            stack.push((id, name.to_string()));
            Some(BuildGuard)
        })
    }
}

impl Drop for BuildGuard {
    fn drop(&mut self) {
        BUILDING.with(|stack| {
            stack.borrow_mut().pop();
        });
    }
}

struct Inner {
    id: ContainerId,
    registry: Arc<Registry>,
    scope_index: usize,
    parent: Option<Weak<Inner>>,
    objects: ObjectStorage,
    /// Strongly owned children, one scope narrower
    children: Mutex<HashMap<ContainerId, Container, RandomState>>,
    /// Hidden child created by unscoped retrievals, destroyed by `clean`
    unscoped: Mutex<Option<Container>>,
    state: AtomicU8,
    /// Set once the state reaches CLOSED
    closed_signal: OnceCell<()>,
    /// Set by `delete` while children are still alive
    delete_when_childless: AtomicBool,
}

/// Scope-aware dependency injection container.
///
/// Handles are cheap to clone and can be shared between threads. The root
/// container comes from [`Builder::build`]; narrower containers come from
/// [`Container::sub_container`].
///
/// # Examples
///
/// ```rust
/// use scoped_dic::{Builder, BoxError, Definition, REQUEST};
/// use std::sync::Arc;
///
/// struct Pool;
/// struct Session {
///     pool: Arc<Pool>,
/// }
///
/// let mut builder = Builder::new(&[]).unwrap();
/// builder
///     .add_all([
///         Definition::new("db").build(|_| Ok::<_, BoxError>(Pool)),
///         Definition::new("session").scope(REQUEST).build(|ctn| {
///             Ok::<_, BoxError>(Session { pool: ctn.safe_get_as::<Pool>("db")? })
///         }),
///     ])
///     .unwrap();
///
/// let app = builder.build();
/// let request = app.sub_container().unwrap();
///
/// let s1 = request.safe_get_as::<Session>("session").unwrap();
/// let s2 = request.safe_get_as::<Session>("session").unwrap();
/// assert!(Arc::ptr_eq(&s1, &s2));
///
/// // Request objects cannot be built from the application scope
/// assert!(app.safe_get("session").unwrap_err().is_scope_mismatch());
///
/// request.delete().unwrap();
/// assert!(request.is_closed());
/// ```
#[derive(Clone)]
pub struct Container {
    inner: Arc<Inner>,
}

impl Container {
    /// Build a root container from every definition of `provider`.
    ///
    /// An empty scope list selects `app`, `request` and `subrequest`. Use a
    /// [`Builder`] instead to override definitions in tests.
    pub fn new<P>(scopes: &[&str], provider: &P) -> Result<Self>
    where
        P: Provider + ?Sized,
    {
        Ok(Builder::with_provider(scopes, provider)?.build())
    }

    pub(crate) fn root(registry: Arc<Registry>) -> Self {
        let container = Self::create(registry, 0, None);

        #[cfg(feature = "logging")]
        debug!(
            target: "scoped_dic",
            container_id = container.id().id(),
            scope = container.scope(),
            definitions = container.inner.registry.len(),
            "Creating root container"
        );

        container
    }

    fn create(registry: Arc<Registry>, scope_index: usize, parent: Option<Weak<Inner>>) -> Self {
        Self {
            inner: Arc::new(Inner {
                id: ContainerId::new(),
                registry,
                scope_index,
                parent,
                objects: ObjectStorage::new(),
                children: Mutex::new(HashMap::with_hasher(RandomState::new())),
                unscoped: Mutex::new(None),
                state: AtomicU8::new(OPEN),
                closed_signal: OnceCell::new(),
                delete_when_childless: AtomicBool::new(false),
            }),
        }
    }

    /// Create an unlinked container one scope narrower than this one.
    fn new_child(&self) -> Result<Self> {
        let scope_index = self.inner.scope_index + 1;
        if scope_index >= self.inner.registry.scopes().len() {
            return Err(DiError::NoSubScope {
                scope: self.scope().to_string(),
            });
        }
        Ok(Self::create(
            Arc::clone(&self.inner.registry),
            scope_index,
            Some(Arc::downgrade(&self.inner)),
        ))
    }

    // =========================================================================
    // Tree
    // =========================================================================

    /// Unique identifier of this container.
    #[inline]
    pub fn id(&self) -> ContainerId {
        self.inner.id
    }

    /// Scope of this container.
    #[inline]
    pub fn scope(&self) -> &str {
        self.inner.registry.scope_name(self.inner.scope_index)
    }

    /// Every scope of the tree, widest first.
    #[inline]
    pub fn scopes(&self) -> &[String] {
        self.inner.registry.scopes().as_slice()
    }

    /// Scopes wider than this container's scope.
    #[inline]
    pub fn parent_scopes(&self) -> &[String] {
        &self.scopes()[..self.inner.scope_index]
    }

    /// Scopes narrower than this container's scope.
    #[inline]
    pub fn sub_scopes(&self) -> &[String] {
        &self.scopes()[self.inner.scope_index + 1..]
    }

    /// Distance from the root container (0 = root).
    #[inline]
    pub fn depth(&self) -> u32 {
        self.inner.scope_index as u32
    }

    /// The container one scope wider, `None` for the root or if the parent
    /// has been dropped.
    pub fn parent(&self) -> Option<Container> {
        self.inner
            .parent
            .as_ref()
            .and_then(Weak::upgrade)
            .map(|inner| Container { inner })
    }

    /// Create a container in the next narrower scope, owned by this one.
    ///
    /// The child stays alive until it is deleted, or until this container is
    /// deleted with [`delete_with_sub_containers`](Self::delete_with_sub_containers).
    pub fn sub_container(&self) -> Result<Container> {
        self.ensure_open()?;
        let child = self.new_child()?;

        {
            let mut children = lock(&self.inner.children);
            // Checked under the lock: teardown drains children after leaving OPEN
            self.ensure_open()?;
            children.insert(child.id(), child.clone());
        }

        #[cfg(feature = "logging")]
        debug!(
            target: "scoped_dic",
            container_id = child.id().id(),
            parent_id = self.id().id(),
            scope = child.scope(),
            depth = child.depth(),
            "Creating sub-container"
        );

        Ok(child)
    }

    /// Number of live sub-containers, not counting unscoped ones.
    pub fn children_count(&self) -> usize {
        lock(&self.inner.children).len()
    }

    // =========================================================================
    // Retrieval
    // =========================================================================

    /// Retrieve an object, building it on first access.
    ///
    /// The object must belong to this container's scope or a wider one.
    /// Wider objects are retrieved from the ancestor in their scope, so they
    /// are shared by every container below it.
    ///
    /// # Errors
    ///
    /// - [`DiError::NotFound`] if no definition has this name
    /// - [`DiError::ScopeMismatch`] if the object belongs to a narrower scope
    /// - [`DiError::CreationFailed`] if the build function failed; the
    ///   failure is not cached and the next call builds again
    /// - [`DiError::Closed`] if the container has been deleted
    pub fn safe_get(&self, name: &str) -> Result<Instance> {
        let registered = self.registered(name)?;
        self.ensure_open()?;

        match registered.scope_index.cmp(&self.inner.scope_index) {
            ScopeOrder::Equal => self.build_or_cached(registered),
            ScopeOrder::Less => {
                #[cfg(feature = "logging")]
                trace!(
                    target: "scoped_dic",
                    name,
                    container_id = self.id().id(),
                    scope = self.scope(),
                    "Object belongs to a wider scope, walking parent chain"
                );

                self.ancestor(registered.scope_index)?
                    .build_or_cached(registered)
            }
            ScopeOrder::Greater => Err(DiError::ScopeMismatch {
                name: name.to_string(),
                scope: self.inner.registry.scope_name(registered.scope_index).to_string(),
                container_scope: self.scope().to_string(),
            }),
        }
    }

    /// Like [`safe_get`](Self::safe_get) but aborts on error.
    #[inline]
    #[track_caller]
    pub fn get(&self, name: &str) -> Instance {
        self.safe_get(name).unwrap_or_else(|err| err.abort())
    }

    /// Retrieve an object and downcast it to `T`.
    ///
    /// # Errors
    ///
    /// Same as [`safe_get`](Self::safe_get), plus [`DiError::TypeMismatch`]
    /// if the object is not a `T`.
    pub fn safe_get_as<T: Injectable>(&self, name: &str) -> Result<Arc<T>> {
        downcast(name, self.safe_get(name)?)
    }

    /// Like [`safe_get_as`](Self::safe_get_as) but aborts on error.
    #[inline]
    #[track_caller]
    pub fn get_as<T: Injectable>(&self, name: &str) -> Arc<T> {
        self.safe_get_as(name).unwrap_or_else(|err| err.abort())
    }

    /// Retrieve an object even if it belongs to a narrower scope.
    ///
    /// Narrower objects are built in a hidden chain of sub-containers owned
    /// by this container. The chain is reused by later unscoped retrievals
    /// and stays alive until [`clean`](Self::clean) is called or this
    /// container is deleted; forgetting `clean` keeps the objects alive.
    pub fn unscoped_safe_get(&self, name: &str) -> Result<Instance> {
        let registered = self.registered(name)?;
        self.ensure_open()?;

        if registered.scope_index <= self.inner.scope_index {
            return self.safe_get(name);
        }

        self.unscoped_child()?.unscoped_safe_get(name)
    }

    /// Like [`unscoped_safe_get`](Self::unscoped_safe_get) but aborts on error.
    #[inline]
    #[track_caller]
    pub fn unscoped_get(&self, name: &str) -> Instance {
        self.unscoped_safe_get(name).unwrap_or_else(|err| err.abort())
    }

    /// Unscoped retrieval downcast to `T`.
    pub fn unscoped_safe_get_as<T: Injectable>(&self, name: &str) -> Result<Arc<T>> {
        downcast(name, self.unscoped_safe_get(name)?)
    }

    /// Like [`unscoped_safe_get_as`](Self::unscoped_safe_get_as) but aborts on error.
    #[inline]
    #[track_caller]
    pub fn unscoped_get_as<T: Injectable>(&self, name: &str) -> Arc<T> {
        self.unscoped_safe_get_as(name).unwrap_or_else(|err| err.abort())
    }

    /// Delete the sub-containers created by unscoped retrievals.
    ///
    /// Close hooks of the objects they hold run now. Does nothing if no
    /// unscoped retrieval happened since the last call.
    pub fn clean(&self) -> Result<()> {
        // Stays reachable from `teardown` until closed
        let Some(chain) = lock(&self.inner.unscoped).clone() else {
            return Ok(());
        };

        #[cfg(feature = "logging")]
        debug!(
            target: "scoped_dic",
            container_id = self.id().id(),
            chain_id = chain.id().id(),
            "Cleaning unscoped sub-containers"
        );

        let mut failures = Vec::new();
        if chain.begin_close() {
            chain.teardown(&mut failures);
        } else {
            chain.wait_closed();
        }

        let mut unscoped = lock(&self.inner.unscoped);
        if unscoped.as_ref().is_some_and(|c| c.id() == chain.id()) {
            *unscoped = None;
        }
        into_result(failures)
    }

    // =========================================================================
    // Introspection
    // =========================================================================

    /// Whether a definition is registered under `name`.
    #[inline]
    pub fn contains(&self, name: &str) -> bool {
        self.inner.registry.get(name).is_some()
    }

    /// The definition registered under `name`.
    pub fn definition(&self, name: &str) -> Option<Definition> {
        self.inner.registry.get(name).map(|r| r.def.clone())
    }

    /// Whether `name` is built and cached in this very container.
    #[inline]
    pub fn is_built(&self, name: &str) -> bool {
        self.inner.objects.is_built(name)
    }

    /// Number of objects cached in this container.
    #[inline]
    pub fn len(&self) -> usize {
        self.inner.objects.len()
    }

    /// Whether no object is cached in this container.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Whether the container has been deleted.
    ///
    /// Stays false while a deletion is in progress or deferred by
    /// [`delete`](Self::delete).
    #[inline]
    pub fn is_closed(&self) -> bool {
        self.inner.state.load(Ordering::Acquire) == CLOSED
    }

    /// Delete this container and all its sub-containers.
    ///
    /// Sub-containers are deleted first, deepest scope first. Then the close
    /// hook of every object built in this container runs, and the container
    /// is removed from its parent.
    ///
    /// Sub-containers are deleted even if other threads still use them;
    /// those threads get [`DiError::Closed`] on their next retrieval. Use
    /// [`delete`](Self::delete) to wait for every sub-container owner.
    ///
    /// # Errors
    ///
    /// - [`DiError::Closed`] if the container is already deleted
    /// - [`DiError::CloseFailed`] listing every close hook that failed; the
    ///   teardown still completes
    pub fn delete_with_sub_containers(&self) -> Result<()> {
        if !self.begin_close() {
            return Err(DiError::closed(self.scope()));
        }
        self.finish_delete()
    }

    /// Delete this container once it has no sub-container.
    ///
    /// Without sub-containers this is [`delete_with_sub_containers`](Self::delete_with_sub_containers).
    /// Otherwise the container is marked and deleted automatically when its
    /// last sub-container is deleted, so each owner only deletes what it
    /// created.
    pub fn delete(&self) -> Result<()> {
        {
            let children = lock(&self.inner.children);
            if !children.is_empty() {
                self.ensure_open()?;
                self.inner
                    .delete_when_childless
                    .store(true, Ordering::Release);

                #[cfg(feature = "logging")]
                debug!(
                    target: "scoped_dic",
                    container_id = self.id().id(),
                    scope = self.scope(),
                    children = children.len(),
                    "Deletion deferred until sub-containers are deleted"
                );

                return Ok(());
            }
            // Leaving OPEN under the lock keeps new children out
            if !self.begin_close() {
                return Err(DiError::closed(self.scope()));
            }
        }
        self.finish_delete()
    }

    // =========================================================================
    // Internals
    // =========================================================================

    #[inline]
    fn is_open(&self) -> bool {
        self.inner.state.load(Ordering::SeqCst) == OPEN
    }

    #[inline]
    fn ensure_open(&self) -> Result<()> {
        if self.is_open() {
            Ok(())
        } else {
            Err(DiError::closed(self.scope()))
        }
    }

    fn registered(&self, name: &str) -> Result<&Registered> {
        self.inner
            .registry
            .get(name)
            .ok_or_else(|| DiError::not_found(name))
    }

    /// The ancestor at `scope_index`, one lock-free hop at a time.
    fn ancestor(&self, scope_index: usize) -> Result<Container> {
        let mut current = self.clone();
        while current.inner.scope_index > scope_index {
            current = current.parent().ok_or(DiError::ParentDropped)?;
        }
        Ok(current)
    }

    fn unscoped_child(&self) -> Result<Container> {
        let mut unscoped = lock(&self.inner.unscoped);
        if let Some(child) = unscoped.as_ref() {
            if child.is_open() {
                return Ok(child.clone());
            }
        }
        self.ensure_open()?;

        let child = self.new_child()?;
        *unscoped = Some(child.clone());

        #[cfg(feature = "logging")]
        debug!(
            target: "scoped_dic",
            container_id = child.id().id(),
            parent_id = self.id().id(),
            scope = child.scope(),
            "Creating unscoped sub-container"
        );

        Ok(child)
    }

    fn build_or_cached(&self, registered: &Registered) -> Result<Instance> {
        self.ensure_open()?;
        let name = registered.name();

        if registered.def.unshared {
            return self.build_unshared(registered);
        }

        let slot = self.inner.objects.slot(name);
        if let Some(obj) = slot.built() {
            #[cfg(feature = "logging")]
            trace!(
                target: "scoped_dic",
                name,
                container_id = self.id().id(),
                "Object resolved from cache"
            );
            return Ok(obj);
        }

        let Some(_guard) = BuildGuard::enter(self.id(), name) else {
            return Err(DiError::CircularDependency {
                name: name.to_string(),
            });
        };

        match slot.get_or_build(|| self.build(registered)) {
            Ok(obj) => {
                // Pairs with the fence in `finish_delete`: either teardown
                // sees the object, or this sees the teardown.
                fence(Ordering::SeqCst);
                if !self.is_open() {
                    if let Some(obj) = slot.claim_close() {
                        self.close_object(registered, &obj);
                    }
                    return Err(DiError::closed(self.scope()));
                }
                Ok(obj)
            }
            Err(err) => {
                self.inner.objects.discard(name, &slot);
                Err(err)
            }
        }
    }

    fn build_unshared(&self, registered: &Registered) -> Result<Instance> {
        let name = registered.name();
        let Some(_guard) = BuildGuard::enter(self.id(), name) else {
            return Err(DiError::CircularDependency {
                name: name.to_string(),
            });
        };

        let obj = self.build(registered)?;
        if registered.def.close.is_none() {
            self.ensure_open()?;
            return Ok(obj);
        }

        self.inner.objects.track_unshared(name, Arc::clone(&obj));
        fence(Ordering::SeqCst);
        if !self.is_open() {
            // Teardown may have drained before the push
            let failures = self.close_drained();

            #[cfg(feature = "logging")]
            if !failures.is_empty() {
                warn!(
                    target: "scoped_dic",
                    name,
                    container_id = self.id().id(),
                    failures = failures.len(),
                    "Close hooks failed for objects built during deletion"
                );
            }

            drop(failures);
            return Err(DiError::closed(self.scope()));
        }
        Ok(obj)
    }

    fn build(&self, registered: &Registered) -> Result<Instance> {
        let name = registered.name();
        let build = registered
            .def
            .build
            .as_ref()
            .ok_or_else(|| DiError::MissingBuild {
                name: name.to_string(),
            })?;

        #[cfg(feature = "logging")]
        debug!(
            target: "scoped_dic",
            name,
            container_id = self.id().id(),
            scope = self.scope(),
            unshared = registered.def.unshared,
            "Building object"
        );

        build(self).map_err(|e| {
            #[cfg(feature = "logging")]
            debug!(
                target: "scoped_dic",
                name,
                error = %e,
                "Build function failed"
            );

            DiError::creation_failed(name, e)
        })
    }

    /// OPEN -> CLOSING; false if another deletion already started.
    fn begin_close(&self) -> bool {
        self.inner
            .state
            .compare_exchange(OPEN, CLOSING, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }

    fn finish_delete(&self) -> Result<()> {
        let mut failures = Vec::new();
        self.teardown(&mut failures);
        failures.extend(self.unlink());
        into_result(failures)
    }

    /// Close sub-containers, then this container's objects. The container
    /// must already be CLOSING.
    fn teardown(&self, failures: &mut Vec<CloseFailure>) {
        fence(Ordering::SeqCst);

        let children: Vec<Container> = lock(&self.inner.children)
            .drain()
            .map(|(_, child)| child)
            .collect();
        let unscoped = lock(&self.inner.unscoped).take();

        for child in children.into_iter().chain(unscoped) {
            if child.begin_close() {
                child.teardown(failures);
            } else {
                // Its own deletion is running on another thread
                child.wait_closed();
            }
        }

        failures.extend(self.close_drained());
        self.inner.state.store(CLOSED, Ordering::Release);
        let _ = self.inner.closed_signal.set(());

        #[cfg(feature = "logging")]
        debug!(
            target: "scoped_dic",
            container_id = self.id().id(),
            scope = self.scope(),
            "Container closed"
        );
    }

    /// Block until a deletion started elsewhere has closed this container.
    fn wait_closed(&self) {
        self.inner.closed_signal.wait();
    }

    /// Run the close hook of every object still held by this container.
    fn close_drained(&self) -> Vec<CloseFailure> {
        self.inner
            .objects
            .drain_for_close()
            .into_iter()
            .filter_map(|(name, obj)| {
                let registered = self.inner.registry.get(&name)?;
                self.close_object(registered, &obj)
            })
            .collect()
    }

    fn close_object(&self, registered: &Registered, obj: &Instance) -> Option<CloseFailure> {
        let close = registered.def.close.as_ref()?;

        #[cfg(feature = "logging")]
        trace!(
            target: "scoped_dic",
            name = registered.name(),
            container_id = self.id().id(),
            "Running close hook"
        );

        match close(obj) {
            Ok(()) => None,
            Err(e) => {
                #[cfg(feature = "logging")]
                warn!(
                    target: "scoped_dic",
                    name = registered.name(),
                    container_id = self.id().id(),
                    error = %e,
                    "Close hook failed"
                );

                Some(CloseFailure {
                    name: registered.name().to_string(),
                    reason: e.to_string(),
                })
            }
        }
    }

    /// Remove this container from its parent, running the parent's deferred
    /// deletion if this was its last child.
    fn unlink(&self) -> Vec<CloseFailure> {
        let Some(parent) = self.parent() else {
            return Vec::new();
        };

        let run_deferred = {
            let mut children = lock(&parent.inner.children);
            if children.remove(&self.id()).is_none() {
                return Vec::new();
            }
            children.is_empty()
                && parent
                    .inner
                    .delete_when_childless
                    .swap(false, Ordering::AcqRel)
        };

        if !run_deferred {
            return Vec::new();
        }

        #[cfg(feature = "logging")]
        debug!(
            target: "scoped_dic",
            container_id = parent.id().id(),
            "Last sub-container deleted, running deferred deletion"
        );

        match parent.delete() {
            Err(DiError::CloseFailed { failures }) => failures,
            _ => Vec::new(),
        }
    }
}

fn downcast<T: Injectable>(name: &str, obj: Instance) -> Result<Arc<T>> {
    obj.downcast::<T>()
        .map_err(|_| DiError::type_mismatch::<T>(name))
}

fn into_result(failures: Vec<CloseFailure>) -> Result<()> {
    if failures.is_empty() {
        Ok(())
    } else {
        Err(DiError::CloseFailed { failures })
    }
}

impl std::fmt::Debug for Container {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Container")
            .field("id", &self.inner.id)
            .field("scope", &self.scope())
            .field("objects", &self.len())
            .field("children", &self.children_count())
            .field("has_parent", &self.inner.parent.is_some())
            .field("closed", &self.is_closed())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{APP, BoxError, REQUEST, SUB_REQUEST};
    use std::sync::atomic::AtomicU32;
    use std::sync::{Barrier, Mutex as StdMutex};
    use std::thread;
    use std::time::Duration;

    #[derive(Debug)]
    struct Connection {
        id: u32,
    }

    #[derive(Debug)]
    struct User {
        name: String,
    }

    fn counted(name: &str, scope: &str, counter: Arc<AtomicU32>) -> Definition {
        Definition::new(name).scope(scope).build(move |_| {
            let id = counter.fetch_add(1, Ordering::SeqCst);
            Ok::<_, BoxError>(Connection { id })
        })
    }

    /// Definition whose close hook appends `name` to `log`.
    fn logged(name: &'static str, scope: &str, log: Arc<StdMutex<Vec<&'static str>>>) -> Definition {
        Definition::new(name)
            .scope(scope)
            .build(|_| Ok::<_, BoxError>(Connection { id: 0 }))
            .close(move |_: &Connection| {
                log.lock().unwrap().push(name);
                Ok::<_, BoxError>(())
            })
    }

    fn build(defs: Vec<Definition>) -> Container {
        let mut builder = Builder::default();
        builder.add_all(defs).unwrap();
        builder.build()
    }

    #[test]
    fn test_cached_instance() {
        let calls = Arc::new(AtomicU32::new(0));
        let app = build(vec![counted("db", APP, Arc::clone(&calls))]);

        let a = app.safe_get("db").unwrap();
        let b = app.safe_get("db").unwrap();

        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(app.is_built("db"));
        assert_eq!(app.len(), 1);
    }

    #[test]
    fn test_request_scenario() {
        let opens = Arc::new(AtomicU32::new(0));
        let loads = Arc::new(AtomicU32::new(0));

        let loads_in_build = Arc::clone(&loads);
        let app = build(vec![
            counted("db", APP, Arc::clone(&opens)),
            Definition::new("req-user").scope(REQUEST).build(move |ctn| {
                let db = ctn.safe_get_as::<Connection>("db")?;
                loads_in_build.fetch_add(1, Ordering::SeqCst);
                Ok::<_, BoxError>(User {
                    name: format!("user-from-{}", db.id),
                })
            }),
        ]);

        let request = app.sub_container().unwrap();
        assert_eq!(request.scope(), REQUEST);

        let u1 = request.safe_get_as::<User>("req-user").unwrap();
        let u2 = request.safe_get_as::<User>("req-user").unwrap();

        assert!(Arc::ptr_eq(&u1, &u2));
        assert_eq!(u1.name, "user-from-0");
        assert_eq!(opens.load(Ordering::SeqCst), 1);
        assert_eq!(loads.load(Ordering::SeqCst), 1);

        // The connection is cached in the root, not in the request
        assert!(app.is_built("db"));
        assert!(!request.is_built("db"));
        assert!(request.is_built("req-user"));
    }

    #[test]
    fn test_wider_objects_shared_between_requests() {
        let calls = Arc::new(AtomicU32::new(0));
        let app = build(vec![counted("db", APP, Arc::clone(&calls))]);

        let r1 = app.sub_container().unwrap();
        let r2 = app.sub_container().unwrap();
        let sub = r1.sub_container().unwrap();

        let a = r1.safe_get("db").unwrap();
        let b = r2.safe_get("db").unwrap();
        let c = sub.safe_get("db").unwrap();

        assert!(Arc::ptr_eq(&a, &b));
        assert!(Arc::ptr_eq(&a, &c));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_request_objects_isolated_per_request() {
        let calls = Arc::new(AtomicU32::new(0));
        let app = build(vec![counted("session", REQUEST, Arc::clone(&calls))]);

        let r1 = app.sub_container().unwrap();
        let r2 = app.sub_container().unwrap();

        let a = r1.safe_get_as::<Connection>("session").unwrap();
        let b = r2.safe_get_as::<Connection>("session").unwrap();
        assert!(!Arc::ptr_eq(&a, &b));

        // A sub-request shares its request's object
        let sub = r1.sub_container().unwrap();
        let c = sub.safe_get_as::<Connection>("session").unwrap();
        assert!(Arc::ptr_eq(&a, &c));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_scope_mismatch() {
        let app = build(vec![counted("session", REQUEST, Arc::new(AtomicU32::new(0)))]);

        let err = app.safe_get("session").unwrap_err();
        match err {
            DiError::ScopeMismatch {
                name,
                scope,
                container_scope,
            } => {
                assert_eq!(name, "session");
                assert_eq!(scope, REQUEST);
                assert_eq!(container_scope, APP);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_not_found() {
        let app = build(vec![]);
        assert!(matches!(app.safe_get("missing"), Err(DiError::NotFound { .. })));
        assert!(!app.contains("missing"));
    }

    #[test]
    fn test_type_mismatch() {
        let app = build(vec![counted("db", APP, Arc::new(AtomicU32::new(0)))]);
        let err = app.safe_get_as::<User>("db").unwrap_err();
        assert!(matches!(err, DiError::TypeMismatch { .. }));
    }

    #[test]
    fn test_build_failure_not_cached() {
        let attempts = Arc::new(AtomicU32::new(0));
        let seen = Arc::clone(&attempts);
        let app = build(vec![Definition::new("flaky").build(move |_| {
            if seen.fetch_add(1, Ordering::SeqCst) == 0 {
                Err("connection refused")
            } else {
                Ok(Connection { id: 1 })
            }
        })]);

        let err = app.safe_get("flaky").unwrap_err();
        assert_eq!(
            err.to_string(),
            "Failed to build `flaky`: connection refused"
        );
        assert!(!app.is_built("flaky"));

        let conn = app.safe_get_as::<Connection>("flaky").unwrap();
        assert_eq!(conn.id, 1);
        assert_eq!(attempts.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_unshared_builds_every_time() {
        let calls = Arc::new(AtomicU32::new(0));
        let app = build(vec![counted("id", APP, Arc::clone(&calls)).unshared()]);

        let a = app.safe_get("id").unwrap();
        let b = app.safe_get("id").unwrap();

        assert!(!Arc::ptr_eq(&a, &b));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert!(!app.is_built("id"));
    }

    #[test]
    fn test_unshared_objects_closed_on_delete() {
        let log = Arc::new(StdMutex::new(Vec::new()));
        let app = build(vec![logged("tmp", REQUEST, Arc::clone(&log)).unshared()]);

        let request = app.sub_container().unwrap();
        request.safe_get("tmp").unwrap();
        request.safe_get("tmp").unwrap();
        request.delete().unwrap();

        assert_eq!(*log.lock().unwrap(), ["tmp", "tmp"]);
    }

    #[test]
    fn test_circular_dependency() {
        let app = build(vec![
            Definition::new("a").build(|ctn| {
                ctn.safe_get("b")?;
                Ok::<_, BoxError>(1u8)
            }),
            Definition::new("b").build(|ctn| {
                ctn.safe_get("a")?;
                Ok::<_, BoxError>(2u8)
            }),
        ]);

        let err = app.safe_get("a").unwrap_err();
        assert!(err.to_string().contains("Circular dependency"), "{err}");
        // Nothing is left half-built
        assert!(!app.is_built("a"));
        assert!(!app.is_built("b"));
    }

    #[test]
    fn test_concurrent_first_access_builds_once() {
        let calls = Arc::new(AtomicU32::new(0));
        let in_build = Arc::clone(&calls);
        let app = build(vec![Definition::new("slow").build(move |_| {
            in_build.fetch_add(1, Ordering::SeqCst);
            thread::sleep(std::time::Duration::from_millis(20));
            Ok::<_, BoxError>(Connection { id: 9 })
        })]);

        let barrier = Arc::new(Barrier::new(16));
        let handles: Vec<_> = (0..16)
            .map(|_| {
                let app = app.clone();
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || {
                    barrier.wait();
                    app.safe_get("slow").unwrap()
                })
            })
            .collect();

        let objects: Vec<Instance> = handles.into_iter().map(|h| h.join().unwrap()).collect();

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(objects.windows(2).all(|w| Arc::ptr_eq(&w[0], &w[1])));
    }

    #[test]
    fn test_sub_container_scopes() {
        let app = build(vec![]);
        let request = app.sub_container().unwrap();
        let sub = request.sub_container().unwrap();

        assert_eq!(sub.scope(), SUB_REQUEST);
        assert_eq!(sub.depth(), 2);
        assert_eq!(sub.parent_scopes(), [APP, REQUEST]);
        assert!(sub.sub_scopes().is_empty());
        assert_eq!(app.sub_scopes(), [REQUEST, SUB_REQUEST]);
        assert_eq!(sub.parent().unwrap().id(), request.id());
        assert!(app.parent().is_none());

        let err = sub.sub_container().unwrap_err();
        assert!(matches!(err, DiError::NoSubScope { .. }));
    }

    #[test]
    fn test_unscoped_get_and_clean() {
        let calls = Arc::new(AtomicU32::new(0));
        let log = Arc::new(StdMutex::new(Vec::new()));
        let in_build = Arc::clone(&calls);
        let in_close = Arc::clone(&log);
        let app = build(vec![
            Definition::new("job")
                .scope(SUB_REQUEST)
                .build(move |_| {
                    let id = in_build.fetch_add(1, Ordering::SeqCst);
                    Ok::<_, BoxError>(Connection { id })
                })
                .close(move |conn: &Connection| {
                    in_close.lock().unwrap().push(conn.id);
                    Ok::<_, BoxError>(())
                }),
        ]);

        assert!(app.safe_get("job").unwrap_err().is_scope_mismatch());

        let a = app.unscoped_safe_get_as::<Connection>("job").unwrap();
        let b = app.unscoped_safe_get_as::<Connection>("job").unwrap();
        assert!(Arc::ptr_eq(&a, &b), "chain is reused until clean");
        assert_eq!(app.children_count(), 0, "unscoped chain is not a public child");

        app.clean().unwrap();
        assert_eq!(*log.lock().unwrap(), [0]);

        let c = app.unscoped_safe_get_as::<Connection>("job").unwrap();
        assert_eq!(c.id, 1, "rebuilt after clean");
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_unscoped_wider_object_uses_regular_lookup() {
        let calls = Arc::new(AtomicU32::new(0));
        let app = build(vec![counted("db", APP, Arc::clone(&calls))]);
        let request = app.sub_container().unwrap();

        let a = request.unscoped_safe_get("db").unwrap();
        let b = app.safe_get("db").unwrap();
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn test_clean_without_chain_is_noop() {
        let app = build(vec![]);
        app.clean().unwrap();
        app.clean().unwrap();
        assert!(!app.is_closed());
    }

    #[test]
    fn test_clean_leaves_siblings_alone() {
        let log = Arc::new(StdMutex::new(Vec::new()));
        let app = build(vec![logged("session", REQUEST, Arc::clone(&log))]);

        let request = app.sub_container().unwrap();
        request.safe_get("session").unwrap();
        app.unscoped_safe_get("session").unwrap();

        app.clean().unwrap();
        assert_eq!(log.lock().unwrap().len(), 1);
        assert!(!request.is_closed());
        assert!(request.is_built("session"));
    }

    #[test]
    fn test_delete_with_sub_containers_closes_leaf_first() {
        let log = Arc::new(StdMutex::new(Vec::new()));
        let app = build(vec![
            logged("db", APP, Arc::clone(&log)),
            logged("session", REQUEST, Arc::clone(&log)),
            logged("job", SUB_REQUEST, Arc::clone(&log)),
        ]);

        let request = app.sub_container().unwrap();
        let sub = request.sub_container().unwrap();
        sub.safe_get("job").unwrap();
        sub.safe_get("session").unwrap();
        sub.safe_get("db").unwrap();

        app.delete_with_sub_containers().unwrap();

        assert_eq!(*log.lock().unwrap(), ["job", "session", "db"]);
        assert!(app.is_closed());
        assert!(request.is_closed());
        assert!(sub.is_closed());

        assert!(app.safe_get("db").unwrap_err().is_closed());
        assert!(sub.safe_get("job").unwrap_err().is_closed());
        assert!(request.sub_container().unwrap_err().is_closed());
        assert!(app.delete_with_sub_containers().unwrap_err().is_closed());
    }

    #[test]
    fn test_parent_waits_for_child_deleted_elsewhere() {
        let log = Arc::new(StdMutex::new(Vec::new()));
        let closing = Arc::new(Barrier::new(2));
        let (in_close, started) = (Arc::clone(&log), Arc::clone(&closing));
        let app = build(vec![
            logged("db", APP, Arc::clone(&log)),
            Definition::new("session")
                .scope(REQUEST)
                .build(|ctn| {
                    ctn.safe_get("db")?;
                    Ok::<_, BoxError>(Connection { id: 0 })
                })
                .close(move |_: &Connection| {
                    started.wait();
                    thread::sleep(Duration::from_millis(200));
                    in_close.lock().unwrap().push("session");
                    Ok::<_, BoxError>(())
                }),
        ]);

        let request = app.sub_container().unwrap();
        request.safe_get("session").unwrap();

        let owner = {
            let request = request.clone();
            thread::spawn(move || request.delete())
        };

        // The request is now CLOSING on the other thread
        closing.wait();
        app.delete_with_sub_containers().unwrap();

        assert!(request.is_closed());
        assert!(app.is_closed());
        assert_eq!(*log.lock().unwrap(), ["session", "db"]);
        owner.join().unwrap().unwrap();
    }

    #[test]
    fn test_concurrent_waiters_share_failed_build() {
        let attempts = Arc::new(AtomicU32::new(0));
        let seen = Arc::clone(&attempts);
        let app = build(vec![Definition::new("flaky").build(move |_| {
            let attempt = seen.fetch_add(1, Ordering::SeqCst);
            if attempt == 0 {
                thread::sleep(Duration::from_millis(100));
                Err("connection refused")
            } else {
                Ok(Connection { id: attempt })
            }
        })]);

        let barrier = Arc::new(Barrier::new(8));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let app = app.clone();
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || {
                    barrier.wait();
                    app.safe_get("flaky")
                })
            })
            .collect();

        for handle in handles {
            match handle.join().unwrap() {
                Err(DiError::CreationFailed { name, reason }) => {
                    assert_eq!(name, "flaky");
                    assert_eq!(reason, "connection refused");
                }
                other => panic!("unexpected result: {other:?}"),
            }
        }
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
        assert!(!app.is_built("flaky"));

        let conn = app.safe_get_as::<Connection>("flaky").unwrap();
        assert_eq!(conn.id, 1);
        assert_eq!(attempts.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_unshared_build_racing_delete_returns_closed() {
        let deleting = Arc::new(Barrier::new(2));
        let deleted = Arc::new(Barrier::new(2));
        let closes = Arc::new(AtomicU32::new(0));
        let in_close = Arc::clone(&closes);

        let paused = |deleting: &Arc<Barrier>, deleted: &Arc<Barrier>| {
            let (deleting, deleted) = (Arc::clone(deleting), Arc::clone(deleted));
            move |_: &Container| {
                deleting.wait();
                deleted.wait();
                Ok::<_, BoxError>(Connection { id: 7 })
            }
        };
        let app = build(vec![
            Definition::new("plain")
                .scope(REQUEST)
                .build(paused(&deleting, &deleted))
                .unshared(),
            Definition::new("tracked")
                .scope(REQUEST)
                .build(paused(&deleting, &deleted))
                .close(move |_: &Connection| {
                    in_close.fetch_add(1, Ordering::SeqCst);
                    Err::<(), _>("flush failed")
                })
                .unshared(),
        ]);

        for name in ["plain", "tracked"] {
            let request = app.sub_container().unwrap();
            let getter = {
                let request = request.clone();
                thread::spawn(move || request.safe_get(name))
            };

            deleting.wait();
            request.delete().unwrap();
            deleted.wait();

            let err = getter.join().unwrap().unwrap_err();
            assert!(err.is_closed(), "{name}: {err}");
        }

        // The object built after teardown is still closed, once
        assert_eq!(closes.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_clean_racing_owner_delete_closes_chain_first() {
        let log = Arc::new(StdMutex::new(Vec::new()));
        let closing = Arc::new(Barrier::new(2));
        let (in_close, started) = (Arc::clone(&log), Arc::clone(&closing));
        let app = build(vec![
            logged("db", APP, Arc::clone(&log)),
            Definition::new("report")
                .scope(REQUEST)
                .build(|_| Ok::<_, BoxError>(Connection { id: 0 }))
                .close(move |_: &Connection| {
                    started.wait();
                    thread::sleep(Duration::from_millis(200));
                    in_close.lock().unwrap().push("report");
                    Ok::<_, BoxError>(())
                }),
        ]);

        app.safe_get("db").unwrap();
        app.unscoped_safe_get("report").unwrap();

        let cleaner = {
            let app = app.clone();
            thread::spawn(move || app.clean())
        };

        closing.wait();
        app.delete_with_sub_containers().unwrap();

        assert_eq!(*log.lock().unwrap(), ["report", "db"]);
        cleaner.join().unwrap().unwrap();
    }

    #[test]
    fn test_delete_unlinks_from_parent() {
        let app = build(vec![]);
        let request = app.sub_container().unwrap();
        assert_eq!(app.children_count(), 1);

        request.delete().unwrap();
        assert_eq!(app.children_count(), 0);
        assert!(!app.is_closed());
    }

    #[test]
    fn test_delete_deferred_until_last_child() {
        let closes = Arc::new(AtomicU32::new(0));
        let in_close = Arc::clone(&closes);
        let app = build(vec![
            Definition::new("session")
                .scope(REQUEST)
                .build(|_| Ok::<_, BoxError>(Connection { id: 0 }))
                .close(move |_: &Connection| {
                    in_close.fetch_add(1, Ordering::SeqCst);
                    Ok::<_, BoxError>(())
                }),
        ]);

        let request = app.sub_container().unwrap();
        request.safe_get("session").unwrap();
        let sub = request.sub_container().unwrap();

        request.delete().unwrap();
        assert!(!request.is_closed());
        assert_eq!(closes.load(Ordering::SeqCst), 0);
        // Still usable while deletion is pending
        request.safe_get("session").unwrap();

        sub.delete().unwrap();
        assert!(sub.is_closed());
        assert!(request.is_closed());
        assert_eq!(closes.load(Ordering::SeqCst), 1);
        assert_eq!(app.children_count(), 0);

        assert!(request.delete().unwrap_err().is_closed());
        assert_eq!(closes.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_close_failures_do_not_stop_teardown() {
        let log = Arc::new(StdMutex::new(Vec::new()));
        let app = build(vec![
            Definition::new("broken")
                .scope(REQUEST)
                .build(|_| Ok::<_, BoxError>(Connection { id: 0 }))
                .close(|_: &Connection| Err("socket already closed")),
            logged("session", REQUEST, Arc::clone(&log)),
        ]);

        let r1 = app.sub_container().unwrap();
        let r2 = app.sub_container().unwrap();
        for r in [&r1, &r2] {
            r.safe_get("broken").unwrap();
            r.safe_get("session").unwrap();
        }

        let err = app.delete_with_sub_containers().unwrap_err();
        match err {
            DiError::CloseFailed { failures } => {
                assert_eq!(failures.len(), 2);
                assert!(failures.iter().all(|f| f.name == "broken"));
                assert_eq!(failures[0].reason, "socket already closed");
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(log.lock().unwrap().len(), 2);
        assert!(r1.is_closed() && r2.is_closed() && app.is_closed());
    }

    #[test]
    fn test_parent_dropped() {
        let mut builder = Builder::default();
        builder
            .add(counted("db", APP, Arc::new(AtomicU32::new(0))))
            .unwrap();
        let request = builder.build().sub_container().unwrap();

        assert!(request.parent().is_none());
        assert!(matches!(request.safe_get("db"), Err(DiError::ParentDropped)));
    }

    #[test]
    fn test_new_from_provider() {
        let provider = vec![counted("db", APP, Arc::new(AtomicU32::new(0)))];
        let app = Container::new(&[], &provider).unwrap();
        assert!(app.contains("db"));
        assert!(app.definition("db").unwrap().declared_scope() == Some(APP));
    }

    #[test]
    #[should_panic(expected = "Object not found")]
    fn test_get_aborts() {
        let app = build(vec![]);
        let _ = app.get("missing");
    }

    #[test]
    fn test_concurrent_sub_containers_and_delete() {
        let calls = Arc::new(AtomicU32::new(0));
        let app = build(vec![
            counted("db", APP, Arc::clone(&calls)),
            counted("session", REQUEST, Arc::new(AtomicU32::new(0))),
        ]);

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let app = app.clone();
                thread::spawn(move || {
                    for _ in 0..50 {
                        let request = app.sub_container().unwrap();
                        request.safe_get("db").unwrap();
                        request.safe_get("session").unwrap();
                        request.delete().unwrap();
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(app.children_count(), 0);
    }
}
