//! Singleton registry — the three-tier cache and lifecycle engine.
//!
//! Guarantees at most one instance per singleton name under concurrent
//! lookup, resolves circular references by exposing early references, and
//! drives teardown in reverse dependency order.
//!
//! # The three tiers
//! 1. **Primary cache** — fully initialized singletons, read without a lock
//! 2. **Early cache** — stabilized partial references for in-creation beans
//! 3. **Producer cache** — deferred producers that materialize the early
//!    reference exactly once, on first demand
//!
//! # The singleton mutex
//! One reentrant mutex serializes creation, cache mutation, and the
//! in-creation set. Creation holds it across the user factory, which is the
//! deliberate contention point that makes cycle detection tractable: a
//! recursive `get_bean` on the creating thread re-enters the lock, a second
//! thread blocks until creation completes. Collaborators needing atomic
//! compound operations acquire the same lock via
//! [`SingletonRegistry::lock_singletons`].

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};

use dashmap::{DashMap, DashSet};
use parking_lot::{Mutex, ReentrantMutex, ReentrantMutexGuard, RwLock};
use tracing::{debug, instrument, trace, warn};

use granary_support::rendering::{TeardownEntry, render_teardown};

use crate::BeanHandle;
use crate::alias::AliasRegistry;
use crate::error::{ContainerError, MAX_SUPPRESSED, Result};
use crate::graph::DependencyTracker;

/// Deferred producer for an early reference, consumed exactly once.
pub type SingletonProducer = Box<dyn FnOnce() -> BeanHandle + Send>;

/// Teardown callback recorded for a bean with a destruction hook.
pub trait DisposableBean: Send {
    /// Releases whatever the bean holds. Errors are logged, never rethrown.
    fn destroy(&mut self) -> Result<()>;
}

impl<F> DisposableBean for F
where
    F: FnMut() -> Result<()> + Send,
{
    fn destroy(&mut self) -> Result<()> {
        self()
    }
}

/// Shared registry of singleton bean instances.
///
/// Owns every cached instance; callers receive shared handles whose
/// lifetime is bounded by [`destroy_singletons`](Self::destroy_singletons).
pub struct SingletonRegistry {
    aliases: AliasRegistry,

    /// Tier 1: canonical name → fully initialized instance
    singletons: DashMap<String, BeanHandle>,
    /// Tier 2: canonical name → partially initialized instance
    early_singletons: Mutex<HashMap<String, BeanHandle>>,
    /// Tier 3: canonical name → deferred producer of the early reference
    producers: Mutex<HashMap<String, SingletonProducer>>,

    /// Names that have entered creation, in insertion order
    registered: Mutex<Vec<String>>,
    /// Names whose creation is in progress on some thread
    in_creation: DashSet<String>,
    /// Names exempted from in-creation checks
    creation_exclusions: DashSet<String>,

    /// Per-creation-frame collection of suppressed failures
    suppressed: Mutex<Option<Vec<ContainerError>>>,
    /// name → teardown callback, insertion-ordered
    disposables: Mutex<Vec<(String, Box<dyn DisposableBean>)>>,
    tracker: DependencyTracker,
    destroying: AtomicBool,

    /// Notified whenever a name leaves the caches; lets collaborators keep
    /// derived caches (e.g. factory-bean products) in step
    remove_listener: RwLock<Option<Box<dyn Fn(&str) + Send + Sync>>>,

    creation_lock: ReentrantMutex<()>,
}

impl SingletonRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self {
            aliases: AliasRegistry::new(),
            singletons: DashMap::new(),
            early_singletons: Mutex::new(HashMap::new()),
            producers: Mutex::new(HashMap::new()),
            registered: Mutex::new(Vec::new()),
            in_creation: DashSet::new(),
            creation_exclusions: DashSet::new(),
            suppressed: Mutex::new(None),
            disposables: Mutex::new(Vec::new()),
            tracker: DependencyTracker::new(),
            destroying: AtomicBool::new(false),
            remove_listener: RwLock::new(None),
            creation_lock: ReentrantMutex::new(()),
        }
    }

    /// The alias registry backing canonical-name resolution.
    pub fn aliases(&self) -> &AliasRegistry {
        &self.aliases
    }

    /// Acquires the singleton mutex.
    ///
    /// This is the same lock the registry uses internally; holding the
    /// guard makes compound cache operations atomic with creation.
    pub fn lock_singletons(&self) -> ReentrantMutexGuard<'_, ()> {
        self.creation_lock.lock()
    }

    // ── Registration ──

    /// Registers an externally constructed instance under `name`.
    ///
    /// # Errors
    /// [`ContainerError::IllegalState`] if a singleton is already bound
    /// under this name.
    pub fn register_singleton(&self, name: &str, handle: BeanHandle) -> Result<()> {
        let _guard = self.creation_lock.lock();
        self.add_singleton(name, handle)?;
        debug!(bean = %name, "Registered externally supplied singleton");
        Ok(())
    }

    /// Publishes a completed singleton: primary cache in, early and
    /// producer entries out, registration order recorded.
    ///
    /// Never silently replaces; an occupied name is an error.
    pub(crate) fn add_singleton(&self, name: &str, handle: BeanHandle) -> Result<()> {
        let _guard = self.creation_lock.lock();
        if self.singletons.contains_key(name) {
            return Err(ContainerError::illegal_state(format!(
                "Could not register singleton '{name}': \
                 an instance is already bound under this name",
            )));
        }
        self.singletons.insert(name.to_string(), handle);
        self.early_singletons.lock().remove(name);
        self.producers.lock().remove(name);
        self.track_registered(name);
        Ok(())
    }

    /// Registers the deferred producer of `name`'s early reference.
    ///
    /// Only meaningful while `name` is in creation; a completed singleton
    /// makes this a no-op.
    pub(crate) fn add_singleton_producer(&self, name: &str, producer: SingletonProducer) {
        let _guard = self.creation_lock.lock();
        if self.singletons.contains_key(name) {
            return;
        }
        trace!(bean = %name, "Registered early-reference producer");
        self.producers.lock().insert(name.to_string(), producer);
        self.early_singletons.lock().remove(name);
        self.track_registered(name);
    }

    fn track_registered(&self, name: &str) {
        let mut registered = self.registered.lock();
        if !registered.iter().any(|n| n == name) {
            registered.push(name.to_string());
        }
    }

    // ── Lookup ──

    /// Three-tier lookup.
    ///
    /// The primary cache is consulted without a lock. A name in creation
    /// is served from the early cache when `allow_early` is set,
    /// materializing the producer exactly once under the singleton mutex.
    /// Producers run while the lock is held; they must not block.
    pub fn singleton(&self, name: &str, allow_early: bool) -> Option<BeanHandle> {
        if let Some(handle) = self.singletons.get(name).map(|e| e.value().clone()) {
            return Some(handle);
        }
        if !self.is_currently_in_creation(name) || !allow_early {
            return None;
        }

        let _guard = self.creation_lock.lock();
        // The creation frame may have completed while this lookup waited
        // on the mutex, clearing the early and producer tiers; the primary
        // cache is authoritative once registration has happened
        if let Some(handle) = self.singletons.get(name).map(|e| e.value().clone()) {
            return Some(handle);
        }
        if let Some(handle) = self.early_singletons.lock().get(name).cloned() {
            return Some(handle);
        }
        let producer = self.producers.lock().remove(name)?;
        trace!(bean = %name, "Materializing early reference from producer");
        let early = producer();
        self.early_singletons
            .lock()
            .insert(name.to_string(), early.clone());
        Some(early)
    }

    /// Peeks the early cache without consuming the producer.
    pub(crate) fn early_reference(&self, name: &str) -> Option<BeanHandle> {
        let _guard = self.creation_lock.lock();
        self.early_singletons.lock().get(name).cloned()
    }

    /// Returns `true` if a completed singleton is bound under `name`.
    pub fn contains_singleton(&self, name: &str) -> bool {
        self.singletons.contains_key(name)
    }

    /// Names that have entered creation, in registration order.
    pub fn singleton_names(&self) -> Vec<String> {
        self.registered.lock().clone()
    }

    /// Number of registered singleton names.
    pub fn singleton_count(&self) -> usize {
        self.registered.lock().len()
    }

    // ── Create-or-get ──

    /// Returns the singleton for `name`, creating it via `factory` when
    /// absent. Serialized on the singleton mutex; recursive creation on
    /// the same thread re-enters.
    ///
    /// # Errors
    /// - [`ContainerError::CreationNotAllowed`] while destruction runs
    /// - [`ContainerError::CurrentlyInCreation`] when `name` is already in
    ///   creation on this registry
    /// - whatever `factory` fails with; a [`ContainerError::CreationFailed`]
    ///   leaves this frame carrying the suppressed failures
    pub fn singleton_or_create<F>(&self, name: &str, factory: F) -> Result<BeanHandle>
    where
        F: FnOnce() -> Result<BeanHandle>,
    {
        let _guard = self.creation_lock.lock();

        if let Some(existing) = self.singletons.get(name).map(|e| e.value().clone()) {
            return Ok(existing);
        }
        if self.destroying.load(Ordering::SeqCst) {
            warn!(bean = %name, "Rejected singleton creation during destruction");
            return Err(ContainerError::CreationNotAllowed {
                bean_name: name.to_string(),
            });
        }

        debug!(bean = %name, "Creating shared instance of singleton bean");
        self.before_singleton_creation(name)?;
        let owns_suppressed = self.begin_suppression();

        match factory() {
            Ok(handle) => {
                self.end_creation_frame(name, owns_suppressed);
                self.add_singleton(name, handle.clone())?;
                Ok(handle)
            }
            Err(ContainerError::IllegalState { message }) => {
                // A reentrant creation may have published the instance
                // before this frame observed the conflict; adopt it then.
                let adopted = self.singletons.get(name).map(|e| e.value().clone());
                self.end_creation_frame(name, owns_suppressed);
                match adopted {
                    Some(handle) => {
                        debug!(bean = %name, "Adopted reentrantly created singleton");
                        Ok(handle)
                    }
                    None => Err(ContainerError::IllegalState { message }),
                }
            }
            Err(ContainerError::CreationFailed(mut failure)) => {
                if owns_suppressed {
                    failure.suppressed = self.take_suppressed();
                }
                self.end_creation_frame(name, owns_suppressed);
                self.remove_singleton(name);
                Err(ContainerError::CreationFailed(failure))
            }
            Err(other) => {
                self.end_creation_frame(name, owns_suppressed);
                self.remove_singleton(name);
                Err(other)
            }
        }
    }

    fn end_creation_frame(&self, name: &str, owns_suppressed: bool) {
        if owns_suppressed {
            self.clear_suppressed();
        }
        self.after_singleton_creation(name);
    }

    // ── In-creation tracking ──

    /// Marks `name` as in creation.
    ///
    /// # Errors
    /// [`ContainerError::CurrentlyInCreation`] if it already is.
    pub fn before_singleton_creation(&self, name: &str) -> Result<()> {
        if !self.creation_exclusions.contains(name) && !self.in_creation.insert(name.to_string())
        {
            return Err(ContainerError::currently_in_creation(name));
        }
        Ok(())
    }

    /// Clears the in-creation mark for `name`.
    ///
    /// # Panics
    /// If the mark is absent; that means the engine state is corrupt.
    pub fn after_singleton_creation(&self, name: &str) {
        if !self.creation_exclusions.contains(name) && self.in_creation.remove(name).is_none() {
            panic!("Singleton '{name}' isn't currently in creation");
        }
    }

    /// Whether `name` is currently being created on some thread.
    pub fn is_currently_in_creation(&self, name: &str) -> bool {
        self.in_creation.contains(name)
    }

    /// Exempts `name` from in-creation checks (or lifts the exemption).
    pub fn set_creation_excluded(&self, name: &str, excluded: bool) {
        if excluded {
            self.creation_exclusions.insert(name.to_string());
        } else {
            self.creation_exclusions.remove(name);
        }
    }

    // ── Suppressed failures ──

    /// Claims the suppressed-failure collection for this creation frame if
    /// no outer frame owns it yet. Returns `true` when this frame owns it.
    fn begin_suppression(&self) -> bool {
        let mut slot = self.suppressed.lock();
        if slot.is_none() {
            *slot = Some(Vec::new());
            true
        } else {
            false
        }
    }

    /// Records a failure to be attached to the creation error raised by
    /// the owning frame. Beyond [`MAX_SUPPRESSED`] entries, drops silently.
    pub(crate) fn record_suppressed(&self, error: ContainerError) {
        let mut slot = self.suppressed.lock();
        if let Some(list) = slot.as_mut() {
            if list.len() < MAX_SUPPRESSED {
                list.push(error);
            }
        }
    }

    fn take_suppressed(&self) -> Vec<ContainerError> {
        self.suppressed.lock().take().unwrap_or_default()
    }

    fn clear_suppressed(&self) {
        *self.suppressed.lock() = None;
    }

    // ── Dependency and containment bookkeeping ──

    /// Records that `dependent` depends on `name` (canonicalized).
    pub fn register_dependent_bean(&self, name: &str, dependent: &str) {
        let canonical = self.aliases.canonical_name(name);
        self.tracker.register_dependent(&canonical, dependent);
    }

    /// Records that `outer` contains `inner`; the implied dependency edge
    /// makes the outer bean die before the inner one.
    pub fn register_contained_bean(&self, inner: &str, outer: &str) {
        self.tracker.register_contained(inner, outer);
        self.register_dependent_bean(inner, outer);
    }

    /// True if `dependent` transitively depends on `name`.
    pub fn is_dependent(&self, name: &str, dependent: &str) -> bool {
        let canonical = self.aliases.canonical_name(name);
        self.tracker.is_dependent(&canonical, dependent)
    }

    /// Direct dependents of `name`.
    pub fn dependents_of(&self, name: &str) -> Vec<String> {
        let canonical = self.aliases.canonical_name(name);
        self.tracker.dependents(&canonical)
    }

    /// Names `name` depends on.
    pub fn dependencies_of(&self, name: &str) -> Vec<String> {
        self.tracker.dependencies_of(name)
    }

    pub(crate) fn has_dependents(&self, name: &str) -> bool {
        let canonical = self.aliases.canonical_name(name);
        self.tracker.has_dependents(&canonical)
    }

    // ── Disposables ──

    /// Records the teardown callback for `name`, replacing any earlier one
    /// in place (the original insertion position is kept).
    pub fn register_disposable(&self, name: &str, disposable: Box<dyn DisposableBean>) {
        let mut disposables = self.disposables.lock();
        if let Some(entry) = disposables.iter_mut().find(|(n, _)| n == name) {
            entry.1 = disposable;
        } else {
            disposables.push((name.to_string(), disposable));
        }
    }

    pub(crate) fn set_remove_listener(&self, listener: Box<dyn Fn(&str) + Send + Sync>) {
        *self.remove_listener.write() = Some(listener);
    }

    // ── Destruction ──

    /// Drops `name` from all three tiers and the registered-name order.
    pub fn remove_singleton(&self, name: &str) {
        let _guard = self.creation_lock.lock();
        self.singletons.remove(name);
        self.early_singletons.lock().remove(name);
        self.producers.lock().remove(name);
        self.registered.lock().retain(|n| n != name);
        let listener = self.remove_listener.read();
        if let Some(listener) = listener.as_ref() {
            listener(name);
        }
    }

    /// Destroys every registered singleton, dependents before dependees,
    /// in reverse registration order. Teardown errors are logged and never
    /// propagate.
    #[instrument(skip(self), name = "destroy_singletons")]
    pub fn destroy_singletons(&self) {
        debug!(count = self.singleton_count(), "Destroying singletons");
        self.destroying.store(true, Ordering::SeqCst);

        let teardown_order: Vec<String> = {
            let disposables = self.disposables.lock();
            disposables.iter().rev().map(|(n, _)| n.clone()).collect()
        };
        if !teardown_order.is_empty() {
            let plan: Vec<TeardownEntry> = teardown_order
                .iter()
                .map(|name| TeardownEntry {
                    bean_name: name.clone(),
                    triggered_by: self.tracker.dependencies_of(name).into_iter().next(),
                })
                .collect();
            debug!(plan = %render_teardown(&plan), "Singleton teardown plan");
        }

        for name in &teardown_order {
            self.destroy_singleton(name);
        }

        self.tracker.clear();
        {
            let _guard = self.creation_lock.lock();
            self.singletons.clear();
            self.early_singletons.lock().clear();
            self.producers.lock().clear();
            self.registered.lock().clear();
        }
        self.destroying.store(false, Ordering::SeqCst);
        debug!("Singleton destruction complete");
    }

    /// Destroys one singleton: removes it from the caches, tears down its
    /// dependents first, runs its destroy hook, then its contained beans.
    pub fn destroy_singleton(&self, name: &str) {
        self.remove_singleton(name);

        let disposable = {
            let mut disposables = self.disposables.lock();
            disposables
                .iter()
                .position(|(n, _)| n == name)
                .map(|idx| disposables.remove(idx).1)
        };
        self.destroy_bean(name, disposable);
    }

    fn destroy_bean(&self, name: &str, disposable: Option<Box<dyn DisposableBean>>) {
        // Dependents die first
        let dependents = self.tracker.take_dependents(name);
        if !dependents.is_empty() {
            trace!(bean = %name, dependents = ?dependents, "Destroying dependents first");
            for dependent in &dependents {
                self.destroy_singleton(dependent);
            }
        }

        if let Some(mut disposable) = disposable {
            debug!(bean = %name, "Invoking destroy hook");
            if let Err(error) = disposable.destroy() {
                warn!(bean = %name, %error, "Destroy hook of bean threw an error");
            }
        }

        for inner in self.tracker.take_contained(name) {
            self.destroy_singleton(&inner);
        }

        self.tracker.purge(name);
    }

    /// Whether [`destroy_singletons`](Self::destroy_singletons) is running.
    pub fn is_destroying(&self) -> bool {
        self.destroying.load(Ordering::SeqCst)
    }
}

impl Default for SingletonRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for SingletonRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SingletonRegistry")
            .field("registered", &self.singleton_count())
            .field("in_creation", &self.in_creation.len())
            .finish()
    }
}
