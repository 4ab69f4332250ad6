//! Bean lifecycle scopes.
//!
//! Scopes determine how instances of a bean are shared:
//! - [`BeanScope::Singleton`] — at most one instance per container
//! - [`BeanScope::Prototype`] — a fresh instance on every lookup
//! - [`BeanScope::Custom`] — delegated to a registered [`ScopeStrategy`]
//!
//! The identifiers `"singleton"` and `"prototype"` are reserved; a custom
//! scope must be registered under a different name.

use std::fmt;
use std::sync::Arc;

use crate::BeanHandle;
use crate::error::Result;

/// Reserved identifier for the singleton scope.
pub const SINGLETON_SCOPE: &str = "singleton";

/// Reserved identifier for the prototype scope.
pub const PROTOTYPE_SCOPE: &str = "prototype";

/// Defines how instances of a bean are shared by the container.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum BeanScope {
    /// At most one instance per container.
    ///
    /// Created on first lookup, cached in the singleton registry, torn down
    /// when the registry destroys its singletons.
    Singleton,

    /// A fresh instance on every lookup.
    ///
    /// The container runs the creation pipeline and hands the instance
    /// over; it keeps no record of it afterwards. Teardown is the caller's
    /// responsibility. This is a deliberate non-symmetry with the
    /// singleton scope.
    Prototype,

    /// Instance sharing delegated to a [`ScopeStrategy`] registered under
    /// this name.
    Custom(Arc<str>),
}

impl BeanScope {
    /// Maps a scope identifier to a scope, honoring the reserved names.
    pub fn from_name(name: &str) -> Self {
        match name {
            SINGLETON_SCOPE => BeanScope::Singleton,
            PROTOTYPE_SCOPE => BeanScope::Prototype,
            other => BeanScope::Custom(Arc::from(other)),
        }
    }

    /// The scope identifier.
    pub fn name(&self) -> &str {
        match self {
            BeanScope::Singleton => SINGLETON_SCOPE,
            BeanScope::Prototype => PROTOTYPE_SCOPE,
            BeanScope::Custom(name) => name,
        }
    }

    /// Returns `true` for the singleton scope.
    #[inline]
    pub fn is_singleton(&self) -> bool {
        matches!(self, BeanScope::Singleton)
    }

    /// Returns `true` for the prototype scope.
    #[inline]
    pub fn is_prototype(&self) -> bool {
        matches!(self, BeanScope::Prototype)
    }
}

impl fmt::Display for BeanScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Storage strategy for a custom scope.
///
/// The container calls [`get`](ScopeStrategy::get) with a producer that
/// runs the full creation pipeline; the strategy decides whether to reuse
/// a stored instance or invoke the producer and keep the result.
pub trait ScopeStrategy: Send + Sync {
    /// Returns the instance for `name` in this scope, creating it via
    /// `producer` if the scope holds none.
    fn get(
        &self,
        name: &str,
        producer: &dyn Fn() -> Result<BeanHandle>,
    ) -> Result<BeanHandle>;

    /// Removes the instance for `name` from this scope, returning it if
    /// one was stored.
    fn remove(&self, name: &str) -> Option<BeanHandle>;
}
