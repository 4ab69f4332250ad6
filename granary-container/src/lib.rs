//! Core container implementation for Granary: the singleton registry and
//! bean lifecycle engine behind the hierarchical bean factory.

use std::any::Any;
use std::sync::Arc;

pub mod alias;
pub mod container;
pub mod definition;
pub mod error;
pub mod factory_bean;
mod graph;
pub mod processor;
pub mod provider;
pub mod scope;
pub mod singleton;

pub use container::prelude;
pub use error::{ContainerError, Result};
pub use scope::BeanScope;

/// Shared, type-erased handle to a managed bean instance.
///
/// Identity is handle identity: two lookups of the same singleton return
/// handles for which `Arc::ptr_eq` holds.
pub type BeanHandle = Arc<dyn Any + Send + Sync>;

/// Wraps a value into a [`BeanHandle`].
pub fn handle_of<T: Send + Sync + 'static>(value: T) -> BeanHandle {
    Arc::new(value)
}

/// Downcasts a [`BeanHandle`] to a concrete type.
pub fn downcast_handle<T: Send + Sync + 'static>(handle: &BeanHandle) -> Option<Arc<T>> {
    handle.clone().downcast::<T>().ok()
}
