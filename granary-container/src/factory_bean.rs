//! Factory-bean support — beans whose job is to produce another bean.
//!
//! A bean registered through [`FactoryBeanHandle`] is treated as an
//! indirection: plain lookups of its name return the *product*, while the
//! `&` dereference prefix returns the producer itself. Products of
//! singleton factory beans are cached once and routed through the
//! post-processing pipeline.

use std::any::TypeId;
use std::collections::HashMap;
use std::sync::Arc;

use once_cell::sync::Lazy;
use parking_lot::Mutex;
use tracing::{debug, trace};

use crate::BeanHandle;
use crate::error::{ContainerError, Result};
use crate::singleton::SingletonRegistry;

/// A bean that produces another object on demand.
pub trait FactoryBean: Send + Sync {
    /// Produces the object this factory exposes. `None` means "no bean";
    /// outside creation it is replaced by the shared null-bean sentinel.
    fn produce(&self) -> Result<Option<BeanHandle>>;

    /// Whether the product is a shared singleton (the default) or fresh
    /// per lookup.
    fn is_singleton(&self) -> bool {
        true
    }

    /// Type hint for the product, when the factory knows it up front.
    fn product_type(&self) -> Option<TypeId> {
        None
    }
}

/// The registered form of a factory bean.
///
/// Wrapping the producer in a concrete handle is what lets the container
/// recognize the indirection behind a type-erased [`BeanHandle`].
pub struct FactoryBeanHandle {
    inner: Arc<dyn FactoryBean>,
}

impl FactoryBeanHandle {
    /// Wraps a producer for registration.
    pub fn new<FB: FactoryBean + 'static>(factory: FB) -> Self {
        Self {
            inner: Arc::new(factory),
        }
    }

    /// The wrapped producer.
    pub fn factory(&self) -> &Arc<dyn FactoryBean> {
        &self.inner
    }
}

/// Sentinel standing in for "no bean".
///
/// Shared so that repeated lookups of an empty product preserve identity
/// semantics for downstream null checks.
pub struct NullBean;

static NULL_BEAN: Lazy<BeanHandle> = Lazy::new(|| Arc::new(NullBean));

pub(crate) fn null_bean() -> BeanHandle {
    NULL_BEAN.clone()
}

/// Returns `true` if `handle` is the shared null-bean sentinel.
pub fn is_null_bean(handle: &BeanHandle) -> bool {
    (**handle).downcast_ref::<NullBean>().is_some()
}

/// Applies the post-initialization pipeline to a factory product.
pub(crate) type ProductPostProcess<'a> = &'a dyn Fn(BeanHandle, &str) -> Result<BeanHandle>;

/// Cache of factory-bean products, keyed by the factory bean's name.
#[derive(Default)]
pub(crate) struct FactoryBeanSupport {
    products: Mutex<HashMap<String, BeanHandle>>,
}

impl FactoryBeanSupport {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Fast-path lookup of an already-cached product.
    pub(crate) fn cached_product(&self, name: &str) -> Option<BeanHandle> {
        self.products.lock().get(name).cloned()
    }

    /// Resolves the product of `factory`, caching it when the factory
    /// declares itself singleton and `name` is a registered singleton.
    ///
    /// While `name` is in creation the raw product is handed out
    /// temporarily and NOT cached, so that the post-processed product is
    /// the one that sticks.
    pub(crate) fn object_from_factory(
        &self,
        registry: &SingletonRegistry,
        factory: &Arc<dyn FactoryBean>,
        name: &str,
        should_post_process: bool,
        post_process: ProductPostProcess<'_>,
    ) -> Result<BeanHandle> {
        if factory.is_singleton() && registry.contains_singleton(name) {
            let _guard = registry.lock_singletons();

            if let Some(cached) = self.products.lock().get(name).cloned() {
                return Ok(cached);
            }

            let mut object = produce(registry, factory, name)?;

            if let Some(cached) = self.products.lock().get(name).cloned() {
                // A reentrant produce call landed first; keep its product
                object = cached;
            } else {
                if should_post_process {
                    if registry.is_currently_in_creation(name) {
                        trace!(
                            bean = %name,
                            "Returning raw factory product during creation, uncached"
                        );
                        return Ok(object);
                    }
                    registry.before_singleton_creation(name)?;
                    let processed = post_process(object.clone(), name);
                    registry.after_singleton_creation(name);
                    object = processed.map_err(|error| {
                        ContainerError::creation_failed(
                            name,
                            "Post-processing of the factory bean's product failed",
                            Some(error),
                        )
                    })?;
                }
                if registry.contains_singleton(name) {
                    debug!(bean = %name, "Caching product of singleton factory bean");
                    self.products
                        .lock()
                        .insert(name.to_string(), object.clone());
                }
            }
            Ok(object)
        } else {
            let mut object = produce(registry, factory, name)?;
            if should_post_process {
                object = post_process(object, name).map_err(|error| {
                    ContainerError::creation_failed(
                        name,
                        "Post-processing of the factory bean's product failed",
                        Some(error),
                    )
                })?;
            }
            Ok(object)
        }
    }

    pub(crate) fn remove_product(&self, name: &str) {
        self.products.lock().remove(name);
    }

    pub(crate) fn clear(&self) {
        self.products.lock().clear();
    }
}

fn produce(
    registry: &SingletonRegistry,
    factory: &Arc<dyn FactoryBean>,
    name: &str,
) -> Result<BeanHandle> {
    let product = factory.produce().map_err(|error| match error {
        ContainerError::CurrentlyInCreation(_) => error,
        other => ContainerError::creation_failed(
            name,
            "Factory bean threw on product creation",
            Some(other),
        ),
    })?;

    match product {
        Some(handle) => Ok(handle),
        None => {
            if registry.is_currently_in_creation(name) {
                Err(ContainerError::currently_in_creation(name))
            } else {
                trace!(bean = %name, "Factory bean produced no object; substituting null-bean");
                Ok(null_bean())
            }
        }
    }
}
