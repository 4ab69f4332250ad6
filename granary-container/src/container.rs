//! # The bean factory — heart of Granary
//!
//! The user-visible lookup surface. Resolves names through the alias
//! registry, serves singletons from the three-tier cache, delegates
//! unknown names to an optional parent factory, and drives the creation
//! pipeline for definitions: instantiate, early-expose, populate,
//! pre-init processors, init hook, post-init processors, disposable
//! registration.
//!
//! # Architecture
//! ```text
//! get_bean ──> transformed name ──> singleton cache (3 tiers)
//!                  │                     │ miss
//!                  │                     ▼
//!                  │               parent factory?
//!                  │                     │ miss
//!                  ▼                     ▼
//!            alias registry        bean definition ──> creation pipeline
//! ```
//!
//! Capabilities are split into narrow traits ([`BeanFactory`],
//! [`ListableBeanFactory`], [`HierarchicalBeanFactory`],
//! [`ConfigurableBeanFactory`]); [`CoreBeanFactory`] satisfies the union.
//! Callers take the narrowest capability they need.
//!
//! # Examples
//! ```rust
//! use granary_container::prelude::*;
//! use std::sync::Arc;
//!
//! struct AuditLog;
//! struct OrderService {
//!     audit: Arc<AuditLog>,
//! }
//!
//! let factory = CoreBeanFactory::new();
//! factory
//!     .register_definition("auditLog", BeanDefinition::of::<AuditLog, _>(|_| Ok(AuditLog)))
//!     .unwrap();
//! factory
//!     .register_definition(
//!         "orderService",
//!         BeanDefinition::of::<OrderService, _>(|f| {
//!             Ok(OrderService {
//!                 audit: bean_of::<AuditLog>(f, "auditLog")?,
//!             })
//!         }),
//!     )
//!     .unwrap();
//!
//! let service = factory.bean_of::<OrderService>("orderService").unwrap();
//! let audit = factory.bean_of::<AuditLog>("auditLog").unwrap();
//! assert!(Arc::ptr_eq(&service.audit, &audit));
//! ```

use std::any::{Any, TypeId, type_name};
use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{debug, info, instrument, trace};

use granary_support::rendering::{shorten_type_name, suggest_similar};

use crate::alias::{AliasRegistry, StringValueResolver};
use crate::definition::{BeanArgs, BeanDefinition, DefinitionRegistry, PropertyValue};
use crate::error::{
    ContainerError, CurrentlyInCreationError, NoSuchBeanError, NoUniqueBeanError,
    NotOfRequiredTypeError, Result,
};
use crate::factory_bean::{FactoryBeanHandle, FactoryBeanSupport, is_null_bean};
use crate::processor::{BeanPostProcessor, ProcessorPipeline};
use crate::provider::DefinitionProvider;
use crate::scope::{BeanScope, PROTOTYPE_SCOPE, SINGLETON_SCOPE, ScopeStrategy};
use crate::BeanHandle;
use crate::singleton::SingletonRegistry;

/// Leading marker requesting the factory bean itself instead of its
/// product.
pub const FACTORY_BEAN_PREFIX: &str = "&";

// ============================================================
// Capability traits
// ============================================================

/// The basic lookup surface. Object-safe; take this when a name-based
/// lookup is all you need.
pub trait BeanFactory: Send + Sync {
    /// Resolves the bean registered under `name` (or an alias of it).
    ///
    /// A leading `&` returns the factory bean itself instead of its
    /// product.
    fn bean(&self, name: &str) -> Result<BeanHandle>;

    /// Like [`bean`](Self::bean), with explicit arguments for the
    /// instantiate closure. Arguments only reach the closure when an
    /// instance is actually created; a cached singleton is returned as-is.
    fn bean_with_args(&self, name: &str, args: BeanArgs) -> Result<BeanHandle>;

    /// Whether `name` resolves to a definition or registered singleton,
    /// here or in a parent factory.
    fn contains_bean(&self, name: &str) -> bool;

    /// Whether lookups of `name` share one instance.
    fn is_singleton(&self, name: &str) -> Result<bool>;

    /// Whether lookups of `name` produce a fresh instance each time.
    fn is_prototype(&self, name: &str) -> Result<bool>;

    /// Whether the bean under `name` would resolve to the given type.
    fn is_type_match(&self, name: &str, type_id: TypeId) -> Result<bool>;

    /// The type the bean under `name` resolves to, when determinable
    /// without creating it.
    fn bean_type(&self, name: &str) -> Result<Option<TypeId>>;

    /// Every alias whose resolution ends at `name`.
    fn aliases(&self, name: &str) -> Vec<String>;
}

/// Resolves a typed bean from any [`BeanFactory`].
///
/// Use this inside definition closures:
///
/// ```rust,ignore
/// BeanDefinition::of::<OrderService, _>(|factory| {
///     let audit: Arc<AuditLog> = bean_of(factory, "auditLog")?;
///     Ok(OrderService::new(audit))
/// })
/// ```
pub fn bean_of<T: Any + Send + Sync>(factory: &dyn BeanFactory, name: &str) -> Result<Arc<T>> {
    let handle = factory.bean(name)?;
    downcast_bean::<T>(handle, name)
}

fn downcast_bean<T: Any + Send + Sync>(handle: BeanHandle, name: &str) -> Result<Arc<T>> {
    let was_null = is_null_bean(&handle);
    handle.downcast::<T>().map_err(|_| {
        ContainerError::NotOfRequiredType(NotOfRequiredTypeError {
            bean_name: name.to_string(),
            required: shorten_type_name(type_name::<T>()),
            actual: was_null.then(|| "NullBean".to_string()),
        })
    })
}

/// Enumeration over the registered definitions.
pub trait ListableBeanFactory: BeanFactory {
    /// All definition names, in registration order.
    fn definition_names(&self) -> Vec<String>;

    /// Number of registered definitions.
    fn definition_count(&self) -> usize;

    /// Whether a definition is registered under `name`.
    fn contains_definition(&self, name: &str) -> bool;

    /// Names resolving to the given type, definitions first.
    fn names_for_type(&self, type_id: TypeId) -> Vec<String>;
}

/// Typed convenience methods over a [`ListableBeanFactory`].
pub trait BeanFactoryExt: ListableBeanFactory {
    /// Resolves `name` and downcasts to `T`.
    fn bean_of<T: Any + Send + Sync>(&self, name: &str) -> Result<Arc<T>>
    where
        Self: Sized,
    {
        bean_of::<T>(self, name)
    }

    /// Resolves the single bean of type `T`.
    ///
    /// # Errors
    /// [`ContainerError::NoUniqueBean`] when several names match;
    /// [`ContainerError::NoSuchBean`] when none does.
    fn bean_by_type<T: Any + Send + Sync>(&self) -> Result<Arc<T>>
    where
        Self: Sized,
    {
        let mut candidates = self.names_for_type(TypeId::of::<T>());
        match candidates.len() {
            0 => Err(ContainerError::NoSuchBean(NoSuchBeanError {
                bean_name: shorten_type_name(type_name::<T>()),
                suggestions: Vec::new(),
            })),
            1 => {
                let name = candidates.remove(0);
                self.bean_of::<T>(&name)
            }
            _ => Err(ContainerError::NoUniqueBean(NoUniqueBeanError {
                type_name: shorten_type_name(type_name::<T>()),
                candidates,
            })),
        }
    }
}

impl<T: ListableBeanFactory> BeanFactoryExt for T {}

/// Parent-factory awareness.
pub trait HierarchicalBeanFactory: BeanFactory {
    /// The configured parent factory, if any.
    fn parent_factory(&self) -> Option<Arc<dyn BeanFactory>>;

    /// Whether `name` is known to this factory, ignoring the parent.
    fn contains_local_bean(&self, name: &str) -> bool;
}

/// The configuration surface of a bean factory.
pub trait ConfigurableBeanFactory: HierarchicalBeanFactory {
    /// Wires the parent factory. Settable once.
    fn set_parent(&self, parent: Arc<dyn BeanFactory>) -> Result<()>;

    /// Registers a definition under `name`.
    fn register_definition(&self, name: &str, definition: BeanDefinition) -> Result<()>;

    /// Removes the definition for `name`.
    fn remove_definition(&self, name: &str) -> Result<()>;

    /// Binds `alias → name` in the alias registry.
    fn register_alias(&self, name: &str, alias: &str) -> Result<()>;

    /// Appends a post-processor to the pipeline (ordered by
    /// [`BeanPostProcessor::order`]).
    fn add_post_processor(&self, processor: Arc<dyn BeanPostProcessor>);

    /// Registers a custom scope. The `singleton` and `prototype`
    /// identifiers are reserved.
    fn register_scope(&self, scope_name: &str, strategy: Arc<dyn ScopeStrategy>) -> Result<()>;

    /// Appends a resolver to the embedded-value resolution chain.
    fn add_embedded_value_resolver(&self, resolver: Arc<dyn StringValueResolver>);

    /// Runs `value` through the resolver chain; `None` when some resolver
    /// maps it to nothing.
    fn resolve_embedded_value(&self, value: &str) -> Option<String>;

    /// Attaches an opaque capability token propagated to collaborators.
    /// Absence means unrestricted.
    fn set_capability_token(&self, token: Arc<dyn Any + Send + Sync>);

    /// The attached capability token, if any.
    fn capability_token(&self) -> Option<Arc<dyn Any + Send + Sync>>;

    /// Freezes the definition configuration.
    fn freeze_configuration(&self);

    /// Whether the definition configuration is frozen.
    fn is_configuration_frozen(&self) -> bool;

    /// Eagerly creates every non-lazy singleton definition, in
    /// registration order.
    fn pre_instantiate_singletons(&self) -> Result<()>;

    /// Destroys all singletons and clears the caches.
    fn destroy_singletons(&self);
}

// ============================================================
// CoreBeanFactory
// ============================================================

thread_local! {
    static PROTOTYPES_IN_CREATION: RefCell<Vec<String>> = const { RefCell::new(Vec::new()) };
}

/// Pops the prototype in-creation mark when the creation frame unwinds.
struct PrototypeCreationGuard;

impl PrototypeCreationGuard {
    fn new(name: &str) -> Self {
        PROTOTYPES_IN_CREATION.with(|tls| tls.borrow_mut().push(name.to_string()));
        Self
    }
}

impl Drop for PrototypeCreationGuard {
    fn drop(&mut self) {
        PROTOTYPES_IN_CREATION.with(|tls| {
            tls.borrow_mut().pop();
        });
    }
}

/// The concrete bean factory.
///
/// Thread-safe; share it behind an `Arc` and resolve from any thread.
/// Creation serializes on the singleton registry's mutex.
pub struct CoreBeanFactory {
    singletons: SingletonRegistry,
    factory_beans: Arc<FactoryBeanSupport>,
    definitions: DefinitionRegistry,
    processors: ProcessorPipeline,
    scopes: RwLock<HashMap<String, Arc<dyn ScopeStrategy>>>,
    embedded_resolvers: RwLock<Vec<Arc<dyn StringValueResolver>>>,
    parent: RwLock<Option<Arc<dyn BeanFactory>>>,
    capability: RwLock<Option<Arc<dyn Any + Send + Sync>>>,
    allow_circular_references: bool,
}

impl CoreBeanFactory {
    /// Creates an empty factory that resolves circular references through
    /// early exposure and refuses definition overrides.
    pub fn new() -> Self {
        Self::with_options(true, false)
    }

    /// Creates an empty factory with explicit policies.
    pub fn with_options(allow_circular_references: bool, allow_definition_override: bool) -> Self {
        let singletons = SingletonRegistry::new();
        let factory_beans = Arc::new(FactoryBeanSupport::new());

        // Keep the product cache in step with singleton removal
        let products = factory_beans.clone();
        singletons.set_remove_listener(Box::new(move |name| products.remove_product(name)));

        Self {
            singletons,
            factory_beans,
            definitions: DefinitionRegistry::new(allow_definition_override),
            processors: ProcessorPipeline::new(),
            scopes: RwLock::new(HashMap::new()),
            embedded_resolvers: RwLock::new(Vec::new()),
            parent: RwLock::new(None),
            capability: RwLock::new(None),
            allow_circular_references,
        }
    }

    /// The singleton registry backing this factory.
    pub fn singletons(&self) -> &SingletonRegistry {
        &self.singletons
    }

    /// The alias registry backing canonical-name resolution.
    pub fn alias_registry(&self) -> &AliasRegistry {
        self.singletons.aliases()
    }

    /// Registers an externally constructed singleton under `name`.
    pub fn register_singleton(&self, name: &str, handle: BeanHandle) -> Result<()> {
        self.singletons.register_singleton(name, handle)
    }

    /// Looks up the definition registered under `name` (or an alias of it).
    pub fn definition(&self, name: &str) -> Option<Arc<BeanDefinition>> {
        let (canonical, _) = self.transformed_name(name);
        self.definitions.get(&canonical)
    }

    /// Whether `name` is taken by a definition, an alias, or a singleton.
    pub fn is_name_in_use(&self, name: &str) -> bool {
        self.definitions.contains(name)
            || self.alias_registry().is_alias(name)
            || self.singletons.contains_singleton(name)
    }

    /// Runs a [`DefinitionProvider`] module against this factory.
    pub fn add_provider(&self, provider: &dyn DefinitionProvider) -> Result<()> {
        debug!(provider = provider.name(), "Registering definition provider");
        provider.register(self)
    }

    /// Destroys one singleton: its dependents first, then its destroy
    /// hook, then its contained beans.
    pub fn destroy_singleton(&self, name: &str) {
        let (canonical, _) = self.transformed_name(name);
        self.singletons.destroy_singleton(&canonical);
    }

    // ── Lookup internals ──

    /// Strips the factory-dereference prefix and canonicalizes aliases.
    fn transformed_name(&self, name: &str) -> (String, bool) {
        let stripped = name.trim_start_matches(FACTORY_BEAN_PREFIX);
        let deref = stripped.len() != name.len();
        (self.alias_registry().canonical_name(stripped), deref)
    }

    fn original_name(canonical: &str, deref: bool) -> String {
        if deref {
            format!("{FACTORY_BEAN_PREFIX}{canonical}")
        } else {
            canonical.to_string()
        }
    }

    fn do_get_bean(&self, raw_name: &str, args: Option<BeanArgs>) -> Result<BeanHandle> {
        let (canonical, deref) = self.transformed_name(raw_name);
        trace!(bean = %canonical, "Resolving bean");

        // Singleton cache first, early references included, so reentrant
        // resolution observes one identity
        if let Some(shared) = self.singletons.singleton(&canonical, true) {
            if self.singletons.is_currently_in_creation(&canonical) {
                debug!(
                    bean = %canonical,
                    "Returning eagerly exposed reference of singleton currently in creation"
                );
            } else if args.is_some() {
                debug!(bean = %canonical, "Ignoring explicit arguments for cached singleton");
            }
            return self.object_for_instance(shared, &canonical, deref);
        }

        if Self::is_prototype_currently_in_creation(&canonical) {
            return Err(self.prototype_cycle_error(&canonical));
        }

        // Names unknown locally go to the parent
        if !self.definitions.contains(&canonical) {
            if let Some(parent) = self.parent_factory() {
                trace!(bean = %canonical, "Delegating lookup to parent factory");
                let parent_name = Self::original_name(&canonical, deref);
                return match args {
                    Some(args) => parent.bean_with_args(&parent_name, args),
                    None => parent.bean(&parent_name),
                };
            }
        }

        let definition = self
            .definitions
            .get(&canonical)
            .ok_or_else(|| self.no_such_bean(&canonical))?;

        // Explicit depends-on beans exist first, and outlive this bean
        for dependency in definition.depends_on() {
            if self.singletons.is_dependent(&canonical, dependency) {
                return Err(ContainerError::creation_failed(
                    canonical.clone(),
                    format!(
                        "Circular depends-on relationship between '{canonical}' and '{dependency}'"
                    ),
                    None,
                ));
            }
            self.singletons.register_dependent_bean(dependency, &canonical);
            if let Err(error) = self.bean(dependency) {
                return Err(match error {
                    ContainerError::NoSuchBean(_) => ContainerError::creation_failed(
                        canonical.clone(),
                        format!("'{canonical}' depends on missing bean '{dependency}'"),
                        Some(error),
                    ),
                    other => other,
                });
            }
        }

        let instance = match definition.scope() {
            BeanScope::Singleton => self.singletons.singleton_or_create(&canonical, || {
                self.create_bean(&canonical, &definition, args.as_ref())
            })?,
            BeanScope::Prototype => {
                debug!(bean = %canonical, "Creating instance of prototype bean");
                let _guard = PrototypeCreationGuard::new(&canonical);
                self.create_bean(&canonical, &definition, args.as_ref())?
            }
            BeanScope::Custom(scope_name) => {
                let strategy = self
                    .scopes
                    .read()
                    .get(scope_name.as_ref())
                    .cloned()
                    .ok_or_else(|| {
                        ContainerError::illegal_state(format!(
                            "No scope strategy registered under '{scope_name}'"
                        ))
                    })?;
                strategy.get(&canonical, &|| {
                    let _guard = PrototypeCreationGuard::new(&canonical);
                    self.create_bean(&canonical, &definition, args.as_ref())
                })?
            }
        };

        self.object_for_instance(instance, &canonical, deref)
    }

    /// The creation pipeline: instantiate, early-expose, record property
    /// edges, populate, pre-init processors, init hook, post-init
    /// processors, early-reference identity check, disposable
    /// registration.
    fn create_bean(
        &self,
        name: &str,
        definition: &BeanDefinition,
        args: Option<&BeanArgs>,
    ) -> Result<BeanHandle> {
        trace!(bean = %name, bean_type = definition.type_name(), "Creating bean instance");

        let instantiate = definition.instantiate_fn();
        let instance = (*instantiate)(self, args)
            .map_err(|error| self.record_and_wrap(name, "Instantiation of bean failed", error))?;

        let early_exposure = definition.scope().is_singleton()
            && self.allow_circular_references
            && self.singletons.is_currently_in_creation(name);
        if early_exposure {
            debug!(
                bean = %name,
                "Eagerly exposing singleton to support circular references"
            );
            let processors = self.processors.list();
            let raw = instance.clone();
            let bean_name = name.to_string();
            self.singletons.add_singleton_producer(
                name,
                Box::new(move || {
                    let mut reference = raw;
                    for processor in &processors {
                        reference = processor.early_reference(reference, &bean_name);
                    }
                    reference
                }),
            );
        }

        // Edges declared through property references: the referenced bean
        // must outlive this one
        for binding in definition.properties() {
            if let PropertyValue::BeanRef(target) = &binding.value {
                self.singletons.register_dependent_bean(target, name);
            }
        }

        if let Some(populate) = definition.populate_fn() {
            (*populate)(self, &instance).map_err(|error| {
                self.record_and_wrap(name, "Population of bean properties failed", error)
            })?;
        }

        let mut exposed = self
            .processors
            .apply_before(instance.clone(), name)
            .map_err(|error| {
                self.record_and_wrap(name, "Pre-initialization processing failed", error)
            })?;
        if let Some(init) = definition.init_fn() {
            (*init)(&exposed).map_err(|error| {
                self.record_and_wrap(name, "Invocation of init hook failed", error)
            })?;
        }
        exposed = self.processors.apply_after(exposed, name).map_err(|error| {
            self.record_and_wrap(name, "Post-initialization processing failed", error)
        })?;

        if early_exposure {
            if let Some(early) = self.singletons.early_reference(name) {
                if Arc::ptr_eq(&exposed, &instance) {
                    // Other beans already hold the early reference; it IS
                    // the published object
                    exposed = early;
                } else if self.singletons.has_dependents(name) {
                    // A processor wrapped the bean after its raw reference
                    // escaped into dependents; identities have diverged
                    return Err(ContainerError::currently_in_creation(name));
                }
            }
        }

        if definition.scope().is_singleton() {
            if let Some(destroy) = definition.destroy_fn() {
                let handle = exposed.clone();
                self.singletons.register_disposable(
                    name,
                    Box::new(move || (*destroy)(&handle)),
                );
            }
        }

        Ok(exposed)
    }

    /// Resolves factory-bean indirection on a cache hit or fresh instance.
    fn object_for_instance(
        &self,
        instance: BeanHandle,
        name: &str,
        deref: bool,
    ) -> Result<BeanHandle> {
        let factory = (*instance)
            .downcast_ref::<FactoryBeanHandle>()
            .map(|handle| handle.factory().clone());

        if deref {
            if factory.is_none() && !is_null_bean(&instance) {
                return Err(ContainerError::NotOfRequiredType(NotOfRequiredTypeError {
                    bean_name: Self::original_name(name, true),
                    required: shorten_type_name(type_name::<FactoryBeanHandle>()),
                    actual: self.declared_type_name(name),
                }));
            }
            return Ok(instance);
        }

        let Some(factory) = factory else {
            return Ok(instance);
        };

        if let Some(product) = self.factory_beans.cached_product(name) {
            return Ok(product);
        }
        self.factory_beans.object_from_factory(
            &self.singletons,
            &factory,
            name,
            true,
            &|bean, bean_name| self.processors.apply_after(bean, bean_name),
        )
    }

    fn declared_type_name(&self, name: &str) -> Option<String> {
        self.definitions
            .get(name)
            .map(|def| shorten_type_name(def.type_name()))
    }

    fn no_such_bean(&self, name: &str) -> ContainerError {
        let mut known = self.definitions.names();
        known.extend(self.singletons.singleton_names());
        known.sort();
        known.dedup();
        known.retain(|n| n != name);
        ContainerError::NoSuchBean(NoSuchBeanError {
            bean_name: name.to_string(),
            suggestions: suggest_similar(name, &known, 3),
        })
    }

    /// Wraps a creation-stage failure, recording other beans' failures as
    /// suppressed causes of the owning creation frame. Cycle and teardown
    /// rejections pass through untouched.
    fn record_and_wrap(
        &self,
        name: &str,
        stage: &str,
        error: ContainerError,
    ) -> ContainerError {
        match error {
            ContainerError::CurrentlyInCreation(_)
            | ContainerError::CreationNotAllowed { .. } => error,
            other => {
                if other.bean_name().is_some_and(|n| n != name) {
                    self.singletons.record_suppressed(other.clone());
                }
                ContainerError::creation_failed(name, stage, Some(other))
            }
        }
    }

    fn is_prototype_currently_in_creation(name: &str) -> bool {
        PROTOTYPES_IN_CREATION.with(|tls| tls.borrow().iter().any(|n| n == name))
    }

    fn prototype_cycle_error(&self, name: &str) -> ContainerError {
        let mut chain = PROTOTYPES_IN_CREATION.with(|tls| tls.borrow().clone());
        chain.push(name.to_string());
        ContainerError::CurrentlyInCreation(CurrentlyInCreationError {
            bean_name: name.to_string(),
            chain,
        })
    }
}

impl Default for CoreBeanFactory {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for CoreBeanFactory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CoreBeanFactory")
            .field("definitions", &self.definitions.count())
            .field("singletons", &self.singletons.singleton_count())
            .field("frozen", &self.definitions.is_frozen())
            .finish()
    }
}

impl BeanFactory for CoreBeanFactory {
    #[instrument(skip(self), level = "trace")]
    fn bean(&self, name: &str) -> Result<BeanHandle> {
        self.do_get_bean(name, None)
    }

    fn bean_with_args(&self, name: &str, args: BeanArgs) -> Result<BeanHandle> {
        self.do_get_bean(name, Some(args))
    }

    fn contains_bean(&self, name: &str) -> bool {
        let (canonical, deref) = self.transformed_name(name);
        if self.singletons.contains_singleton(&canonical) || self.definitions.contains(&canonical)
        {
            return true;
        }
        self.parent_factory()
            .is_some_and(|parent| parent.contains_bean(&Self::original_name(&canonical, deref)))
    }

    fn is_singleton(&self, name: &str) -> Result<bool> {
        let (canonical, deref) = self.transformed_name(name);

        if let Some(instance) = self.singletons.singleton(&canonical, false) {
            return Ok(match (*instance).downcast_ref::<FactoryBeanHandle>() {
                Some(factory_bean) => deref || factory_bean.factory().is_singleton(),
                None => !deref,
            });
        }

        if !self.definitions.contains(&canonical) {
            if let Some(parent) = self.parent_factory() {
                return parent.is_singleton(&Self::original_name(&canonical, deref));
            }
        }

        let definition = self
            .definitions
            .get(&canonical)
            .ok_or_else(|| self.no_such_bean(&canonical))?;
        Ok(definition.scope().is_singleton())
    }

    fn is_prototype(&self, name: &str) -> Result<bool> {
        let (canonical, deref) = self.transformed_name(name);

        if let Some(instance) = self.singletons.singleton(&canonical, false) {
            return Ok(match (*instance).downcast_ref::<FactoryBeanHandle>() {
                Some(factory_bean) => !deref && !factory_bean.factory().is_singleton(),
                None => false,
            });
        }

        if !self.definitions.contains(&canonical) {
            if let Some(parent) = self.parent_factory() {
                return parent.is_prototype(&Self::original_name(&canonical, deref));
            }
        }

        let definition = self
            .definitions
            .get(&canonical)
            .ok_or_else(|| self.no_such_bean(&canonical))?;
        Ok(definition.scope().is_prototype())
    }

    fn is_type_match(&self, name: &str, type_id: TypeId) -> Result<bool> {
        Ok(self.bean_type(name)? == Some(type_id))
    }

    fn bean_type(&self, name: &str) -> Result<Option<TypeId>> {
        let (canonical, deref) = self.transformed_name(name);

        if let Some(instance) = self.singletons.singleton(&canonical, false) {
            return Ok(match (*instance).downcast_ref::<FactoryBeanHandle>() {
                Some(factory_bean) if !deref => factory_bean.factory().product_type(),
                _ => Some((*instance).type_id()),
            });
        }

        if !self.definitions.contains(&canonical) {
            if let Some(parent) = self.parent_factory() {
                return parent.bean_type(&Self::original_name(&canonical, deref));
            }
        }

        let definition = self
            .definitions
            .get(&canonical)
            .ok_or_else(|| self.no_such_bean(&canonical))?;
        let declares_factory =
            BeanDefinition::type_id(&definition) == TypeId::of::<FactoryBeanHandle>();
        if declares_factory && !deref {
            // Product type is unknown until the factory bean exists
            return Ok(None);
        }
        Ok(Some(BeanDefinition::type_id(&definition)))
    }

    fn aliases(&self, name: &str) -> Vec<String> {
        let (canonical, _) = self.transformed_name(name);
        self.alias_registry().aliases_of(&canonical)
    }
}

impl ListableBeanFactory for CoreBeanFactory {
    fn definition_names(&self) -> Vec<String> {
        self.definitions.names()
    }

    fn definition_count(&self) -> usize {
        self.definitions.count()
    }

    fn contains_definition(&self, name: &str) -> bool {
        let (canonical, _) = self.transformed_name(name);
        self.definitions.contains(&canonical)
    }

    fn names_for_type(&self, type_id: TypeId) -> Vec<String> {
        let mut names = self.definitions.names_for_type(type_id);
        for name in self.singletons.singleton_names() {
            if names.iter().any(|n| *n == name) {
                continue;
            }
            if let Some(instance) = self.singletons.singleton(&name, false) {
                if (*instance).type_id() == type_id {
                    names.push(name);
                }
            }
        }
        names
    }
}

impl HierarchicalBeanFactory for CoreBeanFactory {
    fn parent_factory(&self) -> Option<Arc<dyn BeanFactory>> {
        self.parent.read().clone()
    }

    fn contains_local_bean(&self, name: &str) -> bool {
        let (canonical, _) = self.transformed_name(name);
        self.singletons.contains_singleton(&canonical) || self.definitions.contains(&canonical)
    }
}

impl ConfigurableBeanFactory for CoreBeanFactory {
    fn set_parent(&self, parent: Arc<dyn BeanFactory>) -> Result<()> {
        let mut slot = self.parent.write();
        if slot.is_some() {
            return Err(ContainerError::illegal_state(
                "Parent factory already set; it may be set only once",
            ));
        }
        info!("Wired parent bean factory");
        *slot = Some(parent);
        Ok(())
    }

    fn register_definition(&self, name: &str, definition: BeanDefinition) -> Result<()> {
        self.definitions.register(name, definition)
    }

    fn remove_definition(&self, name: &str) -> Result<()> {
        self.definitions.remove(name)
    }

    fn register_alias(&self, name: &str, alias: &str) -> Result<()> {
        self.alias_registry().register_alias(name, alias)
    }

    fn add_post_processor(&self, processor: Arc<dyn BeanPostProcessor>) {
        self.processors.add(processor);
    }

    fn register_scope(&self, scope_name: &str, strategy: Arc<dyn ScopeStrategy>) -> Result<()> {
        if scope_name == SINGLETON_SCOPE || scope_name == PROTOTYPE_SCOPE {
            return Err(ContainerError::illegal_state(format!(
                "Cannot replace the reserved '{scope_name}' scope",
            )));
        }
        info!(scope = %scope_name, "Registered custom scope");
        self.scopes
            .write()
            .insert(scope_name.to_string(), strategy);
        Ok(())
    }

    fn add_embedded_value_resolver(&self, resolver: Arc<dyn StringValueResolver>) {
        self.embedded_resolvers.write().push(resolver);
    }

    fn resolve_embedded_value(&self, value: &str) -> Option<String> {
        let resolvers = self.embedded_resolvers.read();
        let mut current = value.to_string();
        for resolver in resolvers.iter() {
            current = resolver.resolve(&current)?;
        }
        Some(current)
    }

    fn set_capability_token(&self, token: Arc<dyn Any + Send + Sync>) {
        *self.capability.write() = Some(token);
    }

    fn capability_token(&self) -> Option<Arc<dyn Any + Send + Sync>> {
        self.capability.read().clone()
    }

    fn freeze_configuration(&self) {
        self.definitions.freeze();
    }

    fn is_configuration_frozen(&self) -> bool {
        self.definitions.is_frozen()
    }

    #[instrument(skip(self), name = "pre_instantiate_singletons")]
    fn pre_instantiate_singletons(&self) -> Result<()> {
        let names = self.definitions.names();
        debug!(count = names.len(), "Pre-instantiating non-lazy singletons");
        for name in names {
            let Some(definition) = self.definitions.get(&name) else {
                continue;
            };
            if definition.scope().is_singleton() && !definition.is_lazy() {
                self.bean(&name)?;
            }
        }
        Ok(())
    }

    fn destroy_singletons(&self) {
        self.factory_beans.clear();
        self.singletons.destroy_singletons();
    }
}

// ============================================================
// Prelude
// ============================================================

pub mod prelude {
    pub use super::{
        BeanFactory, BeanFactoryExt, ConfigurableBeanFactory, CoreBeanFactory,
        FACTORY_BEAN_PREFIX, HierarchicalBeanFactory, ListableBeanFactory, bean_of,
    };
    pub use crate::definition::{AutowireMode, BeanDefinition};
    pub use crate::error::{ContainerError, Result};
    pub use crate::factory_bean::{FactoryBean, FactoryBeanHandle, is_null_bean};
    pub use crate::scope::{BeanScope, ScopeStrategy};
    pub use crate::{BeanHandle, downcast_handle, handle_of};
}

// ============================================================
// Tests
// ============================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handle_of;
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Debug)]
    struct AuditLog;

    #[derive(Debug)]
    struct OrderService {
        audit: Arc<AuditLog>,
    }

    fn audit_definition() -> BeanDefinition {
        BeanDefinition::of::<AuditLog, _>(|_| Ok(AuditLog))
    }

    #[test]
    fn singleton_lookups_share_one_instance() {
        let factory = CoreBeanFactory::new();
        factory
            .register_definition("auditLog", audit_definition())
            .unwrap();

        let a = factory.bean_of::<AuditLog>("auditLog").unwrap();
        let b = factory.bean_of::<AuditLog>("auditLog").unwrap();
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn prototype_lookups_are_fresh_and_untracked() {
        let factory = CoreBeanFactory::new();
        factory
            .register_definition(
                "auditLog",
                audit_definition().with_scope(BeanScope::Prototype),
            )
            .unwrap();

        let a = factory.bean_of::<AuditLog>("auditLog").unwrap();
        let b = factory.bean_of::<AuditLog>("auditLog").unwrap();

        assert!(!Arc::ptr_eq(&a, &b));
        // The registry does not track prototype instances
        assert_eq!(factory.singletons().singleton_count(), 0);
    }

    #[test]
    fn dependencies_resolve_through_the_factory() {
        let factory = CoreBeanFactory::new();
        factory
            .register_definition("auditLog", audit_definition())
            .unwrap();
        factory
            .register_definition(
                "orderService",
                BeanDefinition::of::<OrderService, _>(|f| {
                    Ok(OrderService {
                        audit: bean_of::<AuditLog>(f, "auditLog")?,
                    })
                }),
            )
            .unwrap();

        let service = factory.bean_of::<OrderService>("orderService").unwrap();
        let audit = factory.bean_of::<AuditLog>("auditLog").unwrap();
        assert!(Arc::ptr_eq(&service.audit, &audit));
    }

    #[test]
    fn aliases_resolve_to_the_canonical_bean() {
        let factory = CoreBeanFactory::new();
        factory
            .register_definition("auditLog", audit_definition())
            .unwrap();
        factory.register_alias("auditLog", "audit").unwrap();

        let via_alias = factory.bean_of::<AuditLog>("audit").unwrap();
        let direct = factory.bean_of::<AuditLog>("auditLog").unwrap();
        assert!(Arc::ptr_eq(&via_alias, &direct));
        assert_eq!(factory.aliases("auditLog"), vec!["audit"]);
    }

    #[test]
    fn missing_bean_reports_suggestions() {
        let factory = CoreBeanFactory::new();
        factory
            .register_definition("auditLog", audit_definition())
            .unwrap();

        match factory.bean("auditLg").unwrap_err() {
            ContainerError::NoSuchBean(e) => {
                assert_eq!(e.suggestions, vec!["auditLog"]);
            }
            other => panic!("Expected NoSuchBean, got: {other:?}"),
        }
    }

    #[test]
    fn typed_lookup_rejects_wrong_type() {
        let factory = CoreBeanFactory::new();
        factory
            .register_definition("auditLog", audit_definition())
            .unwrap();

        let result = factory.bean_of::<OrderService>("auditLog");
        assert!(matches!(
            result.unwrap_err(),
            ContainerError::NotOfRequiredType(_)
        ));
    }

    #[test]
    fn by_type_lookup_demands_a_unique_candidate() {
        let factory = CoreBeanFactory::new();
        factory
            .register_definition("first", audit_definition())
            .unwrap();
        factory
            .register_definition("second", audit_definition())
            .unwrap();

        assert!(matches!(
            factory.bean_by_type::<AuditLog>().unwrap_err(),
            ContainerError::NoUniqueBean(_)
        ));
        assert!(matches!(
            factory.bean_by_type::<OrderService>().unwrap_err(),
            ContainerError::NoSuchBean(_)
        ));
    }

    #[test]
    fn parent_factory_serves_unknown_names() {
        let parent = Arc::new(CoreBeanFactory::new());
        parent
            .register_definition("auditLog", audit_definition())
            .unwrap();

        let child = CoreBeanFactory::new();
        child.set_parent(parent.clone()).unwrap();

        let from_child = child.bean_of::<AuditLog>("auditLog").unwrap();
        let from_parent = parent.bean_of::<AuditLog>("auditLog").unwrap();
        assert!(Arc::ptr_eq(&from_child, &from_parent));

        assert!(child.contains_bean("auditLog"));
        assert!(!child.contains_local_bean("auditLog"));
    }

    #[test]
    fn parent_may_be_set_only_once() {
        let factory = CoreBeanFactory::new();
        factory.set_parent(Arc::new(CoreBeanFactory::new())).unwrap();

        let result = factory.set_parent(Arc::new(CoreBeanFactory::new()));
        assert!(matches!(
            result.unwrap_err(),
            ContainerError::IllegalState { .. }
        ));
    }

    #[test]
    fn depends_on_orders_creation_and_rejects_cycles() {
        let factory = CoreBeanFactory::new();
        let order = Arc::new(Mutex::new(Vec::new()));

        let log = order.clone();
        factory
            .register_definition(
                "first",
                BeanDefinition::of::<AuditLog, _>(move |_| {
                    log.lock().push("first");
                    Ok(AuditLog)
                }),
            )
            .unwrap();
        let log = order.clone();
        factory
            .register_definition(
                "second",
                BeanDefinition::of::<AuditLog, _>(move |_| {
                    log.lock().push("second");
                    Ok(AuditLog)
                })
                .with_depends_on("first"),
            )
            .unwrap();

        factory.bean("second").unwrap();
        assert_eq!(*order.lock(), vec!["first", "second"]);

        factory
            .register_definition(
                "third",
                audit_definition().with_depends_on("fourth"),
            )
            .unwrap();
        factory
            .register_definition(
                "fourth",
                audit_definition().with_depends_on("third"),
            )
            .unwrap();

        assert!(matches!(
            factory.bean("third").unwrap_err(),
            ContainerError::CreationFailed(_)
        ));
    }

    #[test]
    fn depends_on_missing_bean_is_a_creation_failure() {
        let factory = CoreBeanFactory::new();
        factory
            .register_definition("lonely", audit_definition().with_depends_on("ghost"))
            .unwrap();

        match factory.bean("lonely").unwrap_err() {
            ContainerError::CreationFailed(failure) => {
                assert!(failure.message.contains("missing bean 'ghost'"));
            }
            other => panic!("Expected CreationFailed, got: {other:?}"),
        }
    }

    #[test]
    fn custom_scope_delegates_to_its_strategy() {
        struct CachingScope {
            instances: Mutex<HashMap<String, BeanHandle>>,
        }

        impl ScopeStrategy for CachingScope {
            fn get(
                &self,
                name: &str,
                producer: &dyn Fn() -> Result<BeanHandle>,
            ) -> Result<BeanHandle> {
                if let Some(instance) = self.instances.lock().get(name).cloned() {
                    return Ok(instance);
                }
                let instance = producer()?;
                self.instances
                    .lock()
                    .insert(name.to_string(), instance.clone());
                Ok(instance)
            }

            fn remove(&self, name: &str) -> Option<BeanHandle> {
                self.instances.lock().remove(name)
            }
        }

        let factory = CoreBeanFactory::new();
        let scope = Arc::new(CachingScope {
            instances: Mutex::new(HashMap::new()),
        });
        factory.register_scope("conversation", scope.clone()).unwrap();
        factory
            .register_definition(
                "auditLog",
                audit_definition().with_scope(BeanScope::from_name("conversation")),
            )
            .unwrap();

        let a = factory.bean("auditLog").unwrap();
        let b = factory.bean("auditLog").unwrap();
        assert!(Arc::ptr_eq(&a, &b));

        scope.remove("auditLog").unwrap();
        let c = factory.bean("auditLog").unwrap();
        assert!(!Arc::ptr_eq(&a, &c));
    }

    #[test]
    fn reserved_scope_names_cannot_be_replaced() {
        struct Noop;
        impl ScopeStrategy for Noop {
            fn get(
                &self,
                _name: &str,
                producer: &dyn Fn() -> Result<BeanHandle>,
            ) -> Result<BeanHandle> {
                producer()
            }
            fn remove(&self, _name: &str) -> Option<BeanHandle> {
                None
            }
        }

        let factory = CoreBeanFactory::new();
        assert!(factory.register_scope("singleton", Arc::new(Noop)).is_err());
        assert!(factory.register_scope("prototype", Arc::new(Noop)).is_err());
    }

    #[test]
    fn embedded_values_run_through_the_resolver_chain() {
        let factory = CoreBeanFactory::new();
        factory.add_embedded_value_resolver(Arc::new(|value: &str| {
            Some(value.replace("${env}", "prod"))
        }));
        factory.add_embedded_value_resolver(Arc::new(|value: &str| {
            (!value.is_empty()).then(|| value.to_uppercase())
        }));

        assert_eq!(
            factory.resolve_embedded_value("db-${env}"),
            Some("DB-PROD".to_string())
        );
        assert_eq!(factory.resolve_embedded_value(""), None);
    }

    #[test]
    fn post_processors_wrap_in_order() {
        struct Stamp(&'static str);

        struct Stamper {
            tag: &'static str,
            position: i32,
        }

        impl BeanPostProcessor for Stamper {
            fn after_initialization(
                &self,
                _bean: BeanHandle,
                _name: &str,
            ) -> Result<BeanHandle> {
                Ok(handle_of(Stamp(self.tag)))
            }

            fn order(&self) -> i32 {
                self.position
            }
        }

        let factory = CoreBeanFactory::new();
        factory.add_post_processor(Arc::new(Stamper {
            tag: "first",
            position: 1,
        }));
        factory.add_post_processor(Arc::new(Stamper {
            tag: "last",
            position: 2,
        }));
        factory
            .register_definition("auditLog", audit_definition())
            .unwrap();

        let stamp = factory.bean_of::<Stamp>("auditLog").unwrap();
        assert_eq!(stamp.0, "last");
    }

    #[test]
    fn pre_instantiation_skips_lazy_and_prototype_definitions() {
        let factory = CoreBeanFactory::new();
        let created = Arc::new(AtomicUsize::new(0));

        for name in ["eager", "lazy", "fresh"] {
            let counter = created.clone();
            let mut definition = BeanDefinition::of::<AuditLog, _>(move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(AuditLog)
            });
            if name == "lazy" {
                definition = definition.with_lazy(true);
            }
            if name == "fresh" {
                definition = definition.with_scope(BeanScope::Prototype);
            }
            factory.register_definition(name, definition).unwrap();
        }

        factory.pre_instantiate_singletons().unwrap();

        assert_eq!(created.load(Ordering::SeqCst), 1);
        assert!(factory.singletons().contains_singleton("eager"));
        assert!(!factory.singletons().contains_singleton("lazy"));
    }

    #[test]
    fn name_in_use_covers_definitions_aliases_and_singletons() {
        let factory = CoreBeanFactory::new();
        factory
            .register_definition("auditLog", audit_definition())
            .unwrap();
        factory.register_alias("auditLog", "audit").unwrap();
        factory
            .register_singleton("manual", handle_of(AuditLog))
            .unwrap();

        assert!(factory.is_name_in_use("auditLog"));
        assert!(factory.is_name_in_use("audit"));
        assert!(factory.is_name_in_use("manual"));
        assert!(!factory.is_name_in_use("free"));
    }

    #[test]
    fn type_queries_reflect_definitions_and_instances() {
        let factory = CoreBeanFactory::new();
        factory
            .register_definition("auditLog", audit_definition())
            .unwrap();

        assert!(factory
            .is_type_match("auditLog", TypeId::of::<AuditLog>())
            .unwrap());
        assert!(!factory
            .is_type_match("auditLog", TypeId::of::<OrderService>())
            .unwrap());
        assert_eq!(
            factory.bean_type("auditLog").unwrap(),
            Some(TypeId::of::<AuditLog>())
        );
        assert!(factory.is_singleton("auditLog").unwrap());
        assert!(!factory.is_prototype("auditLog").unwrap());
    }
}
