//! Bean definitions — the recipe the container cooks a bean from.
//!
//! A [`BeanDefinition`] bundles the instantiate closure with scope, type
//! hint, property bindings, lifecycle hooks, and dependency declarations.
//! The [`DefinitionRegistry`] stores definitions by name and becomes
//! immutable once the configuration is frozen.

use std::any::{Any, TypeId, type_name};
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use dashmap::DashMap;
use parking_lot::Mutex;
use tracing::debug;

use crate::container::BeanFactory;
use crate::error::{ContainerError, NoSuchBeanError, Result};
use crate::factory_bean::{FactoryBean, FactoryBeanHandle};
use crate::scope::BeanScope;
use crate::{BeanHandle, handle_of};

/// Explicit arguments passed to a definition's instantiate closure.
pub type BeanArgs = Vec<Box<dyn Any + Send + Sync>>;

/// Constructor / factory-method descriptor: produces the raw instance.
pub type InstantiateFn =
    Arc<dyn Fn(&dyn BeanFactory, Option<&BeanArgs>) -> Result<BeanHandle> + Send + Sync>;

/// Property-population stage: wires the raw instance's collaborators.
pub type PopulateFn = Arc<dyn Fn(&dyn BeanFactory, &BeanHandle) -> Result<()> + Send + Sync>;

/// Init hook, invoked between the pre- and post-initialization processors.
pub type InitFn = Arc<dyn Fn(&BeanHandle) -> Result<()> + Send + Sync>;

/// Destroy hook, invoked during singleton teardown.
pub type DestroyFn = Arc<dyn Fn(&BeanHandle) -> Result<()> + Send + Sync>;

/// How the populate stage is expected to find its collaborators.
///
/// The container records the mode as definition metadata; the populate
/// closure performs the actual wiring (reflective binding lives outside
/// this engine).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AutowireMode {
    /// Collaborators are wired explicitly by the populate closure.
    #[default]
    No,
    /// Collaborators are looked up by bean name.
    ByName,
    /// Collaborators are looked up by type.
    ByType,
}

/// A single property binding carried by a definition.
#[derive(Clone)]
pub struct PropertyBinding {
    /// Property name on the bean
    pub name: String,
    /// Bound value or reference
    pub value: PropertyValue,
}

/// The value side of a [`PropertyBinding`].
#[derive(Clone)]
pub enum PropertyValue {
    /// A literal value
    Value(Arc<dyn Any + Send + Sync>),
    /// A reference to another bean; the container records the dependency
    /// edge before the populate stage runs
    BeanRef(String),
}

impl fmt::Debug for PropertyBinding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.value {
            PropertyValue::Value(_) => write!(f, "{}=<value>", self.name),
            PropertyValue::BeanRef(bean) => write!(f, "{}=ref({bean})", self.name),
        }
    }
}

/// The recipe for one bean.
///
/// Built with [`BeanDefinition::of`] (or [`BeanDefinition::factory_bean`]
/// for producer beans) and refined through the `with_*` builder methods.
///
/// # Examples
/// ```rust,ignore
/// let definition = BeanDefinition::of::<OrderService, _>(|factory| {
///     Ok(OrderService::new(bean_of::<AuditLog>(factory, "auditLog")?))
/// })
/// .with_depends_on("auditLog")
/// .with_init_of::<OrderService, _>(|svc| svc.warm_up());
/// ```
pub struct BeanDefinition {
    scope: BeanScope,
    type_id: TypeId,
    type_name: &'static str,
    instantiate: InstantiateFn,
    populate: Option<PopulateFn>,
    properties: Vec<PropertyBinding>,
    init: Option<InitFn>,
    destroy: Option<DestroyFn>,
    depends_on: Vec<String>,
    lazy: bool,
    autowire: AutowireMode,
}

impl BeanDefinition {
    /// Defines a bean of type `T` produced by `instantiate`.
    pub fn of<T, F>(instantiate: F) -> Self
    where
        T: Send + Sync + 'static,
        F: Fn(&dyn BeanFactory) -> Result<T> + Send + Sync + 'static,
    {
        Self::of_with_args::<T, _>(move |factory, _args| instantiate(factory))
    }

    /// Defines a bean of type `T` whose instantiate closure also receives
    /// the explicit arguments of a `bean_with_args` lookup, if any.
    pub fn of_with_args<T, F>(instantiate: F) -> Self
    where
        T: Send + Sync + 'static,
        F: Fn(&dyn BeanFactory, Option<&BeanArgs>) -> Result<T> + Send + Sync + 'static,
    {
        Self {
            scope: BeanScope::Singleton,
            type_id: TypeId::of::<T>(),
            type_name: type_name::<T>(),
            instantiate: Arc::new(move |factory, args| {
                Ok(handle_of(instantiate(factory, args)?))
            }),
            populate: None,
            properties: Vec::new(),
            init: None,
            destroy: None,
            depends_on: Vec::new(),
            lazy: false,
            autowire: AutowireMode::No,
        }
    }

    /// Defines a factory bean: the registered instance is the producer,
    /// and plain lookups of the name return its product (use the `&`
    /// prefix to obtain the producer itself).
    pub fn factory_bean<FB, F>(instantiate: F) -> Self
    where
        FB: FactoryBean + 'static,
        F: Fn(&dyn BeanFactory) -> Result<FB> + Send + Sync + 'static,
    {
        Self::of::<FactoryBeanHandle, _>(move |factory| {
            Ok(FactoryBeanHandle::new(instantiate(factory)?))
        })
    }

    /// Sets the scope (singleton by default).
    pub fn with_scope(mut self, scope: BeanScope) -> Self {
        self.scope = scope;
        self
    }

    /// Marks the definition lazy: not touched by eager pre-instantiation.
    pub fn with_lazy(mut self, lazy: bool) -> Self {
        self.lazy = lazy;
        self
    }

    /// Declares that this bean must be created after, and destroyed
    /// before, the named bean.
    pub fn with_depends_on(mut self, bean_name: impl Into<String>) -> Self {
        self.depends_on.push(bean_name.into());
        self
    }

    /// Records the autowire mode metadata.
    pub fn with_autowire(mut self, mode: AutowireMode) -> Self {
        self.autowire = mode;
        self
    }

    /// Adds a literal property binding.
    pub fn with_property_value(
        mut self,
        name: impl Into<String>,
        value: impl Any + Send + Sync,
    ) -> Self {
        self.properties.push(PropertyBinding {
            name: name.into(),
            value: PropertyValue::Value(Arc::new(value)),
        });
        self
    }

    /// Adds a bean-reference property binding. The container records the
    /// dependency edge before the populate stage runs.
    pub fn with_property_ref(
        mut self,
        name: impl Into<String>,
        bean_name: impl Into<String>,
    ) -> Self {
        self.properties.push(PropertyBinding {
            name: name.into(),
            value: PropertyValue::BeanRef(bean_name.into()),
        });
        self
    }

    /// Sets the property-population stage.
    pub fn with_populate<F>(mut self, populate: F) -> Self
    where
        F: Fn(&dyn BeanFactory, &BeanHandle) -> Result<()> + Send + Sync + 'static,
    {
        self.populate = Some(Arc::new(populate));
        self
    }

    /// Typed variant of [`with_populate`](Self::with_populate).
    pub fn with_populate_of<T, F>(self, populate: F) -> Self
    where
        T: Send + Sync + 'static,
        F: Fn(&dyn BeanFactory, &T) -> Result<()> + Send + Sync + 'static,
    {
        self.with_populate(move |factory, handle| {
            let bean = downcast_hook_target::<T>(handle)?;
            populate(factory, bean)
        })
    }

    /// Sets the init hook.
    pub fn with_init<F>(mut self, init: F) -> Self
    where
        F: Fn(&BeanHandle) -> Result<()> + Send + Sync + 'static,
    {
        self.init = Some(Arc::new(init));
        self
    }

    /// Typed variant of [`with_init`](Self::with_init).
    pub fn with_init_of<T, F>(self, init: F) -> Self
    where
        T: Send + Sync + 'static,
        F: Fn(&T) -> Result<()> + Send + Sync + 'static,
    {
        self.with_init(move |handle| init(downcast_hook_target::<T>(handle)?))
    }

    /// Sets the destroy hook; the container registers a disposable record
    /// for singleton beans carrying one.
    pub fn with_destroy<F>(mut self, destroy: F) -> Self
    where
        F: Fn(&BeanHandle) -> Result<()> + Send + Sync + 'static,
    {
        self.destroy = Some(Arc::new(destroy));
        self
    }

    /// Typed variant of [`with_destroy`](Self::with_destroy).
    pub fn with_destroy_of<T, F>(self, destroy: F) -> Self
    where
        T: Send + Sync + 'static,
        F: Fn(&T) -> Result<()> + Send + Sync + 'static,
    {
        self.with_destroy(move |handle| destroy(downcast_hook_target::<T>(handle)?))
    }

    /// The scope of this definition.
    pub fn scope(&self) -> &BeanScope {
        &self.scope
    }

    /// The declared bean type.
    pub fn type_id(&self) -> TypeId {
        self.type_id
    }

    /// The declared bean type name.
    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    /// Whether eager pre-instantiation skips this definition.
    pub fn is_lazy(&self) -> bool {
        self.lazy
    }

    /// Names this bean must be created after.
    pub fn depends_on(&self) -> &[String] {
        &self.depends_on
    }

    /// The autowire mode metadata.
    pub fn autowire_mode(&self) -> AutowireMode {
        self.autowire
    }

    /// The property bindings consumed by the populate stage.
    pub fn properties(&self) -> &[PropertyBinding] {
        &self.properties
    }

    /// Whether a destroy hook is declared.
    pub fn has_destroy_hook(&self) -> bool {
        self.destroy.is_some()
    }

    pub(crate) fn instantiate_fn(&self) -> InstantiateFn {
        self.instantiate.clone()
    }

    pub(crate) fn populate_fn(&self) -> Option<PopulateFn> {
        self.populate.clone()
    }

    pub(crate) fn init_fn(&self) -> Option<InitFn> {
        self.init.clone()
    }

    pub(crate) fn destroy_fn(&self) -> Option<DestroyFn> {
        self.destroy.clone()
    }
}

impl fmt::Debug for BeanDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BeanDefinition")
            .field("scope", &self.scope)
            .field("type_name", &self.type_name)
            .field("depends_on", &self.depends_on)
            .field("properties", &self.properties)
            .field("lazy", &self.lazy)
            .field("autowire", &self.autowire)
            .finish_non_exhaustive()
    }
}

/// Downcasts a hook target, surfacing engine misuse as an error instead
/// of a panic.
fn downcast_hook_target<T: Send + Sync + 'static>(handle: &BeanHandle) -> Result<&T> {
    (**handle).downcast_ref::<T>().ok_or_else(|| {
        ContainerError::illegal_state(format!(
            "Lifecycle hook expected an instance of '{}'",
            type_name::<T>()
        ))
    })
}

/// Stores bean definitions by name.
///
/// Registration order is preserved for eager pre-instantiation. Once
/// [frozen](DefinitionRegistry::freeze), the stored definitions are
/// immutable.
pub struct DefinitionRegistry {
    definitions: DashMap<String, Arc<BeanDefinition>>,
    names: Mutex<Vec<String>>,
    frozen: AtomicBool,
    allow_override: bool,
}

impl DefinitionRegistry {
    /// Creates an empty registry.
    pub fn new(allow_override: bool) -> Self {
        Self {
            definitions: DashMap::new(),
            names: Mutex::new(Vec::new()),
            frozen: AtomicBool::new(false),
            allow_override,
        }
    }

    /// Registers a definition under `name`.
    ///
    /// # Errors
    /// [`ContainerError::DefinitionStore`] when the name is empty, the
    /// configuration is frozen, or the name is taken and overriding is
    /// disallowed.
    pub fn register(&self, name: &str, definition: BeanDefinition) -> Result<()> {
        if name.is_empty() {
            return Err(ContainerError::definition_store(
                name,
                "bean name must not be empty",
            ));
        }
        if self.is_frozen() {
            return Err(ContainerError::definition_store(
                name,
                "cannot register: configuration is frozen",
            ));
        }

        let replaced = self.definitions.contains_key(name);
        if replaced && !self.allow_override {
            return Err(ContainerError::definition_store(
                name,
                "a definition is already registered under this name",
            ));
        }

        debug!(
            bean = %name,
            scope = %definition.scope(),
            bean_type = definition.type_name(),
            "Registered bean definition"
        );
        self.definitions
            .insert(name.to_string(), Arc::new(definition));
        if !replaced {
            self.names.lock().push(name.to_string());
        }
        Ok(())
    }

    /// Removes the definition for `name`.
    ///
    /// # Errors
    /// [`ContainerError::NoSuchBean`] when absent,
    /// [`ContainerError::DefinitionStore`] when frozen.
    pub fn remove(&self, name: &str) -> Result<()> {
        if self.is_frozen() {
            return Err(ContainerError::definition_store(
                name,
                "cannot remove: configuration is frozen",
            ));
        }

        self.definitions.remove(name).ok_or_else(|| {
            ContainerError::NoSuchBean(NoSuchBeanError {
                bean_name: name.to_string(),
                suggestions: Vec::new(),
            })
        })?;
        self.names.lock().retain(|n| n != name);
        debug!(bean = %name, "Removed bean definition");
        Ok(())
    }

    /// Looks up the definition for `name`.
    pub fn get(&self, name: &str) -> Option<Arc<BeanDefinition>> {
        self.definitions.get(name).map(|e| e.value().clone())
    }

    /// Returns `true` if a definition is registered under `name`.
    pub fn contains(&self, name: &str) -> bool {
        self.definitions.contains_key(name)
    }

    /// All registered names, in registration order.
    pub fn names(&self) -> Vec<String> {
        self.names.lock().clone()
    }

    /// Number of registered definitions.
    pub fn count(&self) -> usize {
        self.definitions.len()
    }

    /// Names whose declared type matches `type_id`, in registration order.
    pub fn names_for_type(&self, type_id: TypeId) -> Vec<String> {
        self.names
            .lock()
            .iter()
            .filter(|name| {
                self.definitions
                    .get(name.as_str())
                    .is_some_and(|def| BeanDefinition::type_id(&def) == type_id)
            })
            .cloned()
            .collect()
    }

    /// Freezes the configuration: no further registration or removal.
    pub fn freeze(&self) {
        self.frozen.store(true, Ordering::SeqCst);
        debug!("Bean definition configuration frozen");
    }

    /// Whether the configuration has been frozen.
    pub fn is_frozen(&self) -> bool {
        self.frozen.load(Ordering::SeqCst)
    }
}
