//! # Granary — a bean container core for Rust
//!
//! A name-keyed, hierarchical bean factory: singleton registry with a
//! three-tier cache, circular-reference resolution through early
//! references, alias indirection, factory beans, and ordered teardown.
//!
//! # Quick Start
//! ```rust
//! use granary::prelude::*;
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
//!
//! factory.destroy_singletons();
//! ```

pub use granary_container::*;
pub use granary_container::container::prelude::*;
pub use granary_support::rendering;
