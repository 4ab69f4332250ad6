//! Definition providers — modules of related bean definitions.
//!
//! Providers group related definitions together so that container setup
//! stays modular instead of one giant registration block.
//!
//! # Examples
//! ```rust,ignore
//! struct BillingProvider;
//!
//! impl DefinitionProvider for BillingProvider {
//!     fn register(&self, factory: &dyn ConfigurableBeanFactory) -> Result<()> {
//!         factory.register_definition(
//!             "paymentGateway",
//!             BeanDefinition::of::<PaymentGateway, _>(|_| Ok(PaymentGateway::connect())),
//!         )?;
//!         factory.register_alias("paymentGateway", "gateway")
//!     }
//! }
//! ```

use crate::container::ConfigurableBeanFactory;
use crate::error::Result;

/// A module that registers related bean definitions into a factory.
///
/// Split definitions by domain rather than piling everything into one
/// place; each provider can be exercised against a fresh factory in
/// isolation.
pub trait DefinitionProvider: Send + Sync {
    /// Registers this module's definitions and aliases.
    ///
    /// Called once while the factory is being configured.
    fn register(&self, factory: &dyn ConfigurableBeanFactory) -> Result<()>;

    /// Human-readable name for log and error output.
    fn name(&self) -> &str {
        std::any::type_name::<Self>()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::container::{BeanFactory, CoreBeanFactory, ListableBeanFactory};
    use crate::definition::BeanDefinition;

    struct AuditLog;

    struct AuditProvider;

    impl DefinitionProvider for AuditProvider {
        fn register(&self, factory: &dyn ConfigurableBeanFactory) -> Result<()> {
            factory.register_definition(
                "auditLog",
                BeanDefinition::of::<AuditLog, _>(|_| Ok(AuditLog)),
            )?;
            factory.register_alias("auditLog", "audit")
        }
    }

    #[test]
    fn provider_registers_definitions_and_aliases() {
        let factory = CoreBeanFactory::new();
        factory.add_provider(&AuditProvider).unwrap();

        assert_eq!(factory.definition_count(), 1);
        assert!(factory.contains_bean("audit"));
    }

    #[test]
    fn provider_has_a_name() {
        assert!(AuditProvider.name().contains("AuditProvider"));
    }
}
