//! Circular-reference resolution through staged early exposure.

use std::sync::Arc;

use granary_container::prelude::*;
use once_cell::sync::OnceCell;

fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

struct Alpha {
    partner: OnceCell<Arc<Beta>>,
}

struct Beta {
    partner: OnceCell<Arc<Alpha>>,
}

fn wire_cycle(factory: &CoreBeanFactory) {
    factory
        .register_definition(
            "alpha",
            BeanDefinition::of::<Alpha, _>(|_| {
                Ok(Alpha {
                    partner: OnceCell::new(),
                })
            })
            .with_property_ref("partner", "beta")
            .with_populate_of::<Alpha, _>(|f, alpha| {
                alpha
                    .partner
                    .set(bean_of::<Beta>(f, "beta")?)
                    .map_err(|_| ContainerError::illegal_state("partner already wired"))
            }),
        )
        .unwrap();
    factory
        .register_definition(
            "beta",
            BeanDefinition::of::<Beta, _>(|_| {
                Ok(Beta {
                    partner: OnceCell::new(),
                })
            })
            .with_property_ref("partner", "alpha")
            .with_populate_of::<Beta, _>(|f, beta| {
                beta.partner
                    .set(bean_of::<Alpha>(f, "alpha")?)
                    .map_err(|_| ContainerError::illegal_state("partner already wired"))
            }),
        )
        .unwrap();
}

#[test]
fn singleton_cycle_resolves_with_one_identity() {
    init_tracing();
    let factory = CoreBeanFactory::new();
    wire_cycle(&factory);

    let alpha = factory.bean_of::<Alpha>("alpha").unwrap();
    let beta = factory.bean_of::<Beta>("beta").unwrap();

    // Each side holds exactly the object the other lookup returns
    assert!(Arc::ptr_eq(alpha.partner.get().unwrap(), &beta));
    assert!(Arc::ptr_eq(beta.partner.get().unwrap(), &alpha));

    // The in-creation set is empty afterwards
    assert!(!factory.singletons().is_currently_in_creation("alpha"));
    assert!(!factory.singletons().is_currently_in_creation("beta"));
}

#[test]
fn singleton_cycle_resolves_from_either_entry_point() {
    init_tracing();
    let factory = CoreBeanFactory::new();
    wire_cycle(&factory);

    // Resolving beta first flips which participant gets early-exposed
    let beta = factory.bean_of::<Beta>("beta").unwrap();
    let alpha = factory.bean_of::<Alpha>("alpha").unwrap();

    assert!(Arc::ptr_eq(alpha.partner.get().unwrap(), &beta));
    assert!(Arc::ptr_eq(beta.partner.get().unwrap(), &alpha));
}

struct Ping;
struct Pong;

#[test]
fn prototype_constructor_cycle_fails_cleanly() {
    init_tracing();
    let factory = CoreBeanFactory::new();
    factory
        .register_definition(
            "ping",
            BeanDefinition::of::<Ping, _>(|f| {
                bean_of::<Pong>(f, "pong")?;
                Ok(Ping)
            })
            .with_scope(BeanScope::Prototype),
        )
        .unwrap();
    factory
        .register_definition(
            "pong",
            BeanDefinition::of::<Pong, _>(|f| {
                bean_of::<Ping>(f, "ping")?;
                Ok(Pong)
            })
            .with_scope(BeanScope::Prototype),
        )
        .unwrap();

    match factory.bean("ping").unwrap_err() {
        ContainerError::CurrentlyInCreation(e) => {
            assert_eq!(e.bean_name, "ping");
            assert_eq!(e.chain, vec!["ping", "pong", "ping"]);
        }
        other => panic!("Expected CurrentlyInCreation, got: {other:?}"),
    }

    // The in-creation state unwound; unrelated prototypes still resolve
    factory
        .register_definition(
            "standalone",
            BeanDefinition::of::<Ping, _>(|_| Ok(Ping)).with_scope(BeanScope::Prototype),
        )
        .unwrap();
    assert!(factory.bean("standalone").is_ok());
}

#[test]
fn cycle_through_a_late_wrapping_processor_is_unresolvable() {
    init_tracing();

    // Wraps alpha AFTER initialization without adjusting the early
    // reference, so the raw object held by beta diverges from the
    // published one
    struct LateWrapper;
    impl granary_container::processor::BeanPostProcessor for LateWrapper {
        fn after_initialization(
            &self,
            bean: BeanHandle,
            bean_name: &str,
        ) -> granary_container::Result<BeanHandle> {
            if bean_name == "alpha" {
                return Ok(handle_of("proxy"));
            }
            Ok(bean)
        }
    }

    let factory = CoreBeanFactory::new();
    factory.add_post_processor(Arc::new(LateWrapper));
    wire_cycle(&factory);

    match factory.bean("alpha").unwrap_err() {
        ContainerError::CurrentlyInCreation(e) => assert_eq!(e.bean_name, "alpha"),
        other => panic!("Expected CurrentlyInCreation, got: {other:?}"),
    }
    assert!(!factory.singletons().is_currently_in_creation("alpha"));
}

#[test]
fn early_wrapping_processor_keeps_the_cycle_resolvable() {
    init_tracing();

    // Wraps alpha, and exposes the SAME wrapper as the early reference,
    // so consumers and the published bean agree on identity
    struct ConsistentWrapper {
        wrapped: OnceCell<BeanHandle>,
    }
    impl granary_container::processor::BeanPostProcessor for ConsistentWrapper {
        fn early_reference(&self, bean: BeanHandle, bean_name: &str) -> BeanHandle {
            if bean_name == "alpha" {
                return self
                    .wrapped
                    .get_or_init(|| {
                        let alpha = downcast_handle::<Alpha>(&bean).expect("alpha instance");
                        handle_of(Wrapped { inner: alpha })
                    })
                    .clone();
            }
            bean
        }

        fn after_initialization(
            &self,
            bean: BeanHandle,
            bean_name: &str,
        ) -> granary_container::Result<BeanHandle> {
            if bean_name == "alpha" {
                if self.wrapped.get().is_some() {
                    // Already wrapped at early-exposure time; returning the
                    // raw bean lets the engine substitute the early
                    // reference, keeping one identity
                    return Ok(bean);
                }
                return Ok(self.early_reference(bean, bean_name));
            }
            Ok(bean)
        }
    }

    struct Wrapped {
        inner: Arc<Alpha>,
    }

    let factory = CoreBeanFactory::new();
    factory.add_post_processor(Arc::new(ConsistentWrapper {
        wrapped: OnceCell::new(),
    }));
    factory
        .register_definition(
            "alpha",
            BeanDefinition::of::<Alpha, _>(|_| {
                Ok(Alpha {
                    partner: OnceCell::new(),
                })
            })
            .with_populate_of::<Alpha, _>(|f, alpha| {
                alpha
                    .partner
                    .set(bean_of::<Beta>(f, "beta")?)
                    .map_err(|_| ContainerError::illegal_state("partner already wired"))
            }),
        )
        .unwrap();
    factory
        .register_definition(
            "beta",
            BeanDefinition::of::<Beta, _>(|_| {
                Ok(Beta {
                    partner: OnceCell::new(),
                })
            })
            .with_property_ref("wrapped", "alpha")
            .with_populate_of::<Beta, _>(|f, beta| {
                // Beta consumes the wrapper, exactly what gets published
                let wrapped = bean_of::<Wrapped>(f, "alpha")?;
                beta.partner
                    .set(wrapped.inner.clone())
                    .map_err(|_| ContainerError::illegal_state("partner already wired"))
            }),
        )
        .unwrap();

    let published = factory.bean_of::<Wrapped>("alpha").unwrap();
    let beta = factory.bean_of::<Beta>("beta").unwrap();
    assert!(Arc::ptr_eq(beta.partner.get().unwrap(), &published.inner));
}
