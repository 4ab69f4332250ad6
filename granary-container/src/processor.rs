//! Bean post-processors — pluggable hooks around bean initialization.
//!
//! Processors may replace the handle they are given (wrapping), observe
//! it, or veto creation by failing. A processor that wraps must do so in
//! [`early_reference`](BeanPostProcessor::early_reference) as well, or a
//! circular reference through that bean becomes unresolvable.

use std::sync::Arc;

use parking_lot::RwLock;
use tracing::trace;

use crate::BeanHandle;
use crate::error::Result;

/// Transforms beans between instantiation and publication.
pub trait BeanPostProcessor: Send + Sync {
    /// Runs after population, before the init hook.
    fn before_initialization(&self, bean: BeanHandle, _bean_name: &str) -> Result<BeanHandle> {
        Ok(bean)
    }

    /// Runs after the init hook; the returned handle is what gets
    /// published (and cached, for factory-bean products).
    fn after_initialization(&self, bean: BeanHandle, _bean_name: &str) -> Result<BeanHandle> {
        Ok(bean)
    }

    /// Maps the raw instance to the reference exposed early for circular
    /// resolution. Identity by default; wrapping processors override this
    /// so the early reference matches the final one.
    fn early_reference(&self, bean: BeanHandle, _bean_name: &str) -> BeanHandle {
        bean
    }

    /// Pipeline position; lower runs first.
    fn order(&self) -> i32 {
        0
    }
}

/// The ordered processor chain.
pub(crate) struct ProcessorPipeline {
    processors: RwLock<Vec<Arc<dyn BeanPostProcessor>>>,
}

impl ProcessorPipeline {
    pub(crate) fn new() -> Self {
        Self {
            processors: RwLock::new(Vec::new()),
        }
    }

    /// Adds a processor, keeping the chain sorted by order.
    pub(crate) fn add(&self, processor: Arc<dyn BeanPostProcessor>) {
        let mut processors = self.processors.write();
        processors.push(processor);
        processors.sort_by_key(|p| p.order());
    }

    pub(crate) fn list(&self) -> Vec<Arc<dyn BeanPostProcessor>> {
        self.processors.read().clone()
    }

    pub(crate) fn apply_before(&self, bean: BeanHandle, bean_name: &str) -> Result<BeanHandle> {
        let mut current = bean;
        for processor in self.processors.read().iter() {
            current = processor.before_initialization(current, bean_name)?;
        }
        trace!(bean = %bean_name, "Applied pre-initialization processors");
        Ok(current)
    }

    pub(crate) fn apply_after(&self, bean: BeanHandle, bean_name: &str) -> Result<BeanHandle> {
        let mut current = bean;
        for processor in self.processors.read().iter() {
            current = processor.after_initialization(current, bean_name)?;
        }
        trace!(bean = %bean_name, "Applied post-initialization processors");
        Ok(current)
    }
}
