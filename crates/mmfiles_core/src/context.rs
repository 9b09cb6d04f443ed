//! Per-engine context handle.

use crate::config::StorageConfig;
use crate::tick::TickClock;
use std::sync::Arc;

#[derive(Debug)]
struct Inner {
    config: StorageConfig,
    ticks: TickClock,
    page_size: usize,
}

/// Handle bundling the configuration, page size and tick clock of one engine.
///
/// Cloning is cheap. Every datafile and logfile constructor takes a context,
/// so several engines can coexist in one process without sharing state.
///
/// # Example
///
/// ```rust
/// use mmfiles_core::{EngineContext, StorageConfig};
///
/// let ctx = EngineContext::new(StorageConfig::default());
/// let first = ctx.ticks().next();
/// assert!(ctx.ticks().next() > first);
/// ```
#[derive(Debug, Clone)]
pub struct EngineContext {
    inner: Arc<Inner>,
}

impl EngineContext {
    /// Creates a context using the operating system's page size.
    #[must_use]
    pub fn new(config: StorageConfig) -> Self {
        Self::with_page_size(config, mmfiles_storage::page_size())
    }

    /// Creates a context with an explicit page size.
    #[must_use]
    pub fn with_page_size(config: StorageConfig, page_size: usize) -> Self {
        Self {
            inner: Arc::new(Inner {
                config,
                ticks: TickClock::default(),
                page_size,
            }),
        }
    }

    /// Returns the configuration.
    #[must_use]
    pub fn config(&self) -> &StorageConfig {
        &self.inner.config
    }

    /// Returns the tick clock.
    #[must_use]
    pub fn ticks(&self) -> &TickClock {
        &self.inner.ticks
    }

    /// Returns the page size used to round datafile sizes.
    #[must_use]
    pub fn page_size(&self) -> usize {
        self.inner.page_size
    }
}

impl Default for EngineContext {
    fn default() -> Self {
        Self::new(StorageConfig::default())
    }
}
