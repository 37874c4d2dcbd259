use std::sync::{Arc, PoisonError, RwLock};

use crate::pipeline::types::ActiveConfiguration;

/// Holds the one active configuration. Readers get a whole snapshot, old
/// or new, never a mix. Only the scheduler replaces it.
#[derive(Debug, Default)]
pub struct ConfigurationSlot {
    current: RwLock<Option<Arc<ActiveConfiguration>>>,
}

impl ConfigurationSlot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn current(&self) -> Option<Arc<ActiveConfiguration>> {
        self.current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Swaps in `next` and returns the configuration it replaced.
    pub(crate) fn replace(
        &self,
        next: Arc<ActiveConfiguration>,
    ) -> Option<Arc<ActiveConfiguration>> {
        let mut current = self.current.write().unwrap_or_else(PoisonError::into_inner);
        current.replace(next)
    }
}
