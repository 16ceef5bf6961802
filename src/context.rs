use arc_swap::ArcSwap;
use std::sync::Arc;
use tracing::info;

use crate::evaluation::EvaluationContext;
use crate::fetcher::{DefinitionFetcher, FeatureMap};

/// Owns the shared evaluation context. Readers get whole snapshots; writers
/// swap in a new snapshot, never touching the one readers may hold.
pub struct ContextHolder {
    current: ArcSwap<EvaluationContext>,
    enabled: bool,
}

impl ContextHolder {
    pub fn new(definitions: FeatureMap, enabled: bool) -> Self {
        Self {
            current: ArcSwap::from_pointee(EvaluationContext::new(definitions, enabled)),
            enabled,
        }
    }

    /// Startup path: one synchronous fetch, falling back to an empty document
    /// so an unreachable flag service never stops the process from starting.
    pub async fn bootstrap(fetcher: &DefinitionFetcher, enabled: bool) -> Self {
        let definitions = if enabled {
            fetcher.fetch_or_empty().await
        } else {
            info!("feature evaluation is disabled, skipping initial fetch");
            FeatureMap::new()
        };

        info!(count = definitions.len(), enabled, "feature definitions loaded");
        Self::new(definitions, enabled)
    }

    pub fn current(&self) -> Arc<EvaluationContext> {
        self.current.load_full()
    }

    pub fn enabled(&self) -> bool {
        self.enabled
    }

    pub fn replace(&self, definitions: FeatureMap) {
        let next = EvaluationContext::new(definitions, self.enabled);
        self.current.store(Arc::new(next));
    }
}
