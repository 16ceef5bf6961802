use serde::de::DeserializeOwned;
use serde_json::Value;
use std::ops::Deref;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::{debug, error, trace};

use crate::context::ContextHolder;
use crate::evaluation::{
    Attributes, EvaluationContext, EvaluationError, Evaluator, FeatureEvaluation,
};
use crate::fetcher::{DefinitionFetcher, FeatureMap};

/// Flag lookups for the HTTP layer. Plain lookups read the shared context;
/// the `*_for_user` variants build a throwaway context per call.
#[derive(Clone)]
pub struct FeatureFlags {
    holder: Arc<ContextHolder>,
    fetcher: Arc<DefinitionFetcher>,
    evaluator: Arc<dyn Evaluator>,
    live_ephemeral: Arc<AtomicUsize>,
}

impl FeatureFlags {
    pub fn new(
        holder: Arc<ContextHolder>,
        fetcher: Arc<DefinitionFetcher>,
        evaluator: Arc<dyn Evaluator>,
    ) -> Self {
        Self {
            holder,
            fetcher,
            evaluator,
            live_ephemeral: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Errors are surfaced: a silent `false` would read as "flag is off".
    pub fn is_enabled(&self, key: &str) -> Result<bool, EvaluationError> {
        self.lookup(key).map(|evaluation| evaluation.is_on())
    }

    /// Best effort. Missing keys, nulls, type mismatches and engine errors
    /// all yield `fallback`.
    pub fn get_value<T: DeserializeOwned>(&self, key: &str, fallback: T) -> T {
        debug!(key, "getting feature value");

        let context = self.holder.current();
        typed_or_fallback(key, self.evaluate(key, &context), fallback)
    }

    pub fn get_raw_value(&self, key: &str) -> Result<Option<Value>, EvaluationError> {
        self.lookup(key).map(|evaluation| evaluation.value)
    }

    /// Status and value from one evaluation against one snapshot, so a
    /// concurrent refresh can never split them across documents.
    pub fn lookup(&self, key: &str) -> Result<FeatureEvaluation, EvaluationError> {
        debug!(key, "looking up feature");

        let context = self.holder.current();
        self.evaluate(key, &context)
            .inspect_err(|e| error!(key, error = %e, "error looking up feature"))
    }

    /// Fetches the definitions fresh on every call instead of reading the
    /// shared snapshot, so the answer never lags behind the flag service.
    pub async fn is_enabled_for_user(
        &self,
        key: &str,
        attributes: Attributes,
    ) -> Result<bool, EvaluationError> {
        debug!(key, "evaluating feature for user with attributes");

        let result = match self.ephemeral_context(attributes).await {
            Ok(context) => self.evaluate(key, &context).map(|e| e.is_on()),
            Err(e) => Err(e),
        };

        result.inspect_err(|e| error!(key, error = %e, "error evaluating feature for user"))
    }

    pub async fn get_value_for_user<T: DeserializeOwned>(
        &self,
        key: &str,
        fallback: T,
        attributes: Attributes,
    ) -> T {
        debug!(key, "getting feature value for user with attributes");

        match self.ephemeral_context(attributes).await {
            Ok(context) => typed_or_fallback(key, self.evaluate(key, &context), fallback),
            Err(e) => {
                error!(key, error = %e, "error getting feature value for user");
                fallback
            }
        }
    }

    pub fn evaluation_enabled(&self) -> bool {
        self.holder.enabled()
    }

    /// Number of per-user contexts currently alive.
    pub fn live_ephemeral_contexts(&self) -> usize {
        self.live_ephemeral.load(Ordering::SeqCst)
    }

    fn evaluate(
        &self,
        key: &str,
        context: &EvaluationContext,
    ) -> Result<FeatureEvaluation, EvaluationError> {
        let evaluation = self.evaluator.evaluate(key, context)?;
        trace!(key, source = %evaluation.source, "feature evaluated");
        Ok(evaluation)
    }

    async fn ephemeral_context(
        &self,
        attributes: Attributes,
    ) -> Result<EphemeralContext, EvaluationError> {
        // Disabled evaluation never needs the document
        let definitions = if self.holder.enabled() {
            self.fetcher.fetch().await?
        } else {
            FeatureMap::new()
        };
        let context =
            EvaluationContext::new(definitions, self.holder.enabled()).with_attributes(attributes);

        Ok(EphemeralContext::acquire(context, self.live_ephemeral.clone()))
    }
}

fn typed_or_fallback<T: DeserializeOwned>(
    key: &str,
    result: Result<FeatureEvaluation, EvaluationError>,
    fallback: T,
) -> T {
    match result {
        Ok(FeatureEvaluation {
            value: Some(value), ..
        }) => serde_json::from_value(value).unwrap_or_else(|e| {
            debug!(key, error = %e, "feature value has an unexpected type, using fallback");
            fallback
        }),
        Ok(_) => fallback,
        Err(e) => {
            error!(key, error = %e, "error getting feature value");
            fallback
        }
    }
}

/// Per-call context. Released on drop, which covers early returns and
/// unwinding as well as the happy path.
struct EphemeralContext {
    context: EvaluationContext,
    live: Arc<AtomicUsize>,
}

impl EphemeralContext {
    fn acquire(context: EvaluationContext, live: Arc<AtomicUsize>) -> Self {
        live.fetch_add(1, Ordering::SeqCst);
        Self { context, live }
    }
}

impl Deref for EphemeralContext {
    type Target = EvaluationContext;

    fn deref(&self) -> &Self::Target {
        &self.context
    }
}

impl Drop for EphemeralContext {
    fn drop(&mut self) {
        self.live.fetch_sub(1, Ordering::SeqCst);
        trace!("released ephemeral evaluation context");
    }
}
