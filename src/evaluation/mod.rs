use serde_json::{Map, Value};
use std::fmt;
use std::sync::Arc;

use crate::fetcher::{FeatureMap, FetchError};

mod condition;
mod growthbook;

pub use growthbook::GrowthBookEvaluator;

/// User attributes a flag is evaluated against, e.g. `{"id": "u1", "country": "US"}`.
pub type Attributes = Map<String, Value>;

// Everything a flag key is evaluated against
#[derive(Debug, Clone)]
pub struct EvaluationContext {
    pub definitions: Arc<FeatureMap>,
    pub enabled: bool,
    pub attributes: Option<Attributes>,
}

impl EvaluationContext {
    pub fn new(definitions: FeatureMap, enabled: bool) -> Self {
        Self {
            definitions: Arc::new(definitions),
            enabled,
            attributes: None,
        }
    }

    pub fn with_attributes(mut self, attributes: Attributes) -> Self {
        self.attributes = Some(attributes);
        self
    }
}

// Which branch of a feature definition produced the value
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EvaluationSource {
    Disabled,
    UnknownFeature,
    DefaultValue,
    Force,
    Experiment,
}

impl fmt::Display for EvaluationSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            EvaluationSource::Disabled => "disabled",
            EvaluationSource::UnknownFeature => "unknownFeature",
            EvaluationSource::DefaultValue => "defaultValue",
            EvaluationSource::Force => "force",
            EvaluationSource::Experiment => "experiment",
        };
        f.write_str(s)
    }
}

// Result of evaluating one flag key
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureEvaluation {
    /// `None` when the key is unknown, evaluation is disabled, or the value is JSON null.
    pub value: Option<Value>,
    pub source: EvaluationSource,
}

impl FeatureEvaluation {
    pub fn absent(source: EvaluationSource) -> Self {
        Self {
            value: None,
            source,
        }
    }

    pub fn resolved(value: Value, source: EvaluationSource) -> Self {
        let value = match value {
            Value::Null => None,
            v => Some(v),
        };
        Self { value, source }
    }

    pub fn is_on(&self) -> bool {
        self.value.as_ref().is_some_and(is_truthy)
    }
}

#[derive(thiserror::Error, Debug)]
pub enum EvaluationError {
    #[error("feature '{key}' has a malformed definition: {source}")]
    MalformedDefinition {
        key: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("could not load feature definitions: {0}")]
    Fetch(#[from] FetchError),
}

/// The rule engine behind every flag lookup. It only ever sees a context and a
/// key; where the definitions came from is not its concern.
pub trait Evaluator: Send + Sync {
    fn evaluate(
        &self,
        key: &str,
        context: &EvaluationContext,
    ) -> Result<FeatureEvaluation, EvaluationError>;
}

/// null, false, 0 and "" are off. Everything else, including empty arrays and
/// objects, is on.
pub fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}
