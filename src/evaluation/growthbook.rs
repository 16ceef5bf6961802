use serde::Deserialize;
use serde_json::{Map, Value};

use super::condition::eval_condition;
use super::{
    EvaluationContext, EvaluationError, EvaluationSource, Evaluator, FeatureEvaluation,
};

// One entry of the features document
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeatureDefinition {
    #[serde(default)]
    pub default_value: Value,
    #[serde(default)]
    pub rules: Vec<FeatureRule>,
}

// Rules are either forced values (optionally behind a rollout) or experiments
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeatureRule {
    pub condition: Option<Value>,
    pub force: Option<Value>,
    pub variations: Option<Vec<Value>>,
    pub weights: Option<Vec<f64>>,
    pub coverage: Option<f64>,
    pub range: Option<(f64, f64)>,
    pub hash_attribute: Option<String>,
    pub seed: Option<String>,
    pub key: Option<String>,
    pub hash_version: Option<u32>,
}

const DEFAULT_HASH_ATTRIBUTE: &str = "id";

/// Evaluates the GrowthBook features document format.
#[derive(Debug, Default, Clone, Copy)]
pub struct GrowthBookEvaluator;

impl Evaluator for GrowthBookEvaluator {
    fn evaluate(
        &self,
        key: &str,
        context: &EvaluationContext,
    ) -> Result<FeatureEvaluation, EvaluationError> {
        // Step 1: Nothing evaluates while the global switch is off
        if !context.enabled {
            return Ok(FeatureEvaluation::absent(EvaluationSource::Disabled));
        }

        let Some(raw) = context.definitions.get(key) else {
            return Ok(FeatureEvaluation::absent(EvaluationSource::UnknownFeature));
        };

        let definition = FeatureDefinition::deserialize(raw).map_err(|source| {
            EvaluationError::MalformedDefinition {
                key: key.to_string(),
                source,
            }
        })?;

        let no_attributes = Map::new();
        let attributes = context.attributes.as_ref().unwrap_or(&no_attributes);

        // Step 2: First matching rule wins
        for rule in &definition.rules {
            if let Some(condition) = &rule.condition {
                if !eval_condition(attributes, condition) {
                    continue;
                }
            }

            if let Some(forced) = &rule.force {
                if !is_included_in_rollout(key, rule, attributes) {
                    continue;
                }
                return Ok(FeatureEvaluation::resolved(
                    forced.clone(),
                    EvaluationSource::Force,
                ));
            }

            if let Some(variations) = &rule.variations {
                if let Some(value) = run_experiment(key, rule, variations, attributes) {
                    return Ok(FeatureEvaluation::resolved(
                        value.clone(),
                        EvaluationSource::Experiment,
                    ));
                }
            }
        }

        // Step 3: No rule applied
        Ok(FeatureEvaluation::resolved(
            definition.default_value,
            EvaluationSource::DefaultValue,
        ))
    }
}

fn hash_attribute_value(rule: &FeatureRule, attributes: &Map<String, Value>) -> Option<String> {
    let attribute = rule
        .hash_attribute
        .as_deref()
        .unwrap_or(DEFAULT_HASH_ATTRIBUTE);

    match attributes.get(attribute)? {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(true) => Some("true".to_string()),
        _ => None,
    }
}

fn is_included_in_rollout(
    feature_key: &str,
    rule: &FeatureRule,
    attributes: &Map<String, Value>,
) -> bool {
    if rule.coverage.is_none() && rule.range.is_none() {
        return true;
    }
    if rule.range.is_none() && rule.coverage.is_some_and(|c| c <= 0.0) {
        return false;
    }

    let Some(hash_value) = hash_attribute_value(rule, attributes) else {
        return false;
    };
    let seed = rule.seed.as_deref().unwrap_or(feature_key);
    let Some(n) = hash(seed, &hash_value, rule.hash_version.unwrap_or(1)) else {
        return false;
    };

    match (rule.range, rule.coverage) {
        (Some(range), _) => in_range(n, range),
        (None, Some(coverage)) => n <= coverage,
        (None, None) => true,
    }
}

fn run_experiment<'a>(
    feature_key: &str,
    rule: &FeatureRule,
    variations: &'a [Value],
    attributes: &Map<String, Value>,
) -> Option<&'a Value> {
    if variations.len() < 2 {
        return None;
    }

    let hash_value = hash_attribute_value(rule, attributes)?;
    let seed = rule
        .seed
        .as_deref()
        .or(rule.key.as_deref())
        .unwrap_or(feature_key);
    let n = hash(seed, &hash_value, rule.hash_version.unwrap_or(1))?;

    let ranges = bucket_ranges(
        variations.len(),
        rule.coverage.unwrap_or(1.0),
        rule.weights.as_deref(),
    );

    choose_variation(n, &ranges).and_then(|index| variations.get(index))
}

/// FNV-1a, 32 bit
fn fnv1a32(input: &str) -> u32 {
    input.bytes().fold(0x811c_9dc5_u32, |hash, byte| {
        (hash ^ u32::from(byte)).wrapping_mul(0x0100_0193)
    })
}

/// Maps `seed` + `value` onto [0, 1). Same user, same seed, same bucket.
pub(crate) fn hash(seed: &str, value: &str, version: u32) -> Option<f64> {
    match version {
        1 => Some(f64::from(fnv1a32(&format!("{value}{seed}")) % 1000) / 1000.0),
        2 => {
            let first = fnv1a32(&format!("{seed}{value}"));
            Some(f64::from(fnv1a32(&first.to_string()) % 10000) / 10000.0)
        }
        _ => None,
    }
}

fn in_range(n: f64, range: (f64, f64)) -> bool {
    n >= range.0 && n < range.1
}

/// Weights that are missing, the wrong length, or do not sum to ~1 fall back
/// to an even split.
pub(crate) fn bucket_ranges(
    variations: usize,
    coverage: f64,
    weights: Option<&[f64]>,
) -> Vec<(f64, f64)> {
    let coverage = coverage.clamp(0.0, 1.0);
    let equal = vec![1.0 / variations as f64; variations];

    let weights = match weights {
        Some(w) if w.len() == variations => {
            let total: f64 = w.iter().sum();
            if (0.99..=1.01).contains(&total) {
                w.to_vec()
            } else {
                equal
            }
        }
        _ => equal,
    };

    let mut cumulative = 0.0;
    weights
        .into_iter()
        .map(|w| {
            let start = cumulative;
            cumulative += w;
            (start, start + coverage * w)
        })
        .collect()
}

fn choose_variation(n: f64, ranges: &[(f64, f64)]) -> Option<usize> {
    ranges.iter().position(|range| in_range(n, *range))
}
