pub mod routes;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::evaluation::Attributes;

pub const SOURCE: &str = "growthbook";

// REQUESTS

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeatureEvaluationRequest {
    pub user_id: Option<String>,
    pub device_type: Option<String>,
    pub browser: Option<String>,
    pub country: Option<String>,
    pub custom_attributes: Option<Map<String, Value>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeatureValueRequest {
    #[serde(flatten)]
    pub user: FeatureEvaluationRequest,
    #[serde(default)]
    pub default_value: Value,
}

// ?defaultValue=... (or the shorter ?default=...)
#[derive(Debug, Deserialize)]
pub struct DefaultValueQuery<T> {
    #[serde(rename = "defaultValue", alias = "default")]
    pub default_value: Option<T>,
}

// RESPONSES

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FeatureResponse {
    pub feature_key: String,
    pub enabled: bool,
    pub value: Option<Value>,
    pub source: &'static str,
}

impl FeatureResponse {
    pub fn new(feature_key: String, enabled: bool, value: Option<Value>) -> Self {
        Self {
            feature_key,
            enabled,
            value,
            source: SOURCE,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FeatureValueResponse<T> {
    pub feature_key: String,
    pub value: T,
    pub default_value: T,
    pub is_default_value: bool,
}

impl<T: PartialEq> FeatureValueResponse<T> {
    /// `is_default_value` is plain equality: a flag that happens to evaluate to
    /// the same value as the fallback is reported as defaulted too.
    pub fn new(feature_key: String, value: T, default_value: T) -> Self {
        let is_default_value = value == default_value;
        Self {
            feature_key,
            value,
            default_value,
            is_default_value,
        }
    }
}

// HELPER FUNCTIONS

impl FeatureEvaluationRequest {
    /// Well-known fields map to `id`, `deviceType`, `browser` and `country`.
    /// Custom attributes are merged last and win on conflicts.
    pub fn into_attributes(self) -> Attributes {
        let mut attributes = Attributes::new();

        let known = [
            ("id", self.user_id),
            ("deviceType", self.device_type),
            ("browser", self.browser),
            ("country", self.country),
        ];
        for (name, value) in known {
            if let Some(value) = value {
                attributes.insert(name.to_string(), Value::String(value));
            }
        }

        if let Some(custom) = self.custom_attributes {
            attributes.extend(custom);
        }

        attributes
    }
}
