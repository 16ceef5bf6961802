use reqwest::StatusCode;
use serde_json::{Map, Value};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Flag key to feature definition, as served by the upstream flag service.
pub type FeatureMap = Map<String, Value>;

#[derive(thiserror::Error, Debug)]
pub enum FetchError {
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("features endpoint returned status {0}")]
    BadStatus(u16),
    #[error("could not parse features response: {0}")]
    Parse(String),
}

/// Pulls the flag definitions document from `<apiHost>/api/features/<clientKey>`.
pub struct DefinitionFetcher {
    client: reqwest::Client,
    endpoint: String,
}

impl DefinitionFetcher {
    pub fn new(endpoint: String, timeout: Duration) -> Result<Self, FetchError> {
        let client = reqwest::Client::builder()
            .connect_timeout(timeout)
            .timeout(timeout)
            .build()?;

        Ok(Self { client, endpoint })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Single attempt, no retries. Errors are returned so callers can tell a
    /// failed refresh apart from an unchanged document.
    pub async fn fetch(&self) -> Result<FeatureMap, FetchError> {
        info!(endpoint = %self.endpoint, "fetching feature definitions");

        let response = self.client.get(&self.endpoint).send().await?;

        let status = response.status();
        if status != StatusCode::OK {
            return Err(FetchError::BadStatus(status.as_u16()));
        }

        let body = response.text().await?;
        let features = extract_features(&body)?;

        debug!(count = features.len(), "fetched feature definitions");
        Ok(features)
    }

    /// Startup variant of [`fetch`](Self::fetch): any failure degrades to an
    /// empty document so the process can still come up.
    pub async fn fetch_or_empty(&self) -> FeatureMap {
        match self.fetch().await {
            Ok(features) => features,
            Err(e) => {
                warn!(error = %e, "initial feature fetch failed, starting with an empty document");
                FeatureMap::new()
            }
        }
    }
}

/// The API answers with `{"status": 200, "features": {...}, "dateUpdated": "..."}`
/// but only the `features` object is needed. A body without that field is
/// taken to be the features object itself.
pub fn extract_features(body: &str) -> Result<FeatureMap, FetchError> {
    let envelope: Value =
        serde_json::from_str(body).map_err(|e| FetchError::Parse(e.to_string()))?;

    let document = match envelope {
        Value::Object(mut envelope) => match envelope.remove("features") {
            Some(features) => features,
            None => Value::Object(envelope),
        },
        other => other,
    };

    match document {
        Value::Object(features) => Ok(features),
        other => Err(FetchError::Parse(format!(
            "expected a JSON object of features, got {}",
            json_kind(&other)
        ))),
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
