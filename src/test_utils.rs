use httpmock::MockServer;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;

use crate::client::FeatureFlags;
use crate::context::ContextHolder;
use crate::evaluation::{Attributes, GrowthBookEvaluator};
use crate::fetcher::{DefinitionFetcher, FeatureMap};
use crate::refresh::Refresher;
use crate::state::AppState;

pub const FEATURES_PATH: &str = "/api/features/sdk-test";

pub fn features(value: Value) -> FeatureMap {
    match value {
        Value::Object(map) => map,
        _ => panic!("features must be a JSON object"),
    }
}

pub fn attributes(value: Value) -> Attributes {
    features(value)
}

/// Full app state wired to a mock flag service, with `shared` preloaded as
/// the shared definitions.
pub fn test_state(server: &MockServer, shared: Value, webhook_secret: Option<&str>) -> AppState {
    let holder = Arc::new(ContextHolder::new(features(shared), true));
    let fetcher = Arc::new(
        DefinitionFetcher::new(server.url(FEATURES_PATH), Duration::from_secs(1))
            .expect("failed to build fetcher"),
    );
    let flags = FeatureFlags::new(holder.clone(), fetcher.clone(), Arc::new(GrowthBookEvaluator));
    let refresher = Refresher::new(fetcher, holder);

    AppState::new(flags, refresher, webhook_secret)
}
