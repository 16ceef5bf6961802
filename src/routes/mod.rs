use axum::{
    routing::{get, post},
    Router,
};

mod error;
mod features;
mod health;
mod webhooks;

pub use health::health;

use crate::state::AppState;

pub fn routes() -> Router<AppState> {
    let feature_router = Router::new()
        .route("/refresh", post(features::routes::refresh))
        .route("/{feature_key}", get(features::routes::get))
        .route("/{feature_key}/evaluate", post(features::routes::evaluate))
        .route("/{feature_key}/value", post(features::routes::value_for_user))
        .route("/{feature_key}/string", get(features::routes::string_value))
        .route("/{feature_key}/boolean", get(features::routes::boolean_value))
        .route("/{feature_key}/integer", get(features::routes::integer_value))
        .route("/{feature_key}/double", get(features::routes::double_value));

    Router::new()
        .route("/", get(root))
        .route("/health", get(health))
        .nest(
            "/api",
            Router::new()
                .nest("/features", feature_router)
                .route("/webhooks/growthbook", post(webhooks::growthbook)),
        )
}

async fn root() -> &'static str {
    "GrowthBook feature flag gateway"
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::FeatureFlags;
    use crate::context::ContextHolder;
    use crate::evaluation::{
        EvaluationContext, EvaluationError, Evaluator, FeatureEvaluation, GrowthBookEvaluator,
    };
    use crate::fetcher::DefinitionFetcher;
    use crate::refresh::Refresher;
    use crate::test_utils::{features, test_state, FEATURES_PATH};
    use axum::{
        body::Body,
        http::{Request, StatusCode},
    };
    use http_body_util::BodyExt;
    use httpmock::prelude::*;
    use serde_json::{json, Value};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;
    use tower::ServiceExt;

    async fn send(app: Router, request: Request<Body>) -> (StatusCode, Value) {
        let response = app.oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let body = serde_json::from_slice(&bytes)
            .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&bytes).into_owned()));
        (status, body)
    }

    fn get_request(uri: &str) -> Request<Body> {
        Request::get(uri).body(Body::empty()).unwrap()
    }

    fn post_json(uri: &str, body: Value) -> Request<Body> {
        Request::post(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    #[tokio::test]
    async fn test_root_and_health() {
        let server = MockServer::start_async().await;
        let app = routes().with_state(test_state(&server, json!({}), None));

        let (status, body) = send(app.clone(), get_request("/")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!("GrowthBook feature flag gateway"));

        let (status, body) = send(app, get_request("/health")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], 200);
        assert_eq!(body["evaluationEnabled"], true);
        assert_eq!(body["liveEphemeralContexts"], 0);
        assert_eq!(body["refresh"]["attempts"], 0);
    }

    #[tokio::test]
    async fn test_get_feature() {
        let server = MockServer::start_async().await;
        let app = routes().with_state(test_state(
            &server,
            json!({
                "banner": {"defaultValue": {"text": "hi"}},
                "off": {"defaultValue": false}
            }),
            None,
        ));

        let (status, body) = send(app.clone(), get_request("/api/features/banner")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(
            body,
            json!({"featureKey": "banner", "enabled": true, "value": {"text": "hi"}, "source": "growthbook"})
        );

        let (_, body) = send(app.clone(), get_request("/api/features/off")).await;
        assert_eq!(body["enabled"], false);
        assert_eq!(body["value"], false);

        let (status, body) = send(app, get_request("/api/features/unknown")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["enabled"], false);
        assert_eq!(body["value"], Value::Null);
    }

    // Commits a new document right after each evaluation, like a refresh
    // landing in the middle of a request.
    struct SwappingEvaluator {
        holder: Arc<ContextHolder>,
        calls: AtomicUsize,
    }

    impl Evaluator for SwappingEvaluator {
        fn evaluate(
            &self,
            key: &str,
            context: &EvaluationContext,
        ) -> Result<FeatureEvaluation, EvaluationError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let evaluation = GrowthBookEvaluator.evaluate(key, context)?;
            self.holder
                .replace(features(json!({"f": {"defaultValue": false}})));
            Ok(evaluation)
        }
    }

    #[tokio::test]
    async fn test_get_feature_reads_one_snapshot() {
        let server = MockServer::start_async().await;
        let holder = Arc::new(ContextHolder::new(
            features(json!({"f": {"defaultValue": "on"}})),
            true,
        ));
        let fetcher = Arc::new(
            DefinitionFetcher::new(server.url(FEATURES_PATH), Duration::from_secs(1)).unwrap(),
        );
        let evaluator = Arc::new(SwappingEvaluator {
            holder: holder.clone(),
            calls: AtomicUsize::new(0),
        });
        let flags = FeatureFlags::new(holder.clone(), fetcher.clone(), evaluator.clone());
        let app = routes().with_state(AppState::new(flags, Refresher::new(fetcher, holder), None));

        let (status, body) = send(app, get_request("/api/features/f")).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(
            body,
            json!({"featureKey": "f", "enabled": true, "value": "on", "source": "growthbook"})
        );
        assert_eq!(evaluator.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_get_feature_engine_error_is_500() {
        let server = MockServer::start_async().await;
        let app = routes().with_state(test_state(&server, json!({"bad": {"rules": 1}}), None));

        let (status, body) = send(app, get_request("/api/features/bad")).await;

        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert!(body["error"].as_str().unwrap().starts_with("Error evaluating feature"));
    }

    #[tokio::test]
    async fn test_typed_values() {
        let server = MockServer::start_async().await;
        let app = routes().with_state(test_state(
            &server,
            json!({
                "color": {"defaultValue": "blue"},
                "beta": {"defaultValue": true},
                "limit": {"defaultValue": 25},
                "ratio": {"defaultValue": 0.25}
            }),
            None,
        ));

        let (_, body) = send(app.clone(), get_request("/api/features/color/string?defaultValue=red")).await;
        assert_eq!(
            body,
            json!({"featureKey": "color", "value": "blue", "defaultValue": "red", "isDefaultValue": false})
        );

        let (_, body) = send(app.clone(), get_request("/api/features/beta/boolean")).await;
        assert_eq!(body["value"], true);
        assert_eq!(body["defaultValue"], false);

        let (_, body) = send(app.clone(), get_request("/api/features/limit/integer?default=10")).await;
        assert_eq!(body["value"], 25);
        assert_eq!(body["defaultValue"], 10);

        let (_, body) = send(app.clone(), get_request("/api/features/ratio/double?defaultValue=1.5")).await;
        assert_eq!(body["value"], 0.25);

        // Type mismatch and missing key both fall back
        let (_, body) = send(app.clone(), get_request("/api/features/color/integer?defaultValue=7")).await;
        assert_eq!(body["value"], 7);
        assert_eq!(body["isDefaultValue"], true);

        let (status, body) = send(app, get_request("/api/features/missing/string")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["value"], "");
        assert_eq!(body["isDefaultValue"], true);
    }

    #[tokio::test]
    async fn test_evaluate_with_user_attributes() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(GET).path(FEATURES_PATH);
                then.status(200).json_body(json!({
                    "features": {
                        "nordics": {
                            "defaultValue": false,
                            "rules": [{"condition": {"country": {"$in": ["SE", "NO"]}}, "force": true}]
                        }
                    }
                }));
            })
            .await;
        let app = routes().with_state(test_state(&server, json!({}), None));

        let (status, body) = send(
            app.clone(),
            post_json("/api/features/nordics/evaluate", json!({"userId": "u1", "country": "SE"})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(
            body,
            json!({"featureKey": "nordics", "enabled": true, "value": true, "source": "growthbook"})
        );

        let (_, body) = send(
            app,
            post_json(
                "/api/features/nordics/evaluate",
                json!({"userId": "u2", "customAttributes": {"country": "US"}}),
            ),
        )
        .await;
        assert_eq!(body["enabled"], false);
        assert_eq!(mock.hits_async().await, 2);
    }

    #[tokio::test]
    async fn test_evaluate_upstream_failure_is_500() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path(FEATURES_PATH);
                then.status(503);
            })
            .await;
        let app = routes().with_state(test_state(&server, json!({"x": {"defaultValue": true}}), None));

        let (status, _) = send(app, post_json("/api/features/x/evaluate", json!({"userId": "u1"}))).await;

        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[tokio::test]
    async fn test_value_for_user() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path(FEATURES_PATH);
                then.status(200).json_body(json!({
                    "features": {
                        "limits": {
                            "defaultValue": {"max": 10},
                            "rules": [{"condition": {"plan": "pro"}, "force": {"max": 100}}]
                        }
                    }
                }));
            })
            .await;
        let app = routes().with_state(test_state(&server, json!({}), None));

        let (_, body) = send(
            app.clone(),
            post_json(
                "/api/features/limits/value",
                json!({"userId": "u1", "customAttributes": {"plan": "pro"}, "defaultValue": {"max": 1}}),
            ),
        )
        .await;
        assert_eq!(
            body,
            json!({"featureKey": "limits", "value": {"max": 100}, "defaultValue": {"max": 1}, "isDefaultValue": false})
        );

        let (_, body) = send(
            app,
            post_json("/api/features/missing/value", json!({"defaultValue": "x"})),
        )
        .await;
        assert_eq!(body["value"], "x");
        assert_eq!(body["isDefaultValue"], true);
    }

    #[tokio::test]
    async fn test_manual_refresh() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(GET).path(FEATURES_PATH);
                then.status(200)
                    .json_body(json!({"features": {"fresh": {"defaultValue": true}}}));
            })
            .await;
        let app = routes().with_state(test_state(&server, json!({}), None));

        let (_, body) = send(app.clone(), get_request("/api/features/fresh")).await;
        assert_eq!(body["enabled"], false);

        let (status, _) = send(app.clone(), Request::post("/api/features/refresh").body(Body::empty()).unwrap()).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(mock.hits_async().await, 1);

        let (_, body) = send(app.clone(), get_request("/api/features/fresh")).await;
        assert_eq!(body["enabled"], true);

        let (_, body) = send(app, get_request("/health")).await;
        assert_eq!(body["refresh"]["committed"], 1);
        assert_eq!(body["refresh"]["last"]["outcome"], "committed");
    }

    #[tokio::test]
    async fn test_manual_refresh_failure_is_500() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path(FEATURES_PATH);
                then.status(500);
            })
            .await;
        let app = routes().with_state(test_state(&server, json!({}), None));

        let (status, body) = send(app, Request::post("/api/features/refresh").body(Body::empty()).unwrap()).await;

        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert!(body["error"].as_str().unwrap().starts_with("Failed to refresh features"));
    }

    fn webhook(signature: Option<&str>, payload: &str) -> Request<Body> {
        let mut builder = Request::post("/api/webhooks/growthbook");
        if let Some(signature) = signature {
            builder = builder.header(webhooks::SIGNATURE_HEADER, signature);
        }
        builder.body(Body::from(payload.to_string())).unwrap()
    }

    #[tokio::test]
    async fn test_webhook_requires_signature_when_secret_set() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(GET).path(FEATURES_PATH);
                then.status(200).json_body(json!({"features": {}}));
            })
            .await;
        let app = routes().with_state(test_state(&server, json!({}), Some("s3cret")));

        let (status, body) = send(app.clone(), webhook(None, "{}")).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body, json!("Invalid signature"));

        let (status, _) = send(app.clone(), webhook(Some(""), "{}")).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        let (status, _) = send(app, webhook(Some("deadbeef"), "{}")).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        assert_eq!(mock.hits_async().await, 0);
    }

    #[tokio::test]
    async fn test_webhook_with_valid_signature_refreshes_once() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(GET).path(FEATURES_PATH);
                then.status(200)
                    .json_body(json!({"features": {"hooked": {"defaultValue": true}}}));
            })
            .await;
        let app = routes().with_state(test_state(&server, json!({}), Some("s3cret")));
        let payload = r#"{"event":"features.updated"}"#;
        let signature = webhooks::sign("s3cret", payload.as_bytes());

        let (status, body) = send(app.clone(), webhook(Some(&format!("sha256={signature}")), payload)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!("Features refreshed"));
        assert_eq!(mock.hits_async().await, 1);

        let (_, body) = send(app, get_request("/api/features/hooked")).await;
        assert_eq!(body["enabled"], true);
    }

    #[tokio::test]
    async fn test_webhook_without_secret_skips_verification() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path(FEATURES_PATH);
                then.status(200).json_body(json!({"features": {}}));
            })
            .await;
        let app = routes().with_state(test_state(&server, json!({}), None));

        let (status, _) = send(app, webhook(None, "{}")).await;

        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn test_webhook_upstream_failure_is_500() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path(FEATURES_PATH);
                then.status(502);
            })
            .await;
        let app = routes().with_state(test_state(&server, json!({}), None));

        let (status, body) = send(app, webhook(None, "{}")).await;

        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body, json!("Failed to refresh features"));
    }
}
