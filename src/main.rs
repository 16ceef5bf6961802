use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use growthbook_flag_gateway::client::FeatureFlags;
use growthbook_flag_gateway::config::Config;
use growthbook_flag_gateway::context::ContextHolder;
use growthbook_flag_gateway::evaluation::GrowthBookEvaluator;
use growthbook_flag_gateway::fetcher::DefinitionFetcher;
use growthbook_flag_gateway::refresh::{join_scheduler, Refresher};
use growthbook_flag_gateway::routes;
use growthbook_flag_gateway::state::AppState;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let config = Config::from_env().expect("Invalid configuration");

    let fetcher = Arc::new(
        DefinitionFetcher::new(config.features_endpoint(), config.fetch_timeout())
            .expect("Error building HTTP client"),
    );
    let holder = Arc::new(ContextHolder::bootstrap(&fetcher, config.enabled).await);

    let flags = FeatureFlags::new(holder.clone(), fetcher.clone(), Arc::new(GrowthBookEvaluator));
    let refresher = Refresher::new(fetcher, holder);

    let shutdown = CancellationToken::new();
    let scheduler = if config.refresh_timer_enabled() {
        Some(refresher.spawn_scheduler(config.cache_ttl(), shutdown.clone()))
    } else {
        info!("feature refresh timer disabled");
        None
    };

    let state = AppState::new(flags, refresher, config.webhook_secret());

    let app = routes::routes()
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive());

    let listener = tokio::net::TcpListener::bind(config.addr())
        .await
        .expect("Error binding listener");

    info!("server listening on http://{}", config.addr());

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("Server error");

    shutdown.cancel();
    if let Some(scheduler) = scheduler {
        join_scheduler(scheduler).await;
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("shutting down");
}
