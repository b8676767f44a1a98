use axum::{
    http::HeaderValue,
    middleware as axum_mw,
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::compression::CompressionLayer;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;

pub mod cache;
pub mod config;
pub mod db;
pub mod error;
pub mod middleware;
pub mod models;
pub mod routes;
pub mod services;
pub mod store;

use cache::Cache;
use config::Config;
use middleware::rate_limit::RateLimiter;
use services::moderation::ModerationEngine;
use store::Transactor;

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn Transactor>,
    pub moderation: ModerationEngine,
    pub cache: Option<Cache>,
    pub config: Arc<Config>,
    pub moderation_rate_limiter: RateLimiter,
}

impl AppState {
    pub fn new(config: Config, store: Arc<dyn Transactor>, cache: Option<Cache>) -> Self {
        let moderation_rate_limiter =
            RateLimiter::new(config.rate_limit.max_requests, config.rate_limit.window_secs);
        Self {
            moderation: ModerationEngine::new(Arc::clone(&store)),
            store,
            cache,
            config: Arc::new(config),
            moderation_rate_limiter,
        }
    }
}

fn cors_layer(config: &Config) -> CorsLayer {
    let layer = CorsLayer::new().allow_methods(Any).allow_headers(Any);
    let origins: Vec<HeaderValue> = config
        .cors_origins
        .iter()
        .filter_map(|origin| origin.parse().ok())
        .collect();

    // Outside production any origin may call the API.
    if config.node_env == "production" && !origins.is_empty() {
        layer.allow_origin(AllowOrigin::list(origins))
    } else {
        layer.allow_origin(Any)
    }
}

pub fn build_router(state: AppState) -> Router {
    let cors = cors_layer(&state.config);

    let admin_routes = Router::new()
        .route(
            "/reviews/:id/approve",
            post(routes::admin::approve_review),
        )
        .route("/reviews/:id/reject", post(routes::admin::reject_review))
        .route(
            "/reviews/:id/moderate",
            post(routes::admin::moderate_review),
        )
        .layer(axum_mw::from_fn_with_state(
            state.clone(),
            middleware::rate_limit::moderation_rate_limit,
        ))
        .layer(axum_mw::from_fn(middleware::admin::require_moderator))
        .layer(axum_mw::from_fn_with_state(
            state.clone(),
            middleware::auth::authenticate,
        ));

    let listing_routes =
        Router::new().route("/:id/rating", get(routes::listings::get_rating));

    let api = Router::new()
        .nest("/admin", admin_routes)
        .nest("/listings", listing_routes);

    Router::new()
        .nest("/api/v1", api)
        .route("/health", get(routes::health::health))
        .layer(TraceLayer::new_for_http())
        .layer(CompressionLayer::new())
        .layer(cors)
        .with_state(state)
}
