use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    Router, error_handling::HandleErrorLayer, http::StatusCode, response::IntoResponse,
    routing::get,
};
use tier_limit::Rule;
use tower::BoxError;
use tower::ServiceBuilder;
use tower_tier::{GlobalLimitLayer, PeerIp, RuleLayer, TierError};
use tracing::warn;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt::init();

    // 1. Tiered per-IP rule: 5 per second and 100 per hour
    let mut rule: Rule = Rule::new();
    rule.add_rule(Duration::from_secs(1), 5, None)
        .add_rule(Duration::from_secs(3600), 100, Some(10_000));
    let rule = Arc::new(rule);

    // 2. In-flight cap across all clients
    let global = GlobalLimitLayer::new(256).on_overflow(|| warn!("server busy, request shed"));

    // 3. Build the Router
    let app = Router::new()
        .route("/", get(|| async { "Hello, Tier!" }))
        .route(
            "/online",
            get({
                let rule = rule.clone();
                move || {
                    let rule = rule.clone();
                    async move { rule.get_online().join("\n") }
                }
            }),
        )
        .layer(
            ServiceBuilder::new()
                // 1. The outermost layer: catches BoxError and returns Response
                .layer(HandleErrorLayer::new(handle_tier_error))
                // 2. Shed first so rejected requests spend no allowance
                .layer(global)
                // Clients connect directly, so key on the socket peer
                .layer(RuleLayer::new(rule, PeerIp))
                // 3. Converts the Route's Infallible to BoxError
                .map_err(BoxError::from),
        );

    // 4. Serve
    let listener = tokio::net::TcpListener::bind("127.0.0.1:3000")
        .await
        .unwrap();
    println!("📡 Listening on http://127.0.0.1:3000");

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await
    .unwrap();
}

/// The signature must match BoxError -> IntoResponse
async fn handle_tier_error(err: BoxError) -> impl IntoResponse {
    if let Some(tier_err) = err.downcast_ref::<TierError>() {
        tier_err.clone().into_response()
    } else {
        (StatusCode::INTERNAL_SERVER_ERROR, "Internal Service Error").into_response()
    }
}
