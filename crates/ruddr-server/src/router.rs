//! Axum router construction.

use axum::routing::get;
use axum::Router;
use tower_http::trace::TraceLayer;

use crate::context::AppContext;
use crate::routes;

/// Build the Axum router for the manifest and SSE endpoints, nested under
/// the configured root prefix when one is set.
pub fn build_router(ctx: AppContext) -> Router {
    let routes = Router::new()
        .route("/", get(routes::manifest::manifest_handler))
        .route("/events", get(routes::events::events_handler));

    let root = ctx.config.server.root.trim_end_matches('/');
    let app = if root.is_empty() {
        routes
    } else {
        Router::new().nest(root, routes)
    };

    app.layer(TraceLayer::new_for_http()).with_state(ctx)
}
