use crate::handlers::{depth, orders};
use crate::state::AppState;
use axum::{
    Router,
    routing::{get, post},
};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

pub fn create_router(state: AppState) -> Router {
    let api_routes = Router::new()
        .route("/orders", post(orders::create_order))
        .route(
            "/orders/{id}",
            get(orders::get_order)
                .put(orders::modify_order)
                .delete(orders::cancel_order),
        )
        .route("/depth/{symbol}", get(depth::get_depth));

    Router::new()
        .nest("/v1", api_routes)
        .route("/health", get(|| async { "ok" }))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
