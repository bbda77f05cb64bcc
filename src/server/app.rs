use axum::{middleware, Router};
use tower_http::trace::TraceLayer;

use crate::api::api_routes;

use super::{track_http_metrics, AppState};

pub fn create_app(state: AppState) -> Router {
    Router::new()
        .merge(api_routes())
        .route_layer(middleware::from_fn(track_http_metrics))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
