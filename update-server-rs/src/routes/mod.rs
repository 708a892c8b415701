pub mod update;

use crate::state::AppState;
use axum::Router;
use std::sync::Arc;
use tower_http::trace::TraceLayer;

pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .nest("/api/update", update::router())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
