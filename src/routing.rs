//! Application router configuration.

use axum::{Router, middleware, routing::get};

use crate::{AppState, Error, auth::auth_guard, endpoints, sync::get_synced_transactions};

/// Return a router with all the app's routes.
pub fn build_router(state: AppState) -> Router {
    let protected_routes = Router::new()
        .route(endpoints::TRANSACTIONS, get(get_synced_transactions))
        .layer(middleware::from_fn_with_state(state.clone(), auth_guard));

    protected_routes
        .fallback(get_404_not_found)
        .with_state(state)
}

async fn get_404_not_found() -> Error {
    Error::NotFound
}
