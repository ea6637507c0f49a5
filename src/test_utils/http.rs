//! Helpers for testing the router end to end.

use std::sync::Arc;

use axum::{
    Router,
    extract::{Path, State},
    routing::post,
};
use axum_extra::extract::{PrivateCookieJar, cookie::Cookie};
use axum_test::TestServer;
use rusqlite::Connection;
use uuid::Uuid;

use crate::{
    AppState, Error,
    auth::{AuthState, COOKIE_TOKEN, set_auth_cookie},
    build_router,
    sync::SyncConfig,
    user::UserID,
};

use super::StubProvider;

const TEST_LOG_IN_ROUTE: &str = "/test/log_in/{user_id}";

#[track_caller]
pub(crate) fn get_test_app_state(provider: Arc<StubProvider>) -> AppState {
    let conn = Connection::open_in_memory().expect("Could not open database in memory.");

    AppState::new(conn, "42", provider, SyncConfig::default())
        .expect("Could not create app state.")
}

async fn stub_log_in_route(
    State(state): State<AuthState>,
    Path(user_id): Path<Uuid>,
    jar: PrivateCookieJar,
) -> Result<PrivateCookieJar, Error> {
    set_auth_cookie(jar, UserID::new(user_id), state.cookie_duration)
}

/// A server for the full app plus a route that issues auth cookies, standing
/// in for the identity provider.
#[track_caller]
pub(crate) fn get_test_server(state: AppState) -> TestServer {
    let log_in_routes = Router::new()
        .route(TEST_LOG_IN_ROUTE, post(stub_log_in_route))
        .with_state(state.clone());
    let app = build_router(state).merge(log_in_routes);

    TestServer::new(app).expect("Could not create test server.")
}

pub(crate) async fn log_in(server: &TestServer, user_id: UserID) -> Cookie<'static> {
    let response = server.post(&format!("/test/log_in/{user_id}")).await;
    response.assert_status_ok();

    response.cookie(COOKIE_TOKEN)
}
