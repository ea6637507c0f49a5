//! Cookie authentication for the API.
//!
//! The identity provider logs users in; this service only checks the
//! encrypted session cookie it issues and passes the user ID on to the route
//! handlers.

use std::cmp::max;

use axum::{
    extract::{FromRef, Request, State},
    middleware::Next,
    response::{IntoResponse, Response},
};
use axum_extra::extract::{
    PrivateCookieJar,
    cookie::{Cookie, Key, SameSite},
};
use serde::{Deserialize, Serialize};
use time::{Duration, OffsetDateTime};

use crate::{AppState, Error, user::UserID};

/// The name of the cookie that holds the auth [Token].
pub const COOKIE_TOKEN: &str = "token";

/// The default duration for which auth cookies are valid.
pub const DEFAULT_COOKIE_DURATION: Duration = Duration::minutes(30);

/// The contents of the auth cookie.
#[derive(Serialize, Deserialize, Debug, PartialEq)]
pub struct Token {
    /// The authenticated user.
    pub user_id: UserID,
    /// When the session ends unless it is extended.
    #[serde(with = "time::serde::rfc3339")]
    pub expires_at: OffsetDateTime,
}

/// The state needed for the auth middleware
#[derive(Clone)]
pub struct AuthState {
    /// The key to be used for signing and encrypting private cookies.
    pub cookie_key: Key,
    /// How far each authenticated request pushes back the session expiry.
    pub cookie_duration: Duration,
}

impl FromRef<AppState> for AuthState {
    fn from_ref(state: &AppState) -> Self {
        Self {
            cookie_key: state.cookie_key.clone(),
            cookie_duration: state.cookie_duration,
        }
    }
}

// this impl tells `PrivateCookieJar` how to access the key from our state
impl FromRef<AuthState> for Key {
    fn from_ref(state: &AuthState) -> Self {
        state.cookie_key.clone()
    }
}

/// Add an auth cookie for `user_id` to the cookie jar that expires
/// `duration` from now.
///
/// # Errors
/// Returns a [Error::JSONSerializationError] if the token cannot be serialized.
pub fn set_auth_cookie(
    jar: PrivateCookieJar,
    user_id: UserID,
    duration: Duration,
) -> Result<PrivateCookieJar, Error> {
    let token = Token {
        user_id,
        expires_at: OffsetDateTime::now_utc() + duration,
    };

    set_token_cookie(jar, &token)
}

fn set_token_cookie(jar: PrivateCookieJar, token: &Token) -> Result<PrivateCookieJar, Error> {
    let token_string = serde_json::to_string(token)?;

    Ok(jar.add(
        Cookie::build((COOKIE_TOKEN, token_string))
            .expires(token.expires_at)
            .http_only(true)
            .same_site(SameSite::Strict)
            .secure(true),
    ))
}

/// Read and validate the auth token in `jar`.
///
/// # Errors
/// Returns [Error::Unauthorized] if the cookie is missing, cannot be
/// decrypted or parsed, or has expired.
pub fn get_token_from_cookies(jar: &PrivateCookieJar) -> Result<Token, Error> {
    let cookie = jar.get(COOKIE_TOKEN).ok_or(Error::Unauthorized)?;

    let token: Token = serde_json::from_str(cookie.value_trimmed()).map_err(|error| {
        tracing::warn!("Could not parse auth token: {error}");
        Error::Unauthorized
    })?;

    if token.expires_at <= OffsetDateTime::now_utc() {
        tracing::debug!("Rejecting expired auth token for user {}", token.user_id);
        return Err(Error::Unauthorized);
    }

    Ok(token)
}

/// Push the expiry of `token` back to `duration` from now, unless it
/// already expires later.
fn extend_auth_cookie_duration_if_needed(
    jar: PrivateCookieJar,
    token: Token,
    duration: Duration,
) -> Result<PrivateCookieJar, Error> {
    let new_expiry = OffsetDateTime::now_utc()
        .checked_add(duration)
        .ok_or(Error::Unauthorized)?;

    let token = Token {
        expires_at: max(token.expires_at, new_expiry),
        ..token
    };

    set_token_cookie(jar, &token)
}

/// Middleware function that checks for a valid authorization cookie.
///
/// The user ID is placed into the request and the request executed normally
/// if the cookie is valid, otherwise a 401 response is returned.
///
/// **Note**: Route handlers can use the function argument `Extension(user_id): Extension<UserID>` to receive the user ID.
///
/// **Note**: The app state must contain an `axum_extra::extract::cookie::Key` for decrypting and verifying the cookie contents.
pub async fn auth_guard(
    State(state): State<AuthState>,
    jar: PrivateCookieJar,
    mut request: Request,
    next: Next,
) -> Response {
    let token = match get_token_from_cookies(&jar) {
        Ok(token) => token,
        Err(error) => return error.into_response(),
    };

    request.extensions_mut().insert(token.user_id);
    let response = next.run(request).await;

    match extend_auth_cookie_duration_if_needed(jar, token, state.cookie_duration) {
        Ok(jar) => (jar, response).into_response(),
        Err(error) => {
            tracing::error!("Error extending cookie duration: {error}. Keeping the old cookie.");
            response
        }
    }
}
