//! Finsync is a web service that keeps a local copy of a user's bank
//! transactions in step with a transaction-aggregation provider.
//!
//! Users link their financial institutions through the provider. Each
//! request to the transactions endpoint pulls every change the provider has
//! recorded since the last request, applies it to the local database, and
//! returns the user's transactions, most recent first.

#![warn(missing_docs)]

use std::{net::SocketAddr, time::Duration};

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use axum_server::Handle;
use serde_json::json;
use tokio::signal;

mod app_state;
mod auth;
mod db;
mod endpoints;
mod link;
mod logging;
pub mod provider;
mod receipt;
mod routing;
mod sync;
mod transaction;
mod user;

#[cfg(test)]
mod test_utils;

pub use app_state::AppState;
pub use auth::{
    AuthState, COOKIE_TOKEN, DEFAULT_COOKIE_DURATION, Token, auth_guard, set_auth_cookie,
};
pub use db::initialize as initialize_db;
pub use link::{InstitutionLink, LinkKey, create_link, get_link, get_links};
pub use logging::{LOG_BODY_LENGTH_LIMIT, logging_middleware};
pub use provider::ProviderError;
pub use receipt::{Receipt, attach_receipt, create_receipt};
pub use routing::build_router;
pub use sync::{
    DEFAULT_MAX_PAGES, DEFAULT_SYNC_TIMEOUT, SyncConfig, SyncLocks, SyncState, sync_link,
    sync_user_transactions,
};
pub use transaction::{BatchSummary, list_transactions};
pub use user::{UserID, create_user};

/// An async task that waits for either the ctrl+c or terminate signal, whichever comes first, and
/// then signals the server to shut down gracefully.
///
/// `handle` is a handle to an Axum `Server`.
pub async fn graceful_shutdown(handle: Handle<SocketAddr>) {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::debug!("Received ctrl+c signal.");
            handle.graceful_shutdown(Some(Duration::from_secs(1)));
        },
        _ = terminate => {
            tracing::debug!("Received terminate signal.");
            handle.graceful_shutdown(Some(Duration::from_secs(1)));
        },
    }
}

/// The errors that may occur in the application.
#[derive(Debug, thiserror::Error, PartialEq)]
pub enum Error {
    /// The user has not linked any financial institution, so there is
    /// nothing to sync.
    #[error("the user has no linked institution")]
    NotLinked,

    /// The transaction provider could not be reached, rejected the request
    /// or returned data that could not be understood.
    #[error("transaction provider error: {0}")]
    Provider(#[from] ProviderError),

    /// The request did not carry a valid auth token.
    #[error("the request is not authenticated")]
    Unauthorized,

    /// The requested resource was not found.
    ///
    /// Internally, this error may occur when a query returns no rows.
    #[error("the requested resource could not be found")]
    NotFound,

    /// The user already has a link for the institution, or the access token
    /// is already used by another link.
    #[error("the institution link already exists")]
    DuplicateLink,

    /// A row referred to a user, link or receipt that does not exist.
    #[error("a referenced row does not exist")]
    InvalidReference,

    /// An unhandled/unexpected SQL error.
    #[error("an unexpected SQL error occurred: {0}")]
    SqlError(rusqlite::Error),

    /// Could not acquire the database lock
    #[error("could not acquire the database lock")]
    DatabaseLockError,

    /// A value could not be converted to or from JSON.
    #[error("could not serialize as JSON: {0}")]
    JSONSerializationError(String),
}

impl From<rusqlite::Error> for Error {
    fn from(value: rusqlite::Error) -> Self {
        if let rusqlite::Error::SqliteFailure(sql_error, description) = &value {
            let on_link_table = description
                .as_deref()
                .is_some_and(|description| description.contains("institution_link"));

            match sql_error.extended_code {
                rusqlite::ffi::SQLITE_CONSTRAINT_FOREIGNKEY => return Error::InvalidReference,
                rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE
                | rusqlite::ffi::SQLITE_CONSTRAINT_PRIMARYKEY
                    if on_link_table =>
                {
                    return Error::DuplicateLink;
                }
                _ => {}
            }
        }

        match value {
            rusqlite::Error::QueryReturnedNoRows => Error::NotFound,
            error => {
                tracing::error!("an unhandled SQL error occurred: {}", error);
                Error::SqlError(error)
            }
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(value: serde_json::Error) -> Self {
        Error::JSONSerializationError(value.to_string())
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            Error::NotLinked => (
                StatusCode::NOT_FOUND,
                "No linked institution was found for this user.".to_owned(),
            ),
            Error::NotFound => (
                StatusCode::NOT_FOUND,
                "The requested resource could not be found.".to_owned(),
            ),
            Error::Unauthorized => (
                StatusCode::UNAUTHORIZED,
                "You must be logged in to access this resource.".to_owned(),
            ),
            Error::Provider(error) => {
                tracing::error!("Transaction provider error: {error}");
                (
                    StatusCode::BAD_GATEWAY,
                    format!("Could not sync transactions: {error}"),
                )
            }
            // Any errors that are not handled above are not intended to be shown to the client.
            error => {
                tracing::error!("An unexpected error occurred: {}", error);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "An unexpected error occurred, check the server logs for more details."
                        .to_owned(),
                )
            }
        };

        (status, Json(json!({ "error": message }))).into_response()
    }
}

#[cfg(test)]
mod error_tests {
    use axum::{http::StatusCode, response::IntoResponse};

    use crate::{Error, ProviderError};

    #[test]
    fn not_linked_is_not_found() {
        let response = Error::NotLinked.into_response();

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn provider_error_is_bad_gateway() {
        let response =
            Error::Provider(ProviderError::Transport("connection reset".to_owned())).into_response();

        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
    }

    #[test]
    fn database_lock_error_is_internal_server_error() {
        let response = Error::DatabaseLockError.into_response();

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn no_rows_maps_to_not_found() {
        assert_eq!(
            Error::from(rusqlite::Error::QueryReturnedNoRows),
            Error::NotFound
        );
    }
}
