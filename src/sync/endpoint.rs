//! The route handler that syncs and returns the user's transactions.

use axum::{Extension, Json, extract::State};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{
    Error,
    sync::{SyncState, sync_user_transactions},
    user::UserID,
};

/// The body of a successful response from [get_synced_transactions].
#[derive(Debug, Serialize, Deserialize, PartialEq)]
pub struct TransactionsResponse {
    /// Provider transaction records, most recent first.
    pub transactions: Vec<Value>,
}

/// A route handler that brings the authenticated user's transactions up to
/// date with the provider and returns them.
///
/// **Note**: Must be placed behind the auth middleware, which supplies the
/// user ID.
pub async fn get_synced_transactions(
    State(state): State<SyncState>,
    Extension(user_id): Extension<UserID>,
) -> Result<Json<TransactionsResponse>, Error> {
    let transactions = sync_user_transactions(user_id, &state).await?;

    Ok(Json(TransactionsResponse { transactions }))
}
