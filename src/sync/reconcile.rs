//! Syncing a user's institution links and applying the changes.

use std::{
    sync::{Arc, Mutex},
    time::Instant,
};

use axum::extract::FromRef;
use rusqlite::Connection;
use serde_json::Value;

use crate::{
    AppState, Error,
    link::{LinkKey, get_link_by_key, get_links, set_accounts, set_cursor},
    provider::{ProviderError, TransactionProvider},
    sync::{SyncChanges, SyncConfig, SyncLocks, SyncPages},
    transaction::{BatchSummary, list_transactions, upsert_transaction_batch},
    user::UserID,
};

/// The state needed to sync transactions.
#[derive(Clone)]
pub struct SyncState {
    /// The connection to the application's database.
    pub db_connection: Arc<Mutex<Connection>>,
    /// Where transaction changes come from.
    pub provider: Arc<dyn TransactionProvider>,
    /// Bounds on each sync.
    pub config: SyncConfig,
    /// Serializes syncs of the same link.
    pub locks: SyncLocks,
}

impl FromRef<AppState> for SyncState {
    fn from_ref(state: &AppState) -> Self {
        Self {
            db_connection: state.db_connection.clone(),
            provider: state.provider.clone(),
            config: state.sync_config,
            locks: state.sync_locks.clone(),
        }
    }
}

/// Bring every institution link of `user_id` up to date with the provider
/// and return the user's transactions, most recent first.
///
/// Links are synced one after another in institution ID order. If a link
/// fails, the links synced before it keep their changes and the error is
/// returned.
///
/// # Errors
/// This function will return a:
/// - [Error::NotLinked] if the user has no institution link, without contacting the provider,
/// - [Error::Provider] if fetching changes failed,
/// - [Error::DatabaseLockError] if the database lock is poisoned,
/// - or [Error::SqlError] if the changes could not be stored.
pub async fn sync_user_transactions(user_id: UserID, state: &SyncState) -> Result<Vec<Value>, Error> {
    let links = with_connection(&state.db_connection, |connection| {
        get_links(user_id, connection)
    })?;

    if links.is_empty() {
        tracing::info!("User {user_id} requested a sync without a linked institution");
        return Err(Error::NotLinked);
    }

    for link in links {
        sync_link(&link.key(), state).await?;
    }

    with_connection(&state.db_connection, |connection| {
        list_transactions(user_id, connection)
    })
}

/// Fetch every change to the link `key` since its stored cursor and apply
/// them.
///
/// The link's lock is held from reading the cursor until the changes are
/// committed. Nothing is written unless every page was fetched and every
/// change applied.
///
/// # Errors
/// This function will return a:
/// - [Error::NotLinked] if the link does not exist,
/// - [Error::Provider] if fetching changes failed, took too long or returned too many pages,
/// - [Error::DatabaseLockError] if the database lock is poisoned,
/// - or [Error::SqlError] if the changes could not be stored.
pub async fn sync_link(key: &LinkKey, state: &SyncState) -> Result<BatchSummary, Error> {
    let _guard = state.locks.lock(key).await;

    let link = with_connection(&state.db_connection, |connection| {
        get_link_by_key(key, connection)
    })?;

    let start = Instant::now();
    let pages = SyncPages::new(
        state.provider.as_ref(),
        &link.access_token,
        &link.cursor,
        state.config.max_pages,
    );
    let changes = tokio::time::timeout(state.config.timeout, pages.collect_changes())
        .await
        .map_err(|_| ProviderError::Timeout(state.config.timeout))?
        .inspect_err(|error| tracing::error!("Could not fetch changes for {key}: {error}"))?;
    let fetch_duration = start.elapsed();

    let summary = with_connection(&state.db_connection, |connection| {
        apply_changes(key, &changes, connection)
    })?;

    tracing::info!(
        "Synced {key} in {fetch_duration:.2?} over {} page(s): {} inserted, {} duplicate(s) skipped, \
         {} updated, {} modified missing, {} deleted, {} removed missing",
        changes.pages,
        summary.inserted,
        summary.duplicates_skipped,
        summary.updated,
        summary.modified_missing,
        summary.deleted,
        summary.removed_missing,
    );

    Ok(summary)
}

/// Store the new cursor, accounts snapshot and transaction changes for `key`
/// in one database transaction.
fn apply_changes(
    key: &LinkKey,
    changes: &SyncChanges,
    connection: &mut Connection,
) -> Result<BatchSummary, Error> {
    let transaction = connection.transaction()?;

    set_cursor(key, &changes.next_cursor, &transaction)?;

    if !changes.accounts.is_empty() {
        set_accounts(key, &Value::from(changes.accounts.clone()), &transaction)?;
    }

    let summary = upsert_transaction_batch(key, changes.as_batch(), &transaction)?;

    transaction.commit()?;

    Ok(summary)
}

fn with_connection<T>(
    db_connection: &Mutex<Connection>,
    query: impl FnOnce(&mut Connection) -> Result<T, Error>,
) -> Result<T, Error> {
    let mut connection = db_connection.lock().map_err(|error| {
        tracing::error!("could not acquire database lock: {error}");
        Error::DatabaseLockError
    })?;

    query(&mut connection)
}
