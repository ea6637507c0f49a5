//! Defines the transaction table and the queries the sync process uses to
//! apply provider changes to it.

use rusqlite::Connection;
use serde_json::Value;

use crate::{
    Error,
    link::LinkKey,
    provider::{ProviderTransaction, RemovedTransaction},
    user::UserID,
};

/// The changes to apply to one institution link's transactions.
#[derive(Debug, Clone, Copy)]
pub struct BatchChanges<'a> {
    /// Transactions to insert.
    pub added: &'a [ProviderTransaction],
    /// Transactions whose payload should be replaced.
    pub modified: &'a [ProviderTransaction],
    /// IDs of transactions to delete.
    pub removed: &'a [RemovedTransaction],
}

#[cfg(test)]
impl<'a> BatchChanges<'a> {
    pub fn added_only(added: &'a [ProviderTransaction]) -> Self {
        Self {
            added,
            modified: &[],
            removed: &[],
        }
    }
}

/// What [upsert_transaction_batch] did with each change.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct BatchSummary {
    /// Added transactions that were inserted.
    pub inserted: usize,
    /// Added transactions that were already stored and left untouched.
    pub duplicates_skipped: usize,
    /// Modified transactions that were updated.
    pub updated: usize,
    /// Modified transactions that had no stored row.
    pub modified_missing: usize,
    /// Removed transactions that were deleted.
    pub deleted: usize,
    /// Removed transactions that had no stored row.
    pub removed_missing: usize,
}

/// Create the transaction table in the database.
///
/// # Errors
/// Returns an error if the table cannot be created or if there is an SQL error.
pub fn create_transaction_table(connection: &Connection) -> Result<(), rusqlite::Error> {
    connection.execute(
        "CREATE TABLE IF NOT EXISTS \"transaction\" (
                id TEXT PRIMARY KEY NOT NULL,
                user_id TEXT NOT NULL,
                institution_id TEXT NOT NULL,
                timestamp INTEGER,
                data TEXT NOT NULL,
                image_path TEXT,
                FOREIGN KEY(user_id, institution_id)
                    REFERENCES institution_link(user_id, institution_id)
                    ON UPDATE CASCADE ON DELETE CASCADE,
                FOREIGN KEY(image_path) REFERENCES receipt(image_path)
                    ON UPDATE CASCADE ON DELETE SET NULL
                )",
        (),
    )?;

    // Used for listing a user's transactions newest first.
    connection.execute(
        "CREATE INDEX IF NOT EXISTS idx_transaction_user_timestamp
            ON \"transaction\"(user_id, timestamp);",
        (),
    )?;

    Ok(())
}

/// Apply a batch of provider changes to the transactions of the link `key`.
///
/// Changes are applied in the order added, modified, removed, so a transaction
/// that is both added and removed in the same batch ends up deleted.
///
/// - Added transactions are inserted without a receipt. An ID that is already
///   stored is skipped.
/// - Modified transactions have their payload and timestamp replaced. An ID
///   with no stored row for this link is skipped with a warning.
/// - Removed transactions are deleted. An ID with no stored row for this link
///   is skipped with a warning.
///
/// The caller is responsible for running this inside a database transaction
/// if the batch must be applied atomically.
///
/// # Errors
/// This function will return a:
/// - [Error::InvalidReference] if the link `key` does not exist,
/// - or [Error::SqlError] if there is some other SQL error.
pub fn upsert_transaction_batch(
    key: &LinkKey,
    changes: BatchChanges,
    connection: &Connection,
) -> Result<BatchSummary, Error> {
    let mut summary = BatchSummary::default();

    let mut insert = connection.prepare_cached(
        "INSERT INTO \"transaction\" (id, user_id, institution_id, timestamp, data, image_path)
         VALUES (?1, ?2, ?3, ?4, ?5, NULL)
         ON CONFLICT(id) DO NOTHING",
    )?;
    for transaction in changes.added {
        let rows_affected = insert.execute((
            &transaction.transaction_id,
            key.user_id,
            &key.institution_id,
            transaction.timestamp.map(|timestamp| timestamp.unix_timestamp()),
            &transaction.payload,
        ))?;

        if rows_affected == 0 {
            tracing::debug!(
                "Skipping add for transaction {} which is already stored",
                transaction.transaction_id
            );
            summary.duplicates_skipped += 1;
        } else {
            summary.inserted += 1;
        }
    }

    let mut update = connection.prepare_cached(
        "UPDATE \"transaction\" SET data = ?1, timestamp = ?2
         WHERE id = ?3 AND user_id = ?4 AND institution_id = ?5",
    )?;
    for transaction in changes.modified {
        let rows_affected = update.execute((
            &transaction.payload,
            transaction.timestamp.map(|timestamp| timestamp.unix_timestamp()),
            &transaction.transaction_id,
            key.user_id,
            &key.institution_id,
        ))?;

        if rows_affected == 0 {
            tracing::warn!(
                "Provider modified transaction {} for {key}, but it is not stored. Skipping.",
                transaction.transaction_id
            );
            summary.modified_missing += 1;
        } else {
            summary.updated += 1;
        }
    }

    let mut delete = connection.prepare_cached(
        "DELETE FROM \"transaction\" WHERE id = ?1 AND user_id = ?2 AND institution_id = ?3",
    )?;
    for transaction in changes.removed {
        let rows_affected = delete.execute((
            &transaction.transaction_id,
            key.user_id,
            &key.institution_id,
        ))?;

        if rows_affected == 0 {
            tracing::warn!(
                "Provider removed transaction {} for {key}, but it is not stored. Skipping.",
                transaction.transaction_id
            );
            summary.removed_missing += 1;
        } else {
            summary.deleted += 1;
        }
    }

    Ok(summary)
}

/// Get the payloads of every transaction belonging to `user_id`, most recent
/// first.
///
/// Transactions without a timestamp come last. Transactions with the same
/// timestamp are ordered by ID.
///
/// # Errors
/// This function will return a:
/// - [Error::JSONSerializationError] if a stored payload is not valid JSON,
/// - or [Error::SqlError] if there is some other SQL error.
pub fn list_transactions(user_id: UserID, connection: &Connection) -> Result<Vec<Value>, Error> {
    connection
        .prepare(
            "SELECT data FROM \"transaction\" WHERE user_id = :user_id
             ORDER BY timestamp DESC NULLS LAST, id ASC",
        )?
        .query_map(&[(":user_id", &user_id)], |row| row.get(0))?
        .map(|maybe_payload| {
            maybe_payload.map_err(|error| match error {
                rusqlite::Error::FromSqlConversionFailure(_, _, error) => {
                    Error::JSONSerializationError(error.to_string())
                }
                error => error.into(),
            })
        })
        .collect()
}

#[cfg(test)]
pub fn count_transactions(connection: &Connection) -> Result<usize, Error> {
    connection
        .query_row("SELECT COUNT(id) FROM \"transaction\";", [], |row| row.get(0))
        .map_err(|error| error.into())
}

#[cfg(test)]
pub fn get_image_path(transaction_id: &str, connection: &Connection) -> Result<Option<String>, Error> {
    connection
        .query_row(
            "SELECT image_path FROM \"transaction\" WHERE id = ?1",
            (transaction_id,),
            |row| row.get(0),
        )
        .map_err(|error| error.into())
}

#[cfg(test)]
pub fn get_payload(transaction_id: &str, connection: &Connection) -> Result<Value, Error> {
    connection
        .query_row(
            "SELECT data FROM \"transaction\" WHERE id = ?1",
            (transaction_id,),
            |row| row.get(0),
        )
        .map_err(|error| error.into())
}
