//! Receipt images that users attach to synced transactions.

use rusqlite::{Connection, Row};

use crate::{Error, user::UserID};

/// A photo of a receipt and the text extracted from it.
#[derive(Debug, Clone, PartialEq)]
pub struct Receipt {
    /// Where the image is stored. Unique.
    pub image_path: String,
    /// Text extracted from the image, empty until extraction has run.
    pub text: String,
    /// The user that uploaded the receipt.
    pub user_id: UserID,
}

/// Create the receipt table.
///
/// # Errors
/// Returns an error if the table cannot be created or if there is an SQL error.
pub fn create_receipt_table(connection: &Connection) -> Result<(), rusqlite::Error> {
    connection.execute(
        "CREATE TABLE IF NOT EXISTS receipt (
                image_path TEXT PRIMARY KEY NOT NULL,
                text TEXT NOT NULL DEFAULT '',
                user_id TEXT NOT NULL,
                FOREIGN KEY(user_id) REFERENCES user(id) ON UPDATE CASCADE ON DELETE CASCADE
                )",
        (),
    )?;

    Ok(())
}

/// Record a receipt image for `user_id`.
///
/// # Errors
/// This function will return a:
/// - [Error::InvalidReference] if `user_id` is not in the user table,
/// - or [Error::SqlError] if there is some other SQL error, e.g. the image path already exists.
pub fn create_receipt(
    image_path: &str,
    text: &str,
    user_id: UserID,
    connection: &Connection,
) -> Result<Receipt, Error> {
    connection
        .prepare(
            "INSERT INTO receipt (image_path, text, user_id) VALUES (?1, ?2, ?3)
             RETURNING image_path, text, user_id",
        )?
        .query_row((image_path, text, user_id), map_receipt_row)
        .map_err(|error| error.into())
}

/// Point the transaction `transaction_id` owned by `user_id` at the receipt
/// stored at `image_path`, or clear the reference with `None`.
///
/// # Errors
/// This function will return a:
/// - [Error::NotFound] if the user has no transaction with that ID,
/// - [Error::InvalidReference] if there is no receipt at `image_path`,
/// - or [Error::SqlError] if there is some other SQL error.
pub fn attach_receipt(
    transaction_id: &str,
    image_path: Option<&str>,
    user_id: UserID,
    connection: &Connection,
) -> Result<(), Error> {
    let rows_affected = connection.execute(
        "UPDATE \"transaction\" SET image_path = ?1 WHERE id = ?2 AND user_id = ?3",
        (image_path, transaction_id, user_id),
    )?;

    if rows_affected == 0 {
        return Err(Error::NotFound);
    }

    Ok(())
}

fn map_receipt_row(row: &Row) -> Result<Receipt, rusqlite::Error> {
    Ok(Receipt {
        image_path: row.get(0)?,
        text: row.get(1)?,
        user_id: row.get(2)?,
    })
}
