//! Sets up the application's SQLite database.

use rusqlite::{Connection, Transaction as SqlTransaction};

use crate::{
    Error, link::create_link_table, receipt::create_receipt_table,
    transaction::create_transaction_table, user::create_user_table,
};

/// Create the tables for the domain models if they do not already exist.
///
/// Foreign key enforcement is switched on for `connection`, since transactions
/// must always belong to an existing institution link.
///
/// # Errors
/// Returns an error if a table cannot be created or if there is an SQL error.
pub fn initialize(connection: &Connection) -> Result<(), Error> {
    connection.pragma_update(None, "foreign_keys", "ON")?;

    let transaction =
        SqlTransaction::new_unchecked(connection, rusqlite::TransactionBehavior::Exclusive)?;

    create_user_table(&transaction)?;
    create_link_table(&transaction)?;
    create_receipt_table(&transaction)?;
    create_transaction_table(&transaction)?;

    transaction.commit()?;

    Ok(())
}
