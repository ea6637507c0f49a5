//! Institution links: the association between a user and a financial
//! institution they have connected through the transaction provider.

use std::fmt::{Debug, Display};

use rusqlite::{Connection, Row};
use serde_json::Value;

use crate::{Error, user::UserID};

/// Identifies one institution link, and therefore one stream of provider
/// changes.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LinkKey {
    /// The user that owns the link.
    pub user_id: UserID,
    /// The provider's ID for the institution.
    pub institution_id: String,
}

impl Display for LinkKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.user_id, self.institution_id)
    }
}

/// A user's connection to one financial institution.
#[derive(Clone, PartialEq)]
pub struct InstitutionLink {
    /// The user that owns the link.
    pub user_id: UserID,
    /// The provider's ID for the institution.
    pub institution_id: String,
    /// Where the next sync resumes in the provider's change stream.
    ///
    /// The empty string requests the full transaction history.
    pub cursor: String,
    /// The provider credential for this link. Unique across all links.
    pub access_token: String,
    /// The accounts the provider last reported for this link.
    pub accounts: Value,
}

impl InstitutionLink {
    /// The key that identifies this link.
    pub fn key(&self) -> LinkKey {
        LinkKey {
            user_id: self.user_id,
            institution_id: self.institution_id.clone(),
        }
    }
}

// Keep access tokens out of the logs.
impl Debug for InstitutionLink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InstitutionLink")
            .field("user_id", &self.user_id)
            .field("institution_id", &self.institution_id)
            .field("cursor", &self.cursor)
            .field("access_token", &"********")
            .field("accounts", &self.accounts)
            .finish()
    }
}

/// Create the institution link table.
///
/// # Errors
/// Returns an error if the table cannot be created or if there is an SQL error.
pub fn create_link_table(connection: &Connection) -> Result<(), rusqlite::Error> {
    connection.execute(
        "CREATE TABLE IF NOT EXISTS institution_link (
                user_id TEXT NOT NULL,
                institution_id TEXT NOT NULL,
                cursor TEXT NOT NULL DEFAULT '',
                access_token TEXT NOT NULL UNIQUE,
                accounts TEXT NOT NULL DEFAULT '[]',
                PRIMARY KEY (user_id, institution_id),
                FOREIGN KEY(user_id) REFERENCES user(id) ON UPDATE CASCADE ON DELETE CASCADE
                )",
        (),
    )?;

    Ok(())
}

/// Record a completed institution link for `user_id`.
///
/// The link starts with an empty cursor so the first sync fetches the full
/// transaction history.
///
/// # Errors
/// This function will return a:
/// - [Error::DuplicateLink] if the user already has a link for the institution or the access
///   token is already in use,
/// - [Error::InvalidReference] if `user_id` is not in the user table,
/// - or [Error::SqlError] if there is some other SQL error.
pub fn create_link(
    user_id: UserID,
    institution_id: &str,
    access_token: &str,
    accounts: &Value,
    connection: &Connection,
) -> Result<InstitutionLink, Error> {
    connection
        .prepare(
            "INSERT INTO institution_link (user_id, institution_id, access_token, accounts)
             VALUES (?1, ?2, ?3, ?4)
             RETURNING user_id, institution_id, cursor, access_token, accounts",
        )?
        .query_row(
            (user_id, institution_id, access_token, accounts),
            map_link_row,
        )
        .map_err(|error| error.into())
}

/// Get every institution link for `user_id`, ordered by institution ID.
///
/// # Errors
/// This function will return a [Error::SqlError] if there is an SQL error.
pub fn get_links(user_id: UserID, connection: &Connection) -> Result<Vec<InstitutionLink>, Error> {
    connection
        .prepare(
            "SELECT user_id, institution_id, cursor, access_token, accounts
             FROM institution_link WHERE user_id = :user_id
             ORDER BY institution_id ASC",
        )?
        .query_map(&[(":user_id", &user_id)], map_link_row)?
        .map(|maybe_link| maybe_link.map_err(|error| error.into()))
        .collect()
}

/// Get the first institution link for `user_id`.
///
/// # Errors
/// This function will return a:
/// - [Error::NotLinked] if the user has no institution link,
/// - or [Error::SqlError] if there is some other SQL error.
pub fn get_link(user_id: UserID, connection: &Connection) -> Result<InstitutionLink, Error> {
    get_links(user_id, connection)?
        .into_iter()
        .next()
        .ok_or(Error::NotLinked)
}

/// Get the institution link identified by `key`.
///
/// # Errors
/// This function will return a:
/// - [Error::NotLinked] if the link does not exist,
/// - or [Error::SqlError] if there is some other SQL error.
pub fn get_link_by_key(key: &LinkKey, connection: &Connection) -> Result<InstitutionLink, Error> {
    connection
        .prepare(
            "SELECT user_id, institution_id, cursor, access_token, accounts
             FROM institution_link
             WHERE user_id = :user_id AND institution_id = :institution_id",
        )?
        .query_row(
            rusqlite::named_params! {
                ":user_id": key.user_id,
                ":institution_id": key.institution_id,
            },
            map_link_row,
        )
        .map_err(|error| match error {
            rusqlite::Error::QueryReturnedNoRows => Error::NotLinked,
            error => error.into(),
        })
}

/// Store `cursor` as the resumption point for the link identified by `key`.
///
/// # Errors
/// This function will return a:
/// - [Error::NotLinked] if the link does not exist,
/// - or [Error::SqlError] if there is some other SQL error.
pub fn set_cursor(key: &LinkKey, cursor: &str, connection: &Connection) -> Result<(), Error> {
    let rows_affected = connection.execute(
        "UPDATE institution_link SET cursor = ?1 WHERE user_id = ?2 AND institution_id = ?3",
        (cursor, key.user_id, &key.institution_id),
    )?;

    if rows_affected == 0 {
        return Err(Error::NotLinked);
    }

    Ok(())
}

/// Replace the cached accounts snapshot for the link identified by `key`.
///
/// # Errors
/// This function will return a:
/// - [Error::NotLinked] if the link does not exist,
/// - or [Error::SqlError] if there is some other SQL error.
pub fn set_accounts(key: &LinkKey, accounts: &Value, connection: &Connection) -> Result<(), Error> {
    let rows_affected = connection.execute(
        "UPDATE institution_link SET accounts = ?1 WHERE user_id = ?2 AND institution_id = ?3",
        (accounts, key.user_id, &key.institution_id),
    )?;

    if rows_affected == 0 {
        return Err(Error::NotLinked);
    }

    Ok(())
}

fn map_link_row(row: &Row) -> Result<InstitutionLink, rusqlite::Error> {
    Ok(InstitutionLink {
        user_id: row.get(0)?,
        institution_id: row.get(1)?,
        cursor: row.get(2)?,
        access_token: row.get(3)?,
        accounts: row.get(4)?,
    })
}
