#![allow(missing_docs)]

mod http;
mod provider;

use rusqlite::Connection;
use serde_json::json;
use uuid::Uuid;

use crate::{
    db::initialize,
    link::{InstitutionLink, create_link},
    provider::{ProviderTransaction, RemovedTransaction},
    user::{UserID, create_user},
};

pub(crate) use http::{get_test_app_state, get_test_server, log_in};
pub(crate) use provider::{StubProvider, sync_page};

#[track_caller]
pub(crate) fn get_test_connection() -> Connection {
    let conn = Connection::open_in_memory().expect("Could not open database in memory.");
    initialize(&conn).expect("Could not initialize database.");
    conn
}

#[track_caller]
pub(crate) fn insert_test_user(conn: &Connection) -> UserID {
    let user_id = UserID::new(Uuid::new_v4());
    create_user(user_id, conn).expect("Could not create test user");
    user_id
}

#[track_caller]
pub(crate) fn insert_test_link(
    conn: &Connection,
    user_id: UserID,
    institution_id: &str,
) -> InstitutionLink {
    let access_token = format!("access-sandbox-{}", Uuid::new_v4());
    create_link(user_id, institution_id, &access_token, &json!([]), conn)
        .expect("Could not create test link")
}

/// A provider record dated `date`, formatted as "YYYY-MM-DD".
#[track_caller]
pub(crate) fn provider_transaction(transaction_id: &str, date: &str) -> ProviderTransaction {
    ProviderTransaction::from_payload(json!({
        "transaction_id": transaction_id,
        "account_id": "acc_1",
        "amount": 12.5,
        "authorized_date": date,
        "date": date,
        "name": format!("Purchase {transaction_id}")
    }))
    .expect("Could not build provider transaction")
}

pub(crate) fn removed_transaction(transaction_id: &str) -> RemovedTransaction {
    RemovedTransaction {
        transaction_id: transaction_id.to_owned(),
    }
}
