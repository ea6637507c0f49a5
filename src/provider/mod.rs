//! The contract with the external transaction provider and the data it sends.
//!
//! The provider reports changes to a linked institution's transactions as a
//! paginated stream. Each page carries the transactions added, modified and
//! removed since the cursor it was requested with, plus the cursor for the
//! next page.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Deserializer};
use serde_json::Value;
use time::{Date, OffsetDateTime, format_description::BorrowedFormatItem, macros::format_description};

mod plaid;

pub use plaid::{PlaidClient, PlaidEnvironment};

/// Date format used by the provider, e.g. "2024-03-01".
const PROVIDER_DATE_FORMAT: &[BorrowedFormatItem] = format_description!("[year]-[month]-[day]");

/// The ways talking to the transaction provider can fail.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ProviderError {
    /// The request never got a response, e.g. DNS failure or connection reset.
    #[error("could not reach the transaction provider: {0}")]
    Transport(String),

    /// The provider answered with an error status.
    #[error("the transaction provider rejected the request with {status} {code}: {message}")]
    Api {
        /// The HTTP status code.
        status: u16,
        /// The provider's machine readable error code.
        code: String,
        /// The provider's human readable error message.
        message: String,
    },

    /// The response could not be understood.
    #[error("the transaction provider returned malformed data: {0}")]
    Malformed(String),

    /// The provider kept reporting more pages after the page limit was reached.
    #[error("the transaction provider was still paginating after {0} pages")]
    TooManyPages(u32),

    /// Fetching every page took longer than the allowed time.
    #[error("the transaction provider did not finish within {0:?}")]
    Timeout(Duration),
}

/// A source of incremental transaction changes for linked institutions.
#[async_trait]
pub trait TransactionProvider: Send + Sync {
    /// Fetch the page of changes that follows `cursor` for the institution
    /// behind `access_token`.
    ///
    /// An empty `cursor` requests the first page of the full history.
    async fn sync(&self, access_token: &str, cursor: &str) -> Result<SyncPage, ProviderError>;
}

/// One page of changes returned by [TransactionProvider::sync].
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct SyncPage {
    /// Transactions the provider has not reported before.
    #[serde(default)]
    pub added: Vec<ProviderTransaction>,
    /// Transactions whose details have changed since they were reported.
    #[serde(default)]
    pub modified: Vec<ProviderTransaction>,
    /// Transactions that no longer exist.
    #[serde(default)]
    pub removed: Vec<RemovedTransaction>,
    /// The cursor to request the next page with.
    pub next_cursor: String,
    /// Whether another page follows this one.
    pub has_more: bool,
    /// The accounts for the link as the provider currently sees them.
    #[serde(default)]
    pub accounts: Vec<Value>,
}

/// A transaction record from the provider.
///
/// The full record is kept as an opaque `payload`; only the fields needed to
/// store it are extracted.
#[derive(Debug, Clone, PartialEq)]
pub struct ProviderTransaction {
    /// The provider's unique ID for the transaction.
    pub transaction_id: String,
    /// When the transaction was authorized, falling back to when it posted.
    pub timestamp: Option<OffsetDateTime>,
    /// The record exactly as the provider sent it.
    pub payload: Value,
}

impl ProviderTransaction {
    /// Extract the stored fields from a provider record.
    ///
    /// The timestamp is midnight UTC of `authorized_date`, or of `date` if the
    /// transaction has no authorization date.
    ///
    /// # Errors
    /// Returns [ProviderError::Malformed] if `transaction_id` is missing or
    /// not a string, or if a date is not formatted as `YYYY-MM-DD`.
    pub fn from_payload(payload: Value) -> Result<Self, ProviderError> {
        let transaction_id = payload
            .get("transaction_id")
            .and_then(Value::as_str)
            .ok_or_else(|| {
                ProviderError::Malformed("transaction is missing a transaction_id".to_owned())
            })?
            .to_owned();

        let authorized_date = parse_date_field(&payload, "authorized_date")?;
        let posted_date = parse_date_field(&payload, "date")?;
        let timestamp = authorized_date
            .or(posted_date)
            .map(|date| date.midnight().assume_utc());

        Ok(Self {
            transaction_id,
            timestamp,
            payload,
        })
    }
}

impl<'de> Deserialize<'de> for ProviderTransaction {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let payload = Value::deserialize(deserializer)?;
        ProviderTransaction::from_payload(payload).map_err(serde::de::Error::custom)
    }
}

fn parse_date_field(payload: &Value, field: &str) -> Result<Option<Date>, ProviderError> {
    match payload.get(field) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(text)) => Date::parse(text, PROVIDER_DATE_FORMAT)
            .map(Some)
            .map_err(|error| {
                ProviderError::Malformed(format!("invalid {field} \"{text}\": {error}"))
            }),
        Some(other) => Err(ProviderError::Malformed(format!(
            "expected {field} to be a date string, got {other}"
        ))),
    }
}

/// A transaction the provider reports as deleted.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct RemovedTransaction {
    /// The provider's ID for the deleted transaction.
    pub transaction_id: String,
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use time::macros::datetime;

    use super::{ProviderError, ProviderTransaction, SyncPage};

    #[test]
    fn parses_sync_page() {
        let body = json!({
            "added": [{
                "transaction_id": "txn_1",
                "account_id": "acc_1",
                "amount": 4.5,
                "authorized_date": "2024-03-01",
                "date": "2024-03-02",
                "name": "Coffee"
            }],
            "modified": [],
            "removed": [{ "transaction_id": "txn_0" }],
            "next_cursor": "cursor-1",
            "has_more": true,
            "accounts": [{ "account_id": "acc_1" }],
            "request_id": "req_1"
        });

        let page: SyncPage = serde_json::from_value(body).unwrap();

        assert_eq!(page.added.len(), 1);
        assert_eq!(page.added[0].transaction_id, "txn_1");
        assert_eq!(page.added[0].timestamp, Some(datetime!(2024-03-01 0:00 UTC)));
        assert_eq!(page.added[0].payload["name"], "Coffee");
        assert_eq!(page.removed[0].transaction_id, "txn_0");
        assert_eq!(page.next_cursor, "cursor-1");
        assert!(page.has_more);
        assert_eq!(page.accounts.len(), 1);
    }

    #[test]
    fn timestamp_falls_back_to_posted_date() {
        let transaction = ProviderTransaction::from_payload(json!({
            "transaction_id": "txn_1",
            "authorized_date": null,
            "date": "2024-03-02"
        }))
        .unwrap();

        assert_eq!(transaction.timestamp, Some(datetime!(2024-03-02 0:00 UTC)));
    }

    #[test]
    fn timestamp_is_none_without_dates() {
        let transaction =
            ProviderTransaction::from_payload(json!({ "transaction_id": "txn_1" })).unwrap();

        assert_eq!(transaction.timestamp, None);
    }

    #[test]
    fn missing_transaction_id_is_malformed() {
        let result = ProviderTransaction::from_payload(json!({ "date": "2024-03-02" }));

        assert!(matches!(result, Err(ProviderError::Malformed(_))));
    }

    #[test]
    fn invalid_date_is_malformed() {
        let result = ProviderTransaction::from_payload(json!({
            "transaction_id": "txn_1",
            "authorized_date": "03/02/2024"
        }));

        assert!(matches!(result, Err(ProviderError::Malformed(_))));
    }

    #[test]
    fn page_without_cursor_fails_to_parse() {
        let result = serde_json::from_value::<SyncPage>(json!({ "has_more": false }));

        assert!(result.is_err());
    }
}
