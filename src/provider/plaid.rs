//! HTTP client for Plaid's `/transactions/sync` endpoint.

use std::{fmt::Debug, time::Duration};

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};

use super::{ProviderError, SyncPage, TransactionProvider};

/// The Plaid deployment to talk to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum PlaidEnvironment {
    /// Test credentials and fake institutions.
    Sandbox,
    /// Real institutions with a limited number of items.
    Development,
    /// Real institutions.
    Production,
}

impl PlaidEnvironment {
    /// The API root for the environment.
    pub fn base_url(&self) -> &'static str {
        match self {
            PlaidEnvironment::Sandbox => "https://sandbox.plaid.com",
            PlaidEnvironment::Development => "https://development.plaid.com",
            PlaidEnvironment::Production => "https://production.plaid.com",
        }
    }
}

/// A [TransactionProvider] backed by the Plaid API.
#[derive(Clone)]
pub struct PlaidClient {
    http: reqwest::Client,
    base_url: String,
    client_id: String,
    secret: String,
    page_size: u32,
}

impl PlaidClient {
    /// Create a client for the API rooted at `base_url`.
    ///
    /// `page_size` is the number of transactions requested per page and
    /// `request_timeout` bounds each individual HTTP request.
    ///
    /// # Errors
    /// Returns [ProviderError::Transport] if the HTTP client cannot be built,
    /// e.g. the TLS backend fails to initialize.
    pub fn new(
        base_url: &str,
        client_id: &str,
        secret: &str,
        page_size: u32,
        request_timeout: Duration,
    ) -> Result<Self, ProviderError> {
        let http = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|error| ProviderError::Transport(error.to_string()))?;

        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_owned(),
            client_id: client_id.to_owned(),
            secret: secret.to_owned(),
            page_size,
        })
    }
}

impl Debug for PlaidClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PlaidClient")
            .field("base_url", &self.base_url)
            .field("client_id", &self.client_id)
            .field("secret", &"********")
            .field("page_size", &self.page_size)
            .finish()
    }
}

#[derive(Debug, Serialize)]
struct SyncRequest<'a> {
    client_id: &'a str,
    secret: &'a str,
    access_token: &'a str,
    #[serde(skip_serializing_if = "str::is_empty")]
    cursor: &'a str,
    count: u32,
}

#[derive(Debug, Deserialize)]
struct PlaidErrorBody {
    error_type: String,
    error_code: String,
    error_message: String,
}

#[async_trait]
impl TransactionProvider for PlaidClient {
    async fn sync(&self, access_token: &str, cursor: &str) -> Result<SyncPage, ProviderError> {
        let url = format!("{}/transactions/sync", self.base_url);
        let request = SyncRequest {
            client_id: &self.client_id,
            secret: &self.secret,
            access_token,
            cursor,
            count: self.page_size,
        };

        let response = self
            .http
            .post(&url)
            .json(&request)
            .send()
            .await
            .inspect_err(|error| {
                tracing::error!("error occurred in request to the Plaid sync API: {error:#?}")
            })
            .map_err(|error| ProviderError::Transport(error.to_string()))?;

        let status = response.status();
        let body = response
            .bytes()
            .await
            .map_err(|error| ProviderError::Transport(error.to_string()))?;

        if !status.is_success() {
            return Err(parse_error_body(status, &body));
        }

        serde_json::from_slice::<SyncPage>(&body)
            .inspect_err(|error| {
                tracing::error!("error occurred while deserialising sync response: {error}")
            })
            .map_err(|error| ProviderError::Malformed(error.to_string()))
    }
}

fn parse_error_body(status: StatusCode, body: &[u8]) -> ProviderError {
    match serde_json::from_slice::<PlaidErrorBody>(body) {
        Ok(error) => {
            tracing::warn!(
                "Plaid returned {status} {}/{}: {}",
                error.error_type,
                error.error_code,
                error.error_message
            );
            ProviderError::Api {
                status: status.as_u16(),
                code: error.error_code,
                message: error.error_message,
            }
        }
        Err(_) => ProviderError::Api {
            status: status.as_u16(),
            code: "UNKNOWN".to_owned(),
            message: String::from_utf8_lossy(body).into_owned(),
        },
    }
}

#[cfg(test)]
mod tests {
    use std::{
        sync::{Arc, Mutex},
        time::Duration,
    };

    use axum::{Json, Router, extract::State, http::StatusCode, routing::post};
    use serde_json::{Value, json};

    use crate::provider::{PlaidClient, ProviderError, TransactionProvider};

    type Requests = Arc<Mutex<Vec<Value>>>;

    async fn spawn_stub(router: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap();
        tokio::spawn(async move { axum::serve(listener, router).await.unwrap() });

        format!("http://{address}")
    }

    fn get_client(base_url: &str) -> PlaidClient {
        PlaidClient::new(base_url, "client-id", "shh", 250, Duration::from_secs(5)).unwrap()
    }

    async fn record_and_reply(State(requests): State<Requests>, Json(body): Json<Value>) -> Json<Value> {
        requests.lock().unwrap().push(body);

        Json(json!({
            "added": [{ "transaction_id": "txn_1", "authorized_date": "2024-03-01" }],
            "modified": [],
            "removed": [],
            "next_cursor": "cursor-1",
            "has_more": false,
            "accounts": [],
            "request_id": "req_1"
        }))
    }

    #[tokio::test]
    async fn sends_credentials_and_cursor() {
        let requests = Requests::default();
        let router = Router::new()
            .route("/transactions/sync", post(record_and_reply))
            .with_state(requests.clone());
        let base_url = spawn_stub(router).await;

        let page = get_client(&base_url)
            .sync("access-1", "cursor-0")
            .await
            .unwrap();

        assert_eq!(page.added[0].transaction_id, "txn_1");
        assert_eq!(page.next_cursor, "cursor-1");
        let requests = requests.lock().unwrap();
        assert_eq!(
            requests[0],
            json!({
                "client_id": "client-id",
                "secret": "shh",
                "access_token": "access-1",
                "cursor": "cursor-0",
                "count": 250
            })
        );
    }

    #[tokio::test]
    async fn omits_empty_cursor() {
        let requests = Requests::default();
        let router = Router::new()
            .route("/transactions/sync", post(record_and_reply))
            .with_state(requests.clone());
        let base_url = spawn_stub(router).await;

        get_client(&base_url).sync("access-1", "").await.unwrap();

        let requests = requests.lock().unwrap();
        assert!(requests[0].get("cursor").is_none());
    }

    #[tokio::test]
    async fn error_body_becomes_api_error() {
        let router = Router::new().route(
            "/transactions/sync",
            post(|| async {
                (
                    StatusCode::BAD_REQUEST,
                    Json(json!({
                        "error_type": "ITEM_ERROR",
                        "error_code": "ITEM_LOGIN_REQUIRED",
                        "error_message": "the login details of this item have changed",
                        "request_id": "req_2"
                    })),
                )
            }),
        );
        let base_url = spawn_stub(router).await;

        let result = get_client(&base_url).sync("access-1", "").await;

        assert_eq!(
            result,
            Err(ProviderError::Api {
                status: 400,
                code: "ITEM_LOGIN_REQUIRED".to_owned(),
                message: "the login details of this item have changed".to_owned(),
            })
        );
    }

    #[tokio::test]
    async fn undecodable_body_is_malformed() {
        let router = Router::new().route("/transactions/sync", post(|| async { "not json" }));
        let base_url = spawn_stub(router).await;

        let result = get_client(&base_url).sync("access-1", "").await;

        assert!(matches!(result, Err(ProviderError::Malformed(_))));
    }

    #[tokio::test]
    async fn unreachable_server_is_transport_error() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap();
        drop(listener);

        let result = get_client(&format!("http://{address}"))
            .sync("access-1", "")
            .await;

        assert!(matches!(result, Err(ProviderError::Transport(_))));
    }

    #[test]
    fn debug_output_hides_secret() {
        let client = get_client("http://localhost");

        assert!(!format!("{client:?}").contains("shh"));
    }
}
