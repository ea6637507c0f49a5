//! A scripted [TransactionProvider] for exercising the sync process without a
//! network.

use std::{
    collections::VecDeque,
    sync::{
        Mutex,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use serde_json::Value;

use crate::provider::{
    ProviderError, ProviderTransaction, RemovedTransaction, SyncPage, TransactionProvider,
};

/// Build a page of changes.
pub(crate) fn sync_page(
    added: Vec<ProviderTransaction>,
    modified: Vec<ProviderTransaction>,
    removed: Vec<RemovedTransaction>,
    next_cursor: &str,
    has_more: bool,
) -> SyncPage {
    SyncPage {
        added,
        modified,
        removed,
        next_cursor: next_cursor.to_owned(),
        has_more,
        accounts: Vec::<Value>::new(),
    }
}

/// Replies with queued results in order.
///
/// Once the queue is empty every call gets a page with no changes that
/// echoes the requested cursor, which is what the real provider does when
/// nothing has happened since the last sync.
#[derive(Debug, Default)]
pub(crate) struct StubProvider {
    responses: Mutex<VecDeque<Result<SyncPage, ProviderError>>>,
    calls: Mutex<Vec<(String, String)>>,
    delay: Duration,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl StubProvider {
    pub(crate) fn new(pages: Vec<SyncPage>) -> Self {
        Self::with_responses(pages.into_iter().map(Ok).collect())
    }

    pub(crate) fn with_responses(responses: Vec<Result<SyncPage, ProviderError>>) -> Self {
        Self {
            responses: Mutex::new(responses.into()),
            ..Default::default()
        }
    }

    /// Make every call take at least `delay`.
    pub(crate) fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub(crate) fn push_page(&self, page: SyncPage) {
        self.responses.lock().unwrap().push_back(Ok(page));
    }

    /// The `(access_token, cursor)` pair of every call, in call order.
    pub(crate) fn calls(&self) -> Vec<(String, String)> {
        self.calls.lock().unwrap().clone()
    }

    /// The cursor of every call, in call order.
    pub(crate) fn cursors(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .map(|(_, cursor)| cursor)
            .collect()
    }

    /// The largest number of calls that were running at the same time.
    pub(crate) fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TransactionProvider for StubProvider {
    async fn sync(&self, access_token: &str, cursor: &str) -> Result<SyncPage, ProviderError> {
        self.calls
            .lock()
            .unwrap()
            .push((access_token.to_owned(), cursor.to_owned()));

        let running = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(running, Ordering::SeqCst);

        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        let response = self.responses.lock().unwrap().pop_front();
        response.unwrap_or_else(|| Ok(sync_page(vec![], vec![], vec![], cursor, false)))
    }
}
