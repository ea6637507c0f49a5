//! The fetch phase: walking the provider's pages for one link.

use serde_json::Value;

use crate::{
    provider::{
        ProviderError, ProviderTransaction, RemovedTransaction, SyncPage, TransactionProvider,
    },
    transaction::BatchChanges,
};

/// The pages of changes that follow a cursor, fetched one at a time.
///
/// The sequence ends after the first page that reports `has_more = false`,
/// after an error, or with [ProviderError::TooManyPages] once `max_pages`
/// pages have been fetched and the provider still reports more. It cannot be
/// restarted: start a new one from the last stored cursor instead.
pub struct SyncPages<'a> {
    provider: &'a dyn TransactionProvider,
    access_token: &'a str,
    cursor: String,
    finished: bool,
    pages_fetched: u32,
    max_pages: u32,
}

impl<'a> SyncPages<'a> {
    /// Prepare to fetch the pages that follow `cursor` for the link behind
    /// `access_token`. Nothing is requested until [SyncPages::next_page].
    pub fn new(
        provider: &'a dyn TransactionProvider,
        access_token: &'a str,
        cursor: &str,
        max_pages: u32,
    ) -> Self {
        Self {
            provider,
            access_token,
            cursor: cursor.to_owned(),
            finished: false,
            pages_fetched: 0,
            max_pages,
        }
    }

    /// Fetch the next page, or `None` once the provider has reported the
    /// last one.
    ///
    /// # Errors
    /// Returns the provider's error, or [ProviderError::TooManyPages] if the
    /// page limit has been reached. Either error ends the sequence.
    pub async fn next_page(&mut self) -> Result<Option<SyncPage>, ProviderError> {
        if self.finished {
            return Ok(None);
        }

        if self.pages_fetched >= self.max_pages {
            self.finished = true;
            return Err(ProviderError::TooManyPages(self.max_pages));
        }

        let page = match self.provider.sync(self.access_token, &self.cursor).await {
            Ok(page) => page,
            Err(error) => {
                self.finished = true;
                return Err(error);
            }
        };

        self.pages_fetched += 1;
        self.cursor.clone_from(&page.next_cursor);
        self.finished = !page.has_more;

        tracing::debug!(
            "Fetched page {}: {} added, {} modified, {} removed, has_more={}",
            self.pages_fetched,
            page.added.len(),
            page.modified.len(),
            page.removed.len(),
            page.has_more
        );

        Ok(Some(page))
    }

    /// Fetch every remaining page and merge them in order.
    ///
    /// # Errors
    /// Returns the first error from [SyncPages::next_page]. The pages fetched
    /// before the error are discarded.
    pub async fn collect_changes(mut self) -> Result<SyncChanges, ProviderError> {
        let mut changes = SyncChanges::starting_at(&self.cursor);

        while let Some(page) = self.next_page().await? {
            changes.extend(page);
        }

        Ok(changes)
    }
}

/// Every change from a complete walk of the provider's pages.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SyncChanges {
    /// Added transactions from every page, in page order.
    pub added: Vec<ProviderTransaction>,
    /// Modified transactions from every page, in page order.
    pub modified: Vec<ProviderTransaction>,
    /// Removed transactions from every page, in page order.
    pub removed: Vec<RemovedTransaction>,
    /// The cursor from the last page.
    pub next_cursor: String,
    /// The accounts from the last page that reported any.
    pub accounts: Vec<Value>,
    /// How many pages were fetched.
    pub pages: u32,
}

impl SyncChanges {
    fn starting_at(cursor: &str) -> Self {
        Self {
            next_cursor: cursor.to_owned(),
            ..Default::default()
        }
    }

    fn extend(&mut self, page: SyncPage) {
        self.added.extend(page.added);
        self.modified.extend(page.modified);
        self.removed.extend(page.removed);
        self.next_cursor = page.next_cursor;

        if !page.accounts.is_empty() {
            self.accounts = page.accounts;
        }

        self.pages += 1;
    }

    /// Borrow the transaction changes for applying to the database.
    pub fn as_batch(&self) -> BatchChanges<'_> {
        BatchChanges {
            added: &self.added,
            modified: &self.modified,
            removed: &self.removed,
        }
    }
}
