//! Pulls changes from the transaction provider and applies them locally.
//!
//! A sync for one institution link runs in two phases. The fetch phase walks
//! the provider's pages from the stored cursor until the provider reports no
//! more changes. The apply phase then writes the new cursor, the accounts
//! snapshot and every transaction change in a single database transaction,
//! so a failure in either phase leaves the link exactly as it was.

use std::time::Duration;

mod endpoint;
mod lock;
mod pages;
mod reconcile;

pub use endpoint::get_synced_transactions;
pub use lock::SyncLocks;
pub use pages::{SyncChanges, SyncPages};
pub use reconcile::{SyncState, sync_link, sync_user_transactions};

/// The default limit on the number of pages fetched in one sync.
pub const DEFAULT_MAX_PAGES: u32 = 500;

/// The default limit on how long the fetch phase of one sync may take.
pub const DEFAULT_SYNC_TIMEOUT: Duration = Duration::from_secs(120);

/// Bounds on a single sync.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncConfig {
    /// Fail the sync if the provider still has more pages after this many.
    pub max_pages: u32,
    /// Fail the sync if fetching every page takes longer than this.
    pub timeout: Duration,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            max_pages: DEFAULT_MAX_PAGES,
            timeout: DEFAULT_SYNC_TIMEOUT,
        }
    }
}
