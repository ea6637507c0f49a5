//! Keeps syncs of the same institution link from running at the same time.

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::link::LinkKey;

/// One async lock per institution link.
///
/// Two overlapping syncs of a link would both start from the same stored
/// cursor and both apply the same changes. Holding the link's lock from
/// reading the cursor until the changes are committed means the second sync
/// starts from the cursor the first one stored.
#[derive(Debug, Clone, Default)]
pub struct SyncLocks {
    locks: Arc<DashMap<LinkKey, Arc<Mutex<()>>>>,
}

impl SyncLocks {
    /// Create an empty set of locks.
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait until no other sync holds the lock for `key`, then take it.
    ///
    /// The lock is released when the returned guard is dropped.
    pub async fn lock(&self, key: &LinkKey) -> OwnedMutexGuard<()> {
        let mutex = self.locks.entry(key.clone()).or_default().clone();

        match mutex.clone().try_lock_owned() {
            Ok(guard) => guard,
            Err(_) => {
                tracing::debug!("Waiting for the running sync of {key} to finish");
                mutex.lock_owned().await
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use uuid::Uuid;

    use crate::{link::LinkKey, sync::SyncLocks, user::UserID};

    fn key(institution_id: &str) -> LinkKey {
        LinkKey {
            user_id: UserID::new(Uuid::nil()),
            institution_id: institution_id.to_owned(),
        }
    }

    #[tokio::test]
    async fn same_link_waits_for_release() {
        let locks = SyncLocks::new();
        let guard = locks.lock(&key("ins_1")).await;

        let waiting = tokio::time::timeout(Duration::from_millis(50), locks.lock(&key("ins_1"))).await;
        assert!(waiting.is_err());

        drop(guard);
        let acquired =
            tokio::time::timeout(Duration::from_millis(50), locks.lock(&key("ins_1"))).await;
        assert!(acquired.is_ok());
    }

    #[tokio::test]
    async fn different_links_do_not_block() {
        let locks = SyncLocks::new();
        let _guard = locks.lock(&key("ins_1")).await;

        let other = tokio::time::timeout(Duration::from_millis(50), locks.lock(&key("ins_2"))).await;

        assert!(other.is_ok());
    }
}
