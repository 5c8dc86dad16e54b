// Copyright 2022-2023 Debox Network
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.
//

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::{Duration, Instant};

use uuid::Uuid;

/// Advisory lock bookkeeping.
///
/// Tokens are handed out so that clients which insist on locking before
/// writing (Finder, Explorer) keep working. Nothing checks them: writes from
/// any client proceed whether or not the path is locked.
#[derive(Debug, Clone)]
pub(crate) struct LockTable {
    locks: Arc<RwLock<HashMap<String, LockEntry>>>,
    timeout: Duration,
}

#[derive(Debug, Clone)]
struct LockEntry {
    token: String,
    issued: Instant,
}

impl LockTable {
    pub(crate) fn new(timeout: Duration) -> Self {
        Self {
            locks: Arc::default(),
            timeout,
        }
    }

    pub(crate) fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Returns the live token for `path`, issuing a new one if there is none
    /// or the previous one outlived the timeout. Expired entries for other
    /// paths are pruned on the way.
    pub(crate) fn lock(&self, path: &str) -> String {
        let locks = &mut self.locks.write().unwrap_or_else(PoisonError::into_inner);
        let timeout = self.timeout;
        locks.retain(|_, entry| entry.issued.elapsed() < timeout);
        if let Some(entry) = locks.get(path) {
            return entry.token.clone();
        }
        let token = format!("urn:uuid:{}", Uuid::new_v4());
        locks.insert(
            path.to_string(),
            LockEntry {
                token: token.clone(),
                issued: Instant::now(),
            },
        );
        token
    }

    /// Drops the lock on `path` and returns its token, or the token the client
    /// presented when the table has none.
    pub(crate) fn unlock(&self, path: &str, presented: Option<&str>) -> Option<String> {
        let locks = &mut self.locks.write().unwrap_or_else(PoisonError::into_inner);
        locks
            .remove(path)
            .map(|entry| entry.token)
            .or_else(|| presented.map(strip_brackets))
    }

    /// Drops the locks on `path` and everything below it, for resources that
    /// were moved or removed.
    pub(crate) fn forget(&self, path: &str) {
        let locks = &mut self.locks.write().unwrap_or_else(PoisonError::into_inner);
        let below = format!("{}/", path.trim_end_matches('/'));
        locks.retain(|locked, _| locked != path && !locked.starts_with(&below));
    }

    pub(crate) fn clear(&self) {
        self.locks.write().unwrap_or_else(PoisonError::into_inner).clear();
    }

    pub(crate) fn len(&self) -> usize {
        self.locks.read().unwrap_or_else(PoisonError::into_inner).len()
    }
}

#[inline]
fn strip_brackets(token: &str) -> String {
    token.trim().trim_start_matches('<').trim_end_matches('>').to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn relock_returns_same_token() {
        let table = LockTable::new(Duration::from_secs(3600));
        let first = table.lock("/a.txt");
        assert!(first.starts_with("urn:uuid:"));
        assert_eq!(table.lock("/a.txt"), first);
        assert_ne!(table.lock("/b.txt"), first);
    }

    #[test]
    fn unlock_echoes_issued_token() {
        let table = LockTable::new(Duration::from_secs(3600));
        let token = table.lock("/a.txt");
        assert_eq!(table.unlock("/a.txt", Some("<urn:uuid:other>")), Some(token));
        assert_eq!(table.len(), 0);
        assert_eq!(table.unlock("/a.txt", Some("<urn:uuid:other>")).as_deref(), Some("urn:uuid:other"));
        assert_eq!(table.unlock("/a.txt", None), None);
    }

    #[test]
    fn expired_lock_is_reissued() {
        let table = LockTable::new(Duration::ZERO);
        let first = table.lock("/a.txt");
        assert_ne!(table.lock("/a.txt"), first);
    }

    #[test]
    fn expired_locks_are_pruned() {
        let table = LockTable::new(Duration::ZERO);
        table.lock("/a.txt");
        table.lock("/b.txt");
        table.lock("/c.txt");
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn forget_drops_subtree() {
        let table = LockTable::new(Duration::from_secs(60));
        table.lock("/docs");
        table.lock("/docs/a.txt");
        table.lock("/docsx");
        table.forget("/docs");
        assert_eq!(table.len(), 1);
        table.forget("/docsx");
        assert_eq!(table.len(), 0);
    }

    #[test]
    fn clear_drops_everything() {
        let table = LockTable::new(Duration::from_secs(60));
        table.lock("/a");
        table.lock("/b");
        table.clear();
        assert_eq!(table.len(), 0);
    }
}
