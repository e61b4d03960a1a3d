//! Per-(organization, topic) advisory locks (spec.md §4.9, §5).
//!
//! Both the in-memory and the SQL datamodel share this in-process lock
//! table: certificate/vlob writes take the relevant topic lock before the
//! causal-clock check and release it at commit, which is enough to
//! serialize a single server process. A production multi-process deployment
//! additionally wants `pg_advisory_xact_lock` inside the SQL transaction;
//! `sql::SqlDatamodel` takes that lock too (see `sql/mod.rs`).

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use dashmap::DashMap;
use parsec_types::{OrganizationId, RealmId};
use tokio::sync::{Mutex, OwnedMutexGuard};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum LockTopic {
    Common,
    Realm(RealmId),
    Sequester,
    Shamir,
}

impl LockTopic {
    /// A stable i64 key for use with `pg_advisory_xact_lock`, which only
    /// takes a single 64-bit integer.
    pub fn advisory_key(&self, org: &OrganizationId) -> i64 {
        let mut hasher = DefaultHasher::new();
        org.as_str().hash(&mut hasher);
        self.hash(&mut hasher);
        hasher.finish() as i64
    }
}

/// Holds the lock until dropped.
pub struct LockGuard(#[allow(dead_code)] OwnedMutexGuard<()>);

#[derive(Default)]
pub struct LockTable {
    locks: DashMap<(OrganizationId, LockTopic), Arc<Mutex<()>>>,
}

impl LockTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn acquire(&self, org: &OrganizationId, topic: LockTopic) -> LockGuard {
        let mutex = self
            .locks
            .entry((org.clone(), topic))
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        LockGuard(mutex.lock_owned().await)
    }
}
