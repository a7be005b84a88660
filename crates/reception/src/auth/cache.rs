//! TTL cache of authorization decisions.
//!
//! Entries expire by TTL only; changing an app's configuration does not
//! invalidate decisions already cached for it.

use std::collections::HashMap;

use parking_lot::RwLock;
use tokio::time::{Duration, Instant};

use super::Permission;
use crate::model::AppId;

/// Cache key: who asked, for what, from where.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AuthCacheKey {
    pub app_id: AppId,
    pub permission: Permission,
    pub client_ip: String,
}

#[derive(Debug, Clone, Copy)]
struct CachedDecision {
    allowed: bool,
    expires_at: Instant,
}

#[derive(Debug)]
pub struct AuthorizationCache {
    ttl: Duration,
    entries: RwLock<HashMap<AuthCacheKey, CachedDecision>>,
}

impl AuthorizationCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: RwLock::new(HashMap::new()),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Cached decision, `None` when absent or expired.
    pub fn get(&self, key: &AuthCacheKey) -> Option<bool> {
        let now = Instant::now();
        self.entries
            .read()
            .get(key)
            .filter(|entry| entry.expires_at > now)
            .map(|entry| entry.allowed)
    }

    pub fn insert(&self, key: AuthCacheKey, allowed: bool) {
        let entry = CachedDecision {
            allowed,
            expires_at: Instant::now() + self.ttl,
        };
        self.entries.write().insert(key, entry);
    }

    /// Drops expired entries, returning how many were removed.
    pub fn evict_expired(&self) -> usize {
        let now = Instant::now();
        let mut entries = self.entries.write();
        let before = entries.len();
        entries.retain(|_, entry| entry.expires_at > now);
        before - entries.len()
    }

    pub fn clear(&self) {
        self.entries.write().clear();
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}
