//! Single-flight revocation cache.
//!
//! One slot per key. The first caller for a key runs the fetch while later
//! callers block on the same slot and share its result. Failed fetches are
//! evicted so the next caller tries again; successful ones live until the
//! evidence's `nextUpdate` or the fallback TTL, and expired entries are
//! dropped whenever the cache is touched.

use super::RevocationEvidence;
use crate::error::{Error, Result};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, OnceLock};
use std::time::Duration;

/// What a cached response answers for.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum CacheKey {
    /// OCSP response for one certificate
    Ocsp {
        /// Certificate fingerprint
        fingerprint: String,
    },
    /// CRL from one issuer and distribution point
    Crl {
        /// Issuer fingerprint
        issuer: String,
        /// Distribution point URL
        url: String,
    },
}

impl CacheKey {
    fn subject(&self) -> &str {
        match self {
            CacheKey::Ocsp { fingerprint } => fingerprint,
            CacheKey::Crl { issuer, .. } => issuer,
        }
    }
}

enum Failure {
    Cancelled,
    Unavailable(String),
}

#[derive(Default)]
struct Slot {
    value: OnceLock<std::result::Result<RevocationEvidence, Failure>>,
}

/// Cache statistics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Lookups served from a completed or in-flight slot
    pub hits: usize,
    /// Lookups that ran the fetch
    pub misses: usize,
}

/// Concurrent revocation cache, shared explicitly between signing calls.
pub struct RevocationCache {
    slots: Mutex<HashMap<CacheKey, Arc<Slot>>>,
    fallback_ttl: Duration,
    hits: AtomicUsize,
    misses: AtomicUsize,
}

impl std::fmt::Debug for RevocationCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RevocationCache")
            .field("fallback_ttl", &self.fallback_ttl)
            .field("stats", &self.stats())
            .finish()
    }
}

impl RevocationCache {
    /// Cache whose entries without `nextUpdate` expire after `fallback_ttl`.
    pub fn new(fallback_ttl: Duration) -> Self {
        Self {
            slots: Mutex::new(HashMap::new()),
            fallback_ttl,
            hits: AtomicUsize::new(0),
            misses: AtomicUsize::new(0),
        }
    }

    fn expiry(&self, evidence: &RevocationEvidence) -> DateTime<Utc> {
        evidence.next_update.unwrap_or_else(|| {
            let ttl = chrono::Duration::from_std(self.fallback_ttl).unwrap_or(chrono::Duration::zero());
            evidence.fetched_at + ttl
        })
    }

    /// Drop completed entries that are expired or failed. In-flight slots stay.
    fn prune(&self, slots: &mut HashMap<CacheKey, Arc<Slot>>, now: DateTime<Utc>) {
        let before = slots.len();
        slots.retain(|_, slot| match slot.value.get() {
            Some(Ok(evidence)) => now < self.expiry(evidence),
            Some(Err(_)) => false,
            None => true,
        });
        if slots.len() < before {
            log::debug!("dropped {} expired revocation cache entries", before - slots.len());
        }
    }

    fn slot(&self, key: &CacheKey, now: DateTime<Utc>) -> Arc<Slot> {
        let mut slots = self.slots.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        self.prune(&mut slots, now);
        slots.entry(key.clone()).or_default().clone()
    }

    /// Return the cached evidence for `key`, running `fetch` if there is
    /// none. Concurrent callers for the same key share one fetch.
    pub fn get_or_fetch(
        &self,
        key: &CacheKey,
        fetch: impl FnOnce() -> Result<RevocationEvidence>,
    ) -> Result<RevocationEvidence> {
        let slot = self.slot(key, Utc::now());
        let mut ran = false;
        let result = slot.value.get_or_init(|| {
            ran = true;
            fetch().map_err(|e| match e {
                Error::Cancelled => Failure::Cancelled,
                other => Failure::Unavailable(other.to_string()),
            })
        });
        if ran {
            self.misses.fetch_add(1, Ordering::Relaxed);
        } else {
            self.hits.fetch_add(1, Ordering::Relaxed);
            log::debug!("revocation cache hit for {}", key.subject());
        }
        match result {
            Ok(evidence) => Ok(evidence.clone()),
            Err(reason) => {
                let mut slots = self.slots.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
                if slots.get(key).is_some_and(|current| Arc::ptr_eq(current, &slot)) {
                    slots.remove(key);
                }
                let reason = match reason {
                    Failure::Cancelled if ran => return Err(Error::Cancelled),
                    Failure::Cancelled => "shared lookup was cancelled".to_string(),
                    Failure::Unavailable(reason) => reason.clone(),
                };
                Err(Error::RevocationUnavailable {
                    fingerprint: key.subject().to_string(),
                    reason,
                })
            },
        }
    }

    /// Drop every entry.
    pub fn clear(&self) {
        self.slots.lock().unwrap_or_else(|poisoned| poisoned.into_inner()).clear();
    }

    /// Number of live entries, including in-flight ones.
    pub fn len(&self) -> usize {
        let mut slots = self.slots.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        self.prune(&mut slots, Utc::now());
        slots.len()
    }

    /// True when the cache holds nothing.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Hit and miss counters.
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
        }
    }
}
