//! The zone key cache.
//!
//! Public keys learned from delegation assertions, keyed by context, zone,
//! and algorithm. The verifier consults this cache when checking signatures
//! of later-arriving sections; a missing key sends the section to the
//! pending key cache instead. Keys inherit the validity window of the
//! delegation assertion that carried them, never a cross-cache reference,
//! so the two caches cannot form a cycle.

use crate::base::signature::{PublicKey, SignatureAlgorithm};
use lru::LruCache;
use parking_lot::Mutex;
use std::collections::HashMap;

//------------ ZoneKeyCache --------------------------------------------------

/// Fraction of capacity above which `add` starts warning.
const WARN_NUMERATOR: usize = 3;
const WARN_DENOMINATOR: usize = 4;

/// A bounded cache of zone public keys.
pub struct ZoneKeyCache {
    /// The synchronized interior.
    inner: Mutex<Inner>,
}

/// The interior of the cache.
struct Inner {
    /// The cached keys.
    keys: HashMap<Key, Vec<Entry>>,

    /// Recency of keys holding at least one evictable entry.
    lru: LruCache<Key, ()>,

    /// Total number of entries.
    len: usize,

    /// Maximum number of entries.
    capacity: usize,
}

/// The primary key of the cache.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
struct Key {
    /// The namespace context.
    context: String,

    /// The delegated zone.
    zone: String,

    /// The key algorithm.
    algorithm: SignatureAlgorithm,
}

/// One cached public key.
#[derive(Clone, Debug)]
struct Entry {
    /// The key, validity already stamped by the carrying assertion.
    public_key: PublicKey,

    /// Whether the entry was issued by this server.
    authoritative: bool,
}

impl ZoneKeyCache {
    /// Creates a cache holding at most `capacity` keys.
    pub fn new(capacity: usize) -> Self {
        ZoneKeyCache {
            inner: Mutex::new(Inner {
                keys: HashMap::new(),
                lru: LruCache::unbounded(),
                len: 0,
                capacity,
            }),
        }
    }

    /// Adds a public key for a delegated zone.
    ///
    /// The key must already carry the validity window of the delegation
    /// assertion it arrived in. Returns `false` once the cache nears its
    /// capacity so the engine can shed load before hard eviction starts.
    pub fn add(
        &self,
        context: &str,
        zone: &str,
        public_key: PublicKey,
        authoritative: bool,
    ) -> bool {
        let key = Key {
            context: context.into(),
            zone: zone.into(),
            algorithm: public_key.algorithm,
        };
        let mut inner = self.inner.lock();
        let mut inserted = false;
        {
            let entries = inner.keys.entry(key.clone()).or_default();
            let same = entries.iter_mut().find(|entry| {
                entry.public_key.key_phase == public_key.key_phase
            });
            match same {
                Some(entry) => {
                    if public_key.valid_until >= entry.public_key.valid_until
                    {
                        entry.public_key = public_key;
                        entry.authoritative = authoritative;
                    }
                }
                None => {
                    entries.push(Entry {
                        public_key,
                        authoritative,
                    });
                    inserted = true;
                }
            }
        }
        if inserted {
            inner.len += 1;
        }
        if !authoritative {
            inner.lru.put(key, ());
        }
        while inner.len > inner.capacity {
            let victim = match inner.lru.pop_lru() {
                Some((victim, ())) => victim,
                None => break,
            };
            let mut removed = 0;
            let mut emptied = false;
            if let Some(entries) = inner.keys.get_mut(&victim) {
                let before = entries.len();
                entries.retain(|entry| entry.authoritative);
                removed = before - entries.len();
                emptied = entries.is_empty();
            }
            inner.len -= removed;
            if emptied {
                inner.keys.remove(&victim);
            }
        }
        inner.len * WARN_DENOMINATOR < inner.capacity * WARN_NUMERATOR
    }

    /// Returns a key valid at `now` for the given zone and algorithm.
    pub fn get(
        &self,
        context: &str,
        zone: &str,
        algorithm: SignatureAlgorithm,
        now: i64,
    ) -> Option<PublicKey> {
        let key = Key {
            context: context.into(),
            zone: zone.into(),
            algorithm,
        };
        let mut inner = self.inner.lock();
        let found = inner.keys.get(&key)?.iter().find(|entry| {
            entry.public_key.valid_since <= now
                && now < entry.public_key.valid_until
        })?;
        let public_key = found.public_key.clone();
        inner.lru.promote(&key);
        Some(public_key)
    }

    /// Removes every expired key.
    pub fn remove_expired(&self, now: i64) {
        let mut inner = self.inner.lock();
        let mut removed = 0;
        let mut empty_keys = Vec::new();
        for (key, entries) in inner.keys.iter_mut() {
            let before = entries.len();
            entries.retain(|entry| entry.public_key.valid_until > now);
            removed += before - entries.len();
            if entries.is_empty() {
                empty_keys.push(key.clone());
            }
        }
        inner.len -= removed;
        for key in empty_keys {
            inner.keys.remove(&key);
            inner.lru.pop(&key);
        }
    }

    /// The number of keys currently cached.
    pub fn len(&self) -> usize {
        self.inner.lock().len
    }

    /// Returns whether the cache is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

//============ Tests =========================================================
