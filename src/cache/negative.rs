//! The negative assertion cache.
//!
//! Shards and zones, keyed by context and zone. Within one zone entry the
//! cached shards form an interval index over names: a lookup returns every
//! section whose range intersects the probed interval, zones always
//! included since they cover the whole zone. The assertions contained in a
//! shard or zone are *not* stored here; the engine propagates them into the
//! assertion cache separately.

use crate::base::name::NameInterval;
use crate::base::section::{Shard, Signed, Zone};
use lru::LruCache;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

//------------ NegSection ----------------------------------------------------

/// A section carrying negative evidence.
#[derive(Clone, Debug)]
pub enum NegSection {
    /// A shard covering part of a zone.
    Shard(Arc<Shard>),

    /// A full zone enumeration.
    Zone(Arc<Zone>),
}

impl NegSection {
    /// Returns whether the section's coverage intersects the interval.
    pub fn intersects(&self, interval: &NameInterval) -> bool {
        match self {
            NegSection::Shard(shard) => shard.intersects(interval),
            NegSection::Zone(_) => true,
        }
    }

    /// The last second at which any signature is valid.
    pub fn valid_until(&self) -> i64 {
        match self {
            NegSection::Shard(shard) => shard.valid_until(),
            NegSection::Zone(zone) => zone.valid_until(),
        }
    }

    /// The first second at which any signature is valid.
    pub fn valid_since(&self) -> i64 {
        match self {
            NegSection::Shard(shard) => shard.valid_since(),
            NegSection::Zone(zone) => zone.valid_since(),
        }
    }
}

//------------ NegativeAssertionCache ----------------------------------------

/// A bounded cache of shards and zones.
pub struct NegativeAssertionCache {
    /// The synchronized interior.
    inner: Mutex<Inner>,
}

/// The interior of the cache.
struct Inner {
    /// Cached sections per context and zone.
    zones: HashMap<Key, Vec<Entry>>,

    /// Recency of keys that hold at least one evictable entry.
    lru: LruCache<Key, ()>,

    /// Total number of entries across all keys.
    len: usize,

    /// Maximum number of entries before eviction starts.
    capacity: usize,
}

/// The primary key of the cache.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
struct Key {
    /// The namespace context.
    context: String,

    /// The covered zone.
    zone: String,
}

/// One cached section.
#[derive(Clone, Debug)]
struct Entry {
    /// The section itself.
    section: NegSection,

    /// First second of validity.
    valid_since: i64,

    /// Last second of validity.
    valid_until: i64,

    /// Whether the entry was issued by this server.
    authoritative: bool,
}

impl NegativeAssertionCache {
    /// Creates a cache holding at most `capacity` sections.
    pub fn new(capacity: usize) -> Self {
        NegativeAssertionCache {
            inner: Mutex::new(Inner {
                zones: HashMap::new(),
                lru: LruCache::unbounded(),
                len: 0,
                capacity,
            }),
        }
    }

    /// Adds a shard. Returns `false` when the cache is degraded.
    pub fn add_shard(&self, shard: Arc<Shard>, authoritative: bool) -> bool {
        let key = Key {
            context: shard.context.clone(),
            zone: shard.subject_zone.clone(),
        };
        let entry = Entry {
            valid_since: shard.valid_since(),
            valid_until: shard.valid_until(),
            section: NegSection::Shard(shard),
            authoritative,
        };
        self.insert(key, entry)
    }

    /// Adds a zone. Returns `false` when the cache is degraded.
    pub fn add_zone(&self, zone: Arc<Zone>, authoritative: bool) -> bool {
        let key = Key {
            context: zone.context.clone(),
            zone: zone.subject_zone.clone(),
        };
        let entry = Entry {
            valid_since: zone.valid_since(),
            valid_until: zone.valid_until(),
            section: NegSection::Zone(zone),
            authoritative,
        };
        self.insert(key, entry)
    }

    /// Returns the non-expired sections of a zone intersecting the interval.
    pub fn get(
        &self,
        zone: &str,
        context: &str,
        interval: &NameInterval,
        now: i64,
    ) -> Option<Vec<NegSection>> {
        let key = Key {
            context: context.into(),
            zone: zone.into(),
        };
        let mut inner = self.inner.lock();
        let sections: Vec<NegSection> = inner
            .zones
            .get(&key)?
            .iter()
            .filter(|entry| {
                entry.valid_until > now && entry.section.intersects(interval)
            })
            .map(|entry| entry.section.clone())
            .collect();
        if sections.is_empty() {
            return None;
        }
        inner.lru.promote(&key);
        Some(sections)
    }

    /// Returns the sections of a zone intersecting the interval whose
    /// validity window overlaps `window`. Used by the consistency checker.
    pub fn get_overlapping(
        &self,
        zone: &str,
        context: &str,
        interval: &NameInterval,
        window: (i64, i64),
    ) -> Vec<NegSection> {
        let key = Key {
            context: context.into(),
            zone: zone.into(),
        };
        let inner = self.inner.lock();
        match inner.zones.get(&key) {
            Some(entries) => entries
                .iter()
                .filter(|entry| {
                    entry.valid_since <= window.1
                        && window.0 <= entry.valid_until
                        && entry.section.intersects(interval)
                })
                .map(|entry| entry.section.clone())
                .collect(),
            None => Vec::new(),
        }
    }

    /// Removes every expired entry.
    pub fn remove_expired(&self, now: i64) {
        let mut inner = self.inner.lock();
        let mut removed = 0;
        let mut empty_keys = Vec::new();
        for (key, entries) in inner.zones.iter_mut() {
            let before = entries.len();
            entries.retain(|entry| entry.valid_until > now);
            removed += before - entries.len();
            if entries.is_empty() {
                empty_keys.push(key.clone());
            }
        }
        inner.len -= removed;
        for key in empty_keys {
            inner.zones.remove(&key);
            inner.lru.pop(&key);
        }
    }

    /// The number of sections currently cached.
    pub fn len(&self) -> usize {
        self.inner.lock().len
    }

    /// Returns whether the cache is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Inserts one entry and evicts back to capacity.
    fn insert(&self, key: Key, entry: Entry) -> bool {
        let mut inner = self.inner.lock();
        let authoritative = entry.authoritative;
        inner.zones.entry(key.clone()).or_default().push(entry);
        inner.len += 1;
        if !authoritative {
            inner.lru.put(key, ());
        }
        while inner.len > inner.capacity {
            let victim = match inner.lru.pop_lru() {
                Some((victim, ())) => victim,
                None => return false,
            };
            let mut removed = 0;
            let mut emptied = false;
            if let Some(entries) = inner.zones.get_mut(&victim) {
                let before = entries.len();
                entries.retain(|entry| entry.authoritative);
                removed = before - entries.len();
                emptied = entries.is_empty();
            }
            inner.len -= removed;
            if emptied {
                inner.zones.remove(&victim);
            }
        }
        true
    }
}

//============ Tests =========================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::base::signature::{
        KeySpace, Signature, SignatureAlgorithm,
    };
    use bytes::Bytes;

    fn signature(valid_until: i64) -> Signature {
        Signature {
            key_space: KeySpace::Rains,
            algorithm: SignatureAlgorithm::Ed25519,
            key_phase: 0,
            valid_since: 0,
            valid_until,
            data: Bytes::new(),
        }
    }

    fn shard(zone: &str, from: &str, to: &str, valid_until: i64) -> Arc<Shard> {
        Arc::new(Shard {
            subject_zone: zone.into(),
            context: ".".into(),
            range_from: from.into(),
            range_to: to.into(),
            content: Vec::new(),
            signatures: vec![signature(valid_until)],
        })
    }

    fn zone(name: &str, valid_until: i64) -> Arc<Zone> {
        Arc::new(Zone {
            subject_zone: name.into(),
            context: ".".into(),
            content: Vec::new(),
            signatures: vec![signature(valid_until)],
        })
    }

    #[test]
    fn interval_lookup_hits_covering_shard() {
        let cache = NegativeAssertionCache::new(10);
        assert!(cache.add_shard(shard("a.", "b", "f", 100), false));
        let hit = cache
            .get("a.", ".", &NameInterval::point("c"), 50)
            .unwrap();
        assert_eq!(hit.len(), 1);
        assert!(cache
            .get("a.", ".", &NameInterval::point("g"), 50)
            .is_none());
    }

    #[test]
    fn zones_cover_every_name() {
        let cache = NegativeAssertionCache::new(10);
        cache.add_zone(zone("a.", 100), false);
        assert!(cache
            .get("a.", ".", &NameInterval::point("anything"), 50)
            .is_some());
        assert!(cache
            .get("b.", ".", &NameInterval::point("anything"), 50)
            .is_none());
    }

    #[test]
    fn expiry_hides_and_reaps() {
        let cache = NegativeAssertionCache::new(10);
        cache.add_shard(shard("a.", "", "", 100), false);
        assert!(cache
            .get("a.", ".", &NameInterval::point("x"), 100)
            .is_none());
        cache.remove_expired(100);
        assert!(cache.is_empty());
    }

    #[test]
    fn eviction_prefers_non_authoritative() {
        let cache = NegativeAssertionCache::new(2);
        assert!(cache.add_zone(zone("a.", 100), true));
        assert!(cache.add_zone(zone("b.", 100), false));
        assert!(cache.add_zone(zone("c.", 100), false));
        assert_eq!(cache.len(), 2);
        assert!(cache
            .get("a.", ".", &NameInterval::point("x"), 50)
            .is_some());
        assert!(cache
            .get("b.", ".", &NameInterval::point("x"), 50)
            .is_none());
    }

    #[test]
    fn window_overlap_query() {
        let cache = NegativeAssertionCache::new(10);
        cache.add_shard(shard("a.", "b", "f", 100), false);
        assert_eq!(
            cache
                .get_overlapping("a.", ".", &NameInterval::point("c"), (50, 150))
                .len(),
            1
        );
        assert!(cache
            .get_overlapping("a.", ".", &NameInterval::point("c"), (150, 200))
            .is_empty());
    }
}
