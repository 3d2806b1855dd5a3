//! The assertion cache.
//!
//! Positive records, keyed by context, zone, subject name, and object type.
//! An assertion carrying several object types is indexed under each of them.
//! The key space is ordered so that a whole zone can be scanned in name
//! order, which the consistency checker uses to compare cached material
//! against freshly arrived shards.

use crate::base::name;
use crate::base::object::ObjectType;
use crate::base::section::{Assertion, Signed};
use lru::LruCache;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::ops::Bound;
use std::sync::Arc;

//------------ AssertionCache ------------------------------------------------

/// A bounded cache of assertions.
pub struct AssertionCache {
    /// The synchronized interior.
    inner: Mutex<Inner>,
}

/// The interior of the cache.
struct Inner {
    /// All entries, ordered by key for range scans.
    entries: BTreeMap<Key, Vec<Entry>>,

    /// Recency of keys that hold at least one evictable entry.
    lru: LruCache<Key, ()>,

    /// Total number of entries across all keys.
    len: usize,

    /// Maximum number of entries before eviction starts.
    capacity: usize,
}

/// The primary key of the cache.
#[derive(Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
struct Key {
    /// The namespace context.
    context: String,

    /// The zone the name lives in.
    zone: String,

    /// The subject name within the zone.
    name: String,

    /// The indexed object type.
    object_type: ObjectType,
}

/// One cached assertion under one key.
#[derive(Clone, Debug)]
struct Entry {
    /// The assertion itself.
    assertion: Arc<Assertion>,

    /// First second of validity.
    valid_since: i64,

    /// Last second of validity.
    valid_until: i64,

    /// Whether the entry was issued by this server.
    authoritative: bool,
}

impl AssertionCache {
    /// Creates a cache holding at most `capacity` entries.
    pub fn new(capacity: usize) -> Self {
        AssertionCache {
            inner: Mutex::new(Inner {
                entries: BTreeMap::new(),
                lru: LruCache::unbounded(),
                len: 0,
                capacity,
            }),
        }
    }

    /// Adds an assertion under each object type it carries.
    ///
    /// When a key already holds the same assertion, the one with the later
    /// `valid_until` survives; on a tie the new one wins. Returns `false`
    /// when the cache is over capacity and nothing was evictable, in which
    /// case the caller should log that the cache is degraded.
    pub fn add(&self, assertion: Arc<Assertion>, authoritative: bool) -> bool {
        let valid_since = assertion.valid_since();
        let valid_until = assertion.valid_until();
        let mut types: Vec<_> = assertion
            .content
            .iter()
            .map(|obj| obj.object_type())
            .collect();
        types.sort_unstable();
        types.dedup();

        let mut inner = self.inner.lock();
        for object_type in types {
            let key = Key {
                context: assertion.context.clone(),
                zone: assertion.subject_zone.clone(),
                name: assertion.subject_name.clone(),
                object_type,
            };
            inner.insert(key, &assertion, valid_since, valid_until, authoritative);
        }
        inner.evict_to_capacity()
    }

    /// Returns all non-expired assertions for a name and object type.
    ///
    /// The name must be fully qualified; it is split into subject and zone
    /// internally. With `any_context` the context argument is ignored and
    /// matches from every context are returned, which the transitive-closure
    /// walker relies on.
    pub fn get(
        &self,
        fqdn: &str,
        context: &str,
        object_type: ObjectType,
        any_context: bool,
        now: i64,
    ) -> Option<Vec<Arc<Assertion>>> {
        let (subject, zone) = name::split_subject_zone(fqdn).ok()?;
        let mut inner = self.inner.lock();
        let mut result = Vec::new();
        if any_context {
            let keys: Vec<Key> = inner
                .entries
                .keys()
                .filter(|key| {
                    key.zone == zone
                        && key.name == subject
                        && key.object_type == object_type
                })
                .cloned()
                .collect();
            for key in keys {
                inner.collect_valid(&key, now, &mut result);
            }
        } else {
            let key = Key {
                context: context.into(),
                zone: zone.into(),
                name: subject.into(),
                object_type,
            };
            inner.collect_valid(&key, now, &mut result);
        }
        if result.is_empty() {
            None
        } else {
            Some(result)
        }
    }

    /// Returns all non-expired assertions of a zone within `[from, to]`,
    /// ordered by name. Open bounds extend to the zone's ends.
    pub fn get_in_range(
        &self,
        context: &str,
        zone: &str,
        from: Option<&str>,
        to: Option<&str>,
        now: i64,
    ) -> Vec<Arc<Assertion>> {
        self.scan(context, zone, from, |key, entry| {
            if let Some(to) = to {
                if key.name.as_str() > to {
                    return Scan::Stop;
                }
            }
            if entry.valid_until > now {
                Scan::Take
            } else {
                Scan::Skip
            }
        })
    }

    /// Returns the assertions for an exact subject whose validity window
    /// overlaps `window`, regardless of object type.
    pub fn get_overlapping(
        &self,
        context: &str,
        zone: &str,
        subject: &str,
        window: (i64, i64),
    ) -> Vec<Arc<Assertion>> {
        self.scan(context, zone, Some(subject), |key, entry| {
            if key.name.as_str() > subject {
                Scan::Stop
            } else if overlaps(window, (entry.valid_since, entry.valid_until)) {
                Scan::Take
            } else {
                Scan::Skip
            }
        })
    }

    /// Returns the assertions strictly inside a shard-style range whose
    /// validity window overlaps `window`. Empty bounds are open.
    pub fn get_in_range_overlapping(
        &self,
        context: &str,
        zone: &str,
        range_from: &str,
        range_to: &str,
        window: (i64, i64),
    ) -> Vec<Arc<Assertion>> {
        let from = if range_from.is_empty() {
            None
        } else {
            Some(range_from)
        };
        self.scan(context, zone, from, |key, entry| {
            if !range_to.is_empty() && key.name.as_str() >= range_to {
                return Scan::Stop;
            }
            if !range_from.is_empty() && key.name.as_str() <= range_from {
                return Scan::Skip;
            }
            if overlaps(window, (entry.valid_since, entry.valid_until)) {
                Scan::Take
            } else {
                Scan::Skip
            }
        })
    }

    /// Removes every expired entry.
    pub fn remove_expired(&self, now: i64) {
        let mut inner = self.inner.lock();
        let mut removed = 0;
        let mut empty_keys = Vec::new();
        for (key, entries) in inner.entries.iter_mut() {
            let before = entries.len();
            entries.retain(|entry| entry.valid_until > now);
            removed += before - entries.len();
            if entries.is_empty() {
                empty_keys.push(key.clone());
            }
        }
        inner.len -= removed;
        for key in empty_keys {
            inner.entries.remove(&key);
            inner.lru.pop(&key);
        }
    }

    /// The number of entries currently cached.
    pub fn len(&self) -> usize {
        self.inner.lock().len
    }

    /// Returns whether the cache is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Scans a zone in name order, applying `decide` to every entry.
    fn scan(
        &self,
        context: &str,
        zone: &str,
        from: Option<&str>,
        mut decide: impl FnMut(&Key, &Entry) -> Scan,
    ) -> Vec<Arc<Assertion>> {
        let start = Key {
            context: context.into(),
            zone: zone.into(),
            name: from.unwrap_or_default().into(),
            object_type: ObjectType::MIN,
        };
        let inner = self.inner.lock();
        let mut result = Vec::new();
        let mut seen: Option<Arc<Assertion>> = None;
        'keys: for (key, entries) in inner
            .entries
            .range((Bound::Included(start), Bound::Unbounded))
        {
            if key.context != context || key.zone != zone {
                break;
            }
            for entry in entries {
                match decide(key, entry) {
                    Scan::Take => {
                        // The same assertion is indexed once per object
                        // type; adjacent keys repeat it.
                        if seen
                            .as_ref()
                            .map_or(true, |prev| !Arc::ptr_eq(prev, &entry.assertion))
                            && !result
                                .iter()
                                .any(|got| Arc::ptr_eq(got, &entry.assertion))
                        {
                            result.push(entry.assertion.clone());
                        }
                        seen = Some(entry.assertion.clone());
                    }
                    Scan::Skip => {}
                    Scan::Stop => break 'keys,
                }
            }
        }
        result
    }
}

/// Decision of a scan callback for one entry.
enum Scan {
    /// Keep the entry in the result.
    Take,

    /// Ignore the entry.
    Skip,

    /// Past the interesting range, stop scanning.
    Stop,
}

/// Returns whether two closed validity windows overlap.
fn overlaps(a: (i64, i64), b: (i64, i64)) -> bool {
    a.0 <= b.1 && b.0 <= a.1
}

impl Inner {
    /// Inserts one entry, applying the same-assertion tie-break.
    fn insert(
        &mut self,
        key: Key,
        assertion: &Arc<Assertion>,
        valid_since: i64,
        valid_until: i64,
        authoritative: bool,
    ) {
        let entry = Entry {
            assertion: assertion.clone(),
            valid_since,
            valid_until,
            authoritative,
        };
        let entries = self.entries.entry(key.clone()).or_default();
        let same = entries.iter_mut().find(|existing| {
            existing.assertion.subject_name == assertion.subject_name
                && existing.assertion.subject_zone == assertion.subject_zone
                && existing.assertion.context == assertion.context
                && existing.assertion.content == assertion.content
        });
        match same {
            Some(existing) => {
                if valid_until >= existing.valid_until {
                    *existing = entry;
                }
            }
            None => {
                entries.push(entry);
                self.len += 1;
            }
        }
        if !authoritative {
            self.lru.put(key, ());
        }
    }

    /// Evicts least-recently-used evictable keys until within capacity.
    ///
    /// Returns `false` when the cache stays over capacity because only
    /// authoritative entries remain.
    fn evict_to_capacity(&mut self) -> bool {
        while self.len > self.capacity {
            let key = match self.lru.pop_lru() {
                Some((key, ())) => key,
                None => return false,
            };
            if let Some(entries) = self.entries.get_mut(&key) {
                let before = entries.len();
                entries.retain(|entry| entry.authoritative);
                self.len -= before - entries.len();
                if entries.is_empty() {
                    self.entries.remove(&key);
                }
            }
        }
        true
    }

    /// Pushes the valid entries of a key into `result`.
    fn collect_valid(
        &mut self,
        key: &Key,
        now: i64,
        result: &mut Vec<Arc<Assertion>>,
    ) {
        if let Some(entries) = self.entries.get(key) {
            for entry in entries {
                if entry.valid_until > now {
                    result.push(entry.assertion.clone());
                }
            }
            self.lru.promote(key);
        }
    }
}

//============ Tests =========================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::base::object::Object;
    use crate::base::signature::{KeySpace, Signature, SignatureAlgorithm};
    use bytes::Bytes;
    use std::net::Ipv4Addr;

    fn assertion(
        subject: &str,
        zone: &str,
        valid_until: i64,
    ) -> Arc<Assertion> {
        Arc::new(Assertion {
            subject_name: subject.into(),
            subject_zone: zone.into(),
            context: ".".into(),
            content: vec![Object::Ip4(Ipv4Addr::new(1, 2, 3, 4))],
            signatures: vec![Signature {
                key_space: KeySpace::Rains,
                algorithm: SignatureAlgorithm::Ed25519,
                key_phase: 0,
                valid_since: 0,
                valid_until,
                data: Bytes::new(),
            }],
        })
    }

    #[test]
    fn get_by_fqdn() {
        let cache = AssertionCache::new(10);
        assert!(cache.add(assertion("foo", "a.", 100), false));
        let got = cache
            .get("foo.a.", ".", ObjectType::Ip4, false, 50)
            .unwrap();
        assert_eq!(got.len(), 1);
        assert_eq!(got[0].subject_name, "foo");
    }

    #[test]
    fn expired_entries_are_invisible() {
        let cache = AssertionCache::new(10);
        cache.add(assertion("foo", "a.", 100), false);
        assert!(cache
            .get("foo.a.", ".", ObjectType::Ip4, false, 100)
            .is_none());
        cache.remove_expired(100);
        assert!(cache.is_empty());
    }

    #[test]
    fn wrong_context_misses_unless_any() {
        let cache = AssertionCache::new(10);
        cache.add(assertion("foo", "a.", 100), false);
        assert!(cache
            .get("foo.a.", "ctx.", ObjectType::Ip4, false, 50)
            .is_none());
        assert!(cache
            .get("foo.a.", "ctx.", ObjectType::Ip4, true, 50)
            .is_some());
    }

    #[test]
    fn later_validity_wins_on_collision() {
        let cache = AssertionCache::new(10);
        cache.add(assertion("foo", "a.", 100), false);
        cache.add(assertion("foo", "a.", 200), false);
        assert_eq!(cache.len(), 1);
        let got = cache
            .get("foo.a.", ".", ObjectType::Ip4, false, 150)
            .unwrap();
        assert_eq!(got.len(), 1);
        // The earlier one must not resurface.
        cache.add(assertion("foo", "a.", 100), false);
        assert!(cache
            .get("foo.a.", ".", ObjectType::Ip4, false, 150)
            .is_some());
    }

    #[test]
    fn lru_eviction_spares_authoritative() {
        let cache = AssertionCache::new(3);
        assert!(cache.add(assertion("auth", "a.", 100), true));
        assert!(cache.add(assertion("one", "a.", 100), false));
        assert!(cache.add(assertion("two", "a.", 100), false));
        // Reading "one" makes "two" the least recently used victim.
        cache.get("one.a.", ".", ObjectType::Ip4, false, 50);
        assert!(cache.add(assertion("three", "a.", 100), false));
        assert_eq!(cache.len(), 3);
        assert!(cache
            .get("auth.a.", ".", ObjectType::Ip4, false, 50)
            .is_some());
        assert!(cache
            .get("one.a.", ".", ObjectType::Ip4, false, 50)
            .is_some());
        assert!(cache
            .get("three.a.", ".", ObjectType::Ip4, false, 50)
            .is_some());
        assert!(cache
            .get("two.a.", ".", ObjectType::Ip4, false, 50)
            .is_none());
    }

    #[test]
    fn full_of_authoritative_reports_degraded() {
        let cache = AssertionCache::new(1);
        assert!(cache.add(assertion("one", "a.", 100), true));
        assert!(!cache.add(assertion("two", "a.", 100), true));
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn range_scan_is_ordered() {
        let cache = AssertionCache::new(10);
        for subject in ["c", "a", "e", "b"] {
            cache.add(assertion(subject, "z.", 100), false);
        }
        let got = cache.get_in_range(".", "z.", Some("b"), Some("d"), 50);
        let names: Vec<_> =
            got.iter().map(|a| a.subject_name.as_str()).collect();
        assert_eq!(names, ["b", "c"]);
    }

    #[test]
    fn overlapping_window_queries() {
        let cache = AssertionCache::new(10);
        cache.add(assertion("foo", "a.", 100), false);
        assert_eq!(cache.get_overlapping(".", "a.", "foo", (50, 150)).len(), 1);
        assert!(cache.get_overlapping(".", "a.", "foo", (150, 200)).is_empty());
        assert_eq!(
            cache
                .get_in_range_overlapping(".", "a.", "e", "g", (0, 50))
                .len(),
            1
        );
        assert!(cache
            .get_in_range_overlapping(".", "a.", "foo", "g", (0, 50))
            .is_empty());
    }
}
