//! The redirect cache.
//!
//! Maps a delegated name to the connection endpoints resolution for that
//! name can continue at. Entries expire individually. The cache itself only
//! matches exact names; walking from a name towards the root is the
//! caller's business, see [`name::ancestors`][crate::base::name::ancestors].

use crate::server::conn::ConnInfo;
use lru::LruCache;
use parking_lot::Mutex;
use std::collections::HashMap;

//------------ RedirectCache -------------------------------------------------

/// A bounded cache of redirect endpoints.
pub struct RedirectCache {
    /// The synchronized interior.
    inner: Mutex<Inner>,
}

/// The interior of the cache.
struct Inner {
    /// Endpoints per name.
    names: HashMap<String, Vec<Entry>>,

    /// Recency of names.
    lru: LruCache<String, ()>,

    /// Total number of endpoints.
    len: usize,

    /// Maximum number of endpoints.
    capacity: usize,
}

/// One cached endpoint.
#[derive(Clone, Debug)]
struct Entry {
    /// The endpoint itself.
    conn: ConnInfo,

    /// Last second the endpoint may be used.
    expiration: i64,
}

impl RedirectCache {
    /// Creates a cache holding at most `capacity` endpoints.
    pub fn new(capacity: usize) -> Self {
        RedirectCache {
            inner: Mutex::new(Inner {
                names: HashMap::new(),
                lru: LruCache::unbounded(),
                len: 0,
                capacity,
            }),
        }
    }

    /// Adds an endpoint for a name. Returns `false` when the cache is full
    /// and nothing could be evicted.
    pub fn add_conn_info(
        &self,
        name: &str,
        conn: ConnInfo,
        expiration: i64,
    ) -> bool {
        let mut inner = self.inner.lock();
        let mut inserted = false;
        {
            let entries = inner.names.entry(name.into()).or_default();
            match entries.iter_mut().find(|entry| entry.conn == conn) {
                Some(entry) => {
                    if expiration > entry.expiration {
                        entry.expiration = expiration;
                    }
                }
                None => {
                    entries.push(Entry { conn, expiration });
                    inserted = true;
                }
            }
        }
        if inserted {
            inner.len += 1;
        }
        inner.lru.put(name.into(), ());
        while inner.len > inner.capacity {
            let victim = match inner.lru.pop_lru() {
                Some((victim, ())) => victim,
                None => return false,
            };
            if let Some(entries) = inner.names.remove(&victim) {
                inner.len -= entries.len();
            }
        }
        true
    }

    /// Returns the unexpired endpoints stored for exactly `name`.
    pub fn get_conns_info(&self, name: &str, now: i64) -> Vec<ConnInfo> {
        let mut inner = self.inner.lock();
        let conns: Vec<ConnInfo> = match inner.names.get(name) {
            Some(entries) => entries
                .iter()
                .filter(|entry| entry.expiration > now)
                .map(|entry| entry.conn)
                .collect(),
            None => Vec::new(),
        };
        if !conns.is_empty() {
            inner.lru.promote(name);
        }
        conns
    }

    /// Removes every expired endpoint.
    pub fn remove_expired(&self, now: i64) {
        let mut inner = self.inner.lock();
        let mut removed = 0;
        let mut empty_names = Vec::new();
        for (name, entries) in inner.names.iter_mut() {
            let before = entries.len();
            entries.retain(|entry| entry.expiration > now);
            removed += before - entries.len();
            if entries.is_empty() {
                empty_names.push(name.clone());
            }
        }
        inner.len -= removed;
        for name in empty_names {
            inner.names.remove(&name);
            inner.lru.pop(&name);
        }
    }

    /// The number of endpoints currently cached.
    pub fn len(&self) -> usize {
        self.inner.lock().len
    }

    /// Returns whether the cache is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

//============ Tests =========================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn conn(port: u16) -> ConnInfo {
        ConnInfo::tcp(([10, 0, 0, 1], port).into())
    }

    #[test]
    fn exact_name_lookup() {
        let cache = RedirectCache::new(10);
        assert!(cache.add_conn_info("a.", conn(5022), 100));
        assert_eq!(cache.get_conns_info("a.", 50), vec![conn(5022)]);
        assert!(cache.get_conns_info("b.", 50).is_empty());
        assert!(cache.get_conns_info("x.a.", 50).is_empty());
    }

    #[test]
    fn expired_endpoints_are_hidden() {
        let cache = RedirectCache::new(10);
        cache.add_conn_info("a.", conn(5022), 100);
        assert!(cache.get_conns_info("a.", 100).is_empty());
        cache.remove_expired(100);
        assert!(cache.is_empty());
    }

    #[test]
    fn duplicate_endpoint_extends_expiry() {
        let cache = RedirectCache::new(10);
        cache.add_conn_info("a.", conn(5022), 100);
        cache.add_conn_info("a.", conn(5022), 200);
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.get_conns_info("a.", 150), vec![conn(5022)]);
    }

    #[test]
    fn full_cache_evicts_least_recent_name() {
        let cache = RedirectCache::new(2);
        cache.add_conn_info("a.", conn(1), 100);
        cache.add_conn_info("b.", conn(2), 100);
        cache.get_conns_info("a.", 50);
        cache.add_conn_info("c.", conn(3), 100);
        assert!(cache.get_conns_info("b.", 50).is_empty());
        assert!(!cache.get_conns_info("a.", 50).is_empty());
        assert!(!cache.get_conns_info("c.", 50).is_empty());
    }
}
