//! The pending key cache.
//!
//! Sections whose signatures cannot be verified yet because the delegation
//! key of their zone has not arrived are parked here. They are indexed two
//! ways: by the key content they are waiting for, so an identical park does
//! not trigger a second upstream delegation query, and by the token of that
//! upstream query, so the engine can release them the moment the delegation
//! assertion is cached.

use crate::base::signature::SignatureAlgorithm;
use crate::base::token::Token;
use crate::server::conn::SectionMessage;
use parking_lot::Mutex;
use std::collections::HashMap;

//------------ KeyContent ----------------------------------------------------

/// What a parked section is waiting for.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct KeyContent {
    /// The namespace context of the missing key.
    pub context: String,

    /// The zone the missing key is delegated to.
    pub zone: String,

    /// The algorithm of the missing key.
    pub algorithm: SignatureAlgorithm,
}

//------------ PendingKeyCache -----------------------------------------------

/// A bounded cache of sections awaiting delegation keys.
#[derive(Debug)]
pub struct PendingKeyCache {
    /// The synchronized interior.
    inner: Mutex<Inner>,
}

/// The interior of the cache.
#[derive(Debug)]
struct Inner {
    /// Parked sections per awaited key.
    sections: HashMap<KeyContent, Parked>,

    /// Token of the in-flight delegation query per awaited key.
    tokens: HashMap<Token, KeyContent>,

    /// Total number of parked sections.
    len: usize,

    /// Maximum number of parked sections.
    capacity: usize,
}

/// The sections parked for one key.
#[derive(Debug, Default)]
struct Parked {
    /// The parked sections.
    sections: Vec<SectionMessage>,

    /// The token of the delegation query sent upstream, once bound.
    token: Option<Token>,

    /// Second at which the park gives up.
    expires: i64,
}

impl PendingKeyCache {
    /// Creates a cache holding at most `capacity` sections.
    pub fn new(capacity: usize) -> Self {
        PendingKeyCache {
            inner: Mutex::new(Inner {
                sections: HashMap::new(),
                tokens: HashMap::new(),
                len: 0,
                capacity,
            }),
        }
    }

    /// Parks a section awaiting `key`.
    ///
    /// Returns `true` when this is the first park for the key, in which
    /// case the caller must issue the upstream delegation query and bind
    /// its token with [`add_token`][Self::add_token]. Returns `false` both
    /// for follow-up parks and when the cache is full and the section was
    /// dropped.
    pub fn add(
        &self,
        key: KeyContent,
        section: SectionMessage,
        expires: i64,
    ) -> bool {
        let mut inner = self.inner.lock();
        if inner.len >= inner.capacity {
            return false;
        }
        inner.len += 1;
        let parked = inner.sections.entry(key).or_default();
        parked.sections.push(section);
        if expires > parked.expires {
            parked.expires = expires;
        }
        parked.sections.len() == 1
    }

    /// Binds the token of the upstream delegation query for `key`.
    ///
    /// Returns `false` if nothing is parked for the key anymore.
    pub fn add_token(&self, token: Token, expires: i64, key: &KeyContent) -> bool {
        let mut inner = self.inner.lock();
        match inner.sections.get_mut(key) {
            Some(parked) => {
                parked.token = Some(token);
                if expires > parked.expires {
                    parked.expires = expires;
                }
                inner.tokens.insert(token, key.clone());
                true
            }
            None => false,
        }
    }

    /// Returns whether `token` belongs to an in-flight delegation query.
    ///
    /// The inbox uses this to route the response onto the priority queue.
    pub fn contains_token(&self, token: Token) -> bool {
        self.inner.lock().tokens.contains_key(&token)
    }

    /// Releases every section parked under `token`.
    pub fn get_and_remove_by_token(&self, token: Token) -> Vec<SectionMessage> {
        let mut inner = self.inner.lock();
        let key = match inner.tokens.remove(&token) {
            Some(key) => key,
            None => return Vec::new(),
        };
        match inner.sections.remove(&key) {
            Some(parked) => {
                inner.len -= parked.sections.len();
                parked.sections
            }
            None => Vec::new(),
        }
    }

    /// Drops every expired park, returning the dropped sections.
    pub fn remove_expired(&self, now: i64) -> Vec<SectionMessage> {
        let mut inner = self.inner.lock();
        let expired: Vec<KeyContent> = inner
            .sections
            .iter()
            .filter(|(_, parked)| parked.expires <= now)
            .map(|(key, _)| key.clone())
            .collect();
        let mut dropped = Vec::new();
        for key in expired {
            if let Some(parked) = inner.sections.remove(&key) {
                inner.len -= parked.sections.len();
                if let Some(token) = parked.token {
                    inner.tokens.remove(&token);
                }
                dropped.extend(parked.sections);
            }
        }
        dropped
    }

    /// The number of sections currently parked.
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
    use crate::base::object::Object;
    use crate::base::section::{Assertion, Section};
    use crate::server::conn::ConnInfo;
    use std::sync::Arc;

    fn key() -> KeyContent {
        KeyContent {
            context: ".".into(),
            zone: "a.".into(),
            algorithm: SignatureAlgorithm::Ed25519,
        }
    }

    fn message() -> SectionMessage {
        SectionMessage {
            sender: ConnInfo::tcp(([127, 0, 0, 1], 4000).into()),
            section: Section::Assertion(Arc::new(Assertion {
                subject_name: "foo".into(),
                subject_zone: "a.".into(),
                context: ".".into(),
                content: vec![Object::Registrant("r".into())],
                signatures: Vec::new(),
            })),
            token: Token::new(),
        }
    }

    #[test]
    fn first_park_is_new() {
        let cache = PendingKeyCache::new(10);
        assert!(cache.add(key(), message(), 100));
        assert!(!cache.add(key(), message(), 100));
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn token_release_drains_all() {
        let cache = PendingKeyCache::new(10);
        cache.add(key(), message(), 100);
        cache.add(key(), message(), 100);
        let token = Token::new();
        assert!(cache.add_token(token, 100, &key()));
        assert!(cache.contains_token(token));
        let released = cache.get_and_remove_by_token(token);
        assert_eq!(released.len(), 2);
        assert!(cache.is_empty());
        assert!(!cache.contains_token(token));
        assert!(cache.get_and_remove_by_token(token).is_empty());
    }

    #[test]
    fn token_for_unknown_key_fails() {
        let cache = PendingKeyCache::new(10);
        assert!(!cache.add_token(Token::new(), 100, &key()));
    }

    #[test]
    fn expiry_drops_parks() {
        let cache = PendingKeyCache::new(10);
        cache.add(key(), message(), 100);
        let token = Token::new();
        cache.add_token(token, 100, &key());
        let dropped = cache.remove_expired(100);
        assert_eq!(dropped.len(), 1);
        assert!(cache.is_empty());
        assert!(!cache.contains_token(token));
    }

    #[test]
    fn full_cache_rejects() {
        let cache = PendingKeyCache::new(1);
        assert!(cache.add(key(), message(), 100));
        assert!(!cache.add(key(), message(), 100));
        assert_eq!(cache.len(), 1);
    }
}
