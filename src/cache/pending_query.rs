//! The pending query cache.
//!
//! Queries the engine could not answer from cache are parked here while an
//! upstream lookup is in flight. Entries are indexed by their *content
//! key* — what is being asked — so a second querier asking the same thing
//! attaches to the existing entry instead of triggering another upstream
//! query, and by the token of the upstream query, so an arriving response
//! finds its waiters.
//!
//! Every transition happens under one mutex, which linearizes the token
//! lineage of an entry: an answer racing [`add_token`][PendingQueryCache::add_token]
//! is observed as a `false` return there, and a token drained once by
//! [`get_and_remove_by_token`][PendingQueryCache::get_and_remove_by_token]
//! stays drained.

use crate::base::query::QuerySection;
use crate::base::object::ObjectType;
use crate::base::section::Section;
use crate::base::token::Token;
use crate::server::conn::ConnInfo;
use parking_lot::Mutex;
use std::collections::HashMap;

//------------ ContentKey ----------------------------------------------------

/// What a pending entry is asking about.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct ContentKey {
    /// The queried subject: a name, or the text form of a prefix.
    pub subject: String,

    /// The namespace context.
    pub context: String,

    /// The queried object types, sorted.
    pub types: Vec<ObjectType>,
}

impl ContentKey {
    /// Creates the content key of a query.
    pub fn of(query: &QuerySection) -> Self {
        let mut types = query.types().to_vec();
        types.sort_unstable();
        ContentKey {
            subject: query.subject(),
            context: query.context().into(),
            types,
        }
    }
}

//------------ StoredQuery ---------------------------------------------------

/// One parked querier.
#[derive(Clone, Debug)]
pub struct StoredQuery {
    /// Who asked.
    pub sender: ConnInfo,

    /// The token the querier used; answers go back under it.
    pub token: Token,

    /// The query itself.
    pub query: QuerySection,
}

//------------ PendingQueryCache ---------------------------------------------

/// A bounded cache of queries awaiting upstream answers.
#[derive(Debug)]
pub struct PendingQueryCache {
    /// The synchronized interior.
    inner: Mutex<Inner>,
}

/// The interior of the cache.
#[derive(Debug)]
struct Inner {
    /// Entries by what they ask.
    entries: HashMap<ContentKey, Entry>,

    /// Upstream token to content key.
    tokens: HashMap<Token, ContentKey>,

    /// Total number of parked queriers.
    len: usize,

    /// Maximum number of parked queriers.
    capacity: usize,
}

/// One pending entry.
#[derive(Debug)]
struct Entry {
    /// The queriers waiting for the answer.
    queriers: Vec<StoredQuery>,

    /// The token of the upstream query, once bound.
    token: Option<Token>,

    /// Where the upstream query went, once bound.
    upstream: Option<ConnInfo>,

    /// Second at which the entry gives up.
    expires: i64,

    /// Answers buffered for the coalescing window, in arrival order.
    answers: Vec<Section>,

    /// Coalescing deadline of the buffered answers, unix milliseconds.
    answer_deadline: i64,
}

impl PendingQueryCache {
    /// Creates a cache holding at most `capacity` queriers.
    pub fn new(capacity: usize) -> Self {
        PendingQueryCache {
            inner: Mutex::new(Inner {
                entries: HashMap::new(),
                tokens: HashMap::new(),
                len: 0,
                capacity,
            }),
        }
    }

    /// Parks a querier.
    ///
    /// The first return is `true` when no in-flight request for the same
    /// content existed, in which case the caller must forward the query
    /// upstream and bind the forward token with
    /// [`add_token`][Self::add_token]. The second return carries queriers
    /// evicted to make room; the caller owes each of them a
    /// `NoAssertionAvail`.
    pub fn add(&self, query: StoredQuery) -> (bool, Vec<StoredQuery>) {
        let key = ContentKey::of(&query.query);
        let expiration = query.query.expiration();
        let mut inner = self.inner.lock();
        let mut evicted = Vec::new();
        if inner.len >= inner.capacity && !inner.entries.contains_key(&key) {
            // Make room by dropping the entry closest to giving up anyway.
            let victim = inner
                .entries
                .iter()
                .min_by_key(|(_, entry)| entry.expires)
                .map(|(key, _)| key.clone());
            if let Some(victim) = victim {
                if let Some(entry) = inner.entries.remove(&victim) {
                    if let Some(token) = entry.token {
                        inner.tokens.remove(&token);
                    }
                    inner.len -= entry.queriers.len();
                    evicted = entry.queriers;
                }
            }
        }
        let entry = inner.entries.entry(key).or_insert_with(|| Entry {
            queriers: Vec::new(),
            token: None,
            upstream: None,
            expires: expiration,
            answers: Vec::new(),
            answer_deadline: 0,
        });
        let is_new = entry.queriers.is_empty();
        if expiration > entry.expires {
            entry.expires = expiration;
        }
        entry.queriers.push(query);
        inner.len += 1;
        (is_new, evicted)
    }

    /// Binds the upstream token of the entry asking `key`.
    ///
    /// Returns `false` when the entry no longer exists because the answer
    /// already arrived and was drained; the caller must not send the
    /// upstream query in that case.
    pub fn add_token(
        &self,
        token: Token,
        expires: i64,
        upstream: &ConnInfo,
        key: &ContentKey,
    ) -> bool {
        let mut inner = self.inner.lock();
        match inner.entries.get_mut(key) {
            Some(entry) => {
                entry.token = Some(token);
                entry.upstream = Some(*upstream);
                entry.expires = expires;
                inner.tokens.insert(token, key.clone());
                true
            }
            None => false,
        }
    }

    /// Atomically replaces the upstream token of an entry on redirection.
    ///
    /// Returns `false` when `old` is not bound anymore, meaning the entry
    /// was answered or expired in the meantime.
    pub fn update_token(&self, old: Token, new: Token) -> bool {
        let mut inner = self.inner.lock();
        let key = match inner.tokens.remove(&old) {
            Some(key) => key,
            None => return false,
        };
        match inner.entries.get_mut(&key) {
            Some(entry) => {
                entry.token = Some(new);
                inner.tokens.insert(new, key);
                true
            }
            None => false,
        }
    }

    /// Returns the upstream the entry bound to `token` was forwarded to.
    pub fn upstream_of(&self, token: Token) -> Option<ConnInfo> {
        let inner = self.inner.lock();
        let key = inner.tokens.get(&token)?;
        inner.entries.get(key).and_then(|entry| entry.upstream)
    }

    /// Returns the query of the entry bound to `token`.
    pub fn get_query(&self, token: Token) -> Option<QuerySection> {
        let inner = self.inner.lock();
        let key = inner.tokens.get(&token)?;
        inner
            .entries
            .get(key)
            .and_then(|entry| entry.queriers.first())
            .map(|stored| stored.query.clone())
    }

    /// Buffers an answer for the entry bound to `token`.
    ///
    /// `deadline` is the end of the coalescing window in unix milliseconds;
    /// the latest deadline of any buffered answer wins.
    pub fn add_answer_by_token(
        &self,
        section: Section,
        token: Token,
        deadline: i64,
    ) {
        let mut inner = self.inner.lock();
        let key = match inner.tokens.get(&token) {
            Some(key) => key.clone(),
            None => return,
        };
        if let Some(entry) = inner.entries.get_mut(&key) {
            entry.answers.push(section);
            if deadline > entry.answer_deadline {
                entry.answer_deadline = deadline;
            }
        }
    }

    /// Drains the entry bound to `token`.
    ///
    /// With a non-zero `min_deadline` the entry is only drained when its
    /// buffered answers' deadline has reached it, so concurrent coalescing
    /// waiters do not steal each other's drain. Draining removes the token
    /// binding; a second call for the same token returns nothing.
    pub fn get_and_remove_by_token(
        &self,
        token: Token,
        min_deadline: i64,
    ) -> (Vec<StoredQuery>, Vec<Section>) {
        let mut inner = self.inner.lock();
        let key = match inner.tokens.get(&token) {
            Some(key) => key.clone(),
            None => return (Vec::new(), Vec::new()),
        };
        if min_deadline != 0 {
            match inner.entries.get(&key) {
                Some(entry) if entry.answer_deadline >= min_deadline => {}
                _ => return (Vec::new(), Vec::new()),
            }
        }
        inner.tokens.remove(&token);
        match inner.entries.remove(&key) {
            Some(entry) => {
                inner.len -= entry.queriers.len();
                (entry.queriers, entry.answers)
            }
            None => (Vec::new(), Vec::new()),
        }
    }

    /// Drops every expired entry, returning the queriers that now must be
    /// told `NoAssertionAvail`.
    pub fn remove_expired(&self, now: i64) -> Vec<StoredQuery> {
        let mut inner = self.inner.lock();
        let expired: Vec<ContentKey> = inner
            .entries
            .iter()
            .filter(|(_, entry)| entry.expires <= now)
            .map(|(key, _)| key.clone())
            .collect();
        let mut dropped = Vec::new();
        for key in expired {
            if let Some(entry) = inner.entries.remove(&key) {
                if let Some(token) = entry.token {
                    inner.tokens.remove(&token);
                }
                inner.len -= entry.queriers.len();
                dropped.extend(entry.queriers);
            }
        }
        dropped
    }

    /// The number of queriers currently parked.
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
    use crate::base::query::{Query, QueryOpts};
    use crate::base::section::Assertion;
    use std::sync::Arc;

    fn stored(name: &str, expiration: i64) -> StoredQuery {
        StoredQuery {
            sender: ConnInfo::tcp(([127, 0, 0, 1], 4000).into()),
            token: Token::new(),
            query: QuerySection::Name(Arc::new(Query {
                name: name.into(),
                context: ".".into(),
                types: vec![ObjectType::Ip4],
                options: QueryOpts::new(),
                expiration,
            })),
        }
    }

    fn answer() -> Section {
        Section::Assertion(Arc::new(Assertion {
            subject_name: "foo".into(),
            subject_zone: "a.".into(),
            context: ".".into(),
            content: vec![Object::Registrant("r".into())],
            signatures: Vec::new(),
        }))
    }

    #[test]
    fn identical_requests_attach() {
        let cache = PendingQueryCache::new(10);
        let (is_new, evicted) = cache.add(stored("foo.a.", 100));
        assert!(is_new);
        assert!(evicted.is_empty());
        let (is_new, _) = cache.add(stored("foo.a.", 100));
        assert!(!is_new);
        let (is_new, _) = cache.add(stored("bar.a.", 100));
        assert!(is_new);
        assert_eq!(cache.len(), 3);
    }

    #[test]
    fn token_binds_and_drains_once() {
        let cache = PendingQueryCache::new(10);
        let query = stored("foo.a.", 100);
        let key = ContentKey::of(&query.query);
        cache.add(query);
        let token = Token::new();
        let upstream = ConnInfo::tcp(([192, 0, 2, 1], 5022).into());
        assert!(cache.add_token(token, 100, &upstream, &key));
        assert!(cache.get_query(token).is_some());
        cache.add_answer_by_token(answer(), token, 10);
        let (queriers, answers) = cache.get_and_remove_by_token(token, 0);
        assert_eq!(queriers.len(), 1);
        assert_eq!(answers.len(), 1);
        // Idempotent drain.
        let (queriers, answers) = cache.get_and_remove_by_token(token, 0);
        assert!(queriers.is_empty());
        assert!(answers.is_empty());
        assert!(cache.get_query(token).is_none());
    }

    #[test]
    fn add_token_observes_settled_entry() {
        let cache = PendingQueryCache::new(10);
        let query = stored("foo.a.", 100);
        let key = ContentKey::of(&query.query);
        let upstream = ConnInfo::tcp(([192, 0, 2, 1], 5022).into());
        assert!(!cache.add_token(Token::new(), 100, &upstream, &key));
        cache.add(query);
        let token = Token::new();
        assert!(cache.add_token(token, 100, &upstream, &key));
        cache.get_and_remove_by_token(token, 0);
        assert!(!cache.add_token(Token::new(), 100, &upstream, &key));
    }

    #[test]
    fn update_token_rebinds_lineage() {
        let cache = PendingQueryCache::new(10);
        let query = stored("foo.a.", 100);
        let key = ContentKey::of(&query.query);
        cache.add(query);
        let upstream = ConnInfo::tcp(([192, 0, 2, 1], 5022).into());
        let old = Token::new();
        let new = Token::new();
        cache.add_token(old, 100, &upstream, &key);
        assert!(cache.update_token(old, new));
        assert!(cache.get_query(old).is_none());
        assert!(cache.get_query(new).is_some());
        // A settled token cannot be rebound.
        cache.get_and_remove_by_token(new, 0);
        assert!(!cache.update_token(new, Token::new()));
    }

    #[test]
    fn coalescing_deadline_gates_drain() {
        let cache = PendingQueryCache::new(10);
        let query = stored("foo.a.", 100);
        let key = ContentKey::of(&query.query);
        cache.add(query);
        let token = Token::new();
        let upstream = ConnInfo::tcp(([192, 0, 2, 1], 5022).into());
        cache.add_token(token, 100, &upstream, &key);
        cache.add_answer_by_token(answer(), token, 1000);
        // A waiter whose window ends later must not drain yet.
        let (queriers, _) = cache.get_and_remove_by_token(token, 2000);
        assert!(queriers.is_empty());
        let (queriers, answers) = cache.get_and_remove_by_token(token, 1000);
        assert_eq!(queriers.len(), 1);
        assert_eq!(answers.len(), 1);
    }

    #[test]
    fn expiry_notifies_queriers() {
        let cache = PendingQueryCache::new(10);
        cache.add(stored("foo.a.", 100));
        cache.add(stored("foo.a.", 100));
        let dropped = cache.remove_expired(100);
        assert_eq!(dropped.len(), 2);
        assert!(cache.is_empty());
    }

    #[test]
    fn full_cache_evicts_earliest_expiring() {
        let cache = PendingQueryCache::new(1);
        cache.add(stored("foo.a.", 50));
        let (is_new, evicted) = cache.add(stored("bar.a.", 100));
        assert!(is_new);
        assert_eq!(evicted.len(), 1);
        assert_eq!(cache.len(), 1);
    }
}
