//! The engine.
//!
//! The engine owns the caches and drives the protocol state machine over
//! them. Sections whose signatures have been verified enter through
//! [`assert`][Engine::assert]; queries enter through
//! [`query`][Engine::query]. Both run on inbox worker tasks and are
//! re-entrant: all shared state lives in the internally synchronized caches.
//!
//! Answers leave through the injected [`Switchboard`] port. The engine never
//! returns errors to its callers; whatever goes wrong is either answered on
//! the wire as a notification or logged and dropped.

pub mod consistency;

use crate::base::name;
use crate::base::name::NameInterval;
use crate::base::notification::NotificationCode;
use crate::base::object::{Object, ObjectType};
use crate::base::query::{AddressQuery, Query, QueryOpt, QueryOpts, QuerySection};
use crate::base::section::{
    AddressAssertion, AddressZone, Assertion, MsgSection, Section, Shard,
    Signed, Zone, ZoneContent,
};
use crate::base::token::Token;
use crate::cache::{
    AddressCache, AssertionCache, ContentKey, NegSection,
    NegativeAssertionCache, PendingKeyCache, PendingQueryCache,
    RedirectCache, StoredQuery, ZoneKeyCache,
};
use crate::server::config::Config;
use crate::server::conn::{
    ConnInfo, NotificationMessage, QueryMessage, SectionMessage, Switchboard,
};
use crate::server::inbox::Event;
use crate::server::monitor::{Clock, ResourceMonitor};
use std::collections::{HashSet, VecDeque};
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, error, info, trace, warn};

/// How long assertion answers are buffered to coalesce bursts.
const ANSWER_COALESCE_MILLIS: u64 = 10;

/// The port a redirect target learned from a bare address listens on.
const REDIRECT_PORT: u16 = 5022;

//------------ Caches --------------------------------------------------------

/// The caches of one engine.
///
/// Everything is process-local; a restart starts cold. Caches reference each
/// other's content only through keys, never through pointers, so delegation
/// chains cannot create reference cycles between them.
pub struct Caches {
    /// Positive assertions.
    pub assertions: AssertionCache,

    /// Shards and zones, the negative evidence.
    pub negatives: NegativeAssertionCache,

    /// Public keys of delegated zones.
    pub zone_keys: ZoneKeyCache,

    /// Address assertions and zones.
    pub addresses: AddressCache,

    /// Endpoints of delegated names.
    pub redirects: RedirectCache,

    /// Sections parked for a missing delegation key.
    pub pending_keys: PendingKeyCache,

    /// Queries parked for an upstream answer.
    pub pending_queries: PendingQueryCache,
}

impl Caches {
    /// Creates the caches with the capacities of `config`.
    pub fn new(config: &Config) -> Self {
        Caches {
            assertions: AssertionCache::new(config.assertion_cache_size),
            negatives: NegativeAssertionCache::new(
                config.negative_assertion_cache_size,
            ),
            zone_keys: ZoneKeyCache::new(config.zone_key_cache_size),
            addresses: AddressCache::new(config.address_cache_size),
            redirects: RedirectCache::new(config.redirect_cache_size),
            pending_keys: PendingKeyCache::new(config.pending_key_cache_size),
            pending_queries: PendingQueryCache::new(
                config.pending_query_cache_size,
            ),
        }
    }
}

//------------ Engine --------------------------------------------------------

/// The query-resolution engine of one server.
pub struct Engine<S, C> {
    /// The server configuration.
    config: Arc<Config>,

    /// The time source.
    clock: C,

    /// The outbound port.
    switchboard: Arc<S>,

    /// The caches.
    caches: Arc<Caches>,

    /// The load sampler gating consistency checks.
    monitor: ResourceMonitor,

    /// This server's own connection information, for self-detection.
    server_conn: ConnInfo,

    /// Sender of the normal queue, used to re-enqueue released sections.
    requeue: mpsc::Sender<Event>,
}

impl<S: Switchboard, C: Clock> Engine<S, C> {
    /// Creates an engine over the given collaborators.
    pub fn new(
        config: Arc<Config>,
        clock: C,
        switchboard: Arc<S>,
        monitor: ResourceMonitor,
        caches: Arc<Caches>,
        requeue: mpsc::Sender<Event>,
    ) -> Self {
        let server_conn = config.server_conn();
        Engine {
            config,
            clock,
            switchboard,
            caches,
            monitor,
            server_conn,
            requeue,
        }
    }

    /// The engine's caches, shared with the inbox and tests.
    pub fn caches(&self) -> &Caches {
        &self.caches
    }

    /// The engine's clock.
    pub fn clock(&self) -> &C {
        &self.clock
    }

    //--- assert

    /// Processes a section with verified signatures.
    ///
    /// The caller guarantees that the signatures have been checked and that
    /// at least one of them is currently within its validity window.
    /// `authoritative` marks sections issued by this server itself; they are
    /// exempt from capacity eviction.
    pub async fn assert(&self, message: SectionMessage, authoritative: bool) {
        debug!(token = %message.token, "adding section to cache");
        if section_is_malformed(&message.section) {
            warn!(token = %message.token, "section violates shape invariants");
            self.switchboard.notify(
                &message.sender,
                message.token,
                NotificationCode::BadMessage,
                "",
            );
            return;
        }
        if self.monitor.enough_resources()
            && consistency::section_is_inconsistent(
                &message.section,
                &self.caches,
            )
        {
            warn!(
                token = %message.token,
                "section is inconsistent with cached elements"
            );
            self.switchboard.notify(
                &message.sender,
                message.token,
                NotificationCode::RcvInconsistentMsg,
                "",
            );
            return;
        }
        self.add_section_to_cache(&message.section, authoritative);
        self.pending_keys_callback(&message).await;
        self.pending_queries_callback(&message).await;
    }

    /// Routes a section into the caches it belongs to.
    fn add_section_to_cache(&self, section: &Section, authoritative: bool) {
        match section {
            Section::Assertion(assertion) => {
                self.add_assertion_to_cache(assertion, authoritative);
            }
            Section::Shard(shard) => {
                self.add_shard_to_cache(shard, authoritative);
            }
            Section::Zone(zone) => {
                self.add_zone_to_cache(zone, authoritative);
            }
            Section::AddressAssertion(assertion) => {
                self.add_address_assertion_to_cache(assertion, authoritative);
            }
            Section::AddressZone(zone) => {
                self.add_address_zone_to_cache(zone, authoritative);
            }
        }
    }

    /// Caches an assertion and any delegation keys it carries.
    fn add_assertion_to_cache(
        &self,
        assertion: &Arc<Assertion>,
        authoritative: bool,
    ) {
        if !self.caches.assertions.add(assertion.clone(), authoritative) {
            warn!(
                name = %assertion.fqdn(),
                "assertion cache over capacity, nothing evictable"
            );
        }
        for obj in &assertion.content {
            if let Object::Delegation(public_key) = obj {
                let public_key = public_key.with_validity(
                    assertion.valid_since(),
                    assertion.valid_until(),
                );
                if !self.caches.zone_keys.add(
                    &assertion.context,
                    &assertion.fqdn(),
                    public_key,
                    authoritative,
                ) {
                    warn!(
                        zone = %assertion.fqdn(),
                        "zone key cache nearing capacity"
                    );
                }
            }
        }
    }

    /// Caches a shard and all assertions it contains.
    fn add_shard_to_cache(&self, shard: &Arc<Shard>, authoritative: bool) {
        if !self.caches.negatives.add_shard(shard.clone(), authoritative) {
            warn!(
                zone = %shard.subject_zone,
                "negative assertion cache over capacity, nothing evictable"
            );
        }
        for assertion in &shard.content {
            let assertion = Arc::new(
                assertion.copy_with(&shard.context, &shard.subject_zone),
            );
            self.add_assertion_to_cache(&assertion, authoritative);
        }
    }

    /// Caches a zone and everything it contains.
    fn add_zone_to_cache(&self, zone: &Arc<Zone>, authoritative: bool) {
        if !self.caches.negatives.add_zone(zone.clone(), authoritative) {
            warn!(
                zone = %zone.subject_zone,
                "negative assertion cache over capacity, nothing evictable"
            );
        }
        for content in &zone.content {
            match content {
                ZoneContent::Assertion(assertion) => {
                    let assertion = Arc::new(
                        assertion.copy_with(&zone.context, &zone.subject_zone),
                    );
                    self.add_assertion_to_cache(&assertion, authoritative);
                }
                ZoneContent::Shard(shard) => {
                    let shard = Arc::new(
                        shard.copy_with(&zone.context, &zone.subject_zone),
                    );
                    self.add_shard_to_cache(&shard, authoritative);
                }
            }
        }
    }

    /// Caches an address assertion.
    fn add_address_assertion_to_cache(
        &self,
        assertion: &Arc<AddressAssertion>,
        authoritative: bool,
    ) {
        if !self
            .caches
            .addresses
            .add_assertion(assertion.clone(), authoritative)
        {
            warn!(
                prefix = %assertion.subject_addr,
                "could not cache address assertion"
            );
        }
    }

    /// Caches an address zone and the assertions it contains.
    fn add_address_zone_to_cache(
        &self,
        zone: &Arc<AddressZone>,
        authoritative: bool,
    ) {
        if !self.caches.addresses.add_zone(zone.clone(), authoritative) {
            warn!(prefix = %zone.subject_addr, "could not cache address zone");
        }
        for assertion in &zone.content {
            self.add_address_assertion_to_cache(
                &Arc::new(assertion.clone()),
                authoritative,
            );
        }
    }

    /// Re-enqueues sections that were parked for the key this section
    /// delivered.
    ///
    /// The released sections land on the normal queue again, where the
    /// verifier gets a second chance at them now that the key is cached.
    async fn pending_keys_callback(&self, message: &SectionMessage) {
        let released =
            self.caches.pending_keys.get_and_remove_by_token(message.token);
        for section in released {
            if self.requeue.send(Event::Section(section)).await.is_err() {
                error!("normal queue closed, dropping released section");
            }
        }
    }

    //--- pending query callback

    /// Serves pending queries that this section answers, and follows
    /// delegation glue when iterative lookup is on.
    async fn pending_queries_callback(&self, message: &SectionMessage) {
        let query = self.caches.pending_queries.get_query(message.token);
        if let Some(query) = &query {
            if is_answer_to_query(&message.section, query) {
                match &message.section {
                    Section::Assertion(_) | Section::AddressAssertion(_) => {
                        self.send_assertion_answer(
                            message.section.clone(),
                            message.token,
                        )
                        .await;
                    }
                    Section::Shard(shard) => {
                        self.send_shard_answer(shard, query, message.token);
                    }
                    Section::Zone(zone) => {
                        self.send_zone_answer(zone, query, message.token);
                    }
                    Section::AddressZone(_) => {
                        // Address zones as answers are not supported yet.
                    }
                }
            }
            if let Section::Assertion(assertion) = &message.section {
                if self.config.iterative_lookup
                    && self.follow_glue(assertion, query, message.token)
                {
                    return;
                }
            }
        }
        let upstream = self.caches.pending_queries.upstream_of(message.token);
        let (queriers, _) = self
            .caches
            .pending_queries
            .get_and_remove_by_token(message.token, 0);
        for stored in queriers {
            warn!(
                token = %message.token,
                ?upstream,
                "section did not answer the pending query"
            );
            self.switchboard.notify(
                &stored.sender,
                stored.token,
                NotificationCode::NoAssertionAvail,
                "",
            );
        }
    }

    /// Follows the delegation, redirection, or address glue of an upstream
    /// assertion. Returns `true` when the pending query was sent onward.
    fn follow_glue(
        &self,
        assertion: &Arc<Assertion>,
        query: &QuerySection,
        token: Token,
    ) -> bool {
        let target = assertion.fqdn();
        if assertion.contains_type(ObjectType::Delegation)
            || assertion.contains_type(ObjectType::Redirection)
        {
            if self.send_to_redirect(
                &target,
                &assertion.context,
                token,
                query,
            ) {
                return true;
            }
        }
        let expiration =
            self.clock.now() + self.config.query_validity_secs as i64;
        if let Some(Object::Ip6(addr)) =
            assertion.object_of_type(ObjectType::Ip6)
        {
            if self.resend_pending_query(
                query,
                token,
                &target,
                IpAddr::V6(*addr),
                expiration,
            ) {
                return true;
            }
        }
        if let Some(Object::Ip4(addr)) =
            assertion.object_of_type(ObjectType::Ip4)
        {
            if self.resend_pending_query(
                query,
                token,
                &target,
                IpAddr::V4(*addr),
                expiration,
            ) {
                return true;
            }
        }
        false
    }

    /// Buffers an assertion answer over the coalescing window, then drains
    /// the pending entry and forwards everything buffered to everyone
    /// waiting.
    async fn send_assertion_answer(&self, section: Section, token: Token) {
        let deadline =
            self.clock.now_millis() + ANSWER_COALESCE_MILLIS as i64;
        self.caches
            .pending_queries
            .add_answer_by_token(section, token, deadline);
        tokio::time::sleep(Duration::from_millis(ANSWER_COALESCE_MILLIS))
            .await;
        let (queriers, answers) = self
            .caches
            .pending_queries
            .get_and_remove_by_token(token, deadline);
        let sections: Vec<MsgSection> =
            answers.into_iter().map(MsgSection::from).collect();
        for stored in queriers {
            self.switchboard.send(
                &stored.sender,
                sections.clone(),
                stored.token,
            );
        }
    }

    /// Answers pending queries with the matching assertions of a shard, or
    /// with the shard itself when it contains none.
    fn send_shard_answer(
        &self,
        shard: &Arc<Shard>,
        query: &QuerySection,
        token: Token,
    ) {
        let query = match query {
            QuerySection::Name(query) => query,
            QuerySection::Address(_) => return,
        };
        let answers = match name::strip_zone(&query.name, &shard.subject_zone)
        {
            Some(subject) => {
                shard.assertions_by_name_and_types(&subject, &query.types)
            }
            None => Vec::new(),
        };
        let sections: Vec<MsgSection> = if answers.is_empty() {
            vec![MsgSection::Shard(shard.clone())]
        } else {
            answers
                .into_iter()
                .map(|assertion| {
                    MsgSection::Assertion(Arc::new(assertion.clone()))
                })
                .collect()
        };
        let (queriers, _) =
            self.caches.pending_queries.get_and_remove_by_token(token, 0);
        for stored in queriers {
            self.switchboard.send(
                &stored.sender,
                sections.clone(),
                stored.token,
            );
        }
    }

    /// Answers pending queries from a zone: contained assertions first,
    /// else the smallest covering shard, else the zone itself.
    fn send_zone_answer(
        &self,
        zone: &Arc<Zone>,
        query: &QuerySection,
        token: Token,
    ) {
        let query = match query {
            QuerySection::Name(query) => query,
            QuerySection::Address(_) => return,
        };
        let subject = name::strip_zone(&query.name, &zone.subject_zone)
            .unwrap_or_default();
        let (assertions, shards) =
            zone.sections_by_name_and_types(&subject, &query.types);
        let sections: Vec<MsgSection> = if !assertions.is_empty() {
            assertions
                .into_iter()
                .map(|assertion| {
                    MsgSection::Assertion(Arc::new(assertion.clone()))
                })
                .collect()
        } else if let Some(smallest) =
            shards.into_iter().min_by_key(|shard| shard.content.len())
        {
            vec![MsgSection::Shard(Arc::new(smallest.clone()))]
        } else {
            vec![MsgSection::Zone(zone.clone())]
        };
        let (queriers, _) =
            self.caches.pending_queries.get_and_remove_by_token(token, 0);
        for stored in queriers {
            self.switchboard.send(
                &stored.sender,
                sections.clone(),
                stored.token,
            );
        }
    }

    /// Sends the pending query to a redirect target.
    ///
    /// Looks the target name up in the redirect cache, walking towards the
    /// root on misses. An exact hit resends the original query; a hit on an
    /// ancestor zone instead asks that zone for the target's addresses.
    /// Returns `true` when a query went out and the token was rebound.
    fn send_to_redirect(
        &self,
        target: &str,
        context: &str,
        token: Token,
        query: &QuerySection,
    ) -> bool {
        let now = self.clock.now();
        let conns = self.caches.redirects.get_conns_info(target, now);
        if let Some(conn) = conns.first() {
            let fresh = Token::new();
            if self.caches.pending_queries.update_token(token, fresh) {
                self.send_query(query, fresh, conn);
                return true;
            }
            return false;
        }
        for ancestor in name::ancestors(target) {
            let conns = self.caches.redirects.get_conns_info(ancestor, now);
            if let Some(conn) = conns.first() {
                let fresh = Token::new();
                if !self.caches.pending_queries.update_token(token, fresh) {
                    return false;
                }
                let addr_query = Arc::new(Query {
                    name: target.into(),
                    context: context.into(),
                    types: vec![ObjectType::Ip6, ObjectType::Ip4],
                    options: QueryOpts::new(),
                    expiration: now + self.config.query_validity_secs as i64,
                });
                self.switchboard.send(
                    conn,
                    vec![MsgSection::Query(addr_query)],
                    fresh,
                );
                return true;
            }
        }
        false
    }

    /// Installs a redirect endpoint learned from address glue and resends
    /// the pending query there. Returns `true` on success.
    fn resend_pending_query(
        &self,
        query: &QuerySection,
        token: Token,
        target: &str,
        addr: IpAddr,
        expiration: i64,
    ) -> bool {
        let conn = ConnInfo::tcp(SocketAddr::new(addr, REDIRECT_PORT));
        if !self.caches.redirects.add_conn_info(target, conn, expiration) {
            return false;
        }
        let fresh = Token::new();
        if self.caches.pending_queries.update_token(token, fresh) {
            self.send_query(query, fresh, &conn);
            return true;
        }
        false
    }

    /// Sends a query section to a target.
    fn send_query(&self, query: &QuerySection, token: Token, target: &ConnInfo) {
        let section = match query {
            QuerySection::Name(query) => MsgSection::Query(query.clone()),
            QuerySection::Address(query) => {
                MsgSection::AddressQuery(query.clone())
            }
        };
        self.switchboard.send(target, vec![section], token);
    }

    //--- query

    /// Processes a query of either kind.
    pub async fn query(&self, message: QueryMessage) {
        match message.query.clone() {
            QuerySection::Name(query) => {
                self.name_query(query, message.sender, message.token).await;
            }
            QuerySection::Address(query) => {
                self.address_query(query, message.sender, message.token)
                    .await;
            }
        }
    }

    /// Answers a name query from cache or forwards it.
    async fn name_query(
        &self,
        query: Arc<Query>,
        sender: ConnInfo,
        token: Token,
    ) {
        debug!(name = %query.name, token = %token, "processing query");
        let now = self.clock.now();

        let mut answers: Vec<Arc<Assertion>> = Vec::new();
        let mut answered: HashSet<(String, String, String)> = HashSet::new();
        for &object_type in &query.types {
            let mut found = match self.caches.assertions.get(
                &query.name,
                &query.context,
                object_type,
                false,
                now,
            ) {
                Some(found) => found,
                None => continue,
            };
            self.query_transitive_closure(&mut found, &query.context, now);
            for assertion in found {
                let key = (
                    assertion.subject_name.clone(),
                    assertion.subject_zone.clone(),
                    assertion.context.clone(),
                );
                if assertion.valid_until() > now && answered.insert(key) {
                    answers.push(assertion);
                }
            }
        }
        if !answers.is_empty() {
            let sections =
                answers.into_iter().map(MsgSection::Assertion).collect();
            self.switchboard.send(&sender, sections, token);
            info!(name = %query.name, "answered query from assertion cache");
            return;
        }
        trace!(name = %query.name, "no entry found in assertion cache");

        let (subject, zone) = match name::split_subject_zone(&query.name) {
            Ok(split) => split,
            Err(err) => {
                warn!(name = %query.name, %err, "failed to split query name");
                self.switchboard.notify(
                    &sender,
                    token,
                    NotificationCode::RcvInconsistentMsg,
                    "query name must end with root zone dot '.'",
                );
                return;
            }
        };
        let negative = self
            .caches
            .negatives
            .get(zone, &query.context, &NameInterval::point(subject), now)
            .and_then(|sections| sections.into_iter().next());
        if let Some(negative) = negative {
            let section = match negative {
                NegSection::Shard(shard) => MsgSection::Shard(shard),
                NegSection::Zone(zone) => MsgSection::Zone(zone),
            };
            self.switchboard.send(&sender, vec![section], token);
            info!(name = %query.name, "answered query from negative cache");
            return;
        }
        trace!(name = %query.name, "no entry found in negative cache");

        if query.contains_option(QueryOpt::CachedAnswersOnly) {
            debug!(name = %query.name, "cached answers only, giving up");
            self.switchboard.notify(
                &sender,
                token,
                NotificationCode::NoAssertionAvail,
                "",
            );
            return;
        }

        // Forward towards a delegate.
        let delegate = if self.config.iterative_lookup {
            self.lookup_redirect(&query.name, now)
                .or_else(|| self.root_addr())
        } else {
            self.root_addr()
        };
        let delegate = match delegate {
            Some(delegate) => delegate,
            None => {
                error!(name = %query.name, "no delegate to forward query to");
                self.switchboard.notify(
                    &sender,
                    token,
                    NotificationCode::NoAssertionAvail,
                    "",
                );
                return;
            }
        };
        if delegate == self.server_conn {
            error!(
                name = %query.name,
                "authoritative for query without an answer"
            );
            self.switchboard.notify(
                &sender,
                token,
                NotificationCode::NoAssertionAvail,
                "",
            );
            return;
        }
        let forward_token = if query.contains_option(QueryOpt::TokenTracing) {
            token
        } else {
            Token::new()
        };
        let valid_until = (now + self.config.query_validity_secs as i64)
            .min(query.expiration);
        let stored = StoredQuery {
            sender,
            token,
            query: QuerySection::Name(query.clone()),
        };
        let content_key = ContentKey::of(&stored.query);
        let (is_new, evicted) = self.caches.pending_queries.add(stored);
        self.notify_evicted(evicted);
        if !is_new {
            debug!(name = %query.name, "query already in flight upstream");
            return;
        }
        if self.caches.pending_queries.add_token(
            forward_token,
            valid_until,
            &delegate,
            &content_key,
        ) {
            let forwarded = Arc::new(Query {
                name: query.name.clone(),
                context: query.context.clone(),
                types: query.types.clone(),
                options: query.options,
                expiration: valid_until,
            });
            self.switchboard.send(
                &delegate,
                vec![MsgSection::Query(forwarded)],
                forward_token,
            );
            info!(name = %query.name, upstream = %delegate, "forwarded query");
        }
        // A failed add_token means the answer already arrived and the
        // callback served everyone; nothing left to do.
    }

    /// Answers an address query from cache or forwards it.
    async fn address_query(
        &self,
        query: Arc<AddressQuery>,
        sender: ConnInfo,
        token: Token,
    ) {
        debug!(prefix = %query.subject_addr, "processing address query");
        let now = self.clock.now();
        let (assertion, zone) = self.caches.addresses.get(
            &query.subject_addr,
            &query.context,
            &query.types,
            now,
        );
        if let Some(assertion) = assertion {
            self.switchboard.send(
                &sender,
                vec![MsgSection::AddressAssertion(assertion)],
                token,
            );
            debug!(prefix = %query.subject_addr, "answered from address cache");
            return;
        }
        if let Some(zone) = zone {
            if self.answer_from_address_zone(&zone, &query, sender, token, now)
            {
                debug!(
                    prefix = %query.subject_addr,
                    "answered from cached address zone"
                );
                return;
            }
        }
        debug!(prefix = %query.subject_addr, "no address cache entry");

        if query.contains_option(QueryOpt::CachedAnswersOnly) {
            self.switchboard.notify(
                &sender,
                token,
                NotificationCode::NoAssertionAvail,
                "",
            );
            return;
        }

        let delegate = match self.root_addr() {
            Some(delegate) => delegate,
            None => {
                error!(prefix = %query.subject_addr, "no delegate for query");
                self.switchboard.notify(
                    &sender,
                    token,
                    NotificationCode::NoAssertionAvail,
                    "",
                );
                return;
            }
        };
        if delegate == self.server_conn {
            error!(
                prefix = %query.subject_addr,
                "authoritative for address query without an answer"
            );
            self.switchboard.notify(
                &sender,
                token,
                NotificationCode::NoAssertionAvail,
                "",
            );
            return;
        }
        let forward_token = if query.contains_option(QueryOpt::TokenTracing) {
            token
        } else {
            Token::new()
        };
        let valid_until = (now
            + self.config.address_query_validity_secs as i64)
            .min(query.expiration);
        let stored = StoredQuery {
            sender,
            token,
            query: QuerySection::Address(query.clone()),
        };
        let content_key = ContentKey::of(&stored.query);
        let (is_new, evicted) = self.caches.pending_queries.add(stored);
        self.notify_evicted(evicted);
        if !is_new {
            debug!(
                prefix = %query.subject_addr,
                "address query already in flight upstream"
            );
            return;
        }
        if self.caches.pending_queries.add_token(
            forward_token,
            valid_until,
            &delegate,
            &content_key,
        ) {
            let forwarded = Arc::new(AddressQuery {
                expiration: valid_until,
                ..(*query).clone()
            });
            self.switchboard.send(
                &delegate,
                vec![MsgSection::AddressQuery(forwarded)],
                forward_token,
            );
        }
    }

    /// Tries to answer an address query from the content of a cached
    /// address zone.
    ///
    /// When the zone lists an assertion for exactly the queried prefix,
    /// context, and first type, that assertion is returned if it still has
    /// an unexpired signature, otherwise the zone cannot answer. When the
    /// zone lists nothing for the prefix, the whole zone is the answer.
    fn answer_from_address_zone(
        &self,
        zone: &Arc<AddressZone>,
        query: &AddressQuery,
        sender: ConnInfo,
        token: Token,
        now: i64,
    ) -> bool {
        for assertion in &zone.content {
            let type_matches = match (query.types.first(), assertion.content.first())
            {
                (Some(&wanted), Some(first)) => {
                    first.object_type() == wanted
                }
                _ => false,
            };
            if assertion.subject_addr == query.subject_addr
                && assertion.context == query.context
                && type_matches
            {
                if assertion
                    .signatures
                    .iter()
                    .any(|sig| sig.valid_until > now)
                {
                    self.switchboard.send(
                        &sender,
                        vec![MsgSection::AddressAssertion(Arc::new(
                            assertion.clone(),
                        ))],
                        token,
                    );
                    return true;
                }
                return false;
            }
        }
        self.switchboard.send(
            &sender,
            vec![MsgSection::AddressZone(zone.clone())],
            token,
        );
        true
    }

    /// Fetches the cached records needed to act on redirections.
    ///
    /// Whenever a returned assertion points elsewhere through a redirection
    /// or service-info value, the target's redirection, service-info, and
    /// address assertions are pulled from the cache, across contexts, and
    /// appended. Each name is resolved at most once, so cycles terminate.
    fn query_transitive_closure(
        &self,
        assertions: &mut Vec<Arc<Assertion>>,
        context: &str,
        now: i64,
    ) {
        let mut queue: VecDeque<String> = VecDeque::new();
        let mut resolved: HashSet<String> = HashSet::new();
        for assertion in assertions.iter() {
            for obj in &assertion.content {
                if let Object::Redirection(target) = obj {
                    queue.push_back(target.clone());
                }
            }
        }
        while let Some(target) = queue.pop_front() {
            if !resolved.insert(target.clone()) {
                continue;
            }
            let mut found: Vec<Arc<Assertion>> = Vec::new();
            for object_type in [
                ObjectType::Redirection,
                ObjectType::ServiceInfo,
                ObjectType::Ip4,
                ObjectType::Ip6,
            ] {
                if let Some(batch) = self.caches.assertions.get(
                    &target,
                    context,
                    object_type,
                    true,
                    now,
                ) {
                    found.extend(batch);
                }
            }
            if found.is_empty() {
                debug!(name = %target, "transitive closure found no targets");
            }
            for assertion in &found {
                for obj in &assertion.content {
                    match obj {
                        Object::Redirection(next) => {
                            queue.push_back(next.clone());
                        }
                        Object::ServiceInfo(info) => {
                            queue.push_back(info.name.clone());
                        }
                        _ => {}
                    }
                }
            }
            for assertion in found {
                if !assertions
                    .iter()
                    .any(|have| Arc::ptr_eq(have, &assertion))
                {
                    assertions.push(assertion);
                }
            }
        }
    }

    /// Looks a name up in the redirect cache, walking towards the root.
    fn lookup_redirect(&self, fqdn: &str, now: i64) -> Option<ConnInfo> {
        let conns = self.caches.redirects.get_conns_info(fqdn, now);
        if let Some(conn) = conns.first() {
            return Some(*conn);
        }
        for ancestor in name::ancestors(fqdn) {
            let conns = self.caches.redirects.get_conns_info(ancestor, now);
            if let Some(conn) = conns.first() {
                return Some(*conn);
            }
        }
        None
    }

    /// The configured root upstream, if any.
    fn root_addr(&self) -> Option<ConnInfo> {
        self.config.root_server_addr.map(ConnInfo::tcp)
    }

    /// Sends the negative notification owed to evicted pending queriers.
    fn notify_evicted(&self, evicted: Vec<StoredQuery>) {
        for stored in evicted {
            warn!(
                token = %stored.token,
                "pending query evicted before an answer arrived"
            );
            self.switchboard.notify(
                &stored.sender,
                stored.token,
                NotificationCode::NoAssertionAvail,
                "",
            );
        }
    }

    //--- notifications and maintenance

    /// Processes an inbound notification.
    pub fn notification(&self, message: NotificationMessage) {
        let code = message.notification.code;
        match code {
            NotificationCode::Heartbeat => {
                trace!(sender = %message.sender, "heartbeat");
            }
            NotificationCode::NoAssertionAvail
            | NotificationCode::NoAssertionsExist => {
                // The upstream gave up; the pending entry times out and the
                // reaper notifies the queriers.
                debug!(sender = %message.sender, %code, "upstream negative");
            }
            NotificationCode::CapHashNotKnown => {
                debug!(sender = %message.sender, "peer asks for capabilities");
            }
            NotificationCode::BadMessage
            | NotificationCode::RcvInconsistentMsg
            | NotificationCode::MsgTooLarge
            | NotificationCode::UnspecServerErr
            | NotificationCode::ServerNotCapable => {
                warn!(sender = %message.sender, %code, "peer reported an error");
            }
        }
    }

    /// Sweeps all caches once, notifying expired pending queriers.
    pub fn reap(&self) {
        let now = self.clock.now();
        self.caches.assertions.remove_expired(now);
        self.caches.negatives.remove_expired(now);
        self.caches.zone_keys.remove_expired(now);
        self.caches.addresses.remove_expired(now);
        self.caches.redirects.remove_expired(now);
        let dropped = self.caches.pending_keys.remove_expired(now);
        if !dropped.is_empty() {
            warn!(
                count = dropped.len(),
                "dropped sections whose delegation key never arrived"
            );
        }
        for stored in self.caches.pending_queries.remove_expired(now) {
            self.switchboard.notify(
                &stored.sender,
                stored.token,
                NotificationCode::NoAssertionAvail,
                "",
            );
        }
    }

    /// Spawns the periodic reaper task for this engine.
    pub fn spawn_reaper(self: &Arc<Self>) {
        let engine = Arc::clone(self);
        tokio::spawn(async move {
            let mut interval =
                tokio::time::interval(engine.config.reap_interval());
            interval.tick().await;
            loop {
                interval.tick().await;
                engine.reap();
            }
        });
    }
}

//------------ section_is_malformed ------------------------------------------

/// Returns whether a section violates the shape invariants of its kind.
///
/// Signed sections carry at least one signature, and assertions carry at
/// least one object value. The wire codec normally rejects such sections
/// already; a violation reaching this far is answered as a bad message.
fn section_is_malformed(section: &Section) -> bool {
    match section {
        Section::Assertion(assertion) => {
            assertion.content.is_empty() || assertion.signatures.is_empty()
        }
        Section::Shard(shard) => shard.signatures.is_empty(),
        Section::Zone(zone) => zone.signatures.is_empty(),
        Section::AddressAssertion(assertion) => {
            assertion.content.is_empty() || assertion.signatures.is_empty()
        }
        Section::AddressZone(zone) => zone.signatures.is_empty(),
    }
}

//------------ is_answer_to_query --------------------------------------------

/// Returns whether a section answers a query.
///
/// An assertion answers when its fully qualified name equals the query name
/// and it carries one of the requested types. A shard answers when the query
/// name, stripped by the shard's zone, falls inside its range. A zone
/// answers when its zone is a proper suffix of the query name. An address
/// assertion answers any address query; finer matching is left to the
/// protocol document.
fn is_answer_to_query(section: &Section, query: &QuerySection) -> bool {
    match section {
        Section::Assertion(assertion) => match query {
            QuerySection::Name(query) => {
                assertion.fqdn() == query.name
                    && query
                        .types
                        .iter()
                        .any(|&object_type| assertion.contains_type(object_type))
            }
            QuerySection::Address(_) => false,
        },
        Section::Shard(shard) => match query {
            QuerySection::Name(query) => {
                match name::strip_zone(&query.name, &shard.subject_zone) {
                    Some(subject) => shard.in_range(&subject),
                    None => false,
                }
            }
            QuerySection::Address(_) => false,
        },
        Section::Zone(zone) => match query {
            QuerySection::Name(query) => {
                name::strip_zone(&query.name, &zone.subject_zone).is_some()
            }
            QuerySection::Address(_) => false,
        },
        Section::AddressAssertion(_) => {
            matches!(query, QuerySection::Address(_))
        }
        Section::AddressZone(_) => false,
    }
}

//============ Tests =========================================================
