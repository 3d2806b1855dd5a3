//! Queries.

use super::object::ObjectType;
use ipnet::IpNet;
use std::fmt;
use std::sync::Arc;

//------------ QueryOpt ------------------------------------------------------

/// A single query option.
///
/// The discriminants are the option numbers of the RAINS data model. Options
/// the engine does not act on are still representable so they survive a
/// round trip through it.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum QueryOpt {
    /// Minimize end-to-end latency.
    MinE2eLatency = 1,

    /// Minimize the size of the last-hop answer.
    MinLastHopAnswerSize = 2,

    /// Minimize information leakage beyond what the query needs.
    MinInfoLeakage = 3,

    /// Answer from cache only, never forward.
    CachedAnswersOnly = 4,

    /// Expired assertions are acceptable answers.
    ExpiredAssertionsOk = 5,

    /// Reuse the query's token when forwarding, for tracing.
    TokenTracing = 6,

    /// Do not verify the delegation chain on the querier's behalf.
    NoVerificationDelegation = 7,
}

//------------ QueryOpts -----------------------------------------------------

/// The set of options attached to a query.
#[derive(Clone, Copy, Debug, Default, Eq, Hash, PartialEq)]
pub struct QueryOpts(u16);

impl QueryOpts {
    /// Creates an empty option set.
    pub fn new() -> Self {
        QueryOpts(0)
    }

    /// Returns the set with the given option added.
    pub fn with(self, opt: QueryOpt) -> Self {
        QueryOpts(self.0 | 1 << opt as u16)
    }

    /// Returns whether the set contains the given option.
    pub fn contains(self, opt: QueryOpt) -> bool {
        self.0 & 1 << opt as u16 != 0
    }
}

impl FromIterator<QueryOpt> for QueryOpts {
    fn from_iter<T: IntoIterator<Item = QueryOpt>>(iter: T) -> Self {
        iter.into_iter()
            .fold(QueryOpts::new(), |opts, opt| opts.with(opt))
    }
}

//------------ Query ---------------------------------------------------------

/// A query for the objects of a name.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Query {
    /// The fully qualified name asked about.
    pub name: String,

    /// The namespace context to answer in.
    pub context: String,

    /// The object types of interest.
    pub types: Vec<ObjectType>,

    /// The query options.
    pub options: QueryOpts,

    /// The second after which the querier no longer cares.
    pub expiration: i64,
}

impl Query {
    /// Returns whether the query carries the given option.
    pub fn contains_option(&self, opt: QueryOpt) -> bool {
        self.options.contains(opt)
    }
}

impl fmt::Display for Query {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "query {} ctx {}", self.name, self.context)
    }
}

//------------ AddressQuery --------------------------------------------------

/// A query for the objects of an address prefix.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct AddressQuery {
    /// The prefix asked about.
    pub subject_addr: IpNet,

    /// The namespace context to answer in.
    pub context: String,

    /// The object types of interest.
    pub types: Vec<ObjectType>,

    /// The query options.
    pub options: QueryOpts,

    /// The second after which the querier no longer cares.
    pub expiration: i64,
}

impl AddressQuery {
    /// Returns whether the query carries the given option.
    pub fn contains_option(&self, opt: QueryOpt) -> bool {
        self.options.contains(opt)
    }
}

impl fmt::Display for AddressQuery {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "addr-query {} ctx {}", self.subject_addr, self.context)
    }
}

//------------ QuerySection --------------------------------------------------

/// Either kind of query as it travels through the engine.
#[derive(Clone, Debug)]
pub enum QuerySection {
    /// A query for a name.
    Name(Arc<Query>),

    /// A query for an address prefix.
    Address(Arc<AddressQuery>),
}

impl QuerySection {
    /// The second after which the querier no longer cares.
    pub fn expiration(&self) -> i64 {
        match self {
            QuerySection::Name(query) => query.expiration,
            QuerySection::Address(query) => query.expiration,
        }
    }

    /// The object types of interest.
    pub fn types(&self) -> &[ObjectType] {
        match self {
            QuerySection::Name(query) => &query.types,
            QuerySection::Address(query) => &query.types,
        }
    }

    /// The namespace context to answer in.
    pub fn context(&self) -> &str {
        match self {
            QuerySection::Name(query) => &query.context,
            QuerySection::Address(query) => &query.context,
        }
    }

    /// The queried subject, a name or the text form of a prefix.
    pub fn subject(&self) -> String {
        match self {
            QuerySection::Name(query) => query.name.clone(),
            QuerySection::Address(query) => query.subject_addr.to_string(),
        }
    }
}

//============ Tests =========================================================
