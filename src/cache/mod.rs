//! The caches.
//!
//! Every cache here follows the same conventions. The interior is a plain
//! data structure behind a [`parking_lot::Mutex`], so each operation is
//! atomic and the caches are safe to share between worker tasks. Methods
//! that depend on time take `now` explicitly, in unix seconds, so callers
//! and tests control it. Entries marked *authoritative* were issued by this
//! server and only ever leave through expiry; everything else is fair game
//! for LRU eviction once a cache reaches its capacity.

pub mod address;
pub mod assertion;
pub mod negative;
pub mod pending_key;
pub mod pending_query;
pub mod redirect;
pub mod zone_key;

pub use self::address::AddressCache;
pub use self::assertion::AssertionCache;
pub use self::negative::{NegativeAssertionCache, NegSection};
pub use self::pending_key::{KeyContent, PendingKeyCache};
pub use self::pending_query::{ContentKey, PendingQueryCache, StoredQuery};
pub use self::redirect::RedirectCache;
pub use self::zone_key::ZoneKeyCache;
