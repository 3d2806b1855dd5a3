//! The address cache.
//!
//! Address assertions and address zones, held in one binary radix trie per
//! IP family, keyed by the bits of the subject prefix. A lookup walks the
//! probed prefix from the root and remembers the deepest entries it passes:
//! that yields the longest-match assertion and the most specific enclosing
//! zone in a single descent.

use crate::base::object::ObjectType;
use crate::base::section::{AddressAssertion, AddressZone, Signed};
use ipnet::IpNet;
use parking_lot::Mutex;
use std::net::IpAddr;
use std::sync::Arc;

//------------ AddressCache --------------------------------------------------

/// A bounded cache of address sections.
#[derive(Debug)]
pub struct AddressCache {
    /// The synchronized interior.
    inner: Mutex<Inner>,
}

/// The interior of the cache.
#[derive(Debug)]
struct Inner {
    /// The IPv4 trie.
    v4: Node,

    /// The IPv6 trie.
    v6: Node,

    /// Total number of entries in both tries.
    len: usize,

    /// Maximum number of entries per cache.
    capacity: usize,
}

/// One trie node, standing for the prefix spelled by the path to it.
#[derive(Debug, Default)]
struct Node {
    /// Children for the 0 and 1 continuation of the prefix.
    children: [Option<Box<Node>>; 2],

    /// Address assertions whose subject is exactly this prefix.
    assertions: Vec<Entry<AddressAssertion>>,

    /// Address zones whose subject is exactly this prefix.
    zones: Vec<Entry<AddressZone>>,
}

/// One cached section.
#[derive(Clone, Debug)]
struct Entry<T> {
    /// The section itself.
    section: Arc<T>,

    /// First second of validity.
    valid_since: i64,

    /// Last second of validity.
    valid_until: i64,
}

impl AddressCache {
    /// Creates a cache holding at most `capacity` entries.
    pub fn new(capacity: usize) -> Self {
        AddressCache {
            inner: Mutex::new(Inner {
                v4: Node::default(),
                v6: Node::default(),
                len: 0,
                capacity,
            }),
        }
    }

    /// Adds an address assertion.
    ///
    /// Returns `false` when the cache is full and the entry is not
    /// authoritative; the trie does not evict.
    pub fn add_assertion(
        &self,
        assertion: Arc<AddressAssertion>,
        authoritative: bool,
    ) -> bool {
        let mut inner = self.inner.lock();
        if inner.len >= inner.capacity && !authoritative {
            return false;
        }
        let entry = Entry {
            valid_since: assertion.valid_since(),
            valid_until: assertion.valid_until(),
            section: assertion.clone(),
        };
        let node = inner.node_for(&assertion.subject_addr);
        node.assertions.push(entry);
        inner.len += 1;
        true
    }

    /// Adds an address zone.
    ///
    /// Returns `false` when the cache is full and the entry is not
    /// authoritative.
    pub fn add_zone(
        &self,
        zone: Arc<AddressZone>,
        authoritative: bool,
    ) -> bool {
        let mut inner = self.inner.lock();
        if inner.len >= inner.capacity && !authoritative {
            return false;
        }
        let entry = Entry {
            valid_since: zone.valid_since(),
            valid_until: zone.valid_until(),
            section: zone.clone(),
        };
        let node = inner.node_for(&zone.subject_addr);
        node.zones.push(entry);
        inner.len += 1;
        true
    }

    /// Looks up a prefix within a context.
    ///
    /// Returns the longest-match assertion carrying one of the requested
    /// types, and the most specific zone enclosing the prefix, both only if
    /// valid at `now`. An empty type list matches every assertion.
    pub fn get(
        &self,
        prefix: &IpNet,
        context: &str,
        types: &[ObjectType],
        now: i64,
    ) -> (Option<Arc<AddressAssertion>>, Option<Arc<AddressZone>>) {
        let inner = self.inner.lock();
        let mut node = inner.root(prefix);
        let mut assertion = None;
        let mut zone = None;
        for depth in 0..=prefix.prefix_len() {
            if let Some(found) = node.assertions.iter().find(|entry| {
                entry.valid_until > now
                    && entry.section.context == context
                    && (types.is_empty()
                        || entry.section.content.iter().any(|obj| {
                            types.contains(&obj.object_type())
                        }))
            }) {
                assertion = Some(found.section.clone());
            }
            if let Some(found) = node.zones.iter().find(|entry| {
                entry.valid_until > now && entry.section.context == context
            }) {
                zone = Some(found.section.clone());
            }
            if depth == prefix.prefix_len() {
                break;
            }
            match &node.children[bit(&prefix.network(), depth) as usize] {
                Some(child) => node = child,
                None => break,
            }
        }
        (assertion, zone)
    }

    /// Returns the zones of a context enclosing `prefix` whose validity
    /// window overlaps `window`, outermost first. Used by the consistency
    /// checker.
    pub fn enclosing_zones_overlapping(
        &self,
        prefix: &IpNet,
        context: &str,
        window: (i64, i64),
    ) -> Vec<Arc<AddressZone>> {
        let inner = self.inner.lock();
        let mut node = inner.root(prefix);
        let mut zones = Vec::new();
        for depth in 0..=prefix.prefix_len() {
            for entry in &node.zones {
                if entry.section.context == context
                    && entry.valid_since <= window.1
                    && window.0 <= entry.valid_until
                {
                    zones.push(entry.section.clone());
                }
            }
            if depth == prefix.prefix_len() {
                break;
            }
            match &node.children[bit(&prefix.network(), depth) as usize] {
                Some(child) => node = child,
                None => break,
            }
        }
        zones
    }

    /// Returns the assertions of a context whose subject lies within
    /// `prefix` and whose validity window overlaps `window`.
    pub fn assertions_within(
        &self,
        prefix: &IpNet,
        context: &str,
        window: (i64, i64),
    ) -> Vec<Arc<AddressAssertion>> {
        let inner = self.inner.lock();
        let mut node = inner.root(prefix);
        for depth in 0..prefix.prefix_len() {
            match &node.children[bit(&prefix.network(), depth) as usize] {
                Some(child) => node = child,
                None => return Vec::new(),
            }
        }
        let mut result = Vec::new();
        collect_subtree(node, context, window, &mut result);
        result
    }

    /// Removes every expired entry.
    pub fn remove_expired(&self, now: i64) {
        let mut inner = self.inner.lock();
        let mut removed = 0;
        prune(&mut inner.v4, now, &mut removed);
        prune(&mut inner.v6, now, &mut removed);
        inner.len -= removed;
    }

    /// The number of entries currently cached.
    pub fn len(&self) -> usize {
        self.inner.lock().len
    }

    /// Returns whether the cache is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Inner {
    /// The root node of the family `prefix` belongs to.
    fn root(&self, prefix: &IpNet) -> &Node {
        match prefix {
            IpNet::V4(_) => &self.v4,
            IpNet::V6(_) => &self.v6,
        }
    }

    /// The node for `prefix`, creating the path to it as needed.
    fn node_for(&mut self, prefix: &IpNet) -> &mut Node {
        let addr = prefix.network();
        let mut node = match prefix {
            IpNet::V4(_) => &mut self.v4,
            IpNet::V6(_) => &mut self.v6,
        };
        for depth in 0..prefix.prefix_len() {
            node = node.children[bit(&addr, depth) as usize]
                .get_or_insert_with(Default::default);
        }
        node
    }
}

/// Returns bit `index` of an address, counting from the most significant.
fn bit(addr: &IpAddr, index: u8) -> u8 {
    let (octets, index) = match addr {
        IpAddr::V4(addr) => (addr.octets().to_vec(), index),
        IpAddr::V6(addr) => (addr.octets().to_vec(), index),
    };
    let octet = octets[usize::from(index / 8)];
    octet >> (7 - index % 8) & 1
}

/// Collects all valid-overlapping assertions of a subtree.
fn collect_subtree(
    node: &Node,
    context: &str,
    window: (i64, i64),
    result: &mut Vec<Arc<AddressAssertion>>,
) {
    for entry in &node.assertions {
        if entry.section.context == context
            && entry.valid_since <= window.1
            && window.0 <= entry.valid_until
        {
            result.push(entry.section.clone());
        }
    }
    for child in node.children.iter().flatten() {
        collect_subtree(child, context, window, result);
    }
}

/// Drops expired entries below `node`, counting removals.
fn prune(node: &mut Node, now: i64, removed: &mut usize) {
    let before = node.assertions.len() + node.zones.len();
    node.assertions.retain(|entry| entry.valid_until > now);
    node.zones.retain(|entry| entry.valid_until > now);
    *removed += before - node.assertions.len() - node.zones.len();
    for child in node.children.iter_mut().flatten() {
        prune(child, now, removed);
    }
}

//============ Tests =========================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::base::object::Object;
    use crate::base::signature::{KeySpace, Signature, SignatureAlgorithm};
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

    fn addr_assertion(prefix: &str, valid_until: i64) -> Arc<AddressAssertion> {
        Arc::new(AddressAssertion {
            subject_addr: prefix.parse().unwrap(),
            context: ".".into(),
            content: vec![Object::Name("host.a.".into())],
            signatures: vec![signature(valid_until)],
        })
    }

    fn addr_zone(prefix: &str, valid_until: i64) -> Arc<AddressZone> {
        Arc::new(AddressZone {
            subject_addr: prefix.parse().unwrap(),
            context: ".".into(),
            content: Vec::new(),
            signatures: vec![signature(valid_until)],
        })
    }

    #[test]
    fn longest_match_wins() {
        let cache = AddressCache::new(10);
        cache.add_assertion(addr_assertion("10.0.0.0/8", 100), false);
        cache.add_assertion(addr_assertion("10.1.0.0/16", 100), false);
        let (assertion, _) = cache.get(
            &"10.1.2.3/32".parse().unwrap(),
            ".",
            &[ObjectType::Name],
            50,
        );
        assert_eq!(
            assertion.unwrap().subject_addr.to_string(),
            "10.1.0.0/16"
        );
        let (assertion, _) = cache.get(
            &"10.2.0.0/16".parse().unwrap(),
            ".",
            &[ObjectType::Name],
            50,
        );
        assert_eq!(
            assertion.unwrap().subject_addr.to_string(),
            "10.0.0.0/8"
        );
    }

    #[test]
    fn most_specific_enclosing_zone() {
        let cache = AddressCache::new(10);
        cache.add_zone(addr_zone("10.0.0.0/8", 100), false);
        cache.add_zone(addr_zone("10.1.0.0/16", 100), false);
        let (_, zone) =
            cache.get(&"10.1.2.0/24".parse().unwrap(), ".", &[], 50);
        assert_eq!(zone.unwrap().subject_addr.to_string(), "10.1.0.0/16");
    }

    #[test]
    fn families_are_separate() {
        let cache = AddressCache::new(10);
        cache.add_assertion(addr_assertion("10.0.0.0/8", 100), false);
        let (assertion, zone) =
            cache.get(&"::1/128".parse().unwrap(), ".", &[], 50);
        assert!(assertion.is_none());
        assert!(zone.is_none());
    }

    #[test]
    fn type_filter_applies() {
        let cache = AddressCache::new(10);
        cache.add_assertion(addr_assertion("10.0.0.0/8", 100), false);
        let (assertion, _) = cache.get(
            &"10.0.0.1/32".parse().unwrap(),
            ".",
            &[ObjectType::Delegation],
            50,
        );
        assert!(assertion.is_none());
    }

    #[test]
    fn capacity_rejects_external_entries() {
        let cache = AddressCache::new(1);
        assert!(cache.add_assertion(addr_assertion("10.0.0.0/8", 100), false));
        assert!(!cache.add_assertion(addr_assertion("11.0.0.0/8", 100), false));
        assert!(cache.add_assertion(addr_assertion("12.0.0.0/8", 100), true));
    }

    #[test]
    fn expiry_and_reaping() {
        let cache = AddressCache::new(10);
        cache.add_assertion(addr_assertion("10.0.0.0/8", 100), false);
        let (assertion, _) =
            cache.get(&"10.0.0.1/32".parse().unwrap(), ".", &[], 100);
        assert!(assertion.is_none());
        cache.remove_expired(100);
        assert!(cache.is_empty());
    }

    #[test]
    fn subtree_and_enclosing_queries() {
        let cache = AddressCache::new(10);
        cache.add_zone(addr_zone("10.0.0.0/8", 100), false);
        cache.add_assertion(addr_assertion("10.1.0.0/16", 100), false);
        cache.add_assertion(addr_assertion("11.0.0.0/16", 100), false);
        let zones = cache.enclosing_zones_overlapping(
            &"10.1.0.0/16".parse().unwrap(),
            ".",
            (0, 50),
        );
        assert_eq!(zones.len(), 1);
        let within = cache
            .assertions_within(&"10.0.0.0/8".parse().unwrap(), ".", (0, 50));
        assert_eq!(within.len(), 1);
        assert_eq!(within[0].subject_addr.to_string(), "10.1.0.0/16");
    }
}
