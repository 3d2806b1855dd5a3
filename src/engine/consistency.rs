//! Consistency checks for arriving sections.
//!
//! A section whose signatures verify can still contradict material the
//! server already holds: an assertion for a name a cached shard swears does
//! not exist, a shard missing an assertion the server has seen, a zone with
//! overlapping shards. These checks compare a new section against every
//! cached section that is valid at some moment the new one is valid too;
//! material whose validity windows never coincide cannot contradict each
//! other.
//!
//! The checks are comparatively expensive, so the engine only runs them
//! while the resource monitor reports headroom.

use super::Caches;
use crate::base::name::NameInterval;
use crate::base::object::Object;
use crate::base::section::{
    AddressAssertion, AddressZone, Assertion, Section, Shard, Signed, Zone,
    ZoneContent,
};
use crate::cache::NegSection;

//------------ section_is_inconsistent ---------------------------------------

/// Returns whether a section contradicts currently cached material.
pub fn section_is_inconsistent(section: &Section, caches: &Caches) -> bool {
    match section {
        Section::Assertion(assertion) => {
            !assertion_consistent(assertion, caches)
        }
        Section::Shard(shard) => !shard_consistent(shard, caches),
        Section::Zone(zone) => !zone_consistent(zone, caches),
        Section::AddressAssertion(assertion) => {
            !address_assertion_consistent(assertion, caches)
        }
        Section::AddressZone(zone) => !address_zone_consistent(zone, caches),
    }
}

//------------ assertion_consistent ------------------------------------------

/// Checks an assertion against cached negative evidence and cached values.
fn assertion_consistent(assertion: &Assertion, caches: &Caches) -> bool {
    let window = (assertion.valid_since(), assertion.valid_until());
    let interval = NameInterval::point(&*assertion.subject_name);
    for neg in caches.negatives.get_overlapping(
        &assertion.subject_zone,
        &assertion.context,
        &interval,
        window,
    ) {
        match neg {
            NegSection::Shard(shard) => {
                if shard.in_range(&assertion.subject_name)
                    && !shard.content.iter().any(|contained| {
                        contained.subject_name == assertion.subject_name
                    })
                {
                    return false;
                }
            }
            NegSection::Zone(zone) => {
                if !zone.contains_subject(&assertion.subject_name) {
                    return false;
                }
            }
        }
    }
    for cached in caches.assertions.get_overlapping(
        &assertion.context,
        &assertion.subject_zone,
        &assertion.subject_name,
        window,
    ) {
        if contradicts(assertion, &cached) {
            return false;
        }
    }
    true
}

/// Returns whether two assertions for the same name disagree on the values
/// of an object type both carry.
fn contradicts(a: &Assertion, b: &Assertion) -> bool {
    let mut types: Vec<_> = a.content.iter().map(Object::object_type).collect();
    types.sort_unstable();
    types.dedup();
    for object_type in types {
        let values_a: Vec<&Object> = a
            .content
            .iter()
            .filter(|obj| obj.object_type() == object_type)
            .collect();
        let values_b: Vec<&Object> = b
            .content
            .iter()
            .filter(|obj| obj.object_type() == object_type)
            .collect();
        if !values_b.is_empty() && values_a != values_b {
            return true;
        }
    }
    false
}

//------------ shard_consistent ----------------------------------------------

/// Checks a shard's internal shape and its claim of completeness against
/// the assertion cache.
fn shard_consistent(shard: &Shard, caches: &Caches) -> bool {
    if !shard.is_well_formed() {
        return false;
    }
    let window = (shard.valid_since(), shard.valid_until());
    for cached in caches.assertions.get_in_range_overlapping(
        &shard.context,
        &shard.subject_zone,
        &shard.range_from,
        &shard.range_to,
        window,
    ) {
        if !shard
            .content
            .iter()
            .any(|contained| contained.subject_name == cached.subject_name)
        {
            return false;
        }
    }
    true
}

//------------ zone_consistent -----------------------------------------------

/// Checks a zone: every contained shard must be internally consistent and
/// shard ranges must be pairwise disjoint.
fn zone_consistent(zone: &Zone, caches: &Caches) -> bool {
    let shards: Vec<&Shard> = zone
        .content
        .iter()
        .filter_map(|content| match content {
            ZoneContent::Shard(shard) => Some(shard),
            ZoneContent::Assertion(_) => None,
        })
        .collect();
    for shard in &shards {
        if !shard_consistent(shard, caches) {
            return false;
        }
    }
    for (index, first) in shards.iter().enumerate() {
        for second in &shards[index + 1..] {
            if ranges_overlap(first, second) {
                return false;
            }
        }
    }
    true
}

/// Returns whether the open ranges of two shards overlap.
fn ranges_overlap(a: &Shard, b: &Shard) -> bool {
    let a_below_b = !a.range_to.is_empty()
        && !b.range_from.is_empty()
        && a.range_to <= b.range_from;
    let b_below_a = !b.range_to.is_empty()
        && !a.range_from.is_empty()
        && b.range_to <= a.range_from;
    !(a_below_b || b_below_a)
}

//------------ address sections ----------------------------------------------

/// Checks an address assertion against enclosing cached address zones.
fn address_assertion_consistent(
    assertion: &AddressAssertion,
    caches: &Caches,
) -> bool {
    let window = (assertion.valid_since(), assertion.valid_until());
    for zone in caches.addresses.enclosing_zones_overlapping(
        &assertion.subject_addr,
        &assertion.context,
        window,
    ) {
        if zone.subject_addr == assertion.subject_addr {
            continue;
        }
        if !zone
            .content
            .iter()
            .any(|contained| contained.subject_addr == assertion.subject_addr)
        {
            return false;
        }
    }
    true
}

/// Checks an address zone: contained prefixes must lie within the zone
/// prefix and be pairwise disjoint, and cached assertions inside the zone
/// prefix must be listed.
fn address_zone_consistent(zone: &AddressZone, caches: &Caches) -> bool {
    for contained in &zone.content {
        if !zone.subject_addr.contains(&contained.subject_addr) {
            return false;
        }
    }
    for (index, first) in zone.content.iter().enumerate() {
        for second in &zone.content[index + 1..] {
            if first.subject_addr.contains(&second.subject_addr)
                || second.subject_addr.contains(&first.subject_addr)
            {
                return false;
            }
        }
    }
    let window = (zone.valid_since(), zone.valid_until());
    for cached in caches.addresses.assertions_within(
        &zone.subject_addr,
        &zone.context,
        window,
    ) {
        if !zone
            .content
            .iter()
            .any(|contained| contained.subject_addr == cached.subject_addr)
        {
            return false;
        }
    }
    true
}

//============ Tests =========================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::base::signature::{KeySpace, Signature, SignatureAlgorithm};
    use crate::server::config::Config;
    use bytes::Bytes;
    use std::net::Ipv4Addr;
    use std::sync::Arc;

    fn caches() -> Caches {
        Caches::new(&Config::default())
    }

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

    fn assertion(subject: &str, content: Vec<Object>) -> Arc<Assertion> {
        Arc::new(Assertion {
            subject_name: subject.into(),
            subject_zone: "a.".into(),
            context: ".".into(),
            content,
            signatures: vec![signature(100)],
        })
    }

    fn shard(from: &str, to: &str, content: Vec<Assertion>) -> Arc<Shard> {
        Arc::new(Shard {
            subject_zone: "a.".into(),
            context: ".".into(),
            range_from: from.into(),
            range_to: to.into(),
            content,
            signatures: vec![signature(100)],
        })
    }

    #[test]
    fn assertion_within_silent_shard_is_inconsistent() {
        let caches = caches();
        caches
            .negatives
            .add_shard(shard("b", "m", Vec::new()), false);
        let section = Section::Assertion(assertion(
            "foo",
            vec![Object::Ip4(Ipv4Addr::new(1, 2, 3, 4))],
        ));
        assert!(section_is_inconsistent(&section, &caches));
    }

    #[test]
    fn assertion_outside_shard_range_is_fine() {
        let caches = caches();
        caches
            .negatives
            .add_shard(shard("b", "m", Vec::new()), false);
        let section = Section::Assertion(assertion(
            "zz",
            vec![Object::Ip4(Ipv4Addr::new(1, 2, 3, 4))],
        ));
        assert!(!section_is_inconsistent(&section, &caches));
    }

    #[test]
    fn assertion_listed_in_shard_is_fine() {
        let caches = caches();
        let listed = assertion(
            "foo",
            vec![Object::Ip4(Ipv4Addr::new(1, 2, 3, 4))],
        );
        caches
            .negatives
            .add_shard(shard("b", "m", vec![(*listed).clone()]), false);
        assert!(!section_is_inconsistent(
            &Section::Assertion(listed),
            &caches
        ));
    }

    #[test]
    fn contradictory_values_are_inconsistent() {
        let caches = caches();
        caches.assertions.add(
            assertion("foo", vec![Object::Ip4(Ipv4Addr::new(1, 2, 3, 4))]),
            false,
        );
        let same = Section::Assertion(assertion(
            "foo",
            vec![Object::Ip4(Ipv4Addr::new(1, 2, 3, 4))],
        ));
        assert!(!section_is_inconsistent(&same, &caches));
        let other = Section::Assertion(assertion(
            "foo",
            vec![Object::Ip4(Ipv4Addr::new(9, 9, 9, 9))],
        ));
        assert!(section_is_inconsistent(&other, &caches));
        let disjoint_type = Section::Assertion(assertion(
            "foo",
            vec![Object::Registrant("r".into())],
        ));
        assert!(!section_is_inconsistent(&disjoint_type, &caches));
    }

    #[test]
    fn shard_missing_cached_assertion_is_inconsistent() {
        let caches = caches();
        caches.assertions.add(
            assertion("foo", vec![Object::Ip4(Ipv4Addr::new(1, 2, 3, 4))]),
            false,
        );
        let empty = Section::Shard(shard("b", "m", Vec::new()));
        assert!(section_is_inconsistent(&empty, &caches));
        let listing = Section::Shard(shard(
            "b",
            "m",
            vec![(*assertion(
                "foo",
                vec![Object::Ip4(Ipv4Addr::new(1, 2, 3, 4))],
            ))
            .clone()],
        ));
        assert!(!section_is_inconsistent(&listing, &caches));
    }

    #[test]
    fn unsorted_shard_is_inconsistent() {
        let caches = caches();
        let disordered = shard(
            "b",
            "m",
            vec![
                (*assertion("e", Vec::new())).clone(),
                (*assertion("c", Vec::new())).clone(),
            ],
        );
        assert!(section_is_inconsistent(
            &Section::Shard(disordered),
            &caches
        ));
    }

    #[test]
    fn zone_with_overlapping_shards_is_inconsistent() {
        let caches = caches();
        let zone = Arc::new(Zone {
            subject_zone: "a.".into(),
            context: ".".into(),
            content: vec![
                ZoneContent::Shard((*shard("a", "f", Vec::new())).clone()),
                ZoneContent::Shard((*shard("d", "k", Vec::new())).clone()),
            ],
            signatures: vec![signature(100)],
        });
        assert!(section_is_inconsistent(&Section::Zone(zone), &caches));
        let disjoint = Arc::new(Zone {
            subject_zone: "a.".into(),
            context: ".".into(),
            content: vec![
                ZoneContent::Shard((*shard("a", "f", Vec::new())).clone()),
                ZoneContent::Shard((*shard("f", "k", Vec::new())).clone()),
            ],
            signatures: vec![signature(100)],
        });
        assert!(!section_is_inconsistent(&Section::Zone(disjoint), &caches));
    }

    #[test]
    fn address_zone_containment_and_disjointness() {
        let caches = caches();
        let inside = AddressAssertion {
            subject_addr: "10.0.0.0/16".parse().unwrap(),
            context: ".".into(),
            content: vec![Object::Name("host.a.".into())],
            signatures: vec![signature(100)],
        };
        let outside = AddressAssertion {
            subject_addr: "11.0.0.0/16".parse().unwrap(),
            ..inside.clone()
        };
        let good = Arc::new(AddressZone {
            subject_addr: "10.0.0.0/8".parse().unwrap(),
            context: ".".into(),
            content: vec![inside.clone()],
            signatures: vec![signature(100)],
        });
        assert!(!section_is_inconsistent(
            &Section::AddressZone(good),
            &caches
        ));
        let escaping = Arc::new(AddressZone {
            subject_addr: "10.0.0.0/8".parse().unwrap(),
            context: ".".into(),
            content: vec![outside],
            signatures: vec![signature(100)],
        });
        assert!(section_is_inconsistent(
            &Section::AddressZone(escaping),
            &caches
        ));
    }

    #[test]
    fn assertion_missing_from_enclosing_address_zone() {
        let caches = caches();
        caches.addresses.add_zone(
            Arc::new(AddressZone {
                subject_addr: "10.0.0.0/8".parse().unwrap(),
                context: ".".into(),
                content: Vec::new(),
                signatures: vec![signature(100)],
            }),
            false,
        );
        let unlisted = Arc::new(AddressAssertion {
            subject_addr: "10.1.0.0/16".parse().unwrap(),
            context: ".".into(),
            content: vec![Object::Name("host.a.".into())],
            signatures: vec![signature(100)],
        });
        assert!(section_is_inconsistent(
            &Section::AddressAssertion(unlisted),
            &caches
        ));
    }

    #[test]
    fn expired_evidence_does_not_contradict() {
        let caches = caches();
        let stale = Arc::new(Shard {
            subject_zone: "a.".into(),
            context: ".".into(),
            range_from: "b".into(),
            range_to: "m".into(),
            content: Vec::new(),
            signatures: vec![signature(10)],
        });
        caches.negatives.add_shard(stale, false);
        let late = Arc::new(Assertion {
            subject_name: "foo".into(),
            subject_zone: "a.".into(),
            context: ".".into(),
            content: vec![Object::Ip4(Ipv4Addr::new(1, 2, 3, 4))],
            signatures: vec![Signature {
                key_space: KeySpace::Rains,
                algorithm: SignatureAlgorithm::Ed25519,
                key_phase: 0,
                valid_since: 50,
                valid_until: 100,
                data: Bytes::new(),
            }],
        });
        assert!(!section_is_inconsistent(
            &Section::Assertion(late),
            &caches
        ));
    }
}
