//! The section taxonomy.
//!
//! Signed sections come in five shapes. An [`Assertion`] binds a name in a
//! zone and context to one or more object values. A [`Shard`] covers an open
//! name interval of a zone and asserts that the assertions it lists are the
//! only ones existing inside that interval. A [`Zone`] is a complete
//! enumeration of a zone's assertions and shards. [`AddressAssertion`] and
//! [`AddressZone`] are their analogues keyed by an address prefix instead of
//! a name.
//!
//! The [`Section`] enum is the sum of the five signed shapes as they travel
//! through the engine; [`MsgSection`] additionally covers the unsigned
//! message sections (queries and notifications) for the outbound direction.
//! Sections are shared through [`Arc`]: handing one to a cache transfers it
//! logically, and everyone else keeps reading the same immutable value.

use super::name;
use super::name::NameInterval;
use super::notification::Notification;
use super::object::{Object, ObjectType};
use super::query::{AddressQuery, Query};
use super::signature::Signature;
use ipnet::IpNet;
use std::sync::Arc;

//------------ Signed --------------------------------------------------------

/// Common behavior of all signed sections.
pub trait Signed {
    /// Returns the signatures attached to the section.
    fn signatures(&self) -> &[Signature];

    /// The first second at which any signature is valid.
    fn valid_since(&self) -> i64 {
        self.signatures()
            .iter()
            .map(|sig| sig.valid_since)
            .min()
            .unwrap_or(i64::MAX)
    }

    /// The last second at which any signature is valid.
    fn valid_until(&self) -> i64 {
        self.signatures()
            .iter()
            .map(|sig| sig.valid_until)
            .max()
            .unwrap_or(0)
    }
}

//------------ Assertion -----------------------------------------------------

/// A signed binding of a name to one or more typed object values.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Assertion {
    /// The leftmost label of the asserted name.
    pub subject_name: String,

    /// The zone the name lives in, ending with the root dot.
    pub subject_zone: String,

    /// The namespace context the assertion is valid in.
    pub context: String,

    /// The asserted object values, sorted by object type.
    pub content: Vec<Object>,

    /// The signatures vouching for the assertion.
    pub signatures: Vec<Signature>,
}

impl Assertion {
    /// Returns the fully qualified name of the assertion.
    pub fn fqdn(&self) -> String {
        name::fqdn(&self.subject_name, &self.subject_zone)
    }

    /// Returns the first object of the given type, if present.
    pub fn object_of_type(&self, object_type: ObjectType) -> Option<&Object> {
        self.content
            .iter()
            .find(|obj| obj.object_type() == object_type)
    }

    /// Returns whether the assertion carries an object of the given type.
    pub fn contains_type(&self, object_type: ObjectType) -> bool {
        self.object_of_type(object_type).is_some()
    }

    /// Returns a copy with context and zone replaced.
    ///
    /// Used when assertions contained in a shard or zone are cached
    /// individually: the enclosing section's context and zone propagate
    /// down.
    pub fn copy_with(&self, context: &str, zone: &str) -> Assertion {
        Assertion {
            subject_name: self.subject_name.clone(),
            subject_zone: zone.into(),
            context: context.into(),
            content: self.content.clone(),
            signatures: self.signatures.clone(),
        }
    }
}

impl Signed for Assertion {
    fn signatures(&self) -> &[Signature] {
        &self.signatures
    }
}

//------------ Shard ---------------------------------------------------------

/// A signed interval of a zone listing every assertion within it.
///
/// The range bounds are exclusive; an empty string leaves that side of the
/// range open.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Shard {
    /// The zone the shard belongs to.
    pub subject_zone: String,

    /// The namespace context the shard is valid in.
    pub context: String,

    /// Exclusive lower bound of the covered names, empty if open.
    pub range_from: String,

    /// Exclusive upper bound of the covered names, empty if open.
    pub range_to: String,

    /// The contained assertions, sorted by subject name.
    pub content: Vec<Assertion>,

    /// The signatures vouching for the shard.
    pub signatures: Vec<Signature>,
}

impl Shard {
    /// Returns whether `subject` falls strictly inside the shard's range.
    pub fn in_range(&self, subject: &str) -> bool {
        (self.range_from.is_empty() || subject > self.range_from.as_str())
            && (self.range_to.is_empty() || subject < self.range_to.as_str())
    }

    /// Returns whether the shard's range intersects the given interval.
    pub fn intersects(&self, interval: &NameInterval) -> bool {
        let above_from = match interval.end() {
            Some(end) => {
                self.range_from.is_empty() || end > self.range_from.as_str()
            }
            None => true,
        };
        let below_to = match interval.begin() {
            Some(begin) => {
                self.range_to.is_empty() || begin < self.range_to.as_str()
            }
            None => true,
        };
        above_from && below_to
    }

    /// Returns whether the contained assertions are sorted and in range.
    pub fn is_well_formed(&self) -> bool {
        self.content
            .windows(2)
            .all(|pair| pair[0].subject_name <= pair[1].subject_name)
            && self
                .content
                .iter()
                .all(|assertion| self.in_range(&assertion.subject_name))
    }

    /// Returns the contained assertions matching a subject and object types.
    pub fn assertions_by_name_and_types(
        &self,
        subject: &str,
        types: &[ObjectType],
    ) -> Vec<&Assertion> {
        self.content
            .iter()
            .filter(|assertion| {
                assertion.subject_name == subject
                    && types
                        .iter()
                        .any(|&object_type| assertion.contains_type(object_type))
            })
            .collect()
    }

    /// Returns a copy with context and zone replaced.
    pub fn copy_with(&self, context: &str, zone: &str) -> Shard {
        Shard {
            subject_zone: zone.into(),
            context: context.into(),
            range_from: self.range_from.clone(),
            range_to: self.range_to.clone(),
            content: self.content.clone(),
            signatures: self.signatures.clone(),
        }
    }
}

impl Signed for Shard {
    fn signatures(&self) -> &[Signature] {
        &self.signatures
    }
}

//------------ Zone ----------------------------------------------------------

/// A signed complete enumeration of a zone.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Zone {
    /// The enumerated zone.
    pub subject_zone: String,

    /// The namespace context the zone is valid in.
    pub context: String,

    /// The contained assertions and shards.
    pub content: Vec<ZoneContent>,

    /// The signatures vouching for the zone.
    pub signatures: Vec<Signature>,
}

/// One element of a zone's content.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum ZoneContent {
    /// A directly contained assertion.
    Assertion(Assertion),

    /// A contained shard.
    Shard(Shard),
}

impl Zone {
    /// Returns the contained assertions and shards matching a subject and
    /// object types.
    ///
    /// Assertions are matched on subject name and type; shards are matched
    /// on their range containing the subject.
    pub fn sections_by_name_and_types(
        &self,
        subject: &str,
        types: &[ObjectType],
    ) -> (Vec<&Assertion>, Vec<&Shard>) {
        let mut assertions = Vec::new();
        let mut shards = Vec::new();
        for content in &self.content {
            match content {
                ZoneContent::Assertion(assertion) => {
                    if assertion.subject_name == subject
                        && types.iter().any(|&object_type| {
                            assertion.contains_type(object_type)
                        })
                    {
                        assertions.push(assertion);
                    }
                }
                ZoneContent::Shard(shard) => {
                    if shard.in_range(subject) {
                        assertions.extend(
                            shard.assertions_by_name_and_types(subject, types),
                        );
                        shards.push(shard);
                    }
                }
            }
        }
        (assertions, shards)
    }

    /// Returns whether the zone lists an assertion for `subject`.
    pub fn contains_subject(&self, subject: &str) -> bool {
        self.content.iter().any(|content| match content {
            ZoneContent::Assertion(assertion) => {
                assertion.subject_name == subject
            }
            ZoneContent::Shard(shard) => shard
                .content
                .iter()
                .any(|assertion| assertion.subject_name == subject),
        })
    }
}

impl Signed for Zone {
    fn signatures(&self) -> &[Signature] {
        &self.signatures
    }
}

//------------ AddressAssertion ----------------------------------------------

/// A signed binding of an address prefix to object values.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct AddressAssertion {
    /// The asserted prefix.
    pub subject_addr: IpNet,

    /// The namespace context the assertion is valid in.
    pub context: String,

    /// The asserted object values.
    pub content: Vec<Object>,

    /// The signatures vouching for the assertion.
    pub signatures: Vec<Signature>,
}

impl Signed for AddressAssertion {
    fn signatures(&self) -> &[Signature] {
        &self.signatures
    }
}

//------------ AddressZone ---------------------------------------------------

/// A signed enumeration of the address assertions within a prefix.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct AddressZone {
    /// The enumerated prefix.
    pub subject_addr: IpNet,

    /// The namespace context the zone is valid in.
    pub context: String,

    /// The contained address assertions.
    pub content: Vec<AddressAssertion>,

    /// The signatures vouching for the zone.
    pub signatures: Vec<Signature>,
}

impl Signed for AddressZone {
    fn signatures(&self) -> &[Signature] {
        &self.signatures
    }
}

//------------ Section -------------------------------------------------------

/// A signed section as it travels through the engine.
#[derive(Clone, Debug)]
pub enum Section {
    /// An assertion.
    Assertion(Arc<Assertion>),

    /// A shard.
    Shard(Arc<Shard>),

    /// A zone.
    Zone(Arc<Zone>),

    /// An address assertion.
    AddressAssertion(Arc<AddressAssertion>),

    /// An address zone.
    AddressZone(Arc<AddressZone>),
}

impl Section {
    /// The first second at which any signature is valid.
    pub fn valid_since(&self) -> i64 {
        match self {
            Section::Assertion(section) => section.valid_since(),
            Section::Shard(section) => section.valid_since(),
            Section::Zone(section) => section.valid_since(),
            Section::AddressAssertion(section) => section.valid_since(),
            Section::AddressZone(section) => section.valid_since(),
        }
    }

    /// The last second at which any signature is valid.
    pub fn valid_until(&self) -> i64 {
        match self {
            Section::Assertion(section) => section.valid_until(),
            Section::Shard(section) => section.valid_until(),
            Section::Zone(section) => section.valid_until(),
            Section::AddressAssertion(section) => section.valid_until(),
            Section::AddressZone(section) => section.valid_until(),
        }
    }
}

//------------ MsgSection ----------------------------------------------------

/// Any section of a RAINS message, signed or not.
///
/// This is what goes over the outbound port: answers carry signed sections,
/// forwarded lookups carry queries, errors carry notifications.
#[derive(Clone, Debug)]
pub enum MsgSection {
    /// An assertion.
    Assertion(Arc<Assertion>),

    /// A shard.
    Shard(Arc<Shard>),

    /// A zone.
    Zone(Arc<Zone>),

    /// An address assertion.
    AddressAssertion(Arc<AddressAssertion>),

    /// An address zone.
    AddressZone(Arc<AddressZone>),

    /// A query for a name.
    Query(Arc<Query>),

    /// A query for an address prefix.
    AddressQuery(Arc<AddressQuery>),

    /// A notification.
    Notification(Arc<Notification>),
}

impl From<Section> for MsgSection {
    fn from(section: Section) -> Self {
        match section {
            Section::Assertion(section) => MsgSection::Assertion(section),
            Section::Shard(section) => MsgSection::Shard(section),
            Section::Zone(section) => MsgSection::Zone(section),
            Section::AddressAssertion(section) => {
                MsgSection::AddressAssertion(section)
            }
            Section::AddressZone(section) => MsgSection::AddressZone(section),
        }
    }
}

//============ Tests =========================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::base::signature::{KeySpace, SignatureAlgorithm};
    use bytes::Bytes;

    fn signature(valid_since: i64, valid_until: i64) -> Signature {
        Signature {
            key_space: KeySpace::Rains,
            algorithm: SignatureAlgorithm::Ed25519,
            key_phase: 0,
            valid_since,
            valid_until,
            data: Bytes::new(),
        }
    }

    fn assertion(subject: &str) -> Assertion {
        Assertion {
            subject_name: subject.into(),
            subject_zone: "a.".into(),
            context: ".".into(),
            content: vec![Object::Registrant("someone".into())],
            signatures: vec![signature(0, 100)],
        }
    }

    #[test]
    fn validity_spans_all_signatures() {
        let mut section = assertion("foo");
        section.signatures = vec![signature(10, 50), signature(5, 80)];
        assert_eq!(section.valid_since(), 5);
        assert_eq!(section.valid_until(), 80);
    }

    #[test]
    fn shard_range_is_exclusive() {
        let shard = Shard {
            subject_zone: "a.".into(),
            context: ".".into(),
            range_from: "b".into(),
            range_to: "f".into(),
            content: Vec::new(),
            signatures: vec![signature(0, 100)],
        };
        assert!(shard.in_range("c"));
        assert!(!shard.in_range("b"));
        assert!(!shard.in_range("f"));
        assert!(!shard.in_range("g"));
    }

    #[test]
    fn shard_open_bounds() {
        let shard = Shard {
            subject_zone: "a.".into(),
            context: ".".into(),
            range_from: String::new(),
            range_to: String::new(),
            content: Vec::new(),
            signatures: vec![signature(0, 100)],
        };
        assert!(shard.in_range("anything"));
        assert!(shard.intersects(&NameInterval::point("zz")));
    }

    #[test]
    fn shard_interval_intersection() {
        let shard = Shard {
            subject_zone: "a.".into(),
            context: ".".into(),
            range_from: "b".into(),
            range_to: "f".into(),
            content: Vec::new(),
            signatures: vec![signature(0, 100)],
        };
        assert!(shard.intersects(&NameInterval::point("c")));
        assert!(!shard.intersects(&NameInterval::point("a")));
        assert!(!shard.intersects(&NameInterval::point("g")));
        assert!(shard.intersects(&NameInterval::range(
            Some("e".into()),
            Some("x".into())
        )));
        assert!(!shard.intersects(&NameInterval::range(
            Some("f".into()),
            Some("x".into())
        )));
    }

    #[test]
    fn shard_well_formedness() {
        let mut shard = Shard {
            subject_zone: "a.".into(),
            context: ".".into(),
            range_from: "b".into(),
            range_to: "f".into(),
            content: vec![assertion("c"), assertion("d")],
            signatures: vec![signature(0, 100)],
        };
        assert!(shard.is_well_formed());
        shard.content.reverse();
        assert!(!shard.is_well_formed());
        shard.content = vec![assertion("z")];
        assert!(!shard.is_well_formed());
    }

    #[test]
    fn zone_lookup_prefers_assertions() {
        let zone = Zone {
            subject_zone: "a.".into(),
            context: ".".into(),
            content: vec![
                ZoneContent::Assertion(assertion("foo")),
                ZoneContent::Shard(Shard {
                    subject_zone: "a.".into(),
                    context: ".".into(),
                    range_from: "e".into(),
                    range_to: "h".into(),
                    content: vec![assertion("foo")],
                    signatures: vec![signature(0, 100)],
                }),
            ],
            signatures: vec![signature(0, 100)],
        };
        let (assertions, shards) = zone
            .sections_by_name_and_types("foo", &[ObjectType::Registrant]);
        assert_eq!(assertions.len(), 2);
        assert_eq!(shards.len(), 1);
        assert!(zone.contains_subject("foo"));
        assert!(!zone.contains_subject("bar"));
    }
}
