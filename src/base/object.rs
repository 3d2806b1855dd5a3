//! Typed object values.
//!
//! The content of an assertion is a list of objects, each a tagged value.
//! The tag doubles as the lookup type of queries: a query asks for a name's
//! objects of particular types.

use super::signature::PublicKey;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::{Ipv4Addr, Ipv6Addr};

//------------ ObjectType ----------------------------------------------------

/// The type tag of an object value.
///
/// The discriminants are the wire numbers of the RAINS data model. The
/// ordering of the enum follows the wire numbers so assertion content can be
/// kept sorted by type.
#[derive(
    Clone,
    Copy,
    Debug,
    Deserialize,
    Eq,
    Hash,
    Ord,
    PartialEq,
    PartialOrd,
    Serialize,
)]
pub enum ObjectType {
    /// An associated name.
    Name = 1,

    /// An IPv6 address.
    Ip6 = 2,

    /// An IPv4 address.
    Ip4 = 3,

    /// A redirection to another name's resolution.
    Redirection = 4,

    /// A delegation of signing authority.
    Delegation = 5,

    /// A service information record.
    ServiceInfo = 8,

    /// The registrar of the name.
    Registrar = 9,

    /// The registrant of the name.
    Registrant = 10,
}

impl ObjectType {
    /// The smallest object type in wire-number order.
    pub const MIN: ObjectType = ObjectType::Name;
}

impl fmt::Display for ObjectType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ObjectType::Name => f.write_str("name"),
            ObjectType::Ip6 => f.write_str("ip6"),
            ObjectType::Ip4 => f.write_str("ip4"),
            ObjectType::Redirection => f.write_str("redir"),
            ObjectType::Delegation => f.write_str("deleg"),
            ObjectType::ServiceInfo => f.write_str("srv"),
            ObjectType::Registrar => f.write_str("regr"),
            ObjectType::Registrant => f.write_str("regt"),
        }
    }
}

//------------ ServiceInfo ---------------------------------------------------

/// Connection information for a named service.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct ServiceInfo {
    /// The name the service is reachable under.
    pub name: String,

    /// The transport port of the service.
    pub port: u16,

    /// Selection priority, lower is preferred.
    pub priority: u16,
}

//------------ Object --------------------------------------------------------

/// A typed object value.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub enum Object {
    /// An associated name.
    Name(String),

    /// An IPv6 address.
    Ip6(Ipv6Addr),

    /// An IPv4 address.
    Ip4(Ipv4Addr),

    /// The fully qualified name resolution continues at.
    Redirection(String),

    /// A public key authorizing signatures within the subject zone.
    Delegation(PublicKey),

    /// Connection information for a service.
    ServiceInfo(ServiceInfo),

    /// The registrar of the name.
    Registrar(String),

    /// The registrant of the name.
    Registrant(String),
}

impl Object {
    /// Returns the type tag of the value.
    pub fn object_type(&self) -> ObjectType {
        match self {
            Object::Name(_) => ObjectType::Name,
            Object::Ip6(_) => ObjectType::Ip6,
            Object::Ip4(_) => ObjectType::Ip4,
            Object::Redirection(_) => ObjectType::Redirection,
            Object::Delegation(_) => ObjectType::Delegation,
            Object::ServiceInfo(_) => ObjectType::ServiceInfo,
            Object::Registrar(_) => ObjectType::Registrar,
            Object::Registrant(_) => ObjectType::Registrant,
        }
    }
}

//============ Tests =========================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn type_order_follows_wire_numbers() {
        assert!(ObjectType::Name < ObjectType::Ip6);
        assert!(ObjectType::Ip6 < ObjectType::Ip4);
        assert!(ObjectType::Delegation < ObjectType::ServiceInfo);
    }

    #[test]
    fn object_reports_its_type() {
        assert_eq!(
            Object::Ip4(Ipv4Addr::new(1, 2, 3, 4)).object_type(),
            ObjectType::Ip4
        );
        assert_eq!(
            Object::Redirection("ns1.b.".into()).object_type(),
            ObjectType::Redirection
        );
    }
}
