//! The RAINS data model.
//!
//! This module collects the types that sections of a RAINS message are made
//! of: dotted [names][name], opaque correlation [tokens][token], typed
//! [object values][object], [signatures][signature] and the public keys they
//! are made with, the [section taxonomy][section] itself, [queries][query],
//! and [notifications][notification].
//!
//! All types here are plain data. Time is carried as unix seconds stamped by
//! the signature verifier; nothing in this module reads a clock.

pub mod name;
pub mod notification;
pub mod object;
pub mod query;
pub mod section;
pub mod signature;
pub mod token;

pub use self::name::{NameError, NameInterval};
pub use self::notification::{Notification, NotificationCode};
pub use self::object::{Object, ObjectType, ServiceInfo};
pub use self::query::{AddressQuery, Query, QueryOpt, QueryOpts, QuerySection};
pub use self::section::{
    AddressAssertion, AddressZone, Assertion, MsgSection, Section, Shard,
    Signed, Zone, ZoneContent,
};
pub use self::signature::{KeySpace, PublicKey, Signature, SignatureAlgorithm};
pub use self::token::Token;
