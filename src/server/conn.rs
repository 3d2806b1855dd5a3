//! Connection information and the switchboard ports.
//!
//! The engine does not own sockets. Inbound, the switchboard hands it typed
//! messages together with the sender's connection information; outbound, the
//! engine talks to the [`Switchboard`] trait, which the connection layer
//! implements on top of its framed TLS streams. Send failures stay on the
//! switchboard side: the engine treats sending as fire and forget and relies
//! on pending-entry deadlines for cleanup.

use crate::base::notification::{Notification, NotificationCode};
use crate::base::query::QuerySection;
use crate::base::section::{MsgSection, Section};
use crate::base::token::Token;
use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;

//------------ Protocol ------------------------------------------------------

/// The transport protocol of a connection.
#[derive(Clone, Copy, Debug, Default, Eq, Hash, PartialEq)]
pub enum Protocol {
    /// TLS over TCP.
    #[default]
    Tcp,
}

//------------ ConnInfo ------------------------------------------------------

/// Address information for one peer of a connection.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub struct ConnInfo {
    /// The transport protocol.
    pub protocol: Protocol,

    /// The peer's address.
    pub addr: SocketAddr,
}

impl ConnInfo {
    /// Creates TCP connection information for the given address.
    pub fn tcp(addr: SocketAddr) -> Self {
        ConnInfo {
            protocol: Protocol::Tcp,
            addr,
        }
    }
}

impl fmt::Display for ConnInfo {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        self.addr.fmt(f)
    }
}

//------------ Switchboard ---------------------------------------------------

/// The outbound port towards the connection layer.
///
/// Implementations frame the sections into a message and hand it to the
/// connection owning `target`, opening one if necessary. Transport errors
/// are logged by the switchboard and not reported back.
pub trait Switchboard: Send + Sync + 'static {
    /// Sends sections to a target, correlated by `token`.
    fn send(&self, target: &ConnInfo, sections: Vec<MsgSection>, token: Token);

    /// Sends a single notification to a target.
    fn notify(
        &self,
        target: &ConnInfo,
        token: Token,
        code: NotificationCode,
        data: &str,
    ) {
        self.send(
            target,
            vec![MsgSection::Notification(Arc::new(Notification {
                token,
                code,
                data: data.into(),
            }))],
            token,
        );
    }
}

//------------ SectionMessage ------------------------------------------------

/// A signed section together with its sender and token.
#[derive(Clone, Debug)]
pub struct SectionMessage {
    /// Where the section came from.
    pub sender: ConnInfo,

    /// The section itself, signatures already verified.
    pub section: Section,

    /// The token of the carrying message.
    pub token: Token,
}

//------------ QueryMessage --------------------------------------------------

/// A query together with its sender and token.
#[derive(Clone, Debug)]
pub struct QueryMessage {
    /// Where the query came from.
    pub sender: ConnInfo,

    /// The query itself.
    pub query: QuerySection,

    /// The token of the carrying message.
    pub token: Token,
}

//------------ NotificationMessage -------------------------------------------

/// A notification together with its sender.
#[derive(Clone, Debug)]
pub struct NotificationMessage {
    /// Where the notification came from.
    pub sender: ConnInfo,

    /// The notification itself.
    pub notification: Arc<Notification>,

    /// The token of the carrying message.
    pub token: Token,
}
