//! Notifications.

use super::token::Token;
use std::fmt;

//------------ NotificationCode ----------------------------------------------

/// The code of a notification.
///
/// The numeric values are wire level and must round trip unchanged.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum NotificationCode {
    /// A connection keep-alive.
    Heartbeat,

    /// The hash of a capability set is not known to the sender.
    CapHashNotKnown,

    /// The message could not be parsed.
    BadMessage,

    /// The received message is inconsistent with the receiver's state.
    RcvInconsistentMsg,

    /// No assertions exist for the queried name.
    NoAssertionsExist,

    /// The message exceeded the receiver's size limit.
    MsgTooLarge,

    /// An unspecified server error occurred.
    UnspecServerErr,

    /// The server does not support the requested capability.
    ServerNotCapable,

    /// No assertion is available to answer the query.
    NoAssertionAvail,
}

impl NotificationCode {
    /// Returns the wire value of the code.
    pub fn code(self) -> u16 {
        match self {
            NotificationCode::Heartbeat => 100,
            NotificationCode::CapHashNotKnown => 399,
            NotificationCode::BadMessage => 400,
            NotificationCode::RcvInconsistentMsg => 403,
            NotificationCode::NoAssertionsExist => 404,
            NotificationCode::MsgTooLarge => 413,
            NotificationCode::UnspecServerErr => 500,
            NotificationCode::ServerNotCapable => 501,
            NotificationCode::NoAssertionAvail => 504,
        }
    }

    /// Returns the code for a wire value.
    pub fn from_code(code: u16) -> Option<Self> {
        match code {
            100 => Some(NotificationCode::Heartbeat),
            399 => Some(NotificationCode::CapHashNotKnown),
            400 => Some(NotificationCode::BadMessage),
            403 => Some(NotificationCode::RcvInconsistentMsg),
            404 => Some(NotificationCode::NoAssertionsExist),
            413 => Some(NotificationCode::MsgTooLarge),
            500 => Some(NotificationCode::UnspecServerErr),
            501 => Some(NotificationCode::ServerNotCapable),
            504 => Some(NotificationCode::NoAssertionAvail),
            _ => None,
        }
    }
}

impl fmt::Display for NotificationCode {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{:?}({})", self, self.code())
    }
}

//------------ Notification --------------------------------------------------

/// A notification section.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Notification {
    /// The token of the message the notification refers to.
    pub token: Token,

    /// The notification code.
    pub code: NotificationCode,

    /// Optional additional text.
    pub data: String,
}

//============ Tests =========================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_round_trip() {
        for code in [
            NotificationCode::Heartbeat,
            NotificationCode::CapHashNotKnown,
            NotificationCode::BadMessage,
            NotificationCode::RcvInconsistentMsg,
            NotificationCode::NoAssertionsExist,
            NotificationCode::MsgTooLarge,
            NotificationCode::UnspecServerErr,
            NotificationCode::ServerNotCapable,
            NotificationCode::NoAssertionAvail,
        ] {
            assert_eq!(NotificationCode::from_code(code.code()), Some(code));
        }
        assert_eq!(NotificationCode::from_code(599), None);
    }

    #[test]
    fn reference_wire_values() {
        assert_eq!(NotificationCode::NoAssertionAvail.code(), 504);
        assert_eq!(NotificationCode::RcvInconsistentMsg.code(), 403);
        assert_eq!(NotificationCode::MsgTooLarge.code(), 413);
        assert_eq!(NotificationCode::BadMessage.code(), 400);
        assert_eq!(NotificationCode::UnspecServerErr.code(), 500);
        assert_eq!(NotificationCode::CapHashNotKnown.code(), 399);
    }
}
