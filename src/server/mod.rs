//! Ambient server plumbing.
//!
//! Everything the engine needs from its surroundings lives here: the
//! [configuration][config], [connection information and the outbound
//! port][conn] towards the switchboard, the [inbox] queues feeding worker
//! tasks, and the [clock and resource monitor][monitor].

pub mod config;
pub mod conn;
pub mod inbox;
pub mod monitor;

pub use self::config::Config;
pub use self::conn::{
    ConnInfo, NotificationMessage, Protocol, QueryMessage, SectionMessage,
    Switchboard,
};
pub use self::inbox::{Inbox, InboxSenders};
pub use self::monitor::{Clock, FakeClock, ResourceMonitor, SystemClock};
