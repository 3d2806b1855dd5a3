//! The inbox.
//!
//! Inbound messages land on three bounded queues. The *priority* queue
//! carries sections answering an in-flight delegation key query, which must
//! not queue behind the bulk traffic they are needed to verify. The *normal*
//! queue carries everything with signatures attached and all queries. The
//! *notification* queue carries notifications. Each queue is served by its
//! own fixed-size pool of worker tasks calling into the engine; the engine's
//! entry points are re-entrant, so pool sizes are purely a throughput knob.

use crate::base::notification::Notification;
use crate::base::query::QuerySection;
use crate::base::section::Section;
use crate::base::token::Token;
use crate::engine::{Caches, Engine};
use crate::server::config::Config;
use crate::server::conn::{
    ConnInfo, NotificationMessage, QueryMessage, SectionMessage, Switchboard,
};
use crate::server::monitor::Clock;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tracing::error;

//------------ Event ---------------------------------------------------------

/// One unit of work on the normal queue.
#[derive(Clone, Debug)]
pub enum Event {
    /// A signed section to assert.
    Section(SectionMessage),

    /// A query to answer.
    Query(QueryMessage),
}

//------------ InboxSenders --------------------------------------------------

/// The switchboard-facing side of the inbox.
///
/// This is what the connection layer calls when a parsed and verified
/// message arrives.
#[derive(Clone)]
pub struct InboxSenders {
    /// The priority queue.
    prio: mpsc::Sender<SectionMessage>,

    /// The normal queue.
    normal: mpsc::Sender<Event>,

    /// The notification queue.
    notification: mpsc::Sender<NotificationMessage>,

    /// The caches, consulted to route key responses.
    caches: Arc<Caches>,
}

impl InboxSenders {
    /// Accepts a signed section from the switchboard.
    ///
    /// Sections answering a pending delegation key query jump to the
    /// priority queue.
    pub async fn on_section(
        &self,
        sender: ConnInfo,
        section: Section,
        token: Token,
    ) {
        let message = SectionMessage {
            sender,
            section,
            token,
        };
        if self.caches.pending_keys.contains_token(token) {
            if self.prio.send(message).await.is_err() {
                error!("priority queue closed, dropping section");
            }
        } else if self.normal.send(Event::Section(message)).await.is_err() {
            error!("normal queue closed, dropping section");
        }
    }

    /// Accepts a query from the switchboard.
    pub async fn on_query(
        &self,
        sender: ConnInfo,
        query: QuerySection,
        token: Token,
    ) {
        let message = QueryMessage {
            sender,
            query,
            token,
        };
        if self.normal.send(Event::Query(message)).await.is_err() {
            error!("normal queue closed, dropping query");
        }
    }

    /// Accepts a notification from the switchboard.
    pub async fn on_notification(
        &self,
        sender: ConnInfo,
        notification: Arc<Notification>,
        token: Token,
    ) {
        let message = NotificationMessage {
            sender,
            notification,
            token,
        };
        if self.notification.send(message).await.is_err() {
            error!("notification queue closed, dropping notification");
        }
    }

    /// A sender for re-enqueueing sections onto the normal queue.
    ///
    /// The engine uses this to give sections released from the pending key
    /// cache another pass.
    pub fn requeue(&self) -> mpsc::Sender<Event> {
        self.normal.clone()
    }
}

//------------ Inbox ---------------------------------------------------------

/// The receiving side of the inbox queues.
pub struct Inbox {
    /// The priority queue.
    prio: mpsc::Receiver<SectionMessage>,

    /// The normal queue.
    normal: mpsc::Receiver<Event>,

    /// The notification queue.
    notification: mpsc::Receiver<NotificationMessage>,

    /// Workers serving the priority queue.
    prio_workers: usize,

    /// Workers serving the normal queue.
    normal_workers: usize,

    /// Workers serving the notification queue.
    notification_workers: usize,
}

impl Inbox {
    /// Creates the queues with the buffer sizes of `config`.
    pub fn new(config: &Config, caches: Arc<Caches>) -> (Inbox, InboxSenders) {
        let (prio_tx, prio_rx) = mpsc::channel(config.prio_buffer_size);
        let (normal_tx, normal_rx) = mpsc::channel(config.normal_buffer_size);
        let (notification_tx, notification_rx) =
            mpsc::channel(config.notification_buffer_size);
        let inbox = Inbox {
            prio: prio_rx,
            normal: normal_rx,
            notification: notification_rx,
            prio_workers: config.prio_worker_count,
            normal_workers: config.normal_worker_count,
            notification_workers: config.notification_worker_count,
        };
        let senders = InboxSenders {
            prio: prio_tx,
            normal: normal_tx,
            notification: notification_tx,
            caches,
        };
        (inbox, senders)
    }

    /// Spawns the worker pools, consuming the inbox.
    pub fn spawn<S: Switchboard, C: Clock>(self, engine: Arc<Engine<S, C>>) {
        let prio = Arc::new(Mutex::new(self.prio));
        for _ in 0..self.prio_workers.max(1) {
            let engine = engine.clone();
            let prio = prio.clone();
            tokio::spawn(async move {
                loop {
                    let message = { prio.lock().await.recv().await };
                    match message {
                        Some(message) => engine.assert(message, false).await,
                        None => break,
                    }
                }
            });
        }
        let normal = Arc::new(Mutex::new(self.normal));
        for _ in 0..self.normal_workers.max(1) {
            let engine = engine.clone();
            let normal = normal.clone();
            tokio::spawn(async move {
                loop {
                    let event = { normal.lock().await.recv().await };
                    match event {
                        Some(Event::Section(message)) => {
                            engine.assert(message, false).await;
                        }
                        Some(Event::Query(message)) => {
                            engine.query(message).await;
                        }
                        None => break,
                    }
                }
            });
        }
        let notification = Arc::new(Mutex::new(self.notification));
        for _ in 0..self.notification_workers.max(1) {
            let engine = engine.clone();
            let notification = notification.clone();
            tokio::spawn(async move {
                loop {
                    let message = { notification.lock().await.recv().await };
                    match message {
                        Some(message) => engine.notification(message),
                        None => break,
                    }
                }
            });
        }
    }
}

//============ Tests =========================================================
