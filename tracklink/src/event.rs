//! Status events
//!
//! The library never prints. Anything worth telling the user (connection
//! indicator changes, failover decisions, dropped payloads) is pushed as an
//! `Event` into an optional, user supplied channel. Tools decide what to
//! log and how.

use crate::device::{DeviceId, PayloadError};
use crate::link::{EndpointError, SessionId, StatusUpdate, TransportError};

use crossbeam::channel;
use std::time::Duration;

#[derive(Debug)]
pub enum Event {
    /// New contents for the connection indicator.
    Status(StatusUpdate),
    SessionOpened {
        session: SessionId,
        index: usize,
        client_id: String,
    },
    SessionClosed {
        session: SessionId,
        index: usize,
    },
    TransportFailed {
        index: usize,
        error: TransportError,
    },
    Subscribed(String),
    SubscribeFailed {
        topic: String,
        error: TransportError,
    },
    RotationScheduled {
        from: usize,
        delay: Duration,
    },
    /// A rotation was requested while one was already pending.
    RotationAlreadyPending,
    RotationCancelled,
    Rotating {
        from: usize,
        to: usize,
    },
    AutoRotateSuspended {
        index: usize,
        cooldown: Duration,
    },
    AutoRotateResumed,
    InvalidEndpoint(EndpointError),
    /// An event from a session which has already been torn down.
    StaleSessionEvent(SessionId),
    DeviceAdded(DeviceId),
    DeviceFocused(DeviceId),
    PresenceUpdated {
        listed: usize,
        online: usize,
    },
    MalformedPayload {
        topic: String,
        error: PayloadError,
    },
    UnknownTopic(String),
    Exiting,
}

/// Optional sink for `Event`s. A full or closed channel drops the event:
/// reporting must never stall the tracker.
#[derive(Debug, Clone, Default)]
pub struct EventQueue {
    dest: Option<channel::Sender<Event>>,
}

impl EventQueue {
    pub fn new(dest: Option<channel::Sender<Event>>) -> EventQueue {
        EventQueue { dest }
    }

    pub fn send(&self, event: Event) {
        if let Some(dest) = &self.dest {
            let _ = dest.try_send(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn full_or_closed_queue_drops_events() {
        let (tx, rx) = channel::bounded(1);
        let queue = EventQueue::new(Some(tx));
        queue.send(Event::Exiting);
        queue.send(Event::AutoRotateResumed);
        assert_eq!(rx.try_iter().count(), 1);
        drop(rx);
        queue.send(Event::Exiting);
        EventQueue::default().send(Event::Exiting);
    }
}
