//! In-memory transport shared by the integration tests.

#![allow(dead_code)]

use tracklink::link::{
    QoS, Session, SessionEvent, SessionId, SessionOptions, Transport, TransportError,
    TransportEvent,
};
use tracklink::{Event, TrackerConfig};

use crossbeam::channel;
use std::cell::RefCell;
use std::rc::Rc;

#[derive(Debug, Default)]
pub struct Journal {
    /// (session, address, client id) for every session opened.
    pub opened: Vec<(SessionId, String, String)>,
    pub ended: Vec<SessionId>,
    pub subscribed: Vec<(SessionId, String, QoS)>,
    /// Addresses for which `open` fails synchronously.
    pub refuse: Vec<String>,
}

pub struct ScriptedSession {
    id: SessionId,
    journal: Rc<RefCell<Journal>>,
}

impl Session for ScriptedSession {
    fn subscribe(&mut self, topic: &str, qos: QoS) -> Result<(), TransportError> {
        self.journal
            .borrow_mut()
            .subscribed
            .push((self.id, topic.to_string(), qos));
        Ok(())
    }

    fn end(&mut self) {
        self.journal.borrow_mut().ended.push(self.id);
    }
}

#[derive(Clone, Default)]
pub struct ScriptedTransport {
    pub journal: Rc<RefCell<Journal>>,
}

impl Transport for ScriptedTransport {
    type Session = ScriptedSession;

    fn open(
        &mut self,
        id: SessionId,
        address: &str,
        options: &SessionOptions,
    ) -> Result<ScriptedSession, TransportError> {
        let mut journal = self.journal.borrow_mut();
        if journal.refuse.iter().any(|a| a == address) {
            return Err(TransportError::UnsupportedAddress(address.to_string()));
        }
        journal
            .opened
            .push((id, address.to_string(), options.client_id.clone()));
        Ok(ScriptedSession {
            id,
            journal: self.journal.clone(),
        })
    }
}

impl ScriptedTransport {
    pub fn last_session(&self) -> SessionId {
        self.journal.borrow().opened.last().unwrap().0
    }

    pub fn opened_addresses(&self) -> Vec<String> {
        self.journal
            .borrow()
            .opened
            .iter()
            .map(|(_, a, _)| a.clone())
            .collect()
    }
}

pub fn event(session: SessionId, event: TransportEvent) -> SessionEvent {
    SessionEvent { session, event }
}

pub fn message(session: SessionId, topic: &str, payload: &str) -> SessionEvent {
    SessionEvent {
        session,
        event: TransportEvent::Message {
            topic: topic.to_string(),
            payload: payload.as_bytes().to_vec(),
        },
    }
}

/// Pool of `n` local endpoints named `ep0`, `ep1`, ...
pub fn config(n: usize) -> TrackerConfig {
    let mut config = TrackerConfig::default();
    config.endpoints = (0..n)
        .map(|i| {
            tracklink::link::EndpointDescriptor::new(
                &format!("mqtt://127.0.0.1:{}", 20000 + i),
                &format!("ep{}", i),
            )
        })
        .collect();
    config
}

pub fn event_channel() -> (channel::Sender<Event>, channel::Receiver<Event>) {
    channel::unbounded()
}
