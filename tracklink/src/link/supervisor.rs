//! Connection supervisor
//!
//! Keeps exactly one transport session alive against one endpoint of the
//! pool. Failures schedule a rotation to the next endpoint after a delay;
//! a manual selection jumps straight to the chosen endpoint and suspends
//! automatic rotation for a cooldown period.
//!
//! The supervisor never reads the clock. Every operation which may arm or
//! fire a timer takes the current `Instant`, and the owner is expected to
//! call `poll_timers` no later than `next_deadline()`.

use super::endpoint::{EndpointDescriptor, EndpointError, EndpointList};
use super::status::{StatusKind, StatusUpdate};
use super::timer::Timer;
use super::transport::{
    QoS, Session, SessionEvent, SessionId, Transport, TransportError, TransportEvent,
};
use crate::config::{ConfigError, SessionParams, TrackerConfig};
use crate::event::{Event, EventQueue};

use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
}

pub struct ConnectionSupervisor<T: Transport> {
    endpoints: EndpointList,
    transport: T,
    params: SessionParams,
    topics: Vec<String>,
    rotation_delay: Duration,
    manual_cooldown: Duration,

    state: ConnectionState,
    current_index: usize,
    auto_rotate: bool,
    session: Option<(SessionId, T::Session)>,
    next_session_id: u64,

    /// Armed only while a rotation is scheduled and has not fired.
    rotation: Timer,
    /// Armed while a manual selection suspends automatic rotation.
    cooldown: Timer,

    events: EventQueue,
}

impl<T: Transport> ConnectionSupervisor<T> {
    pub fn new(
        transport: T,
        config: &TrackerConfig,
        events: EventQueue,
    ) -> Result<ConnectionSupervisor<T>, ConfigError> {
        config.validate()?;
        Ok(ConnectionSupervisor {
            endpoints: config.endpoint_list()?,
            transport,
            params: config.session.clone(),
            topics: config.topics.all(),
            rotation_delay: config.failover.rotation_delay(),
            manual_cooldown: config.failover.manual_cooldown(),
            state: ConnectionState::Disconnected,
            current_index: 0,
            auto_rotate: true,
            session: None,
            next_session_id: 1,
            rotation: Timer::new("rotation"),
            cooldown: Timer::new("cooldown"),
            events,
        })
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn current_index(&self) -> usize {
        self.current_index
    }

    pub fn current_endpoint(&self) -> &EndpointDescriptor {
        &self.endpoints[self.current_index]
    }

    pub fn endpoints(&self) -> &EndpointList {
        &self.endpoints
    }

    pub fn auto_rotate_enabled(&self) -> bool {
        self.auto_rotate
    }

    pub fn rotation_pending(&self) -> bool {
        self.rotation.is_armed()
    }

    pub fn rotation_deadline(&self) -> Option<Instant> {
        self.rotation.deadline()
    }

    pub fn cooldown_deadline(&self) -> Option<Instant> {
        self.cooldown.deadline()
    }

    /// Identifier of the live session, if any.
    pub fn session_id(&self) -> Option<SessionId> {
        self.session.as_ref().map(|(id, _)| *id)
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    /// True if events tagged with `session` come from the live session.
    pub fn is_current(&self, session: SessionId) -> bool {
        self.session_id() == Some(session)
    }

    /// Earliest instant at which `poll_timers` has something to do.
    pub fn next_deadline(&self) -> Option<Instant> {
        match (self.rotation.deadline(), self.cooldown.deadline()) {
            (Some(a), Some(b)) => Some(std::cmp::min(a, b)),
            (a, b) => a.or(b),
        }
    }

    fn status(&self, kind: StatusKind, label: String) {
        self.events.send(Event::Status(StatusUpdate::new(
            kind,
            label,
            &self.endpoints,
            self.current_index,
        )));
    }

    fn end_session(&mut self) {
        if let Some((session, mut handle)) = self.session.take() {
            handle.end();
            self.events.send(Event::SessionClosed {
                session,
                index: self.current_index,
            });
        }
    }

    /// Tears down any existing session and opens a new one to
    /// `endpoints[index]`. A transport which cannot even start the session
    /// is treated as if the session had reported an error.
    pub fn connect(&mut self, index: usize, now: Instant) -> Result<(), EndpointError> {
        let address = self.endpoints.check(index)?.address.clone();
        self.end_session();
        self.current_index = index;
        self.state = ConnectionState::Connecting;
        self.status(
            StatusKind::Reconnecting,
            format!("Connecting to {}...", self.endpoints[index].name),
        );

        let session = SessionId(self.next_session_id);
        self.next_session_id += 1;
        let options = self.params.options();
        match self.transport.open(session, &address, &options) {
            Ok(handle) => {
                self.session = Some((session, handle));
                self.events.send(Event::SessionOpened {
                    session,
                    index,
                    client_id: options.client_id,
                });
            }
            Err(err) => self.on_error(err, now),
        }
        Ok(())
    }

    /// Routes a session event. Lifecycle events are consumed here; message
    /// deliveries are handed back as `(topic, payload)`. Events from any
    /// session other than the live one are dropped.
    pub fn handle_event(&mut self, event: SessionEvent, now: Instant) -> Option<(String, Vec<u8>)> {
        if !self.is_current(event.session) {
            self.events.send(Event::StaleSessionEvent(event.session));
            return None;
        }
        match event.event {
            TransportEvent::Connected => self.on_connected(),
            TransportEvent::Error(err) => self.on_error(err, now),
            TransportEvent::Offline => self.on_offline(now),
            TransportEvent::Reconnecting => self.on_reconnecting(),
            TransportEvent::Message { topic, payload } => return Some((topic, payload)),
        }
        None
    }

    pub fn on_connected(&mut self) {
        self.state = ConnectionState::Connected;
        if let Some((_, handle)) = self.session.as_mut() {
            for topic in &self.topics {
                match handle.subscribe(topic, QoS::AtLeastOnce) {
                    Ok(()) => self.events.send(Event::Subscribed(topic.clone())),
                    Err(error) => self.events.send(Event::SubscribeFailed {
                        topic: topic.clone(),
                        error,
                    }),
                }
            }
        }
        if self.rotation.cancel() {
            self.events.send(Event::RotationCancelled);
        }
        self.status(
            StatusKind::Connected,
            format!("Connected to {}", self.current_endpoint().name),
        );
    }

    pub fn on_error(&mut self, error: TransportError, now: Instant) {
        self.events.send(Event::TransportFailed {
            index: self.current_index,
            error,
        });
        self.state = ConnectionState::Disconnected;
        self.status(
            StatusKind::Disconnected,
            format!("Error with {}", self.current_endpoint().name),
        );
        if self.auto_rotate {
            self.schedule_rotation(now);
        }
    }

    pub fn on_offline(&mut self, now: Instant) {
        self.state = ConnectionState::Disconnected;
        self.status(
            StatusKind::Disconnected,
            format!("Disconnected from {}", self.current_endpoint().name),
        );
        if self.auto_rotate {
            self.schedule_rotation(now);
        }
    }

    pub fn on_reconnecting(&mut self) {
        self.state = ConnectionState::Reconnecting;
        self.status(
            StatusKind::Reconnecting,
            format!("Reconnecting to {}...", self.current_endpoint().name),
        );
    }

    /// Arms the rotation timer unless a rotation is already pending.
    pub fn schedule_rotation(&mut self, now: Instant) {
        if self.rotation.arm_once(now + self.rotation_delay) {
            self.events.send(Event::RotationScheduled {
                from: self.current_index,
                delay: self.rotation_delay,
            });
        } else {
            self.events.send(Event::RotationAlreadyPending);
        }
    }

    /// Manual endpoint choice. Suspends automatic rotation until
    /// `manual_cooldown` after the most recent selection.
    pub fn select_endpoint(&mut self, index: usize, now: Instant) -> Result<(), EndpointError> {
        if let Err(err) = self.endpoints.check(index) {
            self.events.send(Event::InvalidEndpoint(err.clone()));
            return Err(err);
        }
        self.auto_rotate = false;
        if self.rotation.cancel() {
            self.events.send(Event::RotationCancelled);
        }
        self.connect(index, now)?;
        self.cooldown.arm(now + self.manual_cooldown);
        self.events.send(Event::AutoRotateSuspended {
            index,
            cooldown: self.manual_cooldown,
        });
        Ok(())
    }

    /// Fires every timer due at `now`.
    pub fn poll_timers(&mut self, now: Instant) {
        if self.cooldown.expire(now) {
            self.auto_rotate = true;
            self.events.send(Event::AutoRotateResumed);
            // A failure seen during the cooldown left nothing armed.
            if self.state == ConnectionState::Disconnected {
                self.schedule_rotation(now);
            }
        }
        if self.rotation.expire(now) {
            let from = self.current_index;
            let to = self.endpoints.next_index(from);
            self.events.send(Event::Rotating { from, to });
            // `to` is always in range.
            let _ = self.connect(to, now);
        }
    }

    /// Ends the live session, if any, and cancels all timers.
    pub fn shutdown(&mut self) {
        self.end_session();
        self.rotation.cancel();
        self.cooldown.cancel();
        self.state = ConnectionState::Disconnected;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::link::{SessionOptions, StatusKind};
    use crossbeam::channel;
    use std::cell::RefCell;
    use std::rc::Rc;

    #[derive(Default)]
    struct Log {
        opened: Vec<(SessionId, String)>,
        ended: Vec<SessionId>,
        subscribed: Vec<String>,
    }

    struct FakeSession {
        id: SessionId,
        log: Rc<RefCell<Log>>,
    }

    impl Session for FakeSession {
        fn subscribe(&mut self, topic: &str, _qos: QoS) -> Result<(), TransportError> {
            self.log.borrow_mut().subscribed.push(topic.to_string());
            Ok(())
        }
        fn end(&mut self) {
            self.log.borrow_mut().ended.push(self.id);
        }
    }

    struct FakeTransport {
        log: Rc<RefCell<Log>>,
    }

    impl Transport for FakeTransport {
        type Session = FakeSession;
        fn open(
            &mut self,
            id: SessionId,
            address: &str,
            _options: &SessionOptions,
        ) -> Result<FakeSession, TransportError> {
            if address.starts_with("wss://") {
                return Err(TransportError::UnsupportedAddress(address.to_string()));
            }
            self.log.borrow_mut().opened.push((id, address.to_string()));
            Ok(FakeSession {
                id,
                log: self.log.clone(),
            })
        }
    }

    fn supervisor() -> (
        ConnectionSupervisor<FakeTransport>,
        Rc<RefCell<Log>>,
        channel::Receiver<Event>,
    ) {
        let log = Rc::new(RefCell::new(Log::default()));
        let (tx, rx) = channel::unbounded();
        let sup = ConnectionSupervisor::new(
            FakeTransport { log: log.clone() },
            &TrackerConfig::default(),
            EventQueue::new(Some(tx)),
        )
        .unwrap();
        (sup, log, rx)
    }

    fn statuses(rx: &channel::Receiver<Event>) -> Vec<StatusUpdate> {
        rx.try_iter()
            .filter_map(|e| match e {
                Event::Status(s) => Some(s),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn connect_replaces_session() {
        let (mut sup, log, rx) = supervisor();
        let now = Instant::now();
        sup.connect(0, now).unwrap();
        assert_eq!(sup.state(), ConnectionState::Connecting);
        sup.connect(1, now).unwrap();
        assert_eq!(log.borrow().ended, vec![SessionId(1)]);
        assert_eq!(sup.session_id(), Some(SessionId(2)));
        assert_eq!(sup.current_index(), 1);

        let st = statuses(&rx);
        assert_eq!(st[1].kind, StatusKind::Reconnecting);
        assert_eq!(st[1].label, "Connecting to EMQX Public...");
    }

    #[test]
    fn connected_subscribes_and_offers_selector() {
        let (mut sup, log, rx) = supervisor();
        let now = Instant::now();
        sup.connect(2, now).unwrap();
        let id = sup.session_id().unwrap();
        let msg = sup.handle_event(
            SessionEvent {
                session: id,
                event: TransportEvent::Connected,
            },
            now,
        );
        assert!(msg.is_none());
        assert_eq!(sup.state(), ConnectionState::Connected);
        assert_eq!(
            log.borrow().subscribed,
            vec!["iotlab/gps/data", "iotlab/nodes/status"]
        );
        let last = statuses(&rx).pop().unwrap();
        assert_eq!(last.label, "Connected to HiveMQ Public");
        assert_eq!(last.active_index(), Some(2));
    }

    #[test]
    fn out_of_range_connect_is_rejected() {
        let (mut sup, log, _rx) = supervisor();
        let now = Instant::now();
        assert_eq!(
            sup.connect(3, now),
            Err(EndpointError::OutOfRange { index: 3, count: 3 })
        );
        assert_eq!(sup.state(), ConnectionState::Disconnected);
        assert!(log.borrow().opened.is_empty());
    }

    #[test]
    fn refused_open_counts_as_error() {
        let log = Rc::new(RefCell::new(Log::default()));
        let mut config = TrackerConfig::default();
        config.endpoints[0].address = "wss://test.mosquitto.org:8081/mqtt".into();
        let mut sup =
            ConnectionSupervisor::new(FakeTransport { log }, &config, EventQueue::default())
                .unwrap();
        let now = Instant::now();
        sup.connect(0, now).unwrap();
        assert_eq!(sup.state(), ConnectionState::Disconnected);
        assert_eq!(sup.session_id(), None);
        assert_eq!(sup.rotation_deadline(), Some(now + Duration::from_secs(5)));
        sup.poll_timers(now + Duration::from_secs(5));
        assert_eq!(sup.current_index(), 1);
        assert_eq!(sup.state(), ConnectionState::Connecting);
    }

    #[test]
    fn reconnecting_does_not_rotate() {
        let (mut sup, _log, _rx) = supervisor();
        let now = Instant::now();
        sup.connect(0, now).unwrap();
        sup.on_reconnecting();
        assert_eq!(sup.state(), ConnectionState::Reconnecting);
        assert!(!sup.rotation_pending());
        assert_eq!(sup.next_deadline(), None);
    }
}
