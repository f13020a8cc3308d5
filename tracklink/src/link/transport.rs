//! Transport contract
//!
//! The supervisor does not know how bytes reach a broker. It only needs to
//! open a session against an address, subscribe, and end it. Whatever
//! happens afterwards is reported asynchronously as `SessionEvent`s on a
//! channel handed to the transport when it was created.
//!
//! Every session gets a `SessionId` from the supervisor, and every event
//! carries it, so that late events from a session which has already been
//! torn down can be recognized and discarded.

use num_enum::{IntoPrimitive, TryFromPrimitive};
use std::io;
use std::time::Duration;
use thiserror::Error;

use super::mqtt::ConnectReturnCode;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(pub u64);

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Delivery guarantee requested for a subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
#[derive(TryFromPrimitive, IntoPrimitive)]
pub enum QoS {
    AtMostOnce = 0,
    AtLeastOnce = 1,
    ExactlyOnce = 2,
}

/// Fixed parameters of a transport session.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionOptions {
    /// Maximum silence before the client pings the broker.
    pub keep_alive: Duration,
    /// Ask the broker to discard any previous session state.
    pub clean_session: bool,
    /// Delay between the transport's own reconnection attempts.
    pub reconnect_period: Duration,
    /// Bound on establishing the connection, handshake included.
    pub connect_timeout: Duration,
    /// Unique per session, to avoid broker-side identifier collisions.
    pub client_id: String,
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum TransportError {
    #[error("unsupported broker address '{0}'")]
    UnsupportedAddress(String),

    #[error("connection refused: {0}")]
    Refused(String),

    #[error("timed out")]
    Timeout,

    #[error("connection dropped: {0}")]
    Dropped(String),

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("broker rejected the connection: {0:?}")]
    Rejected(ConnectReturnCode),
}

impl TransportError {
    pub fn from_io(err: &io::Error) -> TransportError {
        match err.kind() {
            io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock => TransportError::Timeout,
            io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::BrokenPipe
            | io::ErrorKind::UnexpectedEof => TransportError::Dropped(err.to_string()),
            _ => TransportError::Refused(err.to_string()),
        }
    }
}

/// What a transport session reports.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    /// Handshake with the broker completed.
    Connected,
    /// A connection attempt failed.
    Error(TransportError),
    /// The transport is retrying on its own.
    Reconnecting,
    /// An established connection went away.
    Offline,
    /// A message was published on a subscribed topic.
    Message { topic: String, payload: Vec<u8> },
}

#[derive(Debug, Clone, PartialEq)]
pub struct SessionEvent {
    pub session: SessionId,
    pub event: TransportEvent,
}

/// A live session against one broker.
pub trait Session {
    /// Requests a subscription. The request is fire-and-forget: it is queued
    /// until the session is connected.
    fn subscribe(&mut self, topic: &str, qos: QoS) -> Result<(), TransportError>;

    /// Tears the session down. Calling it more than once is harmless.
    fn end(&mut self);
}

/// Factory of sessions.
pub trait Transport {
    type Session: Session;

    /// Starts a new session. This never blocks on the network; an `Err` is
    /// only returned when the session cannot even be started (e.g. the
    /// address is not something this transport understands).
    fn open(
        &mut self,
        id: SessionId,
        address: &str,
        options: &SessionOptions,
    ) -> Result<Self::Session, TransportError>;
}
