//! Link
//!
//! Everything concerning the connection to the broker pool: the endpoint
//! list, the abstract transport contract, a concrete MQTT transport, and
//! the `ConnectionSupervisor` which keeps exactly one session alive and
//! rotates through the pool when a broker misbehaves.

pub mod client;
pub mod endpoint;
pub mod mqtt;
pub mod status;
pub mod supervisor;
pub mod timer;
pub mod transport;

pub use endpoint::{EndpointDescriptor, EndpointError, EndpointList};
pub use status::{EndpointChoice, StatusKind, StatusUpdate};
pub use supervisor::{ConnectionState, ConnectionSupervisor};
pub use timer::Timer;
pub use transport::{
    QoS, Session, SessionEvent, SessionId, SessionOptions, Transport, TransportError,
    TransportEvent,
};
