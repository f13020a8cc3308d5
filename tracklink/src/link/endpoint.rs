//! Broker endpoints
//!
//! The broker pool is an ordered, immutable list. The position of an
//! endpoint in the list is its identity: rotation moves to the next index,
//! wrapping around at the end.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A broker the tracker can connect to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EndpointDescriptor {
    /// Broker address, e.g. `mqtt://broker.emqx.io:1883`
    pub address: String,
    /// Human readable name shown in status labels and the selector.
    pub name: String,
}

impl EndpointDescriptor {
    pub fn new(address: &str, name: &str) -> EndpointDescriptor {
        EndpointDescriptor {
            address: address.to_string(),
            name: name.to_string(),
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EndpointError {
    #[error("the endpoint list is empty")]
    Empty,

    #[error("endpoint index {index} out of range (pool has {count} endpoints)")]
    OutOfRange { index: usize, count: usize },
}

/// Non-empty ordered list of endpoints.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndpointList {
    endpoints: Vec<EndpointDescriptor>,
}

impl EndpointList {
    pub fn new(endpoints: Vec<EndpointDescriptor>) -> Result<EndpointList, EndpointError> {
        if endpoints.is_empty() {
            return Err(EndpointError::Empty);
        }
        Ok(EndpointList { endpoints })
    }

    /// The public brokers the tracker uses when nothing else is configured.
    pub fn default_pool() -> Vec<EndpointDescriptor> {
        vec![
            EndpointDescriptor::new("mqtt://test.mosquitto.org:1883", "Mosquitto Public"),
            EndpointDescriptor::new("mqtt://broker.emqx.io:1883", "EMQX Public"),
            EndpointDescriptor::new("mqtt://broker.hivemq.com:1883", "HiveMQ Public"),
        ]
    }

    pub fn len(&self) -> usize {
        self.endpoints.len()
    }

    /// Always false, kept for API symmetry with `len`.
    pub fn is_empty(&self) -> bool {
        self.endpoints.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&EndpointDescriptor> {
        self.endpoints.get(index)
    }

    /// Validates an index coming from outside (e.g. a manual selection).
    pub fn check(&self, index: usize) -> Result<&EndpointDescriptor, EndpointError> {
        self.endpoints.get(index).ok_or(EndpointError::OutOfRange {
            index,
            count: self.endpoints.len(),
        })
    }

    /// Index following `index` in rotation order.
    pub fn next_index(&self, index: usize) -> usize {
        (index + 1) % self.endpoints.len()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, EndpointDescriptor> {
        self.endpoints.iter()
    }
}

impl std::ops::Index<usize> for EndpointList {
    type Output = EndpointDescriptor;

    fn index(&self, index: usize) -> &EndpointDescriptor {
        &self.endpoints[index]
    }
}
