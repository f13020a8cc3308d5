//! Connection indicator contents.

use super::endpoint::EndpointList;

/// Kind of connection indicator to show.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusKind {
    Connected,
    /// Covers both the initial connection and the transport's own retries.
    Reconnecting,
    Disconnected,
}

impl std::fmt::Display for StatusKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Connected => write!(f, "connected"),
            Self::Reconnecting => write!(f, "reconnecting"),
            Self::Disconnected => write!(f, "disconnected"),
        }
    }
}

/// One entry of the endpoint selector.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndpointChoice {
    pub index: usize,
    pub name: String,
    pub active: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusUpdate {
    pub kind: StatusKind,
    pub label: String,
    /// All configured endpoints with the active one marked. Only offered
    /// while connected.
    pub selector: Option<Vec<EndpointChoice>>,
}

impl StatusUpdate {
    pub fn new(kind: StatusKind, label: String, endpoints: &EndpointList, active: usize) -> Self {
        let selector = match kind {
            StatusKind::Connected => Some(
                endpoints
                    .iter()
                    .enumerate()
                    .map(|(index, ep)| EndpointChoice {
                        index,
                        name: ep.name.clone(),
                        active: index == active,
                    })
                    .collect(),
            ),
            _ => None,
        };
        StatusUpdate {
            kind,
            label,
            selector,
        }
    }

    /// Index of the active endpoint, if the selector is present.
    pub fn active_index(&self) -> Option<usize> {
        self.selector
            .as_ref()
            .and_then(|choices| choices.iter().find(|c| c.active).map(|c| c.index))
    }
}
