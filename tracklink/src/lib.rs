pub mod config;
pub mod device;
pub mod event;
pub mod link;
pub mod tracker;

pub use config::{ConfigError, TrackerConfig};
pub use device::{DeviceId, DeviceRegistry, RenderSurface};
pub use event::Event;
pub use link::ConnectionSupervisor;
pub use tracker::{Command, StartError, Tracker, TrackerHandle};
