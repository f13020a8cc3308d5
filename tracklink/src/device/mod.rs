//! Devices
//!
//! Reconciles position reports and presence rosters into one table of
//! last-known device state, and drives a `RenderSurface` accordingly.

mod annotation;
mod payload;
mod record;
mod registry;
mod surface;

pub use annotation::{hue_for, Annotation};
pub use payload::{PayloadError, PresencePayload, Telemetry};
pub use record::{DeviceId, DeviceRecord};
pub use registry::{DeviceRegistry, PresenceUpdate, RegistrySnapshot, TelemetryUpdate};
pub use surface::{CallSink, Placement, RenderSurface, SurfaceCall};
