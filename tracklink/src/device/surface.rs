//! Rendering surface capability
//!
//! The registry drives a map through this trait only. Markers are keyed by
//! device identifier; the surface remembers where it put them, so
//! `center_on` and `fit_bounds` refer to devices rather than coordinates.

use super::annotation::Annotation;
use super::record::DeviceId;

use crossbeam::channel;

/// Whether a marker is new or an existing one moved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Placement {
    Placed,
    Moved,
}

pub trait RenderSurface {
    fn place_or_move_marker(
        &mut self,
        id: &DeviceId,
        latitude: f64,
        longitude: f64,
        annotation: &Annotation,
        placement: Placement,
    );

    /// Clears the highlight of every device.
    fn remove_all_selection(&mut self);

    fn select(&mut self, id: &DeviceId);

    fn center_on(&mut self, id: &DeviceId, zoom: u8);

    /// Frames all `ids`, with `padding` expressed as a fraction of the
    /// bounding box.
    fn fit_bounds(&mut self, ids: &[DeviceId], padding: f64);

    /// Refreshes the online indicator of a device.
    fn mark_presence(&mut self, _id: &DeviceId, _present: bool) {}
}

/// A `RenderSurface` call, as data. Lets the surface live on another
/// thread, or be recorded.
#[derive(Debug, Clone, PartialEq)]
pub enum SurfaceCall {
    PlaceOrMoveMarker {
        id: DeviceId,
        latitude: f64,
        longitude: f64,
        annotation: Annotation,
        placement: Placement,
    },
    RemoveAllSelection,
    Select(DeviceId),
    CenterOn {
        id: DeviceId,
        zoom: u8,
    },
    FitBounds {
        ids: Vec<DeviceId>,
        padding: f64,
    },
    MarkPresence {
        id: DeviceId,
        present: bool,
    },
}

impl SurfaceCall {
    /// Replays this call on `surface`.
    pub fn apply<S: RenderSurface + ?Sized>(self, surface: &mut S) {
        match self {
            SurfaceCall::PlaceOrMoveMarker {
                id,
                latitude,
                longitude,
                annotation,
                placement,
            } => surface.place_or_move_marker(&id, latitude, longitude, &annotation, placement),
            SurfaceCall::RemoveAllSelection => surface.remove_all_selection(),
            SurfaceCall::Select(id) => surface.select(&id),
            SurfaceCall::CenterOn { id, zoom } => surface.center_on(&id, zoom),
            SurfaceCall::FitBounds { ids, padding } => surface.fit_bounds(&ids, padding),
            SurfaceCall::MarkPresence { id, present } => surface.mark_presence(&id, present),
        }
    }
}

/// Anything that can take a `SurfaceCall` is a surface.
pub trait CallSink {
    fn push_call(&mut self, call: SurfaceCall);
}

impl<T: CallSink> RenderSurface for T {
    fn place_or_move_marker(
        &mut self,
        id: &DeviceId,
        latitude: f64,
        longitude: f64,
        annotation: &Annotation,
        placement: Placement,
    ) {
        self.push_call(SurfaceCall::PlaceOrMoveMarker {
            id: id.clone(),
            latitude,
            longitude,
            annotation: annotation.clone(),
            placement,
        });
    }

    fn remove_all_selection(&mut self) {
        self.push_call(SurfaceCall::RemoveAllSelection);
    }

    fn select(&mut self, id: &DeviceId) {
        self.push_call(SurfaceCall::Select(id.clone()));
    }

    fn center_on(&mut self, id: &DeviceId, zoom: u8) {
        self.push_call(SurfaceCall::CenterOn {
            id: id.clone(),
            zoom,
        });
    }

    fn fit_bounds(&mut self, ids: &[DeviceId], padding: f64) {
        self.push_call(SurfaceCall::FitBounds {
            ids: ids.to_vec(),
            padding,
        });
    }

    fn mark_presence(&mut self, id: &DeviceId, present: bool) {
        self.push_call(SurfaceCall::MarkPresence {
            id: id.clone(),
            present,
        });
    }
}

/// Records calls in order.
impl CallSink for Vec<SurfaceCall> {
    fn push_call(&mut self, call: SurfaceCall) {
        self.push(call);
    }
}

/// Forwards calls to another thread. Calls are dropped once the receiving
/// side is gone.
impl CallSink for channel::Sender<SurfaceCall> {
    fn push_call(&mut self, call: SurfaceCall) {
        let _ = self.send(call);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn replay_through_channel() {
        let (mut tx, rx) = channel::unbounded::<SurfaceCall>();
        tx.select(&DeviceId::new("A"));
        tx.center_on(&DeviceId::new("A"), 15);
        tx.mark_presence(&DeviceId::new("A"), true);

        let mut recorded: Vec<SurfaceCall> = Vec::new();
        for call in rx.try_iter() {
            call.apply(&mut recorded);
        }
        assert_eq!(
            recorded,
            vec![
                SurfaceCall::Select(DeviceId::new("A")),
                SurfaceCall::CenterOn {
                    id: DeviceId::new("A"),
                    zoom: 15
                },
                SurfaceCall::MarkPresence {
                    id: DeviceId::new("A"),
                    present: true
                },
            ]
        );
    }
}
