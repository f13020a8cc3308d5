//! Device registry
//!
//! Owns the table of last-known device state. Records are created by the
//! first telemetry from an unseen device, updated in place afterwards, and
//! never removed. Presence rosters only toggle the `present` flag of
//! devices already known.
//!
//! After each telemetry update the surface is focused on the device if it
//! is the active one, or if it is the only device and the user has not
//! moved the map by hand.

use super::annotation::Annotation;
use super::payload::{PayloadError, PresencePayload, Telemetry};
use super::record::{DeviceId, DeviceRecord};
use super::surface::{Placement, RenderSurface};
use crate::config::ViewSettings;

use chrono::{DateTime, Local};
use std::collections::{HashMap, HashSet};

/// Outcome of a telemetry update.
#[derive(Debug, Clone, PartialEq)]
pub struct TelemetryUpdate {
    pub id: DeviceId,
    pub placement: Placement,
    pub focused: bool,
}

/// Outcome of a presence update.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PresenceUpdate {
    /// Identifiers in the roster.
    pub listed: usize,
    /// Known devices now marked present.
    pub online: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RegistrySnapshot {
    pub records: Vec<DeviceRecord>,
    pub active_device: Option<DeviceId>,
    pub user_has_manually_navigated: bool,
}

pub struct DeviceRegistry {
    /// In order of first appearance.
    records: Vec<DeviceRecord>,
    index: HashMap<DeviceId, usize>,
    active: Option<DeviceId>,
    manually_navigated: bool,
    /// Most recent roster, applied to devices seen later.
    roster: HashSet<DeviceId>,
    view: ViewSettings,
}

impl DeviceRegistry {
    pub fn new(view: ViewSettings) -> DeviceRegistry {
        DeviceRegistry {
            records: Vec::new(),
            index: HashMap::new(),
            active: None,
            manually_navigated: false,
            roster: HashSet::new(),
            view,
        }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn get(&self, id: &DeviceId) -> Option<&DeviceRecord> {
        self.index.get(id).map(|&i| &self.records[i])
    }

    /// Records in order of first appearance.
    pub fn records(&self) -> &[DeviceRecord] {
        &self.records
    }

    pub fn active_device(&self) -> Option<&DeviceId> {
        self.active.as_ref()
    }

    pub fn user_has_manually_navigated(&self) -> bool {
        self.manually_navigated
    }

    pub fn snapshot(&self) -> RegistrySnapshot {
        RegistrySnapshot {
            records: self.records.clone(),
            active_device: self.active.clone(),
            user_has_manually_navigated: self.manually_navigated,
        }
    }

    /// Decodes and applies one telemetry payload. A payload which cannot be
    /// decoded changes nothing.
    pub fn apply_telemetry<S: RenderSurface + ?Sized>(
        &mut self,
        raw: &[u8],
        now: DateTime<Local>,
        surface: &mut S,
    ) -> Result<TelemetryUpdate, PayloadError> {
        let telemetry = Telemetry::decode(raw)?;
        Ok(self.update(telemetry, now, surface))
    }

    pub fn update<S: RenderSurface + ?Sized>(
        &mut self,
        telemetry: Telemetry,
        now: DateTime<Local>,
        surface: &mut S,
    ) -> TelemetryUpdate {
        let (slot, placement) = match self.index.get(&telemetry.id) {
            Some(&slot) => {
                let record = &mut self.records[slot];
                record.latitude = telemetry.latitude;
                record.longitude = telemetry.longitude;
                record.altitude = telemetry.altitude;
                record.satellite_count = telemetry.satellites;
                record.last_update = now;
                (slot, Placement::Moved)
            }
            None => {
                let slot = self.records.len();
                self.records.push(DeviceRecord {
                    present: self.roster.contains(&telemetry.id),
                    id: telemetry.id.clone(),
                    latitude: telemetry.latitude,
                    longitude: telemetry.longitude,
                    altitude: telemetry.altitude,
                    satellite_count: telemetry.satellites,
                    last_update: now,
                });
                self.index.insert(telemetry.id.clone(), slot);
                (slot, Placement::Placed)
            }
        };

        let record = &self.records[slot];
        surface.place_or_move_marker(
            &record.id,
            record.latitude,
            record.longitude,
            &Annotation::for_record(record),
            placement,
        );

        let id = telemetry.id;
        let is_active = self.active.as_ref() == Some(&id);
        let focused = if is_active || (!self.manually_navigated && self.records.len() == 1) {
            self.focus_on(&id, surface)
        } else {
            false
        };
        TelemetryUpdate {
            id,
            placement,
            focused,
        }
    }

    /// Decodes and applies one presence roster.
    pub fn apply_presence<S: RenderSurface + ?Sized>(
        &mut self,
        raw: &[u8],
        surface: &mut S,
    ) -> Result<PresenceUpdate, PayloadError> {
        let ids = PresencePayload::decode(raw)?.into_ids();
        Ok(self.update_presence(ids, surface))
    }

    pub fn update_presence<S: RenderSurface + ?Sized>(
        &mut self,
        ids: Vec<DeviceId>,
        surface: &mut S,
    ) -> PresenceUpdate {
        let listed = ids.len();
        self.roster = ids.into_iter().collect();
        let mut online = 0;
        for record in self.records.iter_mut() {
            record.present = self.roster.contains(&record.id);
            if record.present {
                online += 1;
            }
            surface.mark_presence(&record.id, record.present);
        }
        PresenceUpdate { listed, online }
    }

    /// Makes `id` the active device and centers the surface on it. Returns
    /// false, doing nothing, for an unknown device.
    pub fn focus_on<S: RenderSurface + ?Sized>(&mut self, id: &DeviceId, surface: &mut S) -> bool {
        if !self.index.contains_key(id) {
            return false;
        }
        self.active = Some(id.clone());
        surface.remove_all_selection();
        surface.select(id);
        surface.center_on(id, self.view.focus_zoom);
        true
    }

    /// Frames every known device and drops the active device. Returns
    /// false, doing nothing, when there are no devices.
    pub fn show_all<S: RenderSurface + ?Sized>(&mut self, surface: &mut S) -> bool {
        if self.records.is_empty() {
            return false;
        }
        let ids: Vec<DeviceId> = self.records.iter().map(|r| r.id.clone()).collect();
        surface.fit_bounds(&ids, self.view.fit_padding);
        surface.remove_all_selection();
        self.active = None;
        self.manually_navigated = false;
        true
    }

    /// The user moved or zoomed the map.
    pub fn on_user_manual_navigation(&mut self) {
        self.manually_navigated = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::SurfaceCall;

    fn registry() -> DeviceRegistry {
        DeviceRegistry::new(ViewSettings::default())
    }

    #[test]
    fn first_device_is_focused() {
        let mut reg = registry();
        let mut calls: Vec<SurfaceCall> = Vec::new();
        let now = Local::now();
        let up = reg
            .apply_telemetry(br#"{"mac":"A","lat":1,"lng":2}"#, now, &mut calls)
            .unwrap();
        assert_eq!(up.placement, Placement::Placed);
        assert!(up.focused);
        assert_eq!(reg.active_device(), Some(&DeviceId::new("A")));
        assert_eq!(calls.len(), 4);
        assert_eq!(calls[1], SurfaceCall::RemoveAllSelection);
        assert_eq!(calls[2], SurfaceCall::Select(DeviceId::new("A")));
        assert_eq!(
            calls[3],
            SurfaceCall::CenterOn {
                id: DeviceId::new("A"),
                zoom: 15
            }
        );
    }

    #[test]
    fn second_device_does_not_steal_focus() {
        let mut reg = registry();
        let mut calls: Vec<SurfaceCall> = Vec::new();
        let now = Local::now();
        reg.apply_telemetry(br#"{"mac":"A","lat":1,"lng":2}"#, now, &mut calls)
            .unwrap();
        calls.clear();
        let up = reg
            .apply_telemetry(br#"{"mac":"B","lat":3,"lng":4}"#, now, &mut calls)
            .unwrap();
        assert!(!up.focused);
        assert_eq!(calls.len(), 1);
        assert_eq!(reg.active_device(), Some(&DeviceId::new("A")));
    }

    #[test]
    fn malformed_telemetry_changes_nothing() {
        let mut reg = registry();
        let mut calls: Vec<SurfaceCall> = Vec::new();
        assert!(reg
            .apply_telemetry(b"garbage", Local::now(), &mut calls)
            .is_err());
        assert!(reg.is_empty());
        assert!(calls.is_empty());
    }

    #[test]
    fn late_device_inherits_roster() {
        let mut reg = registry();
        let mut calls: Vec<SurfaceCall> = Vec::new();
        let up = reg.apply_presence(br#"["B"]"#, &mut calls).unwrap();
        assert_eq!(up, PresenceUpdate { listed: 1, online: 0 });
        assert!(reg.is_empty());
        reg.apply_telemetry(br#"{"mac":"B","lat":1,"lng":2}"#, Local::now(), &mut calls)
            .unwrap();
        assert!(reg.get(&DeviceId::new("B")).unwrap().present);
    }

    #[test]
    fn focus_unknown_is_noop() {
        let mut reg = registry();
        let mut calls: Vec<SurfaceCall> = Vec::new();
        assert!(!reg.focus_on(&DeviceId::new("X"), &mut calls));
        assert!(calls.is_empty());
        assert_eq!(reg.active_device(), None);
    }
}
