//! tracklink-monitor
//!
//! Full screen terminal view of the tracked devices: connection status with
//! the endpoint selector, the device list with presence indicators, details
//! of the focused device, and a coarse map.
//!
//! Keys: 1-9 focus device, a show all, Tab next endpoint, arrows pan,
//! +/- zoom, q or Esc quit.

use tracklink::device::{hue_for, Annotation, DeviceId, Placement, RenderSurface};
use tracklink::link::{StatusKind, StatusUpdate};
use tracklink::{Event as TrackerEvent, TrackerHandle};
use tracklink_tools::{describe, endpoint_listing, parse_args, tracker_opts, Level};

use std::collections::HashMap;
use std::io::{stdout, Stdout, Write};
use std::process::ExitCode;
use std::{env, time::Duration};

use futures::{future::FutureExt, select, StreamExt};
use futures_timer::Delay;

use crossterm::{
    cursor::*,
    event::{Event, EventStream, KeyCode, KeyEvent, KeyModifiers},
    style::*,
    terminal::*,
    ExecutableCommand, QueueableCommand,
};

const MAX_ZOOM: u8 = 18;
const MAP_TOP: u16 = 14;

struct Marker {
    latitude: f64,
    longitude: f64,
    annotation: Annotation,
    present: bool,
}

/// Terminal rendition of the map.
struct MapView {
    /// In order of first appearance, for the 1-9 shortcuts.
    order: Vec<DeviceId>,
    markers: HashMap<DeviceId, Marker>,
    selected: Option<DeviceId>,
    center: (f64, f64),
    zoom: u8,
    status: Option<StatusUpdate>,
    message: String,
    dirty: bool,
}

impl MapView {
    fn new() -> MapView {
        MapView {
            order: Vec::new(),
            markers: HashMap::new(),
            selected: None,
            center: (0.0, 0.0),
            zoom: 2,
            status: None,
            message: String::new(),
            dirty: true,
        }
    }

    /// Degrees of longitude across `width` columns at the current zoom.
    fn span(&self) -> f64 {
        360.0 / f64::powi(2.0, self.zoom as i32)
    }

    fn pan(&mut self, dx: f64, dy: f64) {
        let step = self.span() / 4.0;
        self.center.0 = (self.center.0 + dy * step).clamp(-85.0, 85.0);
        self.center.1 = (self.center.1 + dx * step + 540.0) % 360.0 - 180.0;
        self.dirty = true;
    }

    fn zoom_by(&mut self, delta: i8) {
        self.zoom = (self.zoom as i16 + delta as i16).clamp(0, MAX_ZOOM as i16) as u8;
        self.dirty = true;
    }

    fn device_at(&self, slot: usize) -> Option<&DeviceId> {
        self.order.get(slot)
    }

    fn on_event(&mut self, event: &TrackerEvent) {
        if let TrackerEvent::Status(status) = event {
            self.status = Some(status.clone());
        } else {
            let (level, text) = describe(event);
            if level == Level::Info {
                self.message = text;
            }
        }
        self.dirty = true;
    }

    fn draw(&mut self, out: &mut Stdout) -> std::io::Result<()> {
        let (width, height) = size()?;
        out.queue(Clear(ClearType::All))?;

        out.queue(MoveTo(0, 0))?;
        match &self.status {
            Some(status) => {
                let color = match status.kind {
                    StatusKind::Connected => Color::Green,
                    StatusKind::Reconnecting => Color::Yellow,
                    StatusKind::Disconnected => Color::Red,
                };
                out.queue(SetForegroundColor(color))?;
                out.queue(Print(format!("● {}", status.label)))?;
                out.queue(ResetColor)?;
                if let Some(choices) = &status.selector {
                    out.queue(Print("   "))?;
                    for c in choices {
                        if c.active {
                            out.queue(Print(format!("[{}] ", c.name).reverse()))?;
                        } else {
                            out.queue(Print(format!(" {}  ", c.name)))?;
                        }
                    }
                }
            }
            None => {
                out.queue(Print("Starting..."))?;
            }
        }

        out.queue(MoveTo(0, 1))?;
        out.queue(Print(&self.message))?;

        for (slot, id) in self.order.iter().take(9).enumerate() {
            let marker = match self.markers.get(id) {
                Some(marker) => marker,
                None => continue,
            };
            out.queue(MoveTo(0, 3 + slot as u16))?;
            let cursor = if self.selected.as_ref() == Some(id) { ">" } else { " " };
            out.queue(Print(format!("{}{} ", cursor, slot + 1)))?;
            out.queue(SetForegroundColor(hue_color(id)))?;
            out.queue(Print(if marker.present { "●" } else { "○" }))?;
            out.queue(ResetColor)?;
            out.queue(Print(format!(
                " {:<10} {:>11.6} {:>11.6}",
                id.short_label(),
                marker.latitude,
                marker.longitude
            )))?;
        }

        if let Some(marker) = self.selected.as_ref().and_then(|id| self.markers.get(id)) {
            for (i, line) in marker.annotation.lines().iter().enumerate() {
                out.queue(MoveTo(44, 3 + i as u16))?;
                out.queue(Print(line))?;
            }
        }

        self.draw_map(out, width, height)?;
        out.queue(MoveTo(0, height.saturating_sub(1)))?;
        out.queue(Print(format!(
            "zoom {}  center {:.4},{:.4}   1-9 focus  a all  Tab endpoint  arrows/+/- move  q quit",
            self.zoom, self.center.0, self.center.1
        )))?;
        out.flush()?;
        self.dirty = false;
        Ok(())
    }

    fn draw_map(&self, out: &mut Stdout, width: u16, height: u16) -> std::io::Result<()> {
        if height <= MAP_TOP + 2 || width < 10 {
            return Ok(());
        }
        let rows = height - MAP_TOP - 2;
        let lon_span = self.span();
        // Terminal cells are about twice as tall as wide.
        let lat_span = lon_span * (rows as f64 * 2.0) / width as f64;
        out.queue(MoveTo(0, MAP_TOP))?;
        out.queue(Print("-".repeat(width as usize)))?;
        for (slot, id) in self.order.iter().enumerate() {
            let marker = match self.markers.get(id) {
                Some(marker) => marker,
                None => continue,
            };
            let x = (marker.longitude - self.center.1) / lon_span + 0.5;
            let y = 0.5 - (marker.latitude - self.center.0) / lat_span;
            if !(0.0..1.0).contains(&x) || !(0.0..1.0).contains(&y) {
                continue;
            }
            let col = (x * width as f64) as u16;
            let row = MAP_TOP + 1 + (y * rows as f64) as u16;
            out.queue(MoveTo(col, row))?;
            out.queue(SetForegroundColor(hue_color(id)))?;
            let glyph = if slot < 9 {
                char::from(b'1' + slot as u8)
            } else {
                '*'
            };
            if self.selected.as_ref() == Some(id) {
                out.queue(Print(glyph.reverse()))?;
            } else {
                out.queue(Print(glyph))?;
            }
            out.queue(ResetColor)?;
        }
        Ok(())
    }
}

/// Terminal approximation of the device's marker color.
fn hue_color(id: &DeviceId) -> Color {
    let h = hue_for(id) as f64 / 60.0;
    // hsl(h, 70%, 50%)
    let c = 0.7;
    let x = c * (1.0 - (h % 2.0 - 1.0).abs());
    let (r, g, b) = match h as u8 {
        0 => (c, x, 0.0),
        1 => (x, c, 0.0),
        2 => (0.0, c, x),
        3 => (0.0, x, c),
        4 => (x, 0.0, c),
        _ => (c, 0.0, x),
    };
    let m = 0.5 - c / 2.0;
    let to_u8 = |v: f64| ((v + m) * 255.0).round() as u8;
    Color::Rgb {
        r: to_u8(r),
        g: to_u8(g),
        b: to_u8(b),
    }
}

impl RenderSurface for MapView {
    fn place_or_move_marker(
        &mut self,
        id: &DeviceId,
        latitude: f64,
        longitude: f64,
        annotation: &Annotation,
        placement: Placement,
    ) {
        if placement == Placement::Placed && !self.markers.contains_key(id) {
            self.order.push(id.clone());
        }
        // New markers stay offline until a roster lists them.
        let present = self.markers.get(id).map_or(false, |m| m.present);
        self.markers.insert(
            id.clone(),
            Marker {
                latitude,
                longitude,
                annotation: annotation.clone(),
                present,
            },
        );
        self.dirty = true;
    }

    fn remove_all_selection(&mut self) {
        self.selected = None;
        self.dirty = true;
    }

    fn select(&mut self, id: &DeviceId) {
        self.selected = Some(id.clone());
        self.dirty = true;
    }

    fn center_on(&mut self, id: &DeviceId, zoom: u8) {
        if let Some(marker) = self.markers.get(id) {
            self.center = (marker.latitude, marker.longitude);
            self.zoom = zoom.min(MAX_ZOOM);
            self.dirty = true;
        }
    }

    fn fit_bounds(&mut self, ids: &[DeviceId], padding: f64) {
        let points: Vec<(f64, f64)> = ids
            .iter()
            .filter_map(|id| self.markers.get(id))
            .map(|m| (m.latitude, m.longitude))
            .collect();
        if points.is_empty() {
            return;
        }
        let (mut lat0, mut lat1, mut lon0, mut lon1) = (90.0f64, -90.0f64, 180.0f64, -180.0f64);
        for (lat, lon) in &points {
            lat0 = lat0.min(*lat);
            lat1 = lat1.max(*lat);
            lon0 = lon0.min(*lon);
            lon1 = lon1.max(*lon);
        }
        self.center = ((lat0 + lat1) / 2.0, (lon0 + lon1) / 2.0);
        let extent = ((lat1 - lat0).max(lon1 - lon0) * (1.0 + 2.0 * padding)).max(1e-4);
        let mut zoom = 0;
        while zoom < MAX_ZOOM && 360.0 / f64::powi(2.0, zoom as i32 + 1) >= extent {
            zoom += 1;
        }
        self.zoom = zoom;
        self.dirty = true;
    }

    fn mark_presence(&mut self, id: &DeviceId, present: bool) {
        if let Some(marker) = self.markers.get_mut(id) {
            marker.present = present;
            self.dirty = true;
        }
    }
}

async fn run_monitor(
    tracker: TrackerHandle,
    surface: crossbeam::channel::Receiver<tracklink::device::SurfaceCall>,
    events: crossbeam::channel::Receiver<TrackerEvent>,
    endpoint_count: usize,
) -> std::io::Result<()> {
    let mut reader = EventStream::new();
    let mut out = stdout();
    let mut view = MapView::new();

    loop {
        let mut delay = Delay::new(Duration::from_millis(100)).fuse();
        let mut event = reader.next().fuse();

        select! {
            _ = delay => {
                for call in surface.try_iter() {
                    call.apply(&mut view);
                }
                for ev in events.try_iter() {
                    view.on_event(&ev);
                }
                if view.dirty {
                    view.draw(&mut out)?;
                }
            },
            some_event = event => {
                let key = match some_event {
                    Some(Ok(Event::Key(key))) => key,
                    Some(Ok(Event::Resize(_, _))) => {
                        view.dirty = true;
                        continue;
                    }
                    Some(Ok(_)) => continue,
                    Some(Err(e)) => return Err(e),
                    None => break,
                };
                let KeyEvent { code, modifiers, .. } = key;
                match code {
                    KeyCode::Char('q') | KeyCode::Esc => break,
                    KeyCode::Char('c') if modifiers.contains(KeyModifiers::CONTROL) => break,
                    KeyCode::Char('a') => {
                        tracker.show_all();
                    }
                    KeyCode::Char(d @ '1'..='9') => {
                        let slot = (d as u8 - b'1') as usize;
                        if let Some(id) = view.device_at(slot) {
                            tracker.focus(id.clone());
                        }
                    }
                    KeyCode::Tab => {
                        let active = view
                            .status
                            .as_ref()
                            .and_then(|s| s.active_index())
                            .unwrap_or(0);
                        tracker.select_endpoint((active + 1) % endpoint_count);
                    }
                    KeyCode::Left | KeyCode::Right | KeyCode::Up | KeyCode::Down => {
                        let (dx, dy) = match code {
                            KeyCode::Left => (-1.0, 0.0),
                            KeyCode::Right => (1.0, 0.0),
                            KeyCode::Up => (0.0, 1.0),
                            _ => (0.0, -1.0),
                        };
                        view.pan(dx, dy);
                        tracker.user_navigated();
                    }
                    KeyCode::Char('+') | KeyCode::Char('=') => {
                        view.zoom_by(1);
                        tracker.user_navigated();
                    }
                    KeyCode::Char('-') => {
                        view.zoom_by(-1);
                        tracker.user_navigated();
                    }
                    _ => {}
                }
            }
        }
    }
    tracker.quit();
    Ok(())
}

fn main() -> ExitCode {
    let opts = tracker_opts();
    let args: Vec<String> = env::args().collect();

    macro_rules! die{
        ($f:expr,$($a:tt)*)=>{
        {
            die!(format!($f, $($a)*));
        }
        };
        ($msg:expr)=>{
        {
            eprintln!("ERROR: {}", $msg);
            return ExitCode::FAILURE;
        }
        };
    }

    let usage = format!(
        "Usage: {} [-c config.yaml] [-e index]  or {} --endpoints",
        &args[0], &args[0]
    );
    let parsed = match parse_args(&opts, &args[1..]) {
        Ok(parsed) => parsed,
        Err(err) => die!("{}\n{}", err, opts.usage(&usage)),
    };
    if parsed.help {
        print!("{}", opts.usage(&usage));
        return ExitCode::SUCCESS;
    }
    let endpoints = match parsed.config.endpoint_list() {
        Ok(endpoints) => endpoints,
        Err(err) => die!(err),
    };
    if parsed.list_endpoints {
        for line in endpoint_listing(&endpoints) {
            println!("{}", line);
        }
        return ExitCode::SUCCESS;
    }

    let (event_send, events) = crossbeam::channel::bounded::<TrackerEvent>(256);
    let (tracker, surface) =
        match TrackerHandle::spawn(&parsed.config, parsed.initial, Some(event_send)) {
            Ok(started) => started,
            Err(err) => die!("failed to start tracker: {}", err),
        };

    let mut out = stdout();
    let setup = (|| -> std::io::Result<()> {
        enable_raw_mode()?;
        out.execute(EnterAlternateScreen)?;
        out.execute(Clear(ClearType::All))?;
        out.execute(Hide)?;
        Ok(())
    })();
    if let Err(err) = setup {
        let _ = disable_raw_mode();
        die!("failed to set up terminal: {}", err);
    }

    let res = async_std::task::block_on(run_monitor(tracker, surface, events, endpoints.len()));

    let _ = out.execute(LeaveAlternateScreen);
    let _ = out.execute(Show);
    let _ = disable_raw_mode();

    match res {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => die!(err),
    }
}
