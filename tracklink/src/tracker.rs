//! Tracker
//!
//! Single threaded dispatcher owning a `ConnectionSupervisor` and a
//! `DeviceRegistry`. It handles one thing at a time: a session event, an
//! operator command, or a due timer. Message deliveries are routed to the
//! registry by topic; everything else goes to the supervisor.

use crate::config::{ConfigError, Topics, TrackerConfig};
use crate::device::{DeviceId, DeviceRegistry, Placement, RenderSurface, SurfaceCall};
use crate::event::{Event, EventQueue};
use crate::link::client::MqttTransport;
use crate::link::{ConnectionSupervisor, EndpointError, SessionEvent, Transport};

use crossbeam::channel;
use std::io;
use std::thread;
use std::time::{Duration, Instant};
use thiserror::Error;

/// Longest sleep of the run loop when no timer is pending.
static IDLE_WAIT: Duration = Duration::from_secs(1);

#[derive(Error, Debug)]
pub enum StartError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("failed to start tracker thread: {0}")]
    Thread(#[source] io::Error),
}

/// Operator requests.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    SelectEndpoint(usize),
    FocusDevice(DeviceId),
    ShowAll,
    /// The user panned or zoomed the map.
    UserNavigated,
    Quit,
}

pub struct Tracker<T: Transport, S: RenderSurface> {
    supervisor: ConnectionSupervisor<T>,
    registry: DeviceRegistry,
    surface: S,
    topics: Topics,
    events: EventQueue,
}

impl<T: Transport, S: RenderSurface> Tracker<T, S> {
    pub fn new(
        transport: T,
        surface: S,
        config: &TrackerConfig,
        events: Option<channel::Sender<Event>>,
    ) -> Result<Tracker<T, S>, ConfigError> {
        let events = EventQueue::new(events);
        Ok(Tracker {
            supervisor: ConnectionSupervisor::new(transport, config, events.clone())?,
            registry: DeviceRegistry::new(config.view.clone()),
            surface,
            topics: config.topics.clone(),
            events,
        })
    }

    pub fn supervisor(&self) -> &ConnectionSupervisor<T> {
        &self.supervisor
    }

    pub fn supervisor_mut(&mut self) -> &mut ConnectionSupervisor<T> {
        &mut self.supervisor
    }

    pub fn registry(&self) -> &DeviceRegistry {
        &self.registry
    }

    pub fn surface(&self) -> &S {
        &self.surface
    }

    pub fn surface_mut(&mut self) -> &mut S {
        &mut self.surface
    }

    /// Opens the first session.
    pub fn start(&mut self, initial: usize, now: Instant) -> Result<(), EndpointError> {
        self.supervisor.connect(initial, now)
    }

    pub fn dispatch(&mut self, event: SessionEvent, now: Instant) {
        if let Some((topic, payload)) = self.supervisor.handle_event(event, now) {
            self.deliver(&topic, &payload);
        }
    }

    /// Routes a message by topic. Undecodable payloads are reported and
    /// dropped.
    fn deliver(&mut self, topic: &str, payload: &[u8]) {
        if topic == self.topics.telemetry {
            match self
                .registry
                .apply_telemetry(payload, chrono::Local::now(), &mut self.surface)
            {
                Ok(update) => {
                    if update.placement == Placement::Placed {
                        self.events.send(Event::DeviceAdded(update.id.clone()));
                    }
                    if update.focused {
                        self.events.send(Event::DeviceFocused(update.id));
                    }
                }
                Err(error) => self.events.send(Event::MalformedPayload {
                    topic: topic.to_string(),
                    error,
                }),
            }
        } else if topic == self.topics.presence {
            match self.registry.apply_presence(payload, &mut self.surface) {
                Ok(update) => self.events.send(Event::PresenceUpdated {
                    listed: update.listed,
                    online: update.online,
                }),
                Err(error) => self.events.send(Event::MalformedPayload {
                    topic: topic.to_string(),
                    error,
                }),
            }
        } else {
            self.events.send(Event::UnknownTopic(topic.to_string()));
        }
    }

    /// Handles an operator command. Returns false on `Quit`.
    pub fn command(&mut self, command: Command, now: Instant) -> bool {
        match command {
            Command::SelectEndpoint(index) => {
                // Already reported through the event queue.
                let _ = self.supervisor.select_endpoint(index, now);
            }
            Command::FocusDevice(id) => {
                if self.registry.focus_on(&id, &mut self.surface) {
                    self.events.send(Event::DeviceFocused(id));
                }
            }
            Command::ShowAll => {
                self.registry.show_all(&mut self.surface);
            }
            Command::UserNavigated => self.registry.on_user_manual_navigation(),
            Command::Quit => return false,
        }
        true
    }

    /// Fires due timers.
    pub fn tick(&mut self, now: Instant) {
        self.supervisor.poll_timers(now);
    }

    /// Runs until `Quit` is received or the command channel is closed.
    pub fn run(
        &mut self,
        session_events: channel::Receiver<SessionEvent>,
        commands: channel::Receiver<Command>,
    ) {
        loop {
            let timeout = match self.supervisor.next_deadline() {
                Some(deadline) => deadline.saturating_duration_since(Instant::now()),
                None => IDLE_WAIT,
            };
            let keep_going = crossbeam::select! {
                recv(session_events) -> res => match res {
                    Ok(event) => {
                        self.dispatch(event, Instant::now());
                        true
                    }
                    Err(_) => false,
                },
                recv(commands) -> res => match res {
                    Ok(command) => self.command(command, Instant::now()),
                    Err(_) => false,
                },
                default(timeout) => true,
            };
            if !keep_going {
                break;
            }
            self.tick(Instant::now());
        }
        self.supervisor.shutdown();
        self.events.send(Event::Exiting);
    }
}

/// Handle to a tracker running in its own thread, talking MQTT. The
/// surface is fed through the `SurfaceCall` channel returned by `spawn`.
pub struct TrackerHandle {
    commands: channel::Sender<Command>,
    thread: Option<thread::JoinHandle<()>>,
}

impl TrackerHandle {
    /// Starts a tracker connecting first to `endpoints[initial]`.
    pub fn spawn(
        config: &TrackerConfig,
        initial: usize,
        events: Option<channel::Sender<Event>>,
    ) -> Result<(TrackerHandle, channel::Receiver<SurfaceCall>), StartError> {
        config
            .endpoint_list()?
            .check(initial)
            .map_err(ConfigError::from)?;
        let (transport, session_events) = MqttTransport::channel();
        let (surface_tx, surface_rx) = channel::unbounded::<SurfaceCall>();
        let mut tracker = Tracker::new(transport, surface_tx, config, events)?;
        let (cmd_tx, cmd_rx) = channel::unbounded::<Command>();
        let thread = thread::Builder::new()
            .name("tracker".to_string())
            .spawn(move || {
                let _ = tracker.start(initial, Instant::now());
                tracker.run(session_events, cmd_rx);
            })
            .map_err(StartError::Thread)?;
        Ok((
            TrackerHandle {
                commands: cmd_tx,
                thread: Some(thread),
            },
            surface_rx,
        ))
    }

    /// Returns false if the tracker has already exited.
    pub fn send(&self, command: Command) -> bool {
        self.commands.send(command).is_ok()
    }

    pub fn select_endpoint(&self, index: usize) -> bool {
        self.send(Command::SelectEndpoint(index))
    }

    pub fn focus(&self, id: DeviceId) -> bool {
        self.send(Command::FocusDevice(id))
    }

    pub fn show_all(&self) -> bool {
        self.send(Command::ShowAll)
    }

    pub fn user_navigated(&self) -> bool {
        self.send(Command::UserNavigated)
    }

    /// Stops the tracker and waits for its thread.
    pub fn quit(mut self) {
        self.stop();
    }

    fn stop(&mut self) {
        let _ = self.commands.send(Command::Quit);
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

impl Drop for TrackerHandle {
    fn drop(&mut self) {
        self.stop();
    }
}
