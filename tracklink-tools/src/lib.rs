//! Shared pieces of the tracklink tools: command line options and the
//! rendering of tracker events as log lines.

use getopts::Options;
use tracklink::link::{EndpointList, StatusKind};
use tracklink::{Event, TrackerConfig};

/// Prints a line prefixed with a local timestamp in format `$tf`.
#[macro_export]
macro_rules! log {
    ($tf:expr, $msg:expr) => {{
        println!("{}{}", chrono::Local::now().format(&$tf), $msg);
    }};
    ($tf:expr, $f:expr, $($a:tt)*) => {{
        $crate::log!($tf, format!($f, $($a)*));
    }};
}

pub fn tracker_opts() -> Options {
    let mut opts = Options::new();
    opts.optopt("c", "", "Configuration file (YAML)", "file");
    opts.optopt(
        "e",
        "",
        "Index of the endpoint to connect to first (default 0)",
        "index",
    );
    opts.optflag("v", "", "Verbose output");
    opts.optflag("d", "", "Debugging output");
    opts.optopt("t", "", "Timestamp format (default '%T%.3f ')", "fmt");
    opts.optflag("", "endpoints", "List the configured endpoints, then quit");
    opts.optflag("h", "help", "Show this help");
    opts
}

#[derive(Debug, Clone)]
pub struct TrackerArgs {
    pub config: TrackerConfig,
    pub initial: usize,
    pub verbose: bool,
    pub debugging: bool,
    pub tf: String,
    pub list_endpoints: bool,
    pub help: bool,
}

/// Parses `args` (without the program name) and loads the configuration.
pub fn parse_args(opts: &Options, args: &[String]) -> Result<TrackerArgs, String> {
    let matches = opts.parse(args).map_err(|f| f.to_string())?;
    if !matches.free.is_empty() {
        return Err(format!("unexpected argument '{}'", matches.free[0]));
    }
    let config = match matches.opt_str("c") {
        Some(path) => TrackerConfig::load(&path)
            .map_err(|e| format!("cannot load configuration '{}': {}", path, e))?,
        None => TrackerConfig::default(),
    };
    let initial = match matches.opt_str("e") {
        Some(index) => index
            .parse::<usize>()
            .map_err(|_| format!("invalid endpoint index '{}'", index))?,
        None => 0,
    };
    let endpoints = config.endpoint_list().map_err(|e| e.to_string())?;
    endpoints.check(initial).map_err(|e| e.to_string())?;

    Ok(TrackerArgs {
        config,
        initial,
        verbose: matches.opt_present("v"),
        debugging: matches.opt_present("d"),
        tf: matches.opt_str("t").unwrap_or("%T%.3f ".to_string()),
        list_endpoints: matches.opt_present("endpoints"),
        help: matches.opt_present("h"),
    })
}

pub fn endpoint_listing(endpoints: &EndpointList) -> Vec<String> {
    endpoints
        .iter()
        .enumerate()
        .map(|(i, ep)| format!("{:>2}  {:<20} {}", i, ep.name, ep.address))
        .collect()
}

/// How chatty an event is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Level {
    Info,
    Verbose,
    Debug,
}

impl Level {
    pub fn enabled(self, verbose: bool, debugging: bool) -> bool {
        match self {
            Level::Info => true,
            Level::Verbose => verbose || debugging,
            Level::Debug => debugging,
        }
    }
}

pub fn describe(event: &Event) -> (Level, String) {
    match event {
        Event::Status(status) => {
            let mut line = format!("[{}] {}", status.kind, status.label);
            if let (StatusKind::Connected, Some(choices)) = (status.kind, &status.selector) {
                let names: Vec<String> = choices
                    .iter()
                    .map(|c| {
                        if c.active {
                            format!("*{}", c.name)
                        } else {
                            c.name.clone()
                        }
                    })
                    .collect();
                line.push_str(&format!(" (endpoints: {})", names.join(", ")));
            }
            (Level::Info, line)
        }
        Event::SessionOpened {
            session,
            index,
            client_id,
        } => (
            Level::Verbose,
            format!(
                "Session {} opened to endpoint {} as {}",
                session, index, client_id
            ),
        ),
        Event::SessionClosed { session, index } => (
            Level::Debug,
            format!("Session {} to endpoint {} closed", session, index),
        ),
        Event::TransportFailed { index, error } => (
            Level::Verbose,
            format!("Transport error on endpoint {}: {}", index, error),
        ),
        Event::Subscribed(topic) => (Level::Verbose, format!("Subscribed to {}", topic)),
        Event::SubscribeFailed { topic, error } => (
            Level::Info,
            format!("Failed to subscribe to {}: {}", topic, error),
        ),
        Event::RotationScheduled { from, delay } => (
            Level::Info,
            format!(
                "Moving on from endpoint {} in {}s",
                from,
                delay.as_secs_f32()
            ),
        ),
        Event::RotationAlreadyPending => {
            (Level::Debug, "Rotation already pending".to_string())
        }
        Event::RotationCancelled => (Level::Verbose, "Pending rotation cancelled".to_string()),
        Event::Rotating { from, to } => (
            Level::Info,
            format!("Rotating from endpoint {} to {}", from, to),
        ),
        Event::AutoRotateSuspended { index, cooldown } => (
            Level::Info,
            format!(
                "Endpoint {} selected manually, automatic rotation off for {}s",
                index,
                cooldown.as_secs_f32()
            ),
        ),
        Event::AutoRotateResumed => (Level::Info, "Automatic rotation resumed".to_string()),
        Event::InvalidEndpoint(err) => (Level::Debug, format!("Selection ignored: {}", err)),
        Event::StaleSessionEvent(session) => (
            Level::Debug,
            format!("Ignoring event from closed session {}", session),
        ),
        Event::DeviceAdded(id) => (Level::Info, format!("New device {}", id)),
        Event::DeviceFocused(id) => (Level::Verbose, format!("Focused on {}", id)),
        Event::PresenceUpdated { listed, online } => (
            Level::Verbose,
            format!("Roster lists {} devices, {} known online", listed, online),
        ),
        Event::MalformedPayload { topic, error } => (
            Level::Verbose,
            format!("Dropped message on {}: {}", topic, error),
        ),
        Event::UnknownTopic(topic) => {
            (Level::Debug, format!("Message on unexpected topic {}", topic))
        }
        Event::Exiting => (Level::Verbose, "Tracker exiting".to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracklink::link::StatusUpdate;

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn defaults() {
        let parsed = parse_args(&tracker_opts(), &[]).unwrap();
        assert_eq!(parsed.initial, 0);
        assert_eq!(parsed.tf, "%T%.3f ");
        assert!(!parsed.verbose && !parsed.debugging && !parsed.list_endpoints);
        assert_eq!(parsed.config.endpoints.len(), 3);
    }

    #[test]
    fn flags() {
        let parsed =
            parse_args(&tracker_opts(), &args(&["-e", "2", "-v", "-d", "--endpoints"])).unwrap();
        assert_eq!(parsed.initial, 2);
        assert!(parsed.verbose && parsed.debugging && parsed.list_endpoints);
    }

    #[test]
    fn bad_arguments() {
        let opts = tracker_opts();
        assert!(parse_args(&opts, &args(&["-e", "3"])).is_err());
        assert!(parse_args(&opts, &args(&["-e", "x"])).is_err());
        assert!(parse_args(&opts, &args(&["-c", "/nonexistent/tracklink.yaml"])).is_err());
        assert!(parse_args(&opts, &args(&["stray"])).is_err());
    }

    #[test]
    fn status_lines() {
        let endpoints = EndpointList::new(EndpointList::default_pool()).unwrap();
        let status = StatusUpdate::new(
            StatusKind::Connected,
            "Connected to EMQX Public".into(),
            &endpoints,
            1,
        );
        let (level, line) = describe(&Event::Status(status));
        assert_eq!(level, Level::Info);
        assert_eq!(
            line,
            "[connected] Connected to EMQX Public (endpoints: Mosquitto Public, *EMQX Public, HiveMQ Public)"
        );
        assert!(Level::Debug.enabled(false, true));
        assert!(!Level::Verbose.enabled(false, false));
    }
}
