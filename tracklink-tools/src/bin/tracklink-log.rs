//! tracklink-log
//!
//! Headless tracker: follows the configured broker pool and logs connection
//! changes, failover decisions and device activity with timestamps.
//!
//! Commands can be typed on standard input, one per line:
//!   e <index>   select endpoint
//!   f <id>      focus device
//!   a           show all devices
//!   n           report manual navigation
//!   q           quit

use tracklink::device::{DeviceId, SurfaceCall};
use tracklink::{Command, Event, TrackerHandle};
use tracklink_tools::{describe, endpoint_listing, log, parse_args, tracker_opts};

use crossbeam::channel;
use std::env;
use std::io::BufRead;
use std::process::ExitCode;

fn parse_command(line: &str) -> Result<Command, String> {
    let mut words = line.split_whitespace();
    let cmd = match (words.next(), words.next()) {
        (Some("e"), Some(index)) => Command::SelectEndpoint(
            index
                .parse()
                .map_err(|_| format!("invalid endpoint index '{}'", index))?,
        ),
        (Some("f"), Some(id)) => Command::FocusDevice(DeviceId::new(id)),
        (Some("a"), None) => Command::ShowAll,
        (Some("n"), None) => Command::UserNavigated,
        (Some("q"), None) => Command::Quit,
        _ => return Err(format!("unknown command '{}'", line.trim())),
    };
    if words.next().is_some() {
        return Err(format!("trailing input in '{}'", line.trim()));
    }
    Ok(cmd)
}

fn describe_call(call: &SurfaceCall) -> Option<String> {
    match call {
        SurfaceCall::PlaceOrMoveMarker {
            id,
            latitude,
            longitude,
            annotation,
            ..
        } => Some(format!(
            "{} at {:.6},{:.6} alt {:.2} m, {} satellites",
            id, latitude, longitude, annotation.altitude, annotation.satellites
        )),
        SurfaceCall::CenterOn { id, zoom } => Some(format!("View centered on {} (zoom {})", id, zoom)),
        SurfaceCall::FitBounds { ids, .. } => Some(format!("View fitted to {} devices", ids.len())),
        SurfaceCall::MarkPresence { id, present } => Some(format!(
            "{} is {}",
            id,
            if *present { "online" } else { "offline" }
        )),
        SurfaceCall::RemoveAllSelection | SurfaceCall::Select(_) => None,
    }
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
        "Usage: {} [-c config.yaml] [-e index] [-v] [-d] [-t fmt]  or {} --endpoints",
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
    let (verbose, debugging, tf) = (parsed.verbose, parsed.debugging, parsed.tf.clone());

    let (event_send, events) = channel::bounded::<Event>(256);
    let (tracker, surface) =
        match TrackerHandle::spawn(&parsed.config, parsed.initial, Some(event_send)) {
            Ok(started) => started,
            Err(err) => die!("failed to start tracker: {}", err),
        };

    let (line_send, lines) = channel::bounded::<String>(16);
    if let Err(err) = std::thread::Builder::new()
        .name("stdin".to_string())
        .spawn(move || {
            for line in std::io::stdin().lock().lines() {
                match line {
                    Ok(line) => {
                        if line_send.send(line).is_err() {
                            break;
                        }
                    }
                    Err(_) => break,
                }
            }
        })
    {
        die!("failed to read commands: {}", err);
    }

    if verbose {
        log!(tf, "Starting with endpoint {} ({})", parsed.initial, endpoints[parsed.initial].name);
    }

    let mut stdin_open = true;
    loop {
        let line_rx = if stdin_open {
            lines.clone()
        } else {
            channel::never()
        };
        crossbeam::select! {
            recv(events) -> res => {
                let event = match res {
                    Ok(event) => event,
                    Err(_) => break,
                };
                let exiting = matches!(event, Event::Exiting);
                let (level, text) = describe(&event);
                if level.enabled(verbose, debugging) {
                    log!(tf, text);
                }
                if exiting {
                    break;
                }
            }
            recv(surface) -> res => {
                let call = match res {
                    Ok(call) => call,
                    Err(_) => break,
                };
                if let Some(text) = describe_call(&call) {
                    let routine = matches!(
                        call,
                        SurfaceCall::PlaceOrMoveMarker { .. } | SurfaceCall::MarkPresence { .. }
                    );
                    if !routine || verbose || debugging {
                        log!(tf, text);
                    }
                }
            }
            recv(line_rx) -> res => {
                match res {
                    Ok(line) if line.trim().is_empty() => {}
                    Ok(line) => match parse_command(&line) {
                        Ok(Command::Quit) => break,
                        Ok(cmd) => {
                            if !tracker.send(cmd) {
                                break;
                            }
                        }
                        Err(err) => log!(tf, err),
                    },
                    // Standard input closed: keep running until killed.
                    Err(_) => stdin_open = false,
                }
            }
        }
    }

    tracker.quit();
    ExitCode::SUCCESS
}
