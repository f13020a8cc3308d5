//! MQTT transport
//!
//! Implements `Transport` for MQTT 3.1.1 over TCP. Each session owns a
//! dedicated thread which connects, performs the handshake, keeps the
//! connection alive, acknowledges QoS 1 deliveries and reconnects on its own
//! every `reconnect_period` until the session is ended. Results are reported
//! as `SessionEvent`s on the channel given to `MqttTransport::new`.
//!
//! Accepted addresses: `mqtt://host[:port]` and `tcp://host[:port]`, port
//! defaulting to 1883. WebSocket brokers are not supported.

mod iobuf;

use super::mqtt::{self, ConnectReturnCode, Packet};
use super::transport::{
    QoS, Session, SessionEvent, SessionId, SessionOptions, Transport, TransportError,
    TransportEvent,
};
use iobuf::IOBuf;

use crossbeam::channel;
use std::io;
use std::net::{SocketAddr, ToSocketAddrs};
use std::thread;
use std::time::{Duration, Instant};

/// Default MQTT port over plain TCP.
static MQTT_DEFAULT_PORT: u16 = 1883;

/// Default size of the session event channel.
pub static DEFAULT_EVENT_CHANNEL_SIZE: usize = 256;

const WAKER: mio::Token = mio::Token(0);
const SOCKET: mio::Token = mio::Token(1);

#[derive(Debug)]
pub enum RecvError {
    /// No complete packet available at this time.
    NotReady,
    /// The broker closed the connection.
    Disconnected,
    /// A packet does not fit in the receive buffer.
    Overflow,
    Protocol(mqtt::Error),
    IO(io::Error),
}

#[derive(Debug)]
pub enum SendError {
    /// Part of the data is still buffered and must be drained.
    MustDrain,
    /// The outgoing buffer is full.
    Full,
    Disconnected,
    IO(io::Error),
    Serialization(mqtt::Error),
}

impl From<RecvError> for TransportError {
    fn from(err: RecvError) -> TransportError {
        match err {
            RecvError::NotReady => TransportError::Timeout,
            RecvError::Disconnected => TransportError::Dropped("closed by broker".to_string()),
            RecvError::Overflow => TransportError::Protocol("packet too large".to_string()),
            RecvError::Protocol(perr) => TransportError::Protocol(perr.to_string()),
            RecvError::IO(e) => TransportError::from_io(&e),
        }
    }
}

impl From<SendError> for TransportError {
    fn from(err: SendError) -> TransportError {
        match err {
            SendError::MustDrain | SendError::Full => {
                TransportError::Dropped("broker is not reading".to_string())
            }
            SendError::Disconnected => TransportError::Dropped("closed by broker".to_string()),
            SendError::IO(e) => TransportError::from_io(&e),
            SendError::Serialization(perr) => TransportError::Protocol(perr.to_string()),
        }
    }
}

/// A broker address understood by this transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokerAddress {
    pub host: String,
    pub port: u16,
}

impl BrokerAddress {
    pub fn parse(address: &str) -> Result<BrokerAddress, TransportError> {
        let unsupported = || TransportError::UnsupportedAddress(address.to_string());
        let split: Vec<&str> = address.splitn(2, "://").collect();
        let hostport = match split[..] {
            ["mqtt", rest] | ["tcp", rest] => rest,
            _ => return Err(unsupported()),
        };
        // Path components (e.g. "/mqtt") are meaningless over plain TCP.
        let hostport = hostport.split('/').next().unwrap_or("");
        if hostport.is_empty() {
            return Err(unsupported());
        }
        if let Some(v6) = hostport.strip_prefix('[') {
            // [addr]:port or [addr]
            let (host, rest) = v6.split_once(']').ok_or_else(unsupported)?;
            let port = match rest.strip_prefix(':') {
                Some(p) => p.parse().map_err(|_| unsupported())?,
                None if rest.is_empty() => MQTT_DEFAULT_PORT,
                None => return Err(unsupported()),
            };
            return Ok(BrokerAddress {
                host: host.to_string(),
                port,
            });
        }
        match hostport.rsplit_once(':') {
            Some((host, port)) if !host.contains(':') => Ok(BrokerAddress {
                host: host.to_string(),
                port: port.parse().map_err(|_| unsupported())?,
            }),
            _ => Ok(BrokerAddress {
                host: hostport.to_string(),
                port: MQTT_DEFAULT_PORT,
            }),
        }
    }

    fn resolve(&self) -> Result<SocketAddr, TransportError> {
        let mut addrs = (self.host.as_str(), self.port)
            .to_socket_addrs()
            .map_err(|e| TransportError::Refused(format!("{}: {}", self.host, e)))?;
        addrs.next().ok_or_else(|| {
            TransportError::Refused(format!("{}: address resolution failed", self.host))
        })
    }
}

/// Requests from the session handle to its thread.
enum Control {
    Subscribe(String, QoS),
    End,
}

/// Why a session thread stopped using a connection.
enum Stop {
    /// The session was ended, or nobody listens to its events anymore.
    Ended,
    Failed(TransportError),
}

impl From<TransportError> for Stop {
    fn from(err: TransportError) -> Stop {
        Stop::Failed(err)
    }
}

/// Transport creating MQTT sessions, each running in its own thread.
pub struct MqttTransport {
    events: channel::Sender<SessionEvent>,
}

impl MqttTransport {
    pub fn new(events: channel::Sender<SessionEvent>) -> MqttTransport {
        MqttTransport { events }
    }

    /// Creates a transport together with the receiving end of its events.
    pub fn channel() -> (MqttTransport, channel::Receiver<SessionEvent>) {
        let (tx, rx) = channel::bounded(DEFAULT_EVENT_CHANNEL_SIZE);
        (MqttTransport::new(tx), rx)
    }
}

impl Transport for MqttTransport {
    type Session = MqttSession;

    fn open(
        &mut self,
        id: SessionId,
        address: &str,
        options: &SessionOptions,
    ) -> Result<MqttSession, TransportError> {
        let broker = BrokerAddress::parse(address)?;
        let io_err = |e: io::Error| TransportError::Protocol(format!("session setup: {}", e));
        let poll = mio::Poll::new().map_err(io_err)?;
        let waker = mio::Waker::new(poll.registry(), WAKER).map_err(io_err)?;
        let (control_tx, control_rx) = channel::unbounded::<Control>();
        let worker = SessionWorker {
            id,
            broker,
            options: options.clone(),
            events: self.events.clone(),
            control: control_rx,
            poll,
            pending: Vec::new(),
            next_packet_id: 1,
        };
        thread::Builder::new()
            .name(format!("mqtt-session-{}", id.0))
            .spawn(move || worker.run())
            .map_err(io_err)?;
        Ok(MqttSession {
            control: control_tx,
            waker,
            ended: false,
        })
    }
}

/// Handle to a session thread. Dropping it ends the session.
pub struct MqttSession {
    control: channel::Sender<Control>,
    waker: mio::Waker,
    ended: bool,
}

impl Session for MqttSession {
    fn subscribe(&mut self, topic: &str, qos: QoS) -> Result<(), TransportError> {
        if self.ended {
            return Err(TransportError::Dropped("session ended".to_string()));
        }
        self.control
            .send(Control::Subscribe(topic.to_string(), qos))
            .map_err(|_| TransportError::Dropped("session thread exited".to_string()))?;
        self.waker
            .wake()
            .map_err(|e| TransportError::Protocol(format!("wake failed: {}", e)))
    }

    fn end(&mut self) {
        if !self.ended {
            self.ended = true;
            // The thread may already be gone, nothing to do then.
            let _ = self.control.send(Control::End);
            let _ = self.waker.wake();
        }
    }
}

impl Drop for MqttSession {
    fn drop(&mut self) {
        self.end();
    }
}

/// An established connection to the broker.
struct Connection {
    stream: mio::net::TcpStream,
    rxbuf: IOBuf,
    txbuf: IOBuf,
    last_sent: Instant,
    ping_sent: Option<Instant>,
}

impl Connection {
    fn new(stream: mio::net::TcpStream) -> Connection {
        Connection {
            stream,
            rxbuf: IOBuf::new(mqtt::MAX_PACKET_SIZE + 8),
            txbuf: IOBuf::new(mqtt::MAX_PACKET_SIZE + 8),
            last_sent: Instant::now(),
            ping_sent: None,
        }
    }

    fn recv_buffered(&mut self) -> Result<Packet, RecvError> {
        match Packet::deserialize(self.rxbuf.data()) {
            Ok((pkt, size)) => {
                self.rxbuf.consume(size);
                Ok(pkt)
            }
            Err(mqtt::Error::NeedMore) => Err(RecvError::NotReady),
            Err(perr) => Err(RecvError::Protocol(perr)),
        }
    }

    /// Returns the next packet, reading from the socket until it would
    /// block.
    fn recv(&mut self) -> Result<Packet, RecvError> {
        loop {
            match self.recv_buffered() {
                Err(RecvError::NotReady) => self.rxbuf.refill(&mut self.stream)?,
                res => return res,
            }
        }
    }

    fn send(&mut self, registry: &mio::Registry, pkt: &Packet) -> Result<(), SendError> {
        let raw = pkt.serialize().map_err(SendError::Serialization)?;
        let was_empty = self.txbuf.empty();
        self.txbuf.add_data(&raw)?;
        self.last_sent = Instant::now();
        if !was_empty {
            // Already waiting for the socket to become writable.
            return Ok(());
        }
        self.drain(registry)
    }

    /// Writes out buffered data, asking for writable events while some of
    /// it is left.
    fn drain(&mut self, registry: &mio::Registry) -> Result<(), SendError> {
        match self.txbuf.drain(&mut self.stream) {
            Ok(()) => registry
                .reregister(&mut self.stream, SOCKET, mio::Interest::READABLE)
                .map_err(SendError::IO),
            Err(SendError::MustDrain) => registry
                .reregister(
                    &mut self.stream,
                    SOCKET,
                    mio::Interest::READABLE.add(mio::Interest::WRITABLE),
                )
                .map_err(SendError::IO),
            Err(e) => Err(e),
        }
    }
}

struct SessionWorker {
    id: SessionId,
    broker: BrokerAddress,
    options: SessionOptions,
    events: channel::Sender<SessionEvent>,
    control: channel::Receiver<Control>,
    poll: mio::Poll,
    /// Subscriptions requested but not yet sent to the broker.
    pending: Vec<(String, QoS)>,
    next_packet_id: u16,
}

impl SessionWorker {
    /// Returns false when nobody is listening anymore.
    fn emit(&self, event: TransportEvent) -> bool {
        self.events
            .send(SessionEvent {
                session: self.id,
                event,
            })
            .is_ok()
    }

    fn packet_id(&mut self) -> u16 {
        let id = self.next_packet_id;
        // Zero is not a valid packet identifier.
        self.next_packet_id = self.next_packet_id.checked_add(1).unwrap_or(1);
        id
    }

    fn run(mut self) {
        let mut first_attempt = true;
        loop {
            if !first_attempt {
                if let Stop::Ended = self.wait_reconnect_period() {
                    return;
                }
                if !self.emit(TransportEvent::Reconnecting) {
                    return;
                }
            }
            first_attempt = false;

            let conn = match self.establish() {
                Ok(conn) => conn,
                Err(Stop::Ended) => return,
                Err(Stop::Failed(err)) => {
                    if !self.emit(TransportEvent::Error(err)) {
                        return;
                    }
                    continue;
                }
            };
            if !self.emit(TransportEvent::Connected) {
                return;
            }
            match self.serve(conn) {
                Stop::Ended => return,
                Stop::Failed(_) => {
                    if !self.emit(TransportEvent::Offline) {
                        return;
                    }
                }
            }
        }
    }

    /// Sleeps for the reconnect period while still honoring control
    /// requests.
    fn wait_reconnect_period(&mut self) -> Stop {
        let deadline = Instant::now() + self.options.reconnect_period;
        loop {
            let timeout = deadline.saturating_duration_since(Instant::now());
            match self.control.recv_timeout(timeout) {
                Ok(Control::Subscribe(topic, qos)) => self.pending.push((topic, qos)),
                Ok(Control::End) | Err(channel::RecvTimeoutError::Disconnected) => {
                    return Stop::Ended
                }
                Err(channel::RecvTimeoutError::Timeout) => {
                    return Stop::Failed(TransportError::Timeout)
                }
            }
        }
    }

    /// Drains the control channel. Subscriptions are either sent right
    /// away or queued until connected.
    fn process_control(&mut self, mut conn: Option<&mut Connection>) -> Result<(), Stop> {
        loop {
            match self.control.try_recv() {
                Ok(Control::Subscribe(topic, qos)) => {
                    self.pending.push((topic, qos));
                }
                Ok(Control::End) | Err(channel::TryRecvError::Disconnected) => {
                    if let Some(conn) = conn.as_deref_mut() {
                        // Best effort, the socket is closed right after.
                        let _ = conn.send(self.poll.registry(), &Packet::Disconnect);
                    }
                    return Err(Stop::Ended);
                }
                Err(channel::TryRecvError::Empty) => break,
            }
        }
        if let Some(conn) = conn {
            self.flush_subscriptions(conn)?;
        }
        Ok(())
    }

    fn flush_subscriptions(&mut self, conn: &mut Connection) -> Result<(), Stop> {
        if self.pending.is_empty() {
            return Ok(());
        }
        let filters = std::mem::take(&mut self.pending);
        let packet = Packet::Subscribe(mqtt::Subscribe {
            packet_id: self.packet_id(),
            filters,
        });
        conn.send(self.poll.registry(), &packet)
            .map_err(|e| Stop::Failed(e.into()))
    }

    /// Connects and performs the MQTT handshake.
    fn establish(&mut self) -> Result<Connection, Stop> {
        let deadline = Instant::now() + self.options.connect_timeout;
        let addr = self.broker.resolve()?;
        let stream = std::net::TcpStream::connect_timeout(&addr, self.options.connect_timeout)
            .map_err(|e| TransportError::from_io(&e))?;
        let setup_err = |e: io::Error| Stop::Failed(TransportError::from_io(&e));
        let _ = stream.set_nodelay(true);
        stream.set_nonblocking(true).map_err(setup_err)?;
        let mut stream = mio::net::TcpStream::from_std(stream);
        self.poll
            .registry()
            .register(&mut stream, SOCKET, mio::Interest::READABLE)
            .map_err(setup_err)?;
        let mut conn = Connection::new(stream);

        let keep_alive = std::cmp::min(self.options.keep_alive.as_secs(), u16::MAX as u64);
        let connect = Packet::Connect(mqtt::Connect {
            client_id: self.options.client_id.clone(),
            keep_alive: keep_alive as u16,
            clean_session: self.options.clean_session,
        });
        conn.send(self.poll.registry(), &connect)
            .map_err(|e| Stop::Failed(e.into()))?;

        let mut events = mio::Events::with_capacity(8);
        loop {
            let timeout = deadline.saturating_duration_since(Instant::now());
            if timeout == Duration::ZERO {
                return Err(Stop::Failed(TransportError::Timeout));
            }
            self.poll
                .poll(&mut events, Some(timeout))
                .map_err(setup_err)?;
            for event in events.iter() {
                match event.token() {
                    WAKER => self.process_control(None)?,
                    SOCKET => {
                        if event.is_writable() {
                            conn.drain(self.poll.registry())
                                .map_err(|e| Stop::Failed(e.into()))?;
                        }
                        match conn.recv() {
                            Ok(Packet::ConnAck(ack)) => {
                                return match ack.code {
                                    ConnectReturnCode::Accepted => Ok(conn),
                                    code => Err(Stop::Failed(TransportError::Rejected(code))),
                                };
                            }
                            Ok(other) => {
                                return Err(Stop::Failed(TransportError::Protocol(format!(
                                    "expected CONNACK, got {:?}",
                                    other
                                ))));
                            }
                            Err(RecvError::NotReady) => {}
                            Err(e) => return Err(Stop::Failed(e.into())),
                        }
                    }
                    _ => {}
                }
            }
        }
    }

    /// Services an established connection until it fails or the session
    /// is ended.
    fn serve(&mut self, mut conn: Connection) -> Stop {
        if let Err(stop) = self.process_control(Some(&mut conn)) {
            return stop;
        }
        // The handshake may have left data in the buffer.
        if let Err(stop) = self.read_packets(&mut conn) {
            return stop;
        }

        let keep_alive = self.options.keep_alive;
        let mut events = mio::Events::with_capacity(8);
        loop {
            let timeout = if keep_alive.is_zero() {
                None
            } else if let Some(sent) = conn.ping_sent {
                if sent.elapsed() >= keep_alive {
                    return Stop::Failed(TransportError::Timeout);
                }
                Some(keep_alive - sent.elapsed())
            } else {
                let idle = conn.last_sent.elapsed();
                if idle >= keep_alive {
                    if let Err(e) = conn.send(self.poll.registry(), &Packet::PingReq) {
                        return Stop::Failed(e.into());
                    }
                    conn.ping_sent = Some(Instant::now());
                    continue;
                }
                Some(keep_alive - idle)
            };

            if let Err(e) = self.poll.poll(&mut events, timeout) {
                if e.kind() == io::ErrorKind::Interrupted {
                    continue;
                }
                return Stop::Failed(TransportError::from_io(&e));
            }
            for event in events.iter() {
                match event.token() {
                    WAKER => {
                        if let Err(stop) = self.process_control(Some(&mut conn)) {
                            return stop;
                        }
                    }
                    SOCKET => {
                        if event.is_writable() {
                            if let Err(e) = conn.drain(self.poll.registry()) {
                                return Stop::Failed(e.into());
                            }
                        }
                        if let Err(stop) = self.read_packets(&mut conn) {
                            return stop;
                        }
                    }
                    _ => {}
                }
            }
        }
    }

    fn read_packets(&mut self, conn: &mut Connection) -> Result<(), Stop> {
        loop {
            match conn.recv() {
                Ok(Packet::Publish(publish)) => {
                    if let (QoS::AtLeastOnce, Some(id)) = (publish.qos, publish.packet_id) {
                        conn.send(self.poll.registry(), &Packet::PubAck(id))
                            .map_err(|e| Stop::Failed(e.into()))?;
                    }
                    let event = TransportEvent::Message {
                        topic: publish.topic,
                        payload: publish.payload,
                    };
                    if !self.emit(event) {
                        return Err(Stop::Ended);
                    }
                }
                Ok(Packet::PingResp) => conn.ping_sent = None,
                Ok(Packet::SubAck(ack)) => {
                    if !ack.all_granted() {
                        return Err(Stop::Failed(TransportError::Protocol(format!(
                            "subscription {} refused",
                            ack.packet_id
                        ))));
                    }
                }
                Ok(Packet::Disconnect) => {
                    return Err(Stop::Failed(TransportError::Dropped(
                        "closed by broker".to_string(),
                    )))
                }
                // Nothing else is expected from a broker on a subscribe-only
                // session; ignore it.
                Ok(_) => {}
                Err(RecvError::NotReady) => return Ok(()),
                Err(e) => return Err(Stop::Failed(e.into())),
            }
        }
    }
}
