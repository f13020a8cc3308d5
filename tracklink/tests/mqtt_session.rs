//! Drives the MQTT transport against a minimal broker on localhost.

use tracklink::link::client::MqttTransport;
use tracklink::link::mqtt::{self, ConnAck, ConnectReturnCode, Packet, Publish, SubAck};
use tracklink::link::{
    QoS, Session, SessionEvent, SessionId, SessionOptions, Transport, TransportError,
    TransportEvent,
};

use crossbeam::channel;
use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::thread;
use std::time::Duration;

const WAIT: Duration = Duration::from_secs(5);

fn options() -> SessionOptions {
    SessionOptions {
        keep_alive: Duration::from_secs(60),
        clean_session: true,
        reconnect_period: Duration::from_millis(50),
        connect_timeout: Duration::from_secs(2),
        client_id: "tracker_0badcafe".to_string(),
    }
}

struct Peer {
    stream: TcpStream,
    buf: Vec<u8>,
}

impl Peer {
    fn accept(listener: &TcpListener) -> Peer {
        let (stream, _) = listener.accept().unwrap();
        stream.set_read_timeout(Some(WAIT)).unwrap();
        Peer {
            stream,
            buf: Vec::new(),
        }
    }

    fn recv(&mut self) -> Packet {
        loop {
            match Packet::deserialize(&self.buf) {
                Ok((pkt, size)) => {
                    self.buf.drain(..size);
                    return pkt;
                }
                Err(mqtt::Error::NeedMore) => {}
                Err(e) => panic!("bad packet from client: {:?}", e),
            }
            let mut chunk = [0u8; 1024];
            let n = self.stream.read(&mut chunk).unwrap();
            assert!(n > 0, "client closed the connection");
            self.buf.extend_from_slice(&chunk[..n]);
        }
    }

    fn send(&mut self, pkt: Packet) {
        self.stream.write_all(&pkt.serialize().unwrap()).unwrap();
    }

    fn connack(&mut self, code: ConnectReturnCode) {
        self.send(Packet::ConnAck(ConnAck {
            session_present: false,
            code,
        }));
    }
}

fn next(rx: &channel::Receiver<SessionEvent>) -> TransportEvent {
    let ev = rx.recv_timeout(WAIT).expect("no event from session");
    assert_eq!(ev.session, SessionId(3));
    ev.event
}

fn listen() -> (TcpListener, String) {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let address = format!("tcp://{}", listener.local_addr().unwrap());
    (listener, address)
}

#[test]
fn subscribe_and_receive() {
    let (listener, address) = listen();
    let broker = thread::spawn(move || {
        let mut peer = Peer::accept(&listener);
        match peer.recv() {
            Packet::Connect(c) => {
                assert_eq!(c.client_id, "tracker_0badcafe");
                assert_eq!(c.keep_alive, 60);
                assert!(c.clean_session);
            }
            other => panic!("expected CONNECT, got {:?}", other),
        }
        peer.connack(ConnectReturnCode::Accepted);

        let sub = match peer.recv() {
            Packet::Subscribe(s) => s,
            other => panic!("expected SUBSCRIBE, got {:?}", other),
        };
        assert_eq!(
            sub.filters,
            vec![("iotlab/gps/data".to_string(), QoS::AtLeastOnce)]
        );
        peer.send(Packet::SubAck(SubAck {
            packet_id: sub.packet_id,
            codes: vec![1],
        }));
        peer.send(Packet::Publish(Publish {
            topic: "iotlab/gps/data".into(),
            qos: QoS::AtLeastOnce,
            packet_id: Some(7),
            retain: false,
            dup: false,
            payload: br#"{"mac":"A","lat":1,"lng":2}"#.to_vec(),
        }));
        assert_eq!(peer.recv(), Packet::PubAck(7));
        assert_eq!(peer.recv(), Packet::Disconnect);
    });

    let (mut transport, rx) = MqttTransport::channel();
    let mut session = transport.open(SessionId(3), &address, &options()).unwrap();
    assert_eq!(next(&rx), TransportEvent::Connected);
    session.subscribe("iotlab/gps/data", QoS::AtLeastOnce).unwrap();
    assert_eq!(
        next(&rx),
        TransportEvent::Message {
            topic: "iotlab/gps/data".into(),
            payload: br#"{"mac":"A","lat":1,"lng":2}"#.to_vec(),
        }
    );
    session.end();
    broker.join().unwrap();
    assert!(session
        .subscribe("iotlab/gps/data", QoS::AtLeastOnce)
        .is_err());
}

#[test]
fn rejected_connection_is_retried() {
    let (listener, address) = listen();
    let broker = thread::spawn(move || {
        let mut peer = Peer::accept(&listener);
        assert!(matches!(peer.recv(), Packet::Connect(_)));
        peer.connack(ConnectReturnCode::NotAuthorized);
        // Keep the listener open for the retry.
        let mut again = Peer::accept(&listener);
        assert!(matches!(again.recv(), Packet::Connect(_)));
        again.connack(ConnectReturnCode::Accepted);
        again
    });

    let (mut transport, rx) = MqttTransport::channel();
    let session = transport.open(SessionId(3), &address, &options()).unwrap();
    assert_eq!(
        next(&rx),
        TransportEvent::Error(TransportError::Rejected(ConnectReturnCode::NotAuthorized))
    );
    assert_eq!(next(&rx), TransportEvent::Reconnecting);
    assert_eq!(next(&rx), TransportEvent::Connected);
    let _peer = broker.join().unwrap();
    drop(session);
}

#[test]
fn dropped_connection_goes_offline() {
    let (listener, address) = listen();
    let broker = thread::spawn(move || {
        let mut peer = Peer::accept(&listener);
        assert!(matches!(peer.recv(), Packet::Connect(_)));
        peer.connack(ConnectReturnCode::Accepted);
        // Wait for the test to see the connection before hanging up.
        thread::sleep(Duration::from_millis(100));
        drop(peer);
        listener
    });

    let (mut transport, rx) = MqttTransport::channel();
    let mut session = transport.open(SessionId(3), &address, &options()).unwrap();
    assert_eq!(next(&rx), TransportEvent::Connected);
    assert_eq!(next(&rx), TransportEvent::Offline);
    assert_eq!(next(&rx), TransportEvent::Reconnecting);
    session.end();
    let _listener = broker.join().unwrap();
}

#[test]
fn websocket_address_is_refused_synchronously() {
    let (mut transport, _rx) = MqttTransport::channel();
    let res = transport.open(
        SessionId(1),
        "wss://test.mosquitto.org:8081/mqtt",
        &options(),
    );
    assert!(matches!(res, Err(TransportError::UnsupportedAddress(_))));
}
