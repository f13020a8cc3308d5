//! MQTT 3.1.1 packets
//!
//! Only the subset a subscribing client needs is modeled. Every packet
//! serializes to a complete frame; `Packet::deserialize` works incrementally
//! on a byte stream and returns `Error::NeedMore` until a full frame is
//! available.

use super::transport::QoS;
use num_enum::{FromPrimitive, IntoPrimitive};
use thiserror::Error;

/// Largest packet this client accepts. Telemetry messages are tiny; a
/// frame larger than this means the stream is garbled or hostile.
pub const MAX_PACKET_SIZE: usize = 256 * 1024;

/// Protocol level for MQTT 3.1.1
const PROTOCOL_LEVEL: u8 = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
#[derive(FromPrimitive, IntoPrimitive)]
enum PacketType {
    Connect = 1,
    ConnAck = 2,
    Publish = 3,
    PubAck = 4,
    PubRec = 5,
    PubRel = 6,
    PubComp = 7,
    Subscribe = 8,
    SubAck = 9,
    Unsubscribe = 10,
    UnsubAck = 11,
    PingReq = 12,
    PingResp = 13,
    Disconnect = 14,
    #[num_enum(catch_all)]
    Reserved(u8),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
#[derive(FromPrimitive, IntoPrimitive)]
pub enum ConnectReturnCode {
    Accepted = 0,
    UnacceptableProtocol = 1,
    IdentifierRejected = 2,
    ServerUnavailable = 3,
    BadCredentials = 4,
    NotAuthorized = 5,
    #[num_enum(catch_all)]
    Unknown(u8),
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum Error {
    #[error("incomplete packet")]
    NeedMore,
    #[error("malformed remaining length")]
    MalformedLength,
    #[error("packet of {0} bytes is too large")]
    PacketTooBig(usize),
    #[error("invalid packet type {0}")]
    InvalidPacketType(u8),
    #[error("invalid flags {0:#04x}")]
    InvalidFlags(u8),
    #[error("invalid QoS level {0}")]
    InvalidQoS(u8),
    #[error("unsupported protocol {0}")]
    InvalidProtocol(String),
    #[error("truncated packet")]
    Truncated,
    #[error("string is not valid UTF-8")]
    Utf8,
    #[error("string of {0} bytes is too long")]
    StringTooLong(usize),
    #[error("unsupported packet type {0}")]
    Unsupported(u8),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Connect {
    pub client_id: String,
    pub keep_alive: u16,
    pub clean_session: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ConnAck {
    pub session_present: bool,
    pub code: ConnectReturnCode,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Publish {
    pub topic: String,
    pub qos: QoS,
    /// Present only for QoS 1 and 2.
    pub packet_id: Option<u16>,
    pub retain: bool,
    pub dup: bool,
    pub payload: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Subscribe {
    pub packet_id: u16,
    pub filters: Vec<(String, QoS)>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SubAck {
    pub packet_id: u16,
    /// Granted QoS per filter, or 0x80 for failure.
    pub codes: Vec<u8>,
}

impl SubAck {
    pub fn all_granted(&self) -> bool {
        self.codes.iter().all(|c| *c != 0x80)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Packet {
    Connect(Connect),
    ConnAck(ConnAck),
    Publish(Publish),
    PubAck(u16),
    Subscribe(Subscribe),
    SubAck(SubAck),
    PingReq,
    PingResp,
    Disconnect,
}

/// Cursor over the variable header and payload of one packet.
struct Reader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(data: &'a [u8]) -> Reader<'a> {
        Reader { data, pos: 0 }
    }

    fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    fn u8(&mut self) -> Result<u8, Error> {
        let b = *self.data.get(self.pos).ok_or(Error::Truncated)?;
        self.pos += 1;
        Ok(b)
    }

    fn u16(&mut self) -> Result<u16, Error> {
        let hi = self.u8()?;
        let lo = self.u8()?;
        Ok(u16::from_be_bytes([hi, lo]))
    }

    fn bytes(&mut self, len: usize) -> Result<&'a [u8], Error> {
        if self.remaining() < len {
            return Err(Error::Truncated);
        }
        let slice = &self.data[self.pos..self.pos + len];
        self.pos += len;
        Ok(slice)
    }

    fn string(&mut self) -> Result<String, Error> {
        let len = self.u16()? as usize;
        let raw = self.bytes(len)?;
        String::from_utf8(raw.to_vec()).map_err(|_| Error::Utf8)
    }

    fn rest(&mut self) -> &'a [u8] {
        let slice = &self.data[self.pos..];
        self.pos = self.data.len();
        slice
    }
}

fn put_string(out: &mut Vec<u8>, s: &str) -> Result<(), Error> {
    let raw = s.as_bytes();
    if raw.len() > u16::MAX as usize {
        return Err(Error::StringTooLong(raw.len()));
    }
    out.extend((raw.len() as u16).to_be_bytes());
    out.extend(raw);
    Ok(())
}

fn qos_from_bits(bits: u8) -> Result<QoS, Error> {
    QoS::try_from(bits).map_err(|_| Error::InvalidQoS(bits))
}

/// Encodes the "remaining length" field.
fn encode_remaining_length(mut len: usize, out: &mut Vec<u8>) -> Result<(), Error> {
    if len > MAX_PACKET_SIZE {
        return Err(Error::PacketTooBig(len));
    }
    loop {
        let mut byte = (len % 128) as u8;
        len /= 128;
        if len > 0 {
            byte |= 0x80;
        }
        out.push(byte);
        if len == 0 {
            return Ok(());
        }
    }
}

/// Decodes the "remaining length" field at the start of `raw`. Returns the
/// value and the number of bytes it used.
fn decode_remaining_length(raw: &[u8]) -> Result<(usize, usize), Error> {
    let mut value: usize = 0;
    let mut multiplier: usize = 1;
    for (i, byte) in raw.iter().enumerate() {
        if i == 4 {
            return Err(Error::MalformedLength);
        }
        value += (*byte & 0x7f) as usize * multiplier;
        if *byte & 0x80 == 0 {
            return Ok((value, i + 1));
        }
        multiplier *= 128;
    }
    if raw.len() >= 4 {
        Err(Error::MalformedLength)
    } else {
        Err(Error::NeedMore)
    }
}

fn frame(header: u8, body: Vec<u8>) -> Result<Vec<u8>, Error> {
    let mut out = Vec::with_capacity(body.len() + 5);
    out.push(header);
    encode_remaining_length(body.len(), &mut out)?;
    out.extend(body);
    Ok(out)
}

impl Packet {
    pub fn serialize(&self) -> Result<Vec<u8>, Error> {
        let ptype = |t: PacketType| u8::from(t) << 4;
        match self {
            Packet::Connect(c) => {
                let mut body = vec![];
                put_string(&mut body, "MQTT")?;
                body.push(PROTOCOL_LEVEL);
                body.push(if c.clean_session { 0x02 } else { 0x00 });
                body.extend(c.keep_alive.to_be_bytes());
                put_string(&mut body, &c.client_id)?;
                frame(ptype(PacketType::Connect), body)
            }
            Packet::ConnAck(ack) => frame(
                ptype(PacketType::ConnAck),
                vec![ack.session_present as u8, u8::from(ack.code)],
            ),
            Packet::Publish(p) => {
                let mut body = vec![];
                put_string(&mut body, &p.topic)?;
                match (p.qos, p.packet_id) {
                    (QoS::AtMostOnce, _) => {}
                    (_, Some(id)) => body.extend(id.to_be_bytes()),
                    (qos, None) => return Err(Error::InvalidQoS(u8::from(qos))),
                }
                body.extend(&p.payload);
                let flags =
                    ((p.dup as u8) << 3) | (u8::from(p.qos) << 1) | (p.retain as u8);
                frame(ptype(PacketType::Publish) | flags, body)
            }
            Packet::PubAck(id) => frame(ptype(PacketType::PubAck), id.to_be_bytes().to_vec()),
            Packet::Subscribe(s) => {
                let mut body = s.packet_id.to_be_bytes().to_vec();
                for (filter, qos) in &s.filters {
                    put_string(&mut body, filter)?;
                    body.push(u8::from(*qos));
                }
                frame(ptype(PacketType::Subscribe) | 0x02, body)
            }
            Packet::SubAck(ack) => {
                let mut body = ack.packet_id.to_be_bytes().to_vec();
                body.extend(&ack.codes);
                frame(ptype(PacketType::SubAck), body)
            }
            Packet::PingReq => frame(ptype(PacketType::PingReq), vec![]),
            Packet::PingResp => frame(ptype(PacketType::PingResp), vec![]),
            Packet::Disconnect => frame(ptype(PacketType::Disconnect), vec![]),
        }
    }

    /// Decodes the first packet in `raw`, returning it together with the
    /// number of bytes it occupied.
    pub fn deserialize(raw: &[u8]) -> Result<(Packet, usize), Error> {
        if raw.is_empty() {
            return Err(Error::NeedMore);
        }
        let header = raw[0];
        let (remaining, len_size) = decode_remaining_length(&raw[1..])?;
        if remaining > MAX_PACKET_SIZE {
            return Err(Error::PacketTooBig(remaining));
        }
        let total = 1 + len_size + remaining;
        if raw.len() < total {
            return Err(Error::NeedMore);
        }
        let mut body = Reader::new(&raw[1 + len_size..total]);
        let flags = header & 0x0f;

        let packet = match PacketType::from(header >> 4) {
            PacketType::Connect => {
                let protocol = body.string()?;
                let level = body.u8()?;
                if protocol != "MQTT" || level != PROTOCOL_LEVEL {
                    return Err(Error::InvalidProtocol(format!("{} level {}", protocol, level)));
                }
                let connect_flags = body.u8()?;
                let keep_alive = body.u16()?;
                let client_id = body.string()?;
                Packet::Connect(Connect {
                    client_id,
                    keep_alive,
                    clean_session: connect_flags & 0x02 != 0,
                })
            }
            PacketType::ConnAck => {
                let ack_flags = body.u8()?;
                let code = ConnectReturnCode::from(body.u8()?);
                Packet::ConnAck(ConnAck {
                    session_present: ack_flags & 0x01 != 0,
                    code,
                })
            }
            PacketType::Publish => {
                let qos = qos_from_bits((flags >> 1) & 0x03)?;
                let topic = body.string()?;
                let packet_id = match qos {
                    QoS::AtMostOnce => None,
                    _ => Some(body.u16()?),
                };
                Packet::Publish(Publish {
                    topic,
                    qos,
                    packet_id,
                    retain: flags & 0x01 != 0,
                    dup: flags & 0x08 != 0,
                    payload: body.rest().to_vec(),
                })
            }
            PacketType::PubAck => Packet::PubAck(body.u16()?),
            PacketType::Subscribe => {
                if flags != 0x02 {
                    return Err(Error::InvalidFlags(header));
                }
                let packet_id = body.u16()?;
                let mut filters = vec![];
                while body.remaining() > 0 {
                    let filter = body.string()?;
                    let qos = qos_from_bits(body.u8()?)?;
                    filters.push((filter, qos));
                }
                Packet::Subscribe(Subscribe { packet_id, filters })
            }
            PacketType::SubAck => {
                let packet_id = body.u16()?;
                Packet::SubAck(SubAck {
                    packet_id,
                    codes: body.rest().to_vec(),
                })
            }
            PacketType::PingReq => Packet::PingReq,
            PacketType::PingResp => Packet::PingResp,
            PacketType::Disconnect => Packet::Disconnect,
            PacketType::PubRec
            | PacketType::PubRel
            | PacketType::PubComp
            | PacketType::Unsubscribe
            | PacketType::UnsubAck => return Err(Error::Unsupported(header >> 4)),
            PacketType::Reserved(t) => return Err(Error::InvalidPacketType(t)),
        };
        Ok((packet, total))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connect_frame_layout() {
        let raw = Packet::Connect(Connect {
            client_id: "tracker_0a1b2c3d".into(),
            keep_alive: 60,
            clean_session: true,
        })
        .serialize()
        .unwrap();
        assert_eq!(raw[0], 0x10);
        assert_eq!(raw[1] as usize, raw.len() - 2);
        assert_eq!(&raw[2..8], &[0, 4, b'M', b'Q', b'T', b'T']);
        assert_eq!(raw[8], 4);
        assert_eq!(raw[9], 0x02);
        assert_eq!(&raw[10..12], &[0, 60]);
    }

    #[test]
    fn subscribe_uses_reserved_flags() {
        let raw = Packet::Subscribe(Subscribe {
            packet_id: 7,
            filters: vec![("iotlab/gps/data".into(), QoS::AtLeastOnce)],
        })
        .serialize()
        .unwrap();
        assert_eq!(raw[0], 0x82);
        assert_eq!(*raw.last().unwrap(), 1);
    }

    #[test]
    fn publish_from_broker() {
        // QoS 1 publish on topic "a/b", id 10, payload "{}"
        let raw = [0x32, 0x09, 0x00, 0x03, b'a', b'/', b'b', 0x00, 0x0a, b'{', b'}'];
        let (pkt, size) = Packet::deserialize(&raw).unwrap();
        assert_eq!(size, raw.len());
        assert_eq!(
            pkt,
            Packet::Publish(Publish {
                topic: "a/b".into(),
                qos: QoS::AtLeastOnce,
                packet_id: Some(10),
                retain: false,
                dup: false,
                payload: b"{}".to_vec(),
            })
        );
    }

    #[test]
    fn partial_frames_need_more() {
        let raw = Packet::Publish(Publish {
            topic: "iotlab/nodes/status".into(),
            qos: QoS::AtMostOnce,
            packet_id: None,
            retain: true,
            dup: false,
            payload: br#"["AA:BB"]"#.to_vec(),
        })
        .serialize()
        .unwrap();
        for cut in 0..raw.len() {
            assert_eq!(Packet::deserialize(&raw[..cut]), Err(Error::NeedMore));
        }
        let mut stream = raw.clone();
        stream.extend(Packet::PingResp.serialize().unwrap());
        let (_, size) = Packet::deserialize(&stream).unwrap();
        assert_eq!(size, raw.len());
        assert_eq!(
            Packet::deserialize(&stream[size..]).unwrap(),
            (Packet::PingResp, 2)
        );
    }

    #[test]
    fn multi_byte_remaining_length() {
        let payload = vec![b'x'; 300];
        let raw = Packet::Publish(Publish {
            topic: "t".into(),
            qos: QoS::AtMostOnce,
            packet_id: None,
            retain: false,
            dup: false,
            payload: payload.clone(),
        })
        .serialize()
        .unwrap();
        // 3 (topic) + 300 = 303 = 0xAF 0x02
        assert_eq!(&raw[1..3], &[0xaf, 0x02]);
        match Packet::deserialize(&raw).unwrap().0 {
            Packet::Publish(p) => assert_eq!(p.payload, payload),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn garbage_is_rejected() {
        assert_eq!(
            Packet::deserialize(&[0x00, 0x00]),
            Err(Error::InvalidPacketType(0))
        );
        assert_eq!(
            Packet::deserialize(&[0x30, 0xff, 0xff, 0xff, 0xff]),
            Err(Error::MalformedLength)
        );
        assert_eq!(
            Packet::deserialize(&[0x36, 0x03, 0x00, 0x01, b'a']),
            Err(Error::InvalidQoS(3))
        );
        assert_eq!(Error::InvalidQoS(3).to_string(), "invalid QoS level 3");
        assert_eq!(Error::InvalidFlags(0x36).to_string(), "invalid flags 0x36");
    }

    #[test]
    fn connack_codes() {
        let (pkt, _) = Packet::deserialize(&[0x20, 0x02, 0x00, 0x05]).unwrap();
        assert_eq!(
            pkt,
            Packet::ConnAck(ConnAck {
                session_present: false,
                code: ConnectReturnCode::NotAuthorized,
            })
        );
        let (pkt, _) = Packet::deserialize(&[0x20, 0x02, 0x01, 0x2a]).unwrap();
        assert_eq!(
            pkt,
            Packet::ConnAck(ConnAck {
                session_present: true,
                code: ConnectReturnCode::Unknown(0x2a),
            })
        );
    }
}
