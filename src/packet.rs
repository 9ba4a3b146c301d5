//! # MQTT Packet Structures and Serialization
//!
//! The MQTT 3.1.1 control packets a device session needs, with the traits for
//! encoding them into and decoding them from a byte buffer. Only the directions
//! a client actually uses are implemented: packets the client sends encode, and
//! packets the broker sends decode.

use crate::error::{PacketError, ProtocolError};
use crate::util::{self, read_binary, read_u16, write_binary, write_utf8_string};
use heapless::Vec;

/// Protocol level byte for MQTT 3.1.1.
const PROTOCOL_LEVEL: u8 = 4;

/// Room reserved in front of a packet body for the fixed header.
const HEADER_RESERVE: usize = 5;

/// Represents the Quality of Service (QoS) levels for MQTT messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum QoS {
    AtMostOnce = 0,
    AtLeastOnce = 1,
    ExactlyOnce = 2,
}

impl TryFrom<u8> for QoS {
    type Error = ProtocolError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(QoS::AtMostOnce),
            1 => Ok(QoS::AtLeastOnce),
            2 => Ok(QoS::ExactlyOnce),
            _ => Err(ProtocolError::MalformedPacket),
        }
    }
}

/// A trait for packets that can be encoded into a byte buffer.
pub trait EncodePacket {
    /// Encodes the packet at the start of `buf`, returning its length.
    fn encode(&self, buf: &mut [u8]) -> Result<usize, PacketError>;
}

/// A trait for packets that can be decoded from a byte buffer.
pub trait DecodePacket<'a>: Sized {
    /// Decodes one complete packet occupying the whole of `buf`.
    fn decode(buf: &'a [u8]) -> Result<Self, PacketError>;
}

/// Packets a client can receive from the broker.
#[derive(Debug)]
pub enum MqttPacket<'a> {
    ConnAck(ConnAck),
    Publish(Publish<'a>),
    PubAck(PubAck),
    SubAck(SubAck),
    PingResp,
}

/// Decodes one complete inbound frame.
pub fn decode(buf: &[u8]) -> Result<MqttPacket<'_>, PacketError> {
    let first = *buf.first().ok_or(ProtocolError::MalformedPacket)?;
    let packet_type = first >> 4;
    let packet = match packet_type {
        2 => MqttPacket::ConnAck(ConnAck::decode(buf)?),
        3 => MqttPacket::Publish(Publish::decode(buf)?),
        4 => MqttPacket::PubAck(PubAck::decode(buf)?),
        9 => MqttPacket::SubAck(SubAck::decode(buf)?),
        13 => MqttPacket::PingResp,
        _ => return Err(ProtocolError::InvalidPacketType(packet_type).into()),
    };
    Ok(packet)
}

/// Bounds-checked cursor over an output buffer.
struct Writer<'b> {
    buf: &'b mut [u8],
    pos: usize,
}

impl<'b> Writer<'b> {
    /// Starts writing after the space reserved for the fixed header.
    fn body(buf: &'b mut [u8]) -> Self {
        Self {
            buf,
            pos: HEADER_RESERVE,
        }
    }

    fn u8(&mut self, val: u8) -> Result<(), PacketError> {
        *self.buf.get_mut(self.pos).ok_or(PacketError::BufferTooSmall)? = val;
        self.pos += 1;
        Ok(())
    }

    fn u16(&mut self, val: u16) -> Result<(), PacketError> {
        self.raw(&val.to_be_bytes())
    }

    fn str(&mut self, s: &str) -> Result<(), PacketError> {
        let tail = self.buf.get_mut(self.pos..).ok_or(PacketError::BufferTooSmall)?;
        self.pos += write_utf8_string(tail, s)?;
        Ok(())
    }

    fn binary(&mut self, data: &[u8]) -> Result<(), PacketError> {
        let tail = self.buf.get_mut(self.pos..).ok_or(PacketError::BufferTooSmall)?;
        self.pos += write_binary(tail, data)?;
        Ok(())
    }

    fn raw(&mut self, data: &[u8]) -> Result<(), PacketError> {
        let end = self.pos + data.len();
        self.buf
            .get_mut(self.pos..end)
            .ok_or(PacketError::BufferTooSmall)?
            .copy_from_slice(data);
        self.pos = end;
        Ok(())
    }

    /// Writes the fixed header and moves the body up against it.
    fn finish(self, first_byte: u8) -> Result<usize, PacketError> {
        let remaining_len = self.pos - HEADER_RESERVE;
        let mut header = [0u8; HEADER_RESERVE];
        header[0] = first_byte;
        let len_bytes = util::write_variable_byte_integer_len(&mut header[1..], remaining_len)?;
        let header_len = 1 + len_bytes;
        self.buf
            .copy_within(HEADER_RESERVE..self.pos, header_len);
        self.buf[..header_len].copy_from_slice(&header[..header_len]);
        Ok(header_len + remaining_len)
    }
}

/// Skips the fixed header, returning the cursor at the variable header and the
/// end of the packet.
fn body_bounds(buf: &[u8]) -> Result<(usize, usize), PacketError> {
    let mut cursor = 1;
    let remaining_len = util::read_variable_byte_integer(&mut cursor, buf)?;
    let end = cursor + remaining_len;
    if end > buf.len() {
        return Err(ProtocolError::MalformedPacket.into());
    }
    Ok((cursor, end))
}

// --- CONNECT Packet ---
#[derive(Debug)]
pub struct Connect<'a> {
    pub clean_session: bool,
    pub keep_alive: u16,
    pub client_id: &'a str,
    pub username: Option<&'a str>,
    pub password: Option<&'a [u8]>,
}

impl<'a> Connect<'a> {
    pub fn new(client_id: &'a str, keep_alive: u16, clean_session: bool) -> Self {
        Self {
            client_id,
            keep_alive,
            clean_session,
            username: None,
            password: None,
        }
    }

    /// Attaches credentials. An empty username sends neither field.
    pub fn with_credentials(mut self, username: &'a str, password: &'a [u8]) -> Self {
        if !username.is_empty() {
            self.username = Some(username);
            self.password = Some(password);
        }
        self
    }
}

impl EncodePacket for Connect<'_> {
    fn encode(&self, buf: &mut [u8]) -> Result<usize, PacketError> {
        let mut w = Writer::body(buf);
        w.str("MQTT")?;
        w.u8(PROTOCOL_LEVEL)?;
        let mut flags = 0;
        if self.clean_session {
            flags |= 0x02;
        }
        if self.username.is_some() {
            flags |= 0x80;
        }
        if self.password.is_some() {
            flags |= 0x40;
        }
        w.u8(flags)?;
        w.u16(self.keep_alive)?;
        w.str(self.client_id)?;
        if let Some(username) = self.username {
            w.str(username)?;
        }
        if let Some(password) = self.password {
            w.binary(password)?;
        }
        w.finish(0x10)
    }
}

// --- CONNACK Packet ---
#[derive(Debug)]
pub struct ConnAck {
    pub session_present: bool,
    pub reason_code: u8,
}

impl<'a> DecodePacket<'a> for ConnAck {
    fn decode(buf: &'a [u8]) -> Result<Self, PacketError> {
        let (cursor, end) = body_bounds(buf)?;
        if end - cursor != 2 {
            return Err(ProtocolError::MalformedPacket.into());
        }
        Ok(Self {
            session_present: (buf[cursor] & 0x01) != 0,
            reason_code: buf[cursor + 1],
        })
    }
}

// --- PUBLISH Packet ---
#[derive(Debug)]
pub struct Publish<'a> {
    /// Topic name bytes; UTF-8 validation is left to the consumer.
    pub topic: &'a [u8],
    pub qos: QoS,
    pub payload: &'a [u8],
    pub packet_id: Option<u16>,
}

impl<'a> DecodePacket<'a> for Publish<'a> {
    fn decode(buf: &'a [u8]) -> Result<Self, PacketError> {
        let first = *buf.first().ok_or(ProtocolError::MalformedPacket)?;
        let qos = QoS::try_from((first >> 1) & 0x03)?;
        let (mut cursor, end) = body_bounds(buf)?;
        let body = &buf[..end];

        let topic = read_binary(&mut cursor, body)?;
        let packet_id = if qos != QoS::AtMostOnce {
            Some(read_u16(&mut cursor, body)?)
        } else {
            None
        };

        Ok(Publish {
            topic,
            qos,
            payload: &body[cursor..],
            packet_id,
        })
    }
}

impl EncodePacket for Publish<'_> {
    fn encode(&self, buf: &mut [u8]) -> Result<usize, PacketError> {
        let mut w = Writer::body(buf);
        w.binary(self.topic)?;
        if self.qos != QoS::AtMostOnce {
            let id = self.packet_id.ok_or(ProtocolError::MalformedPacket)?;
            w.u16(id)?;
        }
        w.raw(self.payload)?;
        w.finish(0x30 | ((self.qos as u8) << 1))
    }
}

// --- PUBACK Packet ---
#[derive(Debug)]
pub struct PubAck {
    pub packet_id: u16,
}

impl<'a> DecodePacket<'a> for PubAck {
    fn decode(buf: &'a [u8]) -> Result<Self, PacketError> {
        let (mut cursor, end) = body_bounds(buf)?;
        let packet_id = read_u16(&mut cursor, &buf[..end])?;
        Ok(PubAck { packet_id })
    }
}

impl EncodePacket for PubAck {
    fn encode(&self, buf: &mut [u8]) -> Result<usize, PacketError> {
        let mut w = Writer::body(buf);
        w.u16(self.packet_id)?;
        w.finish(0x40)
    }
}

// --- SUBSCRIBE Packet ---
#[derive(Debug)]
pub struct Subscribe<'a> {
    pub packet_id: u16,
    pub topics: Vec<(&'a str, QoS), 8>,
}

impl<'a> Subscribe<'a> {
    /// Creates a new Subscribe packet with a single topic.
    pub fn new(packet_id: u16, topic: &'a str, qos: QoS) -> Self {
        let mut topics = Vec::new();
        let _ = topics.push((topic, qos));
        Self { packet_id, topics }
    }
}

impl EncodePacket for Subscribe<'_> {
    fn encode(&self, buf: &mut [u8]) -> Result<usize, PacketError> {
        let mut w = Writer::body(buf);
        w.u16(self.packet_id)?;
        for (topic, qos) in &self.topics {
            w.str(topic)?;
            w.u8(*qos as u8)?;
        }
        // SUBSCRIBE carries reserved flag bits 0b0010.
        w.finish(0x82)
    }
}

// --- SUBACK Packet ---
#[derive(Debug)]
pub struct SubAck {
    pub packet_id: u16,
    pub reason_codes: Vec<u8, 8>,
}

impl SubAck {
    /// Whether the broker refused any of the requested filters.
    pub fn is_rejected(&self) -> bool {
        self.reason_codes.iter().any(|code| *code >= 0x80)
    }
}

impl<'a> DecodePacket<'a> for SubAck {
    fn decode(buf: &'a [u8]) -> Result<Self, PacketError> {
        let (mut cursor, end) = body_bounds(buf)?;
        let packet_id = read_u16(&mut cursor, &buf[..end])?;

        let mut reason_codes = Vec::new();
        for code in &buf[cursor..end] {
            reason_codes
                .push(*code)
                .map_err(|_| ProtocolError::MalformedPacket)?;
        }

        Ok(SubAck {
            packet_id,
            reason_codes,
        })
    }
}

// --- PINGREQ Packet ---
#[derive(Debug)]
pub struct PingReq;

impl EncodePacket for PingReq {
    fn encode(&self, buf: &mut [u8]) -> Result<usize, PacketError> {
        let out = buf.get_mut(..2).ok_or(PacketError::BufferTooSmall)?;
        out.copy_from_slice(&[0xC0, 0x00]);
        Ok(2)
    }
}

// --- DISCONNECT Packet ---
#[derive(Debug)]
pub struct Disconnect;

impl EncodePacket for Disconnect {
    fn encode(&self, buf: &mut [u8]) -> Result<usize, PacketError> {
        let out = buf.get_mut(..2).ok_or(PacketError::BufferTooSmall)?;
        out.copy_from_slice(&[0xE0, 0x00]);
        Ok(2)
    }
}
