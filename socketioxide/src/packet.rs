//! The socket.io packet protocol: the seven typed wire frames spec.md §3
//! and §4.1 describe, and the encoder/decoder that turns them into (and
//! back out of) [`engineioxide::socket::Frame`]s.
//!
//! spec.md calls this codec "external" to the core's interesting
//! engineering (§2), but nothing outside this repository ships one, so it
//! lives here rather than as a dependency.

use std::fmt;

use serde_json::Value;

use engineioxide::socket::Frame;

/// The seven wire packet types, with the exact integer tags the socket.io
/// protocol uses (spec.md §6).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum PacketType {
    Connect = 0,
    Disconnect = 1,
    Event = 2,
    Ack = 3,
    ConnectError = 4,
    BinaryEvent = 5,
    BinaryAck = 6,
}

impl PacketType {
    fn from_digit(d: u8) -> Option<Self> {
        use PacketType::*;
        Some(match d {
            0 => Connect,
            1 => Disconnect,
            2 => Event,
            3 => Ack,
            4 => ConnectError,
            5 => BinaryEvent,
            6 => BinaryAck,
            _ => return None,
        })
    }
}

/// A binary-bearing event or ack payload: the JSON data plus the out-of-band
/// attachments it references. Attachments arrive as separate binary frames
/// after the initial text frame (spec.md §4.1).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BinaryPacket {
    pub data: Value,
    pub bin: Vec<Vec<u8>>,
    expected: usize,
}

impl BinaryPacket {
    pub fn new(data: Value, bin: Vec<Vec<u8>>) -> Self {
        let expected = bin.len();
        Self { data, bin, expected }
    }

    pub(crate) fn add_payload(&mut self, payload: Vec<u8>) {
        self.bin.push(payload);
    }

    pub(crate) fn is_complete(&self) -> bool {
        self.bin.len() >= self.expected
    }
}

/// The type-specific payload of a [`Packet`].
#[derive(Debug, Clone, PartialEq)]
pub enum PacketData {
    /// Optional auth payload sent by the client when requesting admission
    /// to a namespace.
    Connect(Option<Value>),
    Disconnect,
    /// `(event, data, ack id)`.
    Event(String, Value, Option<i64>),
    /// `(data, ack id)`.
    EventAck(Value, i64),
    /// Sent back to a client whose CONNECT was rejected or targeted an
    /// unknown namespace (spec.md §7 items 2-3).
    ConnectError(String),
    BinaryEvent(String, BinaryPacket, Option<i64>),
    BinaryAck(BinaryPacket, i64),
}

impl PacketData {
    /// Stamps an ack id onto an EVENT/BINARY_EVENT packet that doesn't have
    /// one yet (used when promoting a fire-and-forget emit into one that
    /// awaits an acknowledgement).
    pub(crate) fn set_ack_id(&mut self, id: i64) {
        match self {
            PacketData::Event(_, _, ack) => *ack = Some(id),
            PacketData::BinaryEvent(_, _, ack) => *ack = Some(id),
            _ => {}
        }
    }

    fn type_tag(&self) -> PacketType {
        match self {
            PacketData::Connect(_) => PacketType::Connect,
            PacketData::Disconnect => PacketType::Disconnect,
            PacketData::Event(..) => PacketType::Event,
            PacketData::EventAck(..) => PacketType::Ack,
            PacketData::ConnectError(_) => PacketType::ConnectError,
            PacketData::BinaryEvent(..) => PacketType::BinaryEvent,
            PacketData::BinaryAck(..) => PacketType::BinaryAck,
        }
    }
}

/// A full socket.io packet: a type tag, the namespace it's scoped to, and
/// its type-specific payload (spec.md §3 "Packet").
#[derive(Debug, Clone, PartialEq)]
pub struct Packet {
    pub ns: String,
    pub inner: PacketData,
}

impl Packet {
    pub fn connect(ns: impl Into<String>, auth: Option<Value>) -> Self {
        Self {
            ns: ns.into(),
            inner: PacketData::Connect(auth),
        }
    }

    pub fn disconnect(ns: impl Into<String>) -> Self {
        Self {
            ns: ns.into(),
            inner: PacketData::Disconnect,
        }
    }

    pub fn event(ns: impl Into<String>, event: impl Into<String>, data: Value) -> Self {
        Self {
            ns: ns.into(),
            inner: PacketData::Event(event.into(), data, None),
        }
    }

    pub fn bin_event(
        ns: impl Into<String>,
        event: impl Into<String>,
        data: Value,
        bin: Vec<Vec<u8>>,
    ) -> Self {
        Self {
            ns: ns.into(),
            inner: PacketData::BinaryEvent(event.into(), BinaryPacket::new(data, bin), None),
        }
    }

    pub fn ack(ns: impl Into<String>, data: Value, ack_id: i64) -> Self {
        Self {
            ns: ns.into(),
            inner: PacketData::EventAck(data, ack_id),
        }
    }

    pub fn bin_ack(ns: impl Into<String>, data: Value, bin: Vec<Vec<u8>>, ack_id: i64) -> Self {
        Self {
            ns: ns.into(),
            inner: PacketData::BinaryAck(BinaryPacket::new(data, bin), ack_id),
        }
    }

    pub fn invalid_namespace(ns: impl Into<String>) -> Self {
        Self {
            ns: ns.into(),
            inner: PacketData::ConnectError("Invalid namespace".to_string()),
        }
    }

    pub fn connect_error(ns: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            ns: ns.into(),
            inner: PacketData::ConnectError(message.into()),
        }
    }

    /// The server's reply to a successful admission: carries the new
    /// socket's id so the client can address room-scoped traffic and acks
    /// to itself (spec.md §4.4 "onconnect ... send a CONNECT packet").
    pub fn connected(ns: impl Into<String>, sid: impl fmt::Display) -> Self {
        Self {
            ns: ns.into(),
            inner: PacketData::Connect(Some(serde_json::json!({ "sid": sid.to_string() }))),
        }
    }

    /// Encodes this packet into the transport frames that carry it: one
    /// text frame, optionally followed by raw binary frames for each
    /// attachment (spec.md §4.1).
    pub fn encode(self) -> Vec<Frame> {
        let ty = self.inner.type_tag();
        let mut head = String::new();
        head.push((b'0' + ty as u8) as char);

        let bin = match &self.inner {
            PacketData::BinaryEvent(_, p, _) | PacketData::BinaryAck(p, _) => {
                head.push_str(&format!("{}-", p.bin.len()));
                p.bin.clone()
            }
            _ => Vec::new(),
        };

        if self.ns != "/" {
            head.push_str(&self.ns);
            head.push(',');
        }

        match &self.inner {
            PacketData::Event(_, _, Some(id)) | PacketData::BinaryEvent(_, _, Some(id)) => {
                head.push_str(&id.to_string())
            }
            PacketData::EventAck(_, id) | PacketData::BinaryAck(_, id) => {
                head.push_str(&id.to_string())
            }
            _ => {}
        }

        let payload = match self.inner {
            PacketData::Connect(auth) => auth.map(|v| v.to_string()),
            PacketData::Disconnect => None,
            PacketData::Event(event, data, _) => Some(event_array(event, data)),
            PacketData::BinaryEvent(event, p, _) => Some(event_array(event, p.data)),
            PacketData::EventAck(data, _) => Some(data.to_string()),
            PacketData::BinaryAck(p, _) => Some(p.data.to_string()),
            PacketData::ConnectError(msg) => {
                Some(serde_json::json!({ "message": msg }).to_string())
            }
        };
        if let Some(payload) = payload {
            head.push_str(&payload);
        }

        let mut frames = vec![Frame::Text(head)];
        frames.extend(bin.into_iter().map(Frame::Binary));
        frames
    }
}

fn event_array(event: String, data: Value) -> String {
    let mut arr = vec![Value::String(event)];
    match data {
        Value::Array(items) => arr.extend(items),
        Value::Null => {}
        other => arr.push(other),
    }
    Value::Array(arr).to_string()
}

/// Errors from decoding a malformed text frame (spec.md §7 item 1, "protocol
/// violation").
#[derive(Debug, thiserror::Error)]
pub enum PacketDecodeError {
    #[error("empty packet")]
    Empty,
    #[error("unknown packet type {0}")]
    UnknownType(u8),
    #[error("invalid payload: {0}")]
    InvalidPayload(#[from] serde_json::Error),
    #[error("event packets must carry a non-empty array whose first element is the event name")]
    MissingEventName,
    #[error("received a binary frame with no packet awaiting attachments")]
    UnexpectedBinaryFrame,
}

/// Accumulates frames into whole [`Packet`]s, reassembling binary
/// attachments as they arrive (spec.md §4.1 "Decoder").
#[derive(Debug, Default)]
pub struct PacketDecoder {
    /// `(ns, event, data, ack id, is_ack)`.
    partial: Option<(String, String, Value, Option<i64>, bool)>,
    collected: Vec<Vec<u8>>,
    pending_attachments: usize,
}

impl PacketDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feeds one frame in. Returns `Some(packet)` once a whole logical
    /// packet (including every expected attachment) has arrived.
    pub fn add(&mut self, frame: Frame) -> Result<Option<Packet>, PacketDecodeError> {
        match frame {
            Frame::Text(text) => self.add_text(&text),
            Frame::Binary(data) => self.add_binary(data),
        }
    }

    fn add_text(&mut self, text: &str) -> Result<Option<Packet>, PacketDecodeError> {
        let mut chars = text.char_indices();
        let (_, first) = chars.next().ok_or(PacketDecodeError::Empty)?;
        let digit = first.to_digit(10).ok_or(PacketDecodeError::UnknownType(first as u8))? as u8;
        let ty = PacketType::from_digit(digit).ok_or(PacketDecodeError::UnknownType(digit))?;

        let mut rest = &text[1..];
        let mut attachments = 0usize;
        if matches!(ty, PacketType::BinaryEvent | PacketType::BinaryAck) {
            if let Some(dash) = rest.find('-') {
                attachments = rest[..dash].parse().unwrap_or(0);
                rest = &rest[dash + 1..];
            }
        }

        let ns = if rest.starts_with('/') {
            let end = rest.find(',').unwrap_or(rest.len());
            let ns = rest[..end].to_string();
            rest = rest.get(end + 1..).unwrap_or("");
            ns
        } else {
            "/".to_string()
        };

        let digits_end = rest.find(|c: char| !c.is_ascii_digit()).unwrap_or(rest.len());
        let ack_id = if digits_end > 0 {
            rest[..digits_end].parse().ok()
        } else {
            None
        };
        let payload = &rest[digits_end..];

        let packet = match ty {
            PacketType::Connect => Packet {
                ns,
                inner: PacketData::Connect(if payload.is_empty() {
                    None
                } else {
                    Some(serde_json::from_str(payload)?)
                }),
            },
            PacketType::Disconnect => Packet {
                ns,
                inner: PacketData::Disconnect,
            },
            PacketType::ConnectError => {
                let value: Value = serde_json::from_str(payload)?;
                let message = value
                    .get("message")
                    .and_then(|v| v.as_str())
                    .unwrap_or_default()
                    .to_string();
                Packet {
                    ns,
                    inner: PacketData::ConnectError(message),
                }
            }
            PacketType::Event => {
                let (event, data) = split_event_array(payload)?;
                Packet {
                    ns,
                    inner: PacketData::Event(event, data, ack_id),
                }
            }
            PacketType::Ack => {
                let data: Value = serde_json::from_str(payload)?;
                Packet {
                    ns,
                    inner: PacketData::EventAck(data, ack_id.ok_or(PacketDecodeError::Empty)?),
                }
            }
            PacketType::BinaryEvent => {
                let (event, data) = split_event_array(payload)?;
                if attachments == 0 {
                    return Ok(Some(Packet {
                        ns,
                        inner: PacketData::BinaryEvent(event, BinaryPacket::new(data, vec![]), ack_id),
                    }));
                }
                self.partial = Some((ns, event, data, ack_id, false));
                self.pending_attachments = attachments;
                return Ok(None);
            }
            PacketType::BinaryAck => {
                let data: Value = serde_json::from_str(payload)?;
                let ack_id = ack_id.ok_or(PacketDecodeError::Empty)?;
                if attachments == 0 {
                    return Ok(Some(Packet {
                        ns,
                        inner: PacketData::BinaryAck(BinaryPacket::new(data, vec![]), ack_id),
                    }));
                }
                self.partial = Some((ns, String::new(), data, Some(ack_id), true));
                self.pending_attachments = attachments;
                return Ok(None);
            }
        };
        Ok(Some(packet))
    }

    fn add_binary(&mut self, data: Vec<u8>) -> Result<Option<Packet>, PacketDecodeError> {
        if self.partial.is_none() {
            return Err(PacketDecodeError::UnexpectedBinaryFrame);
        }
        self.collected.push(data);
        if self.collected.len() < self.pending_attachments {
            return Ok(None);
        }

        let bin = std::mem::take(&mut self.collected);
        let (ns, event, value, ack_id, is_ack) = self.partial.take().unwrap();
        self.pending_attachments = 0;

        let packet = if is_ack {
            PacketData::BinaryAck(BinaryPacket::new(value, bin), ack_id.unwrap())
        } else {
            PacketData::BinaryEvent(event, BinaryPacket::new(value, bin), ack_id)
        };
        Ok(Some(Packet { ns, inner: packet }))
    }

    /// Releases any accumulated partial state (spec.md §4.1 "destroy").
    pub fn destroy(&mut self) {
        self.partial = None;
        self.collected.clear();
        self.pending_attachments = 0;
    }
}

fn split_event_array(payload: &str) -> Result<(String, Value), PacketDecodeError> {
    let value: Value = serde_json::from_str(payload)?;
    let Value::Array(mut items) = value else {
        return Err(PacketDecodeError::MissingEventName);
    };
    if items.is_empty() {
        return Err(PacketDecodeError::MissingEventName);
    }
    let event = items.remove(0);
    let Value::String(event) = event else {
        return Err(PacketDecodeError::MissingEventName);
    };
    let data = match items.len() {
        0 => Value::Null,
        1 => items.into_iter().next().unwrap(),
        _ => Value::Array(items),
    };
    Ok((event, data))
}

impl fmt::Display for PacketType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", *self as u8)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_round_trips() {
        let packet = Packet::event("/", "ping", serde_json::json!([1, 2]));
        let frames = packet.clone().encode();
        assert_eq!(frames.len(), 1);
        let mut decoder = PacketDecoder::new();
        let decoded = decoder.add(frames.into_iter().next().unwrap()).unwrap().unwrap();
        assert_eq!(decoded, packet);
    }

    #[test]
    fn event_with_ack_id_round_trips() {
        let mut packet = Packet::event("/chat", "ping", serde_json::json!(1));
        packet.inner.set_ack_id(7);
        let frames = packet.clone().encode();
        let mut decoder = PacketDecoder::new();
        let decoded = decoder.add(frames.into_iter().next().unwrap()).unwrap().unwrap();
        assert_eq!(decoded, packet);
    }

    #[test]
    fn binary_event_reassembles_attachments() {
        let packet = Packet::bin_event(
            "/",
            "upload",
            serde_json::json!(null),
            vec![vec![1, 2, 3], vec![4, 5]],
        );
        let frames = packet.clone().encode();
        assert_eq!(frames.len(), 3);

        let mut decoder = PacketDecoder::new();
        let mut result = None;
        for frame in frames {
            result = decoder.add(frame).unwrap();
        }
        assert_eq!(result.unwrap(), packet);
    }

    #[test]
    fn binary_event_reassembly_preserves_non_default_namespace() {
        let packet = Packet::bin_event("/chat", "upload", serde_json::json!(null), vec![vec![9]]);
        let frames = packet.clone().encode();
        let mut decoder = PacketDecoder::new();
        let mut result = None;
        for frame in frames {
            result = decoder.add(frame).unwrap();
        }
        let decoded = result.unwrap();
        assert_eq!(decoded.ns, "/chat");
        assert_eq!(decoded, packet);
    }

    #[test]
    fn invalid_namespace_error_round_trips() {
        let packet = Packet::invalid_namespace("/admin");
        let frames = packet.clone().encode();
        let mut decoder = PacketDecoder::new();
        let decoded = decoder.add(frames.into_iter().next().unwrap()).unwrap().unwrap();
        assert_eq!(decoded, packet);
    }

    #[test]
    fn malformed_type_digit_is_rejected() {
        let mut decoder = PacketDecoder::new();
        let err = decoder.add(Frame::Text("9garbage".to_string())).unwrap_err();
        assert!(matches!(err, PacketDecodeError::UnknownType(_)));
    }
}
