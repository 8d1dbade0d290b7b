//! Socket.IO v5 packets, carried inside Engine.IO `message` packets.
//!
//! Responsibilities:
//! - Encode/decode the `<type>[<attachments>-][/<nsp>,][<id>][<json>]` text form
//! - Split binary event arguments into placeholders + attachments on the way out
//! - Reassemble binary events from a text packet followed by its attachment frames
//!
//! Notes:
//! - Only the default namespace is used by the client; packets for other namespaces are
//!   surfaced as [`Incoming::Ignored`].
//! - Placeholders are resolved for top-level event arguments only.

use serde_json::{Value, json};

use crate::{Error, Result};

pub const DEFAULT_NAMESPACE: &str = "/";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketType {
    Connect,
    Disconnect,
    Event,
    Ack,
    ConnectError,
    BinaryEvent,
    BinaryAck,
}

impl PacketType {
    fn from_digit(digit: char) -> Option<Self> {
        let kind = match digit {
            '0' => Self::Connect,
            '1' => Self::Disconnect,
            '2' => Self::Event,
            '3' => Self::Ack,
            '4' => Self::ConnectError,
            '5' => Self::BinaryEvent,
            '6' => Self::BinaryAck,
            _ => return None,
        };
        Some(kind)
    }

    fn digit(self) -> char {
        match self {
            Self::Connect => '0',
            Self::Disconnect => '1',
            Self::Event => '2',
            Self::Ack => '3',
            Self::ConnectError => '4',
            Self::BinaryEvent => '5',
            Self::BinaryAck => '6',
        }
    }

    pub fn is_binary(self) -> bool {
        matches!(self, Self::BinaryEvent | Self::BinaryAck)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Packet {
    pub kind: PacketType,
    pub namespace: String,
    pub id: Option<u64>,
    /// Number of binary frames that follow this packet (binary types only).
    pub attachments: usize,
    pub data: Option<Value>,
}

impl Packet {
    fn new(kind: PacketType, data: Option<Value>) -> Self {
        Self {
            kind,
            namespace: DEFAULT_NAMESPACE.to_owned(),
            id: None,
            attachments: 0,
            data,
        }
    }

    pub fn connect() -> Self {
        Self::new(PacketType::Connect, None)
    }

    pub fn disconnect() -> Self {
        Self::new(PacketType::Disconnect, None)
    }

    pub fn encode(&self) -> String {
        let mut out = String::new();
        out.push(self.kind.digit());
        if self.kind.is_binary() {
            out.push_str(&self.attachments.to_string());
            out.push('-');
        }
        if self.namespace != DEFAULT_NAMESPACE {
            out.push_str(&self.namespace);
            out.push(',');
        }
        if let Some(id) = self.id {
            out.push_str(&id.to_string());
        }
        if let Some(data) = &self.data {
            out.push_str(&data.to_string());
        }
        out
    }

    pub fn decode(text: &str) -> Result<Self> {
        let mut chars = text.chars();
        let digit = chars
            .next()
            .ok_or_else(|| Error::protocol("empty socket.io packet"))?;
        let kind = PacketType::from_digit(digit)
            .ok_or_else(|| Error::protocol(format!("unknown socket.io packet type '{digit}'")))?;
        let mut rest = chars.as_str();

        let mut attachments = 0;
        if kind.is_binary() {
            let (count, tail) = rest
                .split_once('-')
                .ok_or_else(|| Error::protocol("binary packet without attachment count"))?;
            attachments = count
                .parse()
                .map_err(|_| Error::protocol(format!("invalid attachment count '{count}'")))?;
            rest = tail;
        }

        let mut namespace = DEFAULT_NAMESPACE.to_owned();
        if rest.starts_with('/') {
            match rest.split_once(',') {
                Some((nsp, tail)) => {
                    namespace = nsp.to_owned();
                    rest = tail;
                }
                None => {
                    namespace = rest.to_owned();
                    rest = "";
                }
            }
        }

        let id_len = rest.bytes().take_while(u8::is_ascii_digit).count();
        let id = if id_len > 0 {
            let (digits, tail) = rest.split_at(id_len);
            rest = tail;
            Some(
                digits
                    .parse()
                    .map_err(|_| Error::protocol(format!("invalid packet id '{digits}'")))?,
            )
        } else {
            None
        };

        let data = if rest.is_empty() {
            None
        } else {
            Some(
                serde_json::from_str(rest)
                    .map_err(|err| Error::protocol(format!("invalid packet payload: {err}")))?,
            )
        };

        Ok(Self {
            kind,
            namespace,
            id,
            attachments,
            data,
        })
    }
}

/// One event argument: plain JSON or a binary blob.
#[derive(Debug, Clone, PartialEq)]
pub enum Arg {
    Json(Value),
    Binary(Vec<u8>),
}

/// A named event with its arguments.
#[derive(Debug, Clone, PartialEq)]
pub struct Event {
    pub name: String,
    pub args: Vec<Arg>,
}

impl Event {
    pub fn new(name: impl Into<String>, args: Vec<Arg>) -> Self {
        Self {
            name: name.into(),
            args,
        }
    }

    /// Split into the text packet and the binary frames that must follow it, in order.
    pub fn into_packet(self) -> (Packet, Vec<Vec<u8>>) {
        let mut attachments = Vec::new();
        let mut data = Vec::with_capacity(self.args.len() + 1);
        data.push(Value::String(self.name));

        for arg in self.args {
            match arg {
                Arg::Json(value) => data.push(value),
                Arg::Binary(bytes) => {
                    data.push(json!({ "_placeholder": true, "num": attachments.len() }));
                    attachments.push(bytes);
                }
            }
        }

        let kind = if attachments.is_empty() {
            PacketType::Event
        } else {
            PacketType::BinaryEvent
        };
        let mut packet = Packet::new(kind, Some(Value::Array(data)));
        packet.attachments = attachments.len();
        (packet, attachments)
    }

    fn from_packet(packet: Packet, mut attachments: Vec<Option<Vec<u8>>>) -> Result<Self> {
        let Some(Value::Array(items)) = packet.data else {
            return Err(Error::protocol("event payload is not an array"));
        };
        let mut items = items.into_iter();
        let name = match items.next() {
            Some(Value::String(name)) => name,
            _ => return Err(Error::protocol("event payload has no name")),
        };

        let mut args = Vec::with_capacity(items.len());
        for item in items {
            match placeholder_index(&item) {
                Some(num) => {
                    let bytes = attachments
                        .get_mut(num)
                        .and_then(Option::take)
                        .ok_or_else(|| {
                            Error::protocol(format!("missing binary attachment {num}"))
                        })?;
                    args.push(Arg::Binary(bytes));
                }
                None => args.push(Arg::Json(item)),
            }
        }

        Ok(Self { name, args })
    }
}

fn placeholder_index(value: &Value) -> Option<usize> {
    let obj = value.as_object()?;
    if obj.get("_placeholder")?.as_bool()? {
        obj.get("num")?.as_u64().map(|n| n as usize)
    } else {
        None
    }
}

/// A fully decoded inbound Socket.IO packet.
#[derive(Debug, Clone, PartialEq)]
pub enum Incoming {
    Connected { sid: Option<String> },
    ConnectError(String),
    Disconnected,
    Event(Event),
    /// Acks and packets for other namespaces; the client never asks for either.
    Ignored(PacketType),
}

struct Pending {
    packet: Packet,
    attachments: Vec<Vec<u8>>,
}

/// Stateful decoder that reassembles binary events across frames.
#[derive(Default)]
pub struct Decoder {
    pending: Option<Pending>,
}

impl Decoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether a binary packet is still waiting for attachment frames.
    pub fn is_awaiting_attachments(&self) -> bool {
        self.pending.is_some()
    }

    /// Decode the payload of an Engine.IO `message` packet.
    ///
    /// Returns `Ok(None)` when the packet announces attachments that have not arrived yet.
    pub fn decode_text(&mut self, text: &str) -> Result<Option<Incoming>> {
        if self.pending.take().is_some() {
            return Err(Error::protocol(
                "text packet arrived before all binary attachments",
            ));
        }

        let packet = Packet::decode(text)?;
        if packet.kind.is_binary() && packet.attachments > 0 {
            let expected = packet.attachments;
            self.pending = Some(Pending {
                packet,
                attachments: Vec::with_capacity(expected),
            });
            return Ok(None);
        }
        finish(packet, Vec::new()).map(Some)
    }

    /// Feed one binary WebSocket frame.
    pub fn decode_binary(&mut self, bytes: Vec<u8>) -> Result<Option<Incoming>> {
        let Some(pending) = self.pending.as_mut() else {
            return Err(Error::protocol("binary frame without a pending packet"));
        };
        pending.attachments.push(bytes);
        if pending.attachments.len() < pending.packet.attachments {
            return Ok(None);
        }

        match self.pending.take() {
            Some(Pending {
                packet,
                attachments,
            }) => finish(packet, attachments).map(Some),
            None => Ok(None),
        }
    }
}

fn finish(packet: Packet, attachments: Vec<Vec<u8>>) -> Result<Incoming> {
    if packet.namespace != DEFAULT_NAMESPACE {
        return Ok(Incoming::Ignored(packet.kind));
    }

    let incoming = match packet.kind {
        PacketType::Connect => Incoming::Connected {
            sid: packet
                .data
                .as_ref()
                .and_then(|d| d.get("sid"))
                .and_then(Value::as_str)
                .map(str::to_owned),
        },
        PacketType::ConnectError => {
            let message = match &packet.data {
                Some(Value::String(s)) => s.clone(),
                Some(data) => data
                    .get("message")
                    .and_then(Value::as_str)
                    .map(str::to_owned)
                    .unwrap_or_else(|| data.to_string()),
                None => "connection refused".to_owned(),
            };
            Incoming::ConnectError(message)
        }
        PacketType::Disconnect => Incoming::Disconnected,
        PacketType::Event | PacketType::BinaryEvent => {
            let attachments = attachments.into_iter().map(Some).collect();
            Incoming::Event(Event::from_packet(packet, attachments)?)
        }
        kind @ (PacketType::Ack | PacketType::BinaryAck) => Incoming::Ignored(kind),
    };
    Ok(incoming)
}
