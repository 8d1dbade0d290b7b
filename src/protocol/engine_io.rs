//! Engine.IO v4 packets as carried by WebSocket text frames.
//!
//! Each text frame holds exactly one packet: a single type digit followed by the payload.
//! Binary frames carry raw attachments and never go through this module.

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Handshake sent by the server in the `open` packet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Handshake {
    pub sid: String,
    #[serde(default)]
    pub upgrades: Vec<String>,
    pub ping_interval: u64,
    pub ping_timeout: u64,
    #[serde(default)]
    pub max_payload: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Packet {
    Open(Handshake),
    Close,
    Ping(String),
    Pong(String),
    Message(String),
    Upgrade,
    Noop,
}

impl Packet {
    pub fn decode(text: &str) -> Result<Self> {
        let mut chars = text.chars();
        let kind = chars
            .next()
            .ok_or_else(|| Error::protocol("empty engine.io packet"))?;
        let payload = chars.as_str();

        let packet = match kind {
            '0' => Packet::Open(serde_json::from_str(payload).map_err(|err| {
                Error::protocol(format!("invalid engine.io handshake: {err}"))
            })?),
            '1' => Packet::Close,
            '2' => Packet::Ping(payload.to_owned()),
            '3' => Packet::Pong(payload.to_owned()),
            '4' => Packet::Message(payload.to_owned()),
            '5' => Packet::Upgrade,
            '6' => Packet::Noop,
            other => {
                return Err(Error::protocol(format!(
                    "unknown engine.io packet type '{other}'"
                )));
            }
        };
        Ok(packet)
    }

    pub fn encode(&self) -> String {
        match self {
            // Clients never send `open`; encoding it is only useful for fakes in tests.
            Packet::Open(handshake) => {
                format!("0{}", serde_json::to_string(handshake).unwrap_or_default())
            }
            Packet::Close => "1".to_owned(),
            Packet::Ping(data) => format!("2{data}"),
            Packet::Pong(data) => format!("3{data}"),
            Packet::Message(data) => format!("4{data}"),
            Packet::Upgrade => "5".to_owned(),
            Packet::Noop => "6".to_owned(),
        }
    }
}
