//! The event contract between the client and the voice server, plus its wire framing.
//!
//! `ClientEvent`/`ServerEvent` are the application-level messages; `engine_io` and `socket_io`
//! describe how they travel over a WebSocket.

pub mod engine_io;
pub mod socket_io;

use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

use crate::{Error, Result};
use socket_io::{Arg, Event};

pub const EVENT_AUDIO_CHUNK: &str = "audio_chunk";
pub const EVENT_START_STREAM: &str = "start_stream";
pub const EVENT_STOP_STREAM: &str = "stop_stream";
pub const EVENT_AGENT_RESPONSE: &str = "agent_response";
pub const EVENT_TRANSCRIPT_UPDATE: &str = "transcript_update";
pub const EVENT_AUDIO_STREAM_END: &str = "audio_stream_end";

/// Events the client sends.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientEvent {
    /// One frame of mono 16 kHz PCM16LE.
    AudioChunk(Vec<u8>),

    /// The user turn has begun (legacy mode only).
    StartStream,

    /// The user turn is over; the server should respond.
    StopStream,
}

impl ClientEvent {
    pub fn name(&self) -> &'static str {
        match self {
            ClientEvent::AudioChunk(_) => EVENT_AUDIO_CHUNK,
            ClientEvent::StartStream => EVENT_START_STREAM,
            ClientEvent::StopStream => EVENT_STOP_STREAM,
        }
    }

    pub fn into_event(self) -> Event {
        let name = self.name();
        let args = match self {
            ClientEvent::AudioChunk(bytes) => vec![Arg::Binary(bytes)],
            ClientEvent::StartStream | ClientEvent::StopStream => Vec::new(),
        };
        Event::new(name, args)
    }
}

/// Events the server sends.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerEvent {
    AgentResponse { text: String },
    TranscriptUpdate { transcript: String, is_final: bool },
    /// One fragment of encoded agent audio.
    AudioChunk(Vec<u8>),
    AudioStreamEnd,
}

#[derive(Deserialize)]
struct AgentResponsePayload {
    #[serde(default)]
    text: String,
}

#[derive(Deserialize)]
struct TranscriptUpdatePayload {
    #[serde(default)]
    transcript: String,
    #[serde(default)]
    is_final: bool,
}

impl ServerEvent {
    /// Interpret a decoded Socket.IO event.
    ///
    /// Unknown event names yield `Ok(None)`; known names with a malformed payload are errors.
    pub fn from_event(event: Event) -> Result<Option<Self>> {
        let Event { name, args } = event;
        let mut args = args.into_iter();

        let parsed = match name.as_str() {
            EVENT_AGENT_RESPONSE => {
                let payload: AgentResponsePayload = json_arg(&name, args.next())?;
                ServerEvent::AgentResponse { text: payload.text }
            }
            EVENT_TRANSCRIPT_UPDATE => {
                let payload: TranscriptUpdatePayload = json_arg(&name, args.next())?;
                ServerEvent::TranscriptUpdate {
                    transcript: payload.transcript,
                    is_final: payload.is_final,
                }
            }
            EVENT_AUDIO_CHUNK => match args.next() {
                Some(Arg::Binary(bytes)) => ServerEvent::AudioChunk(bytes),
                _ => {
                    return Err(Error::protocol("audio_chunk without a binary payload"));
                }
            },
            EVENT_AUDIO_STREAM_END => ServerEvent::AudioStreamEnd,
            other => {
                debug!(event = other, "ignoring unknown server event");
                return Ok(None);
            }
        };
        Ok(Some(parsed))
    }
}

fn json_arg<T: for<'de> Deserialize<'de>>(name: &str, arg: Option<Arg>) -> Result<T> {
    let value = match arg {
        Some(Arg::Json(value)) => value,
        Some(Arg::Binary(_)) => {
            return Err(Error::protocol(format!("{name}: unexpected binary payload")));
        }
        None => Value::Object(Default::default()),
    };
    serde_json::from_value(value)
        .map_err(|err| Error::protocol(format!("{name}: invalid payload: {err}")))
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn audio_chunk_travels_as_a_binary_argument() {
        let event = ClientEvent::AudioChunk(vec![0, 1]).into_event();
        assert_eq!(event.name, "audio_chunk");
        assert_eq!(event.args, vec![Arg::Binary(vec![0, 1])]);
        assert!(ClientEvent::StopStream.into_event().args.is_empty());
    }

    #[test]
    fn parses_transcript_update_with_and_without_final_flag() -> anyhow::Result<()> {
        let partial = Event::new(
            "transcript_update",
            vec![Arg::Json(json!({"transcript": "hel"}))],
        );
        assert_eq!(
            ServerEvent::from_event(partial)?,
            Some(ServerEvent::TranscriptUpdate {
                transcript: "hel".into(),
                is_final: false
            })
        );

        let fin = Event::new(
            "transcript_update",
            vec![Arg::Json(json!({"transcript": "hello", "is_final": true}))],
        );
        assert_eq!(
            ServerEvent::from_event(fin)?,
            Some(ServerEvent::TranscriptUpdate {
                transcript: "hello".into(),
                is_final: true
            })
        );
        Ok(())
    }

    #[test]
    fn parses_agent_response_and_stream_end() -> anyhow::Result<()> {
        let response = Event::new("agent_response", vec![Arg::Json(json!({"text": "Hi!"}))]);
        assert_eq!(
            ServerEvent::from_event(response)?,
            Some(ServerEvent::AgentResponse { text: "Hi!".into() })
        );
        let end = Event::new("audio_stream_end", Vec::new());
        assert_eq!(
            ServerEvent::from_event(end)?,
            Some(ServerEvent::AudioStreamEnd)
        );
        Ok(())
    }

    #[test]
    fn unknown_events_are_ignored() -> anyhow::Result<()> {
        let event = Event::new("mystery", vec![Arg::Json(json!(1))]);
        assert_eq!(ServerEvent::from_event(event)?, None);
        Ok(())
    }

    #[test]
    fn audio_chunk_requires_binary() {
        let event = Event::new("audio_chunk", vec![Arg::Json(json!("nope"))]);
        assert!(ServerEvent::from_event(event).is_err());
    }
}
