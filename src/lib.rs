//! `talkback` is a turn-taking voice chat client.
//!
//! This crate provides:
//! - Microphone (or WAV) capture normalized to 16 kHz mono PCM
//! - A local energy VAD that decides when the user's turn ends
//! - Socket.IO streaming of audio to a voice agent server
//! - Playback of the agent's spoken answer and a live chat transcript
//!
//! The turn-taking logic lives in a synchronous state machine ([`Session`]); [`Client`] drives
//! it against pluggable sockets, audio sources, players and renderers, so the whole loop can be
//! exercised in tests without hardware or a network.

// High-level API (most consumers should start here).
pub mod client;
pub mod opts;
pub mod session;
pub mod state;

// Audio capture, normalization and end-of-turn detection.
pub mod capture;
pub mod pcm;
pub mod pipeline;
pub mod vad;

// Agent audio playback.
pub mod playback;

// Server protocol and socket transport.
pub mod protocol;
pub mod transport;

// Transcript model and output renderers.
pub mod output_type;
pub mod render;
pub mod transcript;

// Logging configuration and control.
#[cfg(feature = "logging")]
pub mod logging;

mod error;

pub use client::{Client, Command};
pub use error::{Error, Result};
pub use opts::Opts;
pub use output_type::OutputType;
pub use session::{Action, Session};
pub use state::AgentState;
pub use transcript::TranscriptMode;

#[cfg(feature = "logging")]
pub use logging::init as init_logging;
