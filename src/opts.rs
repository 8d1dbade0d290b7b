use crate::output_type::OutputType;
use crate::transcript::TranscriptMode;
use crate::vad::VadPolicy;

/// Default server the client connects to.
pub const DEFAULT_SERVER_URL: &str = "http://localhost:5000";

/// Default capture frame: 4096 samples, 256 ms at 16 kHz.
pub const DEFAULT_FRAME_SIZE: usize = 4096;

/// Options that control how a voice session behaves.
///
/// This struct represents *library-level configuration*, not CLI flags directly.
/// The CLI is responsible for mapping user input into this type so that:
/// - the library remains reusable outside of a CLI context
/// - other frontends (tests, embedding applications) can construct options programmatically
#[derive(Debug, Clone)]
pub struct Opts {
    /// Base URL of the voice server (`http`, `https`, `ws` or `wss`).
    pub server_url: String,

    /// Agent/chat identifier forwarded to the server as the `agent_id` handshake parameter.
    pub agent_id: Option<String>,

    /// Whether the client decides when the user's turn ends.
    ///
    /// When enabled:
    /// - Trailing silence (per `vad_policy`) ends the turn and sends `stop_stream`.
    /// - A turn without any speech is discarded silently and capture restarts.
    ///
    /// When disabled (the older server protocol):
    /// - `start_stream` is sent whenever capture starts.
    /// - Capture runs until the agent starts answering.
    pub enable_voice_activity_detection: bool,

    /// End-of-turn detection tunables.
    pub vad_policy: VadPolicy,

    /// Samples per captured frame (and per `audio_chunk` event).
    pub frame_size: usize,

    /// How transcript updates combine into the user's chat bubble.
    pub transcript_mode: TranscriptMode,

    /// The desired output format for the transcript and status line.
    pub output_type: OutputType,
}

impl Default for Opts {
    fn default() -> Self {
        Self {
            server_url: DEFAULT_SERVER_URL.to_owned(),
            agent_id: None,
            enable_voice_activity_detection: true,
            vad_policy: VadPolicy::default(),
            frame_size: DEFAULT_FRAME_SIZE,
            transcript_mode: TranscriptMode::Replace,
            output_type: OutputType::Text,
        }
    }
}
