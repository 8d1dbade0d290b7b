//! Chat transcript model.
//!
//! Messages are append-only. The one exception is the *live* user bubble: while the user is
//! talking, `transcript_update` events keep overwriting it in place. The bubble is frozen as
//! soon as another message is appended or a new turn starts.

use serde::Serialize;

/// Stable handle of a chat message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct MessageId(usize);

impl MessageId {
    pub fn index(self) -> usize {
        self.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Sender {
    User,
    Agent,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChatMessage {
    pub id: MessageId,
    pub sender: Sender,
    pub text: String,
}

/// How successive transcript updates combine into the live user bubble.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "cli", derive(clap::ValueEnum))]
pub enum TranscriptMode {
    /// Each update is a full snapshot of the turn so far.
    #[default]
    Replace,

    /// Final updates are appended to a running prefix; partial updates trail it.
    Accumulate,
}

#[derive(Debug, Clone, Default)]
pub struct Transcript {
    mode: TranscriptMode,
    messages: Vec<ChatMessage>,
    live_user: Option<MessageId>,
    finalized: String,
}

impl Transcript {
    pub fn new(mode: TranscriptMode) -> Self {
        Self {
            mode,
            ..Self::default()
        }
    }

    pub fn mode(&self) -> TranscriptMode {
        self.mode
    }

    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    pub fn message(&self, id: MessageId) -> Option<&ChatMessage> {
        self.messages.get(id.0)
    }

    /// The user bubble currently being updated, if any.
    pub fn live_user_message(&self) -> Option<MessageId> {
        self.live_user
    }

    /// Append a message and freeze the live user bubble.
    pub fn add_message(&mut self, sender: Sender, text: impl Into<String>) -> MessageId {
        self.freeze();
        self.push(sender, text.into())
    }

    /// Apply a transcript update to the live user bubble, creating it on first use.
    ///
    /// Returns the bubble's id and whether it was created by this call.
    pub fn update_user_message(&mut self, transcript: &str, is_final: bool) -> (MessageId, bool) {
        let text = match self.mode {
            TranscriptMode::Replace => transcript.to_owned(),
            TranscriptMode::Accumulate => {
                let text = format!("{}{}", self.finalized, transcript);
                if is_final {
                    self.finalized.push_str(transcript);
                    self.finalized.push(' ');
                }
                text
            }
        };

        if let Some(id) = self.live_user {
            if let Some(message) = self.messages.get_mut(id.0) {
                message.text = text;
                return (id, false);
            }
        }

        let id = self.push(Sender::User, text);
        self.live_user = Some(id);
        (id, true)
    }

    /// Begin a new user turn: freeze the live bubble and forget accumulated text.
    pub fn start_turn(&mut self) {
        self.freeze();
    }

    fn freeze(&mut self) {
        self.live_user = None;
        self.finalized.clear();
    }

    fn push(&mut self, sender: Sender, text: String) -> MessageId {
        let id = MessageId(self.messages.len());
        self.messages.push(ChatMessage { id, sender, text });
        id
    }
}
