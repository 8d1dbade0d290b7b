use std::fmt;

use serde::Serialize;

/// The connection/turn state shown to the user.
///
/// The client loops `Listening → Processing → Speaking → Listening` while connected, and
/// returns to `Disconnected` on an explicit disconnect or a transport failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentState {
    Disconnected,
    Connecting,
    Listening,
    Processing,
    Speaking,
}

impl AgentState {
    /// Status line text for this state.
    pub fn status_text(self) -> &'static str {
        match self {
            AgentState::Disconnected => "Ready",
            AgentState::Connecting => "Connecting...",
            AgentState::Listening => "Listening...",
            AgentState::Processing => "Thinking...",
            AgentState::Speaking => "Speaking...",
        }
    }

    /// Label of the connect/disconnect control in this state.
    pub fn control_label(self) -> &'static str {
        match self {
            AgentState::Disconnected => "Connect",
            _ => "Disconnect",
        }
    }
}

impl fmt::Display for AgentState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            AgentState::Disconnected => "disconnected",
            AgentState::Connecting => "connecting",
            AgentState::Listening => "listening",
            AgentState::Processing => "processing",
            AgentState::Speaking => "speaking",
        };
        f.write_str(name)
    }
}
