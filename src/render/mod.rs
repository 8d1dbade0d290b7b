//! Presentation of session activity.
//!
//! The session describes *what* changed as [`RenderEvent`]s; a [`Renderer`] decides how it
//! looks. Renderers stream straight into a writer and flush per event so interactive terminals
//! and pipes see output promptly.

mod json_lines;
mod text;

use crate::Result;
use crate::state::AgentState;
use crate::transcript::{MessageId, Sender};

pub use json_lines::JsonLinesRenderer;
pub use text::TextRenderer;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RenderEvent {
    /// The agent state changed (status text and control label follow from it).
    State(AgentState),

    /// A chat bubble was appended.
    MessageAdded {
        id: MessageId,
        sender: Sender,
        text: String,
    },

    /// The live user bubble was rewritten.
    MessageUpdated { id: MessageId, text: String },
}

pub trait Renderer {
    fn render(&mut self, event: &RenderEvent) -> Result<()>;
    fn close(&mut self) -> Result<()>;
}

impl<R: Renderer + ?Sized> Renderer for Box<R> {
    fn render(&mut self, event: &RenderEvent) -> Result<()> {
        (**self).render(event)
    }

    fn close(&mut self) -> Result<()> {
        (**self).close()
    }
}
