use std::io::Write;

use crate::render::{JsonLinesRenderer, Renderer, TextRenderer};

/// The supported output formats for the chat transcript and status line.
///
/// Integration notes:
/// - `ValueEnum` (feature `cli`) allows this enum to be used directly as a CLI flag.
/// - Each variant maps to a concrete `Renderer` implementation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "cli", derive(clap::ValueEnum))]
pub enum OutputType {
    /// Human-readable chat bubbles with a live status line.
    #[default]
    Text,

    /// One JSON object per event (newline-delimited JSON).
    Json,
}

impl OutputType {
    /// Build the renderer for this format on top of `w`.
    pub fn renderer<W: Write + 'static>(self, w: W) -> Box<dyn Renderer> {
        match self {
            OutputType::Text => Box::new(TextRenderer::new(w)),
            OutputType::Json => Box::new(JsonLinesRenderer::new(w)),
        }
    }
}
