use std::io::Write;

use super::{RenderEvent, Renderer};
use crate::Result;
use crate::transcript::{MessageId, Sender};

/// Erase the current terminal line and return the cursor to column 0.
const REDRAW: &str = "\r\x1b[2K";

/// A `Renderer` for humans at a terminal.
///
/// The live user bubble is written without a trailing newline so transcript updates can redraw
/// it in place; any other output first terminates that line.
///
/// Example output:
/// ```text
/// -- Listening... [Disconnect]
/// you: what's the weather like
/// -- Thinking... [Disconnect]
/// agent: Sunny, with a light breeze.
/// ```
pub struct TextRenderer<W: Write> {
    w: W,

    /// Message whose line is open at the end of the output, if any.
    live: Option<MessageId>,

    closed: bool,
}

impl<W: Write> TextRenderer<W> {
    pub fn new(w: W) -> Self {
        Self {
            w,
            live: None,
            closed: false,
        }
    }

    fn end_live_line(&mut self) -> Result<()> {
        if self.live.take().is_some() {
            writeln!(self.w)?;
        }
        Ok(())
    }
}

fn speaker(sender: Sender) -> &'static str {
    match sender {
        Sender::User => "you",
        Sender::Agent => "agent",
    }
}

impl<W: Write> Renderer for TextRenderer<W> {
    fn render(&mut self, event: &RenderEvent) -> Result<()> {
        if self.closed {
            return Err(crate::Error::msg(
                "cannot render event: renderer is already closed",
            ));
        }

        match event {
            RenderEvent::State(state) => {
                self.end_live_line()?;
                writeln!(
                    self.w,
                    "-- {} [{}]",
                    state.status_text(),
                    state.control_label()
                )?;
            }
            RenderEvent::MessageAdded { id, sender, text } => {
                self.end_live_line()?;
                match sender {
                    Sender::User => {
                        write!(self.w, "{}: {text}", speaker(*sender))?;
                        self.live = Some(*id);
                    }
                    Sender::Agent => writeln!(self.w, "{}: {text}", speaker(*sender))?,
                }
            }
            RenderEvent::MessageUpdated { id, text } => {
                if self.live == Some(*id) {
                    write!(self.w, "{REDRAW}{}: {text}", speaker(Sender::User))?;
                } else {
                    // The bubble scrolled away; print the new text on its own line.
                    self.end_live_line()?;
                    writeln!(self.w, "{}: {text}", speaker(Sender::User))?;
                }
            }
        }

        self.w.flush()?;
        Ok(())
    }

    /// Terminate any open line and flush. Idempotent.
    fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.end_live_line()?;
        self.w.flush()?;
        self.closed = true;
        Ok(())
    }
}
