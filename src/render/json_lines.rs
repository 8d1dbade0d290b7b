use std::io::Write;

use serde_json::json;

use super::{RenderEvent, Renderer};
use crate::Result;

/// A `Renderer` that writes one JSON object per event.
///
/// Example output:
/// ```json
/// {"type":"state","state":"listening","status":"Listening...","control":"Disconnect"}
/// {"type":"message_added","id":0,"sender":"user","text":"hel"}
/// {"type":"message_updated","id":0,"text":"hello"}
/// ```
pub struct JsonLinesRenderer<W: Write> {
    w: W,
    closed: bool,
}

impl<W: Write> JsonLinesRenderer<W> {
    pub fn new(w: W) -> Self {
        Self { w, closed: false }
    }
}

impl<W: Write> Renderer for JsonLinesRenderer<W> {
    fn render(&mut self, event: &RenderEvent) -> Result<()> {
        if self.closed {
            return Err(crate::Error::msg(
                "cannot render event: renderer is already closed",
            ));
        }

        let value = match event {
            RenderEvent::State(state) => json!({
                "type": "state",
                "state": state,
                "status": state.status_text(),
                "control": state.control_label(),
            }),
            RenderEvent::MessageAdded { id, sender, text } => json!({
                "type": "message_added",
                "id": id,
                "sender": sender,
                "text": text,
            }),
            RenderEvent::MessageUpdated { id, text } => json!({
                "type": "message_updated",
                "id": id,
                "text": text,
            }),
        };

        serde_json::to_writer(&mut self.w, &value)?;
        self.w.write_all(b"\n")?;
        self.w.flush()?;
        Ok(())
    }

    /// Flush the underlying writer. Idempotent.
    fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.w.flush()?;
        self.closed = true;
        Ok(())
    }
}
