use std::io::Cursor;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

use rodio::{Decoder, OutputStream, Sink};
use tokio::sync::oneshot;
use tracing::{debug, info};

use super::{Clip, Playback, Player};
use crate::{Error, Result};

const POLL_INTERVAL: Duration = Duration::from_millis(20);

/// Plays clips on the default output device.
///
/// Each clip gets its own thread, which owns the output stream (not `Send` on every platform)
/// and polls the sink until the clip drains or the playback handle asks it to stop.
#[derive(Debug, Default, Clone, Copy)]
pub struct RodioPlayer;

impl RodioPlayer {
    pub fn new() -> Self {
        Self
    }
}

impl Player for RodioPlayer {
    fn play(&mut self, clip: Clip) -> Result<Playback> {
        let (done_tx, done_rx) = oneshot::channel();
        let stop = Arc::new(AtomicBool::new(false));
        let stop_flag = Arc::clone(&stop);

        thread::Builder::new()
            .name("talkback-playback".to_owned())
            .spawn(move || {
                let _ = done_tx.send(play_blocking(clip, &stop_flag));
            })
            .map_err(|err| Error::Playback(format!("failed to spawn playback thread: {err}")))?;

        Ok(Playback::new(done_rx, move || {
            stop.store(true, Ordering::SeqCst);
        }))
    }
}

fn play_blocking(clip: Clip, stop: &AtomicBool) -> Result<()> {
    let (_stream, handle) =
        OutputStream::try_default().map_err(|err| Error::Playback(err.to_string()))?;
    let sink = Sink::try_new(&handle).map_err(|err| Error::Playback(err.to_string()))?;

    let bytes = clip.len();
    let source = Decoder::new(Cursor::new(clip.into_bytes()))
        .map_err(|err| Error::Playback(format!("cannot decode agent audio: {err}")))?;
    sink.append(source);
    info!(bytes, "playing agent audio");

    while !sink.empty() {
        if stop.load(Ordering::SeqCst) {
            sink.stop();
            debug!("playback stopped early");
            return Ok(());
        }
        thread::sleep(POLL_INTERVAL);
    }
    Ok(())
}
