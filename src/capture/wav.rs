use std::fs::File;
use std::io::{BufReader, Read, Seek};
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::thread;
use std::time::Duration;

use anyhow::{Context, bail};
use hound::{SampleFormat, WavReader, WavSpec};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use super::{AudioSource, Capture, FRAME_QUEUE_DEPTH};
use crate::pcm::frames_to_duration;
use crate::pipeline::AudioPipeline;
use crate::{Error, Result};

/// Load WAV audio from a reader and return interleaved samples normalized to `[-1.0, 1.0]`.
///
/// Accepts integer PCM up to 32 bits and 32-bit float, at any sample rate and channel count;
/// the capture pipeline takes care of downmixing and resampling.
pub fn read_wav_samples<R>(reader: R) -> anyhow::Result<(Vec<f32>, WavSpec)>
where
    R: Read + Seek,
{
    let mut reader = WavReader::new(reader).context("failed to read WAV data from reader")?;
    let spec = reader.spec();

    if spec.channels == 0 {
        bail!("WAV file declares zero channels");
    }

    let samples = match spec.sample_format {
        SampleFormat::Float => {
            if spec.bits_per_sample != 32 {
                bail!("unsupported float WAV ({} bits)", spec.bits_per_sample);
            }
            reader
                .samples::<f32>()
                .collect::<std::result::Result<Vec<_>, _>>()
                .context("failed to decode WAV samples")?
        }
        SampleFormat::Int => {
            if spec.bits_per_sample == 0 || spec.bits_per_sample > 32 {
                bail!("unsupported integer WAV ({} bits)", spec.bits_per_sample);
            }
            let full_scale = (1u64 << (spec.bits_per_sample - 1)) as f32;
            reader
                .samples::<i32>()
                .map(|s| s.map(|v| v as f32 / full_scale))
                .collect::<std::result::Result<Vec<_>, _>>()
                .context("failed to decode WAV samples")?
        }
    };

    Ok((samples, spec))
}

/// A WAV recording standing in for a microphone.
///
/// Frames are paced in real time by default, and once the recording is exhausted the source
/// keeps producing silence, so the session sees an endless input just like a live device.
/// Restarting picks up where the previous capture stopped.
///
/// With pacing disabled, frames are produced as fast as the consumer takes them and the capture
/// ends after the recording (batch runs and tests).
pub struct WavSource {
    samples: Arc<[f32]>,
    spec: WavSpec,
    cursor: Arc<AtomicUsize>,
    paced: bool,
}

impl WavSource {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path)
            .with_context(|| format!("failed to open {}", path.display()))
            .map_err(Error::from)?;
        Self::from_reader(BufReader::new(file))
    }

    pub fn from_reader<R: Read + Seek>(reader: R) -> Result<Self> {
        let (samples, spec) = read_wav_samples(reader).map_err(|err| Error::Audio(format!("{err:#}")))?;
        debug!(
            sample_rate = spec.sample_rate,
            channels = spec.channels,
            samples = samples.len(),
            "loaded WAV input"
        );
        Ok(Self {
            samples: samples.into(),
            spec,
            cursor: Arc::new(AtomicUsize::new(0)),
            paced: true,
        })
    }

    /// Enable or disable real-time pacing.
    pub fn paced(mut self, paced: bool) -> Self {
        self.paced = paced;
        self
    }

    pub fn spec(&self) -> WavSpec {
        self.spec
    }

    /// Length of the recording.
    pub fn duration(&self) -> Duration {
        let frames = self.samples.len() / self.spec.channels as usize;
        Duration::from_secs_f64(frames as f64 / self.spec.sample_rate as f64)
    }

    /// Whether every recorded sample has been handed to a capture.
    pub fn is_exhausted(&self) -> bool {
        self.cursor.load(Ordering::SeqCst) >= self.samples.len()
    }
}

impl AudioSource for WavSource {
    fn start(&mut self, frame_size: usize) -> Result<Capture> {
        let channels = self.spec.channels as usize;
        let pipeline = AudioPipeline::new(self.spec.sample_rate, channels, frame_size)
            .map_err(|err| Error::Audio(format!("{err:#}")))?;

        let (frames_tx, frames_rx) = mpsc::channel(FRAME_QUEUE_DEPTH);
        let stop = Arc::new(AtomicBool::new(false));

        let worker = WavWorker {
            samples: Arc::clone(&self.samples),
            cursor: Arc::clone(&self.cursor),
            chunk: frame_size * channels,
            frame_size,
            pace: self.paced.then(|| frames_to_duration(frame_size)),
            pipeline,
            frames: frames_tx,
            stop: Arc::clone(&stop),
        };

        thread::Builder::new()
            .name("talkback-wav".to_owned())
            .spawn(move || {
                if let Err(err) = worker.run() {
                    warn!(error = ?err, "WAV capture failed");
                }
            })
            .map_err(|err| Error::Audio(format!("failed to spawn WAV reader: {err}")))?;

        Ok(Capture::new(frames_rx, move || {
            stop.store(true, Ordering::SeqCst);
        }))
    }
}

struct WavWorker {
    samples: Arc<[f32]>,
    cursor: Arc<AtomicUsize>,
    chunk: usize,
    frame_size: usize,
    pace: Option<Duration>,
    pipeline: AudioPipeline,
    frames: mpsc::Sender<Vec<f32>>,
    stop: Arc<AtomicBool>,
}

impl WavWorker {
    fn run(mut self) -> anyhow::Result<()> {
        let frames = self.frames.clone();
        let stop = Arc::clone(&self.stop);
        let pace = self.pace;
        let mut deliver = move |frame: Vec<f32>| -> anyhow::Result<bool> {
            if stop.load(Ordering::SeqCst) || frames.blocking_send(frame).is_err() {
                return Ok(false);
            }
            if let Some(pace) = pace {
                thread::sleep(pace);
            }
            Ok(true)
        };

        loop {
            // Checked before the cursor moves, so a restart resumes at the first undelivered chunk.
            if self.stop.load(Ordering::SeqCst) {
                return Ok(());
            }
            let start = self.cursor.load(Ordering::SeqCst);
            if start >= self.samples.len() {
                break;
            }
            let end = (start + self.chunk).min(self.samples.len());
            self.cursor.store(end, Ordering::SeqCst);

            if !self
                .pipeline
                .push_interleaved(&self.samples[start..end], &mut deliver)?
            {
                return Ok(());
            }
        }

        self.pipeline.finalize(&mut deliver)?;
        if self.pace.is_none() {
            return Ok(());
        }

        // Silence tail: keep the source endless, the way a live microphone is.
        while deliver(vec![0.0; self.frame_size])? {}
        Ok(())
    }
}
