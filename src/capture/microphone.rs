use std::sync::mpsc as std_mpsc;
use std::thread;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{FromSample, Sample, SampleFormat, SizedSample, Stream, StreamConfig};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::{AudioSource, Capture, FRAME_QUEUE_DEPTH};
use crate::pipeline::AudioPipeline;
use crate::{Error, Result};

/// The default input device, captured at its native configuration.
///
/// The cpal stream is not `Send` on every platform, so each capture owns it on a dedicated
/// thread that parks until the capture is stopped. Samples are normalized to mono 16 kHz inside
/// the device callback and forwarded through a bounded channel; when the consumer falls behind,
/// frames are dropped rather than blocking the audio thread.
#[derive(Debug, Default, Clone)]
pub struct MicrophoneSource {
    device_name: Option<String>,
}

impl MicrophoneSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Capture from the named input device instead of the host default.
    pub fn with_device(name: impl Into<String>) -> Self {
        Self {
            device_name: Some(name.into()),
        }
    }

    /// Names of the host's input devices.
    pub fn list_devices() -> Result<Vec<String>> {
        let devices = cpal::default_host()
            .input_devices()
            .map_err(|err| Error::Audio(err.to_string()))?;
        Ok(devices.filter_map(|d| d.name().ok()).collect())
    }
}

impl AudioSource for MicrophoneSource {
    fn start(&mut self, frame_size: usize) -> Result<Capture> {
        let (frames_tx, frames_rx) = mpsc::channel(FRAME_QUEUE_DEPTH);
        let (ready_tx, ready_rx) = std_mpsc::channel::<Result<()>>();
        let (stop_tx, stop_rx) = std_mpsc::channel::<()>();
        let device_name = self.device_name.clone();

        thread::Builder::new()
            .name("talkback-mic".to_owned())
            .spawn(move || {
                let stream = match open_stream(device_name.as_deref(), frame_size, frames_tx) {
                    Ok(stream) => stream,
                    Err(err) => {
                        let _ = ready_tx.send(Err(err));
                        return;
                    }
                };
                let _ = ready_tx.send(Ok(()));

                // Parks until the capture is stopped (or its handle dropped).
                let _ = stop_rx.recv();
                drop(stream);
                debug!("microphone released");
            })
            .map_err(|err| Error::Audio(format!("failed to spawn capture thread: {err}")))?;

        ready_rx
            .recv()
            .map_err(|_| Error::Audio("capture thread exited during startup".to_owned()))??;

        Ok(Capture::new(frames_rx, move || {
            let _ = stop_tx.send(());
        }))
    }
}

fn open_stream(
    device_name: Option<&str>,
    frame_size: usize,
    frames: mpsc::Sender<Vec<f32>>,
) -> Result<Stream> {
    let host = cpal::default_host();
    let device = match device_name {
        Some(name) => host
            .input_devices()
            .map_err(|err| Error::PermissionDenied(err.to_string()))?
            .find(|d| d.name().map(|n| n == name).unwrap_or(false))
            .ok_or_else(|| Error::PermissionDenied(format!("input device '{name}' not found")))?,
        None => host
            .default_input_device()
            .ok_or_else(|| Error::PermissionDenied("no input device available".to_owned()))?,
    };

    let supported = device
        .default_input_config()
        .map_err(|err| Error::PermissionDenied(err.to_string()))?;
    let sample_format = supported.sample_format();
    let config: StreamConfig = supported.into();

    info!(
        device = device.name().unwrap_or_else(|_| "unknown".to_owned()),
        sample_rate = config.sample_rate.0,
        channels = config.channels,
        format = ?sample_format,
        "opening microphone"
    );

    let pipeline = AudioPipeline::new(config.sample_rate.0, config.channels as usize, frame_size)
        .map_err(|err| Error::Audio(format!("{err:#}")))?;

    let stream = match sample_format {
        SampleFormat::F32 => build_stream::<f32>(&device, &config, pipeline, frames),
        SampleFormat::I16 => build_stream::<i16>(&device, &config, pipeline, frames),
        SampleFormat::U16 => build_stream::<u16>(&device, &config, pipeline, frames),
        SampleFormat::I32 => build_stream::<i32>(&device, &config, pipeline, frames),
        other => {
            return Err(Error::Audio(format!("unsupported input sample format {other:?}")));
        }
    }?;

    stream
        .play()
        .map_err(|err| Error::PermissionDenied(err.to_string()))?;
    Ok(stream)
}

fn build_stream<T>(
    device: &cpal::Device,
    config: &StreamConfig,
    mut pipeline: AudioPipeline,
    frames: mpsc::Sender<Vec<f32>>,
) -> Result<Stream>
where
    T: SizedSample,
    f32: FromSample<T>,
{
    let mut scratch = Vec::new();
    device
        .build_input_stream(
            config,
            move |data: &[T], _: &cpal::InputCallbackInfo| {
                scratch.clear();
                scratch.extend(data.iter().map(|s| s.to_sample::<f32>()));
                let pushed = pipeline.push_interleaved(&scratch, |frame| {
                    match frames.try_send(frame) {
                        Ok(()) => Ok(true),
                        Err(mpsc::error::TrySendError::Full(_)) => {
                            warn!("capture consumer is behind; dropping a frame");
                            Ok(true)
                        }
                        Err(mpsc::error::TrySendError::Closed(_)) => Ok(false),
                    }
                });
                if let Err(err) = pushed {
                    warn!(error = ?err, "capture pipeline failed");
                }
            },
            |err| warn!(error = %err, "input stream error"),
            None,
        )
        .map_err(|err| Error::PermissionDenied(err.to_string()))
}
