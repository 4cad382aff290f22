//! Microphone capture via `cpal`, delivered as fixed-size [`AudioFrame`]s.
//!
//! The cpal callback only copies the hardware buffer into a channel.  A
//! dedicated `audio-capture` thread downmixes, resamples to the pipeline rate
//! and cuts frames, then invokes the registered frame callback, so the
//! callback never runs on the real-time audio thread.

use std::sync::mpsc;
use std::thread::JoinHandle;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use thiserror::Error;

use super::{stereo_to_mono, AudioFrame, FrameAssembler, Resampler};
use crate::config::AudioConfig;

/// Callback invoked once per frame on the capture thread.
pub type FrameCallback = Box<dyn FnMut(AudioFrame) + Send + 'static>;

// ---------------------------------------------------------------------------
// CaptureError
// ---------------------------------------------------------------------------

/// Errors that can occur while setting up or running audio capture.
#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("no input device found on the default audio host")]
    NoDevice,

    #[error("input device `{0}` not found")]
    DeviceNotFound(String),

    #[error("failed to enumerate input devices: {0}")]
    Devices(#[from] cpal::DevicesError),

    #[error("failed to query default input config: {0}")]
    DefaultConfig(#[from] cpal::DefaultStreamConfigError),

    #[error("failed to build input stream: {0}")]
    BuildStream(#[from] cpal::BuildStreamError),

    #[error("failed to start audio stream: {0}")]
    PlayStream(#[from] cpal::PlayStreamError),

    #[error("no frame callback registered")]
    NoCallback,

    #[error("failed to spawn capture thread: {0}")]
    Thread(#[from] std::io::Error),
}

// ---------------------------------------------------------------------------
// AudioFrameSource
// ---------------------------------------------------------------------------

/// A producer of fixed-cadence PCM frames.
pub trait AudioFrameSource {
    /// Register the callback that receives every frame.  Replaces any
    /// previously registered callback.
    fn on_frame(&mut self, callback: FrameCallback);

    fn start(&mut self) -> Result<(), CaptureError>;

    /// Stop delivering frames.  Idempotent.
    fn stop(&mut self);
}

// ---------------------------------------------------------------------------
// MicrophoneSource
// ---------------------------------------------------------------------------

/// [`AudioFrameSource`] backed by a cpal input device.
///
/// ```rust,no_run
/// use speech_pipeline::audio::{AudioFrameSource, MicrophoneSource};
/// use speech_pipeline::config::AudioConfig;
///
/// let mut mic = MicrophoneSource::new(&AudioConfig::default()).unwrap();
/// mic.on_frame(Box::new(|frame| println!("frame {} ({} samples)", frame.seq, frame.len())));
/// mic.start().unwrap();
/// ```
pub struct MicrophoneSource {
    device: cpal::Device,
    config: cpal::StreamConfig,
    /// Native device rate (Hz).
    device_rate: u32,
    channels: u16,
    target_rate: u32,
    frame_size: usize,
    callback: Option<FrameCallback>,
    stream: Option<cpal::Stream>,
    /// Returns the callback when the capture thread exits so `start` can be
    /// called again.
    worker: Option<JoinHandle<FrameCallback>>,
}

impl MicrophoneSource {
    /// Open the configured input device (or the system default).
    pub fn new(audio: &AudioConfig) -> Result<Self, CaptureError> {
        let host = cpal::default_host();
        let device = match audio.input_device.as_deref() {
            Some(name) => host
                .input_devices()?
                .find(|d| d.name().is_ok_and(|n| n == name))
                .ok_or_else(|| CaptureError::DeviceNotFound(name.to_string()))?,
            None => host.default_input_device().ok_or(CaptureError::NoDevice)?,
        };

        let supported = device.default_input_config()?;
        let channels = supported.channels();
        let device_rate = supported.sample_rate().0;
        let config: cpal::StreamConfig = supported.into();

        log::info!(
            "capture: device {:?} at {device_rate} Hz, {channels} channel(s)",
            device.name().unwrap_or_default()
        );

        Ok(Self {
            device,
            config,
            device_rate,
            channels,
            target_rate: audio.sample_rate,
            frame_size: audio.frame_size(),
            callback: None,
            stream: None,
            worker: None,
        })
    }

    pub fn device_rate(&self) -> u32 {
        self.device_rate
    }

    pub fn channels(&self) -> u16 {
        self.channels
    }
}

impl AudioFrameSource for MicrophoneSource {
    fn on_frame(&mut self, callback: FrameCallback) {
        self.callback = Some(callback);
    }

    fn start(&mut self) -> Result<(), CaptureError> {
        if self.stream.is_some() {
            return Ok(());
        }
        let mut callback = self.callback.take().ok_or(CaptureError::NoCallback)?;

        let (tx, rx) = mpsc::channel::<Vec<f32>>();
        let (device_rate, target_rate, channels) = (self.device_rate, self.target_rate, self.channels);
        let mut assembler = FrameAssembler::new(self.frame_size);
        let mut resampler = Resampler::new(device_rate, target_rate);

        let worker = std::thread::Builder::new()
            .name("audio-capture".into())
            .spawn(move || {
                while let Ok(raw) = rx.recv() {
                    let mono = stereo_to_mono(&raw, channels);
                    let resampled = resampler.process(&mono);
                    assembler.push(&resampled, &mut callback);
                }
                log::debug!("capture: thread exiting");
                callback
            })?;

        let stream = self.device.build_input_stream(
            &self.config,
            move |data: &[f32], _: &cpal::InputCallbackInfo| {
                // Receiver gone means the capture thread is shutting down.
                let _ = tx.send(data.to_vec());
            },
            |err: cpal::StreamError| {
                log::error!("capture: cpal stream error: {err}");
            },
            None,
        );

        // On failure the sender was dropped with the closure; reclaim the
        // callback from the exiting thread.
        let stream = match stream.map_err(CaptureError::from).and_then(|s| {
            s.play()?;
            Ok(s)
        }) {
            Ok(s) => s,
            Err(e) => {
                if let Ok(cb) = worker.join() {
                    self.callback = Some(cb);
                }
                return Err(e);
            }
        };

        self.stream = Some(stream);
        self.worker = Some(worker);
        Ok(())
    }

    fn stop(&mut self) {
        // Dropping the stream drops the sender, which ends the worker loop.
        self.stream = None;
        if let Some(worker) = self.worker.take() {
            match worker.join() {
                Ok(cb) => self.callback = Some(cb),
                Err(_) => log::error!("capture: thread panicked"),
            }
        }
    }
}

impl Drop for MicrophoneSource {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_callback_is_send() {
        fn assert_send<T: Send>() {}
        assert_send::<FrameCallback>();
        assert_send::<AudioFrame>();
    }

    #[test]
    fn error_messages_name_the_device() {
        let err = CaptureError::DeviceNotFound("USB Mic".into());
        assert_eq!(err.to_string(), "input device `USB Mic` not found");
    }
}
