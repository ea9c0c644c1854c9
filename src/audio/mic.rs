//! System microphone capture via CPAL.
//!
//! An [`AudioSession`] owns one open input stream. The capture callback
//! converts whatever the device delivers to mono f32, publishes the frame
//! energy to a [`LiveMeter`], and forwards fixed-size frames to a bounded
//! tap channel. Consumers only ever see those two narrow views, so closing
//! the session stops everything.

use super::dispatch::FrameDispatcher;
use super::meter::LiveMeter;
use crate::config::PipelineConfig;
use crate::log_debug;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{SampleFormat, StreamConfig};
use crossbeam_channel::{bounded, Receiver, Sender};
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

/// Why the microphone could not be opened. Everything here is fatal to
/// `VoicePipeline::start`; there is no partial capture.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CaptureError {
    /// The platform refused access to the input device. Some hosts report
    /// this as the device disappearing, so the mapping is best-effort.
    PermissionDenied,
    /// No input device matched the request.
    NoDevice(String),
    /// The device only offers a sample format we do not handle.
    UnsupportedFormat(String),
    /// Anything else the audio backend reported.
    Backend(String),
}

impl fmt::Display for CaptureError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CaptureError::PermissionDenied => {
                write!(f, "microphone permission denied. {}", mic_permission_hint())
            }
            CaptureError::NoDevice(name) => write!(f, "input device unavailable: {name}"),
            CaptureError::UnsupportedFormat(format) => {
                write!(f, "unsupported sample format: {format}")
            }
            CaptureError::Backend(msg) => write!(f, "audio backend error: {msg}"),
        }
    }
}

impl std::error::Error for CaptureError {}

fn mic_permission_hint() -> &'static str {
    #[cfg(target_os = "macos")]
    {
        "macOS: System Settings > Privacy & Security > Microphone (enable your terminal)."
    }
    #[cfg(target_os = "linux")]
    {
        "Linux: check PipeWire/PulseAudio permissions and ensure the device is not muted."
    }
    #[cfg(target_os = "windows")]
    {
        "Windows: Settings > Privacy & Security > Microphone (allow access for your terminal)."
    }
    #[cfg(not(any(target_os = "macos", target_os = "linux", target_os = "windows")))]
    {
        "Check OS microphone permissions."
    }
}

/// Capability that opens a live microphone stream. The pipeline depends on
/// this trait rather than CPAL directly so tests can substitute a scripted
/// capture source.
pub trait CaptureBackend: Send + 'static {
    fn open(&mut self, cfg: &PipelineConfig) -> Result<AudioStreams, CaptureError>;
}

/// The two narrow views a session exposes plus its teardown handle.
pub struct AudioStreams {
    pub meter: LiveMeter,
    pub frames: Receiver<Vec<f32>>,
    pub sample_rate: u32,
    pub session: Box<dyn SessionHandle>,
}

/// Teardown half of an open capture session. Lives on the pipeline's event
/// loop thread; implementations need not be `Send`.
pub trait SessionHandle {
    fn close(&mut self);
}

/// Default [`CaptureBackend`] backed by the system microphone.
pub struct MicrophoneBackend {
    preferred_device: Option<String>,
}

impl MicrophoneBackend {
    pub fn new(preferred_device: Option<String>) -> Self {
        Self { preferred_device }
    }

    /// List microphone names so the CLI can expose a human-friendly selector.
    pub fn list_devices() -> Result<Vec<String>, CaptureError> {
        let host = cpal::default_host();
        let devices = host
            .input_devices()
            .map_err(|err| CaptureError::Backend(err.to_string()))?;
        let mut names = Vec::new();
        for device in devices {
            if let Ok(name) = device.name() {
                names.push(name);
            }
        }
        Ok(names)
    }
}

impl CaptureBackend for MicrophoneBackend {
    fn open(&mut self, cfg: &PipelineConfig) -> Result<AudioStreams, CaptureError> {
        AudioSession::open(self.preferred_device.as_deref(), cfg)
    }
}

/// An open microphone stream. At most one exists per pipeline instance;
/// dropping or closing it releases the device.
pub struct AudioSession {
    stream: Option<cpal::Stream>,
    device_name: String,
}

impl AudioSession {
    /// Open the microphone and start the capture callback. Fatal errors
    /// (missing device, refused stream) map onto [`CaptureError`].
    pub fn open(
        preferred_device: Option<&str>,
        cfg: &PipelineConfig,
    ) -> Result<AudioStreams, CaptureError> {
        let host = cpal::default_host();
        let device = match preferred_device {
            Some(name) => {
                let mut devices = host
                    .input_devices()
                    .map_err(|err| CaptureError::Backend(err.to_string()))?;
                devices
                    .find(|d| d.name().map(|n| n == name).unwrap_or(false))
                    .ok_or_else(|| CaptureError::NoDevice(name.to_string()))?
            }
            None => host
                .default_input_device()
                .ok_or_else(|| CaptureError::NoDevice("default input".to_string()))?,
        };
        let device_name = device
            .name()
            .unwrap_or_else(|_| "unknown input device".to_string());

        let default_config = device
            .default_input_config()
            .map_err(map_config_error)?;
        let format = default_config.sample_format();
        let device_config: StreamConfig = default_config.into();
        let device_sample_rate = device_config.sample_rate.0;
        let channels = usize::from(device_config.channels.max(1));
        let frame_ms = cfg.frame_ms.clamp(5, 120);
        let frame_samples = ((device_sample_rate as u64 * frame_ms) / 1000).max(1) as usize;

        log_debug(&format!(
            "audio_session|device={device_name}|format={format:?}|rate={device_sample_rate}|channels={channels}"
        ));

        let (sender, receiver) = bounded::<Vec<f32>>(cfg.channel_capacity.max(1));
        let meter = LiveMeter::new();
        let dropped = Arc::new(AtomicUsize::new(0));
        let stream = build_input_stream(
            &device,
            &device_config,
            format,
            channels,
            frame_samples,
            sender,
            meter.clone(),
            dropped,
        )?;
        stream
            .play()
            .map_err(|err| CaptureError::Backend(err.to_string()))?;

        Ok(AudioStreams {
            meter,
            frames: receiver,
            sample_rate: device_sample_rate,
            session: Box::new(AudioSession {
                stream: Some(stream),
                device_name,
            }),
        })
    }
}

impl SessionHandle for AudioSession {
    fn close(&mut self) {
        if let Some(stream) = self.stream.take() {
            if let Err(err) = stream.pause() {
                log_debug(&format!("failed to pause audio stream: {err}"));
            }
            drop(stream);
            log_debug(&format!("audio_session_closed|device={}", self.device_name));
        }
    }
}

impl Drop for AudioSession {
    fn drop(&mut self) {
        self.close();
    }
}

fn map_config_error(err: cpal::DefaultStreamConfigError) -> CaptureError {
    match err {
        cpal::DefaultStreamConfigError::DeviceNotAvailable => {
            CaptureError::NoDevice("default input".to_string())
        }
        cpal::DefaultStreamConfigError::StreamTypeNotSupported => {
            CaptureError::UnsupportedFormat("no supported input stream type".to_string())
        }
        other => CaptureError::Backend(other.to_string()),
    }
}

fn map_build_error(err: cpal::BuildStreamError) -> CaptureError {
    match err {
        cpal::BuildStreamError::DeviceNotAvailable => {
            CaptureError::NoDevice("input device disappeared".to_string())
        }
        other => CaptureError::Backend(other.to_string()),
    }
}

/// Frame-size worth of samples flows meter-first so the energy monitor sees
/// levels even when the tap channel backs up.
#[allow(clippy::too_many_arguments)]
fn build_input_stream(
    device: &cpal::Device,
    device_config: &StreamConfig,
    format: SampleFormat,
    channels: usize,
    frame_samples: usize,
    sender: Sender<Vec<f32>>,
    meter: LiveMeter,
    dropped: Arc<AtomicUsize>,
) -> Result<cpal::Stream, CaptureError> {
    let dispatcher = Arc::new(Mutex::new(FrameDispatcher::new(
        frame_samples,
        sender,
        dropped.clone(),
    )));
    let err_fn = |err| log_debug(&format!("audio_stream_error: {err}"));

    let stream = match format {
        SampleFormat::F32 => {
            let dispatcher = dispatcher.clone();
            let dropped = dropped.clone();
            device
                .build_input_stream(
                    device_config,
                    move |data: &[f32], _| {
                        meter.set_db(interleaved_rms_db(data, |sample| sample));
                        if let Ok(mut pump) = dispatcher.try_lock() {
                            pump.push(data, channels, |sample| sample);
                        } else {
                            dropped.fetch_add(1, Ordering::Relaxed);
                        }
                    },
                    err_fn,
                    None,
                )
                .map_err(map_build_error)?
        }
        SampleFormat::I16 => {
            let dispatcher = dispatcher.clone();
            let dropped = dropped.clone();
            device
                .build_input_stream(
                    device_config,
                    move |data: &[i16], _| {
                        meter.set_db(interleaved_rms_db(data, |sample| {
                            sample as f32 / 32_768.0
                        }));
                        if let Ok(mut pump) = dispatcher.try_lock() {
                            pump.push(data, channels, |sample| sample as f32 / 32_768.0);
                        } else {
                            dropped.fetch_add(1, Ordering::Relaxed);
                        }
                    },
                    err_fn,
                    None,
                )
                .map_err(map_build_error)?
        }
        SampleFormat::U16 => {
            let dispatcher = dispatcher.clone();
            let dropped = dropped.clone();
            device
                .build_input_stream(
                    device_config,
                    move |data: &[u16], _| {
                        meter.set_db(interleaved_rms_db(data, |sample| {
                            (sample as f32 - 32_768.0) / 32_768.0
                        }));
                        if let Ok(mut pump) = dispatcher.try_lock() {
                            pump.push(data, channels, |sample| {
                                (sample as f32 - 32_768.0) / 32_768.0
                            });
                        } else {
                            dropped.fetch_add(1, Ordering::Relaxed);
                        }
                    },
                    err_fn,
                    None,
                )
                .map_err(map_build_error)?
        }
        other => return Err(CaptureError::UnsupportedFormat(format!("{other:?}"))),
    };
    Ok(stream)
}

fn interleaved_rms_db<T, F>(data: &[T], mut convert: F) -> f32
where
    T: Copy,
    F: FnMut(T) -> f32,
{
    if data.is_empty() {
        return super::meter::METER_FLOOR_DB;
    }
    let energy: f32 =
        data.iter().map(|s| convert(*s) * convert(*s)).sum::<f32>() / data.len() as f32;
    let rms = energy.sqrt().max(1e-6);
    20.0 * rms.log10()
}
