//! Microphone capture and energy-based voice activity detection.
//!
//! Audio arrives through CPAL on a callback thread, gets downmixed to mono
//! f32, and feeds two narrow views: a live level meter polled by the energy
//! monitor, and a frame tap for recognition engines that consume raw audio.
//! Closing the [`AudioSession`] is sufficient to stop both consumers.

mod dispatch;
mod meter;
mod mic;
mod monitor;

pub use meter::{rms_db, LiveMeter};
pub use mic::{
    AudioSession, AudioStreams, CaptureBackend, CaptureError, MicrophoneBackend, SessionHandle,
};
pub use monitor::{
    AudioEnergyMonitor, EnergyEvent, EnergySubscription, LevelSource, MonitorConfig,
    SilenceTracker,
};
