//! Energy-based voice activity detection.
//!
//! [`SilenceTracker`] is the pure transition logic: feed it level samples and
//! it reports voice/silence edges. [`AudioEnergyMonitor`] wraps it in a
//! fixed-period polling thread reading a live level source.

use crate::audio::meter::LiveMeter;
use crate::config::PipelineConfig;
use crate::log_debug;
use crossbeam_channel::Sender;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

/// Voice/silence transition raised by the monitor.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum EnergyEvent {
    VoiceDetected,
    SilenceDetected,
}

/// Where the monitor reads its levels from. Returning `None` means the
/// source cannot produce a reading right now; the monitor stays quiet
/// rather than erroring, so silence detection degrades to advisory.
pub trait LevelSource: Send + 'static {
    fn level_db(&self) -> Option<f32>;
}

impl LevelSource for LiveMeter {
    fn level_db(&self) -> Option<f32> {
        Some(LiveMeter::level_db(self))
    }
}

/// Thresholds for the silence tracker.
#[derive(Debug, Clone, Copy)]
pub struct MonitorConfig {
    pub threshold_db: f32,
    pub silence_duration: Duration,
    pub poll_interval: Duration,
}

impl From<&PipelineConfig> for MonitorConfig {
    fn from(cfg: &PipelineConfig) -> Self {
        Self {
            threshold_db: cfg.silence_threshold_db,
            silence_duration: Duration::from_millis(cfg.silence_duration_ms),
            poll_interval: Duration::from_millis(cfg.energy_poll_ms),
        }
    }
}

/// Tracks voice/silence state across a stream of level samples.
///
/// A sample louder than the threshold refreshes the voice timestamp and, on
/// a silence-to-voice edge, emits [`EnergyEvent::VoiceDetected`]. Once the
/// quiet time since the last loud sample reaches the configured window,
/// exactly one [`EnergyEvent::SilenceDetected`] fires for that gap; the next
/// loud sample re-arms it.
pub struct SilenceTracker {
    threshold_db: f32,
    silence_duration: Duration,
    last_voice: Option<Instant>,
    voice_active: bool,
    silence_fired: bool,
}

impl SilenceTracker {
    pub fn new(threshold_db: f32, silence_duration: Duration) -> Self {
        Self {
            threshold_db,
            silence_duration,
            last_voice: None,
            voice_active: false,
            silence_fired: false,
        }
    }

    /// Feed one level sample; returns the transition it caused, if any.
    pub fn on_sample(&mut self, level_db: f32, now: Instant) -> Option<EnergyEvent> {
        if level_db > self.threshold_db {
            self.last_voice = Some(now);
            self.silence_fired = false;
            if !self.voice_active {
                self.voice_active = true;
                return Some(EnergyEvent::VoiceDetected);
            }
            return None;
        }

        // The first sample anchors the gap even if no voice was ever heard,
        // so a dead-quiet stream still reports one silence event.
        let reference = *self.last_voice.get_or_insert(now);
        if !self.silence_fired && now.duration_since(reference) >= self.silence_duration {
            self.silence_fired = true;
            self.voice_active = false;
            return Some(EnergyEvent::SilenceDetected);
        }
        None
    }
}

/// Fixed-period poller turning a level source into [`EnergyEvent`]s.
pub struct AudioEnergyMonitor;

impl AudioEnergyMonitor {
    /// Start polling `source` every `poll_interval` and deliver transitions
    /// to `events`. The subscription stops the poller deterministically.
    pub fn attach(
        source: impl LevelSource,
        cfg: MonitorConfig,
        events: Sender<EnergyEvent>,
    ) -> EnergySubscription {
        let stop = Arc::new(AtomicBool::new(false));
        let stop_flag = stop.clone();
        let handle = thread::spawn(move || {
            let mut tracker = SilenceTracker::new(cfg.threshold_db, cfg.silence_duration);
            while !stop_flag.load(Ordering::Relaxed) {
                if let Some(db) = source.level_db() {
                    if let Some(event) = tracker.on_sample(db, Instant::now()) {
                        log_debug(&format!("energy_event|{event:?}"));
                        if events.send(event).is_err() {
                            break;
                        }
                    }
                }
                thread::sleep(cfg.poll_interval);
            }
        });
        EnergySubscription {
            stop,
            handle: Some(handle),
        }
    }
}

/// Handle to a running monitor. `detach` (or drop) stops the polling thread
/// and joins it, so no event is delivered after it returns.
pub struct EnergySubscription {
    stop: Arc<AtomicBool>,
    handle: Option<thread::JoinHandle<()>>,
}

impl EnergySubscription {
    pub fn detach(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for EnergySubscription {
    fn drop(&mut self) {
        self.shutdown();
    }
}
