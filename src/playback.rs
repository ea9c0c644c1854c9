//! Playback ownership and the listening/speaking arbitration.
//!
//! [`PlaybackArbiter`] owns at most one active playback at a time. Every
//! `speak` bumps a generation counter and cancels the previous handle, so a
//! stale worker finishing late can never unmute recognition or resolve the
//! wrong waiter.

use crate::log_debug;
use crate::tts::{SpeechSynthesizer, SynthesisRequest};
use anyhow::{Context, Result};
use crossbeam_channel::Sender;
use std::io::Cursor;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

/// Cooperative cancellation shared between the arbiter and the playback
/// worker. Cancelling is sticky.
#[derive(Clone, Debug, Default)]
pub struct CancelToken {
    cancelled: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Relaxed)
    }
}

/// How a playback attempt ended.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum PlaybackOutcome {
    Completed,
    Cancelled,
}

/// Capability that plays a binary audio payload to completion, honoring the
/// cancel token. Runs on the worker thread, so implementations may block.
pub trait PlaybackSink: Send + Sync + 'static {
    fn play(&self, audio: Vec<u8>, cancel: &CancelToken) -> Result<PlaybackOutcome>;
}

/// Default sink: decode with rodio and play on the system output device.
/// The output stream lives only for the duration of one payload, so
/// cancellation releases the device immediately.
pub struct RodioSink;

impl PlaybackSink for RodioSink {
    fn play(&self, audio: Vec<u8>, cancel: &CancelToken) -> Result<PlaybackOutcome> {
        if audio.is_empty() {
            return Ok(PlaybackOutcome::Completed);
        }
        let (_stream, handle) =
            rodio::OutputStream::try_default().context("no audio output device")?;
        let sink = rodio::Sink::try_new(&handle).context("failed to open playback sink")?;
        let source = rodio::Decoder::new(Cursor::new(audio))
            .context("failed to decode synthesized audio")?;
        sink.append(source);

        loop {
            if cancel.is_cancelled() {
                sink.stop();
                return Ok(PlaybackOutcome::Cancelled);
            }
            if sink.empty() {
                return Ok(PlaybackOutcome::Completed);
            }
            thread::sleep(Duration::from_millis(10));
        }
    }
}

/// Completion notice from a playback worker, tagged with its generation.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct PlaybackFinished {
    pub generation: u64,
    pub ok: bool,
}

struct ActivePlayback {
    generation: u64,
    cancel: CancelToken,
    waiter: Sender<bool>,
}

/// Owns the synthesize-then-play lifecycle and its mutual exclusion with
/// recognition. The pipeline loop calls `speak`/`on_finished`/`cancel_active`
/// and performs the actual mute/unmute around them.
pub struct PlaybackArbiter {
    synthesizer: Arc<dyn SpeechSynthesizer>,
    sink: Arc<dyn PlaybackSink>,
    events: Sender<PlaybackFinished>,
    generation: u64,
    active: Option<ActivePlayback>,
}

impl PlaybackArbiter {
    pub fn new(
        synthesizer: Arc<dyn SpeechSynthesizer>,
        sink: Arc<dyn PlaybackSink>,
        events: Sender<PlaybackFinished>,
    ) -> Self {
        Self {
            synthesizer,
            sink,
            events,
            generation: 0,
            active: None,
        }
    }

    /// Cancel whatever is playing and start synthesizing `request`. The
    /// waiter resolves `true` only on natural completion.
    pub fn speak(&mut self, request: SynthesisRequest, waiter: Sender<bool>) -> u64 {
        self.cancel_active();
        self.generation += 1;
        let generation = self.generation;
        let cancel = CancelToken::new();
        self.active = Some(ActivePlayback {
            generation,
            cancel: cancel.clone(),
            waiter,
        });

        let synthesizer = self.synthesizer.clone();
        let sink = self.sink.clone();
        let events = self.events.clone();
        thread::spawn(move || {
            let ok = run_playback(synthesizer.as_ref(), sink.as_ref(), &request, &cancel);
            let _ = events.send(PlaybackFinished { generation, ok });
        });
        generation
    }

    /// Cancel the active handle, if any, resolving its waiter `false`.
    /// Output resources are released by the worker as soon as it observes
    /// the token.
    pub fn cancel_active(&mut self) {
        if let Some(active) = self.active.take() {
            active.cancel.cancel();
            let _ = active.waiter.send(false);
            log_debug(&format!("playback_cancelled|generation={}", active.generation));
        }
    }

    /// A worker finished. Returns `true` when it was the live generation —
    /// the caller should then unmute and leave the speaking state. Stale
    /// generations have no observable effect.
    pub fn on_finished(&mut self, finished: PlaybackFinished) -> bool {
        match &self.active {
            Some(active) if active.generation == finished.generation => {
                let active = match self.active.take() {
                    Some(active) => active,
                    None => return false,
                };
                let _ = active.waiter.send(finished.ok);
                true
            }
            _ => {
                log_debug(&format!(
                    "playback_stale_completion|generation={}",
                    finished.generation
                ));
                false
            }
        }
    }

    pub fn is_active(&self) -> bool {
        self.active.is_some()
    }
}

fn run_playback(
    synthesizer: &dyn SpeechSynthesizer,
    sink: &dyn PlaybackSink,
    request: &SynthesisRequest,
    cancel: &CancelToken,
) -> bool {
    if cancel.is_cancelled() {
        return false;
    }
    let audio = match synthesizer.synthesize(request) {
        Ok(audio) => audio,
        Err(err) => {
            log_debug(&format!("tts_synthesis_failed: {err:#}"));
            return false;
        }
    };
    if cancel.is_cancelled() {
        return false;
    }
    match sink.play(audio, cancel) {
        Ok(PlaybackOutcome::Completed) => true,
        Ok(PlaybackOutcome::Cancelled) => false,
        Err(err) => {
            log_debug(&format!("playback_failed: {err:#}"));
            false
        }
    }
}
