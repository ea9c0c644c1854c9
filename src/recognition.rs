//! Speech recognition session lifecycle.
//!
//! The engine itself is a capability: anything that can stream
//! continuous+interim results through the [`RecognitionEngine`] contract
//! plugs in. [`RecognitionSession`] adds the reliability policy around it —
//! engines in practice terminate spontaneously after silence or resource
//! pressure, so the session restarts them whenever its own intent is still
//! "listening", making the engine look continuously on to the pipeline.

use crate::corrector;
use crate::log_debug;
use anyhow::{Context, Result};
use crossbeam_channel::{Receiver, Sender};

/// Narrow view of the capture stream: mono f32 frames at the session's
/// sample rate. Engines that do their own acoustic processing read from it;
/// event-only engines may ignore it.
pub type AudioTap = Receiver<Vec<f32>>;

/// One recognition hypothesis with its confidence score.
#[derive(Debug, Clone, PartialEq)]
pub struct TranscriptAlternative {
    pub text: String,
    pub confidence: f32,
}

/// Why the engine reported an error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineErrorKind {
    /// The platform refused microphone/recognition access. Permanently fatal.
    PermissionDenied,
    /// Everything else: network blips, no-speech timeouts, audio glitches.
    /// Recoverable; the engine's end event triggers the restart.
    Other(String),
}

/// Lifecycle and result events, delivered in order per engine instance.
#[derive(Debug, Clone, PartialEq)]
pub enum EngineEvent {
    Result {
        alternatives: Vec<TranscriptAlternative>,
        is_final: bool,
    },
    Ended,
    Error(EngineErrorKind),
}

/// What the session asks of the engine on every start.
#[derive(Debug, Clone)]
pub struct RecognitionRequest {
    pub lang: String,
    pub sample_rate: u32,
    pub continuous: bool,
    pub interim_results: bool,
}

impl RecognitionRequest {
    pub fn new(lang: impl Into<String>, sample_rate: u32) -> Self {
        Self {
            lang: lang.into(),
            sample_rate,
            continuous: true,
            interim_results: true,
        }
    }
}

/// A pluggable speech-to-text engine. `start` must deliver events through
/// the given sender until `stop` is called or the engine ends on its own;
/// events for one engine instance are strictly ordered.
pub trait RecognitionEngine: Send + 'static {
    fn start(
        &mut self,
        request: &RecognitionRequest,
        audio: AudioTap,
        events: Sender<EngineEvent>,
    ) -> Result<()>;
    fn stop(&mut self);
}

/// Owns one engine instance plus the intent and mute state around it.
pub struct RecognitionSession {
    engine: Box<dyn RecognitionEngine>,
    tap: AudioTap,
    events: Sender<EngineEvent>,
    request: RecognitionRequest,
    active: bool,
    desired_listening: bool,
    muted: bool,
    failed_permanently: bool,
    restarts: u64,
}

impl RecognitionSession {
    pub fn new(
        engine: Box<dyn RecognitionEngine>,
        request: RecognitionRequest,
        tap: AudioTap,
        events: Sender<EngineEvent>,
    ) -> Self {
        Self {
            engine,
            tap,
            events,
            request,
            active: false,
            desired_listening: false,
            muted: false,
            failed_permanently: false,
            restarts: 0,
        }
    }

    /// Begin continuous recognition. Double-start is a no-op.
    pub fn start(&mut self) -> Result<()> {
        if self.active {
            debug_assert!(self.desired_listening, "active session without intent");
            return Ok(());
        }
        self.desired_listening = true;
        self.engine
            .start(&self.request, self.tap.clone(), self.events.clone())
            .context("failed to start recognition engine")?;
        self.active = true;
        Ok(())
    }

    /// Stop listening. Clears intent first so an end event racing this call
    /// does not trigger a restart.
    pub fn stop(&mut self) {
        self.desired_listening = false;
        if self.active {
            self.engine.stop();
            self.active = false;
        }
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    /// The feedback-loop guard: while muted, results are discarded without
    /// touching the underlying engine. Cheaper and faster to reverse than a
    /// stop/start cycle around every playback.
    pub fn set_muted(&mut self, muted: bool) {
        if self.muted == muted {
            log_debug(&format!("recognition_mute_noop|muted={muted}"));
        }
        self.muted = muted;
    }

    pub fn is_muted(&self) -> bool {
        self.muted
    }

    /// The engine reported its end event. Restart iff we still intend to
    /// listen; the intent flag is owned by the pipeline, never inferred.
    pub fn on_engine_ended(&mut self) {
        self.active = false;
        if !self.desired_listening || self.failed_permanently {
            return;
        }
        match self
            .engine
            .start(&self.request, self.tap.clone(), self.events.clone())
        {
            Ok(()) => {
                self.active = true;
                self.restarts += 1;
                log_debug(&format!("recognition_restart|count={}", self.restarts));
            }
            Err(err) => {
                // A transient restart failure leaves a recognition gap; the
                // next end/error cycle retries.
                log_debug(&format!("recognition_restart_failed: {err:#}"));
            }
        }
    }

    /// The engine reported an error. Permission denial is permanently fatal
    /// and surfaces upward; everything else is suppressed and left to the
    /// end event's restart policy.
    pub fn on_engine_error(&mut self, kind: &EngineErrorKind) -> Option<anyhow::Error> {
        match kind {
            EngineErrorKind::PermissionDenied => {
                self.failed_permanently = true;
                self.desired_listening = false;
                self.active = false;
                Some(anyhow::anyhow!("recognition permission denied"))
            }
            EngineErrorKind::Other(detail) => {
                log_debug(&format!("recognition_error_suppressed|{detail}"));
                None
            }
        }
    }

    /// Turn a result event into cleaned text, or discard it while muted.
    /// Picks the highest-confidence alternative (ties: first listed), strips
    /// noise markers, and runs the dictionary corrector.
    pub fn accept_result(
        &self,
        alternatives: &[TranscriptAlternative],
        is_final: bool,
    ) -> Option<(String, bool)> {
        if self.muted {
            return None;
        }
        let best = pick_best(alternatives)?;
        let sanitized = corrector::sanitize_transcript(&best.text);
        if sanitized.is_empty() {
            return None;
        }
        Some((corrector::correct(&sanitized), is_final))
    }

    pub fn restarts(&self) -> u64 {
        self.restarts
    }

    /// Hand the engine back so the pipeline can be started again later.
    pub fn into_engine(self) -> Box<dyn RecognitionEngine> {
        self.engine
    }
}

/// Highest confidence wins; strict comparison keeps the first-listed
/// alternative on ties.
fn pick_best(alternatives: &[TranscriptAlternative]) -> Option<&TranscriptAlternative> {
    let mut best: Option<&TranscriptAlternative> = None;
    for alt in alternatives {
        match best {
            Some(current) if alt.confidence <= current.confidence => {}
            _ => best = Some(alt),
        }
    }
    best
}
