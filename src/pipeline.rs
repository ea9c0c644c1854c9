//! The pipeline core: one event-loop thread owning every collaborator.
//!
//! [`VoicePipeline::start`] spawns the loop, which opens the microphone,
//! starts recognition, and attaches the energy monitor before reporting
//! readiness. All state transitions happen on that one thread; the public
//! handle only sends control messages and reads an atomic state mirror, so
//! there are no locks around the listening/speaking arbitration itself.
//!
//! The capture stream is not `Send`, which is why the loop thread opens it
//! rather than receiving it from the caller. Startup failures travel back
//! through a ready handshake so `start` can return them synchronously.

use crate::audio::{
    AudioEnergyMonitor, AudioStreams, CaptureBackend, EnergyEvent, MicrophoneBackend,
    MonitorConfig,
};
use crate::config::{AppConfig, PipelineConfig, SynthesisConfig};
use crate::finalizer::TranscriptFinalizer;
use crate::log_debug;
use crate::playback::{PlaybackArbiter, PlaybackSink, RodioSink};
use crate::recognition::{
    EngineEvent, RecognitionEngine, RecognitionRequest, RecognitionSession,
};
use crate::tts::{HttpSynthesizer, SpeechSynthesizer, SynthesisRequest};
use anyhow::{anyhow, Context, Result};
use crossbeam_channel::{bounded, select, unbounded, Receiver, RecvTimeoutError, Sender};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::{Duration, Instant};

pub use crate::finalizer::FinalizedUtterance;

/// Wake period when no finalizer deadline is pending.
const IDLE_TICK: Duration = Duration::from_millis(250);

/// Externally observable pipeline state.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum PipelineState {
    /// Not running: before `start`, after `stop`, or after a fatal error.
    Idle,
    /// Capturing and recognizing.
    Listening,
    /// A response is being synthesized or played; recognition is muted.
    Speaking,
}

impl PipelineState {
    fn as_u8(self) -> u8 {
        match self {
            PipelineState::Idle => 0,
            PipelineState::Listening => 1,
            PipelineState::Speaking => 2,
        }
    }

    fn from_u8(raw: u8) -> Self {
        match raw {
            1 => PipelineState::Listening,
            2 => PipelineState::Speaking,
            _ => PipelineState::Idle,
        }
    }
}

/// Consumer callbacks. Slots may be set before or after `start`; the loop
/// reads them per event.
type UtteranceCallback = dyn Fn(FinalizedUtterance, UtteranceGuard) + Send + Sync;
type InterimCallback = dyn Fn(&str) + Send + Sync;
type EnergyCallback = dyn Fn(EnergyEvent) + Send + Sync;

#[derive(Default)]
struct CallbackSlots {
    utterance: Mutex<Option<Arc<UtteranceCallback>>>,
    interim: Mutex<Option<Arc<InterimCallback>>>,
    energy: Mutex<Option<Arc<EnergyCallback>>>,
}

impl CallbackSlots {
    fn utterance(&self) -> Option<Arc<UtteranceCallback>> {
        lock_ignoring_poison(&self.utterance).clone()
    }

    fn interim(&self) -> Option<Arc<InterimCallback>> {
        lock_ignoring_poison(&self.interim).clone()
    }

    fn energy(&self) -> Option<Arc<EnergyCallback>> {
        lock_ignoring_poison(&self.energy).clone()
    }
}

/// A panic inside a consumer callback poisons the slot mutex; the stored
/// callback itself is still intact, so keep serving it.
fn lock_ignoring_poison<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Messages from the public handle (and utterance guards) to the loop.
enum Control {
    Respond { text: String, waiter: Sender<bool> },
    Ack,
    Stop,
}

/// Proof of delivery for one finalized utterance. Dropping it (or calling
/// [`UtteranceGuard::done`]) releases the next utterance, so a consumer that
/// errors out mid-processing can never wedge the finalizer.
pub struct UtteranceGuard {
    ack: Option<Sender<Control>>,
}

impl UtteranceGuard {
    pub fn done(mut self) {
        self.send_ack();
    }

    fn send_ack(&mut self) {
        if let Some(tx) = self.ack.take() {
            let _ = tx.send(Control::Ack);
        }
    }
}

impl Drop for UtteranceGuard {
    fn drop(&mut self) {
        self.send_ack();
    }
}

/// Resolution of one `respond` call. `true` means the playback ran to
/// natural completion; superseded, cancelled, or failed responses resolve
/// `false`.
pub struct ResponseHandle {
    result: Option<Receiver<bool>>,
}

impl ResponseHandle {
    fn resolved_false() -> Self {
        Self { result: None }
    }

    /// Block until the response resolves.
    pub fn wait(self) -> bool {
        match self.result {
            Some(rx) => rx.recv().unwrap_or(false),
            None => false,
        }
    }

    /// Block up to `timeout`. `None` means still playing.
    pub fn wait_timeout(self, timeout: Duration) -> Option<bool> {
        match self.result {
            Some(rx) => match rx.recv_timeout(timeout) {
                Ok(ok) => Some(ok),
                Err(RecvTimeoutError::Timeout) => None,
                Err(RecvTimeoutError::Disconnected) => Some(false),
            },
            None => Some(false),
        }
    }
}

/// The `Send` collaborators the loop thread consumes on start and returns on
/// exit, so a stopped pipeline can be started again with the same backends.
struct Collaborators {
    capture: Box<dyn CaptureBackend>,
    engine: Box<dyn RecognitionEngine>,
}

struct SharedState {
    state: AtomicU8,
    fatal: Mutex<Option<String>>,
}

impl SharedState {
    fn new() -> Self {
        Self {
            state: AtomicU8::new(PipelineState::Idle.as_u8()),
            fatal: Mutex::new(None),
        }
    }

    fn state(&self) -> PipelineState {
        PipelineState::from_u8(self.state.load(Ordering::Acquire))
    }

    fn set_state(&self, state: PipelineState) {
        self.state.store(state.as_u8(), Ordering::Release);
    }

    fn set_fatal(&self, message: String) {
        *lock_ignoring_poison(&self.fatal) = Some(message);
    }
}

struct Running {
    control: Sender<Control>,
    handle: thread::JoinHandle<Collaborators>,
}

/// The public face of the pipeline. Owns the collaborators while idle and a
/// control handle to the loop thread while running.
pub struct VoicePipeline {
    pipeline_cfg: PipelineConfig,
    synthesis_cfg: SynthesisConfig,
    collaborators: Option<Collaborators>,
    synthesizer: Arc<dyn SpeechSynthesizer>,
    sink: Arc<dyn PlaybackSink>,
    callbacks: Arc<CallbackSlots>,
    shared: Arc<SharedState>,
    running: Option<Running>,
}

impl VoicePipeline {
    pub fn new(
        pipeline_cfg: PipelineConfig,
        synthesis_cfg: SynthesisConfig,
        capture: Box<dyn CaptureBackend>,
        engine: Box<dyn RecognitionEngine>,
        synthesizer: Arc<dyn SpeechSynthesizer>,
        sink: Arc<dyn PlaybackSink>,
    ) -> Self {
        Self {
            pipeline_cfg,
            synthesis_cfg,
            collaborators: Some(Collaborators { capture, engine }),
            synthesizer,
            sink,
            callbacks: Arc::new(CallbackSlots::default()),
            shared: Arc::new(SharedState::new()),
            running: None,
        }
    }

    /// Assemble the default stack: system microphone, HTTP synthesis, rodio
    /// playback. The recognition engine is the one collaborator with no
    /// default and must be supplied.
    pub fn from_config(config: &AppConfig, engine: Box<dyn RecognitionEngine>) -> Result<Self> {
        let synthesis_cfg = config.synthesis_config();
        let synthesizer = Arc::new(HttpSynthesizer::new(&synthesis_cfg)?);
        Ok(Self::new(
            config.pipeline_config(),
            synthesis_cfg,
            Box::new(MicrophoneBackend::new(config.input_device.clone())),
            engine,
            synthesizer,
            Arc::new(RodioSink),
        ))
    }

    /// Register the consumer for finalized utterances. The callback runs on
    /// the loop thread; hand the work off if it is slow.
    pub fn on_utterance(
        &self,
        callback: impl Fn(FinalizedUtterance, UtteranceGuard) + Send + Sync + 'static,
    ) {
        *lock_ignoring_poison(&self.callbacks.utterance) = Some(Arc::new(callback));
    }

    /// Observe interim (caption) text. Advisory only.
    pub fn on_interim(&self, callback: impl Fn(&str) + Send + Sync + 'static) {
        *lock_ignoring_poison(&self.callbacks.interim) = Some(Arc::new(callback));
    }

    /// Observe voice/silence transitions. Suppressed while speaking so
    /// playback bleed never masquerades as the user's voice.
    pub fn on_energy(&self, callback: impl Fn(EnergyEvent) + Send + Sync + 'static) {
        *lock_ignoring_poison(&self.callbacks.energy) = Some(Arc::new(callback));
    }

    pub fn state(&self) -> PipelineState {
        self.shared.state()
    }

    /// The error that killed the loop, if it died on its own.
    pub fn last_fatal_error(&self) -> Option<String> {
        lock_ignoring_poison(&self.shared.fatal).clone()
    }

    /// Spawn the event loop and block until capture and recognition are both
    /// live. Starting a running pipeline is a no-op.
    pub fn start(&mut self) -> Result<()> {
        if let Some(running) = self.running.take() {
            if self.shared.state() != PipelineState::Idle {
                self.running = Some(running);
                return Ok(());
            }
            // The loop died on its own (fatal engine error). Reclaim the
            // collaborators before relaunching.
            let _ = running.control.send(Control::Stop);
            if let Ok(collaborators) = running.handle.join() {
                self.collaborators = Some(collaborators);
            }
        }
        let collaborators = self
            .collaborators
            .take()
            .context("audio and recognition collaborators are unavailable")?;

        let (ready_tx, ready_rx) = bounded(1);
        let (control_tx, control_rx) = unbounded();
        let params = CoreParams {
            cfg: self.pipeline_cfg.clone(),
            synthesis: self.synthesis_cfg.clone(),
            collaborators,
            synthesizer: self.synthesizer.clone(),
            sink: self.sink.clone(),
            callbacks: self.callbacks.clone(),
            shared: self.shared.clone(),
            control_tx: control_tx.clone(),
            control_rx,
            ready_tx,
        };
        let handle = thread::spawn(move || run_event_loop(params));

        match ready_rx.recv() {
            Ok(Ok(())) => {
                self.running = Some(Running {
                    control: control_tx,
                    handle,
                });
                Ok(())
            }
            Ok(Err(message)) => {
                if let Ok(collaborators) = handle.join() {
                    self.collaborators = Some(collaborators);
                }
                Err(anyhow!(message))
            }
            Err(_) => {
                let _ = handle.join();
                Err(anyhow!("pipeline event loop exited before startup completed"))
            }
        }
    }

    /// Stop the loop and release the microphone, recognition, and any active
    /// playback. Idempotent.
    pub fn stop(&mut self) {
        if let Some(running) = self.running.take() {
            let _ = running.control.send(Control::Stop);
            if let Ok(collaborators) = running.handle.join() {
                self.collaborators = Some(collaborators);
            }
        }
    }

    /// Speak `text`. Any response already playing is cancelled and its
    /// handle resolves `false`. On a stopped pipeline the handle resolves
    /// `false` immediately.
    pub fn respond(&self, text: impl Into<String>) -> ResponseHandle {
        let running = match &self.running {
            Some(running) => running,
            None => return ResponseHandle::resolved_false(),
        };
        let (waiter_tx, waiter_rx) = bounded(1);
        let sent = running.control.send(Control::Respond {
            text: text.into(),
            waiter: waiter_tx,
        });
        if sent.is_err() {
            return ResponseHandle::resolved_false();
        }
        ResponseHandle {
            result: Some(waiter_rx),
        }
    }
}

impl Drop for VoicePipeline {
    fn drop(&mut self) {
        self.stop();
    }
}

struct CoreParams {
    cfg: PipelineConfig,
    synthesis: SynthesisConfig,
    collaborators: Collaborators,
    synthesizer: Arc<dyn SpeechSynthesizer>,
    sink: Arc<dyn PlaybackSink>,
    callbacks: Arc<CallbackSlots>,
    shared: Arc<SharedState>,
    control_tx: Sender<Control>,
    control_rx: Receiver<Control>,
    ready_tx: Sender<Result<(), String>>,
}

/// The loop thread body. Returns the collaborators so the handle can start
/// again after a stop or a fatal error.
fn run_event_loop(params: CoreParams) -> Collaborators {
    let CoreParams {
        cfg,
        synthesis,
        collaborators,
        synthesizer,
        sink,
        callbacks,
        shared,
        control_tx,
        control_rx,
        ready_tx,
    } = params;
    let Collaborators {
        mut capture,
        engine,
    } = collaborators;

    let mut streams: AudioStreams = match capture.open(&cfg) {
        Ok(streams) => streams,
        Err(err) => {
            let _ = ready_tx.send(Err(err.to_string()));
            return Collaborators { capture, engine };
        }
    };

    let (engine_tx, engine_rx) = unbounded();
    let request = RecognitionRequest::new(cfg.lang.clone(), streams.sample_rate);
    let mut session = RecognitionSession::new(engine, request, streams.frames.clone(), engine_tx);
    if let Err(err) = session.start() {
        streams.session.close();
        let _ = ready_tx.send(Err(format!("{err:#}")));
        return Collaborators {
            capture,
            engine: session.into_engine(),
        };
    }

    let (energy_tx, energy_rx) = unbounded();
    let monitor =
        AudioEnergyMonitor::attach(streams.meter.clone(), MonitorConfig::from(&cfg), energy_tx);
    let (playback_tx, playback_rx) = unbounded();
    let mut arbiter = PlaybackArbiter::new(synthesizer, sink, playback_tx);
    let mut finalizer = TranscriptFinalizer::new(Duration::from_millis(cfg.finalize_debounce_ms));

    let mut state = PipelineState::Listening;
    shared.set_state(state);
    let _ = ready_tx.send(Ok(()));
    log_debug("pipeline_started");
    tracing::info!(
        sample_rate = streams.sample_rate,
        lang = %cfg.lang,
        "pipeline listening"
    );

    loop {
        // Finalization is deferred while speaking; the emission happens once
        // the pipeline is back to listening.
        if state == PipelineState::Listening {
            if let Some(utterance) = finalizer.poll(Instant::now()) {
                deliver_utterance(&callbacks, &control_tx, utterance);
            }
        }
        let timeout = match (state, finalizer.deadline()) {
            (PipelineState::Listening, Some(deadline)) => deadline
                .saturating_duration_since(Instant::now())
                .min(IDLE_TICK),
            _ => IDLE_TICK,
        };

        select! {
            recv(control_rx) -> msg => match msg {
                Ok(Control::Respond { text, waiter }) => {
                    session.set_muted(true);
                    state = PipelineState::Speaking;
                    shared.set_state(state);
                    let request = SynthesisRequest::from_config(text, &synthesis);
                    let generation = arbiter.speak(request, waiter);
                    tracing::debug!(generation, "playback started");
                }
                Ok(Control::Ack) => finalizer.acknowledge(Instant::now()),
                Ok(Control::Stop) | Err(_) => break,
            },
            recv(engine_rx) -> msg => match msg {
                Ok(EngineEvent::Result { alternatives, is_final }) => {
                    if let Some((text, is_final)) = session.accept_result(&alternatives, is_final) {
                        if is_final {
                            finalizer.on_final_candidate(&text, Instant::now());
                        } else {
                            finalizer.on_interim(&text);
                            if let Some(cb) = callbacks.interim() {
                                cb(&text);
                            }
                        }
                    }
                }
                Ok(EngineEvent::Ended) => session.on_engine_ended(),
                Ok(EngineEvent::Error(kind)) => {
                    if let Some(err) = session.on_engine_error(&kind) {
                        shared.set_fatal(format!("{err:#}"));
                        log_debug(&format!("pipeline_fatal: {err:#}"));
                        tracing::error!(error = %err, "recognition failed permanently");
                        break;
                    }
                }
                Err(_) => break,
            },
            recv(energy_rx) -> msg => {
                if let Ok(event) = msg {
                    // Playback bleeding into the meter must not read as the
                    // user's voice.
                    if state != PipelineState::Speaking {
                        if let Some(cb) = callbacks.energy() {
                            cb(event);
                        }
                    }
                }
            },
            recv(playback_rx) -> msg => {
                if let Ok(finished) = msg {
                    if arbiter.on_finished(finished) {
                        session.set_muted(false);
                        state = PipelineState::Listening;
                        shared.set_state(state);
                    }
                }
            },
            default(timeout) => {}
        }
    }

    monitor.detach();
    session.stop();
    arbiter.cancel_active();
    if session.is_muted() {
        session.set_muted(false);
    }
    finalizer.reset();
    streams.session.close();
    shared.set_state(PipelineState::Idle);
    log_debug("pipeline_stopped");
    Collaborators {
        capture,
        engine: session.into_engine(),
    }
}

fn deliver_utterance(
    callbacks: &CallbackSlots,
    control_tx: &Sender<Control>,
    utterance: FinalizedUtterance,
) {
    tracing::debug!(chars = utterance.text.len(), "utterance finalized");
    crate::log_debug_content(&format!("utterance|{}", utterance.text));
    let guard = UtteranceGuard {
        ack: Some(control_tx.clone()),
    };
    match callbacks.utterance() {
        Some(cb) => cb(utterance, guard),
        // No consumer registered: acknowledge immediately so recognition
        // keeps flowing.
        None => drop(guard),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::{AudioStreams, CaptureError, LiveMeter, SessionHandle};
    use crate::playback::{CancelToken, PlaybackOutcome};
    use crate::recognition::{AudioTap, EngineErrorKind, TranscriptAlternative};
    use std::sync::atomic::AtomicUsize;

    struct ProbeCapture {
        opens: Arc<AtomicUsize>,
        closes: Arc<AtomicUsize>,
        fail_permission: bool,
    }

    impl CaptureBackend for ProbeCapture {
        fn open(&mut self, cfg: &PipelineConfig) -> Result<AudioStreams, CaptureError> {
            if self.fail_permission {
                return Err(CaptureError::PermissionDenied);
            }
            self.opens.fetch_add(1, Ordering::SeqCst);
            let (frame_tx, frame_rx) = bounded(cfg.channel_capacity);
            Ok(AudioStreams {
                meter: LiveMeter::new(),
                frames: frame_rx,
                sample_rate: cfg.sample_rate,
                session: Box::new(ProbeSession {
                    closes: self.closes.clone(),
                    frame_tx: Some(frame_tx),
                }),
            })
        }
    }

    struct ProbeSession {
        closes: Arc<AtomicUsize>,
        frame_tx: Option<Sender<Vec<f32>>>,
    }

    impl SessionHandle for ProbeSession {
        fn close(&mut self) {
            if self.frame_tx.take().is_some() {
                self.closes.fetch_add(1, Ordering::SeqCst);
            }
        }
    }

    #[derive(Default)]
    struct EngineProbe {
        starts: AtomicUsize,
        stops: AtomicUsize,
        events: Mutex<Option<Sender<EngineEvent>>>,
    }

    impl EngineProbe {
        fn emit(&self, event: EngineEvent) {
            if let Some(tx) = self.events.lock().unwrap().as_ref() {
                let _ = tx.send(event);
            }
        }

        fn result(&self, text: &str, is_final: bool) {
            self.emit(EngineEvent::Result {
                alternatives: vec![TranscriptAlternative {
                    text: text.to_string(),
                    confidence: 0.9,
                }],
                is_final,
            });
        }
    }

    struct ScriptedEngine {
        probe: Arc<EngineProbe>,
    }

    impl RecognitionEngine for ScriptedEngine {
        fn start(
            &mut self,
            _: &RecognitionRequest,
            _: AudioTap,
            events: Sender<EngineEvent>,
        ) -> Result<()> {
            self.probe.starts.fetch_add(1, Ordering::SeqCst);
            *self.probe.events.lock().unwrap() = Some(events);
            Ok(())
        }

        fn stop(&mut self) {
            self.probe.stops.fetch_add(1, Ordering::SeqCst);
            self.probe.events.lock().unwrap().take();
        }
    }

    struct InstantSynth;

    impl SpeechSynthesizer for InstantSynth {
        fn synthesize(&self, _: &SynthesisRequest) -> Result<Vec<u8>> {
            Ok(vec![1])
        }
    }

    struct InstantSink;

    impl PlaybackSink for InstantSink {
        fn play(&self, _: Vec<u8>, _: &CancelToken) -> Result<PlaybackOutcome> {
            Ok(PlaybackOutcome::Completed)
        }
    }

    /// Sink that holds playback open until released (or cancelled).
    struct GatedSink {
        release: Mutex<Receiver<()>>,
    }

    impl PlaybackSink for GatedSink {
        fn play(&self, _: Vec<u8>, cancel: &CancelToken) -> Result<PlaybackOutcome> {
            let release = self.release.lock().unwrap();
            loop {
                if cancel.is_cancelled() {
                    return Ok(PlaybackOutcome::Cancelled);
                }
                match release.recv_timeout(Duration::from_millis(5)) {
                    Ok(()) => return Ok(PlaybackOutcome::Completed),
                    Err(RecvTimeoutError::Timeout) => {}
                    Err(RecvTimeoutError::Disconnected) => {
                        return Ok(PlaybackOutcome::Cancelled)
                    }
                }
            }
        }
    }

    struct Fixture {
        pipeline: VoicePipeline,
        engine: Arc<EngineProbe>,
        opens: Arc<AtomicUsize>,
        closes: Arc<AtomicUsize>,
    }

    fn fixture(debounce_ms: u64, sink: Arc<dyn PlaybackSink>, fail_permission: bool) -> Fixture {
        let cfg = PipelineConfig {
            finalize_debounce_ms: debounce_ms,
            // Keep the monitor quiet for the duration of a test.
            silence_duration_ms: 600_000,
            energy_poll_ms: 50,
            ..PipelineConfig::default()
        };
        let engine = Arc::new(EngineProbe::default());
        let opens = Arc::new(AtomicUsize::new(0));
        let closes = Arc::new(AtomicUsize::new(0));
        let pipeline = VoicePipeline::new(
            cfg,
            SynthesisConfig::default(),
            Box::new(ProbeCapture {
                opens: opens.clone(),
                closes: closes.clone(),
                fail_permission,
            }),
            Box::new(ScriptedEngine {
                probe: engine.clone(),
            }),
            Arc::new(InstantSynth),
            sink,
        );
        Fixture {
            pipeline,
            engine,
            opens,
            closes,
        }
    }

    fn wait_until(what: &str, condition: impl Fn() -> bool) {
        let deadline = Instant::now() + Duration::from_secs(2);
        while Instant::now() < deadline {
            if condition() {
                return;
            }
            thread::sleep(Duration::from_millis(5));
        }
        panic!("timed out waiting for {what}");
    }

    fn wait_for_state(pipeline: &VoicePipeline, state: PipelineState) {
        wait_until("pipeline state", || pipeline.state() == state);
    }

    #[test]
    fn stop_then_start_reopens_exactly_one_capture_session() {
        let mut f = fixture(1_000, Arc::new(InstantSink), false);
        f.pipeline.start().expect("first start");
        assert_eq!(f.pipeline.state(), PipelineState::Listening);
        assert_eq!(f.opens.load(Ordering::SeqCst), 1);

        f.pipeline.stop();
        assert_eq!(f.pipeline.state(), PipelineState::Idle);
        assert_eq!(f.closes.load(Ordering::SeqCst), 1);
        assert!(f.engine.stops.load(Ordering::SeqCst) >= 1);

        f.pipeline.start().expect("second start");
        assert_eq!(f.opens.load(Ordering::SeqCst), 2);
        assert_eq!(f.closes.load(Ordering::SeqCst), 1);
        assert_eq!(f.engine.starts.load(Ordering::SeqCst), 2);
        f.pipeline.stop();
        assert_eq!(f.closes.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn start_while_running_is_a_no_op() {
        let mut f = fixture(1_000, Arc::new(InstantSink), false);
        f.pipeline.start().expect("start");
        f.pipeline.start().expect("redundant start");
        assert_eq!(f.opens.load(Ordering::SeqCst), 1);
        f.pipeline.stop();
    }

    #[test]
    fn finalized_utterance_reaches_the_consumer_corrected() {
        let mut f = fixture(40, Arc::new(InstantSink), false);
        let (tx, rx) = unbounded::<String>();
        f.pipeline.on_utterance(move |utterance, _guard| {
            let _ = tx.send(utterance.text);
        });
        f.pipeline.start().expect("start");
        f.engine.result("fiziks is fun", true);
        let text = rx
            .recv_timeout(Duration::from_secs(2))
            .expect("finalized utterance");
        assert_eq!(text, "Physics is fun.");
        f.pipeline.stop();
    }

    #[test]
    fn next_utterance_waits_for_the_guard() {
        let mut f = fixture(30, Arc::new(InstantSink), false);
        let (tx, rx) = unbounded::<(String, UtteranceGuard)>();
        f.pipeline.on_utterance(move |utterance, guard| {
            let _ = tx.send((utterance.text, guard));
        });
        f.pipeline.start().expect("start");

        f.engine.result("first thing", true);
        let (first, guard) = rx
            .recv_timeout(Duration::from_secs(2))
            .expect("first utterance");
        assert_eq!(first, "First thing.");

        // A new candidate while the first is unacknowledged stays buffered.
        f.engine.result("second thing", true);
        assert!(rx.recv_timeout(Duration::from_millis(150)).is_err());

        guard.done();
        let (second, _guard) = rx
            .recv_timeout(Duration::from_secs(2))
            .expect("second utterance after ack");
        assert_eq!(second, "Second thing.");
        f.pipeline.stop();
    }

    #[test]
    fn interim_results_feed_the_observer_without_finalizing() {
        let mut f = fixture(40, Arc::new(InstantSink), false);
        let (interim_tx, interim_rx) = unbounded::<String>();
        let (final_tx, final_rx) = unbounded::<String>();
        f.pipeline.on_interim(move |text| {
            let _ = interim_tx.send(text.to_string());
        });
        f.pipeline.on_utterance(move |utterance, _guard| {
            let _ = final_tx.send(utterance.text);
        });
        f.pipeline.start().expect("start");

        f.engine.result("hello there", false);
        let caption = interim_rx
            .recv_timeout(Duration::from_secs(2))
            .expect("interim caption");
        assert_eq!(caption, "Hello there.");
        assert!(
            final_rx.recv_timeout(Duration::from_millis(150)).is_err(),
            "interims never finalize"
        );
        f.pipeline.stop();
    }

    #[test]
    fn speaking_mutes_recognition_until_playback_completes() {
        let (release_tx, release_rx) = unbounded();
        let mut f = fixture(
            40,
            Arc::new(GatedSink {
                release: Mutex::new(release_rx),
            }),
            false,
        );
        let (tx, rx) = unbounded::<String>();
        f.pipeline.on_utterance(move |utterance, _guard| {
            let _ = tx.send(utterance.text);
        });
        f.pipeline.start().expect("start");

        let handle = f.pipeline.respond("a response");
        wait_for_state(&f.pipeline, PipelineState::Speaking);

        // Recognition results during playback are the pipeline's own voice.
        f.engine.result("feedback echo", true);
        assert!(rx.recv_timeout(Duration::from_millis(200)).is_err());

        release_tx.send(()).expect("release playback");
        assert_eq!(handle.wait_timeout(Duration::from_secs(2)), Some(true));
        wait_for_state(&f.pipeline, PipelineState::Listening);

        // Unmuted again: results flow.
        f.engine.result("fiziks", true);
        let text = rx
            .recv_timeout(Duration::from_secs(2))
            .expect("utterance after playback");
        assert_eq!(text, "Physics.");
        f.pipeline.stop();
    }

    #[test]
    fn superseding_response_resolves_the_first_handle_false() {
        let (release_tx, release_rx) = unbounded();
        let mut f = fixture(
            1_000,
            Arc::new(GatedSink {
                release: Mutex::new(release_rx),
            }),
            false,
        );
        f.pipeline.start().expect("start");

        let first = f.pipeline.respond("first response");
        wait_for_state(&f.pipeline, PipelineState::Speaking);
        let second = f.pipeline.respond("second response");

        assert_eq!(first.wait_timeout(Duration::from_secs(2)), Some(false));
        // The cancelled first worker may race the release and consume one
        // message; a second release keeps the live worker from starving.
        release_tx.send(()).expect("release playback");
        release_tx.send(()).expect("release playback again");
        assert_eq!(second.wait_timeout(Duration::from_secs(2)), Some(true));
        wait_for_state(&f.pipeline, PipelineState::Listening);
        f.pipeline.stop();
    }

    #[test]
    fn respond_on_a_stopped_pipeline_resolves_false() {
        let f = fixture(1_000, Arc::new(InstantSink), false);
        assert!(!f.pipeline.respond("nobody is listening").wait());
    }

    #[test]
    fn capture_permission_failure_surfaces_from_start() {
        let mut f = fixture(1_000, Arc::new(InstantSink), true);
        let err = f.pipeline.start().expect_err("start must fail");
        assert!(err.to_string().to_lowercase().contains("permission"));
        assert_eq!(f.pipeline.state(), PipelineState::Idle);
        assert_eq!(f.engine.starts.load(Ordering::SeqCst), 0);

        // The collaborators survive the failure; a retry fails the same way
        // instead of reporting them lost.
        let err = f.pipeline.start().expect_err("retry must fail");
        assert!(err.to_string().to_lowercase().contains("permission"));
    }

    #[test]
    fn fatal_engine_error_tears_down_and_allows_restart() {
        let mut f = fixture(1_000, Arc::new(InstantSink), false);
        f.pipeline.start().expect("start");

        f.engine.emit(EngineEvent::Error(EngineErrorKind::PermissionDenied));
        wait_for_state(&f.pipeline, PipelineState::Idle);
        assert_eq!(f.closes.load(Ordering::SeqCst), 1, "mic released");
        let fatal = f.pipeline.last_fatal_error().expect("fatal recorded");
        assert!(fatal.contains("permission"));

        // A dead handle can be restarted with the same collaborators.
        f.pipeline.start().expect("restart after fatal");
        assert_eq!(f.pipeline.state(), PipelineState::Listening);
        assert_eq!(f.opens.load(Ordering::SeqCst), 2);
        f.pipeline.stop();
    }

    #[test]
    fn engine_end_triggers_a_restart() {
        let mut f = fixture(1_000, Arc::new(InstantSink), false);
        f.pipeline.start().expect("start");
        assert_eq!(f.engine.starts.load(Ordering::SeqCst), 1);

        f.engine.emit(EngineEvent::Ended);
        let engine = f.engine.clone();
        wait_until("engine restart", move || {
            engine.starts.load(Ordering::SeqCst) == 2
        });
        assert_eq!(f.pipeline.state(), PipelineState::Listening);
        f.pipeline.stop();
    }
}
