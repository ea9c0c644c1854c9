//! Debounced transcript finalization.
//!
//! Recognition engines deliver a burst of final candidates while the speaker
//! trails off; the finalizer waits until the burst has quiesced for a fixed
//! window, then emits a single [`FinalizedUtterance`]. Downstream processing
//! is acknowledged explicitly so at most one utterance is ever in flight.
//!
//! The struct is pure and deadline-driven: it never sleeps or spawns. The
//! pipeline event loop asks for [`TranscriptFinalizer::deadline`] and calls
//! [`TranscriptFinalizer::poll`] when the clock reaches it.

use std::time::{Duration, Instant};

/// One finalized unit of recognized speech handed to the consumer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FinalizedUtterance {
    pub text: String,
    pub produced_at: Instant,
}

pub struct TranscriptFinalizer {
    debounce: Duration,
    pending: Option<Pending>,
    buffered: Option<String>,
    last_emitted: Option<String>,
    last_interim: Option<String>,
    in_flight: bool,
}

struct Pending {
    text: String,
    deadline: Instant,
}

impl TranscriptFinalizer {
    pub fn new(debounce: Duration) -> Self {
        Self {
            debounce,
            pending: None,
            buffered: None,
            last_emitted: None,
            last_interim: None,
            in_flight: false,
        }
    }

    /// Interim updates feed live captions only; they never touch the timer.
    pub fn on_interim(&mut self, text: &str) {
        self.last_interim = Some(text.to_string());
    }

    /// Latest interim text, for caption display.
    pub fn interim(&self) -> Option<&str> {
        self.last_interim.as_deref()
    }

    /// A final candidate (re)arms the debounce window. While an emission is
    /// still unacknowledged the candidate is buffered instead, last write
    /// wins.
    pub fn on_final_candidate(&mut self, text: &str, now: Instant) {
        if self.in_flight {
            self.buffered = Some(text.to_string());
            return;
        }
        self.pending = Some(Pending {
            text: text.to_string(),
            deadline: now + self.debounce,
        });
    }

    /// Next instant the pipeline loop should wake up at, if any.
    pub fn deadline(&self) -> Option<Instant> {
        self.pending.as_ref().map(|p| p.deadline)
    }

    /// Emit the debounced utterance once its window has elapsed. Duplicate
    /// text (same as the previous emission) is discarded.
    pub fn poll(&mut self, now: Instant) -> Option<FinalizedUtterance> {
        if self.in_flight {
            return None;
        }
        let due = matches!(self.pending.as_ref(), Some(p) if now >= p.deadline);
        if !due {
            return None;
        }
        let pending = self.pending.take()?;
        if self.last_emitted.as_deref() == Some(pending.text.as_str()) {
            return None;
        }
        self.last_emitted = Some(pending.text.clone());
        self.in_flight = true;
        Some(FinalizedUtterance {
            text: pending.text,
            produced_at: now,
        })
    }

    /// True while an emission awaits acknowledgement.
    pub fn in_flight(&self) -> bool {
        self.in_flight
    }

    /// The consumer finished with the previous utterance. Any candidate that
    /// arrived meanwhile starts a fresh debounce window from `now`.
    pub fn acknowledge(&mut self, now: Instant) {
        debug_assert!(self.in_flight, "acknowledge without an in-flight utterance");
        self.in_flight = false;
        if let Some(text) = self.buffered.take() {
            self.pending = Some(Pending {
                text,
                deadline: now + self.debounce,
            });
        }
    }

    /// Drop all timers, buffers, and duplicate-suppression state.
    pub fn reset(&mut self) {
        self.pending = None;
        self.buffered = None;
        self.last_emitted = None;
        self.last_interim = None;
        self.in_flight = false;
    }
}
