//! Default values shared between CLI parsing and validation.

pub const DEFAULT_SAMPLE_RATE: u32 = 16_000;
pub const DEFAULT_FRAME_MS: u64 = 20;
pub const DEFAULT_CHANNEL_CAPACITY: usize = 64;

pub const DEFAULT_SILENCE_THRESHOLD_DB: f32 = -50.0;
pub const DEFAULT_SILENCE_DURATION_MS: u64 = 1_500;
pub const DEFAULT_ENERGY_POLL_MS: u64 = 100;

pub const DEFAULT_FINALIZE_DEBOUNCE_MS: u64 = 1_000;

pub const DEFAULT_TTS_URL: &str = "http://localhost:3000/api/tts";
pub const DEFAULT_TTS_VOICE: &str = "shimmer";
pub const DEFAULT_TTS_SPEED: f32 = 1.0;
pub const DEFAULT_TTS_TIMEOUT_MS: u64 = 30_000;

pub const DEFAULT_LANG: &str = "en-US";

/// Hard ceiling on the silence window so a typo cannot park the monitor
/// on an hour-long gap.
pub const MAX_SILENCE_DURATION_MS: u64 = 30_000;
pub const MAX_DEBOUNCE_MS: u64 = 10_000;
pub const MAX_TTS_TIMEOUT_MS: u64 = 120_000;
