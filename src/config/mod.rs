//! Command-line parsing and validation helpers.

mod defaults;
#[cfg(test)]
mod tests;
mod validation;

use clap::Parser;

pub use defaults::{
    DEFAULT_CHANNEL_CAPACITY, DEFAULT_ENERGY_POLL_MS, DEFAULT_FINALIZE_DEBOUNCE_MS,
    DEFAULT_FRAME_MS, DEFAULT_LANG, DEFAULT_SAMPLE_RATE, DEFAULT_SILENCE_DURATION_MS,
    DEFAULT_SILENCE_THRESHOLD_DB, DEFAULT_TTS_SPEED, DEFAULT_TTS_TIMEOUT_MS, DEFAULT_TTS_URL,
    DEFAULT_TTS_VOICE,
};

/// CLI options for the voiceloop pipeline. Validated values keep the audio
/// and HTTP collaborators inside safe operating ranges.
#[derive(Debug, Parser, Clone)]
#[command(about = "voiceloop voice interaction pipeline", author, version)]
pub struct AppConfig {
    /// Preferred audio input device name
    #[arg(long)]
    pub input_device: Option<String>,

    /// Print detected audio input devices and exit
    #[arg(long = "list-input-devices", default_value_t = false)]
    pub list_input_devices: bool,

    /// Run the live energy monitor against the microphone and print
    /// voice/silence transitions until interrupted
    #[arg(long = "monitor", default_value_t = false)]
    pub monitor: bool,

    /// Enable file logging (debug)
    #[arg(long = "logs", env = "VOICELOOP_LOGS", default_value_t = false)]
    pub logs: bool,

    /// Disable all file logging (overrides --logs and log env vars)
    #[arg(long = "no-logs", env = "VOICELOOP_NO_LOGS", default_value_t = false)]
    pub no_logs: bool,

    /// Allow logging transcript/content snippets (debug log only)
    #[arg(
        long = "log-content",
        env = "VOICELOOP_LOG_CONTENT",
        default_value_t = false
    )]
    pub log_content: bool,

    /// Enable verbose timing logs
    #[arg(long)]
    pub log_timings: bool,

    /// Capture sample rate handed to the recognition engine (Hz)
    #[arg(long = "sample-rate", default_value_t = DEFAULT_SAMPLE_RATE)]
    pub sample_rate: u32,

    /// Microphone tap frame size (milliseconds)
    #[arg(long = "frame-ms", default_value_t = DEFAULT_FRAME_MS)]
    pub frame_ms: u64,

    /// Frame channel capacity between the capture callback and consumers
    #[arg(long = "channel-capacity", default_value_t = DEFAULT_CHANNEL_CAPACITY)]
    pub channel_capacity: usize,

    /// Energy level above which a sample counts as voice (decibels)
    #[arg(long = "silence-threshold-db", default_value_t = DEFAULT_SILENCE_THRESHOLD_DB, allow_negative_numbers = true)]
    pub silence_threshold_db: f32,

    /// Quiet time before a silence event fires (milliseconds)
    #[arg(long = "silence-duration-ms", default_value_t = DEFAULT_SILENCE_DURATION_MS)]
    pub silence_duration_ms: u64,

    /// Energy monitor polling period (milliseconds)
    #[arg(long = "energy-poll-ms", default_value_t = DEFAULT_ENERGY_POLL_MS)]
    pub energy_poll_ms: u64,

    /// Debounce window applied before a transcript is finalized (milliseconds)
    #[arg(long = "finalize-debounce-ms", default_value_t = DEFAULT_FINALIZE_DEBOUNCE_MS)]
    pub finalize_debounce_ms: u64,

    /// Language tag requested from the recognition engine
    #[arg(long, default_value = DEFAULT_LANG)]
    pub lang: String,

    /// Text-to-speech endpoint
    #[arg(long = "tts-url", env = "VOICELOOP_TTS_URL", default_value = DEFAULT_TTS_URL)]
    pub tts_url: String,

    /// Text-to-speech voice name
    #[arg(long = "tts-voice", default_value = DEFAULT_TTS_VOICE)]
    pub tts_voice: String,

    /// Text-to-speech playback speed multiplier
    #[arg(long = "tts-speed", default_value_t = DEFAULT_TTS_SPEED)]
    pub tts_speed: f32,

    /// Text-to-speech request timeout (milliseconds)
    #[arg(long = "tts-timeout-ms", default_value_t = DEFAULT_TTS_TIMEOUT_MS)]
    pub tts_timeout_ms: u64,
}

impl AppConfig {
    /// Extract the tunables the pipeline core consumes.
    pub fn pipeline_config(&self) -> PipelineConfig {
        PipelineConfig {
            sample_rate: self.sample_rate,
            frame_ms: self.frame_ms,
            channel_capacity: self.channel_capacity,
            silence_threshold_db: self.silence_threshold_db,
            silence_duration_ms: self.silence_duration_ms,
            energy_poll_ms: self.energy_poll_ms,
            finalize_debounce_ms: self.finalize_debounce_ms,
            lang: self.lang.clone(),
        }
    }

    /// Extract the TTS collaborator settings.
    pub fn synthesis_config(&self) -> SynthesisConfig {
        SynthesisConfig {
            url: self.tts_url.clone(),
            voice: self.tts_voice.clone(),
            speed: self.tts_speed,
            timeout_ms: self.tts_timeout_ms,
        }
    }
}

/// Tunable parameters for the capture + detection + finalization pipeline.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub sample_rate: u32,
    pub frame_ms: u64,
    pub channel_capacity: usize,
    pub silence_threshold_db: f32,
    pub silence_duration_ms: u64,
    pub energy_poll_ms: u64,
    pub finalize_debounce_ms: u64,
    pub lang: String,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            sample_rate: DEFAULT_SAMPLE_RATE,
            frame_ms: DEFAULT_FRAME_MS,
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
            silence_threshold_db: DEFAULT_SILENCE_THRESHOLD_DB,
            silence_duration_ms: DEFAULT_SILENCE_DURATION_MS,
            energy_poll_ms: DEFAULT_ENERGY_POLL_MS,
            finalize_debounce_ms: DEFAULT_FINALIZE_DEBOUNCE_MS,
            lang: DEFAULT_LANG.to_string(),
        }
    }
}

/// Settings for the external text-to-speech collaborator.
#[derive(Debug, Clone)]
pub struct SynthesisConfig {
    pub url: String,
    pub voice: String,
    pub speed: f32,
    pub timeout_ms: u64,
}

impl Default for SynthesisConfig {
    fn default() -> Self {
        Self {
            url: DEFAULT_TTS_URL.to_string(),
            voice: DEFAULT_TTS_VOICE.to_string(),
            speed: DEFAULT_TTS_SPEED,
            timeout_ms: DEFAULT_TTS_TIMEOUT_MS,
        }
    }
}
