use super::defaults::{MAX_DEBOUNCE_MS, MAX_SILENCE_DURATION_MS, MAX_TTS_TIMEOUT_MS};
use super::AppConfig;
use anyhow::{bail, Result};
use clap::Parser;

impl AppConfig {
    /// Parse CLI arguments and validate them right away.
    pub fn parse_args() -> Result<Self> {
        let mut config = Self::parse();
        config.validate()?;
        Ok(config)
    }

    /// Check CLI values and normalize the ones that tolerate sloppy input.
    pub fn validate(&mut self) -> Result<()> {
        if !(8_000..=96_000).contains(&self.sample_rate) {
            bail!(
                "--sample-rate must be between 8000 and 96000 Hz, got {}",
                self.sample_rate
            );
        }
        if !(5..=120).contains(&self.frame_ms) {
            bail!("--frame-ms must be between 5 and 120, got {}", self.frame_ms);
        }
        if !(8..=1024).contains(&self.channel_capacity) {
            bail!(
                "--channel-capacity must be between 8 and 1024, got {}",
                self.channel_capacity
            );
        }
        if !(-120.0..=0.0).contains(&self.silence_threshold_db) {
            bail!(
                "--silence-threshold-db must be between -120.0 and 0.0 dB, got {}",
                self.silence_threshold_db
            );
        }
        if self.silence_duration_ms < 200 || self.silence_duration_ms > MAX_SILENCE_DURATION_MS {
            bail!(
                "--silence-duration-ms must be between 200 and {MAX_SILENCE_DURATION_MS}, got {}",
                self.silence_duration_ms
            );
        }
        if !(10..=1_000).contains(&self.energy_poll_ms) {
            bail!(
                "--energy-poll-ms must be between 10 and 1000, got {}",
                self.energy_poll_ms
            );
        }
        if self.energy_poll_ms > self.silence_duration_ms {
            bail!(
                "--energy-poll-ms ({}) cannot exceed --silence-duration-ms ({})",
                self.energy_poll_ms,
                self.silence_duration_ms
            );
        }
        if self.finalize_debounce_ms < 100 || self.finalize_debounce_ms > MAX_DEBOUNCE_MS {
            bail!(
                "--finalize-debounce-ms must be between 100 and {MAX_DEBOUNCE_MS}, got {}",
                self.finalize_debounce_ms
            );
        }
        self.lang = self.lang.trim().to_string();
        if self.lang.is_empty() || !self.lang.is_ascii() {
            bail!("--lang must be a non-empty ASCII language tag");
        }
        self.tts_url = self.tts_url.trim().to_string();
        if !(self.tts_url.starts_with("http://") || self.tts_url.starts_with("https://")) {
            bail!("--tts-url must be an http(s) URL, got '{}'", self.tts_url);
        }
        if self.tts_voice.trim().is_empty() {
            bail!("--tts-voice must not be empty");
        }
        if !(0.25..=4.0).contains(&self.tts_speed) {
            bail!(
                "--tts-speed must be between 0.25 and 4.0, got {}",
                self.tts_speed
            );
        }
        if self.tts_timeout_ms < 1_000 || self.tts_timeout_ms > MAX_TTS_TIMEOUT_MS {
            bail!(
                "--tts-timeout-ms must be between 1000 and {MAX_TTS_TIMEOUT_MS}, got {}",
                self.tts_timeout_ms
            );
        }
        Ok(())
    }
}
