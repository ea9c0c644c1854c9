//! Text-to-speech collaborator.
//!
//! The pipeline never interprets audio bytes; it only needs something that
//! turns a [`SynthesisRequest`] into a playable payload. The default
//! implementation posts JSON to an HTTP endpoint and returns the body.

use crate::config::SynthesisConfig;
use anyhow::{Context, Result};
use serde::Serialize;
use std::time::Duration;

/// The request shape the TTS endpoint expects.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct SynthesisRequest {
    pub text: String,
    pub voice: String,
    pub speed: f32,
}

impl SynthesisRequest {
    pub fn from_config(text: impl Into<String>, cfg: &SynthesisConfig) -> Self {
        Self {
            text: text.into(),
            voice: cfg.voice.clone(),
            speed: cfg.speed,
        }
    }
}

/// Capability that produces synthesized audio. Returning an empty payload
/// means "nothing to play" and is treated as success.
pub trait SpeechSynthesizer: Send + Sync + 'static {
    fn synthesize(&self, request: &SynthesisRequest) -> Result<Vec<u8>>;
}

/// HTTP-backed synthesizer. Blocking client; synthesis always runs on the
/// playback worker thread, never on the pipeline event loop.
pub struct HttpSynthesizer {
    url: String,
    client: reqwest::blocking::Client,
}

impl HttpSynthesizer {
    pub fn new(cfg: &SynthesisConfig) -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_millis(cfg.timeout_ms))
            .build()
            .context("failed to build TTS HTTP client")?;
        Ok(Self {
            url: cfg.url.clone(),
            client,
        })
    }
}

impl SpeechSynthesizer for HttpSynthesizer {
    fn synthesize(&self, request: &SynthesisRequest) -> Result<Vec<u8>> {
        if request.text.trim().is_empty() {
            return Ok(Vec::new());
        }
        let response = self
            .client
            .post(&self.url)
            .json(request)
            .send()
            .context("TTS request failed")?;
        let status = response.status();
        if !status.is_success() {
            anyhow::bail!("TTS endpoint returned {status}");
        }
        let bytes = response.bytes().context("failed to read TTS response body")?;
        Ok(bytes.to_vec())
    }
}
