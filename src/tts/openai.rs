use std::env;
use std::fs;
use std::path::Path;
use std::time::Duration;

use log::{debug, info, warn};
use reqwest::blocking::Client;
use reqwest::StatusCode;
use serde::Serialize;

use super::{AudioTags, TtsBackend};
use crate::chunk::split_text;
use crate::config::Config;
use crate::error::{ConvertError, Result, TtsError};
use crate::retry::{with_retry, BASE_DELAY, MAX_RETRIES};

/// The service caps input tokens, not characters, and characters per token
/// vary wildly by language, so the chunk cap stays well under the limit.
const MAX_CHARS: usize = 1800;

const BREAK_STRING: &str = "   ";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

const SUPPORTED_FORMATS: &[&str] = &["mp3", "aac", "flac", "opus", "wav"];
const SUPPORTED_MODELS: &[&str] = &["tts-1", "tts-1-hd", "gpt-4o-mini-tts"];

/// Dollars per thousand input characters.
fn price_per_thousand_chars(model: &str) -> f64 {
    match model {
        "tts-1" => 0.015,
        "tts-1-hd" => 0.03,
        "gpt-4o-mini-tts" => 0.003,
        other => {
            warn!("unknown model {other}, cost estimate unavailable");
            0.0
        }
    }
}

fn cost_estimate(model: &str, total_chars: usize) -> f64 {
    (total_chars as f64 / 1000.0).ceil() * price_per_thousand_chars(model)
}

#[derive(Serialize)]
struct SpeechRequest<'a> {
    model: &'a str,
    voice: &'a str,
    speed: f32,
    input: &'a str,
    response_format: &'a str,
}

/// OpenAI-compatible HTTP backend. Each chunk request is wrapped in the
/// retry policy; transient classification is based on transport errors and
/// response status.
pub struct OpenAiBackend {
    client: Client,
    base_url: String,
    api_key: String,
    model: String,
    voice: String,
    speed: f32,
    format: String,
}

impl OpenAiBackend {
    pub fn new(config: &Config) -> Result<Self> {
        let api_key = env::var("OPENAI_API_KEY")
            .map_err(|_| ConvertError::Config("OPENAI_API_KEY is not set".to_string()))?;
        let base_url = env::var("OPENAI_BASE_URL")
            .unwrap_or_else(|_| "https://api.openai.com/v1".to_string());
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| ConvertError::Config(e.to_string()))?;

        Ok(Self {
            client,
            base_url,
            api_key,
            model: config
                .model_name
                .clone()
                .unwrap_or_else(|| "gpt-4o-mini-tts".to_string()),
            voice: config.voice_name.clone().unwrap_or_else(|| "alloy".to_string()),
            speed: config.speed,
            format: config
                .output_format
                .clone()
                .unwrap_or_else(|| "mp3".to_string()),
        })
    }

    fn synthesize_chunk(&self, chunk: &str) -> std::result::Result<Vec<u8>, TtsError> {
        let response = self
            .client
            .post(format!("{}/audio/speech", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&SpeechRequest {
                model: &self.model,
                voice: &self.voice,
                speed: self.speed,
                input: chunk,
                response_format: &self.format,
            })
            .send()
            .map_err(classify_transport)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            return Err(classify_status(status, &body));
        }

        let bytes = response.bytes().map_err(classify_transport)?;
        debug!("received {} bytes of audio", bytes.len());
        Ok(bytes.to_vec())
    }
}

impl TtsBackend for OpenAiBackend {
    fn text_to_speech(
        &self,
        text: &str,
        output_path: &Path,
        tags: &AudioTags,
    ) -> std::result::Result<(), TtsError> {
        let chunks: Vec<&str> = split_text(text, MAX_CHARS).collect();
        let total = chunks.len();
        let mut audio = Vec::new();

        for (i, chunk) in chunks.iter().enumerate() {
            info!(
                "chapter {} <{}>: chunk {} of {}, {} chars",
                tags.chapter_index,
                tags.chapter_title,
                i + 1,
                total,
                chunk.chars().count()
            );
            let bytes = with_retry(MAX_RETRIES, BASE_DELAY, || self.synthesize_chunk(chunk))?;
            audio.extend_from_slice(&bytes);
        }

        // One write per chapter, after the last chunk.
        fs::write(output_path, &audio).map_err(TtsError::permanent)?;
        debug!(
            "container tags left to the service output, tags: {} / {} / {}",
            tags.book_title, tags.author, tags.chapter_title
        );
        Ok(())
    }

    fn break_string(&self) -> &str {
        // Sent through as-is; the service pauses naturally on whitespace.
        BREAK_STRING
    }

    fn output_file_extension(&self) -> &str {
        &self.format
    }

    fn estimate_cost(&self, total_chars: usize) -> f64 {
        cost_estimate(&self.model, total_chars)
    }

    fn validate_config(&self) -> Result<()> {
        if !SUPPORTED_FORMATS.contains(&self.format.as_str()) {
            return Err(ConvertError::Config(format!(
                "unsupported output format: {}",
                self.format
            )));
        }
        if !SUPPORTED_MODELS.contains(&self.model.as_str()) {
            warn!("model {} is not a known speech model", self.model);
        }
        if !(0.25..=4.0).contains(&self.speed) {
            return Err(ConvertError::Config(format!(
                "unsupported speed: {}",
                self.speed
            )));
        }
        Ok(())
    }
}

fn classify_transport(err: reqwest::Error) -> TtsError {
    if err.is_builder() {
        TtsError::permanent(err)
    } else {
        // Timeouts, refused connections and truncated bodies are worth
        // another attempt.
        TtsError::transient(err)
    }
}

fn classify_status(status: StatusCode, body: &str) -> TtsError {
    let detail: String = body.trim().chars().take(200).collect();
    let message = format!("{status}: {detail}");
    if status.is_server_error() {
        TtsError::transient(message)
    } else {
        // Client errors (bad credentials, rejected input, exceeded quota)
        // will not get better on retry.
        TtsError::permanent(message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn server_errors_are_transient() {
        assert!(classify_status(StatusCode::INTERNAL_SERVER_ERROR, "oops").is_transient());
        assert!(classify_status(StatusCode::BAD_GATEWAY, "").is_transient());
    }

    #[test]
    fn client_errors_are_permanent() {
        assert!(!classify_status(StatusCode::UNAUTHORIZED, "bad key").is_transient());
        assert!(!classify_status(StatusCode::TOO_MANY_REQUESTS, "quota exceeded").is_transient());
        assert!(!classify_status(StatusCode::BAD_REQUEST, "").is_transient());
    }

    #[test]
    fn cost_rounds_up_to_the_next_thousand_chars() {
        assert_eq!(cost_estimate("tts-1", 1000), 0.015);
        assert_eq!(cost_estimate("tts-1", 1500), 0.03);
        assert_eq!(cost_estimate("tts-1-hd", 2000), 0.06);
        assert_eq!(cost_estimate("nonsense", 5000), 0.0);
    }
}
