pub mod espeak;
pub mod openai;

use std::path::Path;

use crate::config::{BackendKind, Config};
use crate::error::{Result, TtsError};

/// Metadata attached to each chapter's audio output.
#[derive(Debug, Clone)]
pub struct AudioTags {
    pub chapter_title: String,
    pub author: String,
    pub book_title: String,
    pub chapter_index: usize,
}

/// A text-to-speech backend. One chapter in, one audio file out; chunking
/// and retry of remote calls happen inside the implementation.
pub trait TtsBackend: Send + Sync {
    /// Synthesize `text` into `output_path`, writing the file once after
    /// every chunk has been produced.
    fn text_to_speech(
        &self,
        text: &str,
        output_path: &Path,
        tags: &AudioTags,
    ) -> std::result::Result<(), TtsError>;

    /// In-text marker the parser inserts where a pause belongs.
    fn break_string(&self) -> &str;

    /// File extension of the produced audio.
    fn output_file_extension(&self) -> &str;

    /// Rough price in dollars for synthesizing `total_chars` characters.
    fn estimate_cost(&self, total_chars: usize) -> f64;

    /// Check backend options before any work starts.
    fn validate_config(&self) -> Result<()>;
}

/// Build the backend selected by the configuration. Called once up front
/// for validation and once per worker for an exclusive handle.
pub fn create_backend(config: &Config) -> Result<Box<dyn TtsBackend>> {
    match config.backend {
        BackendKind::Espeak => Ok(Box::new(espeak::EspeakBackend::new(config)?)),
        BackendKind::OpenAi => Ok(Box::new(openai::OpenAiBackend::new(config)?)),
    }
}
