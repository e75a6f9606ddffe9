use serde::Serialize;
use std::path::PathBuf;

/// Which TTS backend converts chapter text into audio.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum BackendKind {
    Espeak,
    OpenAi,
}

impl BackendKind {
    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "espeak" => Some(BackendKind::Espeak),
            "openai" => Some(BackendKind::OpenAi),
            _ => None,
        }
    }
}

/// Immutable run configuration, built once from the CLI and passed by
/// reference into every component.
#[derive(Debug, Clone, Serialize)]
pub struct Config {
    pub input_path: PathBuf,
    pub output_folder: PathBuf,
    /// First chapter to convert, 1-based.
    pub chapter_start: usize,
    /// Last chapter to convert, 1-based; -1 means the last chapter.
    pub chapter_end: i64,
    pub no_prompt: bool,
    pub preview: bool,
    pub output_text: bool,
    pub worker_count: usize,
    pub backend: BackendKind,
    pub language: String,
    pub voice_name: Option<String>,
    pub model_name: Option<String>,
    pub output_format: Option<String>,
    pub speed: f32,
    /// Pause length substituted for the in-text break marker, milliseconds.
    pub break_duration_ms: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            input_path: PathBuf::new(),
            output_folder: PathBuf::new(),
            chapter_start: 1,
            chapter_end: -1,
            no_prompt: false,
            preview: false,
            output_text: false,
            worker_count: num_cpus::get(),
            backend: BackendKind::Espeak,
            language: "en".to_string(),
            voice_name: None,
            model_name: None,
            output_format: None,
            speed: 1.0,
            break_duration_ms: 1250,
        }
    }
}
