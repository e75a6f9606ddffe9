use std::io::{Cursor, Write};
use std::path::Path;
use std::process::{Command, Output, Stdio};

use hound::{WavReader, WavWriter};
use log::{debug, info};

use super::{AudioTags, TtsBackend};
use crate::chunk::{max_chars_for_language, split_text};
use crate::config::Config;
use crate::error::{ConvertError, Result, TtsError};

const BREAK_STRING: &str = "   ";

/// Local process backend driving an installed speech engine. Cost
/// estimates are zero and failures are not retried; there is no network
/// in between.
pub struct EspeakBackend {
    engine: String,
    language: String,
    voice: Option<String>,
    speed: f32,
    break_duration_ms: u64,
}

impl EspeakBackend {
    pub fn new(config: &Config) -> Result<Self> {
        Ok(Self {
            engine: detect_engine()?,
            language: config.language.clone(),
            voice: config.voice_name.clone(),
            speed: config.speed,
            break_duration_ms: config.break_duration_ms,
        })
    }

    fn voice_arg(&self) -> &str {
        self.voice.as_deref().unwrap_or(&self.language)
    }

    /// Turn break markers into engine pause directives. The espeak family
    /// understands SSML-ish markup when invoked with -m; festival gets a
    /// plain sentence break.
    fn render_pauses(&self, chunk: &str) -> String {
        let replacement = if self.engine == "festival" {
            ".\n".to_string()
        } else {
            format!(" <break time=\"{}ms\" /> ", self.break_duration_ms)
        };
        chunk.replace(BREAK_STRING, &replacement)
    }

    fn synthesize_chunk(&self, chunk: &str) -> std::result::Result<Vec<u8>, TtsError> {
        let rendered = self.render_pauses(chunk);
        let output = match self.engine.as_str() {
            "festival" => run_festival(&rendered),
            engine => run_espeak(engine, self.voice_arg(), self.speed, &rendered),
        }
        .map_err(TtsError::permanent)?;

        if !output.status.success() {
            return Err(TtsError::permanent(format!(
                "{} exited with {}",
                self.engine, output.status
            )));
        }
        Ok(output.stdout)
    }
}

impl TtsBackend for EspeakBackend {
    fn text_to_speech(
        &self,
        text: &str,
        output_path: &Path,
        tags: &AudioTags,
    ) -> std::result::Result<(), TtsError> {
        let max_chars = max_chars_for_language(&self.language);
        let mut chunk_wavs = Vec::new();

        for (i, chunk) in split_text(text, max_chars).enumerate() {
            info!(
                "chapter {} <{}>: synthesizing chunk {} ({} chars)",
                tags.chapter_index,
                tags.chapter_title,
                i + 1,
                chunk.chars().count()
            );
            chunk_wavs.push(self.synthesize_chunk(chunk)?);
        }

        merge_wav_segments(&chunk_wavs, output_path)?;
        debug!(
            "wav container carries no embedded tags, skipping tag write for chapter {}",
            tags.chapter_index
        );
        Ok(())
    }

    fn break_string(&self) -> &str {
        BREAK_STRING
    }

    fn output_file_extension(&self) -> &str {
        "wav"
    }

    fn estimate_cost(&self, _total_chars: usize) -> f64 {
        0.0
    }

    fn validate_config(&self) -> Result<()> {
        if !(0.25..=4.0).contains(&self.speed) {
            return Err(ConvertError::Config(format!(
                "unsupported speed: {}",
                self.speed
            )));
        }
        Ok(())
    }
}

/// Probe for an installed speech engine, preferred first.
fn detect_engine() -> Result<String> {
    let engines = ["espeak-ng", "espeak", "festival"];
    for engine in &engines {
        let found = Command::new("which")
            .arg(engine)
            .output()
            .map(|output| output.status.success())
            .unwrap_or(false);
        if found {
            return Ok(engine.to_string());
        }
    }
    Err(ConvertError::Config(
        "no speech engine found, install espeak-ng, espeak or festival".to_string(),
    ))
}

fn run_espeak(engine: &str, voice: &str, speed: f32, text: &str) -> std::io::Result<Output> {
    Command::new(engine)
        .arg("-v")
        .arg(voice)
        .arg("-s")
        .arg(format!("{}", (speed * 175.0) as u32))
        .arg("-m")
        .arg("--stdout")
        .arg(text)
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .output()
}

fn run_festival(text: &str) -> std::io::Result<Output> {
    let mut child = Command::new("festival")
        .arg("--tts")
        .arg("--pipe")
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()?;

    if let Some(stdin) = child.stdin.as_mut() {
        stdin.write_all(text.as_bytes())?;
    }
    child.wait_with_output()
}

/// Concatenate per-chunk WAV buffers into one file, written once.
fn merge_wav_segments(segments: &[Vec<u8>], output_path: &Path) -> std::result::Result<(), TtsError> {
    let mut writer = None;

    for bytes in segments {
        let mut reader = WavReader::new(Cursor::new(bytes.as_slice())).map_err(TtsError::permanent)?;
        let spec = reader.spec();
        if writer.is_none() {
            writer = Some(WavWriter::create(output_path, spec).map_err(TtsError::permanent)?);
        }
        if let Some(out) = writer.as_mut() {
            for sample in reader.samples::<i16>() {
                let sample = sample.map_err(TtsError::permanent)?;
                out.write_sample(sample).map_err(TtsError::permanent)?;
            }
        }
    }

    if let Some(out) = writer {
        out.finalize().map_err(TtsError::permanent)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn backend(engine: &str) -> EspeakBackend {
        EspeakBackend {
            engine: engine.to_string(),
            language: "en".to_string(),
            voice: None,
            speed: 1.0,
            break_duration_ms: 500,
        }
    }

    #[test]
    fn break_markers_become_pause_directives() {
        let rendered = backend("espeak-ng").render_pauses("one   two");
        assert_eq!(rendered, "one <break time=\"500ms\" /> two");
    }

    #[test]
    fn festival_gets_plain_breaks() {
        let rendered = backend("festival").render_pauses("one   two");
        assert_eq!(rendered, "one.\ntwo");
    }

    #[test]
    fn voice_falls_back_to_language() {
        let mut b = backend("espeak");
        assert_eq!(b.voice_arg(), "en");
        b.voice = Some("en+f3".to_string());
        assert_eq!(b.voice_arg(), "en+f3");
    }

    #[test]
    fn speed_bounds_are_validated() {
        let mut b = backend("espeak-ng");
        assert!(b.validate_config().is_ok());
        b.speed = 9.0;
        assert!(b.validate_config().is_err());
    }
}
