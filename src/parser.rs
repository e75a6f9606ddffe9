use std::fs;
use std::path::Path;
use std::sync::Mutex;

use epub::doc::EpubDoc;
use html2text::from_read;
use log::debug;
use regex::Regex;

use crate::config::Config;
use crate::error::{ConvertError, Result};

/// A titled unit of book text. Order of the returned sequence is the
/// canonical chapter numbering.
#[derive(Debug, Clone)]
pub struct Chapter {
    pub title: String,
    pub text: String,
}

/// Narrow interface over a book format. Implementations insert
/// `break_marker` at paragraph boundaries so backends can turn it into a
/// pause directive.
pub trait BookParser: Send + Sync {
    fn get_chapters(&self, break_marker: &str) -> Result<Vec<Chapter>>;
    fn book_title(&self) -> String;
    fn book_author(&self) -> String;
}

/// Pick a parser for the input file based on its extension.
pub fn for_book(config: &Config) -> Result<Box<dyn BookParser>> {
    let path = &config.input_path;
    match path.extension().and_then(|e| e.to_str()) {
        Some("epub") => Ok(Box::new(EpubParser::open(path)?)),
        Some("txt") => Ok(Box::new(TxtParser::open(path)?)),
        other => Err(ConvertError::Config(format!(
            "unsupported book format: {:?} (expected .epub or .txt)",
            other.unwrap_or("none")
        ))),
    }
}

/// EPUB parser walking the spine in reading order.
pub struct EpubParser {
    doc: Mutex<EpubDoc<std::io::BufReader<fs::File>>>,
}

impl EpubParser {
    pub fn open(path: &Path) -> Result<Self> {
        let doc = EpubDoc::new(path)
            .map_err(|e| ConvertError::Parse(format!("{}: {e}", path.display())))?;
        Ok(Self {
            doc: Mutex::new(doc),
        })
    }

    fn extract_title(html: &str, order: usize) -> String {
        // Try h1..h3 first, fall back to a positional name.
        let title_regex = Regex::new(r"<h[1-3][^>]*>([^<]+)</h[1-3]>").unwrap();
        if let Some(captures) = title_regex.captures(html) {
            let raw = captures.get(1).map(|m| m.as_str()).unwrap_or_default();
            let title = from_read(raw.as_bytes(), 80).trim().to_string();
            if !title.is_empty() {
                return title;
            }
        }
        format!("Chapter {}", order + 1)
    }
}

impl BookParser for EpubParser {
    fn get_chapters(&self, break_marker: &str) -> Result<Vec<Chapter>> {
        let mut doc = self.doc.lock().unwrap();
        let spine = doc.spine.clone();
        let mut chapters = Vec::new();

        for (order, idref) in spine.iter().enumerate() {
            let Some((html, _mime)) = doc.get_resource_str(&idref.idref) else {
                debug!(
                    "spine item {} has no readable resource, skipping",
                    idref.idref
                );
                continue;
            };
            let title = Self::extract_title(&html, order);
            let plain = from_read(html.as_bytes(), 80);
            let text = mark_paragraph_breaks(&normalize_text(&plain), break_marker);
            chapters.push(Chapter { title, text });
        }

        Ok(chapters)
    }

    fn book_title(&self) -> String {
        let doc = self.doc.lock().unwrap();
        doc.mdata("title")
            .map(|item| item.value.clone())
            .unwrap_or_else(|| "Unknown".to_string())
    }

    fn book_author(&self) -> String {
        let doc = self.doc.lock().unwrap();
        doc.mdata("creator")
            .map(|item| item.value.clone())
            .unwrap_or_else(|| "Unknown".to_string())
    }
}

/// Plain-text parser splitting on chapter headings.
pub struct TxtParser {
    title: String,
    text: String,
}

impl TxtParser {
    pub fn open(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)?;
        let title = path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("Unknown")
            .to_string();
        Ok(Self { title, text })
    }

    #[cfg(test)]
    fn from_text(title: &str, text: &str) -> Self {
        Self {
            title: title.to_string(),
            text: text.to_string(),
        }
    }
}

/// Lines that open a new chapter: western headings, markdown headings and
/// CJK numbered chapters.
fn heading_regex() -> Regex {
    Regex::new(
        r"(?i)^\s*(chapter\s+\S+.*|part\s+\S+.*|section\s+\S+.*|#{1,2}\s+\S.*|第\s*[0-9一二三四五六七八九十百千万]+\s*[章节回话].*)\s*$",
    )
    .unwrap()
}

impl BookParser for TxtParser {
    fn get_chapters(&self, break_marker: &str) -> Result<Vec<Chapter>> {
        let heading = heading_regex();
        let mut chapters: Vec<(String, String)> = Vec::new();
        let mut preamble = String::new();

        for line in self.text.lines() {
            if heading.is_match(line) {
                chapters.push((line.trim().to_string(), String::new()));
            } else if let Some((_, body)) = chapters.last_mut() {
                body.push_str(line);
                body.push('\n');
            } else {
                preamble.push_str(line);
                preamble.push('\n');
            }
        }

        if chapters.is_empty() {
            // No headings at all, treat the whole file as one chapter.
            chapters.push((self.title.clone(), preamble));
        } else if !preamble.trim().is_empty() {
            // Keep text found before the first heading.
            chapters.insert(0, (self.title.clone(), preamble));
        }

        Ok(chapters
            .into_iter()
            .map(|(title, body)| Chapter {
                title,
                text: mark_paragraph_breaks(&normalize_text(&body), break_marker),
            })
            .collect())
    }

    fn book_title(&self) -> String {
        self.title.clone()
    }

    fn book_author(&self) -> String {
        "Unknown".to_string()
    }
}

/// Collapse horizontal whitespace runs and excess blank lines left over
/// from extraction.
fn normalize_text(text: &str) -> String {
    let spaces = Regex::new(r"[ \t]+").unwrap();
    let blank_lines = Regex::new(r"\n{3,}").unwrap();
    let text = spaces.replace_all(text, " ");
    blank_lines.replace_all(&text, "\n\n").trim().to_string()
}

/// Insert the backend's break marker at paragraph boundaries.
fn mark_paragraph_breaks(text: &str, break_marker: &str) -> String {
    if break_marker.is_empty() {
        return text.to_string();
    }
    text.replace("\n\n", &format!("{break_marker}\n\n"))
}
