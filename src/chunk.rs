use unicode_segmentation::UnicodeSegmentation;

/// Character cap for languages where character count tracks spoken duration
/// poorly, so requests must stay smaller.
const CJK_MAX_CHARS: usize = 1800;
const DEFAULT_MAX_CHARS: usize = 3000;

/// Per-language chunk size cap. Backends pass the result to [`split_text`].
pub fn max_chars_for_language(language: &str) -> usize {
    if language.to_ascii_lowercase().starts_with("zh") {
        CJK_MAX_CHARS
    } else {
        DEFAULT_MAX_CHARS
    }
}

/// Boundary markers in priority order. The first marker class with a match
/// inside the window decides the cut; the marker stays at the end of the
/// chunk it terminates so concatenating chunks reproduces the input.
const BOUNDARY_MARKERS: &[&str] = &[
    "。", "！", "？", // CJK end-of-sentence
    ". ", "! ", "? ", // end-of-sentence with trailing space
    "；", ";", // semicolons
    "，", ",", // commas
    "：", ":", // colons
    "）", ")", "]", "】", "}", "」", "』", // closing parentheses and brackets
    "、", // CJK enumeration comma
    "—", "-", "–", // dashes
    " ", // spaces as last resort
];

/// Split `text` into chunks of at most `max_chars` characters, cutting at
/// the nearest preceding boundary marker when one exists in the window and
/// at a grapheme boundary otherwise.
///
/// Chunks are contiguous slices of the input, so concatenating them yields
/// the input exactly. Splitting the same input with the same cap always
/// produces the same chunks.
pub fn split_text(text: &str, max_chars: usize) -> TextChunks<'_> {
    assert!(max_chars > 0, "max_chars must be positive");
    TextChunks {
        rest: text,
        max_chars,
    }
}

/// Lazy chunk iterator returned by [`split_text`].
pub struct TextChunks<'a> {
    rest: &'a str,
    max_chars: usize,
}

impl<'a> Iterator for TextChunks<'a> {
    type Item = &'a str;

    fn next(&mut self) -> Option<&'a str> {
        if self.rest.is_empty() {
            return None;
        }
        let cut = chunk_end(self.rest, self.max_chars);
        let (chunk, rest) = self.rest.split_at(cut);
        self.rest = rest;
        Some(chunk)
    }
}

/// Byte offset of the end of the next chunk of `text`.
fn chunk_end(text: &str, max_chars: usize) -> usize {
    let window_end = byte_at_char(text, max_chars);
    if window_end == text.len() {
        return text.len();
    }
    let window = &text[..window_end];

    for marker in BOUNDARY_MARKERS {
        if let Some(idx) = window.rfind(marker) {
            return idx + marker.len();
        }
    }

    // No boundary in the window: hard cut, but never inside a grapheme.
    let mut cut = 0;
    for (start, grapheme) in text.grapheme_indices(true) {
        let end = start + grapheme.len();
        if end > window_end {
            break;
        }
        cut = end;
    }
    if cut == 0 {
        // A single grapheme wider than the cap is emitted whole rather
        // than torn apart.
        cut = text
            .grapheme_indices(true)
            .next()
            .map(|(start, grapheme)| start + grapheme.len())
            .unwrap_or(text.len());
    }
    cut
}

/// Byte offset just after `n_chars` characters, or the full length if the
/// text is shorter.
fn byte_at_char(text: &str, n_chars: usize) -> usize {
    match text.char_indices().nth(n_chars) {
        Some((idx, _)) => idx,
        None => text.len(),
    }
}
