use std::fs;
use std::io;
use std::sync::Arc;

use indicatif::{ProgressBar, ProgressStyle};
use log::{error, info, warn};
use regex::Regex;

use crate::config::Config;
use crate::error::{ConvertError, Result};
use crate::parser::{self, BookParser, Chapter};
use crate::pool::{self, CancelToken, ChapterTask};
use crate::tts::{self, AudioTags, TtsBackend};

/// Terminal state of one conversion run.
#[derive(Debug)]
pub enum RunOutcome {
    /// Every selected chapter produced a result; failures are listed as
    /// (index, title) pairs and do not fail the run.
    Completed {
        total: usize,
        failed: Vec<(usize, String)>,
    },
    /// The user declined at the confirmation prompt.
    Declined,
    /// Cancellation stopped the run before every chapter was processed;
    /// partial results are discarded.
    Aborted,
}

type BackendFactory = Arc<dyn Fn() -> Result<Box<dyn TtsBackend>> + Send + Sync>;

/// Drives one run: chapter selection, cost gate, dispatch, report.
pub struct AudiobookPipeline {
    config: Config,
}

impl AudiobookPipeline {
    pub fn new(config: Config) -> Self {
        Self { config }
    }

    pub fn run(&self, cancel: &CancelToken) -> Result<RunOutcome> {
        let parser = parser::for_book(&self.config)?;
        let config = self.config.clone();
        let factory: BackendFactory = Arc::new(move || tts::create_backend(&config));
        self.run_with(parser.as_ref(), factory, cancel)
    }

    fn run_with(
        &self,
        parser: &dyn BookParser,
        backend_factory: BackendFactory,
        cancel: &CancelToken,
    ) -> Result<RunOutcome> {
        let backend = (*backend_factory)()?;
        backend.validate_config()?;

        fs::create_dir_all(&self.config.output_folder)?;

        let chapters: Vec<Chapter> = parser
            .get_chapters(backend.break_string())?
            .into_iter()
            .filter(|c| !c.text.trim().is_empty())
            .collect();
        info!("Chapters count: {}", chapters.len());

        let (start, end) = validate_range(
            chapters.len(),
            self.config.chapter_start,
            self.config.chapter_end,
        )?;
        info!("Converting chapters from {start} to {end}");

        let selected = &chapters[start - 1..end];
        let total_chars: usize = selected.iter().map(|c| c.text.chars().count()).sum();
        info!("✨ Total characters in selected chapters: {total_chars} ✨");
        let cost = backend.estimate_cost(total_chars);
        println!("Estimated voiceover cost: ${cost:.2}\n");

        if self.config.no_prompt {
            info!("Skipping prompt as passed parameter no_prompt");
        } else if self.config.preview {
            info!("Skipping prompt as in preview mode");
        } else if !confirm_conversion() {
            return Ok(RunOutcome::Declined);
        }

        let author = parser.book_author();
        let book_title = parser.book_title();

        let tasks: Vec<ChapterTask> = selected
            .iter()
            .enumerate()
            .map(|(offset, chapter)| ChapterTask {
                index: start + offset,
                title: chapter.title.clone(),
                text: chapter.text.clone(),
            })
            .collect();
        let total = tasks.len();

        let progress = ProgressBar::new(total as u64);
        if let Ok(style) = ProgressStyle::with_template(
            "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos:>4}/{len:4} {msg}",
        ) {
            progress.set_style(style.progress_chars("█▉▊▋▌▍▎▏  "));
        }

        let results = {
            let config = &self.config;
            let factory = backend_factory.clone();
            let progress = &progress;
            let author = author.as_str();
            let book_title = book_title.as_str();
            pool::dispatch(tasks, self.config.worker_count, cancel, move |task| {
                let outcome = process_chapter(config, factory.as_ref(), task, author, book_title);
                progress.inc(1);
                match outcome {
                    Ok(()) => true,
                    Err(err) => {
                        error!(
                            "Error processing chapter {} ({}): {err}",
                            task.index, task.title
                        );
                        false
                    }
                }
            })?
        };
        progress.finish_and_clear();

        if cancel.is_cancelled() && results.len() < total {
            warn!(
                "Job stopped by user after {} of {total} chapters, discarding partial results",
                results.len()
            );
            return Ok(RunOutcome::Aborted);
        }

        let mut failed: Vec<(usize, String)> = results
            .iter()
            .filter(|r| !r.success)
            .map(|r| (r.index, selected[r.index - start].title.clone()))
            .collect();
        failed.sort_by_key(|(index, _)| *index);

        if failed.is_empty() {
            info!("All chapters converted successfully. 🎉🎉🎉");
        } else {
            warn!("The following chapters failed to convert:");
            for (index, title) in &failed {
                warn!("  - Chapter {index}: {title}");
            }
            info!(
                "Conversion completed with {} failed chapters out of {total}.",
                failed.len()
            );
        }

        Ok(RunOutcome::Completed { total, failed })
    }
}

/// One chapter, one worker: optional text sidecar, preview short circuit,
/// then synthesis through a worker-owned backend handle.
fn process_chapter(
    config: &Config,
    backend_factory: &(dyn Fn() -> Result<Box<dyn TtsBackend>> + Send + Sync),
    task: &ChapterTask,
    author: &str,
    book_title: &str,
) -> Result<()> {
    info!("Processing chapter {}: {}", task.index, task.title);
    let backend = backend_factory()?;
    let safe_title = sanitize_filename(&task.title);

    if config.output_text {
        let text_path = config
            .output_folder
            .join(format!("{:04}_{}.txt", task.index, safe_title));
        fs::write(text_path, &task.text)?;
    }

    if config.preview {
        return Ok(());
    }

    let output_path = config.output_folder.join(format!(
        "{:04}_{}.{}",
        task.index,
        safe_title,
        backend.output_file_extension()
    ));
    let tags = AudioTags {
        chapter_title: task.title.clone(),
        author: author.to_string(),
        book_title: book_title.to_string(),
        chapter_index: task.index,
    };
    backend.text_to_speech(&task.text, &output_path, &tags)?;

    info!(
        "✅ Converted chapter {}: {}, output file: {}",
        task.index,
        task.title,
        output_path.display()
    );
    Ok(())
}

/// Resolve and check the requested chapter range against the filtered
/// chapter list. `end == -1` selects through the last chapter.
fn validate_range(len: usize, start: usize, end: i64) -> Result<(usize, usize)> {
    if start < 1 || start > len {
        return Err(ConvertError::Validation(format!(
            "chapter start index {start} is out of range (1..={len})"
        )));
    }
    if end < -1 || end == 0 || end > len as i64 {
        return Err(ConvertError::Validation(format!(
            "chapter end index {end} is out of range (1..={len} or -1)"
        )));
    }
    let end = if end == -1 { len } else { end as usize };
    if start > end {
        return Err(ConvertError::Validation(format!(
            "chapter start index {start} is larger than chapter end index {end}"
        )));
    }
    Ok((start, end))
}

fn confirm_conversion() -> bool {
    println!("Do you want to continue? (y/n)");
    let mut answer = String::new();
    if io::stdin().read_line(&mut answer).is_err() {
        return false;
    }
    answer.trim().eq_ignore_ascii_case("y")
}

fn sanitize_filename(name: &str) -> String {
    let invalid_chars = Regex::new(r#"[<>:"/\\|?*]"#).unwrap();
    invalid_chars.replace_all(name, "_").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TtsError;
    use std::path::Path;

    struct StubParser {
        chapters: Vec<Chapter>,
    }

    impl BookParser for StubParser {
        fn get_chapters(&self, _break_marker: &str) -> Result<Vec<Chapter>> {
            Ok(self.chapters.clone())
        }

        fn book_title(&self) -> String {
            "Stub Book".to_string()
        }

        fn book_author(&self) -> String {
            "Stub Author".to_string()
        }
    }

    /// Writes a marker file per chapter; permanently fails one chapter if
    /// told to.
    struct StubBackend {
        fail_chapter: Option<usize>,
    }

    impl TtsBackend for StubBackend {
        fn text_to_speech(
            &self,
            _text: &str,
            output_path: &Path,
            tags: &AudioTags,
        ) -> std::result::Result<(), TtsError> {
            if self.fail_chapter == Some(tags.chapter_index) {
                return Err(TtsError::permanent("no credit left"));
            }
            fs::write(output_path, b"audio").map_err(TtsError::permanent)?;
            Ok(())
        }

        fn break_string(&self) -> &str {
            "   "
        }

        fn output_file_extension(&self) -> &str {
            "mp3"
        }

        fn estimate_cost(&self, _total_chars: usize) -> f64 {
            0.0
        }

        fn validate_config(&self) -> Result<()> {
            Ok(())
        }
    }

    fn five_chapters() -> Vec<Chapter> {
        ["One", "Two", "Three", "Four", "Five"]
            .iter()
            .map(|title| Chapter {
                title: title.to_string(),
                text: format!("Text of chapter {title}."),
            })
            .collect()
    }

    fn pipeline(config: Config) -> AudiobookPipeline {
        AudiobookPipeline::new(config)
    }

    fn factory(fail_chapter: Option<usize>) -> BackendFactory {
        Arc::new(move || Ok(Box::new(StubBackend { fail_chapter }) as Box<dyn TtsBackend>))
    }

    #[test]
    fn range_validation_accepts_and_rejects() {
        assert!(validate_range(5, 0, -1).is_err());
        assert!(validate_range(5, 6, -1).is_err());
        assert!(validate_range(5, 1, -2).is_err());
        assert!(validate_range(5, 1, 6).is_err());
        assert!(validate_range(5, 4, 2).is_err());
        assert_eq!(validate_range(5, 2, -1).unwrap(), (2, 5));
        assert_eq!(validate_range(5, 1, 5).unwrap(), (1, 5));
        assert_eq!(validate_range(1, 1, -1).unwrap(), (1, 1));
    }

    #[test]
    fn failed_chapter_is_reported_but_does_not_fail_the_run() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config {
            output_folder: dir.path().to_path_buf(),
            chapter_start: 2,
            chapter_end: -1,
            no_prompt: true,
            worker_count: 2,
            ..Config::default()
        };
        let parser = StubParser {
            chapters: five_chapters(),
        };
        let cancel = CancelToken::new();

        let outcome = pipeline(config)
            .run_with(&parser, factory(Some(4)), &cancel)
            .unwrap();

        match outcome {
            RunOutcome::Completed { total, failed } => {
                assert_eq!(total, 4);
                assert_eq!(failed, vec![(4, "Four".to_string())]);
            }
            other => panic!("unexpected outcome: {other:?}"),
        }

        for (index, title, expected) in [
            (2, "Two", true),
            (3, "Three", true),
            (4, "Four", false),
            (5, "Five", true),
        ] {
            let path = dir.path().join(format!("{index:04}_{title}.mp3"));
            assert_eq!(path.exists(), expected, "chapter {index}");
        }
        assert!(!dir.path().join("0001_One.mp3").exists());
    }

    #[test]
    fn empty_chapters_are_filtered_before_validation() {
        let dir = tempfile::tempdir().unwrap();
        let mut chapters = five_chapters();
        chapters.insert(
            2,
            Chapter {
                title: "Blank".to_string(),
                text: "   \n ".to_string(),
            },
        );
        let config = Config {
            output_folder: dir.path().to_path_buf(),
            no_prompt: true,
            worker_count: 1,
            ..Config::default()
        };
        let parser = StubParser { chapters };
        let cancel = CancelToken::new();

        let outcome = pipeline(config)
            .run_with(&parser, factory(None), &cancel)
            .unwrap();

        match outcome {
            RunOutcome::Completed { total, failed } => {
                assert_eq!(total, 5);
                assert!(failed.is_empty());
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[test]
    fn preview_mode_writes_no_audio() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config {
            output_folder: dir.path().to_path_buf(),
            preview: true,
            output_text: true,
            worker_count: 1,
            ..Config::default()
        };
        let parser = StubParser {
            chapters: five_chapters(),
        };
        let cancel = CancelToken::new();

        let outcome = pipeline(config)
            .run_with(&parser, factory(None), &cancel)
            .unwrap();

        match outcome {
            RunOutcome::Completed { total, failed } => {
                assert_eq!(total, 5);
                assert!(failed.is_empty());
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
        assert!(dir.path().join("0001_One.txt").exists());
        assert!(!dir.path().join("0001_One.mp3").exists());
    }

    #[test]
    fn out_of_range_start_is_a_validation_error() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config {
            output_folder: dir.path().to_path_buf(),
            chapter_start: 9,
            no_prompt: true,
            ..Config::default()
        };
        let parser = StubParser {
            chapters: five_chapters(),
        };
        let cancel = CancelToken::new();

        let err = pipeline(config)
            .run_with(&parser, factory(None), &cancel)
            .unwrap_err();
        assert!(matches!(err, ConvertError::Validation(_)));
    }

    #[test]
    fn titles_are_sanitized_for_the_filesystem() {
        assert_eq!(sanitize_filename("Q: what/now?"), "Q_ what_now_");
        assert_eq!(sanitize_filename("plain title"), "plain title");
    }
}
