mod chunk;
mod config;
mod error;
mod parser;
mod pool;
mod retry;
mod runner;
mod tts;

use std::path::PathBuf;
use std::process;
use std::thread;

use clap::{Arg, ArgAction, Command};
use log::{error, warn, LevelFilter};

use crate::config::{BackendKind, Config};
use crate::pool::CancelToken;
use crate::runner::{AudiobookPipeline, RunOutcome};

fn main() {
    let default_workers: &'static str = Box::leak(num_cpus::get().to_string().into_boxed_str());
    let matches = Command::new("Book to Audiobook Converter")
        .version("1.0")
        .about("Converts EPUB and plain-text books into per-chapter audiobooks using pluggable TTS backends")
        .arg(
            Arg::new("input")
                .short('i')
                .long("input")
                .value_name("FILE")
                .help("Input book file (.epub or .txt)")
                .required(true),
        )
        .arg(
            Arg::new("output")
                .short('o')
                .long("output")
                .value_name("DIR")
                .help("Output directory")
                .required(true),
        )
        .arg(
            Arg::new("start")
                .long("start")
                .value_name("N")
                .help("First chapter to convert, 1-based")
                .value_parser(clap::value_parser!(usize))
                .default_value("1"),
        )
        .arg(
            Arg::new("end")
                .long("end")
                .value_name("N")
                .help("Last chapter to convert; -1 means the last chapter")
                .value_parser(clap::value_parser!(i64))
                .allow_hyphen_values(true)
                .default_value("-1"),
        )
        .arg(
            Arg::new("no-prompt")
                .long("no-prompt")
                .help("Skip the cost confirmation prompt")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("preview")
                .long("preview")
                .help("Estimate cost and chapter count without generating audio")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("output-text")
                .long("output-text")
                .help("Also write each chapter's text next to its audio file")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("workers")
                .short('w')
                .long("workers")
                .value_name("NUM")
                .help("Number of worker threads")
                .value_parser(clap::value_parser!(usize))
                .default_value(default_workers),
        )
        .arg(
            Arg::new("backend")
                .short('b')
                .long("backend")
                .value_name("NAME")
                .help("TTS backend")
                .value_parser(["espeak", "openai"])
                .default_value("espeak"),
        )
        .arg(
            Arg::new("language")
                .long("language")
                .value_name("LANG")
                .help("Language of the book text")
                .default_value("en"),
        )
        .arg(
            Arg::new("voice")
                .long("voice")
                .value_name("NAME")
                .help("Backend voice name"),
        )
        .arg(
            Arg::new("model")
                .long("model")
                .value_name("NAME")
                .help("Backend model name"),
        )
        .arg(
            Arg::new("format")
                .short('f')
                .long("format")
                .value_name("FORMAT")
                .help("Output audio format"),
        )
        .arg(
            Arg::new("speed")
                .short('s')
                .long("speed")
                .value_name("FLOAT")
                .help("Voice speed multiplier")
                .value_parser(clap::value_parser!(f32))
                .default_value("1.0"),
        )
        .arg(
            Arg::new("break-duration")
                .long("break-duration")
                .value_name("MS")
                .help("Pause length for paragraph breaks, in milliseconds")
                .value_parser(clap::value_parser!(u64))
                .default_value("1250"),
        )
        .arg(
            Arg::new("log")
                .long("log")
                .value_name("LEVEL")
                .help("Log level")
                .value_parser(["error", "warn", "info", "debug", "trace"])
                .default_value("info"),
        )
        .get_matches();

    let level = match matches.get_one::<String>("log").map(String::as_str) {
        Some("error") => LevelFilter::Error,
        Some("warn") => LevelFilter::Warn,
        Some("debug") => LevelFilter::Debug,
        Some("trace") => LevelFilter::Trace,
        _ => LevelFilter::Info,
    };
    env_logger::Builder::from_default_env()
        .filter_level(level)
        .init();

    let get_string = |name: &str| matches.get_one::<String>(name).cloned();

    let config = Config {
        input_path: PathBuf::from(get_string("input").unwrap_or_default()),
        output_folder: PathBuf::from(get_string("output").unwrap_or_default()),
        chapter_start: *matches.get_one::<usize>("start").unwrap_or(&1),
        chapter_end: *matches.get_one::<i64>("end").unwrap_or(&-1),
        no_prompt: matches.get_flag("no-prompt"),
        preview: matches.get_flag("preview"),
        output_text: matches.get_flag("output-text"),
        worker_count: *matches.get_one::<usize>("workers").unwrap_or(&1),
        backend: get_string("backend")
            .and_then(|name| BackendKind::parse(&name))
            .unwrap_or(BackendKind::Espeak),
        language: get_string("language").unwrap_or_else(|| "en".to_string()),
        voice_name: get_string("voice"),
        model_name: get_string("model"),
        output_format: get_string("format"),
        speed: *matches.get_one::<f32>("speed").unwrap_or(&1.0),
        break_duration_ms: *matches.get_one::<u64>("break-duration").unwrap_or(&1250),
    };

    log::debug!(
        "config: {}",
        serde_json::to_string(&config).unwrap_or_default()
    );

    let cancel = CancelToken::new();
    install_interrupt_handler(cancel.clone());
    let pipeline = AudiobookPipeline::new(config);

    match pipeline.run(&cancel) {
        Ok(RunOutcome::Completed { .. }) => {}
        Ok(RunOutcome::Declined) => println!("Aborted."),
        Ok(RunOutcome::Aborted) => warn!("Job stopped by user."),
        Err(err) => {
            error!("{err}");
            process::exit(1);
        }
    }
}

/// On Ctrl-C, stop dispatching new chapters and let in-flight work finish
/// so no partially written audio file is left behind.
fn install_interrupt_handler(cancel: CancelToken) {
    thread::spawn(move || {
        let runtime = match tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
        {
            Ok(runtime) => runtime,
            Err(err) => {
                warn!("interrupt handler unavailable: {err}");
                return;
            }
        };
        if runtime.block_on(tokio::signal::ctrl_c()).is_ok() {
            warn!("Interrupt received, finishing in-flight chapters.");
            cancel.cancel();
        }
    });
}
