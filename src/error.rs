use thiserror::Error;

/// Boxed source error carried by backend failures.
pub type Source = Box<dyn std::error::Error + Send + Sync>;

/// Failure reported by a TTS backend call.
///
/// Backends classify their own failures: transport problems and server-side
/// hiccups are [`TtsError::Transient`] and eligible for retry, everything
/// the backend reports as unrecoverable (bad credentials, rejected input,
/// exceeded quota) is [`TtsError::Permanent`] and fails the chapter at once.
#[derive(Debug, Error)]
pub enum TtsError {
    #[error("transient backend failure: {0}")]
    Transient(#[source] Source),
    #[error("permanent backend failure: {0}")]
    Permanent(#[source] Source),
}

impl TtsError {
    pub fn transient<E: Into<Source>>(err: E) -> Self {
        TtsError::Transient(err.into())
    }

    pub fn permanent<E: Into<Source>>(err: E) -> Self {
        TtsError::Permanent(err.into())
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, TtsError::Transient(_))
    }
}

/// Top-level error for a conversion run.
#[derive(Debug, Error)]
pub enum ConvertError {
    #[error("invalid chapter range: {0}")]
    Validation(String),
    #[error("backend configuration: {0}")]
    Config(String),
    #[error("book parsing failed: {0}")]
    Parse(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Tts(#[from] TtsError),
    #[error("worker pool initialization failed: {0}")]
    Pool(#[from] rayon::ThreadPoolBuildError),
}

/// Convenience result type used throughout this crate.
pub type Result<T> = std::result::Result<T, ConvertError>;
