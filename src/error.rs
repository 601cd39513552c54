use std::fmt;

use serde::Serialize;
use thiserror::Error;

/// Classification of a single failed chunk attempt.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Missing or rejected credentials. Never retried.
    Config,
    /// Model output is not a JSON object after fence-stripping.
    MalformedResponse,
    /// HTTP error, rate limit, or transport failure reported by the provider.
    Provider,
    /// The attempt did not finish within its time budget.
    Timeout,
}

impl ErrorKind {
    #[must_use]
    pub fn is_retryable(self) -> bool {
        !matches!(self, Self::Config)
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Config => "config_error",
            Self::MalformedResponse => "malformed_response",
            Self::Provider => "provider_error",
            Self::Timeout => "timeout",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Error, Serialize)]
#[error("{kind}: {message}")]
pub struct ChunkFailure {
    pub kind: ErrorKind,
    pub message: String,
    /// Attempts spent before giving up. Filled in by the retry controller.
    pub attempts: u32,
}

impl ChunkFailure {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            attempts: 1,
        }
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Config, message)
    }

    pub fn malformed(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::MalformedResponse, message)
    }

    pub fn provider(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Provider, message)
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Timeout, message)
    }

    #[must_use]
    pub fn with_attempts(mut self, attempts: u32) -> Self {
        self.attempts = attempts;
        self
    }
}

/// What the end user should do about a terminal error.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UserHint {
    TrySmallerFile,
    TryAgain,
    CheckConfiguration,
    FixInputFile,
}

impl UserHint {
    #[must_use]
    pub fn message(self) -> &'static str {
        match self {
            Self::TrySmallerFile => "Please try a smaller file.",
            Self::TryAgain => "Please try again.",
            Self::CheckConfiguration => "Please check your configuration.",
            Self::FixInputFile => "Please upload a valid JSON object.",
        }
    }
}

/// Terminal errors of one translation run.
#[derive(Debug, Error)]
pub enum TranslateError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("input is not a valid JSON object: {0}")]
    InvalidInputJson(String),

    #[error("document too large: {chunks} chunks exceeds the limit of {max_chunks}")]
    TooLarge { chunks: usize, max_chunks: usize },

    #[error("translation failed on chunk {}/{total}: {failure}", .index + 1)]
    ChunkFailed {
        index: usize,
        total: usize,
        failure: ChunkFailure,
    },
}

impl TranslateError {
    /// Status code used when the run is fronted by a web endpoint.
    #[must_use]
    pub fn status_code(&self) -> u16 {
        match self {
            Self::Config(_) => 500,
            Self::InvalidInputJson(_) => 400,
            Self::TooLarge { .. } => 413,
            Self::ChunkFailed { failure, .. } => match failure.kind {
                ErrorKind::Config => 500,
                ErrorKind::Timeout => 408,
                ErrorKind::MalformedResponse | ErrorKind::Provider => 422,
            },
        }
    }

    #[must_use]
    pub fn user_hint(&self) -> UserHint {
        match self {
            Self::Config(_) => UserHint::CheckConfiguration,
            Self::InvalidInputJson(_) => UserHint::FixInputFile,
            Self::TooLarge { .. } => UserHint::TrySmallerFile,
            Self::ChunkFailed { failure, .. } => match failure.kind {
                ErrorKind::Config => UserHint::CheckConfiguration,
                ErrorKind::Timeout => UserHint::TrySmallerFile,
                ErrorKind::MalformedResponse | ErrorKind::Provider => UserHint::TryAgain,
            },
        }
    }
}
